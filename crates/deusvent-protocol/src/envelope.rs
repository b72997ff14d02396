//! Frame header, signing, and the serialize/deserialize entry points.
//!
//! ```text
//! unsigned:  tag u16 | request_id u8 | payload
//! signed:    tag u16 | request_id u8 | public_key [32] | signature [64] | payload
//! ```
//!
//! The signature covers `tag | request_id | payload`, the frame as it
//! would look unsigned. Whether a frame is signed is a property of its tag,
//! looked up in the message set's table, so the receiver knows the layout
//! before reading past the header.

use deusvent_crypto::{Keys, PUBLIC_KEY_SIZE, PublicKey, SIGNATURE_SIZE};

use crate::messages::MessageSet;
use crate::wire::{WireReader, WireWriter};
use crate::{RequestId, SerializationError};

/// Bytes before the (optional) signature block: tag + request id.
pub const HEADER_LEN: usize = 3;

/// A decoded frame. Built by [`deserialize`] and consumed by the caller;
/// nothing keeps envelopes around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<M> {
    pub tag: u16,
    pub request_id: RequestId,
    /// Verified signer of an authenticated frame.
    pub signer: Option<PublicKey>,
    pub message: M,
}

/// Encodes `message` into a complete frame.
///
/// Authenticated messages need `keys`; for the rest `keys` is ignored.
pub fn serialize<M: MessageSet>(
    message: &M,
    request_id: RequestId,
    keys: Option<&Keys>,
) -> Result<Vec<u8>, SerializationError> {
    let tag = message.tag();
    let entry = M::lookup(tag).ok_or(SerializationError::UnknownTag(tag))?;

    let mut payload = WireWriter::new();
    message.encode_payload(&mut payload);

    if !entry.authenticated {
        let mut frame = WireWriter::with_capacity(HEADER_LEN + payload.len());
        frame.write(&tag).write(&request_id.0).put_raw(payload.as_slice());
        return Ok(frame.into_vec());
    }

    let keys = keys.ok_or(SerializationError::MissingKeys(tag))?;
    let signature = keys.sign(&canonical_bytes(tag, request_id, payload.as_slice()));

    let mut frame =
        WireWriter::with_capacity(HEADER_LEN + PUBLIC_KEY_SIZE + SIGNATURE_SIZE + payload.len());
    frame
        .write(&tag)
        .write(&request_id.0)
        .put_raw(&keys.public_key.serialize())
        .put_raw(&signature)
        .put_raw(payload.as_slice());
    Ok(frame.into_vec())
}

/// Decodes a complete frame, verifying its signature when the tag requires
/// one.
pub fn deserialize<M: MessageSet>(bytes: &[u8]) -> Result<Envelope<M>, SerializationError> {
    let mut r = WireReader::new(bytes);
    let tag: u16 = r.read()?;
    let entry = M::lookup(tag).ok_or(SerializationError::UnknownTag(tag))?;
    let request_id = RequestId(r.read()?);

    let signer = if entry.authenticated {
        let key_bytes = r.take(PUBLIC_KEY_SIZE, "public key")?;
        let signature = r.take(SIGNATURE_SIZE, "signature")?;
        let public_key = PublicKey::deserialize(key_bytes)?;
        if !public_key.verify(&canonical_bytes(tag, request_id, r.rest()), signature) {
            return Err(SerializationError::BadSignature);
        }
        Some(public_key)
    } else {
        None
    };

    let message = (entry.decode)(&mut r)?;
    r.finish()?;

    Ok(Envelope {
        tag,
        request_id,
        signer,
        message,
    })
}

/// Reads the request id without decoding the frame.
///
/// Returns [`RequestId::NONE`] for frames too short to carry one, the same
/// value the server uses for uncorrelated pushes.
pub fn parse_request_id(bytes: &[u8]) -> RequestId {
    bytes.get(2).map_or(RequestId::NONE, |&b| RequestId(b))
}

/// Reads the tag without decoding the frame.
pub fn peek_tag(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

fn canonical_bytes(tag: u16, request_id: RequestId, payload: &[u8]) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(HEADER_LEN + payload.len());
    w.write(&tag).write(&request_id.0).put_raw(payload);
    w.into_vec()
}
