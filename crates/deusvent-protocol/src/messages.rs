//! Message payloads and the closed message sets for each direction.
//!
//! Every payload struct implements [`Message`], which fixes its wire tag.
//! The payloads are grouped into two closed enums:
//!
//! - [`ClientMessage`] — what the client sends (`Ping`, `DecayQuery`,
//!   `Identity`)
//! - [`ServerMessage`] — what the server sends (`ServerStatus`, `Decay`,
//!   `ServerError`)
//!
//! Decoding goes through a static table per direction mapping tag → decoder
//! ([`TagEntry`]). No runtime registration, no trait objects: adding a
//! message means adding a variant and a table row.

use deusvent_crypto::SafeString;

use crate::time::{Duration, ServerTimestamp};
use crate::wire::{Decode, Encode, WireReader, WireWriter};
use crate::{RequestId, SerializationError};

/// A payload type with a fixed wire tag.
pub trait Message: Encode + Decode {
    /// Wire tag. Unique within its direction.
    const TAG: u16;
    /// Human-readable name for logs.
    const NAME: &'static str;
    /// Whether frames carrying this message are signed.
    const AUTHENTICATED: bool = false;
}

/// A client message that expects a correlated reply.
pub trait Request: Message + Into<ClientMessage> {
    /// What a successful reply decodes into.
    type Response: Response;
}

/// A value extracted from a correlated [`ServerMessage`].
pub trait Response: Sized + Send + 'static {
    /// Picks the expected variant, handing the message back otherwise.
    fn from_message(message: ServerMessage) -> Result<Self, ServerMessage>;
}

/// One row of a message set's dispatch table.
pub struct TagEntry<M: 'static> {
    pub tag: u16,
    pub name: &'static str,
    pub authenticated: bool,
    pub decode: fn(&mut WireReader<'_>) -> Result<M, SerializationError>,
}

/// A closed set of messages sharing one tag namespace.
pub trait MessageSet: Sized + 'static {
    /// The dispatch table, one row per variant.
    const TABLE: &'static [TagEntry<Self>];

    /// This value's wire tag.
    fn tag(&self) -> u16;

    /// Writes the payload (no header).
    fn encode_payload(&self, w: &mut WireWriter);

    /// Finds the table row for `tag`.
    fn lookup(tag: u16) -> Option<&'static TagEntry<Self>> {
        Self::TABLE.iter().find(|entry| entry.tag == tag)
    }

    /// Log name of `tag`, or `"unknown"`.
    fn name_of(tag: u16) -> &'static str {
        Self::lookup(tag).map_or("unknown", |entry| entry.name)
    }
}

fn decode_into<T, M>(r: &mut WireReader<'_>) -> Result<M, SerializationError>
where
    T: Decode + Into<M>,
{
    Ok(r.read::<T>()?.into())
}

// ===========================================================================
// Client → server
// ===========================================================================

/// Keep-alive and clock probe. Answered with [`ServerStatus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ping;

impl Message for Ping {
    const TAG: u16 = 0;
    const NAME: &'static str = "ping";
}

impl Encode for Ping {
    fn encode(&self, _w: &mut WireWriter) {}
}

impl Decode for Ping {
    fn decode(_r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        Ok(Ping)
    }
}

/// Asks for the player's current decay. Signed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecayQuery;

impl Message for DecayQuery {
    const TAG: u16 = 2;
    const NAME: &'static str = "decay-query";
    const AUTHENTICATED: bool = true;
}

impl Encode for DecayQuery {
    fn encode(&self, _w: &mut WireWriter) {}
}

impl Decode for DecayQuery {
    fn decode(_r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        Ok(DecayQuery)
    }
}

/// Sets the player's display name. Signed; the name may be encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: SafeString,
}

impl Message for Identity {
    const TAG: u16 = 3;
    const NAME: &'static str = "identity";
    const AUTHENTICATED: bool = true;
}

impl Encode for Identity {
    fn encode(&self, w: &mut WireWriter) {
        w.write(&self.name);
    }
}

impl Decode for Identity {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        Ok(Self { name: r.read()? })
    }
}

/// Every message the client can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Ping(Ping),
    DecayQuery(DecayQuery),
    Identity(Identity),
}

impl From<Ping> for ClientMessage {
    fn from(value: Ping) -> Self {
        Self::Ping(value)
    }
}

impl From<DecayQuery> for ClientMessage {
    fn from(value: DecayQuery) -> Self {
        Self::DecayQuery(value)
    }
}

impl From<Identity> for ClientMessage {
    fn from(value: Identity) -> Self {
        Self::Identity(value)
    }
}

impl MessageSet for ClientMessage {
    const TABLE: &'static [TagEntry<Self>] = &[
        TagEntry {
            tag: Ping::TAG,
            name: Ping::NAME,
            authenticated: Ping::AUTHENTICATED,
            decode: decode_into::<Ping, ClientMessage>,
        },
        TagEntry {
            tag: DecayQuery::TAG,
            name: DecayQuery::NAME,
            authenticated: DecayQuery::AUTHENTICATED,
            decode: decode_into::<DecayQuery, ClientMessage>,
        },
        TagEntry {
            tag: Identity::TAG,
            name: Identity::NAME,
            authenticated: Identity::AUTHENTICATED,
            decode: decode_into::<Identity, ClientMessage>,
        },
    ];

    fn tag(&self) -> u16 {
        match self {
            Self::Ping(_) => Ping::TAG,
            Self::DecayQuery(_) => DecayQuery::TAG,
            Self::Identity(_) => Identity::TAG,
        }
    }

    fn encode_payload(&self, w: &mut WireWriter) {
        match self {
            Self::Ping(m) => m.encode(w),
            Self::DecayQuery(m) => m.encode(w),
            Self::Identity(m) => m.encode(w),
        }
    }
}

impl Request for Ping {
    type Response = ServerStatus;
}

impl Request for DecayQuery {
    type Response = Decay;
}

impl Request for Identity {
    type Response = ServerMessage;
}

// ===========================================================================
// Server → client
// ===========================================================================

/// Server health as reported in [`ServerStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
}

impl Encode for Status {
    fn encode(&self, w: &mut WireWriter) {
        match self {
            Status::Ok => w.write(&0u8),
        };
    }
}

impl Decode for Status {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        match r.read::<u8>()? {
            0 => Ok(Status::Ok),
            other => Err(SerializationError::BadData(format!("invalid status {other}"))),
        }
    }
}

/// Reply to [`Ping`]: server status plus its clock for synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatus {
    pub timestamp: ServerTimestamp,
    pub status: Status,
}

impl Message for ServerStatus {
    const TAG: u16 = 1;
    const NAME: &'static str = "server-status";
}

impl Encode for ServerStatus {
    fn encode(&self, w: &mut WireWriter) {
        w.write(&self.timestamp).write(&self.status);
    }
}

impl Decode for ServerStatus {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        Ok(Self {
            timestamp: r.read()?,
            status: r.read()?,
        })
    }
}

/// Reply to [`DecayQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decay {
    pub started_at: ServerTimestamp,
    pub length: Duration,
}

impl Message for Decay {
    const TAG: u16 = 2;
    const NAME: &'static str = "decay";
}

impl Encode for Decay {
    fn encode(&self, w: &mut WireWriter) {
        w.write(&self.started_at).write(&self.length);
    }
}

impl Decode for Decay {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        Ok(Self {
            started_at: r.read()?,
            length: r.read()?,
        })
    }
}

/// Category of a [`ServerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    AuthenticationError,
    SerializationError,
    InvalidData,
    IoError,
    ServerError,
}

impl Encode for ErrorCode {
    fn encode(&self, w: &mut WireWriter) {
        let code: u8 = match self {
            ErrorCode::AuthenticationError => 0,
            ErrorCode::SerializationError => 1,
            ErrorCode::InvalidData => 2,
            ErrorCode::IoError => 3,
            ErrorCode::ServerError => 4,
        };
        w.write(&code);
    }
}

impl Decode for ErrorCode {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        Ok(match r.read::<u8>()? {
            0 => ErrorCode::AuthenticationError,
            1 => ErrorCode::SerializationError,
            2 => ErrorCode::InvalidData,
            3 => ErrorCode::IoError,
            4 => ErrorCode::ServerError,
            other => {
                return Err(SerializationError::BadData(format!("invalid error code {other}")));
            }
        })
    }
}

/// An application error reported by the server.
///
/// With a nonzero `request_id` it answers that request; with id 0 it is an
/// unsolicited report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("server error {error_code:?} for tag {message_tag}: {error_description}")]
pub struct ServerError {
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_context: Option<String>,
    pub request_id: RequestId,
    /// Tag of the message that caused the error.
    pub message_tag: u16,
    pub recoverable: bool,
}

impl ServerError {
    /// The canonical reply to a frame that failed to decode.
    pub fn from_serialization_error(
        err: &SerializationError,
        message_tag: u16,
        request_id: RequestId,
    ) -> Self {
        Self {
            error_code: ErrorCode::SerializationError,
            error_description: "Data is invalid and cannot be processed".to_string(),
            error_context: Some(err.to_string()),
            request_id,
            message_tag,
            recoverable: false,
        }
    }
}

impl Message for ServerError {
    const TAG: u16 = 3;
    const NAME: &'static str = "server-error";
}

impl Encode for ServerError {
    fn encode(&self, w: &mut WireWriter) {
        w.write(&self.error_code)
            .write(&self.error_description)
            .write(&self.error_context)
            .write(&self.request_id.0)
            .write(&self.message_tag)
            .write(&self.recoverable);
    }
}

impl Decode for ServerError {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        Ok(Self {
            error_code: r.read()?,
            error_description: r.read()?,
            error_context: r.read()?,
            request_id: RequestId(r.read()?),
            message_tag: r.read()?,
            recoverable: r.read()?,
        })
    }
}

/// Every message the server can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    ServerStatus(ServerStatus),
    Decay(Decay),
    ServerError(ServerError),
}

impl From<ServerStatus> for ServerMessage {
    fn from(value: ServerStatus) -> Self {
        Self::ServerStatus(value)
    }
}

impl From<Decay> for ServerMessage {
    fn from(value: Decay) -> Self {
        Self::Decay(value)
    }
}

impl From<ServerError> for ServerMessage {
    fn from(value: ServerError) -> Self {
        Self::ServerError(value)
    }
}

impl MessageSet for ServerMessage {
    const TABLE: &'static [TagEntry<Self>] = &[
        TagEntry {
            tag: ServerStatus::TAG,
            name: ServerStatus::NAME,
            authenticated: ServerStatus::AUTHENTICATED,
            decode: decode_into::<ServerStatus, ServerMessage>,
        },
        TagEntry {
            tag: Decay::TAG,
            name: Decay::NAME,
            authenticated: Decay::AUTHENTICATED,
            decode: decode_into::<Decay, ServerMessage>,
        },
        TagEntry {
            tag: ServerError::TAG,
            name: ServerError::NAME,
            authenticated: ServerError::AUTHENTICATED,
            decode: decode_into::<ServerError, ServerMessage>,
        },
    ];

    fn tag(&self) -> u16 {
        match self {
            Self::ServerStatus(_) => ServerStatus::TAG,
            Self::Decay(_) => Decay::TAG,
            Self::ServerError(_) => ServerError::TAG,
        }
    }

    fn encode_payload(&self, w: &mut WireWriter) {
        match self {
            Self::ServerStatus(m) => m.encode(w),
            Self::Decay(m) => m.encode(w),
            Self::ServerError(m) => m.encode(w),
        }
    }
}

impl Response for ServerStatus {
    fn from_message(message: ServerMessage) -> Result<Self, ServerMessage> {
        match message {
            ServerMessage::ServerStatus(status) => Ok(status),
            other => Err(other),
        }
    }
}

impl Response for Decay {
    fn from_message(message: ServerMessage) -> Result<Self, ServerMessage> {
        match message {
            ServerMessage::Decay(decay) => Ok(decay),
            other => Err(other),
        }
    }
}

impl Response for ServerMessage {
    fn from_message(message: ServerMessage) -> Result<Self, ServerMessage> {
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_unique_tags<M: MessageSet>() {
        let mut seen = HashSet::new();
        for entry in M::TABLE {
            assert!(seen.insert(entry.tag), "duplicate tag {}", entry.tag);
        }
    }

    #[test]
    fn test_tables_have_unique_tags() {
        assert_unique_tags::<ClientMessage>();
        assert_unique_tags::<ServerMessage>();
    }

    #[test]
    fn test_table_rows_match_variant_tags() {
        let client = [
            ClientMessage::Ping(Ping),
            ClientMessage::DecayQuery(DecayQuery),
            ClientMessage::Identity(Identity { name: "n".into() }),
        ];
        for msg in &client {
            assert!(ClientMessage::lookup(msg.tag()).is_some());
        }
        assert_eq!(ClientMessage::TABLE.len(), client.len());
        assert_eq!(ServerMessage::name_of(3), "server-error");
        assert_eq!(ServerMessage::name_of(99), "unknown");
    }

    #[test]
    fn test_authenticated_flags() {
        assert!(!ClientMessage::lookup(Ping::TAG).unwrap().authenticated);
        assert!(ClientMessage::lookup(DecayQuery::TAG).unwrap().authenticated);
        assert!(ClientMessage::lookup(Identity::TAG).unwrap().authenticated);
        assert!(ServerMessage::TABLE.iter().all(|e| !e.authenticated));
    }

    #[test]
    fn test_server_error_from_serialization_error() {
        let err = SerializationError::BadData("short".into());
        let reply = ServerError::from_serialization_error(&err, Identity::TAG, RequestId(4));
        assert_eq!(reply.error_code, ErrorCode::SerializationError);
        assert_eq!(reply.request_id, RequestId(4));
        assert_eq!(reply.message_tag, 3);
        assert!(!reply.recoverable);
        assert_eq!(reply.error_context.as_deref(), Some("bad data: short"));
    }

    #[test]
    fn test_error_code_rejects_unknown_byte() {
        let mut r = WireReader::new(&[9]);
        assert!(matches!(r.read::<ErrorCode>(), Err(SerializationError::BadData(_))));
    }

    #[test]
    fn test_response_from_message_hands_back_other_variants() {
        let status = ServerStatus {
            timestamp: ServerTimestamp::from_millis(1),
            status: Status::Ok,
        };
        let decay = Decay {
            started_at: ServerTimestamp::from_millis(1),
            length: Duration::from_secs(60),
        };
        assert_eq!(ServerStatus::from_message(status.into()), Ok(status));
        assert_eq!(
            ServerStatus::from_message(decay.into()),
            Err(ServerMessage::Decay(decay))
        );
        assert_eq!(Decay::from_message(decay.into()), Ok(decay));
    }
}
