//! Big-endian binary reader and writer for message payloads.
//!
//! Every field type that can appear in a payload implements [`Encode`] and
//! [`Decode`]. The rules are fixed regardless of host byte order:
//!
//! ```text
//! u8 / u16 / u32 / u64   big-endian, fixed width
//! bool                   0u8 or 1u8; anything else is BadData
//! String                 len u32 | utf-8 bytes
//! Option<T>              0u8 | 1u8 T
//! SafeString             0u8 String | 1u8 salt [12] | len u32 | ciphertext
//! ```
//!
//! `bytes::BufMut::put_u16` and friends write big-endian, and
//! `bytes::Buf::get_u16` reads it back, so no manual byte swapping is
//! needed on little-endian hosts.

use bytes::{Buf, BufMut, BytesMut};
use deusvent_crypto::{EncryptedString, SALT_SIZE, SafeString};

use crate::SerializationError;

/// Accumulates an encoded payload.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends any encodable value.
    pub fn write<T: Encode + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.encode(self);
        self
    }

    /// Appends raw bytes with no length prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Cursor over an encoded payload.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Decodes the next value.
    pub fn read<T: Decode>(&mut self) -> Result<T, SerializationError> {
        T::decode(self)
    }

    /// Takes exactly `len` raw bytes.
    pub fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], SerializationError> {
        if self.buf.len() < len {
            return Err(SerializationError::truncated(what));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Takes a fixed-size array.
    pub fn take_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], SerializationError> {
        let bytes = self.take(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Everything not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    /// Fails if any bytes are left over.
    pub fn finish(self) -> Result<(), SerializationError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(SerializationError::BadData(format!(
                "{} trailing bytes after payload",
                self.buf.len()
            )))
        }
    }

    fn need(&self, len: usize, what: &str) -> Result<(), SerializationError> {
        if self.buf.remaining() < len {
            Err(SerializationError::truncated(what))
        } else {
            Ok(())
        }
    }
}

/// A value that can be written to a payload.
pub trait Encode {
    fn encode(&self, w: &mut WireWriter);
}

/// A value that can be read from a payload.
pub trait Decode: Sized {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError>;
}

// ---------------------------------------------------------------------------
// Integers
// ---------------------------------------------------------------------------

macro_rules! int_codec {
    ($ty:ty, $put:ident, $get:ident) => {
        impl Encode for $ty {
            fn encode(&self, w: &mut WireWriter) {
                w.buf.$put(*self);
            }
        }

        impl Decode for $ty {
            fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
                r.need(std::mem::size_of::<$ty>(), stringify!($ty))?;
                Ok(r.buf.$get())
            }
        }
    };
}

int_codec!(u8, put_u8, get_u8);
int_codec!(u16, put_u16, get_u16);
int_codec!(u32, put_u32, get_u32);
int_codec!(u64, put_u64, get_u64);

// ---------------------------------------------------------------------------
// bool, strings, options
// ---------------------------------------------------------------------------

impl Encode for bool {
    fn encode(&self, w: &mut WireWriter) {
        w.buf.put_u8(u8::from(*self));
    }
}

impl Decode for bool {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        match r.read::<u8>()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SerializationError::BadData(format!("invalid bool byte {other}"))),
        }
    }
}

impl Encode for str {
    fn encode(&self, w: &mut WireWriter) {
        // Payload strings are bounded far below 4 GiB by the transport.
        w.buf.put_u32(self.len() as u32);
        w.buf.put_slice(self.as_bytes());
    }
}

impl Encode for String {
    fn encode(&self, w: &mut WireWriter) {
        self.as_str().encode(w);
    }
}

impl Decode for String {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        let len = r.read::<u32>()? as usize;
        let bytes = r.take(len, "string")?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SerializationError::BadData("string is not valid utf-8".into()))
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, w: &mut WireWriter) {
        match self {
            None => w.buf.put_u8(0),
            Some(value) => {
                w.buf.put_u8(1);
                value.encode(w);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        match r.read::<u8>()? {
            0 => Ok(None),
            1 => Ok(Some(r.read()?)),
            other => Err(SerializationError::BadData(format!(
                "invalid option discriminant {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// SafeString
// ---------------------------------------------------------------------------

const SAFE_STRING_PLAINTEXT: u8 = 0;
const SAFE_STRING_ENCRYPTED: u8 = 1;

impl Encode for SafeString {
    fn encode(&self, w: &mut WireWriter) {
        match self {
            SafeString::Plaintext(value) => {
                w.buf.put_u8(SAFE_STRING_PLAINTEXT);
                value.encode(w);
            }
            SafeString::Encrypted(encrypted) => {
                w.buf.put_u8(SAFE_STRING_ENCRYPTED);
                w.buf.put_slice(encrypted.salt());
                w.buf.put_u32(encrypted.ciphertext().len() as u32);
                w.buf.put_slice(encrypted.ciphertext());
            }
        }
    }
}

impl Decode for SafeString {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        match r.read::<u8>()? {
            SAFE_STRING_PLAINTEXT => Ok(SafeString::Plaintext(r.read()?)),
            SAFE_STRING_ENCRYPTED => {
                let salt = r.take_array::<SALT_SIZE>("salt")?;
                let len = r.read::<u32>()? as usize;
                let data = r.take(len, "ciphertext")?.to_vec();
                Ok(SafeString::Encrypted(EncryptedString::from_parts(salt, data)))
            }
            other => Err(SerializationError::BadData(format!(
                "invalid SafeString discriminant {other}"
            ))),
        }
    }
}
