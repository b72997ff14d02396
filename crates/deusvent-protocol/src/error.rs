//! Error types for the protocol layer.
//!
//! Each crate in the workspace defines its own error enum. When you see a
//! `SerializationError`, the problem is in turning bytes into messages or
//! back, not in networking or request bookkeeping.

use deusvent_crypto::EncryptionError;

/// Errors that can occur while encoding or decoding a frame.
///
/// Signature failures get their own variant so an integrity violation is
/// never confused with an ordinary truncated frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializationError {
    /// The bytes are structurally wrong: truncated, trailing garbage, an
    /// invalid discriminant, non-UTF-8 string data.
    #[error("bad data: {0}")]
    BadData(String),

    /// The frame's tag is not registered for this message direction.
    #[error("unknown message tag {0}")]
    UnknownTag(u16),

    /// An authenticated frame whose signature does not match its contents.
    #[error("signature verification failed")]
    BadSignature,

    /// An authenticated message was serialized without signing keys.
    #[error("message tag {0} must be signed but no keys were supplied")]
    MissingKeys(u16),

    /// Embedded key bytes could not be parsed.
    #[error("invalid embedded key: {0}")]
    Key(#[from] EncryptionError),
}

impl SerializationError {
    pub(crate) fn truncated(what: &str) -> Self {
        Self::BadData(format!("truncated frame while reading {what}"))
    }
}
