//! Unified error type for the Deusvent client.

use deusvent_crypto::EncryptionError;
use deusvent_protocol::SerializationError;
use deusvent_session::{ConfigError, RequestError, SessionError};
use deusvent_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impl, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum DeusventError {
    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// Key material or an encrypted field was rejected.
    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    /// The session refused the operation (ids exhausted, queue full, closed).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The session configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A request was answered with an error or never answered.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The local key/value store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from a [`KeyValueStore`](crate::KeyValueStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The backing store reported a failure.
    #[error("storage backend failed: {0}")]
    Backend(String),

    /// A stored value exists but cannot be used.
    #[error("stored value for {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use deusvent_protocol::RequestId;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let deusvent_err: DeusventError = err.into();
        assert!(matches!(deusvent_err, DeusventError::Transport(_)));
        assert!(deusvent_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_serialization_error() {
        let err = SerializationError::UnknownTag(99);
        let deusvent_err: DeusventError = err.into();
        assert!(matches!(deusvent_err, DeusventError::Serialization(_)));
        assert!(deusvent_err.to_string().contains("99"));
    }

    #[test]
    fn test_from_encryption_error() {
        let deusvent_err: DeusventError = EncryptionError::InvalidData.into();
        assert!(matches!(deusvent_err, DeusventError::Encryption(_)));
    }

    #[test]
    fn test_from_session_error() {
        let deusvent_err: DeusventError = SessionError::RequestIdsExhausted.into();
        assert!(matches!(deusvent_err, DeusventError::Session(_)));
    }

    #[test]
    fn test_from_request_error() {
        let deusvent_err: DeusventError = RequestError::Timeout(RequestId(4)).into();
        assert!(matches!(
            deusvent_err,
            DeusventError::Request(RequestError::Timeout(RequestId(4)))
        ));
    }

    #[test]
    fn test_from_config_error() {
        let err = ConfigError::Invalid {
            field: "sweep_interval",
            reason: "must be non-zero",
        };
        let deusvent_err: DeusventError = err.into();
        assert!(matches!(deusvent_err, DeusventError::Config(_)));
        assert!(deusvent_err.to_string().contains("sweep_interval"));
    }

    #[test]
    fn test_from_storage_error_display() {
        let err = StorageError::Corrupt {
            key: "identity".into(),
            reason: "not hex".into(),
        };
        let deusvent_err: DeusventError = err.into();
        assert_eq!(
            deusvent_err.to_string(),
            "stored value for identity is corrupt: not hex"
        );
    }
}
