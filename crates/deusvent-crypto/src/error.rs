/// Errors from key handling and field encryption.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncryptionError {
    /// Decryption failed: wrong key, tampered ciphertext, or plaintext that
    /// is not valid UTF-8.
    #[error("invalid encrypted data")]
    InvalidData,

    /// Key bytes have the wrong length or are not a valid curve point.
    #[error("invalid key: expected {expected} bytes, got {actual}")]
    InvalidKey { expected: usize, actual: usize },
}
