//! Field-level string encryption.
//!
//! Individual payload strings (a player name, say) can travel encrypted so
//! that only the identity that wrote them can read them back. Each value
//! gets its own key:
//!
//! ```text
//! salt  = 12 random bytes
//! key   = HKDF-SHA256(ikm = private key, salt, info = FIELD_KEY_INFO)
//! data  = ChaCha20-Poly1305(key, nonce = salt, plaintext)
//! ```
//!
//! The salt is stored next to the ciphertext. Since every value derives a
//! fresh key, reusing the salt as the nonce never repeats a (key, nonce)
//! pair.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::Rng;
use sha2::Sha256;

use crate::{EncryptionError, PrivateKey};

/// Salt (and nonce) length in bytes.
pub const SALT_SIZE: usize = 12;

const FIELD_KEY_INFO: &[u8] = b"deusvent-field-key";

/// A string sealed with a key derived from a [`PrivateKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedString {
    salt: [u8; SALT_SIZE],
    data: Vec<u8>,
}

impl EncryptedString {
    /// Encrypts `plaintext` under a fresh key derived from `private_key`.
    pub fn new(plaintext: &str, private_key: &PrivateKey) -> Self {
        let salt: [u8; SALT_SIZE] = rand::rng().random();
        let cipher = field_cipher(private_key, &salt);
        let data = cipher
            .encrypt(Nonce::from_slice(&salt), plaintext.as_bytes())
            .expect("plaintext is a wire string, far below the AEAD length limit");
        Self { salt, data }
    }

    /// Rebuilds a value read off the wire.
    pub fn from_parts(salt: [u8; SALT_SIZE], data: Vec<u8>) -> Self {
        Self { salt, data }
    }

    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }

    /// Ciphertext including the 16-byte authentication tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.data
    }

    /// Recovers the plaintext.
    ///
    /// Fails with [`EncryptionError::InvalidData`] for a non-matching key or
    /// any modification of salt or ciphertext.
    pub fn decrypt(&self, private_key: &PrivateKey) -> Result<String, EncryptionError> {
        let cipher = field_cipher(private_key, &self.salt);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&self.salt), self.data.as_slice())
            .map_err(|_| EncryptionError::InvalidData)?;
        String::from_utf8(plaintext).map_err(|_| EncryptionError::InvalidData)
    }
}

fn field_cipher(private_key: &PrivateKey, salt: &[u8; SALT_SIZE]) -> ChaCha20Poly1305 {
    let hk = Hkdf::<Sha256>::new(Some(salt.as_slice()), private_key.secret_bytes());
    let mut okm = [0u8; 32];
    hk.expand(FIELD_KEY_INFO, &mut okm)
        .expect("32 bytes is within the HKDF-SHA256 output limit");
    ChaCha20Poly1305::new(Key::from_slice(&okm))
}

/// A payload string that is either plain or encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeString {
    Plaintext(String),
    Encrypted(EncryptedString),
}

impl SafeString {
    /// Shorthand for `SafeString::Encrypted(EncryptedString::new(..))`.
    pub fn encrypted(plaintext: &str, private_key: &PrivateKey) -> Self {
        Self::Encrypted(EncryptedString::new(plaintext, private_key))
    }

    /// Returns the readable value, decrypting if needed.
    pub fn reveal(&self, private_key: &PrivateKey) -> Result<String, EncryptionError> {
        match self {
            Self::Plaintext(value) => Ok(value.clone()),
            Self::Encrypted(encrypted) => encrypted.decrypt(private_key),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }
}

impl From<String> for SafeString {
    fn from(value: String) -> Self {
        Self::Plaintext(value)
    }
}

impl From<&str> for SafeString {
    fn from(value: &str) -> Self {
        Self::Plaintext(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_new_keys;

    #[test]
    fn test_encrypted_string_decrypt_with_same_key_returns_plaintext() {
        let keys = generate_new_keys();
        for text in ["", "hello", "name with ünïcödé 🦀", &"x".repeat(4096)] {
            let encrypted = EncryptedString::new(text, &keys.private_key);
            assert_eq!(encrypted.decrypt(&keys.private_key).unwrap(), text);
        }
    }

    #[test]
    fn test_encrypted_string_new_ciphertext_carries_plaintext_and_tag() {
        let keys = generate_new_keys();
        for text in ["", "hello", &"x".repeat(4096)] {
            let encrypted = EncryptedString::new(text, &keys.private_key);
            assert_eq!(encrypted.ciphertext().len(), text.len() + 16);
        }
    }

    #[test]
    fn test_encrypted_string_decrypt_with_other_key_is_invalid_data() {
        let keys = generate_new_keys();
        let other = generate_new_keys();
        let encrypted = EncryptedString::new("secret", &keys.private_key);
        assert_eq!(
            encrypted.decrypt(&other.private_key),
            Err(EncryptionError::InvalidData)
        );
    }

    #[test]
    fn test_encrypted_string_tampered_ciphertext_is_invalid_data() {
        let keys = generate_new_keys();
        let encrypted = EncryptedString::new("secret", &keys.private_key);
        let mut data = encrypted.ciphertext().to_vec();
        data[0] ^= 0x01;
        let tampered = EncryptedString::from_parts(*encrypted.salt(), data);
        assert_eq!(
            tampered.decrypt(&keys.private_key),
            Err(EncryptionError::InvalidData)
        );
    }

    #[test]
    fn test_encrypted_string_truncated_ciphertext_is_invalid_data() {
        let keys = generate_new_keys();
        let broken = EncryptedString::from_parts([7; SALT_SIZE], vec![1, 2, 3]);
        assert_eq!(broken.decrypt(&keys.private_key), Err(EncryptionError::InvalidData));
    }

    #[test]
    fn test_encrypted_string_uses_fresh_salt_per_value() {
        let keys = generate_new_keys();
        let a = EncryptedString::new("same", &keys.private_key);
        let b = EncryptedString::new("same", &keys.private_key);
        assert_ne!(a.salt(), b.salt());
        assert_ne!(a.ciphertext(), b.ciphertext());
    }

    #[test]
    fn test_safe_string_reveal_plain_and_encrypted() {
        let keys = generate_new_keys();
        let plain = SafeString::from("visible");
        let sealed = SafeString::encrypted("hidden", &keys.private_key);
        assert!(!plain.is_encrypted());
        assert!(sealed.is_encrypted());
        assert_eq!(plain.reveal(&keys.private_key).unwrap(), "visible");
        assert_eq!(sealed.reveal(&keys.private_key).unwrap(), "hidden");
    }
}
