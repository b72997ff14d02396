//! Ed25519 identity keys and message signatures.
//!
//! A player is identified by their public key. The private half never
//! leaves the client: it signs authenticated messages and is the input
//! key material for field encryption (see [`crate::EncryptedString`]).

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::Rng;

use crate::EncryptionError;

/// Public key size in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Private key size in bytes.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Signature size in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Public half of an identity. Verifies signatures and doubles as the
/// player identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Raw key bytes, exactly [`PUBLIC_KEY_SIZE`] long.
    pub fn serialize(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Parses raw key bytes produced by [`serialize`](Self::serialize).
    pub fn deserialize(data: &[u8]) -> Result<Self, EncryptionError> {
        let bytes: [u8; PUBLIC_KEY_SIZE] = data.try_into().map_err(|_| {
            EncryptionError::InvalidKey {
                expected: PUBLIC_KEY_SIZE,
                actual: data.len(),
            }
        })?;
        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|_| EncryptionError::InvalidKey {
                expected: PUBLIC_KEY_SIZE,
                actual: data.len(),
            })
    }

    /// Hex encoding of the key bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }

    /// Checks `signature` over `payload`. Malformed signatures verify as
    /// `false`.
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        let Ok(bytes) = <[u8; SIGNATURE_SIZE]>::try_from(signature) else {
            return false;
        };
        self.0.verify(payload, &Signature::from_bytes(&bytes)).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Private half of an identity.
///
/// `Debug` never prints key material.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Raw key bytes, exactly [`PRIVATE_KEY_SIZE`] long.
    pub fn serialize(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Parses raw key bytes produced by [`serialize`](Self::serialize).
    pub fn deserialize(data: &[u8]) -> Result<Self, EncryptionError> {
        let bytes: [u8; PRIVATE_KEY_SIZE] = data.try_into().map_err(|_| {
            EncryptionError::InvalidKey {
                expected: PRIVATE_KEY_SIZE,
                actual: data.len(),
            }
        })?;
        Ok(Self(SigningKey::from_bytes(&bytes)))
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Signs `payload`, returning a [`SIGNATURE_SIZE`]-byte signature.
    pub fn sign(&self, payload: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.0.sign(payload).to_bytes()
    }

    pub(crate) fn secret_bytes(&self) -> &[u8; PRIVATE_KEY_SIZE] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// An identity key pair. Read-only after construction, so it can be shared
/// freely across tasks behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl Keys {
    /// Rebuilds the pair from a private key.
    pub fn from_private(private_key: PrivateKey) -> Self {
        Self {
            public_key: private_key.public_key(),
            private_key,
        }
    }

    /// Signs `payload` with the private key.
    pub fn sign(&self, payload: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.private_key.sign(payload)
    }
}

/// Generates a fresh identity from the thread-local CSPRNG.
pub fn generate_new_keys() -> Keys {
    let seed: [u8; PRIVATE_KEY_SIZE] = rand::rng().random();
    Keys::from_private(PrivateKey(SigningKey::from_bytes(&seed)))
}
