//! Identity and crypto layer for the Deusvent client.
//!
//! - [`Keys`] — an Ed25519 key pair: signs authenticated messages, and its
//!   public half identifies the player.
//! - [`EncryptedString`] / [`SafeString`] — per-field string encryption
//!   keyed from the private key.
//!
//! Everything here is synchronous and side-effect free apart from reading
//! the system CSPRNG.

mod error;
mod field;
mod keys;

pub use error::EncryptionError;
pub use field::{EncryptedString, SALT_SIZE, SafeString};
pub use keys::{
    Keys, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE, PrivateKey, PublicKey, SIGNATURE_SIZE,
    generate_new_keys,
};
