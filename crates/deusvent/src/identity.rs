//! Persistent player identity.

use deusvent_crypto::{Keys, PrivateKey, generate_new_keys};

use crate::storage::KeyValueStore;
use crate::{DeusventError, StorageError};

/// Store key holding the hex-encoded private key.
pub const IDENTITY_KEY: &str = "identity.private_key";

/// Loads the identity key pair from `store`, creating and saving a new one
/// on first run.
///
/// # Errors
/// [`StorageError::Corrupt`] if the stored value is not a hex-encoded
/// private key, or whatever the store itself reports.
pub async fn load_or_generate_keys<S: KeyValueStore>(store: &S) -> Result<Keys, DeusventError> {
    if let Some(encoded) = store.get(IDENTITY_KEY).await? {
        let bytes = hex::decode(encoded.trim()).map_err(|e| corrupt(e.to_string()))?;
        let private_key = PrivateKey::deserialize(&bytes).map_err(|e| corrupt(e.to_string()))?;
        let keys = Keys::from_private(private_key);
        tracing::debug!(public_key = %keys.public_key, "loaded identity");
        return Ok(keys);
    }

    let keys = generate_new_keys();
    store
        .set(IDENTITY_KEY, &hex::encode(keys.private_key.serialize()))
        .await?;
    tracing::info!(public_key = %keys.public_key, "generated new identity");
    Ok(keys)
}

fn corrupt(reason: String) -> StorageError {
    StorageError::Corrupt {
        key: IDENTITY_KEY.to_string(),
        reason,
    }
}
