//! # Deusvent
//!
//! Client session core for the Deusvent game backend.
//!
//! A [`Client`] keeps one connection to the server alive, reconnecting after
//! drops, and turns the binary protocol into typed request/response calls:
//!
//! - every correlated request gets an 8-bit id and a continuation
//! - frames are queued in order and written once a connection is open
//! - uncorrelated server messages go to [`Client::subscribe`] receivers
//! - server time is tracked with [`Client::sync_clock`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deusvent::prelude::*;
//!
//! # async fn run() -> Result<(), DeusventError> {
//! let keys = load_or_generate_keys(&MemoryStore::new()).await?;
//! let client = Client::builder()
//!     .keys(keys)
//!     .connect(WebSocketConnector::new("ws://127.0.0.1:8080"))?;
//!
//! let status = client.request(Ping).await?;
//! println!("server says {:?} at {}", status.status, status.timestamp);
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod driver;
mod error;
pub mod identity;
pub mod storage;

pub use client::{BROADCAST_CAPACITY, Client, ClientBuilder};
pub use error::{DeusventError, StorageError};
pub use identity::load_or_generate_keys;
pub use storage::{KeyValueStore, MemoryStore};

pub use deusvent_crypto as crypto;
pub use deusvent_protocol as protocol;
pub use deusvent_session as session;
pub use deusvent_transport as transport;

/// Everything needed to connect and make requests.
pub mod prelude {
    pub use crate::{
        Client, ClientBuilder, DeusventError, KeyValueStore, MemoryStore, StorageError,
        load_or_generate_keys,
    };
    pub use deusvent_crypto::{EncryptionError, Keys, PublicKey, SafeString, generate_new_keys};
    pub use deusvent_protocol::{
        ClientMessage, Decay, DecayQuery, ErrorCode, Identity, Ping, Request, RequestId,
        SerializationError, ServerError, ServerMessage, ServerStatus, ServerTimestamp, Status,
        Timestamp,
    };
    pub use deusvent_session::{
        ConfigError, ConnectionState, ReconnectPolicy, RequestError, SessionConfig, SessionError,
    };
    #[cfg(feature = "websocket")]
    pub use deusvent_transport::WebSocketConnector;
    pub use deusvent_transport::{Connection, Connector, MemoryConnector, TransportError};
}
