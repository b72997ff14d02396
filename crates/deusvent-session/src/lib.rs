//! Client session core for Deusvent.
//!
//! This crate holds the bookkeeping that sits between the wire protocol
//! and the running client:
//!
//! 1. **Correlation** — which caller waits for which request id
//!    ([`RequestRegistry`])
//! 2. **Durability** — frames wait in order until a connection takes them
//!    ([`OutboundQueue`])
//! 3. **Lifecycle** — connect, backoff, reconnect, close
//!    ([`SessionMachine`], a pure state machine emitting [`Effect`]s)
//! 4. **Time** — server-aligned clock ([`SyncedTimestamp`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Client (above)  ← runs the driver task that executes effects
//!     ↕
//! Session Layer (this crate)  ← registry, queue, state machine, clock
//!     ↕
//! Protocol / Transport (below)  ← frames, request ids, connections
//! ```
//!
//! Nothing here spawns tasks or owns a runtime; the types are plain data
//! that the client keeps behind its own locks.

mod clock;
mod config;
mod error;
mod machine;
mod queue;
mod registry;

pub use clock::SyncedTimestamp;
pub use config::{ReconnectPolicy, SessionConfig};
pub use error::{ConfigError, RequestError, SessionError};
pub use machine::{ConnectionState, DISCONNECT_REASON, Effect, SessionEvent, SessionMachine};
pub use queue::{OutboundMessage, OutboundQueue};
pub use registry::{Continuation, Reply, RequestRegistry, RequestResult};
