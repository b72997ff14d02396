//! Wire protocol for Deusvent.
//!
//! This crate defines the "language" the client and server speak:
//!
//! - **Wire primitives** ([`WireWriter`], [`WireReader`], [`Encode`],
//!   [`Decode`]) — big-endian field encoding.
//! - **Messages** ([`ClientMessage`], [`ServerMessage`] and their payload
//!   structs) — closed sets with a static tag → decoder table each.
//! - **Envelope** ([`serialize`], [`deserialize`], [`parse_request_id`]) —
//!   the frame header, with signatures for authenticated messages.
//! - **Time** ([`Timestamp`], [`ServerTimestamp`], [`Duration`]).
//! - **Errors** ([`SerializationError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and session
//! (request bookkeeping). It doesn't know about connections or pending
//! requests; it only turns messages into frames and back.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope<ServerMessage>) → Session (dispatch)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod envelope;
mod error;
mod messages;
mod time;
mod types;
mod wire;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use envelope::{Envelope, HEADER_LEN, deserialize, parse_request_id, peek_tag, serialize};
pub use error::SerializationError;
pub use messages::{
    ClientMessage, Decay, DecayQuery, ErrorCode, Identity, Message, MessageSet, Ping, Request,
    Response, ServerError, ServerMessage, ServerStatus, Status, TagEntry,
};
pub use time::{Duration, ServerTimestamp, Timestamp};
pub use types::RequestId;
pub use wire::{Decode, Encode, WireReader, WireWriter};

// The crypto types appear in payloads and signatures.
pub use deusvent_crypto as crypto;
