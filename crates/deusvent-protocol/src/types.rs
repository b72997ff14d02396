//! Identifier types shared by every layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation token linking a request frame to its response.
///
/// This is a "newtype wrapper" around `u8`: the server echoes the byte
/// back, and the client uses it to find the waiting caller. Values
/// `1..=255` identify a request; `0` ([`RequestId::NONE`]) means "not
/// correlated" and marks server pushes and frames whose id could not be
/// read.
///
/// `#[serde(transparent)]` serializes `RequestId(7)` as plain `7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u8);

impl RequestId {
    /// The reserved "no correlation" id.
    pub const NONE: RequestId = RequestId(0);

    /// Returns `true` for the reserved id 0.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The raw id byte as written in the frame header.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u8> for RequestId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}
