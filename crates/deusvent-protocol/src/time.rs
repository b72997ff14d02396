//! Timestamps and durations with millisecond resolution.
//!
//! Local and server clocks are different types on purpose: a
//! [`ServerTimestamp`] can only be turned into local time through the
//! clock synchronizer, never compared directly with a [`Timestamp`].

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::SerializationError;
use crate::wire::{Decode, Encode, WireReader, WireWriter};

/// A local wall-clock instant, milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Current local time. A clock set before 1970 reads as the epoch.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Absolute distance between two instants.
    pub fn diff(&self, other: &Timestamp) -> Duration {
        Duration(self.0.abs_diff(other.0))
    }

    /// Shifts by a signed number of milliseconds, saturating at the epoch.
    pub fn offset_by(&self, millis: i64) -> Self {
        Self(self.0.saturating_add_signed(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Timestamp {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// An instant as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerTimestamp(u64);

impl ServerTimestamp {
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServerTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServerTimestamp {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// A length of time in milliseconds. Displays as `HH:MM:SS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Duration(u64);

impl Duration {
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn whole_seconds(&self) -> u64 {
        self.0 / 1000
    }

    pub fn whole_minutes(&self) -> u64 {
        self.whole_seconds() / 60
    }

    pub fn whole_hours(&self) -> u64 {
        self.whole_minutes() / 60
    }

    pub fn whole_days(&self) -> u64 {
        self.whole_hours() / 24
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.whole_hours();
        let minutes = self.whole_minutes() % 60;
        let seconds = self.whole_seconds() % 60;
        write!(f, "{hours:02}:{minutes:02}:{seconds:02}")
    }
}

impl From<Duration> for std::time::Duration {
    fn from(value: Duration) -> Self {
        std::time::Duration::from_millis(value.0)
    }
}

// Wire form of all three: u64 milliseconds.

impl Encode for Timestamp {
    fn encode(&self, w: &mut WireWriter) {
        self.0.encode(w);
    }
}

impl Decode for Timestamp {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        Ok(Self(r.read()?))
    }
}

impl Encode for ServerTimestamp {
    fn encode(&self, w: &mut WireWriter) {
        self.0.encode(w);
    }
}

impl Decode for ServerTimestamp {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        Ok(Self(r.read()?))
    }
}

impl Encode for Duration {
    fn encode(&self, w: &mut WireWriter) {
        self.0.encode(w);
    }
}

impl Decode for Duration {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, SerializationError> {
        Ok(Self(r.read()?))
    }
}
