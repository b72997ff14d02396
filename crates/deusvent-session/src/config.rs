//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// How long to wait before reconnecting after a dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReconnectPolicy {
    /// Same delay before every attempt.
    Fixed { delay: Duration },

    /// `initial * multiplier^attempt`, capped at `max`. The attempt counter
    /// resets once a connection opens.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed { delay } => delay,
            ReconnectPolicy::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let factor = multiplier.max(1.0).powi(attempt.min(64) as i32);
                let scaled = initial.as_nanos() as f64 * factor;
                if scaled.is_finite() && scaled < max.as_nanos() as f64 {
                    Duration::from_nanos(scaled as u64)
                } else {
                    max
                }
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed {
            delay: Duration::from_millis(300),
        }
    }
}

/// Configuration for a client session.
///
/// Start from `SessionConfig::default()` and override the fields you care
/// about. With `#[serde(default)]`, a JSON document only needs the fields
/// that differ from the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay policy between reconnect attempts.
    pub reconnect: ReconnectPolicy,

    /// How long a request may wait for its response. `None` waits forever.
    pub request_timeout: Option<Duration>,

    /// How often pending requests are checked against their deadlines.
    pub sweep_interval: Duration,

    /// Re-send requests whose frame went out on a connection that dropped
    /// before the response came back.
    pub resend_unanswered: bool,

    /// Interval between background clock re-syncs. `None` disables them.
    pub clock_sync_interval: Option<Duration>,

    /// Exponential smoothing factor in `(0, 1]` for the clock offset.
    /// `None` replaces the offset with every new measurement.
    pub clock_smoothing: Option<f64>,

    /// Bound on frames waiting in the outbound queue.
    pub max_queued_messages: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            request_timeout: Some(Duration::from_secs(30)),
            sweep_interval: Duration::from_secs(1),
            resend_unanswered: true,
            clock_sync_interval: Some(Duration::from_secs(60)),
            clock_smoothing: None,
            max_queued_messages: 1024,
        }
    }
}

impl SessionConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value can drive a session.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(invalid("sweep_interval", "must be non-zero"));
        }
        if self.clock_sync_interval.is_some_and(|d| d.is_zero()) {
            return Err(invalid("clock_sync_interval", "must be non-zero"));
        }
        if self.max_queued_messages == 0 {
            return Err(invalid("max_queued_messages", "must be at least 1"));
        }
        if let Some(alpha) = self.clock_smoothing {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(invalid("clock_smoothing", "must be in (0, 1]"));
            }
        }
        if let ReconnectPolicy::Exponential { multiplier, .. } = self.reconnect {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(invalid("reconnect.multiplier", "must be finite and at least 1"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { field, reason }
}
