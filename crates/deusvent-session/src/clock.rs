//! Client/server clock offset.
//!
//! Each ping round trip gives one measurement:
//!
//! ```text
//! one_way = (received_at - sent_at) / 2
//! offset  = server_time - (sent_at + one_way)
//! now()   = local_now + offset
//! ```
//!
//! The arithmetic is signed and unclamped: if the local clock jumps
//! backwards between `sent_at` and `received_at`, the estimate simply
//! comes out skewed until the next measurement.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use deusvent_protocol::{ServerTimestamp, Timestamp};

/// Holds the current clock offset and produces server-aligned time.
///
/// Lock-free: `adjust` and `now` can be called from any task through a
/// shared reference.
#[derive(Debug, Default)]
pub struct SyncedTimestamp {
    offset_ms: AtomicI64,
    synced: AtomicBool,
    smoothing: Option<f64>,
}

impl SyncedTimestamp {
    /// Creates an unsynchronized clock (offset 0).
    ///
    /// With `smoothing = Some(alpha)` each new measurement moves the offset
    /// by `alpha * (estimate - offset)` instead of replacing it.
    pub fn new(smoothing: Option<f64>) -> Self {
        Self {
            offset_ms: AtomicI64::new(0),
            synced: AtomicBool::new(false),
            smoothing: smoothing.map(|alpha| alpha.clamp(f64::MIN_POSITIVE, 1.0)),
        }
    }

    /// Folds in one round-trip measurement and returns the new offset.
    pub fn adjust(&self, server_time: ServerTimestamp, sent_at: Timestamp, received_at: Timestamp) -> i64 {
        let sent = i128::from(sent_at.as_millis());
        let received = i128::from(received_at.as_millis());
        let one_way = (received - sent) / 2;
        let estimate = saturate(i128::from(server_time.as_millis()) - (sent + one_way));

        let first = !self.synced.swap(true, Ordering::AcqRel);
        let offset = match self.smoothing {
            Some(alpha) if !first => {
                let update = |prev: i64| {
                    let delta = (i128::from(estimate) - i128::from(prev)) as f64;
                    Some(saturate(i128::from(prev) + (alpha * delta).round() as i128))
                };
                let prev = self
                    .offset_ms
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, update)
                    .unwrap_or_default();
                update(prev).unwrap_or(estimate)
            }
            _ => {
                self.offset_ms.store(estimate, Ordering::Release);
                estimate
            }
        };
        tracing::debug!(offset_ms = offset, rtt_ms = saturate(received - sent), "clock adjusted");
        offset
    }

    /// Server-aligned current time.
    pub fn now(&self) -> Timestamp {
        self.now_at(Timestamp::now())
    }

    /// Server-aligned time for a given local instant.
    pub fn now_at(&self, local: Timestamp) -> Timestamp {
        local.offset_by(self.offset_ms())
    }

    /// Current offset in milliseconds (server minus local).
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Acquire)
    }

    /// Whether at least one measurement has been applied.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

fn saturate(value: i128) -> i64 {
    value.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn test_adjust_symmetric_delay_converges_to_server_time() {
        let clock = SyncedTimestamp::new(None);
        let t0 = 1_000_000;
        let d = 40;
        let s0 = 5_000_000;

        clock.adjust(ServerTimestamp::from_millis(s0), ts(t0), ts(t0 + 2 * d));

        // Immediately after receipt the corrected time is s0 + d.
        assert_eq!(clock.now_at(ts(t0 + 2 * d)).as_millis(), s0 + d);
        assert!(clock.is_synced());
    }

    #[test]
    fn test_adjust_overwrites_previous_offset() {
        let clock = SyncedTimestamp::new(None);
        clock.adjust(ServerTimestamp::from_millis(2_000), ts(1_000), ts(1_000));
        assert_eq!(clock.offset_ms(), 1_000);
        clock.adjust(ServerTimestamp::from_millis(500), ts(1_000), ts(1_000));
        assert_eq!(clock.offset_ms(), -500);
    }

    #[test]
    fn test_adjust_backwards_clock_is_computed_arithmetically() {
        let clock = SyncedTimestamp::new(None);
        // received_at < sent_at: one_way = -50
        let offset = clock.adjust(ServerTimestamp::from_millis(10_000), ts(1_100), ts(1_000));
        assert_eq!(offset, 10_000 - (1_100 - 50));
    }

    #[test]
    fn test_adjust_with_smoothing_moves_partially() {
        let clock = SyncedTimestamp::new(Some(0.5));
        clock.adjust(ServerTimestamp::from_millis(1_000), ts(0), ts(0));
        assert_eq!(clock.offset_ms(), 1_000, "first sample is taken as is");
        clock.adjust(ServerTimestamp::from_millis(2_000), ts(0), ts(0));
        assert_eq!(clock.offset_ms(), 1_500);
    }

    #[test]
    fn test_adjust_extreme_server_time_saturates() {
        let clock = SyncedTimestamp::new(None);
        let offset = clock.adjust(
            ServerTimestamp::from_millis(1 << 63),
            ts(1_700_000_000_000),
            ts(1_700_000_000_040),
        );
        assert_eq!(offset, i64::MAX - 1_700_000_000_019);

        let clock = SyncedTimestamp::new(None);
        assert_eq!(
            clock.adjust(ServerTimestamp::from_millis(u64::MAX), ts(0), ts(0)),
            i64::MAX
        );
    }

    #[test]
    fn test_adjust_smoothing_with_extreme_samples_does_not_overflow() {
        let clock = SyncedTimestamp::new(Some(0.5));
        clock.adjust(ServerTimestamp::from_millis(0), ts(u64::MAX), ts(u64::MAX));
        assert_eq!(clock.offset_ms(), i64::MIN);
        let offset = clock.adjust(ServerTimestamp::from_millis(u64::MAX), ts(0), ts(0));
        assert!(offset > i64::MIN);
    }

    #[test]
    fn test_unsynced_clock_has_zero_offset() {
        let clock = SyncedTimestamp::new(None);
        assert!(!clock.is_synced());
        assert_eq!(clock.now_at(ts(123)), ts(123));
    }
}
