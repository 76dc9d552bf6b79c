//! Liveness tracking for the supervised connection.
//!
//! The tracker holds a single timestamp, the last time the peer confirmed it
//! is alive with a `pong` event. The dispatcher writes it and the supervisor's
//! staleness ticker reads it. Both paths run on different tasks, so the
//! timestamp is kept as an atomic offset from a fixed origin instead of behind
//! a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::{ClientError, Result};

/// Records the last confirmed pong and answers "are we stale?".
#[derive(Debug)]
pub struct HeartbeatTracker {
    origin: Instant,
    /// Nanoseconds after `origin` of the last confirmation
    last_confirmed_nanos: AtomicU64,
    pongs: AtomicU64,
}

impl HeartbeatTracker {
    /// Create a tracker whose last confirmation is now.
    pub fn new() -> Self {
        Self { origin: Instant::now(), last_confirmed_nanos: AtomicU64::new(0), pongs: AtomicU64::new(0) }
    }

    /// Mark the peer as alive at the current instant.
    pub fn record_pong(&self) {
        let now = nanos(self.origin.elapsed());
        // fetch_max keeps the timestamp monotonic if two recorders race
        self.last_confirmed_nanos.fetch_max(now, Ordering::AcqRel);
        self.pongs.fetch_add(1, Ordering::Relaxed);
    }

    /// Time elapsed since the last confirmation.
    pub fn since_last_pong(&self) -> Duration {
        let last = Duration::from_nanos(self.last_confirmed_nanos.load(Ordering::Acquire));
        self.origin.elapsed().saturating_sub(last)
    }

    /// [`since_last_pong`](Self::since_last_pong) in fractional seconds
    pub fn seconds_since_last_pong(&self) -> f64 {
        self.since_last_pong().as_secs_f64()
    }

    /// Strictly greater than `threshold` counts as stale.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.since_last_pong() > threshold
    }

    /// Fails with [`ClientError::Stale`] when [`is_stale`](Self::is_stale) holds.
    pub fn ensure_fresh(&self, threshold: Duration) -> Result<()> {
        let elapsed = self.since_last_pong();
        if elapsed > threshold {
            return Err(ClientError::Stale { elapsed, threshold });
        }
        Ok(())
    }

    /// Instant of the last confirmation (creation time if no pong yet)
    pub fn last_pong_at(&self) -> Instant {
        self.origin + Duration::from_nanos(self.last_confirmed_nanos.load(Ordering::Acquire))
    }

    /// Number of pongs recorded so far
    pub fn pong_count(&self) -> u64 {
        self.pongs.load(Ordering::Relaxed)
    }
}

impl Default for HeartbeatTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fresh_tracker_is_not_stale() {
        let heartbeat = HeartbeatTracker::new();
        assert_eq!(heartbeat.since_last_pong(), Duration::ZERO);
        assert!(!heartbeat.is_stale(Duration::from_secs(10)));
        assert_eq!(heartbeat.pong_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn staleness_is_strictly_greater_than_threshold() {
        let heartbeat = HeartbeatTracker::new();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!heartbeat.is_stale(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(heartbeat.is_stale(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_fresh_reports_elapsed_and_threshold() {
        let heartbeat = HeartbeatTracker::new();
        let threshold = Duration::from_secs(10);

        tokio::time::advance(Duration::from_secs(10)).await;
        heartbeat.ensure_fresh(threshold).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        match heartbeat.ensure_fresh(threshold) {
            Err(ClientError::Stale { elapsed, threshold: reported }) => {
                assert_eq!(elapsed, Duration::from_secs(12));
                assert_eq!(reported, threshold);
            }
            other => panic!("expected stale error, got {other:?}"),
        }

        heartbeat.record_pong();
        heartbeat.ensure_fresh(threshold).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pong_resets_elapsed_time() {
        let heartbeat = HeartbeatTracker::new();
        let created = heartbeat.last_pong_at();

        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(heartbeat.seconds_since_last_pong(), 7.0);

        heartbeat.record_pong();
        assert_eq!(heartbeat.since_last_pong(), Duration::ZERO);
        assert_eq!(heartbeat.last_pong_at(), created + Duration::from_secs(7));
        assert_eq!(heartbeat.pong_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pongs_and_checks_do_not_race() {
        let heartbeat = Arc::new(HeartbeatTracker::new());
        let mut handles = Vec::new();

        for _ in 0..4 {
            let writer = Arc::clone(&heartbeat);
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    writer.record_pong();
                    tokio::task::yield_now().await;
                }
            }));
            let reader = Arc::clone(&heartbeat);
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    assert!(!reader.is_stale(Duration::from_secs(60)));
                    tokio::task::yield_now().await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(heartbeat.pong_count(), 4000);
    }

    proptest! {
        #[test]
        fn elapsed_resets_on_pong_and_grows_without_one(
            gaps_ms in proptest::collection::vec(1u64..20_000u64, 1..20)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            runtime.block_on(async {
                let heartbeat = HeartbeatTracker::new();
                for gap in &gaps_ms {
                    let before = heartbeat.since_last_pong();
                    tokio::time::advance(Duration::from_millis(*gap)).await;
                    let after = heartbeat.since_last_pong();
                    assert!(after > before);
                    assert_eq!(after, Duration::from_millis(*gap));

                    heartbeat.record_pong();
                    assert!(heartbeat.seconds_since_last_pong() < 1e-3);
                }
                assert_eq!(heartbeat.pong_count(), gaps_ms.len() as u64);
            });
        }
    }
}
