//! Call pacing for the external invocation capability.
//!
//! A [`RateLimiter`] guarantees a minimum interval between the starts of
//! two consecutive gated calls. Share one instance (`Arc`) across every
//! pipeline that talks to the same provider so the aggregate rate stays
//! under the provider's ceiling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Default minimum interval: at most 4 calls per second.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(250);

/// Enforces a minimum delay between successive external calls.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_start: Mutex<Option<Instant>>,
    turns: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl RateLimiter {
    /// Creates a limiter with the given minimum interval.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_start: Mutex::new(None),
            turns: AtomicU64::new(0),
        }
    }

    /// Creates a limiter from a calls-per-second ceiling.
    ///
    /// Non-positive or non-finite rates disable pacing.
    #[must_use]
    pub fn from_calls_per_second(rate: f64) -> Self {
        if rate.is_finite() && rate > 0.0 {
            Self::new(Duration::from_secs_f64(1.0 / rate))
        } else {
            Self::disabled()
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns the configured interval.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Returns how many turns have been granted.
    #[must_use]
    pub fn turns(&self) -> u64 {
        self.turns.load(Ordering::SeqCst)
    }

    /// Waits until the caller may start its call.
    ///
    /// Returns immediately for the first call. Concurrent callers queue on
    /// the internal lock and are released one interval apart.
    pub async fn await_turn(&self) {
        self.turns.fetch_add(1, Ordering::SeqCst);
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_start.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                trace!(
                    wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                    "Pacing external call"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
