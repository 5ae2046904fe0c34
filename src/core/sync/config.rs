/*!
 * Synchronizer Configuration
 *
 * Runtime tuning for the acquire/release engine
 */

use std::time::Duration;

/// Environment variable overriding the spin threshold, in nanoseconds
pub const SPIN_THRESHOLD_ENV: &str = "CLH_SYNC_SPIN_THRESHOLD_NS";

/// Default spin threshold (1µs)
const DEFAULT_SPIN_THRESHOLD: Duration = Duration::from_nanos(1_000);

/// Synchronizer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Timed waits with less time than this left spin-retry instead of parking
    pub spin_threshold: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncConfig {
    pub const fn new() -> Self {
        Self {
            spin_threshold: DEFAULT_SPIN_THRESHOLD,
        }
    }

    /// Configuration optimized for short timed waits (< 1ms expected)
    ///
    /// Spins through the last 50µs of a deadline rather than paying for a
    /// park/unpark round trip.
    pub const fn low_latency() -> Self {
        Self {
            spin_threshold: Duration::from_micros(50),
        }
    }

    /// Configuration optimized for long waits, almost never spins before parking
    pub const fn long_wait() -> Self {
        Self {
            spin_threshold: Duration::from_nanos(100),
        }
    }

    pub const fn with_spin_threshold(mut self, threshold: Duration) -> Self {
        self.spin_threshold = threshold;
        self
    }

    /// Build from `CLH_SYNC_SPIN_THRESHOLD_NS`, falling back to defaults
    pub fn from_env() -> Self {
        match std::env::var(SPIN_THRESHOLD_ENV) {
            Ok(raw) => Self::parse_threshold(&raw),
            Err(_) => Self::default(),
        }
    }

    fn parse_threshold(raw: &str) -> Self {
        match raw.trim().parse::<u64>() {
            Ok(nanos) => Self::new().with_spin_threshold(Duration::from_nanos(nanos)),
            Err(e) => {
                tracing::warn!(value = raw, error = %e, "Ignoring invalid {}", SPIN_THRESHOLD_ENV);
                Self::default()
            }
        }
    }

    /// Whether a timed wait with `remaining` time left should park
    #[inline]
    pub(crate) fn should_park_for(&self, remaining: Duration) -> bool {
        remaining > self.spin_threshold
    }
}
