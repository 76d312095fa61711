//! Backoff policy for worker calls
//!
//! Exponential backoff with optional jitter. Only timeout-class and
//! transient-network-class failures are worth retrying; the status-code
//! check encodes which HTTP answers count as transient.

use std::time::Duration;

use choros_core::config::RpcConfig;

/// Delay schedule between call attempts
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

/// HTTP status codes treated as transient
const TRANSIENT_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

impl BackoffPolicy {
    /// Build the policy from the RPC configuration
    pub fn from_config(config: &RpcConfig) -> Self {
        Self {
            base_delay: config.backoff_base,
            max_delay: config.backoff_max,
            multiplier: config.backoff_multiplier.max(1.0),
            jitter: config.backoff_jitter,
        }
    }

    /// Fixed schedule without jitter (deterministic, used by tests)
    pub fn fixed(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            max_delay: Duration::from_secs(30),
            multiplier: multiplier.max(1.0),
            jitter: false,
        }
    }

    /// Delay before the retry following attempt `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let clamped = exp.min(self.max_delay.as_millis() as f64);

        let total = if self.jitter {
            // Up to 25% on top, never below the exponential floor
            clamped + clamped * 0.25 * pseudo_jitter()
        } else {
            clamped
        };

        Duration::from_millis(total as u64)
    }

    /// Whether an HTTP status is worth a retry
    pub fn is_transient_status(&self, status: u16) -> bool {
        TRANSIENT_STATUS.contains(&status)
    }
}

/// Pseudo-random fraction in [0.0, 1.0) without pulling in a RNG crate;
/// a counter mixed with the clock is plenty for jitter.
fn pseudo_jitter() -> f64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    const A: u64 = 6364136223846793005;
    const C: u64 = 1442695040888963407;

    let tick = COUNTER.fetch_add(1, Ordering::Relaxed);
    let clock = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);

    let mixed = A.wrapping_mul(tick.wrapping_add(clock)).wrapping_add(C);
    (mixed >> 11) as f64 / (1u64 << 53) as f64
}
