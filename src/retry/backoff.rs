//! Exponential backoff with equal jitter.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2.0,
            cap: Duration::from_secs(8),
        }
    }
}

impl Backoff {
    /// Upper bound for the delay after failed attempt `attempt` (1-based):
    /// `min(cap, base * factor^(attempt - 1))`
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let scaled = self.base.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        if !scaled.is_finite() || scaled >= self.cap.as_secs_f64() {
            self.cap
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Half the ceiling plus a uniform share of the other half
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let half = ceiling / 2;
        let spread = (ceiling - half).as_millis() as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        half + Duration::from_millis(jitter)
    }
}
