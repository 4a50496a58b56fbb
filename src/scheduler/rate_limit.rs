//! Process-wide token bucket shared by every provider call.
//!
//! Implemented as GCRA: one atomic "theoretical arrival time" in nanoseconds since
//! the bucket was created. Each grant pushes it forward by one emission interval;
//! a request is admitted while the TAT stays within `burst` intervals of now.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug)]
pub struct TokenBucket {
    emission_interval_ns: u64,
    burst_window_ns: u64,
    tat_ns: AtomicU64,
    origin: Instant,
}

impl TokenBucket {
    /// `rate_per_sec` tokens per second, up to `burst` back to back.
    /// A non-positive rate disables limiting.
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let emission_interval_ns = if rate_per_sec > 0.0 && rate_per_sec.is_finite() {
            (1_000_000_000f64 / rate_per_sec).max(1.0) as u64
        } else {
            0
        };
        Self {
            emission_interval_ns,
            burst_window_ns: emission_interval_ns.saturating_mul(u64::from(burst.max(1))),
            tat_ns: AtomicU64::new(0),
            origin: Instant::now(),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0.0, 1)
    }

    pub fn is_unlimited(&self) -> bool {
        self.emission_interval_ns == 0
    }

    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    /// Take a token if one is available, otherwise report how long to wait
    pub fn try_acquire(&self) -> Result<(), Duration> {
        if self.is_unlimited() {
            return Ok(());
        }
        let mut tat = self.tat_ns.load(Ordering::Acquire);
        loop {
            let now = self.now_ns();
            let new_tat = tat.max(now) + self.emission_interval_ns;
            let ahead = new_tat - now;
            if ahead > self.burst_window_ns {
                return Err(Duration::from_nanos(ahead - self.burst_window_ns));
            }
            match self
                .tat_ns
                .compare_exchange_weak(tat, new_tat, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(current) => tat = current,
            }
        }
    }

    /// Wait until a token is granted
    pub async fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            sleep(wait).await;
        }
    }
}
