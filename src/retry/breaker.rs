//! Per-provider circuit breakers.
//!
//! Only transient failures count toward opening a breaker. An open breaker
//! rejects calls until its cooldown elapses, then lets a single trial call
//! through (half-open); the trial's outcome closes or re-opens it. A trial
//! that never reports back is released, either explicitly or once another
//! cooldown has passed.
//!
//! Breakers are keyed by capability and provider name, so a text provider and
//! an image provider that share a name never share a breaker.

use crate::provider::Capability;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// When the outstanding half-open trial was admitted
    trial_started: Option<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_started: None,
        }
    }
}

type BreakerKey = (Capability, String);

/// Process-wide breaker table keyed by capability and provider name
#[derive(Debug)]
pub struct BreakerRegistry {
    failure_threshold: u32,
    cooldown: Duration,
    breakers: Mutex<HashMap<BreakerKey, Breaker>>,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a call to `provider` may proceed now
    pub fn allow(&self, capability: Capability, provider: &str) -> bool {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry((capability, provider.to_string()))
            .or_insert_with(Breaker::new);
        match breaker.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = breaker
                    .opened_at
                    .map(|at| at.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if cooled {
                    breaker.state = BreakerState::HalfOpen;
                    breaker.trial_started = Some(Instant::now());
                    info!(%capability, provider, "Circuit breaker half-open, admitting a trial call");
                }
                cooled
            }
            BreakerState::HalfOpen => {
                let stale = breaker
                    .trial_started
                    .map(|at| at.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if stale {
                    breaker.trial_started = Some(Instant::now());
                }
                stale
            }
        }
    }

    /// The provider answered; close the breaker
    pub fn record_success(&self, capability: Capability, provider: &str) {
        let mut breakers = self.breakers.lock();
        if let Some(breaker) = breakers.get_mut(&(capability, provider.to_string())) {
            if breaker.state != BreakerState::Closed {
                info!(%capability, provider, "Circuit breaker closed");
            }
            *breaker = Breaker::new();
        }
    }

    /// Record a transient failure, returning the resulting state
    pub fn record_failure(&self, capability: Capability, provider: &str) -> BreakerState {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry((capability, provider.to_string()))
            .or_insert_with(Breaker::new);
        breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
        breaker.trial_started = None;

        let trip = match breaker.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => breaker.consecutive_failures >= self.failure_threshold,
            BreakerState::Open => false,
        };
        if trip {
            breaker.state = BreakerState::Open;
            breaker.opened_at = Some(Instant::now());
            warn!(
                %capability,
                provider,
                consecutive_failures = breaker.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "Circuit breaker opened"
            );
        }
        breaker.state
    }

    /// A half-open trial ended without an outcome; let the next caller try
    pub fn release(&self, capability: Capability, provider: &str) {
        let mut breakers = self.breakers.lock();
        if let Some(breaker) = breakers.get_mut(&(capability, provider.to_string())) {
            if breaker.state == BreakerState::HalfOpen && breaker.trial_started.is_some() {
                breaker.trial_started = None;
                info!(%capability, provider, "Half-open trial abandoned, slot released");
            }
        }
    }

    pub fn state(&self, capability: Capability, provider: &str) -> BreakerState {
        self.breakers
            .lock()
            .get(&(capability, provider.to_string()))
            .map(|b| b.state)
            .unwrap_or(BreakerState::Closed)
    }
}
