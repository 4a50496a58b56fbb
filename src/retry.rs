//! Retry/Fallback Executor
//!
//! Every call to an external generative capability goes through
//! [`FallbackExecutor::execute`]: providers are tried in order, transient failures
//! are retried with jittered exponential backoff, permanent failures return at
//! once, and a per-provider circuit breaker skips providers that keep failing.

pub mod backoff;
pub mod breaker;

pub use backoff::Backoff;
pub use breaker::{BreakerRegistry, BreakerState};

use crate::error::{AttemptFailure, ExecutorError, ProviderError};
use crate::provider::{Capability, Provider};
use crate::scheduler::rate_limit::TokenBucket;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry, backoff and breaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Per-attempt timeout; `None` relies on the provider's own timeout
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: Option<u64>,
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_cooldown_ms")]
    pub breaker_cooldown_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_attempt_timeout_ms() -> Option<u64> {
    Some(60_000)
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_cooldown_ms: default_breaker_cooldown_ms(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.base_delay_ms),
            factor: self.backoff_factor,
            cap: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn breaker_registry(&self) -> BreakerRegistry {
        BreakerRegistry::new(
            self.breaker_failure_threshold,
            Duration::from_millis(self.breaker_cooldown_ms),
        )
    }
}

/// A successful call and how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct Executed<T> {
    pub value: T,
    pub provider: String,
    /// Attempts made across every provider, including the successful one
    pub attempts: u32,
    /// A provider other than the first in the chain answered
    pub fallback_used: bool,
}

pub struct FallbackExecutor {
    max_attempts: u32,
    backoff: Backoff,
    attempt_timeout: Option<Duration>,
    breakers: Arc<BreakerRegistry>,
    limiter: Option<Arc<TokenBucket>>,
}

impl FallbackExecutor {
    pub fn new(
        config: &RetryConfig,
        breakers: Arc<BreakerRegistry>,
        limiter: Option<Arc<TokenBucket>>,
    ) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff(),
            attempt_timeout: config.attempt_timeout_ms.map(Duration::from_millis),
            breakers,
            limiter,
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn execute<P, T, F, Fut>(
        &self,
        operation: &str,
        capability: Capability,
        providers: &[Arc<P>],
        mut call: F,
    ) -> Result<Executed<T>, ExecutorError>
    where
        P: Provider + ?Sized,
        F: FnMut(Arc<P>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if providers.is_empty() {
            return Err(ExecutorError::NoProviders(operation.to_string()));
        }

        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut total_attempts = 0u32;

        for (position, provider) in providers.iter().enumerate() {
            let name = provider.name().to_string();
            if !self.breakers.allow(capability, &name) {
                warn!(operation, provider = %name, "Skipping provider, circuit open");
                failures.push(AttemptFailure {
                    provider: name,
                    attempt: 0,
                    error: "circuit breaker open".to_string(),
                });
                continue;
            }
            let _trial = TrialGuard::new(&self.breakers, capability, name.clone());

            for attempt in 1..=self.max_attempts {
                if let Some(limiter) = &self.limiter {
                    limiter.acquire().await;
                }
                total_attempts += 1;
                debug!(operation, provider = %name, attempt, "Calling provider");

                let result = match self.attempt_timeout {
                    Some(limit) => match tokio::time::timeout(limit, call(Arc::clone(provider))).await {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Timeout(format!(
                            "no response within {}ms",
                            limit.as_millis()
                        ))),
                    },
                    None => call(Arc::clone(provider)).await,
                };

                match result {
                    Ok(value) => {
                        self.breakers.record_success(capability, &name);
                        return Ok(Executed {
                            value,
                            provider: name,
                            attempts: total_attempts,
                            fallback_used: position > 0,
                        });
                    }
                    Err(err) if !err.is_transient() => {
                        // The provider answered, so it counts as available
                        self.breakers.record_success(capability, &name);
                        warn!(operation, provider = %name, error = %err, "Permanent provider failure");
                        return Err(ExecutorError::Permanent {
                            operation: operation.to_string(),
                            provider: name,
                            source: err,
                        });
                    }
                    Err(err) => {
                        warn!(
                            operation,
                            provider = %name,
                            attempt,
                            max_attempts = self.max_attempts,
                            error = %err,
                            "Transient provider failure"
                        );
                        failures.push(AttemptFailure {
                            provider: name.clone(),
                            attempt,
                            error: err.to_string(),
                        });
                        if self.breakers.record_failure(capability, &name) == BreakerState::Open {
                            break;
                        }
                        if attempt < self.max_attempts {
                            tokio::time::sleep(self.backoff.delay(attempt)).await;
                        }
                    }
                }
            }
        }

        Err(ExecutorError::AllProvidersExhausted {
            operation: operation.to_string(),
            failures,
        })
    }
}

/// Releases a half-open breaker's trial slot if the call is dropped before it reports
struct TrialGuard<'a> {
    breakers: &'a BreakerRegistry,
    capability: Capability,
    provider: String,
    armed: bool,
}

impl<'a> TrialGuard<'a> {
    fn new(breakers: &'a BreakerRegistry, capability: Capability, provider: String) -> Self {
        let armed = breakers.state(capability, &provider) == BreakerState::HalfOpen;
        Self {
            breakers,
            capability,
            provider,
            armed,
        }
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breakers.release(self.capability, &self.provider);
        }
    }
}
