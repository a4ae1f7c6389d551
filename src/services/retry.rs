//! Bounded retry with exponential backoff and jitter, shared by both
//! provider fetches.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::errors::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Up to this fraction of the delay is added at random.
    pub jitter: f64,
    /// Each attempt is abandoned after this long.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.25,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Backoff plus random jitter, still capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter == 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..=jitter);
        base.mul_f64(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds or the attempt ceiling is reached.
    ///
    /// Every `ProviderError` kind is retried; an attempt exceeding
    /// `attempt_timeout` counts as `ProviderError::Timeout`.
    pub async fn run<T, F, Fut>(&self, provider: &'static str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout { provider }),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("Retry: {} succeeded on attempt {}", provider, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(
                        "Retry: {} attempt {}/{} failed: {}",
                        provider,
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.delay(attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(ProviderError::Unavailable {
            provider,
            message: "no attempt was made".to_string(),
        }))
    }
}
