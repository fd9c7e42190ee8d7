use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::cancel::CancelToken;
use crate::config::{BackoffConfig, DelayRange};
use crate::transport::{FetchOutcome, RequestSpec, Transport, TransportError};

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Jittered exponential backoff: `base * factor^(attempt - 1)`, capped.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: DelayRange,
    factor: f64,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: DelayRange, factor: f64, cap: Duration) -> Self {
        Self { base, factor, cap }
    }

    pub fn none() -> Self {
        Self::new(DelayRange::ZERO, 1.0, Duration::ZERO)
    }

    /// Delay to wait after the failed `attempt` (1-indexed).
    pub fn delay<R: Rng + ?Sized>(&self, attempt: usize, rng: &mut R) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_ms = self.base.sample(rng).as_millis() as f64;
        if base_ms == 0.0 {
            return Duration::ZERO;
        }
        let scaled_ms = base_ms * self.factor.max(1.0).powi(exponent);
        let cap_ms = self.cap.as_millis() as f64;
        Duration::from_millis(scaled_ms.min(cap_ms).round() as u64)
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(c: &BackoffConfig) -> Self {
        Self::new(c.base, c.factor, Duration::from_millis(c.cap_ms))
    }
}

#[derive(Debug, Default)]
pub struct RetryState {
    pub attempt: usize,
    pub last_outcome: Option<FetchOutcome>,
}

/// Terminal result of one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried {
    pub outcome: FetchOutcome,
    pub attempts: usize,
    pub soft_blocks: usize,
}

impl Retried {
    /// True when every attempt was refused by anti-bot logic.
    pub fn always_soft_blocked(&self) -> bool {
        self.attempts > 0 && self.soft_blocks == self.attempts
    }
}

pub struct Retrier<'a> {
    transport: &'a dyn Transport,
    sleeper: &'a dyn Sleeper,
    max_attempts: NonZeroUsize,
    backoff: Backoff,
}

impl<'a> Retrier<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        sleeper: &'a dyn Sleeper,
        max_attempts: NonZeroUsize,
        backoff: Backoff,
    ) -> Self {
        Self {
            transport,
            sleeper,
            max_attempts,
            backoff,
        }
    }

    /// Calls `factory` once per attempt, so every try may carry different
    /// headers and proxy. Never turns a failure into a success.
    pub async fn fetch_with_retry<F, R>(
        &self,
        mut factory: F,
        rng: &mut R,
        cancel: &CancelToken,
    ) -> Retried
    where
        F: FnMut(usize, &mut R) -> RequestSpec + Send,
        R: Rng + Send + ?Sized,
    {
        let mut state = RetryState::default();
        let mut soft_blocks = 0;

        let outcome = loop {
            if cancel.is_cancelled() {
                if let Some(last) = &state.last_outcome {
                    log::debug!("Cancelled after {} attempts, last: {last}", state.attempt);
                }
                break FetchOutcome::HardError {
                    cause: TransportError::Cancelled,
                };
            }

            state.attempt += 1;
            let spec = factory(state.attempt, rng);
            log::debug!(
                "Fetching {} (attempt {}/{})",
                spec.url,
                state.attempt,
                self.max_attempts
            );

            let outcome = self.transport.fetch(&spec).await;
            if outcome.is_soft_blocked() {
                soft_blocks += 1;
            }
            if outcome.is_success() {
                break outcome;
            }

            log::warn!(
                "Attempt {}/{} for {} failed: {outcome}",
                state.attempt,
                self.max_attempts,
                spec.url
            );
            if state.attempt >= self.max_attempts.get() {
                break outcome;
            }

            state.last_outcome = Some(outcome);
            let delay = self.backoff.delay(state.attempt, rng);
            self.sleeper.sleep(delay).await;
        };

        Retried {
            outcome,
            attempts: state.attempt,
            soft_blocks,
        }
    }
}
