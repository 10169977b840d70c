use std::time::Duration;

use rand::Rng;

use crate::error::JobError;
use crate::types::Job;

/// Policy deciding whether and when a failed job is retried.
///
/// Consulted by the worker after every failed attempt; it never runs
/// infrastructure retries, only job retries.
pub trait RetryStrategy: Send + Sync {
    /// Whether this failure should be retried. Both the job's
    /// `max_retries` and the strategy's own ceiling are enforced; the
    /// stricter one wins.
    fn should_retry(&self, job: &Job, error: &JobError) -> bool;

    /// Delay before the next attempt, given the job's current
    /// `retry_count`. Must never be zero or negative.
    fn next_delay(&self, job: &Job) -> Duration;
}

/// Exponential backoff with a cap and optional bounded random jitter.
///
/// The delay grows as `base * multiplier^retry_count`, clamped to
/// `max_delay`. With jitter enabled the delay is perturbed by a uniform
/// factor in `[1 - JITTER_SPREAD, 1 + JITTER_SPREAD]` so simultaneously
/// failing jobs do not retry in lockstep, and clamped to a strictly
/// positive minimum. Deterministic given `retry_count` when jitter is off.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay before the first retry
    pub base: Duration,
    /// Growth factor applied once per already-completed retry
    pub multiplier: f64,
    /// Upper bound on any computed delay
    pub max_delay: Duration,
    /// The strategy's own retry ceiling, independent of the job's
    pub max_retries: u32,
    /// Whether to perturb delays with bounded random jitter
    pub jitter: bool,
}

/// Half-width of the jitter band around the computed delay.
const JITTER_SPREAD: f64 = 0.25;

/// Floor applied to jittered delays.
const MIN_DELAY: Duration = Duration::from_millis(1);

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(3600),
            max_retries: 10,
            jitter: true,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay before the first retry
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Set the growth factor
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the upper bound on computed delays
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the strategy's own retry ceiling
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Disable jitter (deterministic delays, mainly for tests)
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn should_retry(&self, job: &Job, error: &JobError) -> bool {
        if !error.is_retryable() {
            return false;
        }
        job.retry_count < job.max_retries.min(self.max_retries)
    }

    fn next_delay(&self, job: &Job) -> Duration {
        let exponent = job.retry_count.min(i32::MAX as u32) as i32;
        let raw = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter {
            let factor = rand::thread_rng().gen_range(1.0 - JITTER_SPREAD..=1.0 + JITTER_SPREAD);
            capped * factor
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.max(0.0)).max(MIN_DELAY)
    }
}
