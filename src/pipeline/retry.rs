use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{BackoffBuilder, Retryable};
use tracing::warn;

use crate::error::ChunkFailure;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Delay before the n-th retry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BackoffPolicy {
    Fixed(Duration),
    /// `step * n`
    Linear(Duration),
    /// `base * factor^(n-1)`, capped at `max`.
    Exponential {
        base: Duration,
        factor: f32,
        max: Duration,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Linear(DEFAULT_BASE_DELAY)
    }
}

impl BackoffPolicy {
    /// Parse `"fixed" | "linear" | "exponential"`.
    pub fn parse(name: &str, base: Duration, factor: f32, max: Duration) -> anyhow::Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "fixed" | "constant" => Ok(Self::Fixed(base)),
            "linear" => Ok(Self::Linear(base)),
            "exponential" | "exp" => Ok(Self::Exponential { base, factor, max }),
            other => Err(anyhow::anyhow!("unknown backoff policy: {other}")),
        }
    }

    /// `retry` is 1-based: the delay waited before the second attempt is `delay_for(1)`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        match *self {
            Self::Fixed(d) => d,
            Self::Linear(step) => step.saturating_mul(retry),
            Self::Exponential { base, factor, max } => {
                let exp = i32::try_from(retry - 1).unwrap_or(i32::MAX);
                let secs = base.as_secs_f64() * f64::from(factor.max(1.0)).powi(exp);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; 1 disables retries.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DelayScheduleBuilder {
    policy: BackoffPolicy,
    retries: u32,
}

impl DelayScheduleBuilder {
    #[must_use]
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            policy: policy.backoff,
            retries: policy.max_attempts.max(1) - 1,
        }
    }
}

impl BackoffBuilder for DelayScheduleBuilder {
    type Backoff = DelaySchedule;

    fn build(&self) -> Self::Backoff {
        DelaySchedule {
            policy: self.policy,
            retries: self.retries,
            next: 1,
        }
    }
}

/// Yields one delay per permitted retry, then ends.
#[derive(Clone, Debug)]
pub struct DelaySchedule {
    policy: BackoffPolicy,
    retries: u32,
    next: u32,
}

impl Iterator for DelaySchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.next > self.retries {
            return None;
        }
        let d = self.policy.delay_for(self.next);
        self.next += 1;
        Some(d)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable kind, or runs out of attempts.
///
/// `op` receives the 1-based attempt number. Each attempt is bounded by `policy.attempt_timeout`;
/// an elapsed attempt counts as a `Timeout` failure. The returned failure carries the last error and
/// the number of attempts made.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, op: F) -> Result<Attempted<T>, ChunkFailure>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, ChunkFailure>>,
{
    let attempts = AtomicU32::new(0);
    let timeout = policy.attempt_timeout;
    let builder = DelayScheduleBuilder::new(policy);

    let res = (|| {
        let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let fut = op(n);
        async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(res) => res,
                Err(_) => Err(ChunkFailure::timeout(format!(
                    "attempt {n} exceeded {}s",
                    timeout.as_secs_f32()
                ))),
            }
        }
    })
    .retry(&builder)
    .when(|e: &ChunkFailure| e.kind.is_retryable())
    .notify(|e: &ChunkFailure, dur: Duration| {
        warn!(
            target: "json_translator::retry",
            "{label}: attempt failed ({e}); retrying in {:.1}s",
            dur.as_secs_f32()
        );
    })
    .await;

    let made = attempts.load(Ordering::SeqCst);
    res.map(|value| Attempted {
        value,
        attempts: made,
    })
    .map_err(|e| e.with_attempts(made))
}
