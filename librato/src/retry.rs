//! Retry policy for server errors.
//!
//! The transport retries every 5xx response, sleeping between attempts for
//! a duration produced by the policy's backoff function. The default policy
//! starts at one second, doubles on every retry and never gives up; use
//! [`RetryPolicy::bounded`] or [`RetryPolicy::with_deadline`] to make
//! termination explicit.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Maps the previous backoff duration to the next one.
#[derive(Clone)]
pub struct BackoffFn(Arc<dyn Fn(Duration) -> Duration + Send + Sync>);

impl BackoffFn {
    /// Wraps a backoff function.
    pub fn new(f: impl Fn(Duration) -> Duration + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Doubles the previous duration.
    pub fn doubling() -> Self {
        Self::new(|d| d.saturating_mul(2))
    }

    /// Always returns the same duration.
    pub fn constant(d: Duration) -> Self {
        Self::new(move |_| d)
    }

    /// Computes the next backoff.
    pub fn next(&self, previous: Duration) -> Duration {
        (self.0)(previous)
    }
}

impl fmt::Debug for BackoffFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BackoffFn(..)")
    }
}

/// How the transport spaces out and limits retries after 5xx responses.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Seed passed to the backoff function before the first retry.
    pub initial_backoff: Duration,
    /// Computes each wait from the previous one.
    pub backoff: BackoffFn,
    /// Maximum number of retries; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Give up once this much time has passed since the first attempt.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    /// 1s seed, doubling, unbounded.
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            backoff: BackoffFn::doubling(),
            max_retries: None,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Default doubling policy limited to `max_retries` retries.
    pub fn bounded(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Self::default()
        }
    }

    /// Sets the backoff function.
    #[must_use]
    pub fn with_backoff(mut self, backoff: impl Fn(Duration) -> Duration + Send + Sync + 'static) -> Self {
        self.backoff = BackoffFn::new(backoff);
        self
    }

    /// Sets the seed duration.
    #[must_use]
    pub fn with_initial_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets an overall deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Starts tracking one logical request.
    pub(crate) fn start(&self) -> RetryState<'_> {
        RetryState {
            policy: self,
            backoff: self.initial_backoff,
            retries: 0,
        }
    }
}

/// Outcome of asking the policy whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// Sleep this long, then retry.
    Wait(Duration),
    /// The retry ceiling was reached.
    MaxRetries,
    /// The next wait would overrun this deadline.
    Deadline(Duration),
}

/// Per-call backoff state. Never shared across calls.
#[derive(Debug)]
pub(crate) struct RetryState<'a> {
    policy: &'a RetryPolicy,
    backoff: Duration,
    retries: u32,
}

impl RetryState<'_> {
    /// Advances the backoff and decides whether another attempt is allowed.
    ///
    /// `elapsed` is the time since the first attempt.
    pub(crate) fn next(&mut self, elapsed: Duration) -> RetryDecision {
        if self.policy.max_retries.is_some_and(|max| self.retries >= max) {
            return RetryDecision::MaxRetries;
        }
        let wait = self.policy.backoff.next(self.backoff);
        if let Some(deadline) = self.policy.deadline {
            if elapsed.saturating_add(wait) > deadline {
                return RetryDecision::Deadline(deadline);
            }
        }
        self.backoff = wait;
        self.retries += 1;
        RetryDecision::Wait(wait)
    }

    /// Number of attempts made so far, counting the first.
    pub(crate) fn attempts(&self) -> u32 {
        self.retries + 1
    }
}
