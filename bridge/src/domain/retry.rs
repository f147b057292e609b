//! Bounded fixed-delay retry.
//!
//! A [`RetryPolicy`] is stateless: each call to [`RetryPolicy::run`] starts a
//! fresh attempt counter, so one policy can be shared by every call site.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Attempts made by default before the last failure is surfaced.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Fixed pause between attempts by default.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Async sleep abstraction so tests can observe delays without waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Pause for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Tokio-based sleeper implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Which failures to retry, how often, and how long to wait in between.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use execution_bridge::domain::RetryPolicy;
///
/// let policy = RetryPolicy::new(|err: &std::io::Error| {
///     err.kind() == std::io::ErrorKind::ConnectionReset
/// })
/// .with_max_attempts(3)
/// .with_delay(Duration::from_millis(5));
/// assert_eq!(policy.max_attempts(), 3);
/// ```
pub struct RetryPolicy<E> {
    predicate: Predicate<E>,
    max_attempts: u32,
    delay: Duration,
}

impl<E> RetryPolicy<E> {
    /// Retry failures matching `predicate` with the default bound and delay.
    pub fn new(predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Set the total number of attempts, including the first. At least one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the pause between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Total number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether `error` is one this policy retries.
    pub fn should_retry(&self, error: &E) -> bool {
        (self.predicate)(error)
    }

    /// Run `call` until it succeeds, fails with a non-matching error, or the
    /// attempt bound is reached.
    ///
    /// # Errors
    ///
    /// Returns the first non-matching failure, or the failure of the final
    /// attempt.
    pub async fn run<T, F, Fut>(&self, sleeper: &dyn Sleeper, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && self.should_retry(&err) => {
                    debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX),
                        "transient failure; retrying"
                    );
                    sleeper.sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
            max_attempts: self.max_attempts,
            delay: self.delay,
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}
