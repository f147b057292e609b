//! Retry decorator for outbound clients.
//!
//! Wraps any [`OutboundClient`] and re-issues a call while it fails with a
//! retryable error. Each attempt sends a fresh clone of the request, and for
//! streamed calls only establishing the response is retried; failures while
//! draining the body reach the caller untouched.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::domain::ports::{
    OutboundClient, OutboundError, ReceivedResponse, RequestSpec, StreamedResponse, Verb,
};
use crate::domain::{RetryPolicy, Sleeper, TokioSleeper};

/// Policy retrying connection resets with the default bound and delay.
pub fn connection_reset_policy() -> RetryPolicy<OutboundError> {
    RetryPolicy::new(OutboundError::is_connection_reset)
}

/// Outbound client that retries transient connection resets.
///
/// # Examples
/// ```no_run
/// use std::time::Duration;
/// use execution_bridge::outbound::http::{ReqwestClient, RetryingClient};
///
/// let inner = ReqwestClient::new(Duration::from_secs(30)).expect("client");
/// let client = RetryingClient::new(inner);
/// assert_eq!(client.policy().max_attempts(), 10);
/// ```
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy<OutboundError>,
    sleeper: Arc<dyn Sleeper>,
}

impl<C> RetryingClient<C> {
    /// Decorate `inner` with [`connection_reset_policy`].
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            policy: connection_reset_policy(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy<OutboundError>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the sleeper used between attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// The decorated client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Active retry policy.
    pub fn policy(&self) -> &RetryPolicy<OutboundError> {
        &self.policy
    }
}

impl<C: std::fmt::Debug> std::fmt::Debug for RetryingClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingClient")
            .field("inner", &self.inner)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<C: OutboundClient> OutboundClient for RetryingClient<C> {
    async fn request(
        &self,
        verb: Verb,
        url: &Url,
        spec: RequestSpec,
    ) -> Result<ReceivedResponse, OutboundError> {
        self.policy
            .run(self.sleeper.as_ref(), || {
                self.inner.request(verb, url, spec.clone())
            })
            .await
    }

    async fn stream(
        &self,
        verb: Verb,
        url: &Url,
        spec: RequestSpec,
    ) -> Result<StreamedResponse, OutboundError> {
        self.policy
            .run(self.sleeper.as_ref(), || {
                self.inner.stream(verb, url, spec.clone())
            })
            .await
    }

    async fn fetch(&self, url: &Url, spec: RequestSpec) -> Result<ReceivedResponse, OutboundError> {
        self.policy
            .run(self.sleeper.as_ref(), || self.inner.fetch(url, spec.clone()))
            .await
    }

    async fn create(
        &self,
        url: &Url,
        spec: RequestSpec,
    ) -> Result<ReceivedResponse, OutboundError> {
        self.policy
            .run(self.sleeper.as_ref(), || self.inner.create(url, spec.clone()))
            .await
    }

    async fn update(
        &self,
        url: &Url,
        spec: RequestSpec,
    ) -> Result<ReceivedResponse, OutboundError> {
        self.policy
            .run(self.sleeper.as_ref(), || self.inner.update(url, spec.clone()))
            .await
    }
}
