//! Driven port for calling downstream HTTP services.
//!
//! The domain owns the request and response shapes so the retry decorator
//! and call sites stay agnostic of the concrete HTTP client.

use std::fmt;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by outbound clients.
    pub enum OutboundError {
        /// The connection was closed or reset before the response completed.
        ConnectionReset { message: String } =>
            "connection reset before response completed: {message}",
        /// No connection could be established.
        Connect { message: String } =>
            "failed to connect: {message}",
        /// The call exceeded its timeout.
        Timeout { message: String } =>
            "outbound call timed out: {message}",
        /// The downstream service answered with a failure status.
        Status { status: u16, body: String } =>
            "downstream returned status {status}",
        /// The response body could not be decoded.
        Decode { message: String } =>
            "failed to decode response: {message}",
        /// Any other transport failure.
        Transport { message: String } =>
            "outbound transport failed: {message}",
        /// The request could not be built.
        InvalidRequest { message: String } =>
            "outbound request invalid: {message}",
    }
}

impl OutboundError {
    /// Whether the failure is the transient mid-response reset worth retrying.
    pub fn is_connection_reset(&self) -> bool {
        matches!(self, Self::ConnectionReset { .. })
    }
}

/// HTTP method of an outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
    /// `HEAD`
    Head,
}

impl Verb {
    /// Method name as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }
}

/// Headers and body of an outbound request.
///
/// Specs are cloned once per attempt, so a retried call resends exactly the
/// same request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSpec {
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Raw request body.
    pub body: Option<Vec<u8>>,
}

impl RequestSpec {
    /// An empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a raw body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialise `payload` as the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`OutboundError::InvalidRequest`] if serialisation fails.
    pub fn json<T: Serialize + ?Sized>(payload: &T) -> Result<Self, OutboundError> {
        let body = serde_json::to_vec(payload)
            .map_err(|err| OutboundError::invalid_request(err.to_string()))?;
        Ok(Self::new()
            .with_header("content-type", "application/json")
            .with_body(body))
    }
}

/// Fully buffered downstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl ReceivedResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value with the given (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body decoded as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`OutboundError::Decode`] if the body is not valid UTF-8.
    pub fn text(&self) -> Result<String, OutboundError> {
        String::from_utf8(self.body.clone()).map_err(|err| OutboundError::decode(err.to_string()))
    }

    /// Body decoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`OutboundError::Decode`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, OutboundError> {
        serde_json::from_slice(&self.body).map_err(|err| OutboundError::decode(err.to_string()))
    }

    /// Turn non-2xx responses into [`OutboundError::Status`].
    ///
    /// # Errors
    ///
    /// Returns [`OutboundError::Status`] carrying the status and body text.
    pub fn error_for_status(self) -> Result<Self, OutboundError> {
        if self.is_success() {
            return Ok(self);
        }
        let body = String::from_utf8_lossy(&self.body).into_owned();
        Err(OutboundError::status(self.status, body))
    }
}

/// Downstream response whose body arrives as a stream of chunks.
pub struct StreamedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Body chunks.
    pub body: BoxStream<'static, Result<Vec<u8>, OutboundError>>,
}

impl StreamedResponse {
    /// Drain the stream into one buffer.
    ///
    /// # Errors
    ///
    /// Returns the first chunk error.
    pub async fn collect(self) -> Result<Vec<u8>, OutboundError> {
        self.body.try_concat().await
    }
}

impl fmt::Debug for StreamedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamedResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Port for outbound HTTP calls.
///
/// `fetch`, `create` and `update` are shorthands over `request`. Decorators
/// must forward every method so overrides in the inner client are kept.
#[async_trait]
pub trait OutboundClient: Send + Sync {
    /// Issue a request and buffer the response.
    async fn request(
        &self,
        verb: Verb,
        url: &Url,
        spec: RequestSpec,
    ) -> Result<ReceivedResponse, OutboundError>;

    /// Issue a request and stream the response body.
    async fn stream(
        &self,
        verb: Verb,
        url: &Url,
        spec: RequestSpec,
    ) -> Result<StreamedResponse, OutboundError>;

    /// `GET` the resource.
    async fn fetch(&self, url: &Url, spec: RequestSpec) -> Result<ReceivedResponse, OutboundError> {
        self.request(Verb::Get, url, spec).await
    }

    /// `POST` to the resource.
    async fn create(
        &self,
        url: &Url,
        spec: RequestSpec,
    ) -> Result<ReceivedResponse, OutboundError> {
        self.request(Verb::Post, url, spec).await
    }

    /// `PUT` the resource.
    async fn update(
        &self,
        url: &Url,
        spec: RequestSpec,
    ) -> Result<ReceivedResponse, OutboundError> {
        self.request(Verb::Put, url, spec).await
    }
}
