//! Domain-level error type.
//!
//! Errors are transport agnostic. The closed [`ErrorKind`] set is what the
//! inbound classification layer turns into a status and optional body; port
//! errors convert into [`Error`] with `From` so `?` works across layers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::AmbientContext;
use super::ports::{OutboundError, TransactionError};

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The requested resource does not exist.
    NotFound,
    /// The request is malformed.
    BadRequest,
    /// The request is well formed but semantically invalid.
    UnprocessableEntity,
    /// Authentication failed or is missing.
    Unauthorized,
    /// Authenticated but not permitted.
    Forbidden,
    /// The request conflicts with current state.
    Conflict,
    /// The request payload media type is not accepted.
    UnsupportedMedia,
    /// The caller exceeded a rate limit.
    TooManyRequests,
    /// A downstream call timed out at the transport level.
    UpstreamTimeout,
    /// A downstream dependency failed or reset the connection.
    UpstreamUnavailable,
    /// A downstream dependency reported that it timed out.
    UpstreamTimeoutExplicit,
    /// Anything else. Never exposes its details to callers.
    Internal,
}

/// Domain error carrying a kind, a message and optional structured details.
///
/// The active trace identifier is captured when the error is created so the
/// boundary can correlate responses with logs even after the ambient context
/// has been torn down.
///
/// # Examples
/// ```
/// use execution_bridge::domain::{Error, ErrorKind};
/// use serde_json::json;
///
/// let err = Error::unprocessable_entity("invalid booking")
///     .with_details(json!({ "field": "start" }));
/// assert_eq!(err.kind(), ErrorKind::UnprocessableEntity);
/// assert!(err.details().is_some());
/// ```
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    details: Option<Value>,
    trace_id: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            trace_id: AmbientContext::current().map(|ctx| ctx.trace().trace_id().to_string()),
            source: None,
        }
    }

    /// Failure category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Structured details for the response body.
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Trace identifier active when the error was raised.
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the captured trace identifier.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Record the underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Convenience constructor for [`ErrorKind::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Convenience constructor for [`ErrorKind::BadRequest`].
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Convenience constructor for [`ErrorKind::UnprocessableEntity`].
    pub fn unprocessable_entity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnprocessableEntity, message)
    }

    /// Convenience constructor for [`ErrorKind::Unauthorized`].
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// Convenience constructor for [`ErrorKind::Forbidden`].
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// Convenience constructor for [`ErrorKind::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Convenience constructor for [`ErrorKind::UnsupportedMedia`].
    pub fn unsupported_media(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedMedia, message)
    }

    /// Convenience constructor for [`ErrorKind::TooManyRequests`].
    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TooManyRequests, message)
    }

    /// Convenience constructor for [`ErrorKind::UpstreamTimeout`].
    pub fn upstream_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamTimeout, message)
    }

    /// Convenience constructor for [`ErrorKind::UpstreamUnavailable`].
    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, message)
    }

    /// Convenience constructor for [`ErrorKind::UpstreamTimeoutExplicit`].
    pub fn upstream_timeout_explicit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamTimeoutExplicit, message)
    }

    /// Convenience constructor for [`ErrorKind::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// The producer of a deferred value went away before resolving it.
    pub fn cancelled() -> Self {
        Self::internal("computation was cancelled before it resolved")
    }

    /// Convert a caught panic payload into an internal failure.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|msg| (*msg).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::internal(format!("computation panicked: {detail}"))
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("details", &self.details)
            .field("trace_id", &self.trace_id)
            .field("source", &self.source.as_ref().map(ToString::to_string))
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn std::error::Error + 'static))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.message == other.message
            && self.details == other.details
            && self.trace_id == other.trace_id
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Self::internal(err.to_string()).with_source(err)
    }
}

impl From<OutboundError> for Error {
    fn from(err: OutboundError) -> Self {
        let kind = match &err {
            OutboundError::Timeout { .. } => ErrorKind::UpstreamTimeout,
            OutboundError::Status {
                status: 408 | 504, ..
            } => ErrorKind::UpstreamTimeoutExplicit,
            OutboundError::InvalidRequest { .. } => ErrorKind::Internal,
            OutboundError::ConnectionReset { .. }
            | OutboundError::Connect { .. }
            | OutboundError::Status { .. }
            | OutboundError::Decode { .. }
            | OutboundError::Transport { .. } => ErrorKind::UpstreamUnavailable,
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}
