//! HTTP adapter mapping for domain errors.
//!
//! [`classify`] is the single, pure mapping from an [`ErrorKind`] to a status
//! and optional JSON body. Only kinds that carry caller-facing detail emit a
//! body; everything else answers with an empty body. Internal failures are
//! logged here and never described to the client.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::domain::{Error, ErrorKind, TRACE_ID_HEADER};

/// Convenient result alias for HTTP handlers.
pub type ApiResult<T> = Result<T, Error>;

/// Small JSON error-detail object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Failure category.
    pub code: ErrorKind,
    /// Caller-facing message.
    pub message: String,
    /// Structured details, when the error carries any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Trace identifier for log correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Wire-level outcome for a domain error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Response status.
    pub status: StatusCode,
    /// Response body, if the kind carries one.
    pub body: Option<ErrorBody>,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::UnsupportedMedia => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::UpstreamTimeout | ErrorKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
        ErrorKind::UpstreamTimeoutExplicit => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn carries_body(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::NotFound | ErrorKind::Forbidden | ErrorKind::UnprocessableEntity
    )
}

/// Map a domain error to its response status and optional body.
///
/// # Examples
/// ```
/// use actix_web::http::StatusCode;
/// use execution_bridge::domain::Error;
/// use execution_bridge::inbound::http::error::classify;
///
/// let outcome = classify(&Error::conflict("already booked"));
/// assert_eq!(outcome.status, StatusCode::CONFLICT);
/// assert!(outcome.body.is_none());
/// ```
pub fn classify(error: &Error) -> Classification {
    let kind = error.kind();
    let body = carries_body(kind).then(|| ErrorBody {
        code: kind,
        message: error.message().to_owned(),
        details: error.details().cloned(),
        trace_id: error.trace_id().map(str::to_owned),
    });
    Classification {
        status: status_for(kind),
        body,
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        status_for(self.kind())
    }

    fn error_response(&self) -> HttpResponse {
        if self.kind() == ErrorKind::Internal {
            error!(
                error = %self,
                trace_id = self.trace_id().unwrap_or_default(),
                "request failed with internal error"
            );
        }
        let Classification { status, body } = classify(self);
        let mut builder = HttpResponse::build(status);
        if let Some(id) = self.trace_id() {
            builder.insert_header((TRACE_ID_HEADER, id.to_owned()));
        }
        match body {
            Some(body) => builder.json(body),
            None => builder.finish(),
        }
    }
}

impl From<actix_web::Error> for Error {
    fn from(err: actix_web::Error) -> Self {
        // Do not leak implementation details to clients.
        error!(error = %err, "actix error promoted to domain error");
        Error::internal("Internal server error")
    }
}

#[cfg(test)]
mod tests;
