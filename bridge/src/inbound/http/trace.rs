//! Tracing middleware establishing the request's ambient context.
//!
//! Each request runs under an [`AmbientContext`] whose trace continues the
//! caller's W3C `traceparent` when one is supplied and valid, or starts a
//! fresh root otherwise. The request method and path become log fields. The
//! active trace identifier is echoed in a `trace-id` response header.
//!
//! Task-local scopes are not inherited by spawned tasks. Handlers move work
//! onto the compute lane with
//! [`ExecutionBridge::run_current`](crate::runtime::ExecutionBridge::run_current),
//! which captures and re-activates this context.

use std::task::{Context, Poll};

use actix_web::Error;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use futures_util::future::{LocalBoxFuture, Ready, ready};
use tracing::{debug, error};

use crate::domain::{
    AmbientContext, TRACE_ID_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER, TraceContext,
};

/// Derive the server-side trace for an inbound request.
///
/// A valid `traceparent` yields a child span of the caller's span; anything
/// else starts a new root trace.
pub fn trace_from_headers(headers: &HeaderMap) -> TraceContext {
    let Some(raw) = headers
        .get(TRACEPARENT_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        return TraceContext::root();
    };
    match TraceContext::from_traceparent(raw) {
        Ok(parent) => {
            let trace = parent.child();
            match headers
                .get(TRACESTATE_HEADER)
                .and_then(|value| value.to_str().ok())
            {
                Some(state) => trace.with_trace_state(state),
                None => trace,
            }
        }
        Err(err) => {
            debug!(error = %err, "ignoring invalid traceparent header");
            TraceContext::root()
        }
    }
}

/// Middleware activating a request-scoped [`AmbientContext`] and adding a
/// `trace-id` header to every response.
///
/// # Examples
/// ```
/// use actix_web::App;
/// use execution_bridge::inbound::http::Trace;
///
/// let app = App::new().wrap(Trace);
/// ```
#[derive(Clone)]
pub struct Trace;

impl<S, B> Transform<S, ServiceRequest> for Trace
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = TraceMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TraceMiddleware { service }))
    }
}

/// Service wrapper produced by [`Trace`].
pub struct TraceMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for TraceMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let ctx = AmbientContext::new(trace_from_headers(req.headers()))
            .with_log_field("method", req.method())
            .with_log_field("path", req.path());
        let trace_id = ctx.trace().trace_id();
        // Extractors and handler futures may capture the context on construction.
        let fut = AmbientContext::sync_scope(ctx.clone(), || self.service.call(req));
        Box::pin(AmbientContext::scope(ctx, async move {
            let mut res = fut.await?;
            match HeaderValue::from_str(&trace_id.to_string()) {
                Ok(value) => {
                    res.response_mut()
                        .headers_mut()
                        .insert(HeaderName::from_static(TRACE_ID_HEADER), value);
                }
                Err(error) => {
                    error!(%error, %trace_id, "failed to encode trace identifier header");
                }
            }
            Ok(res)
        }))
    }
}
