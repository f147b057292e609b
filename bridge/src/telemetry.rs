//! Structured logging helpers.
//!
//! The subscriber is `tracing-subscriber`'s JSON formatter filtered by
//! `RUST_LOG`. Correlation fields live on the [`AmbientContext`] span, so
//! every event emitted while a context is active carries them.

use std::future::Future;

use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::domain::{AmbientContext, Error};

/// Install the global JSON subscriber.
///
/// A subscriber that is already installed is kept; the failure is logged
/// rather than returned.
pub fn init_tracing() {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }
}

/// Derive the current context with one more log field.
///
/// The active context is not modified; activate the returned one with
/// [`AmbientContext::scope`] for the field to appear on events.
///
/// # Examples
/// ```
/// use execution_bridge::telemetry::add_to_log_context;
///
/// let ctx = add_to_log_context("booking_id", 42);
/// assert_eq!(ctx.fields().get("booking_id"), Some("42"));
/// ```
pub fn add_to_log_context(key: impl Into<String>, value: impl ToString) -> AmbientContext {
    AmbientContext::capture().with_log_field(key, value)
}

/// Run `fut` under a child span of the active trace.
///
/// The child keeps the trace id, gets a new span id and carries an
/// `operation` log field. A failure is recorded as an error event inside the
/// child span and then returned unchanged.
pub async fn instrument<T, F>(name: &str, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    let ctx = AmbientContext::capture()
        .child_span()
        .with_log_field("operation", name);
    let report = ctx.clone();
    let outcome = AmbientContext::scope(ctx, fut).await;
    if let Err(err) = &outcome {
        AmbientContext::sync_scope(report, || {
            error!(error = %err, kind = ?err.kind(), "operation failed");
        });
    }
    outcome
}
