//! Reactor adapter: lanes, deferred values and the execution bridge.
//!
//! The free functions here are the seam between reactor-native deferred
//! values and suspendable computations:
//!
//! - [`await_deferred`] suspends on a [`Deferred`], synthesising a unit of
//!   work when the caller has none;
//! - [`as_deferred`] exposes a computation as a [`Deferred`];
//! - [`blocking`] ships synchronous work to the blocking lane.
//!
//! All three capture the caller's [`AmbientContext`] and re-activate it
//! wherever the work ends up running.

mod bridge;
mod deferred;
mod queue;
mod reactor;

pub use bridge::ExecutionBridge;
pub use deferred::{Deferred, Resolver};
pub use queue::{DEFAULT_QUEUE_CAPACITY, WorkQueue};
pub use reactor::{Lane, Reactor, ReactorConfig, ReactorError};

use std::future::Future;

use tokio::runtime::Handle;
use tracing::debug;

use crate::domain::{AmbientContext, Error, ExecutionUnit, UnitOrigin};

/// Suspend until `deferred` resolves.
///
/// Accepts a [`Deferred`] or any other reactor-native future. On success
/// yields the value; on failure raises it at the call site, so `?` works
/// unmodified. Outside any unit of work a short-lived
/// [`UnitOrigin::Synthesized`] unit is created, running in a child span of
/// the caller's context (or of a fresh trace when there is none).
///
/// # Errors
///
/// Returns the failure the deferred resolved to.
pub async fn await_deferred<T, F>(deferred: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    if ExecutionUnit::current().is_some() {
        return deferred.await;
    }
    let unit = ExecutionUnit::new(UnitOrigin::Synthesized);
    let ctx = AmbientContext::capture().child_span();
    debug!(unit = %unit.id(), trace_id = %ctx.trace().trace_id(), "synthesised unit for await");
    unit.scope(AmbientContext::scope(ctx, deferred)).await
}

/// Expose `fut` as a deferred value.
///
/// The computation runs as a task on the active bridge's compute lane (or
/// the current Tokio runtime outside a bridge) under the caller's context,
/// as part of the caller's unit when there is one.
pub fn as_deferred<T, F>(fut: F) -> Deferred<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T, Error>> + Send + 'static,
{
    let ctx = AmbientContext::capture();
    let unit =
        ExecutionUnit::current().unwrap_or_else(|| ExecutionUnit::new(UnitOrigin::Synthesized));
    if let Some(bridge) = ExecutionBridge::current() {
        return bridge.spawn_unit(unit, ctx, fut);
    }
    match Handle::try_current() {
        Ok(runtime) => Deferred::spawn_on(&runtime, unit.scope(AmbientContext::scope(ctx, fut))),
        Err(_) => Deferred::error(Error::internal(
            "no async runtime available to run the computation",
        )),
    }
}

/// Run a synchronous closure on the blocking lane of the active bridge.
///
/// Outside a bridge the current Tokio runtime's blocking pool is used.
pub fn blocking<T, F>(work: F) -> Deferred<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    if let Some(bridge) = ExecutionBridge::current() {
        return bridge.blocking(work);
    }
    match Handle::try_current() {
        Ok(runtime) => ExecutionBridge::new(runtime.clone(), runtime).blocking(work),
        Err(_) => Deferred::error(Error::internal(
            "blocking dispatch requires an async runtime",
        )),
    }
}
