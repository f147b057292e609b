//! Execution bridge: binds suspendable computations to the reactor lanes.
//!
//! Every computation started through the bridge runs as one task on the
//! compute lane, wrapped in three task-local scopes: the active bridge, its
//! [`ExecutionUnit`] and its [`AmbientContext`]. Because the scopes wrap the
//! whole task, they are re-established on every poll regardless of which
//! worker thread performs it, and a step that follows an await always runs
//! on a compute-lane worker. Blocking work is shipped to the blocking lane
//! with the captured context and unit re-activated there.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use tokio::runtime::Handle;
use tokio::task_local;
use tracing::debug;

use super::deferred::Deferred;
use crate::domain::{AmbientContext, Error, ExecutionUnit, UnitOrigin};

task_local! {
    static ACTIVE_BRIDGE: ExecutionBridge;
}

/// Scheduling handle onto a reactor's compute and blocking lanes.
///
/// # Examples
/// ```
/// use execution_bridge::domain::{AmbientContext, Error};
/// use execution_bridge::runtime::{Lane, Reactor, ReactorConfig};
///
/// let reactor = Reactor::new(&ReactorConfig::default()).expect("reactor");
/// let bridge = reactor.bridge();
/// let lane = reactor.block_on(bridge.run(AmbientContext::empty(), async move {
///     let on_blocking = execution_bridge::runtime::blocking(|| Ok(Lane::current())).await?;
///     assert_eq!(on_blocking, Some(Lane::Blocking));
///     Ok::<_, Error>(Lane::current())
/// }));
/// assert_eq!(lane.ok(), Some(Some(Lane::Compute)));
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionBridge {
    compute: Handle,
    blocking: Handle,
}

impl ExecutionBridge {
    /// Bridge onto the given runtimes.
    pub fn new(compute: Handle, blocking: Handle) -> Self {
        Self { compute, blocking }
    }

    /// Bridge the running computation was started on, if any.
    pub fn current() -> Option<Self> {
        ACTIVE_BRIDGE.try_with(Clone::clone).ok()
    }

    /// Runtime handle of the compute lane.
    pub fn compute_handle(&self) -> &Handle {
        &self.compute
    }

    /// Start `fut` as a new request unit with `ctx` active.
    ///
    /// Never fails synchronously: errors and panics raised by the computation
    /// are delivered through the returned [`Deferred`].
    pub fn run<T, F>(&self, ctx: AmbientContext, fut: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        self.spawn_unit(ExecutionUnit::new(UnitOrigin::Request), ctx, fut)
    }

    /// Start `fut` as a new request unit under the caller's context.
    pub fn run_current<T, F>(&self, fut: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        self.run(AmbientContext::capture(), fut)
    }

    /// Start `fut` as a background unit on its own task.
    ///
    /// The caller's trace and log fields carry over; its open transaction
    /// does not, because a transaction belongs to exactly one unit.
    pub fn fork<T, F>(&self, fut: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let ctx = AmbientContext::capture().without_transaction();
        self.spawn_unit(ExecutionUnit::new(UnitOrigin::Background), ctx, fut)
    }

    /// Run a synchronous closure on the blocking lane.
    ///
    /// The caller's context and unit are active inside the closure. Awaiting
    /// the result resumes the caller on its own lane.
    pub fn blocking<T, F>(&self, work: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, Error> + Send + 'static,
    {
        let ctx = AmbientContext::capture();
        let unit = ExecutionUnit::current();
        let (resolver, deferred) = Deferred::pending();
        let task = self.blocking.spawn_blocking(move || {
            let guarded = || {
                panic::catch_unwind(AssertUnwindSafe(work))
                    .unwrap_or_else(|panic| Err(Error::from_panic(panic)))
            };
            let outcome = AmbientContext::sync_scope(ctx, || match unit {
                Some(unit) => unit.sync_scope(guarded),
                None => guarded(),
            });
            resolver.resolve(outcome);
        });
        deferred.with_abort(task.abort_handle())
    }

    pub(crate) fn spawn_unit<T, F>(
        &self,
        unit: ExecutionUnit,
        ctx: AmbientContext,
        fut: F,
    ) -> Deferred<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        debug!(
            unit = %unit.id(),
            origin = unit.origin().as_str(),
            trace_id = %ctx.trace().trace_id(),
            "starting execution unit"
        );
        let bound = ACTIVE_BRIDGE.scope(
            self.clone(),
            unit.scope(AmbientContext::scope(ctx, fut)),
        );
        Deferred::spawn_on(&self.compute, bound)
    }
}
