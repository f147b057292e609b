//! Logical units of work.
//!
//! An [`ExecutionUnit`] is the caller-visible thread of control for one
//! request or background job. It lives in task-local storage, so it follows
//! the future that carries it across worker threads but is not inherited by
//! spawned tasks. Use [`ExecutionUnit::scope`] (or the bridge, which does it
//! for you) whenever work moves to a new task or a blocking thread.

use std::fmt;
use std::future::Future;

use tokio::task_local;
use uuid::Uuid;

task_local! {
    static CURRENT_UNIT: ExecutionUnit;
}

/// Unique identifier of an execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(Uuid);

impl UnitId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an execution unit came into being.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitOrigin {
    /// Started by the bridge for an inbound request.
    Request,
    /// Forked onto a dedicated lane from another unit.
    Background,
    /// Drained from the work queue.
    Queued,
    /// Created on demand for a caller that had no unit.
    Synthesized,
}

impl UnitOrigin {
    /// Stable label used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Background => "background",
            Self::Queued => "queued",
            Self::Synthesized => "synthesized",
        }
    }
}

/// The logical thread of control for one request or background task.
///
/// # Examples
/// ```
/// use execution_bridge::domain::{ExecutionUnit, UnitOrigin};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let unit = ExecutionUnit::new(UnitOrigin::Request);
/// let observed = unit.scope(async { ExecutionUnit::current() }).await;
/// assert_eq!(observed, Some(unit));
/// # });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionUnit {
    id: UnitId,
    origin: UnitOrigin,
}

impl ExecutionUnit {
    /// Create a fresh unit with a new identifier.
    pub fn new(origin: UnitOrigin) -> Self {
        Self {
            id: UnitId::generate(),
            origin,
        }
    }

    /// Identifier of this unit.
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Where this unit came from.
    pub fn origin(&self) -> UnitOrigin {
        self.origin
    }

    /// Returns the unit in scope for the running task, if any.
    pub fn current() -> Option<Self> {
        CURRENT_UNIT.try_with(|unit| *unit).ok()
    }

    /// Run `fut` with this unit in scope.
    pub async fn scope<Fut>(self, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        CURRENT_UNIT.scope(self, fut).await
    }

    /// Run a synchronous closure with this unit in scope.
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT_UNIT.sync_scope(self, f)
    }
}
