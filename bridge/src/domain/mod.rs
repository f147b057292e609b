//! Domain primitives of the execution bridge.
//!
//! Purpose: define the values that travel with a unit of work (its identity,
//! its ambient context, its trace identity and its open transaction), the
//! closed error taxonomy, the retry policy, and the ports the core drives.
//! Nothing here knows about HTTP servers or a particular database.
//!
//! Public surface:
//! - `AmbientContext`: immutable request-scoped bag, activated per task.
//! - `ExecutionUnit`: the logical thread of control for a request or job.
//! - `TraceContext`: W3C trace identity carried by the context.
//! - `Error` / `ErrorKind`: closed failure taxonomy.
//! - `RetryPolicy`: bounded fixed-delay retry.
//! - `in_transaction` / `with_connection`: reentrant transaction scope.

pub mod context;
pub mod error;
pub mod ports;
pub mod retry;
pub mod trace;
pub mod transaction;
pub mod unit;

pub use self::context::{AmbientContext, LogFields, TransactionHandle};
pub use self::error::{Error, ErrorKind};
pub use self::retry::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, RetryPolicy, Sleeper, TokioSleeper,
};
pub use self::trace::{
    SpanId, TRACE_ID_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER, TraceContext, TraceId,
    TraceParentError,
};
pub use self::transaction::{in_transaction, with_connection};
pub use self::unit::{ExecutionUnit, UnitId, UnitOrigin};
