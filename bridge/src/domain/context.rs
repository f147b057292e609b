//! Ambient request-scoped context.
//!
//! [`AmbientContext`] is an immutable snapshot of the trace identity, the
//! structured log fields and the open transactions (at most one per
//! connection source) of the running unit of work. Derivations (`with_*`) return a new context sharing the
//! unchanged parts; nothing is ever mutated in place.
//!
//! Activation is scoped: [`AmbientContext::scope`] and
//! [`AmbientContext::sync_scope`] make a context current for the extent of a
//! future or closure and restore the previous one on every exit path,
//! including panics and cancellation. Each context also owns a `tracing`
//! span, entered on every poll, so log lines emitted on whichever worker
//! thread happens to poll the future carry the same correlation fields.
//!
//! Task-local values are not inherited by spawned tasks. Anything that
//! schedules work elsewhere must capture the context first and re-activate it
//! at the destination.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::task_local;
use tracing::{Instrument, Span};

use super::ports::SourceId;
use super::trace::TraceContext;
use super::unit::UnitId;

task_local! {
    static AMBIENT: AmbientContext;
}

/// Structured log fields carried by the ambient context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFields(Arc<BTreeMap<String, String>>);

impl LogFields {
    /// Look up a field value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterate over fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no fields are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn with(&self, key: String, value: String) -> Self {
        let mut fields = (*self.0).clone();
        fields.insert(key, value);
        Self(Arc::new(fields))
    }
}

impl fmt::Display for LogFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Reference to an open database transaction.
///
/// The handle records the unit that opened the transaction, the source the
/// connection came from and a type-erased slot holding the connection. Only
/// the transaction scope knows the concrete slot type and can recover it.
#[derive(Clone)]
pub struct TransactionHandle {
    owner: UnitId,
    source: SourceId,
    slot: Arc<dyn Any + Send + Sync>,
}

impl TransactionHandle {
    pub(crate) fn new<S>(owner: UnitId, source: SourceId, slot: Arc<S>) -> Self
    where
        S: Any + Send + Sync,
    {
        Self {
            owner,
            source,
            slot,
        }
    }

    /// Unit that opened the transaction.
    pub fn owner(&self) -> UnitId {
        self.owner
    }

    /// Connection source the transaction runs on.
    pub fn source(&self) -> SourceId {
        self.source
    }

    pub(crate) fn downcast<S>(&self) -> Option<Arc<S>>
    where
        S: Any + Send + Sync,
    {
        Arc::clone(&self.slot).downcast::<S>().ok()
    }

    /// Whether both handles refer to the same open transaction.
    pub fn same_transaction(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.slot).cast::<()>(),
            Arc::as_ptr(&other.slot).cast::<()>(),
        )
    }
}

impl PartialEq for TransactionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.source == other.source && self.same_transaction(other)
    }
}

impl Eq for TransactionHandle {}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("owner", &self.owner)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

struct Inner {
    trace: TraceContext,
    fields: LogFields,
    // Innermost last; never two handles for the same source.
    transactions: Vec<TransactionHandle>,
    span: Span,
}

/// Immutable bag of request-scoped values.
///
/// # Examples
/// ```
/// use execution_bridge::domain::AmbientContext;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let ctx = AmbientContext::empty().with_log_field("user", "42");
/// let seen = AmbientContext::scope(ctx.clone(), async { AmbientContext::current() }).await;
/// assert_eq!(seen, Some(ctx));
/// assert!(AmbientContext::current().is_none());
/// # });
/// ```
#[derive(Clone)]
pub struct AmbientContext(Arc<Inner>);

impl AmbientContext {
    /// Build a context for the given trace with no fields or transaction.
    pub fn new(trace: TraceContext) -> Self {
        Self::from_parts(trace, LogFields::default(), Vec::new())
    }

    /// Build a context for a freshly started trace.
    pub fn empty() -> Self {
        Self::new(TraceContext::root())
    }

    fn from_parts(
        trace: TraceContext,
        fields: LogFields,
        transactions: Vec<TransactionHandle>,
    ) -> Self {
        let span = tracing::info_span!(
            parent: None,
            "ambient",
            trace_id = %trace.trace_id(),
            span_id = %trace.span_id(),
            fields = %fields,
        );
        Self(Arc::new(Inner {
            trace,
            fields,
            transactions,
            span,
        }))
    }

    /// Returns the context active for the running task, if any.
    pub fn current() -> Option<Self> {
        AMBIENT.try_with(Clone::clone).ok()
    }

    /// Returns the active context, or a fresh one when none is active.
    pub fn capture() -> Self {
        Self::current().unwrap_or_else(Self::empty)
    }

    /// Trace identity of this context.
    pub fn trace(&self) -> &TraceContext {
        &self.0.trace
    }

    /// Structured log fields.
    pub fn fields(&self) -> &LogFields {
        &self.0.fields
    }

    /// Innermost open transaction, if any.
    pub fn transaction(&self) -> Option<&TransactionHandle> {
        self.0.transactions.last()
    }

    /// Open transaction on the given connection source, if any.
    pub fn transaction_for(&self, source: SourceId) -> Option<&TransactionHandle> {
        self.0
            .transactions
            .iter()
            .find(|handle| handle.source() == source)
    }

    /// Span mirroring this context into the tracing subscriber.
    pub fn span(&self) -> &Span {
        &self.0.span
    }

    /// Derive a context with a different trace identity.
    pub fn with_trace(&self, trace: TraceContext) -> Self {
        Self::from_parts(trace, self.0.fields.clone(), self.0.transactions.clone())
    }

    /// Derive a context running in a child span of the current trace.
    pub fn child_span(&self) -> Self {
        self.with_trace(self.0.trace.child())
    }

    /// Derive a context with one more (or one overridden) log field.
    pub fn with_log_field(&self, key: impl Into<String>, value: impl ToString) -> Self {
        let fields = self.0.fields.with(key.into(), value.to_string());
        Self::from_parts(self.0.trace.clone(), fields, self.0.transactions.clone())
    }

    /// Derive a context carrying an open transaction.
    ///
    /// Replaces any handle already carried for the same connection source;
    /// handles for other sources are kept.
    pub fn with_transaction(&self, handle: TransactionHandle) -> Self {
        let mut transactions: Vec<TransactionHandle> = self
            .0
            .transactions
            .iter()
            .filter(|open| open.source() != handle.source())
            .cloned()
            .collect();
        transactions.push(handle);
        Self::from_parts(self.0.trace.clone(), self.0.fields.clone(), transactions)
    }

    /// Derive a context with no transaction.
    ///
    /// Used when work leaves its unit: a transaction belongs to exactly one
    /// unit and must not be shared with forked or queued work.
    pub fn without_transaction(&self) -> Self {
        if self.0.transactions.is_empty() {
            return self.clone();
        }
        Self::from_parts(self.0.trace.clone(), self.0.fields.clone(), Vec::new())
    }

    /// Whether both values are the same snapshot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Run `fut` with `ctx` active.
    pub async fn scope<Fut>(ctx: AmbientContext, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        let span = ctx.0.span.clone();
        AMBIENT.scope(ctx, fut.instrument(span)).await
    }

    /// Run a synchronous closure with `ctx` active.
    pub fn sync_scope<R>(ctx: AmbientContext, f: impl FnOnce() -> R) -> R {
        let span = ctx.0.span.clone();
        AMBIENT.sync_scope(ctx, || span.in_scope(f))
    }
}

impl PartialEq for AmbientContext {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.0.trace == other.0.trace
                && self.0.fields == other.0.fields
                && self.0.transactions == other.0.transactions)
    }
}

impl fmt::Debug for AmbientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientContext")
            .field("trace", &self.0.trace)
            .field("fields", &self.0.fields)
            .field("transactions", &self.0.transactions)
            .finish()
    }
}
