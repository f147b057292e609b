//! Reentrant transaction scope.
//!
//! [`in_transaction`] lifts a block of composed asynchronous operations into
//! one physical transaction. The open transaction travels in the ambient
//! context, so deciding whether to open a new one is a pure function of the
//! active context: if it already carries a handle owned by the running unit
//! for the same connection source, the block joins that transaction and no
//! commit or rollback boundary is introduced. A scope on a different source
//! opens its own, independent transaction.
//!
//! Repository code reaches the connection through [`with_connection`], which
//! uses the open transaction when there is one and an autocommit connection
//! otherwise.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task_local;
use tracing::{debug, warn};

use super::context::{AmbientContext, TransactionHandle};
use super::ports::{ConnectionSource, SourceId, TransactionError};
use super::unit::{ExecutionUnit, UnitOrigin};

type Slot<C> = Mutex<Option<C>>;

task_local! {
    // Sources whose transaction connection is lent to the polled `work`.
    static LENT: Arc<[SourceId]>;
}

/// Run `block` inside a transaction on a connection from `source`.
///
/// Commits when the block succeeds. Rolls back and re-raises the original
/// failure unchanged when it fails, whether the failure came from the block
/// itself or from an operation nested arbitrarily deep inside it. If the
/// block is cancelled or panics, the rollback is still issued in the
/// background.
///
/// Called without an execution unit, a short-lived one is synthesised so the
/// transaction has an owner.
///
/// # Errors
///
/// Returns the block's error, or a [`TransactionError`] converted into `E`
/// when the connection cannot be acquired, begun or committed.
///
/// # Examples
/// ```ignore
/// let saved = in_transaction(&pool, || async {
///     insert_booking(&pool, &booking).await?;
///     insert_ledger_entry(&pool, &entry).await
/// })
/// .await?;
/// ```
pub async fn in_transaction<S, T, E, F, Fut>(source: &S, block: F) -> Result<T, E>
where
    S: ConnectionSource,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<TransactionError>,
{
    match ExecutionUnit::current() {
        Some(unit) => run_in_unit(source, unit, block).await,
        None => {
            let unit = ExecutionUnit::new(UnitOrigin::Synthesized);
            unit.scope(run_in_unit(source, unit, block)).await
        }
    }
}

async fn run_in_unit<S, T, E, F, Fut>(
    source: &S,
    unit: ExecutionUnit,
    block: F,
) -> Result<T, E>
where
    S: ConnectionSource,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<TransactionError>,
{
    let ambient = AmbientContext::capture();
    if let Some(handle) = ambient
        .transaction_for(source.id())
        .filter(|handle| handle.owner() == unit.id())
    {
        if handle.downcast::<Slot<S::Connection>>().is_none() {
            return Err(TransactionError::foreign_handle().into());
        }
        debug!(unit = %unit.id(), "joining open transaction");
        return block().await;
    }

    let mut connection = source.acquire().await?;
    if let Err(err) = source.begin(&mut connection).await {
        source.release(connection).await;
        return Err(err.into());
    }
    debug!(unit = %unit.id(), "transaction opened");

    let slot: Arc<Slot<S::Connection>> = Arc::new(Mutex::new(Some(connection)));
    let handle = TransactionHandle::new(unit.id(), source.id(), Arc::clone(&slot));
    let mut guard = RollbackGuard::arm(source.clone(), Arc::clone(&slot));
    let outcome = AmbientContext::scope(ambient.with_transaction(handle), block()).await;

    // The connection stays in the slot until the outcome is settled, so a
    // cancellation from here on still reaches the guard.
    let mut locked = slot.lock().await;
    let Some(connection) = locked.as_mut() else {
        guard.disarm();
        return Err(TransactionError::closed().into());
    };
    let result = match outcome {
        Ok(value) => match source.commit(connection).await {
            Ok(()) => {
                debug!(unit = %unit.id(), "transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = source.rollback(connection).await {
                    warn!(error = %rollback_err, "rollback after failed commit also failed");
                }
                Err(err.into())
            }
        },
        Err(err) => {
            match source.rollback(connection).await {
                Ok(()) => debug!(unit = %unit.id(), "transaction rolled back"),
                Err(rollback_err) => {
                    warn!(error = %rollback_err, "rollback failed; surfacing original failure");
                }
            }
            Err(err)
        }
    };
    let connection = locked.take();
    drop(locked);
    if let Some(connection) = connection {
        source.release(connection).await;
    }
    guard.disarm();
    result
}

/// Run `work` against the connection of the open transaction, or against a
/// freshly acquired autocommit connection when no transaction owned by the
/// running unit is active.
///
/// # Errors
///
/// Returns the error from `work`, or a [`TransactionError`] converted into
/// `E` when no connection can be acquired. Calling it again from inside
/// `work` for the same source while a transaction is open yields
/// [`TransactionError::Busy`], since the connection is already lent out.
///
/// # Examples
/// ```ignore
/// let rows = with_connection(&pool, |conn| {
///     async move { load_bookings(conn).await }.boxed()
/// })
/// .await?;
/// ```
pub async fn with_connection<S, T, E, F>(source: &S, work: F) -> Result<T, E>
where
    S: ConnectionSource,
    F: for<'c> FnOnce(&'c mut S::Connection) -> BoxFuture<'c, Result<T, E>>,
    E: From<TransactionError>,
{
    let id = source.id();
    if let Some(slot) = active_slot::<S::Connection>(id) {
        let lent = LENT.try_with(Arc::clone).unwrap_or_else(|_| Arc::from([]));
        if lent.contains(&id) {
            return Err(TransactionError::busy().into());
        }
        let mut guard = slot.lock().await;
        let Some(connection) = guard.as_mut() else {
            return Err(TransactionError::closed().into());
        };
        let lent: Arc<[SourceId]> = lent.iter().copied().chain([id]).collect();
        return LENT.scope(lent, work(connection)).await;
    }

    let mut connection = source.acquire().await?;
    let result = work(&mut connection).await;
    source.release(connection).await;
    result
}

fn active_slot<C: Send + 'static>(source: SourceId) -> Option<Arc<Slot<C>>> {
    let unit = ExecutionUnit::current()?;
    let ambient = AmbientContext::current()?;
    ambient
        .transaction_for(source)
        .filter(|handle| handle.owner() == unit.id())
        .and_then(TransactionHandle::downcast::<Slot<C>>)
}

/// Rolls back a transaction whose block never finished.
struct RollbackGuard<S: ConnectionSource> {
    source: S,
    slot: Option<Arc<Slot<S::Connection>>>,
}

impl<S: ConnectionSource> RollbackGuard<S> {
    fn arm(source: S, slot: Arc<Slot<S::Connection>>) -> Self {
        Self {
            source,
            slot: Some(slot),
        }
    }

    fn disarm(&mut self) {
        self.slot = None;
    }
}

impl<S: ConnectionSource> Drop for RollbackGuard<S> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!("no runtime available to roll back an abandoned transaction");
            return;
        };
        let source = self.source.clone();
        runtime.spawn(async move {
            let Some(mut connection) = slot.lock().await.take() else {
                return;
            };
            match source.rollback(&mut connection).await {
                Ok(()) => debug!("abandoned transaction rolled back"),
                Err(err) => warn!(error = %err, "failed to roll back abandoned transaction"),
            }
            source.release(connection).await;
        });
    }
}
