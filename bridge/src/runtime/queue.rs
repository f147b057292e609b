//! Fire-and-forget work queue.
//!
//! Jobs are submitted from any unit and drained by a dispatcher task on the
//! compute lane. Each job runs as its own [`UnitOrigin::Queued`] unit under
//! the context captured at submission, minus any open transaction. Failures
//! are logged, not returned, because nobody waits on a queued job.
//!
//! The backlog is bounded: once it is full, submissions are refused with
//! [`ErrorKind::TooManyRequests`](crate::domain::ErrorKind::TooManyRequests)
//! instead of growing without limit.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error};

use super::bridge::ExecutionBridge;
use crate::domain::{AmbientContext, Error, ExecutionUnit, UnitOrigin};

/// Jobs waiting for a permit before submissions are refused.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct Envelope {
    ctx: AmbientContext,
    job: BoxFuture<'static, Result<(), Error>>,
}

/// Handle for submitting background jobs.
///
/// Clones share the same queue. The dispatcher stops once every handle has
/// been dropped and the backlog is drained.
#[derive(Clone)]
pub struct WorkQueue {
    sender: mpsc::Sender<Envelope>,
}

impl WorkQueue {
    /// Start a queue whose jobs run on `bridge`, at most `concurrency` at a
    /// time, with a backlog of [`DEFAULT_QUEUE_CAPACITY`].
    pub fn start(bridge: &ExecutionBridge, concurrency: usize) -> Self {
        Self::with_capacity(bridge, concurrency, DEFAULT_QUEUE_CAPACITY)
    }

    /// Start a queue holding at most `capacity` jobs that are not yet running.
    pub fn with_capacity(bridge: &ExecutionBridge, concurrency: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        bridge
            .compute_handle()
            .spawn(dispatch(bridge.clone(), receiver, permits));
        Self { sender }
    }

    /// Submit a job under the caller's context.
    ///
    /// # Errors
    ///
    /// Returns a too-many-requests error when the backlog is full, or an
    /// internal error if the dispatcher has stopped.
    pub fn submit<F>(&self, job: F) -> Result<(), Error>
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let envelope = Envelope {
            ctx: AmbientContext::capture().without_transaction(),
            job: Box::pin(job),
        };
        self.sender.try_send(envelope).map_err(|err| match err {
            TrySendError::Full(_) => Error::too_many_requests("work queue is full"),
            TrySendError::Closed(_) => Error::internal("work queue is no longer accepting jobs"),
        })
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

async fn dispatch(
    bridge: ExecutionBridge,
    mut receiver: mpsc::Receiver<Envelope>,
    permits: Arc<Semaphore>,
) {
    while let Some(Envelope { ctx, job }) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let unit = ExecutionUnit::new(UnitOrigin::Queued);
        let report_ctx = ctx.clone();
        let outcome = bridge.spawn_unit(unit, ctx, job);
        bridge.compute_handle().spawn(async move {
            if let Err(err) = outcome.await {
                AmbientContext::sync_scope(report_ctx, || {
                    error!(unit = %unit.id(), error = %err, "queued job failed");
                });
            }
            drop(permit);
        });
    }
    debug!("work queue drained");
}
