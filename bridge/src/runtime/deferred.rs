//! Single-resolution deferred values.
//!
//! A [`Deferred`] is the reactor-native handle to work that finishes later.
//! It resolves exactly once, to a value or an [`Error`], and is consumed by
//! awaiting it. The producing side holds a [`Resolver`]; dropping the
//! resolver without resolving makes the deferred fail with a cancellation
//! error rather than hang.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::domain::Error;

enum State<T> {
    Ready(Option<Result<T, Error>>),
    Pending(oneshot::Receiver<Result<T, Error>>),
    Done,
}

/// A value of type `T` that becomes available later.
///
/// # Examples
/// ```
/// use execution_bridge::runtime::Deferred;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let (resolver, deferred) = Deferred::pending();
/// resolver.resolve(Ok(7));
/// assert_eq!(deferred.await.ok(), Some(7));
/// # });
/// ```
pub struct Deferred<T> {
    state: State<T>,
    abort: Option<AbortHandle>,
}

// The state is never structurally pinned.
impl<T> Unpin for Deferred<T> {}

impl<T> Deferred<T> {
    /// An already resolved success.
    pub fn value(value: T) -> Self {
        Self::from_result(Ok(value))
    }

    /// An already resolved failure.
    pub fn error(error: Error) -> Self {
        Self::from_result(Err(error))
    }

    /// An already resolved outcome.
    pub fn from_result(outcome: Result<T, Error>) -> Self {
        Self {
            state: State::Ready(Some(outcome)),
            abort: None,
        }
    }

    /// A deferred resolved later through the returned [`Resolver`].
    pub fn pending() -> (Resolver<T>, Self) {
        let (sender, receiver) = oneshot::channel();
        (
            Resolver { sender },
            Self {
                state: State::Pending(receiver),
                abort: None,
            },
        )
    }

    /// Stop the producing task, if it is still running.
    ///
    /// Awaiting a cancelled deferred yields a cancellation error unless the
    /// producer had already resolved it.
    pub fn cancel(&self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub(crate) fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }
}

impl<T: Send + 'static> Deferred<T> {
    /// Expose a computation as a deferred value. See [`super::as_deferred`].
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        super::as_deferred(fut)
    }

    /// Run a synchronous closure on the blocking lane. See [`super::blocking`].
    pub fn blocking<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<T, Error> + Send + 'static,
    {
        super::blocking(work)
    }

    /// Await the value, synthesising a unit of work if none is active.
    ///
    /// # Errors
    ///
    /// Returns the failure the deferred resolved to.
    pub async fn join(self) -> Result<T, Error> {
        super::await_deferred(self).await
    }

    /// Spawn `fut` on `runtime`, catching panics as internal failures.
    pub(crate) fn spawn_on<F>(runtime: &Handle, fut: F) -> Self
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let (resolver, deferred) = Self::pending();
        let task = runtime.spawn(async move {
            let outcome = AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(Error::from_panic(panic)));
            resolver.resolve(outcome);
        });
        deferred.with_abort(task.abort_handle())
    }
}

impl<T> Future for Deferred<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = match &mut this.state {
            State::Ready(slot) => slot.take(),
            State::Pending(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(received) => Some(received.unwrap_or_else(|_| Err(Error::cancelled()))),
            },
            State::Done => None,
        };
        this.state = State::Done;
        this.abort = None;
        Poll::Ready(outcome.unwrap_or_else(|| {
            Err(Error::internal("deferred value was already consumed"))
        }))
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Ready(_) => "ready",
            State::Pending(_) => "pending",
            State::Done => "done",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

/// Producing side of a pending [`Deferred`].
pub struct Resolver<T> {
    sender: oneshot::Sender<Result<T, Error>>,
}

impl<T> Resolver<T> {
    /// Resolve the paired deferred. Consumes the resolver, so a deferred
    /// can only ever be resolved once.
    pub fn resolve(self, outcome: Result<T, Error>) {
        if self.sender.send(outcome).is_err() {
            debug!("deferred value resolved after its consumer went away");
        }
    }

    /// Whether the consumer has already gone away.
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}
