//! Test utilities for the execution bridge.
//!
//! Shared by unit tests (in `src/`) and integration tests (in `tests/`).
//! Compiled only with the `test-support` feature, which the crate enables
//! for its own dev builds.

pub mod memory_db {
    //! In-memory connection source with per-transaction staging.
    //!
    //! The "table" is a list of integers. Writes made inside a transaction
    //! are staged on the connection and only reach the shared table on
    //! commit, so tests can observe atomicity, rollback and
    //! read-your-own-writes without a database server.

    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::FutureExt;

    use crate::domain::ports::{ConnectionSource, SourceId, TransactionError};
    use crate::domain::{Error, with_connection};

    /// Lifecycle event recorded by [`MemoryConnectionSource`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ConnectionEvent {
        /// Connection `n` was checked out.
        Acquired(u64),
        /// A transaction was opened on connection `n`.
        Began(u64),
        /// The transaction on connection `n` was committed.
        Committed(u64),
        /// The transaction on connection `n` was rolled back.
        RolledBack(u64),
        /// Connection `n` was handed back.
        Released(u64),
    }

    #[derive(Debug, Default)]
    struct State {
        committed: Vec<i64>,
        events: Vec<ConnectionEvent>,
        next_connection: u64,
        fail_acquire: bool,
        fail_rollback: bool,
        commit_delay: Option<Duration>,
    }

    /// Connection handed out by [`MemoryConnectionSource`].
    #[derive(Debug)]
    pub struct MemoryConnection {
        id: u64,
        state: Arc<Mutex<State>>,
        staged: Option<Vec<i64>>,
    }

    impl MemoryConnection {
        /// Connection number, in checkout order starting at 1.
        pub fn id(&self) -> u64 {
            self.id
        }

        /// Whether a transaction is open on this connection.
        pub fn in_transaction(&self) -> bool {
            self.staged.is_some()
        }

        /// Write a value; staged until commit inside a transaction.
        pub fn insert(&mut self, value: i64) {
            match self.staged.as_mut() {
                Some(staged) => staged.push(value),
                None => lock(&self.state).committed.push(value),
            }
        }

        /// Committed values followed by this connection's staged writes.
        pub fn values(&self) -> Vec<i64> {
            let mut values = lock(&self.state).committed.clone();
            values.extend(self.staged.iter().flatten().copied());
            values
        }
    }

    /// Cloneable in-memory [`ConnectionSource`].
    ///
    /// Clones share the table and the source identity; every call to
    /// [`MemoryConnectionSource::new`] yields an unrelated source.
    #[derive(Debug, Clone)]
    pub struct MemoryConnectionSource {
        id: SourceId,
        state: Arc<Mutex<State>>,
    }

    impl Default for MemoryConnectionSource {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MemoryConnectionSource {
        /// An empty table.
        pub fn new() -> Self {
            Self {
                id: SourceId::generate(),
                state: Arc::default(),
            }
        }

        /// Pause every commit for `delay` before applying it.
        pub fn with_commit_delay(self, delay: Duration) -> Self {
            lock(&self.state).commit_delay = Some(delay);
            self
        }

        /// Make every checkout fail.
        pub fn failing_acquire(self) -> Self {
            lock(&self.state).fail_acquire = true;
            self
        }

        /// Make every rollback fail after discarding the staged writes.
        pub fn failing_rollback(self) -> Self {
            lock(&self.state).fail_rollback = true;
            self
        }

        /// Values visible outside any transaction.
        pub fn committed(&self) -> Vec<i64> {
            lock(&self.state).committed.clone()
        }

        /// Lifecycle events in the order they happened.
        pub fn events(&self) -> Vec<ConnectionEvent> {
            lock(&self.state).events.clone()
        }

        /// Number of recorded events matching `predicate`.
        pub fn count(&self, predicate: impl Fn(&ConnectionEvent) -> bool) -> usize {
            lock(&self.state)
                .events
                .iter()
                .filter(|event| predicate(event))
                .count()
        }

        /// Repository-style write through the active connection.
        ///
        /// # Errors
        ///
        /// Returns an internal error when no connection can be acquired.
        pub async fn insert(&self, value: i64) -> Result<(), Error> {
            with_connection(self, move |conn: &mut MemoryConnection| {
                async move {
                    conn.insert(value);
                    Ok::<_, Error>(())
                }
                .boxed()
            })
            .await
        }

        /// Repository-style read through the active connection.
        ///
        /// # Errors
        ///
        /// Returns an internal error when no connection can be acquired.
        pub async fn values(&self) -> Result<Vec<i64>, Error> {
            with_connection(self, |conn: &mut MemoryConnection| {
                async move { Ok::<_, Error>(conn.values()) }.boxed()
            })
            .await
        }

        fn record(&self, event: ConnectionEvent) {
            lock(&self.state).events.push(event);
        }
    }

    #[async_trait]
    impl ConnectionSource for MemoryConnectionSource {
        type Connection = MemoryConnection;

        fn id(&self) -> SourceId {
            self.id
        }

        async fn acquire(&self) -> Result<MemoryConnection, TransactionError> {
            let mut state = lock(&self.state);
            if state.fail_acquire {
                return Err(TransactionError::acquire("memory source refused checkout"));
            }
            state.next_connection += 1;
            let id = state.next_connection;
            state.events.push(ConnectionEvent::Acquired(id));
            drop(state);
            Ok(MemoryConnection {
                id,
                state: Arc::clone(&self.state),
                staged: None,
            })
        }

        async fn begin(&self, conn: &mut MemoryConnection) -> Result<(), TransactionError> {
            conn.staged = Some(Vec::new());
            self.record(ConnectionEvent::Began(conn.id));
            Ok(())
        }

        async fn commit(&self, conn: &mut MemoryConnection) -> Result<(), TransactionError> {
            let delay = lock(&self.state).commit_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let staged = conn.staged.take().ok_or_else(TransactionError::closed)?;
            let mut state = lock(&self.state);
            state.committed.extend(staged);
            state.events.push(ConnectionEvent::Committed(conn.id));
            Ok(())
        }

        async fn rollback(&self, conn: &mut MemoryConnection) -> Result<(), TransactionError> {
            conn.staged = None;
            let mut state = lock(&self.state);
            state.events.push(ConnectionEvent::RolledBack(conn.id));
            if state.fail_rollback {
                return Err(TransactionError::rollback("memory source rollback failure"));
            }
            Ok(())
        }

        async fn release(&self, conn: MemoryConnection) {
            self.record(ConnectionEvent::Released(conn.id));
        }
    }

    fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
        state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub mod outbound {
    //! Outbound doubles: a scripted client and a recording sleeper.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::StreamExt;
    use url::Url;

    use crate::domain::Sleeper;
    use crate::domain::ports::{
        OutboundClient, OutboundError, ReceivedResponse, RequestSpec, StreamedResponse, Verb,
    };

    /// Sleeper that records requested pauses without waiting.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingSleeper {
        sleeps: Arc<Mutex<Vec<Duration>>>,
    }

    impl RecordingSleeper {
        /// Pauses requested so far.
        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(duration);
        }
    }

    /// Outcome of one scripted call: a status code or a failure.
    pub type Scripted = Result<u16, OutboundError>;

    /// [`OutboundClient`] replaying scripted outcomes in order.
    ///
    /// Once the script runs out every call yields the fallback, `Ok(200)`
    /// unless configured otherwise.
    #[derive(Debug)]
    pub struct ScriptedClient {
        script: Mutex<VecDeque<Scripted>>,
        fallback: Scripted,
        calls: AtomicUsize,
        verbs: Mutex<Vec<Verb>>,
    }

    impl ScriptedClient {
        /// Replay `outcomes`, then answer `200`.
        pub fn new(outcomes: impl IntoIterator<Item = Scripted>) -> Self {
            Self {
                script: Mutex::new(outcomes.into_iter().collect()),
                fallback: Ok(200),
                calls: AtomicUsize::new(0),
                verbs: Mutex::default(),
            }
        }

        /// Fail every call with `error`.
        pub fn always(error: OutboundError) -> Self {
            Self::new([]).with_fallback(Err(error))
        }

        /// Outcome used once the script is exhausted.
        pub fn with_fallback(mut self, fallback: Scripted) -> Self {
            self.fallback = fallback;
            self
        }

        /// Calls received so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Verbs of the calls received so far.
        pub fn verbs(&self) -> Vec<Verb> {
            self.verbs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn next(&self, verb: Verb) -> Scripted {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verbs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(verb);
            self.script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    #[async_trait]
    impl OutboundClient for ScriptedClient {
        async fn request(
            &self,
            verb: Verb,
            _url: &Url,
            spec: RequestSpec,
        ) -> Result<ReceivedResponse, OutboundError> {
            self.next(verb).map(|status| ReceivedResponse {
                status,
                headers: spec.headers,
                body: spec.body.unwrap_or_default(),
            })
        }

        async fn stream(
            &self,
            verb: Verb,
            _url: &Url,
            spec: RequestSpec,
        ) -> Result<StreamedResponse, OutboundError> {
            self.next(verb).map(|status| {
                let chunks = spec.body.into_iter().map(Ok).collect::<Vec<_>>();
                StreamedResponse {
                    status,
                    headers: spec.headers,
                    body: futures_util::stream::iter(chunks).boxed(),
                }
            })
        }
    }
}

pub mod harness {
    //! Run single computations on a reactor from synchronous tests.

    use std::future::Future;

    use tracing::warn;

    use crate::domain::{AmbientContext, Error, TraceContext};
    use crate::runtime::Reactor;

    /// Run `fut` to completion as a fresh request unit under a new root
    /// trace and return its outcome.
    ///
    /// # Errors
    ///
    /// Returns whatever the computation fails with.
    pub fn yield_single<T, F>(reactor: &Reactor, fut: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let ctx = AmbientContext::new(TraceContext::root());
        reactor.block_on(reactor.bridge().run(ctx, fut))
    }

    /// Run `fut` like [`yield_single`] and discard the outcome, logging any
    /// failure.
    pub fn execute_single<F>(reactor: &Reactor, fut: F)
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        if let Err(err) = yield_single(reactor, fut) {
            warn!(error = %err, "single computation failed");
        }
    }
}

pub use harness::{execute_single, yield_single};
pub use memory_db::{ConnectionEvent, MemoryConnection, MemoryConnectionSource};
pub use outbound::{RecordingSleeper, Scripted, ScriptedClient};
