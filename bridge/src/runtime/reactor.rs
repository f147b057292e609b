//! Compute and blocking thread lanes.
//!
//! The reactor owns two Tokio runtimes. The compute lane runs request logic
//! as short non-blocking steps; the blocking lane's pool runs synchronous
//! work. Every thread is named after its lane and marks itself with a
//! thread-local [`Lane`] on start, so code (and tests) can tell which lane a
//! step is running on.

use std::cell::Cell;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use super::bridge::ExecutionBridge;

const DEFAULT_BLOCKING_THREADS: usize = 64;

thread_local! {
    static LANE: Cell<Option<Lane>> = const { Cell::new(None) };
}

/// Thread pool category a reactor thread belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Non-blocking request logic.
    Compute,
    /// Synchronous, thread-blocking work.
    Blocking,
}

impl Lane {
    /// Lane of the calling thread, or `None` outside the reactor.
    pub fn current() -> Option<Self> {
        LANE.with(Cell::get)
    }

    fn mark(self) {
        LANE.with(|lane| lane.set(Some(self)));
    }

    fn thread_prefix(self) -> &'static str {
        match self {
            Self::Compute => "bridge-compute",
            Self::Blocking => "bridge-blocking",
        }
    }
}

/// Errors raised while starting the reactor.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// A lane runtime could not be built.
    #[error("failed to build {lane:?} lane: {source}")]
    Build {
        /// Lane that failed to start.
        lane: Lane,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Thread counts for the two lanes.
///
/// # Example
///
/// ```ignore
/// let config = ReactorConfig::default()
///     .with_compute_threads(4)
///     .with_blocking_threads(16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    compute_threads: usize,
    blocking_threads: usize,
}

impl Default for ReactorConfig {
    /// Uses sensible defaults:
    /// - `compute_threads`: available parallelism
    /// - `blocking_threads`: 64
    fn default() -> Self {
        Self {
            compute_threads: thread::available_parallelism().map_or(1, |n| n.get()),
            blocking_threads: DEFAULT_BLOCKING_THREADS,
        }
    }
}

impl ReactorConfig {
    /// Set the number of compute-lane worker threads. At least one.
    pub fn with_compute_threads(mut self, threads: usize) -> Self {
        self.compute_threads = threads.max(1);
        self
    }

    /// Set the upper bound of the blocking-lane pool. At least one.
    pub fn with_blocking_threads(mut self, threads: usize) -> Self {
        self.blocking_threads = threads.max(1);
        self
    }

    /// Compute-lane worker threads.
    pub fn compute_threads(&self) -> usize {
        self.compute_threads
    }

    /// Blocking-lane pool bound.
    pub fn blocking_threads(&self) -> usize {
        self.blocking_threads
    }
}

/// Owner of the compute and blocking lanes.
///
/// Dropping the reactor shuts both lanes down without waiting for running
/// tasks.
pub struct Reactor {
    compute: Option<Runtime>,
    blocking: Option<Runtime>,
    bridge: ExecutionBridge,
}

impl Reactor {
    /// Start both lanes.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Build`] if either runtime cannot be created.
    pub fn new(config: &ReactorConfig) -> Result<Self, ReactorError> {
        let compute = lane_builder(Lane::Compute)
            .worker_threads(config.compute_threads)
            .build()
            .map_err(|source| ReactorError::Build {
                lane: Lane::Compute,
                source,
            })?;
        let blocking = lane_builder(Lane::Blocking)
            .worker_threads(1)
            .max_blocking_threads(config.blocking_threads)
            .build()
            .map_err(|source| ReactorError::Build {
                lane: Lane::Blocking,
                source,
            })?;
        debug!(
            compute_threads = config.compute_threads,
            blocking_threads = config.blocking_threads,
            "reactor started"
        );
        let bridge = ExecutionBridge::new(compute.handle().clone(), blocking.handle().clone());
        Ok(Self {
            compute: Some(compute),
            blocking: Some(blocking),
            bridge,
        })
    }

    /// Bridge scheduling onto this reactor's lanes.
    pub fn bridge(&self) -> ExecutionBridge {
        self.bridge.clone()
    }

    /// Drive `fut` to completion from a thread outside the reactor.
    ///
    /// The future itself is polled on the calling thread; use it to wait on
    /// the [`super::Deferred`] returned by [`ExecutionBridge::run`], whose
    /// computation runs on the compute lane.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.bridge.compute_handle().block_on(fut)
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        if let Some(runtime) = self.compute.take() {
            runtime.shutdown_background();
        }
        if let Some(runtime) = self.blocking.take() {
            runtime.shutdown_background();
        }
    }
}

fn lane_builder(lane: Lane) -> Builder {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut builder = Builder::new_multi_thread();
    builder
        .thread_name_fn(move || {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            format!("{}-{n}", lane.thread_prefix())
        })
        .on_thread_start(move || lane.mark())
        .enable_all();
    builder
}
