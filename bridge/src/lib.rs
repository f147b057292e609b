//! Execution bridge between a two-lane Tokio reactor and request-scoped
//! asynchronous computations.
//!
//! - [`runtime`] owns the compute and blocking lanes and the [`Deferred`]
//!   single-resolution value that crosses between them.
//! - [`domain`] holds the ambient context carried by every computation, the
//!   reentrant transaction scope, the retry policy and the domain error.
//! - [`outbound`] adapts reqwest and a Diesel connection pool to the domain
//!   ports; [`inbound`] is the actix-web edge with error classification.

pub mod config;
pub mod domain;
pub mod inbound;
pub mod outbound;
pub mod runtime;
pub mod telemetry;
#[cfg(feature = "test-support")]
pub mod test_support;

pub use domain::{AmbientContext, Error, ErrorKind, in_transaction, with_connection};
pub use runtime::{Deferred, ExecutionBridge, Reactor, ReactorConfig};
