//! PostgreSQL persistence adapter.
//!
//! Provides the pooled [`ConnectionSource`](crate::domain::ports::ConnectionSource)
//! behind the transaction scope, using `diesel-async` with `bb8` pooling.
//!
//! # Example
//!
//! ```ignore
//! use execution_bridge::domain::in_transaction;
//! use execution_bridge::outbound::persistence::{DbPool, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/mydb")).await?;
//! in_transaction(&pool, || async { save_everything(&pool).await }).await?;
//! ```

mod pool;

pub use pool::{DbPool, PoolConfig, PoolError};
