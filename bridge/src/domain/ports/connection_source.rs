//! Driven port supplying transactional database connections.

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use super::define_port_error;

define_port_error! {
    /// Errors raised by connection sources and the transaction scope.
    pub enum TransactionError {
        /// No connection could be checked out.
        Acquire { message: String } =>
            "failed to acquire connection: {message}",
        /// The connection refused to open a transaction.
        Begin { message: String } =>
            "failed to begin transaction: {message}",
        /// The transaction could not be committed.
        Commit { message: String } =>
            "failed to commit transaction: {message}",
        /// The transaction could not be rolled back.
        Rollback { message: String } =>
            "failed to roll back transaction: {message}",
        /// A statement issued on the connection failed.
        Query { message: String } =>
            "query failed: {message}",
        /// The connection was already handed back.
        Closed =>
            "transaction connection is no longer available",
        /// The active transaction was opened by a different kind of source.
        ForeignHandle =>
            "active transaction belongs to a different connection source",
        /// The transaction connection is lent to an enclosing call.
        Busy =>
            "transaction connection is already in use by an enclosing call",
    }
}

/// Identity of one connection source.
///
/// Clones of a source share its identity; two independently constructed
/// sources never do. The transaction scope keys open transactions by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(Uuid);

impl SourceId {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Source of connections that can run one physical transaction at a time.
///
/// The transaction scope drives the lifecycle: `acquire`, `begin`, then
/// exactly one of `commit` or `rollback`, then `release`. Connections are
/// owned by one execution unit for that whole lifecycle.
#[async_trait]
pub trait ConnectionSource: Clone + Send + Sync + 'static {
    /// Connection type handed to repository code.
    type Connection: Send + 'static;

    /// Identity shared by this source and its clones.
    fn id(&self) -> SourceId;

    /// Check out a connection.
    async fn acquire(&self) -> Result<Self::Connection, TransactionError>;

    /// Open a transaction on `connection`.
    async fn begin(&self, connection: &mut Self::Connection) -> Result<(), TransactionError>;

    /// Commit the open transaction.
    async fn commit(&self, connection: &mut Self::Connection) -> Result<(), TransactionError>;

    /// Discard the open transaction.
    async fn rollback(&self, connection: &mut Self::Connection) -> Result<(), TransactionError>;

    /// Hand the connection back.
    async fn release(&self, connection: Self::Connection);
}
