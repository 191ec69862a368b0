//! Store abstractions used by the pipeline stages.
//!
//! - [`SourceStore`]: runs the extraction query and streams records
//! - [`TargetStore`]: describes the target relation and opens load sessions
//! - [`LoadSession`]: one transaction covering a whole load operation
//! - [`ObjectStore`]: flat namespace of immutable staged objects
//!
//! Stores are opaque external services. The pipeline only sees these traits,
//! so tests run the same stage code against in-memory implementations.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

use super::reject::RejectReason;
use super::schema::Schema;
use super::value::{Batch, Record};

/// Read records from a source store.
///
/// # Streaming
///
/// [`SourceStore::read`] returns a channel receiver. Implementations spawn a
/// background task that fills the channel, so a slow consumer applies
/// backpressure to the query.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Describe the result schema of a query.
    async fn describe(&self, query: &str) -> Result<Schema>;

    /// Count the records a query returns.
    async fn count(&self, query: &str) -> Result<u64>;

    /// Start streaming a query's records in batches.
    ///
    /// The receiver yields `Result<Batch>` until a batch marked `is_last`
    /// or an error.
    fn read(&self, query: &str, batch_size: usize) -> mpsc::Receiver<Result<Batch>>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Store type identifier (e.g. "postgres", "memory").
    fn store_type(&self) -> &str;
}

/// Outcome of inserting one record inside a load session.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    Rejected(RejectReason, String),
}

/// A single target transaction spanning one load operation.
///
/// Each insert is isolated: a rejected record leaves the session usable and
/// leaves no partial effect. Nothing is visible to other readers until
/// [`LoadSession::commit`]. Dropping a session without commit discards it.
#[async_trait]
pub trait LoadSession: Send {
    /// Remove all rows from the target relation inside the transaction.
    async fn truncate(&mut self) -> Result<()>;

    /// Insert one record.
    ///
    /// Record-level failures come back as [`InsertOutcome::Rejected`]. An
    /// `Err` means the session itself is unusable.
    async fn insert(&mut self, record: &Record) -> Result<InsertOutcome>;

    /// Commit the transaction, returning the number of inserted records.
    async fn commit(self: Box<Self>) -> Result<u64>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Write records into a target store.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Describe a target relation. A missing relation is a
    /// `TargetSchemaMismatch`.
    async fn describe(&self, table: &str) -> Result<Schema>;

    /// Current committed row count of a relation.
    async fn row_count(&self, table: &str) -> Result<u64>;

    /// Open a load session for a relation.
    async fn begin_load(&self, table: &str, schema: &Schema) -> Result<Box<dyn LoadSession>>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Store type identifier (e.g. "postgres", "memory").
    fn store_type(&self) -> &str;
}

/// Flat-namespace object storage holding staged shards.
///
/// Objects are immutable once written. Every call is authorized against the
/// store's access grant.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create an object. Fails with `WriteRejected` if the name exists.
    ///
    /// The object becomes visible only once the whole payload is stored.
    async fn put(&self, name: &str, data: Bytes) -> Result<()>;

    /// Read an object's full payload.
    async fn get(&self, name: &str) -> Result<Bytes>;

    /// List object names starting with `prefix`, sorted by name.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check whether an object exists.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Store type identifier (e.g. "fs", "memory").
    fn store_type(&self) -> &str;
}
