//! Record store contract and the stores shipped with the engine.
//!
//! The engine talks to both sides of a run through [`RecordStore`]:
//! metadata, queries, batched writes and deletes. Writes and deletes report
//! per-batch results synchronously; the engine consumes each report before
//! issuing the next call.

pub mod file;
pub mod filter;
mod handle;
pub mod memory;

pub use file::{CsvTable, FileStore};
pub use filter::FilterEvaluator;
pub use handle::StoreHandle;
pub use memory::MemoryStore;

use crate::catalog::ObjectDescribe;
use crate::record::Record;
use recmig_query::Query;
use serde::Serialize;
use thiserror::Error;

/// Failure reported by a store call as a whole.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot run this kind of call.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Reading or writing the store's backing data failed.
    #[error("i/o failure: {0}")]
    Io(String),

    /// The store rejected the call.
    #[error("{0}")]
    Rejected(String),
}

/// Kind of write a store performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    /// Create new records; the store assigns identifiers.
    Insert,
    /// Update records by identifier.
    Update,
}

impl std::fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteOperation::Insert => f.write_str("insert"),
            WriteOperation::Update => f.write_str("update"),
        }
    }
}

/// Result of one write or delete batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch_id: usize,
    pub processed: usize,
    pub failed: usize,
    pub error: Option<String>,
}

impl BatchReport {
    /// Whether every row in the batch succeeded.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.error.is_none()
    }
}

/// Written records plus the per-batch reports.
///
/// `records` aligns with the rows passed to the write: each carries the
/// target identifier on success or an `Errors` field on failure.
#[derive(Debug, Clone, Default)]
pub struct WriteOutcome {
    pub records: Vec<Record>,
    pub batches: Vec<BatchReport>,
}

impl WriteOutcome {
    /// Number of rows that failed across all batches.
    pub fn failed(&self) -> usize {
        self.batches.iter().map(|b| b.failed).sum()
    }

    /// First batch error message, if any.
    pub fn first_error(&self) -> Option<&str> {
        self.batches.iter().find_map(|b| b.error.as_deref())
    }
}

/// The store contract used by the migration engine.
pub trait RecordStore {
    /// Describe an object type, or `None` if the store has no such type.
    fn describe(&mut self, object: &str) -> Result<Option<ObjectDescribe>, StoreError>;

    /// Run a query and return matching rows.
    fn query(&mut self, query: &Query) -> Result<Vec<Record>, StoreError>;

    /// Count rows matching a query's predicate.
    fn count(&mut self, query: &Query) -> Result<usize, StoreError> {
        Ok(self.query(&query.without_paging())?.len())
    }

    /// Write rows in batches of at most `batch_size` rows.
    fn write(
        &mut self,
        object: &str,
        rows: Vec<Record>,
        operation: WriteOperation,
        batch_size: usize,
    ) -> Result<WriteOutcome, StoreError>;

    /// Delete rows by identifier in batches of at most `batch_size` ids.
    fn delete(
        &mut self,
        object: &str,
        ids: Vec<String>,
        batch_size: usize,
    ) -> Result<Vec<BatchReport>, StoreError>;

    /// Raw table access, for stores backed by files.
    fn as_file_store(&mut self) -> Option<&mut FileStore> {
        None
    }

    /// Inspection access, for in-process stores.
    fn as_memory_store(&self) -> Option<&MemoryStore> {
        None
    }
}
