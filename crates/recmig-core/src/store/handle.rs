//! A connection to one side of a run.

use super::{BatchReport, FileStore, MemoryStore, RecordStore, WriteOperation, WriteOutcome};
use crate::catalog::ObjectDescribe;
use crate::error::{Error, Result};
use crate::record::Record;
use crate::script::{
    Credentials, StoreKind, DEFAULT_API_VERSION, DEFAULT_BULK_THRESHOLD, DEFAULT_POLLING_INTERVAL_MS,
};
use recmig_query::Query;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// One side of a run: a store plus its descriptor and metadata cache.
///
/// Store failures are converted to [`Error::Run`] naming the object.
pub struct StoreHandle {
    kind: StoreKind,
    name: String,
    base_path: Option<PathBuf>,
    credentials: Credentials,
    api_version: String,
    polling_interval: Duration,
    batch_size: usize,
    store: Box<dyn RecordStore>,
    describe_cache: HashMap<String, Option<ObjectDescribe>>,
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("base_path", &self.base_path)
            .field("api_version", &self.api_version)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl StoreHandle {
    /// Wrap a store.
    pub fn new(kind: StoreKind, name: impl Into<String>, store: Box<dyn RecordStore>) -> Self {
        Self {
            kind,
            name: name.into(),
            base_path: None,
            credentials: Credentials::default(),
            api_version: DEFAULT_API_VERSION.to_string(),
            polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            batch_size: DEFAULT_BULK_THRESHOLD,
            store,
            describe_cache: HashMap::new(),
        }
    }

    /// Open a file store rooted at `base`.
    pub fn file(name: impl Into<String>, store: FileStore) -> Self {
        let base = store.base().to_path_buf();
        Self::new(StoreKind::File, name, Box::new(store)).with_base_path(base)
    }

    /// Wrap a live store.
    pub fn live(name: impl Into<String>, store: impl RecordStore + 'static) -> Self {
        Self::new(StoreKind::Live, name, Box::new(store))
    }

    /// Set the base path.
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Set the credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the API version.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Set the polling interval used by bulk jobs.
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Set the number of rows per write or delete batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.set_batch_size(batch_size);
        self
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size.max(1);
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_file(&self) -> bool {
        self.kind == StoreKind::File
    }

    pub fn is_live(&self) -> bool {
        self.kind == StoreKind::Live
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    /// Describe an object, caching the answer for the rest of the run.
    pub fn describe(&mut self, object: &str) -> Result<Option<ObjectDescribe>> {
        if let Some(cached) = self.describe_cache.get(object) {
            return Ok(cached.clone());
        }
        let describe = self
            .store
            .describe(object)
            .map_err(|e| Error::run(object, e))?;
        self.describe_cache
            .insert(object.to_string(), describe.clone());
        Ok(describe)
    }

    /// Run a query.
    pub fn query(&mut self, query: &Query) -> Result<Vec<Record>> {
        debug!(store = %self.name, query = %query, "query");
        self.store
            .query(query)
            .map_err(|e| Error::run(&query.object, e))
    }

    /// Count rows matching a query.
    pub fn count(&mut self, query: &Query) -> Result<usize> {
        self.store
            .count(query)
            .map_err(|e| Error::run(&query.object, e))
    }

    /// Write rows.
    pub fn write(
        &mut self,
        object: &str,
        rows: Vec<Record>,
        operation: WriteOperation,
    ) -> Result<WriteOutcome> {
        debug!(store = %self.name, object, rows = rows.len(), %operation, batch_size = self.batch_size, "write");
        self.store
            .write(object, rows, operation, self.batch_size)
            .map_err(|e| Error::run(object, e))
    }

    /// Delete rows by identifier.
    pub fn delete(&mut self, object: &str, ids: Vec<String>) -> Result<Vec<BatchReport>> {
        debug!(store = %self.name, object, rows = ids.len(), "delete");
        self.store
            .delete(object, ids, self.batch_size)
            .map_err(|e| Error::run(object, e))
    }

    /// The underlying file store, if this handle wraps one.
    pub fn file_store(&mut self) -> Option<&mut FileStore> {
        self.store.as_file_store()
    }

    /// The underlying memory store, if this handle wraps one.
    pub fn memory_store(&self) -> Option<&MemoryStore> {
        self.store.as_memory_store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::store::MemoryStore;

    #[test]
    fn test_describe_is_cached() {
        let catalog = Catalog::new().with_object(ObjectDescribe::new("Account").with_fields(["Id"]));
        let mut handle = StoreHandle::live("org", MemoryStore::new(catalog));
        assert!(handle.describe("Account").unwrap().is_some());
        assert!(handle.describe("Missing").unwrap().is_none());
        assert_eq!(handle.describe_cache.len(), 2);
        assert!(handle.is_live());
        assert!(handle.file_store().is_none());
    }

    #[test]
    fn test_writes_split_by_batch_size() {
        let catalog =
            Catalog::new().with_object(ObjectDescribe::new("Account").with_fields(["Id", "Name"]));
        let mut handle = StoreHandle::live("org", MemoryStore::new(catalog)).with_batch_size(2);
        let rows = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|name| Record::new().with("Name", *name))
            .collect();
        let outcome = handle.write("Account", rows, WriteOperation::Insert).unwrap();

        let sizes: Vec<usize> = outcome.batches.iter().map(|b| b.processed).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(handle.memory_store().unwrap().records("Account").len(), 5);
    }
}
