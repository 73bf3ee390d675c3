//! In-process record store with live-store semantics.
//!
//! Assigns fresh identifiers on insert, resolves relationship paths such as
//! `Account__r.Code__c` through reference fields, validates written fields
//! against its catalog and splits writes into batches. Batches and whole
//! objects can be made to fail on demand.

use super::{BatchReport, FilterEvaluator, RecordStore, StoreError, WriteOperation, WriteOutcome};
use crate::catalog::{Catalog, ObjectDescribe};
use crate::record::{Record, Value, ERRORS_FIELD, ID_FIELD};
use recmig_query::Query;
use std::collections::{HashMap, HashSet};

/// A write call as received by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub object: String,
    pub operation: WriteOperation,
    pub rows: Vec<Record>,
}

/// An in-memory store keyed by object name.
#[derive(Debug)]
pub struct MemoryStore {
    catalog: Catalog,
    tables: HashMap<String, Vec<Record>>,
    next_id: u64,
    failing_batches: HashSet<(String, usize)>,
    locked: HashSet<String>,
    queries: Vec<String>,
    writes: Vec<WriteCall>,
    deletes: Vec<(String, Vec<String>)>,
}

impl MemoryStore {
    /// Create an empty store over a catalog.
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            tables: HashMap::new(),
            next_id: 1,
            failing_batches: HashSet::new(),
            locked: HashSet::new(),
            queries: Vec::new(),
            writes: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Seed an object's records as stored, identifiers included.
    pub fn with_records(mut self, object: &str, records: Vec<Record>) -> Self {
        self.tables.entry(object.to_string()).or_default().extend(records);
        self
    }

    /// Make batch `batch_id` of every later write or delete on `object` fail.
    pub fn fail_batch(&mut self, object: &str, batch_id: usize) {
        self.failing_batches.insert((object.to_string(), batch_id));
    }

    /// Reject every later write or delete call on `object` as a whole.
    pub fn lock(&mut self, object: &str) {
        self.locked.insert(object.to_string());
    }

    /// Stored records of an object.
    pub fn records(&self, object: &str) -> &[Record] {
        self.tables.get(object).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Find a stored record by field value.
    pub fn find(&self, object: &str, field: &str, value: &str) -> Option<&Record> {
        self.records(object)
            .iter()
            .find(|r| r.text(field).as_deref() == Some(value))
    }

    /// Query texts received, in order.
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    /// Write calls received, in order.
    pub fn writes(&self) -> &[WriteCall] {
        &self.writes
    }

    /// Delete calls received, in order.
    pub fn deletes(&self) -> &[(String, Vec<String>)] {
        &self.deletes
    }

    fn describe_of(&self, object: &str) -> Result<&ObjectDescribe, StoreError> {
        self.catalog
            .get(object)
            .ok_or_else(|| StoreError::Rejected(format!("unknown object {object}")))
    }

    fn check_unlocked(&self, object: &str) -> Result<(), StoreError> {
        if self.locked.contains(object) {
            return Err(StoreError::Rejected(format!("{object} is locked")));
        }
        Ok(())
    }

    fn resolve(&self, object: &str, record: &Record, path: &str) -> Option<Value> {
        match path.split_once('.') {
            None => record.get(path).cloned(),
            Some((relationship, rest)) => {
                let field = self.catalog.get(object)?.field_by_relationship(relationship)?;
                let parent_object = field.reference_to.as_deref()?;
                let parent_id = record.text(&field.name)?;
                let parent = self
                    .records(parent_object)
                    .iter()
                    .find(|r| r.id() == Some(parent_id.as_str()))?;
                self.resolve(parent_object, parent, rest)
            }
        }
    }

    fn new_id(&mut self, object: &str) -> String {
        let prefix: String = object
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(3)
            .collect::<String>()
            .to_ascii_uppercase();
        let id = format!("{prefix:0<3}{:012}", self.next_id);
        self.next_id += 1;
        id
    }

    /// Reject fields the object does not have or that cannot be written.
    fn check_fields(describe: &ObjectDescribe, row: &Record) -> Option<String> {
        for name in row.field_names() {
            if name == ID_FIELD {
                continue;
            }
            match describe.field(name) {
                None => return Some(format!("no such field {}.{name}", describe.name)),
                Some(field) if !field.is_writable() => {
                    return Some(format!("field {}.{name} is not writable", describe.name))
                }
                Some(_) => {}
            }
        }
        None
    }

    fn write_row(
        &mut self,
        object: &str,
        row: Record,
        operation: WriteOperation,
    ) -> Result<Record, String> {
        let describe = self.describe_of(object).map_err(|e| e.to_string())?;
        if let Some(problem) = Self::check_fields(describe, &row) {
            return Err(problem);
        }
        match operation {
            WriteOperation::Insert => {
                let id = self.new_id(object);
                let mut stored = Record::with_id(id);
                for (field, value) in row.iter().filter(|(f, _)| *f != ID_FIELD) {
                    stored.set(field, value.clone());
                }
                self.tables
                    .entry(object.to_string())
                    .or_default()
                    .push(stored.clone());
                Ok(stored)
            }
            WriteOperation::Update => {
                let id = row.id().ok_or("missing record id")?.to_string();
                let stored = self
                    .tables
                    .get_mut(object)
                    .and_then(|rows| rows.iter_mut().find(|r| r.id() == Some(id.as_str())))
                    .ok_or_else(|| format!("record {id} not found"))?;
                stored.merge_from(&row);
                Ok(stored.clone())
            }
        }
    }
}

impl RecordStore for MemoryStore {
    fn describe(&mut self, object: &str) -> Result<Option<ObjectDescribe>, StoreError> {
        Ok(self.catalog.get(object).cloned())
    }

    fn query(&mut self, query: &Query) -> Result<Vec<Record>, StoreError> {
        self.queries.push(query.to_string());
        let describe = self.describe_of(&query.object)?;
        let object = query.object.as_str();

        let mut rows: Vec<&Record> = self
            .records(object)
            .iter()
            .filter(|r| match &query.filter {
                Some(condition) => {
                    FilterEvaluator::evaluate(condition, &|f: &str| self.resolve(object, r, f))
                }
                None => true,
            })
            .collect();
        if !query.order_by.is_empty() {
            rows.sort_by(|a, b| {
                FilterEvaluator::compare_records(
                    &|f: &str| self.resolve(object, a, f),
                    &|f: &str| self.resolve(object, b, f),
                    &query.order_by,
                )
            });
        }

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for row in rows.into_iter().skip(offset).take(limit) {
            let mut projected = Record::new();
            for field in &query.fields {
                match self.resolve(object, row, field) {
                    Some(value) => projected.set(field.as_str(), value),
                    None if field.contains('.') || describe.has_field(field) => {
                        projected.set(field.as_str(), Value::Null)
                    }
                    None => {
                        return Err(StoreError::Rejected(format!(
                            "no such field {object}.{field}"
                        )))
                    }
                }
            }
            out.push(projected);
        }
        Ok(out)
    }

    fn write(
        &mut self,
        object: &str,
        rows: Vec<Record>,
        operation: WriteOperation,
        batch_size: usize,
    ) -> Result<WriteOutcome, StoreError> {
        self.describe_of(object)?;
        self.check_unlocked(object)?;
        self.writes.push(WriteCall {
            object: object.to_string(),
            operation,
            rows: rows.clone(),
        });

        let mut outcome = WriteOutcome::default();
        let batch_size = batch_size.max(1);
        let mut rows = rows.into_iter().peekable();
        let mut batch_id = 0;
        while rows.peek().is_some() {
            let batch: Vec<Record> = rows.by_ref().take(batch_size).collect();
            let mut report = BatchReport {
                batch_id,
                processed: batch.len(),
                ..Default::default()
            };
            if self.failing_batches.contains(&(object.to_string(), batch_id)) {
                report.failed = batch.len();
                report.error = Some(format!("batch {batch_id} rejected"));
                outcome.records.extend(
                    batch
                        .into_iter()
                        .map(|r| r.with(ERRORS_FIELD, "batch rejected")),
                );
            } else {
                for row in batch {
                    match self.write_row(object, row.clone(), operation) {
                        Ok(stored) => outcome.records.push(stored),
                        Err(problem) => {
                            report.failed += 1;
                            report.error.get_or_insert_with(|| problem.clone());
                            outcome.records.push(row.with(ERRORS_FIELD, problem));
                        }
                    }
                }
            }
            outcome.batches.push(report);
            batch_id += 1;
        }
        Ok(outcome)
    }

    fn delete(
        &mut self,
        object: &str,
        ids: Vec<String>,
        batch_size: usize,
    ) -> Result<Vec<BatchReport>, StoreError> {
        self.describe_of(object)?;
        self.check_unlocked(object)?;
        self.deletes.push((object.to_string(), ids.clone()));

        let mut reports = Vec::new();
        for (batch_id, batch) in ids.chunks(batch_size.max(1)).enumerate() {
            let mut report = BatchReport {
                batch_id,
                processed: batch.len(),
                ..Default::default()
            };
            if self.failing_batches.contains(&(object.to_string(), batch_id)) {
                report.failed = batch.len();
                report.error = Some(format!("batch {batch_id} rejected"));
            } else if let Some(rows) = self.tables.get_mut(object) {
                rows.retain(|r| r.id().map_or(true, |id| !batch.iter().any(|d| d == id)));
            }
            reports.push(report);
        }
        Ok(reports)
    }

    fn as_memory_store(&self) -> Option<&MemoryStore> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldDescribe;

    fn store() -> MemoryStore {
        let catalog = Catalog::new()
            .with_object(ObjectDescribe::new("Account").with_fields(["Id", "Name", "Code__c"]))
            .with_object(
                ObjectDescribe::new("Contact")
                    .with_fields(["Id", "LastName"])
                    .with_field(FieldDescribe::reference("Account__c", "Account"))
                    .with_field(FieldDescribe::readonly("CreatedDate")),
            );
        MemoryStore::new(catalog)
            .with_records(
                "Account",
                vec![Record::with_id("ACC1").with("Name", "Acme").with("Code__c", "A-1")],
            )
            .with_records(
                "Contact",
                vec![Record::with_id("CON1")
                    .with("LastName", "Doe")
                    .with("Account__c", "ACC1")],
            )
    }

    #[test]
    fn test_relationship_paths() {
        let mut store = store();
        let query = recmig_query::parse(
            "SELECT Id, Account__r.Code__c FROM Contact WHERE Account__r.Name = 'Acme'",
        )
        .unwrap();
        let rows = store.query(&query).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("Account__r.Code__c").as_deref(), Some("A-1"));
    }

    #[test]
    fn test_insert_assigns_ids() {
        let mut store = store();
        let outcome = store
            .write(
                "Account",
                vec![Record::with_id("SRC9").with("Name", "Globex")],
                WriteOperation::Insert,
                10,
            )
            .unwrap();
        let id = outcome.records[0].id().unwrap().to_string();
        assert_ne!(id, "SRC9");
        assert!(id.starts_with("ACC"));
        assert!(store.find("Account", "Name", "Globex").is_some());
    }

    #[test]
    fn test_rejects_unknown_and_readonly_fields() {
        let mut store = store();
        let outcome = store
            .write(
                "Contact",
                vec![
                    Record::new().with("Account__r.Code__c", "A-1"),
                    Record::new().with("CreatedDate", "2024-01-01"),
                    Record::new().with("LastName", "Roe"),
                ],
                WriteOperation::Insert,
                10,
            )
            .unwrap();
        assert_eq!(outcome.failed(), 2);
        assert!(outcome.records[0].error().is_some());
        assert!(outcome.records[2].id().is_some());
    }

    #[test]
    fn test_failing_batch() {
        let mut store = store();
        store.fail_batch("Account", 1);
        let outcome = store
            .write(
                "Account",
                vec![Record::new().with("Name", "B"), Record::new().with("Name", "C")],
                WriteOperation::Insert,
                1,
            )
            .unwrap();
        assert_eq!(outcome.batches.len(), 2);
        assert!(outcome.batches[0].is_success());
        assert_eq!(outcome.batches[1].failed, 1);
        assert_eq!(store.records("Account").len(), 2);
    }

    #[test]
    fn test_delete_by_id() {
        let mut store = store();
        let reports = store.delete("Contact", vec!["CON1".to_string()], 10).unwrap();
        assert_eq!(reports.len(), 1);
        assert!(store.records("Contact").is_empty());
        assert_eq!(store.deletes().len(), 1);
    }

    #[test]
    fn test_locked_object_rejects_calls() {
        let mut store = store();
        store.lock("Account");
        let err = store
            .write("Account", vec![Record::new().with("Name", "B")], WriteOperation::Insert, 10)
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(store.delete("Account", vec!["ACC1".to_string()], 10).is_err());
        assert!(store.writes().is_empty());
        assert_eq!(store.records("Account").len(), 1);
    }
}
