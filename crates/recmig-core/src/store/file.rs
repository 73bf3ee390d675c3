//! CSV-file record store.
//!
//! Each object lives in `<base>/<Object>.csv` with a header row. An optional
//! `schema.json` in the base directory describes the objects; without it the
//! store describes nothing and the compiler mirrors the other side. Cells may
//! be encrypted individually with a [`Cipher`].

use super::{BatchReport, FilterEvaluator, RecordStore, StoreError, WriteOperation, WriteOutcome};
use crate::catalog::{Catalog, ObjectDescribe};
use crate::crypto::Cipher;
use crate::error::{Error, Result};
use crate::record::{Record, Value, ERRORS_FIELD};
use recmig_query::Query;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File describing the objects of a file store.
pub const SCHEMA_FILE: &str = "schema.json";

/// Extension of record files.
pub const RECORD_FILE_EXTENSION: &str = "csv";

/// An in-memory copy of one record file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Record>,
}

impl CsvTable {
    /// Create an empty table with the given columns.
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    /// Append a column header unless present. Returns true if added.
    pub fn add_column(&mut self, column: &str) -> bool {
        if self.has_column(column) {
            return false;
        }
        self.headers.push(column.to_string());
        true
    }

    /// Drop a column from the header and every row.
    pub fn remove_column(&mut self, column: &str) {
        self.headers.retain(|h| h != column);
        for row in &mut self.rows {
            row.remove(column);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A directory of CSV record files.
#[derive(Debug)]
pub struct FileStore {
    base: PathBuf,
    catalog: Option<Catalog>,
    cipher: Option<Cipher>,
}

impl FileStore {
    /// Open a store rooted at `base`, creating the directory if needed.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base).map_err(|e| Error::io(&base, e))?;
        let schema_path = base.join(SCHEMA_FILE);
        let catalog = if schema_path.exists() {
            Some(Catalog::load(&schema_path)?)
        } else {
            None
        };
        Ok(Self {
            base,
            catalog,
            cipher: None,
        })
    }

    /// Encrypt and decrypt cells with this cipher.
    pub fn with_cipher(mut self, cipher: Cipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Use this catalog instead of `schema.json`.
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Path of an object's record file.
    pub fn path_for(&self, object: &str) -> PathBuf {
        self.base.join(format!("{object}.{RECORD_FILE_EXTENSION}"))
    }

    /// Read an object's file, or `None` if it does not exist.
    ///
    /// Empty cells read as null.
    pub fn read_table(&self, object: &str) -> Result<Option<CsvTable>> {
        let path = self.path_for(object);
        if !path.is_file() {
            return Ok(None);
        }
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .map_err(|e| Error::csv(&path, e))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| Error::csv(&path, e))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let cells = result.map_err(|e| Error::csv(&path, e))?;
            let mut row = Record::new();
            for (header, cell) in headers.iter().zip(cells.iter()) {
                row.set(header.as_str(), self.decode_cell(object, cell)?);
            }
            rows.push(row);
        }
        debug!(object, rows = rows.len(), path = %path.display(), "read record file");
        Ok(Some(CsvTable { headers, rows }))
    }

    /// Write an object's file, replacing any existing one.
    pub fn write_table(&self, object: &str, table: &CsvTable) -> Result<()> {
        let path = self.path_for(object);
        let mut writer = csv::Writer::from_path(&path).map_err(|e| Error::csv(&path, e))?;
        writer
            .write_record(&table.headers)
            .map_err(|e| Error::csv(&path, e))?;
        for row in &table.rows {
            let mut cells = Vec::with_capacity(table.headers.len());
            for header in &table.headers {
                let text = row.get(header).map(Value::to_text).unwrap_or_default();
                cells.push(self.encode_cell(&text)?);
            }
            writer.write_record(&cells).map_err(|e| Error::csv(&path, e))?;
        }
        writer.flush().map_err(|e| Error::io(&path, e))?;
        debug!(object, rows = table.rows.len(), path = %path.display(), "wrote record file");
        Ok(())
    }

    fn decode_cell(&self, object: &str, cell: &str) -> Result<Value> {
        if cell.is_empty() {
            return Ok(Value::Null);
        }
        match &self.cipher {
            Some(cipher) => cipher
                .decrypt(cell)
                .map(Value::String)
                .map_err(|e| Error::Crypto(format!("{}: {e}", self.path_for(object).display()))),
            None => Ok(Value::String(cell.to_string())),
        }
    }

    fn encode_cell(&self, text: &str) -> Result<String> {
        match &self.cipher {
            Some(cipher) if !text.is_empty() => cipher.encrypt(text),
            _ => Ok(text.to_string()),
        }
    }

    fn load_or_empty(&self, object: &str) -> std::result::Result<CsvTable, StoreError> {
        Ok(self
            .read_table(object)
            .map_err(|e| StoreError::Io(e.to_string()))?
            .unwrap_or_default())
    }
}

impl RecordStore for FileStore {
    fn describe(&mut self, object: &str) -> std::result::Result<Option<ObjectDescribe>, StoreError> {
        Ok(self.catalog.as_ref().and_then(|c| c.get(object).cloned()))
    }

    fn query(&mut self, query: &Query) -> std::result::Result<Vec<Record>, StoreError> {
        let table = self.load_or_empty(&query.object)?;
        let mut rows: Vec<Record> = match &query.filter {
            Some(condition) => table
                .rows
                .into_iter()
                .filter(|r| FilterEvaluator::evaluate(condition, &|f: &str| r.get(f).cloned()))
                .collect(),
            None => table.rows,
        };
        if !query.order_by.is_empty() {
            rows.sort_by(|a, b| {
                FilterEvaluator::compare_records(
                    &|f: &str| a.get(f).cloned(),
                    &|f: &str| b.get(f).cloned(),
                    &query.order_by,
                )
            });
        }
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|r| r.project(query.fields.iter().map(String::as_str)))
            .collect())
    }

    fn write(
        &mut self,
        object: &str,
        rows: Vec<Record>,
        operation: WriteOperation,
        _batch_size: usize,
    ) -> std::result::Result<WriteOutcome, StoreError> {
        let mut table = self.load_or_empty(object)?;
        let mut written = Vec::with_capacity(rows.len());
        let mut failed = 0;
        match operation {
            WriteOperation::Insert => {
                for row in rows {
                    for field in row.field_names() {
                        table.add_column(field);
                    }
                    table.rows.push(row.clone());
                    written.push(row);
                }
            }
            WriteOperation::Update => {
                let positions: HashMap<String, usize> = table
                    .rows
                    .iter()
                    .enumerate()
                    .filter_map(|(i, r)| r.id().map(|id| (id.to_string(), i)))
                    .collect();
                for row in rows {
                    let position = row.id().and_then(|id| positions.get(id).copied());
                    match position {
                        Some(i) => {
                            for field in row.field_names() {
                                table.add_column(field);
                            }
                            table.rows[i].merge_from(&row);
                            written.push(row);
                        }
                        None => {
                            failed += 1;
                            written.push(row.with(ERRORS_FIELD, "record not found"));
                        }
                    }
                }
            }
        }
        self.write_table(object, &table)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let report = BatchReport {
            batch_id: 0,
            processed: written.len(),
            failed,
            error: (failed > 0).then(|| format!("{failed} records not found")),
        };
        Ok(WriteOutcome {
            records: written,
            batches: vec![report],
        })
    }

    fn delete(
        &mut self,
        object: &str,
        ids: Vec<String>,
        _batch_size: usize,
    ) -> std::result::Result<Vec<BatchReport>, StoreError> {
        let mut table = self.load_or_empty(object)?;
        let before = table.rows.len();
        table
            .rows
            .retain(|r| r.id().map_or(true, |id| !ids.iter().any(|d| d == id)));
        let removed = before - table.rows.len();
        self.write_table(object, &table)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(vec![BatchReport {
            batch_id: 0,
            processed: removed,
            failed: ids.len().saturating_sub(removed),
            error: None,
        }])
    }

    fn as_file_store(&mut self) -> Option<&mut FileStore> {
        Some(self)
    }
}
