//! The migration script document.
//!
//! A script lists the object types to migrate, each with a query and an
//! operation, plus run-wide settings. It is read from JSON with camelCase
//! keys; unknown keys are rejected.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default file name of the script inside a run directory.
pub const DEFAULT_SCRIPT_FILE: &str = "export.json";

/// Default polling interval for bulk jobs, in milliseconds.
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 5_000;

/// Default number of rows per write batch.
pub const DEFAULT_BULK_THRESHOLD: usize = 200;

/// Default row count at or above which a full scan is preferred.
pub const DEFAULT_TOO_MANY: usize = 100_000;

/// Default row count at or below which a full scan is preferred.
pub const DEFAULT_TOO_FEW: usize = 1_000;

/// Default store API version.
pub const DEFAULT_API_VERSION: &str = "59.0";

/// What the run does with an object's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Insert,
    Update,
    Upsert,
    /// Read for reference resolution only; never written.
    Readonly,
    /// Delete matching target records; nothing is migrated.
    Delete,
}

impl Operation {
    /// Whether the operation writes records to the target.
    pub fn writes(&self) -> bool {
        matches!(self, Operation::Insert | Operation::Update | Operation::Upsert)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Insert => "Insert",
            Operation::Update => "Update",
            Operation::Upsert => "Upsert",
            Operation::Readonly => "Readonly",
            Operation::Delete => "Delete",
        };
        f.write_str(name)
    }
}

/// Kind of record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// A remote store with its own identifiers.
    Live,
    /// A directory of CSV files.
    #[default]
    File,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Live => f.write_str("live"),
            StoreKind::File => f.write_str("file"),
        }
    }
}

/// Store credentials. Values may be encrypted with a password.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub instance_url: Option<String>,
}

impl Credentials {
    /// Whether no credential value is set.
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.password.is_none()
            && self.access_token.is_none()
            && self.instance_url.is_none()
    }
}

/// Selects the store on one side of the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StoreSelector {
    #[serde(default)]
    pub kind: StoreKind,
    /// Display name used in logs and errors.
    #[serde(default)]
    pub name: String,
    /// Directory of a file store, relative to the run directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub instance_url: Option<String>,
}

impl StoreSelector {
    /// Credentials carried by the selector.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            access_token: self.access_token.clone(),
            instance_url: self.instance_url.clone(),
        }
    }
}

/// Row-count thresholds outside which full scans are preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FullScanThresholds {
    pub too_many: usize,
    pub too_few: usize,
}

impl Default for FullScanThresholds {
    fn default() -> Self {
        Self {
            too_many: DEFAULT_TOO_MANY,
            too_few: DEFAULT_TOO_FEW,
        }
    }
}

/// Object types whose records are split across files but form one set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MergedFile {
    /// Name of the merged file, without extension.
    pub file: String,
    /// Objects whose files are merged, in precedence order.
    pub objects: Vec<String>,
}

/// One object entry of the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScriptObject {
    /// Optional object name; must match the query's FROM clause.
    #[serde(default)]
    pub name: Option<String>,
    pub query: String,
    #[serde(default)]
    pub delete_query: Option<String>,
    pub operation: Operation,
    /// External id field, or several joined with `;`.
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub excluded: bool,
    #[serde(default)]
    pub delete_old_data: bool,
    #[serde(default)]
    pub use_full_scan: bool,
    #[serde(default)]
    pub use_full_scan_on_target: bool,
}

impl ScriptObject {
    /// Create an entry from a query and an operation.
    pub fn new(query: impl Into<String>, operation: Operation) -> Self {
        Self {
            name: None,
            query: query.into(),
            delete_query: None,
            operation,
            external_id: None,
            excluded: false,
            delete_old_data: false,
            use_full_scan: false,
            use_full_scan_on_target: false,
        }
    }

    /// Set the external id.
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Delete old target data before writing.
    pub fn with_delete_old_data(mut self, delete_query: Option<&str>) -> Self {
        self.delete_old_data = true;
        self.delete_query = delete_query.map(str::to_string);
        self
    }

    /// Mark the entry excluded.
    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }

    /// Force a full scan on the source and the target.
    pub fn with_full_scan(mut self) -> Self {
        self.use_full_scan = true;
        self.use_full_scan_on_target = true;
        self
    }
}

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_MS
}

fn default_bulk_threshold() -> usize {
    DEFAULT_BULK_THRESHOLD
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

/// The whole script document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Script {
    pub objects: Vec<ScriptObject>,
    #[serde(default)]
    pub source: StoreSelector,
    #[serde(default)]
    pub target: StoreSelector,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_bulk_threshold")]
    pub bulk_threshold: usize,
    #[serde(default)]
    pub full_scan_thresholds: FullScanThresholds,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_true")]
    pub prompt_on_issues: bool,
    #[serde(default)]
    pub validate_only: bool,
    #[serde(default)]
    pub encrypt_data_files: bool,
    #[serde(default = "default_true")]
    pub allow_partial_batch_success: bool,
    #[serde(default)]
    pub merged_files: Vec<MergedFile>,
}

impl Script {
    /// Create a script with default settings.
    pub fn new(objects: Vec<ScriptObject>) -> Self {
        Self {
            objects,
            source: StoreSelector::default(),
            target: StoreSelector::default(),
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            bulk_threshold: DEFAULT_BULK_THRESHOLD,
            full_scan_thresholds: FullScanThresholds::default(),
            api_version: default_api_version(),
            prompt_on_issues: true,
            validate_only: false,
            encrypt_data_files: false,
            allow_partial_batch_success: true,
            merged_files: Vec::new(),
        }
    }

    /// Parse a script from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let script: Script = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid script: {e}")))?;
        script.validate()?;
        Ok(script)
    }

    /// Load a script from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let script: Script = serde_json::from_str(&text).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        script.validate()?;
        Ok(script)
    }

    fn validate(&self) -> Result<()> {
        if self.objects.is_empty() {
            return Err(Error::Config("script has no objects".to_string()));
        }
        if self.bulk_threshold == 0 {
            return Err(Error::Config("bulkThreshold must be positive".to_string()));
        }
        for merged in &self.merged_files {
            if merged.objects.is_empty() {
                return Err(Error::Config(format!(
                    "merged file {} lists no objects",
                    merged.file
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_script() {
        let script = Script::from_json(
            r#"{"objects":[{"query":"SELECT Id, Name FROM Account","operation":"Upsert"}]}"#,
        )
        .unwrap();
        assert_eq!(script.objects[0].operation, Operation::Upsert);
        assert_eq!(script.bulk_threshold, DEFAULT_BULK_THRESHOLD);
        assert!(script.prompt_on_issues);
        assert_eq!(script.source.kind, StoreKind::File);
    }

    #[test]
    fn test_parse_full_settings() {
        let script = Script::from_json(
            r#"{
                "objects": [{"query": "SELECT Id FROM Contact", "operation": "Delete",
                             "deleteOldData": true, "externalId": "Email;LastName"}],
                "source": {"kind": "file", "name": "csv", "path": "data"},
                "target": {"kind": "live", "name": "prod", "username": "u", "password": "p"},
                "fullScanThresholds": {"tooMany": 10, "tooFew": 2},
                "mergedFiles": [{"file": "UserAndGroup", "objects": ["User", "Group"]}]
            }"#,
        )
        .unwrap();
        assert_eq!(script.target.kind, StoreKind::Live);
        assert_eq!(script.target.credentials().username.as_deref(), Some("u"));
        assert_eq!(script.full_scan_thresholds.too_few, 2);
        assert_eq!(script.merged_files[0].objects.len(), 2);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Script::from_json(
            r#"{"objects":[{"query":"SELECT Id FROM A","operation":"Insert","bogus":1}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let err = Script::from_json(r#"{"objects":[{"query":"SELECT Id FROM A","operation":"Merge"}]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_objects_rejected() {
        assert!(Script::from_json(r#"{"objects":[]}"#).is_err());
    }
}
