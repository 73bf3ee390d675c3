//! Diagnostic reports written during a run.
//!
//! Two CSV reports with fixed headers: format issues found in source files
//! or raised by failed batches, and child records whose parent could not be
//! matched on the target.

use crate::error::{Error, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of the format issues report.
pub const ISSUES_REPORT_FILE: &str = "CSVIssuesReport.csv";

/// File name of the missing parent records report.
pub const MISSING_PARENTS_REPORT_FILE: &str = "MissingParentRecordsReport.csv";

const ISSUES_HEADERS: [&str; 8] = [
    "Date",
    "Severity",
    "Child sObject",
    "Child field",
    "Parent sObject",
    "Parent sObject external Id field",
    "Parent record Id",
    "Error",
];

const MISSING_PARENTS_HEADERS: [&str; 6] = [
    "Child record Id",
    "Child sObject",
    "Child external Id field",
    "Parent external Id field",
    "Parent sObject",
    "Missing value",
];

/// Severity of an issue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("WARNING"),
            Severity::Error => f.write_str("ERROR"),
        }
    }
}

/// A format issue or a failed batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueRow {
    pub date: String,
    pub severity: Severity,
    pub child_object: String,
    pub child_field: Option<String>,
    pub parent_object: Option<String>,
    pub parent_external_id: Option<String>,
    pub parent_record_id: Option<String>,
    pub description: String,
}

impl IssueRow {
    /// A warning about an object, stamped now.
    pub fn warning(child_object: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            date: now(),
            severity: Severity::Warning,
            child_object: child_object.into(),
            child_field: None,
            parent_object: None,
            parent_external_id: None,
            parent_record_id: None,
            description: description.into(),
        }
    }

    /// An error about an object, stamped now.
    pub fn error(child_object: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            ..Self::warning(child_object, description)
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.child_field = Some(field.into());
        self
    }

    pub fn with_parent(
        mut self,
        parent_object: impl Into<String>,
        parent_external_id: impl Into<String>,
    ) -> Self {
        self.parent_object = Some(parent_object.into());
        self.parent_external_id = Some(parent_external_id.into());
        self
    }

    pub fn with_parent_record(mut self, id: impl Into<String>) -> Self {
        self.parent_record_id = Some(id.into());
        self
    }

    fn cells(&self) -> [String; 8] {
        [
            self.date.clone(),
            self.severity.to_string(),
            self.child_object.clone(),
            self.child_field.clone().unwrap_or_default(),
            self.parent_object.clone().unwrap_or_default(),
            self.parent_external_id.clone().unwrap_or_default(),
            self.parent_record_id.clone().unwrap_or_default(),
            self.description.clone(),
        ]
    }
}

/// A child record whose parent is missing on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingParentRow {
    pub child_record_id: String,
    pub child_object: String,
    pub child_external_id: String,
    pub parent_external_id: String,
    pub parent_object: String,
    pub missing_value: String,
}

impl MissingParentRow {
    fn cells(&self) -> [String; 6] {
        [
            self.child_record_id.clone(),
            self.child_object.clone(),
            self.child_external_id.clone(),
            self.parent_external_id.clone(),
            self.parent_object.clone(),
            self.missing_value.clone(),
        ]
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accumulated diagnostics of a run.
#[derive(Debug)]
pub struct Diagnostics {
    report_dir: PathBuf,
    issues: Vec<IssueRow>,
    missing_parents: Vec<MissingParentRow>,
}

impl Diagnostics {
    /// Collect diagnostics to be written under `report_dir`.
    pub fn new(report_dir: impl Into<PathBuf>) -> Self {
        Self {
            report_dir: report_dir.into(),
            issues: Vec::new(),
            missing_parents: Vec::new(),
        }
    }

    /// Record an issue.
    pub fn issue(&mut self, row: IssueRow) {
        warn!(
            severity = %row.severity,
            object = %row.child_object,
            field = row.child_field.as_deref().unwrap_or(""),
            "{}",
            row.description
        );
        self.issues.push(row);
    }

    /// Record a missing parent.
    pub fn missing_parent(&mut self, row: MissingParentRow) {
        warn!(
            object = %row.child_object,
            record = %row.child_record_id,
            parent = %row.parent_object,
            value = %row.missing_value,
            "parent record not found on target"
        );
        self.missing_parents.push(row);
    }

    pub fn issues(&self) -> &[IssueRow] {
        &self.issues
    }

    pub fn missing_parents(&self) -> &[MissingParentRow] {
        &self.missing_parents
    }

    /// Number of issue rows recorded so far.
    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    /// Number of missing parent rows recorded so far.
    pub fn missing_parent_count(&self) -> usize {
        self.missing_parents.len()
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// Path of the issues report.
    pub fn issues_path(&self) -> PathBuf {
        self.report_dir.join(ISSUES_REPORT_FILE)
    }

    /// Path of the missing parents report.
    pub fn missing_parents_path(&self) -> PathBuf {
        self.report_dir.join(MISSING_PARENTS_REPORT_FILE)
    }

    /// Write the issues report.
    pub fn write_issues(&self) -> Result<()> {
        write_report(
            &self.report_dir,
            &self.issues_path(),
            &ISSUES_HEADERS,
            self.issues.iter().map(IssueRow::cells),
        )
    }

    /// Write the missing parents report.
    pub fn write_missing_parents(&self) -> Result<()> {
        write_report(
            &self.report_dir,
            &self.missing_parents_path(),
            &MISSING_PARENTS_HEADERS,
            self.missing_parents.iter().map(MissingParentRow::cells),
        )
    }

    /// Write both reports.
    pub fn flush(&self) -> Result<()> {
        self.write_issues()?;
        self.write_missing_parents()
    }
}

fn write_report<const N: usize>(
    dir: &Path,
    path: &Path,
    headers: &[&str; N],
    rows: impl Iterator<Item = [String; N]>,
) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let mut writer = csv::Writer::from_path(path).map_err(|e| Error::csv(path, e))?;
    writer
        .write_record(headers)
        .map_err(|e| Error::csv(path, e))?;
    for row in rows {
        writer.write_record(&row).map_err(|e| Error::csv(path, e))?;
    }
    writer.flush().map_err(|e| Error::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flush_writes_headers_even_when_empty() {
        let dir = TempDir::new().unwrap();
        let diagnostics = Diagnostics::new(dir.path().join("reports"));
        diagnostics.flush().unwrap();

        let issues = std::fs::read_to_string(diagnostics.issues_path()).unwrap();
        assert!(issues.starts_with("Date,Severity,Child sObject"));
        let missing = std::fs::read_to_string(diagnostics.missing_parents_path()).unwrap();
        assert_eq!(missing.lines().count(), 1);
    }

    #[test]
    fn test_issue_rows() {
        let dir = TempDir::new().unwrap();
        let mut diagnostics = Diagnostics::new(dir.path());
        diagnostics.issue(
            IssueRow::warning("Contact", "column missing")
                .with_field("Email")
                .with_parent("Account", "Code__c"),
        );
        diagnostics.issue(IssueRow::error("Contact", "batch 0 rejected"));
        diagnostics.write_issues().unwrap();

        let mut reader = csv::Reader::from_path(diagnostics.issues_path()).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "WARNING");
        assert_eq!(&rows[0][3], "Email");
        assert_eq!(&rows[0][5], "Code__c");
        assert_eq!(&rows[1][1], "ERROR");
        assert!(chrono::DateTime::parse_from_rfc3339(&rows[0][0]).is_ok());
    }
}
