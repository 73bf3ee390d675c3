//! Engine settings for one run.

use crate::script::{MergedFile, Script, DEFAULT_TOO_FEW, DEFAULT_TOO_MANY};
use std::path::PathBuf;

/// Default number of values per `IN (...)` batch.
pub const DEFAULT_IN_BATCH_SIZE: usize = 200;

/// Default directory for report files, relative to the working directory.
pub const DEFAULT_REPORT_DIR: &str = "reports";

/// Migration engine configuration.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Row count at or above which a full scan is preferred.
    pub too_many: usize,
    /// Row count at or below which a full scan is preferred.
    pub too_few: usize,
    /// Ask before continuing past issues and failed batches.
    pub prompt_on_issues: bool,
    /// Stop after validating file sources.
    pub validate_only: bool,
    /// Tolerate batches where only some rows fail.
    pub allow_partial_batch_success: bool,
    /// Values per `IN (...)` batch in reference-scoped queries.
    pub in_batch_size: usize,
    /// Directory receiving the diagnostic reports.
    pub report_dir: PathBuf,
    /// Objects whose source files are merged into one.
    pub merged_files: Vec<MergedFile>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            too_many: DEFAULT_TOO_MANY,
            too_few: DEFAULT_TOO_FEW,
            prompt_on_issues: true,
            validate_only: false,
            allow_partial_batch_success: true,
            in_batch_size: DEFAULT_IN_BATCH_SIZE,
            report_dir: PathBuf::from(DEFAULT_REPORT_DIR),
            merged_files: Vec::new(),
        }
    }
}

impl MigrationConfig {
    /// Take run settings from a script.
    pub fn from_script(script: &Script) -> Self {
        Self {
            too_many: script.full_scan_thresholds.too_many,
            too_few: script.full_scan_thresholds.too_few,
            prompt_on_issues: script.prompt_on_issues,
            validate_only: script.validate_only,
            allow_partial_batch_success: script.allow_partial_batch_success,
            merged_files: script.merged_files.clone(),
            ..Self::default()
        }
    }

    /// Set the report directory.
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    /// Set the full-scan thresholds.
    pub fn with_thresholds(mut self, too_many: usize, too_few: usize) -> Self {
        self.too_many = too_many;
        self.too_few = too_few;
        self
    }

    /// Enable or disable prompting.
    pub fn with_prompt(mut self, prompt: bool) -> Self {
        self.prompt_on_issues = prompt;
        self
    }

    /// Enable or disable validate-only mode.
    pub fn with_validate_only(mut self, validate_only: bool) -> Self {
        self.validate_only = validate_only;
        self
    }

    /// Set the `IN (...)` batch size.
    pub fn with_in_batch_size(mut self, size: usize) -> Self {
        self.in_batch_size = size.max(1);
        self
    }

    /// Whether `count` lies outside the thresholds.
    pub fn outside_thresholds(&self, count: usize) -> bool {
        count >= self.too_many || count <= self.too_few
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{Operation, ScriptObject};

    #[test]
    fn test_from_script() {
        let mut script = Script::new(vec![ScriptObject::new("SELECT Id FROM A", Operation::Insert)]);
        script.full_scan_thresholds.too_few = 3;
        script.prompt_on_issues = false;
        let config = MigrationConfig::from_script(&script);
        assert_eq!(config.too_few, 3);
        assert!(!config.prompt_on_issues);
        assert_eq!(config.in_batch_size, DEFAULT_IN_BATCH_SIZE);
    }

    #[test]
    fn test_thresholds() {
        let config = MigrationConfig::default().with_thresholds(100, 5);
        assert!(config.outside_thresholds(5));
        assert!(config.outside_thresholds(100));
        assert!(!config.outside_thresholds(50));
    }
}
