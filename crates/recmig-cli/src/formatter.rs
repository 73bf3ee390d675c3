//! Output formatters for run summaries.

use clap::ValueEnum;
use comfy_table::Table;
use recmig_core::MigrationReport;

/// Output format for run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Format a run summary.
pub fn format_report(report: &MigrationReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_table(report),
        OutputFormat::Json => {
            serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
        }
    }
}

fn format_table(report: &MigrationReport) -> String {
    let mut output = format!("Execution order: {}", report.order.join(" -> "));

    if report.validated_only {
        output.push_str("\nSource files validated; nothing was written.");
        return output;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Object",
        "Operation",
        "Source",
        "Target",
        "Read",
        "Matched",
        "Inserted",
        "Updated",
        "Deleted",
        "Missing parents",
        "Failed",
    ]);
    for task in &report.tasks {
        table.add_row(vec![
            task.object.clone(),
            task.operation.to_string(),
            task.source_policy.to_string(),
            task.target_policy.to_string(),
            task.source_rows.to_string(),
            task.target_rows.to_string(),
            task.inserted.to_string(),
            task.updated.to_string(),
            task.deleted.to_string(),
            task.missing_parents.to_string(),
            task.failed.to_string(),
        ]);
    }

    output.push('\n');
    output.push_str(&table.to_string());
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_report() {
        let report = MigrationReport::validated(vec!["Account".to_string(), "Contact".to_string()]);
        let output = format_report(&report, OutputFormat::Table);
        assert!(output.starts_with("Execution order: Account -> Contact"));
        assert!(output.contains("nothing was written"));
    }

    #[test]
    fn test_json_report() {
        let report = MigrationReport::validated(vec!["Account".to_string()]);
        let json: serde_json::Value =
            serde_json::from_str(&format_report(&report, OutputFormat::Json)).unwrap();
        assert_eq!(json["order"][0], "Account");
        assert_eq!(json["validated_only"], true);
    }
}
