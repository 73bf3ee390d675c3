//! Migration engine.
//!
//! A run moves records between two stores in four stages:
//! - [`ScriptCompiler`] turns the script into an [`ObjectGraph`] of plans,
//!   injecting lookup columns and synthesizing missing parents
//! - [`TaskPlanner`] orders the plans so parents are written before children
//! - [`FileReconciler`] repairs the record files of a file source
//! - [`MigrationExecutor`] deletes, retrieves and writes in five steps
//!
//! [`MigrationRunner`] chains the stages.
//!
//! # Example
//!
//! ```ignore
//! use recmig_core::migration::{ConfirmPolicy, MigrationRunner};
//!
//! let mut runner = MigrationRunner::from_script(script, Path::new("data"), None)?;
//! let report = runner.run(&mut ConfirmPolicy::AlwaysContinue)?;
//! println!("order: {}", report.order.join(" -> "));
//! ```

pub mod compiler;
pub mod config;
pub mod confirm;
pub mod diagnostics;
pub mod executor;
pub mod plan;
pub mod planner;
pub mod reconciler;
pub mod runner;

#[cfg(test)]
pub(crate) mod testing;

pub use compiler::ScriptCompiler;
pub use config::MigrationConfig;
pub use confirm::{Confirm, ConfirmPolicy, RecordedConfirm};
pub use diagnostics::{Diagnostics, IssueRow, MissingParentRow, Severity};
pub use executor::{MigrationExecutor, MigrationReport, TaskSummary, VolumePolicy};
pub use plan::{ExternalId, FieldPlan, ObjectGraph, ObjectPlan, PlanOrigin};
pub use planner::{DerivedField, Job, LinkPosition, Task, TaskPlanner};
pub use reconciler::{FileReconciler, ReconcileOutcome};
pub use runner::{open_store, MigrationRunner};
