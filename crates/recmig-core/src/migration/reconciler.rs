//! Source file repair before a run.
//!
//! Record files exported by hand rarely carry the lookup columns the
//! executor matches references through. The reconciler fills them by
//! joining each child file with its parent file, expands compound columns,
//! merges split files and reports everything it could not fix.

use super::config::MigrationConfig;
use super::confirm::Confirm;
use super::diagnostics::{Diagnostics, IssueRow};
use super::plan::{ObjectPlan, RECORD_TYPE_EXTERNAL_ID};
use super::planner::{DerivedField, Job};
use crate::error::{Error, Result};
use crate::record::{Record, Value};
use crate::script::{MergedFile, Operation};
use crate::store::{CsvTable, FileStore};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use tracing::{debug, info};

/// Separates the lookup field from the temp field in a compound column.
pub const COMPOUND_COLUMN_SEPARATOR: char = '!';

/// Identifier written into an empty lookup field of an expanded compound
/// column, so the row still counts as referencing a parent.
pub const PLACEHOLDER_RECORD_ID: &str = "000000000000000AAA";

/// How the run continues after reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Continue,
    /// Validate-only run: stop successfully.
    ValidatedOnly,
}

/// Repairs the record files of a file source.
pub struct FileReconciler<'a> {
    job: &'a Job,
    store: &'a FileStore,
    config: &'a MigrationConfig,
    tables: HashMap<String, Option<CsvTable>>,
    dirty: IndexSet<String>,
}

impl<'a> FileReconciler<'a> {
    pub fn new(job: &'a Job, store: &'a FileStore, config: &'a MigrationConfig) -> Self {
        Self {
            job,
            store,
            config,
            tables: HashMap::new(),
            dirty: IndexSet::new(),
        }
    }

    /// Repair the files, write the issues report and decide whether to go on.
    pub fn reconcile(
        mut self,
        diagnostics: &mut Diagnostics,
        confirm: &mut dyn Confirm,
    ) -> Result<ReconcileOutcome> {
        let before = diagnostics.issue_count();

        for merged in &self.config.merged_files {
            self.merge_files(merged, diagnostics)?;
        }

        for index in 0..self.job.len() {
            let plan = self.job.plan(index);
            if plan.operation == Operation::Delete {
                continue;
            }
            if !self.load(&plan.name)? {
                if plan.is_synthesized() {
                    debug!(object = %plan.name, "no file for synthesized object");
                } else {
                    diagnostics.issue(IssueRow::warning(
                        &plan.name,
                        format!("file {} is missing", self.store.path_for(&plan.name).display()),
                    ));
                }
                continue;
            }
            self.expand_compound_columns(plan, diagnostics);
            self.check_original_columns(index, diagnostics);
            for derived in &self.job.tasks[index].derived_fields {
                self.fill_lookup_column(plan, derived, diagnostics)?;
            }
        }

        for object in &self.dirty {
            if let Some(Some(table)) = self.tables.get(object) {
                self.store.write_table(object, table)?;
                info!(object = %object, rows = table.len(), "source file repaired");
            }
        }
        diagnostics.write_issues()?;

        let recorded = diagnostics.issue_count() - before;
        if recorded > 0 {
            info!(issues = recorded, report = %diagnostics.issues_path().display(), "source files have issues");
            if self.config.prompt_on_issues {
                let prompt = format!(
                    "{recorded} issues found in the source files (see {}). Continue?",
                    diagnostics.issues_path().display()
                );
                if !confirm.confirm(&prompt) {
                    return Err(Error::UserAborted(format!(
                        "{recorded} issues found in the source files"
                    )));
                }
            }
        }

        if self.config.validate_only {
            info!("validation finished");
            return Ok(ReconcileOutcome::ValidatedOnly);
        }
        Ok(ReconcileOutcome::Continue)
    }

    /// Load a table into the cache. Returns whether the file exists.
    fn load(&mut self, object: &str) -> Result<bool> {
        if !self.tables.contains_key(object) {
            let table = self.store.read_table(object)?;
            self.tables.insert(object.to_string(), table);
        }
        Ok(matches!(self.tables.get(object), Some(Some(_))))
    }

    fn table_mut(&mut self, object: &str) -> Option<&mut CsvTable> {
        self.tables.get_mut(object).and_then(Option::as_mut)
    }

    /// Union the files of several objects by id.
    ///
    /// A later file's cell replaces an earlier one, blank cells included.
    /// Columns a later file lacks keep their earlier values.
    fn merge_files(&mut self, merged: &MergedFile, diagnostics: &mut Diagnostics) -> Result<()> {
        let mut headers: Vec<String> = Vec::new();
        let mut by_id: IndexMap<String, Record> = IndexMap::new();
        let mut without_id: Vec<Record> = Vec::new();
        let mut found = false;

        for object in &merged.objects {
            let Some(table) = self.store.read_table(object)? else {
                continue;
            };
            found = true;
            for header in &table.headers {
                if !headers.contains(header) {
                    headers.push(header.clone());
                }
            }
            for row in table.rows {
                match row.id().map(str::to_string) {
                    Some(id) => {
                        let merged_row = by_id.entry(id).or_default();
                        merged_row.merge_from(&row);
                    }
                    None => without_id.push(row),
                }
            }
        }

        if !found {
            diagnostics.issue(IssueRow::warning(
                &merged.file,
                format!("none of the files merged into {} exist", merged.file),
            ));
            return Ok(());
        }

        let table = CsvTable {
            headers,
            rows: by_id.into_values().chain(without_id).collect(),
        };
        if self.store.read_table(&merged.file)?.as_ref() != Some(&table) {
            self.store.write_table(&merged.file, &table)?;
            info!(file = %merged.file, sources = merged.objects.len(), rows = table.len(), "files merged");
        }
        self.tables.remove(&merged.file);
        Ok(())
    }

    /// Expand `<lookupField>!<tempField>` columns in place.
    fn expand_compound_columns(&mut self, plan: &ObjectPlan, diagnostics: &mut Diagnostics) {
        let Some(table) = self.table_mut(&plan.name) else {
            return;
        };
        let columns: Vec<String> = table
            .headers
            .iter()
            .filter(|h| h.contains(COMPOUND_COLUMN_SEPARATOR))
            .cloned()
            .collect();

        let mut changed = false;
        for column in columns {
            let segments: Vec<&str> = column.split(COMPOUND_COLUMN_SEPARATOR).collect();
            let [lookup_field, temp_field] = segments[..] else {
                diagnostics.issue(
                    IssueRow::warning(&plan.name, "malformed compound column").with_field(&column),
                );
                continue;
            };
            let lookup_column = plan
                .fields
                .get(lookup_field)
                .filter(|f| f.is_reference())
                .and_then(|f| f.lookup_column());
            let Some(lookup_column) = lookup_column else {
                diagnostics.issue(
                    IssueRow::warning(
                        &plan.name,
                        format!("{lookup_field} is not a reference field of the object"),
                    )
                    .with_field(&column),
                );
                continue;
            };
            if !plan.fields.contains_key(temp_field) {
                diagnostics.issue(
                    IssueRow::warning(
                        &plan.name,
                        format!("{temp_field} is not a field of the object"),
                    )
                    .with_field(&column),
                );
                continue;
            }

            table.add_column(lookup_field);
            table.add_column(&lookup_column);
            table.add_column(temp_field);
            for row in &mut table.rows {
                let value = row.remove(&column).unwrap_or_default();
                if row.text(lookup_field).is_none() {
                    row.set(lookup_field, PLACEHOLDER_RECORD_ID);
                }
                row.set(lookup_column.as_str(), value.clone());
                row.set(temp_field, value);
            }
            table.remove_column(&column);
            debug!(object = %plan.name, column = %column, "compound column expanded");
            changed = true;
        }
        if changed {
            self.dirty.insert(plan.name.clone());
        }
    }

    fn check_original_columns(&mut self, index: usize, diagnostics: &mut Diagnostics) {
        let task = &self.job.tasks[index];
        let Some(Some(table)) = self.tables.get(&task.object) else {
            return;
        };
        for field in &task.original_fields {
            if !table.has_column(field) {
                diagnostics.issue(IssueRow::warning(&task.object, "column missing").with_field(field));
            }
        }
    }

    /// Join the child file with its parent file to fill a lookup column.
    fn fill_lookup_column(
        &mut self,
        plan: &ObjectPlan,
        derived: &DerivedField,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let has_column = self
            .table_mut(&plan.name)
            .map_or(true, |t| t.has_column(&derived.lookup_column));
        if has_column {
            return Ok(());
        }

        let parent_keys: HashMap<String, Option<String>> = match self.job.plan_of(&derived.parent) {
            Some(parent_plan) if self.load(&derived.parent)? => self
                .tables
                .get(&derived.parent)
                .and_then(Option::as_ref)
                .map(|t| {
                    t.rows
                        .iter()
                        .filter_map(|r| r.id().map(|id| (id.to_string(), parent_value(parent_plan, r))))
                        .collect()
                })
                .unwrap_or_default(),
            _ => HashMap::new(),
        };

        let Some(table) = self.table_mut(&plan.name) else {
            return Ok(());
        };
        table.add_column(&derived.lookup_column);
        for row in &mut table.rows {
            let value = match row.text(&derived.field) {
                None => {
                    diagnostics.issue(
                        IssueRow::warning(&plan.name, "reference value is empty")
                            .with_field(&derived.field)
                            .with_parent(&derived.parent, &derived.parent_external_id),
                    );
                    None
                }
                Some(foreign_key) => match parent_keys.get(&foreign_key) {
                    Some(value) => value.clone(),
                    None => {
                        diagnostics.issue(
                            IssueRow::warning(&plan.name, "parent record not found")
                                .with_field(&derived.field)
                                .with_parent(&derived.parent, &derived.parent_external_id)
                                .with_parent_record(foreign_key),
                        );
                        None
                    }
                },
            };
            row.set(derived.lookup_column.as_str(), Value::from(value));
        }
        debug!(object = %plan.name, column = %derived.lookup_column, "lookup column filled");
        self.dirty.insert(plan.name.clone());
        Ok(())
    }
}

/// External id value of a parent row as used in lookup columns.
fn parent_value(parent: &ObjectPlan, row: &Record) -> Option<String> {
    if parent.is_record_type() {
        return row.text(RECORD_TYPE_EXTERNAL_ID);
    }
    let column = parent.external_id_column();
    row.text(&column).or_else(|| {
        parent
            .external_id
            .is_compound()
            .then(|| parent.external_id.compound_value(row, ""))
            .flatten()
    })
}
