//! The five-step migration pipeline.
//!
//! Steps run strictly in sequence and tasks run in planned order within
//! each step:
//!
//! 1. delete old target data (live targets, children first)
//! 2. first retrieval pass over source and target
//! 3. second retrieval pass for rows reachable only through later tasks,
//!    then lookup tables
//! 4. forward write with references to earlier tasks rewritten to target ids
//! 5. backward write completing references to later tasks and self references
//!
//! Every store call is awaited before the next one starts. Diagnostics are
//! flushed before any fatal error propagates and once more on completion.

use super::config::MigrationConfig;
use super::confirm::Confirm;
use super::diagnostics::{Diagnostics, IssueRow, MissingParentRow};
use super::plan::{record_type_key, ExternalId, ObjectPlan, COMPOUND_FIELD_PREFIX, RECORD_TYPE_OBJECT};
use super::planner::{DerivedField, Job};
use crate::error::{Error, Result};
use crate::record::{merge_by_id, Record, Value, ID_FIELD};
use crate::script::Operation;
use crate::store::{CsvTable, StoreHandle, WriteOperation, WriteOutcome};
use recmig_query::{Condition, Query};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, error, info, warn};

/// How a task's rows are retrieved from one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumePolicy {
    /// Issue the complete query.
    FullScan,
    /// Fetch only rows reachable through referencing values.
    #[default]
    ReferenceScoped,
}

impl fmt::Display for VolumePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumePolicy::FullScan => f.write_str("full-scan"),
            VolumePolicy::ReferenceScoped => f.write_str("reference-scoped"),
        }
    }
}

/// Counters of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub object: String,
    pub operation: Operation,
    pub source_policy: VolumePolicy,
    pub target_policy: VolumePolicy,
    pub source_rows: usize,
    pub target_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub missing_parents: usize,
    pub failed: usize,
}

impl TaskSummary {
    fn new(plan: &ObjectPlan) -> Self {
        Self {
            object: plan.name.clone(),
            operation: plan.operation,
            source_policy: VolumePolicy::default(),
            target_policy: VolumePolicy::default(),
            source_rows: 0,
            target_rows: 0,
            inserted: 0,
            updated: 0,
            deleted: 0,
            missing_parents: 0,
            failed: 0,
        }
    }
}

/// Outcome of a run: execution order and per-task counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    pub order: Vec<String>,
    pub tasks: Vec<TaskSummary>,
    /// The run stopped after validating the source files.
    pub validated_only: bool,
}

impl MigrationReport {
    /// Report of a validate-only run.
    pub fn validated(order: Vec<String>) -> Self {
        Self {
            order,
            tasks: Vec::new(),
            validated_only: true,
        }
    }

    /// Counters of one object.
    pub fn task(&self, object: &str) -> Option<&TaskSummary> {
        self.tasks.iter().find(|t| t.object == object)
    }
}

/// Per-task working data, owned by whichever step is running.
struct TaskState {
    source: Vec<Record>,
    target: Vec<Record>,
    /// External id key to target id.
    lookup: HashMap<String, String>,
    /// Source id to target id.
    id_map: HashMap<String, String>,
    scoped_by_parents: bool,
    delete_pending: bool,
    summary: TaskSummary,
}

/// How a reference field appears in a write payload.
enum Resolution {
    Id(String),
    Null,
    Omit,
}

/// A row waiting to be written.
struct Pending {
    source_id: Option<String>,
    key: Option<String>,
    payload: Record,
}

/// Runs a planned job between two stores.
pub struct MigrationExecutor<'a> {
    job: &'a Job,
    source: &'a mut StoreHandle,
    target: &'a mut StoreHandle,
    config: &'a MigrationConfig,
    diagnostics: &'a mut Diagnostics,
    confirm: &'a mut dyn Confirm,
    state: Vec<TaskState>,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(
        job: &'a Job,
        source: &'a mut StoreHandle,
        target: &'a mut StoreHandle,
        config: &'a MigrationConfig,
        diagnostics: &'a mut Diagnostics,
        confirm: &'a mut dyn Confirm,
    ) -> Self {
        let state = job
            .plans
            .iter()
            .map(|plan| TaskState {
                source: Vec::new(),
                target: Vec::new(),
                lookup: HashMap::new(),
                id_map: HashMap::new(),
                scoped_by_parents: false,
                delete_pending: plan.delete_old_data,
                summary: TaskSummary::new(plan),
            })
            .collect();
        Self {
            job,
            source,
            target,
            config,
            diagnostics,
            confirm,
            state,
        }
    }

    /// Run all five steps.
    pub fn run(mut self) -> Result<MigrationReport> {
        if let Err(err) = self.run_steps() {
            error!(error = %err, "migration aborted");
            if let Err(flush_err) = self.diagnostics.flush() {
                warn!(error = %flush_err, "could not write reports");
            }
            return Err(err);
        }
        self.diagnostics.flush()?;

        let report = MigrationReport {
            order: self.job.execution_order().into_iter().map(str::to_string).collect(),
            tasks: self.state.into_iter().map(|s| s.summary).collect(),
            validated_only: false,
        };
        info!(
            objects = report.tasks.len(),
            issues = self.diagnostics.issue_count(),
            missing_parents = self.diagnostics.missing_parent_count(),
            "migration completed"
        );
        Ok(report)
    }

    fn run_steps(&mut self) -> Result<()> {
        info!(step = 1, "deleting old target data");
        self.delete_old_data()?;
        info!(step = 2, "retrieving records");
        self.retrieve_first()?;
        info!(step = 3, "retrieving referenced records");
        self.retrieve_second()?;
        info!(step = 4, "writing records");
        self.write_forward()?;
        info!(step = 5, "completing references");
        self.write_backward()
    }

    // Step 1

    fn delete_old_data(&mut self) -> Result<()> {
        if !self.target.is_live() {
            debug!("file target, nothing deleted");
            return Ok(());
        }
        let job = self.job;
        for index in (0..job.len()).rev() {
            if !self.state[index].delete_pending {
                continue;
            }
            self.state[index].delete_pending = false;
            let plan = job.plan(index);
            let query = plan
                .delete_query
                .clone()
                .unwrap_or_else(|| plan.query.with_fields([ID_FIELD]));

            let ids: Vec<String> = self
                .target
                .query(&query)?
                .iter()
                .filter_map(|r| r.id().map(str::to_string))
                .collect();
            if ids.is_empty() {
                info!(object = %plan.name, "nothing to delete");
                continue;
            }

            let reports = match self.target.delete(&plan.name, ids) {
                Ok(reports) => reports,
                Err(e) => {
                    self.call_failed(&plan.name, format!("delete failed: {e}"))?;
                    continue;
                }
            };
            let deleted: usize = reports.iter().map(|r| r.processed - r.failed).sum();
            self.state[index].summary.deleted = deleted;
            info!(object = %plan.name, deleted, "old target data deleted");

            let failures: Vec<_> = reports.iter().filter(|r| !r.is_success()).collect();
            for failure in &failures {
                self.diagnostics.issue(IssueRow::error(
                    &plan.name,
                    format!(
                        "delete batch {} failed: {}",
                        failure.batch_id,
                        failure.error.as_deref().unwrap_or("records rejected")
                    ),
                ));
            }
            if !failures.is_empty() {
                self.operational_failure(
                    &plan.name,
                    format!("{} delete batches failed", failures.len()),
                )?;
            }
        }
        Ok(())
    }

    // Step 2

    fn retrieve_first(&mut self) -> Result<()> {
        let job = self.job;
        for index in 0..job.len() {
            let plan = job.plan(index);
            if plan.operation == Operation::Delete {
                continue;
            }
            self.retrieve_source(index)?;
            let keys = external_id_values(plan, &self.state[index].source);
            self.retrieve_target(index, keys)?;
            let state = &self.state[index];
            info!(
                object = %plan.name,
                source = state.source.len(),
                target = state.target.len(),
                "records retrieved"
            );
        }
        Ok(())
    }

    fn retrieve_source(&mut self, index: usize) -> Result<()> {
        let job = self.job;
        let plan = job.plan(index);
        let query = plan
            .query
            .with_fields(self.retrieval_fields(index, self.source.is_file()));

        let policy = if plan.use_full_scan {
            VolumePolicy::FullScan
        } else if self.chain_limited(&plan.name) {
            VolumePolicy::ReferenceScoped
        } else {
            let count = self.source.count(&plan.query.with_fields([ID_FIELD]))?;
            debug!(object = %plan.name, count, "source volume");
            if self.config.outside_thresholds(count) {
                VolumePolicy::FullScan
            } else {
                VolumePolicy::ReferenceScoped
            }
        };
        debug!(object = %plan.name, %policy, "source retrieval");

        let limited_parents: Vec<&DerivedField> = if policy == VolumePolicy::ReferenceScoped
            && !plan.query.has_limiting_predicate()
        {
            job.tasks[index]
                .before_fields()
                .filter(|d| !d.is_self && d.parent != RECORD_TYPE_OBJECT && self.chain_limited(&d.parent))
                .collect()
        } else {
            Vec::new()
        };

        let mut rows = if limited_parents.is_empty() {
            self.source.query(&query)?
        } else {
            let mut rows = Vec::new();
            for derived in limited_parents {
                let ids = self.source_ids(&derived.parent);
                let fetched = fetch_in(
                    &mut *self.source,
                    &query,
                    &derived.field,
                    ids,
                    self.config.in_batch_size,
                )?;
                merge_by_id(&mut rows, fetched);
            }
            self.state[index].scoped_by_parents = true;
            rows
        };
        self.complete_rows(index, &mut rows, self.source.is_file());

        let state = &mut self.state[index];
        state.summary.source_policy = policy;
        merge_by_id(&mut state.source, rows);
        Ok(())
    }

    fn retrieve_target(&mut self, index: usize, keys: Vec<String>) -> Result<()> {
        let plan = self.job.plan(index);
        if plan.operation == Operation::Insert {
            debug!(object = %plan.name, "insert only, target not matched");
            return Ok(());
        }
        if !self.target.is_live() {
            debug!(object = %plan.name, "file target, nothing to match");
            return Ok(());
        }

        let query = plan.query.unfiltered();
        let policy = if plan.use_full_scan_on_target || plan.external_id.is_compound() {
            VolumePolicy::FullScan
        } else {
            let count = self.target.count(&query.with_fields([ID_FIELD]))?;
            debug!(object = %plan.name, count, "target volume");
            if self.config.outside_thresholds(count) {
                VolumePolicy::FullScan
            } else {
                VolumePolicy::ReferenceScoped
            }
        };
        debug!(object = %plan.name, %policy, "target retrieval");

        let mut rows = match policy {
            VolumePolicy::FullScan => self.target.query(&query)?,
            VolumePolicy::ReferenceScoped => fetch_in(
                &mut *self.target,
                &query,
                &plan.external_id_column(),
                keys,
                self.config.in_batch_size,
            )?,
        };
        for row in &mut rows {
            plan.fill_compound_key(row);
        }

        let state = &mut self.state[index];
        state.summary.target_policy = policy;
        merge_by_id(&mut state.target, rows);
        Ok(())
    }

    // Step 3

    fn retrieve_second(&mut self) -> Result<()> {
        let job = self.job;
        for index in 0..job.len() {
            let plan = job.plan(index);
            if plan.operation == Operation::Delete {
                continue;
            }
            let known: HashSet<String> = self.source_ids(&plan.name).into_iter().collect();
            let from_file = self.source.is_file();
            let mut rows: Vec<Record> = Vec::new();

            if self.state[index].scoped_by_parents {
                let query = plan.query.with_fields(self.retrieval_fields(index, from_file));
                let later: Vec<&DerivedField> = job.tasks[index]
                    .after_fields()
                    .filter(|d| !d.is_self && self.chain_limited(&d.parent))
                    .collect();
                for derived in later {
                    let ids = self.source_ids(&derived.parent);
                    let fetched = fetch_in(
                        &mut *self.source,
                        &query,
                        &derived.field,
                        ids,
                        self.config.in_batch_size,
                    )?;
                    merge_by_id(&mut rows, fetched);
                }
            }

            if self.state[index].summary.source_policy == VolumePolicy::ReferenceScoped {
                let missing: Vec<String> = self
                    .referencing_values(&plan.name)
                    .into_iter()
                    .filter(|id| !known.contains(id))
                    .collect();
                if !missing.is_empty() {
                    debug!(object = %plan.name, missing = missing.len(), "fetching referenced records");
                    let query = plan
                        .query
                        .unfiltered()
                        .with_fields(self.retrieval_fields(index, from_file));
                    let fetched =
                        fetch_in(&mut *self.source, &query, ID_FIELD, missing, self.config.in_batch_size)?;
                    merge_by_id(&mut rows, fetched);
                }
            }

            rows.retain(|r| r.id().map_or(true, |id| !known.contains(id)));
            if rows.is_empty() {
                continue;
            }
            self.complete_rows(index, &mut rows, from_file);
            let keys = external_id_values(plan, &rows);
            info!(object = %plan.name, added = rows.len(), "referenced records retrieved");
            merge_by_id(&mut self.state[index].source, rows);
            if self.state[index].summary.target_policy == VolumePolicy::ReferenceScoped {
                self.retrieve_target(index, keys)?;
            }
        }

        for index in 0..job.len() {
            self.build_lookup(index);
        }
        Ok(())
    }

    fn build_lookup(&mut self, index: usize) {
        let plan = self.job.plan(index);
        let state = &mut self.state[index];
        let lookup: HashMap<String, String> = state
            .target
            .iter()
            .filter_map(|r| Some((plan.key_of(r)?, r.id()?.to_string())))
            .collect();
        state.id_map = state
            .source
            .iter()
            .filter_map(|r| {
                let target_id = lookup.get(&plan.key_of(r)?)?;
                Some((r.id()?.to_string(), target_id.clone()))
            })
            .collect();
        state.lookup = lookup;
        state.summary.source_rows = state.source.len();
        state.summary.target_rows = state.target.len();
        debug!(object = %plan.name, keys = state.lookup.len(), matched = state.id_map.len(), "lookup built");
    }

    // Step 4

    fn write_forward(&mut self) -> Result<()> {
        let job = self.job;
        for index in 0..job.len() {
            let plan = job.plan(index);
            if matches!(plan.operation, Operation::Readonly | Operation::Delete) {
                continue;
            }
            if !self.target.is_live() {
                self.export_to_file(index)?;
                continue;
            }

            let before = (self.diagnostics.issue_count(), self.diagnostics.missing_parent_count());
            let rows = std::mem::take(&mut self.state[index].source);
            let mut updates = Vec::new();
            let mut inserts = Vec::new();
            let mut unmatched = 0;
            for row in &rows {
                let key = plan.key_of(row);
                let matched = key
                    .as_ref()
                    .and_then(|k| self.state[index].lookup.get(k))
                    .cloned();
                let operation = match (plan.operation, &matched) {
                    (Operation::Insert, _) => WriteOperation::Insert,
                    (Operation::Update, None) => {
                        unmatched += 1;
                        continue;
                    }
                    (_, Some(_)) => WriteOperation::Update,
                    (_, None) => WriteOperation::Insert,
                };
                let pending = Pending {
                    source_id: row.id().map(str::to_string),
                    key,
                    payload: self.forward_payload(index, row, matched),
                };
                match operation {
                    WriteOperation::Update => updates.push(pending),
                    WriteOperation::Insert => inserts.push(pending),
                }
            }
            self.state[index].source = rows;
            if unmatched > 0 {
                debug!(object = %plan.name, unmatched, "update skipped rows without a target match");
            }

            self.review_diagnostics(index, before)?;
            let (updated, update_failures) = self.submit(index, WriteOperation::Update, updates)?;
            let (inserted, insert_failures) = self.submit(index, WriteOperation::Insert, inserts)?;
            let summary = &mut self.state[index].summary;
            summary.updated += updated;
            summary.inserted += inserted;
            summary.failed += update_failures + insert_failures;
            info!(object = %plan.name, inserted, updated, "records written");
        }
        Ok(())
    }

    fn forward_payload(&mut self, index: usize, row: &Record, target_id: Option<String>) -> Record {
        let job = self.job;
        let plan = job.plan(index);
        let mut payload = target_id.map(Record::with_id).unwrap_or_default();
        for field in plan.writable_plain_fields() {
            if let Some(value) = row.get(&field.name) {
                payload.set(field.name.as_str(), value.clone());
            }
        }
        let references = job.tasks[index]
            .before_fields()
            .filter(|d| !d.is_self && is_writable(plan, d));
        for derived in references {
            match self.resolve_reference(index, derived, row) {
                Resolution::Id(id) => payload.set(derived.field.as_str(), id),
                Resolution::Null => payload.set(derived.field.as_str(), Value::Null),
                Resolution::Omit => {}
            }
        }
        payload
    }

    /// Resolve a reference of a source row to a target id.
    ///
    /// A lookup value without a target match is reported as a missing parent
    /// and omitted. A reference that is present but carries no lookup value
    /// is reported and omitted. An empty reference clears the field.
    fn resolve_reference(&mut self, index: usize, derived: &DerivedField, row: &Record) -> Resolution {
        let job = self.job;
        let plan = job.plan(index);
        let Some(parent_index) = job.position(&derived.parent) else {
            return Resolution::Null;
        };
        let parent = &self.state[parent_index];

        match row.text(&derived.lookup_column) {
            Some(value) => {
                let key = if job.plan(parent_index).is_record_type() {
                    record_type_key(&plan.name, &value)
                } else {
                    value.clone()
                };
                if let Some(id) = parent.lookup.get(&key) {
                    return Resolution::Id(id.clone());
                }
                self.diagnostics.missing_parent(MissingParentRow {
                    child_record_id: row.id().unwrap_or_default().to_string(),
                    child_object: plan.name.clone(),
                    child_external_id: derived.lookup_column.clone(),
                    parent_external_id: derived.parent_external_id.clone(),
                    parent_object: derived.parent.clone(),
                    missing_value: value,
                });
                Resolution::Omit
            }
            None => match row.text(&derived.field) {
                None => Resolution::Null,
                Some(raw) => {
                    if let Some(id) = parent.id_map.get(&raw) {
                        return Resolution::Id(id.clone());
                    }
                    self.diagnostics.issue(
                        IssueRow::warning(&plan.name, "referenced record has no external id value")
                            .with_field(&derived.field)
                            .with_parent(&derived.parent, &derived.parent_external_id)
                            .with_parent_record(raw),
                    );
                    Resolution::Omit
                }
            },
        }
    }

    /// Write pending rows and fold the results into the task's target data.
    ///
    /// Returns the numbers of written and failed rows.
    fn submit(
        &mut self,
        index: usize,
        operation: WriteOperation,
        pending: Vec<Pending>,
    ) -> Result<(usize, usize)> {
        if pending.is_empty() {
            return Ok((0, 0));
        }
        let job = self.job;
        let plan = job.plan(index);
        let (meta, payloads): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .map(|p| ((p.source_id, p.key), p.payload))
            .unzip();
        let outcome = match self.target.write(&plan.name, payloads, operation) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.call_failed(&plan.name, format!("{operation} failed: {e}"))?;
                return Ok((0, meta.len()));
            }
        };

        let state = &mut self.state[index];
        let mut positions: HashMap<String, usize> = state
            .target
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.id().map(|id| (id.to_string(), i)))
            .collect();
        let mut written = 0;
        let mut failed = 0;
        for ((source_id, key), record) in meta.iter().zip(&outcome.records) {
            if record.error().is_some() {
                failed += 1;
                continue;
            }
            let Some(target_id) = record.id().map(str::to_string) else {
                continue;
            };
            written += 1;
            if let Some(source_id) = source_id {
                state.id_map.insert(source_id.clone(), target_id.clone());
            }
            if let Some(key) = key {
                state.lookup.insert(key.clone(), target_id.clone());
            }
            match positions.get(&target_id) {
                Some(&i) => state.target[i].merge_from(record),
                None => {
                    positions.insert(target_id, state.target.len());
                    state.target.push(record.clone());
                }
            }
        }

        self.check_batches(&plan.name, operation, &outcome)?;
        Ok((written, failed))
    }

    fn check_batches(&mut self, object: &str, operation: WriteOperation, outcome: &WriteOutcome) -> Result<()> {
        let failures: Vec<_> = outcome.batches.iter().filter(|b| !b.is_success()).collect();
        if failures.is_empty() {
            return Ok(());
        }
        for failure in &failures {
            self.diagnostics.issue(IssueRow::error(
                object,
                format!(
                    "{operation} batch {} failed for {} of {} records: {}",
                    failure.batch_id,
                    failure.failed,
                    failure.processed,
                    failure.error.as_deref().unwrap_or("records rejected")
                ),
            ));
        }
        if self.config.allow_partial_batch_success {
            warn!(
                object,
                failed = outcome.failed(),
                error = outcome.first_error().unwrap_or_default(),
                "some records were rejected"
            );
            return Ok(());
        }
        self.operational_failure(object, format!("{} {operation} batches failed", failures.len()))
    }

    /// Write source rows unchanged to a file target.
    fn export_to_file(&mut self, index: usize) -> Result<()> {
        let plan = self.job.plan(index);
        let headers = self.retrieval_fields(index, true);
        let rows: Vec<Record> = self.state[index]
            .source
            .iter()
            .map(|r| r.project(headers.iter().map(String::as_str)))
            .collect();
        let count = rows.len();
        let table = CsvTable { headers, rows };
        let store = self
            .target
            .file_store()
            .ok_or_else(|| Error::run(&plan.name, "target store has no file access"))?;
        store.write_table(&plan.name, &table)?;
        self.state[index].summary.inserted = count;
        info!(object = %plan.name, rows = count, "records exported");
        Ok(())
    }

    // Step 5

    fn write_backward(&mut self) -> Result<()> {
        if !self.target.is_live() {
            debug!("file target, no references to complete");
            return Ok(());
        }
        let job = self.job;
        for index in 0..job.len() {
            let plan = job.plan(index);
            if matches!(plan.operation, Operation::Readonly | Operation::Delete) {
                continue;
            }
            let later: Vec<&DerivedField> = job.tasks[index]
                .after_fields()
                .filter(|d| is_writable(plan, d))
                .collect();
            if later.is_empty() {
                continue;
            }

            let before = (self.diagnostics.issue_count(), self.diagnostics.missing_parent_count());
            let rows = std::mem::take(&mut self.state[index].source);
            let mut pending = Vec::new();
            for row in &rows {
                let Some(target_id) = row
                    .id()
                    .and_then(|id| self.state[index].id_map.get(id))
                    .cloned()
                else {
                    continue;
                };
                let mut payload = Record::with_id(target_id);
                for derived in &later {
                    match self.resolve_reference(index, derived, row) {
                        Resolution::Id(id) => payload.set(derived.field.as_str(), id),
                        Resolution::Null => payload.set(derived.field.as_str(), Value::Null),
                        Resolution::Omit => {}
                    }
                }
                if payload.len() > 1 {
                    pending.push(Pending {
                        source_id: row.id().map(str::to_string),
                        key: plan.key_of(row),
                        payload,
                    });
                }
            }
            self.state[index].source = rows;

            self.review_diagnostics(index, before)?;
            let (completed, failed) = self.submit(index, WriteOperation::Update, pending)?;
            self.state[index].summary.failed += failed;
            info!(object = %plan.name, completed, "references completed");
        }
        Ok(())
    }

    // Shared

    /// Count diagnostics recorded since `before` and ask whether to go on.
    fn review_diagnostics(&mut self, index: usize, before: (usize, usize)) -> Result<()> {
        let issues = self.diagnostics.issue_count() - before.0;
        let missing = self.diagnostics.missing_parent_count() - before.1;
        self.state[index].summary.missing_parents += missing;
        if issues + missing == 0 {
            return Ok(());
        }
        self.diagnostics.flush()?;
        if !self.config.prompt_on_issues {
            return Ok(());
        }
        let object = &self.job.plan(index).name;
        let prompt = format!(
            "{object}: {missing} missing parent records and {issues} issues (see {}). Continue?",
            self.diagnostics.report_dir().display()
        );
        if self.confirm.confirm(&prompt) {
            Ok(())
        } else {
            Err(Error::UserAborted(format!("{object}: unresolved references")))
        }
    }

    /// A write or delete call failed as a whole.
    fn call_failed(&mut self, object: &str, message: String) -> Result<()> {
        error!(object, %message, "store call failed");
        self.diagnostics.issue(IssueRow::error(object, message.clone()));
        self.operational_failure(object, message)
    }

    /// Store call failure: fatal, unless the operator chooses to go on.
    fn operational_failure(&mut self, object: &str, message: String) -> Result<()> {
        self.diagnostics.flush()?;
        if !self.config.prompt_on_issues {
            return Err(Error::run(object, message));
        }
        if self.confirm.confirm(&format!("{object}: {message}. Continue?")) {
            warn!(object, %message, "continuing after failure");
            Ok(())
        } else {
            Err(Error::UserAborted(format!("{object}: {message}")))
        }
    }

    /// Whether a limiting predicate exists on the object or any ancestor.
    fn chain_limited(&self, object: &str) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![object];
        while let Some(name) = stack.pop() {
            if !seen.insert(name) {
                continue;
            }
            let Some(plan) = self.job.plan_of(name) else {
                continue;
            };
            if !plan.is_record_type() && plan.query.has_limiting_predicate() {
                return true;
            }
            stack.extend(
                plan.referenced_objects
                    .iter()
                    .map(String::as_str)
                    .filter(|o| *o != RECORD_TYPE_OBJECT),
            );
        }
        false
    }

    fn source_ids(&self, object: &str) -> Vec<String> {
        self.job
            .position(object)
            .map(|i| {
                self.state[i]
                    .source
                    .iter()
                    .filter_map(|r| r.id().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Distinct reference values pointing at `object` across all tasks.
    fn referencing_values(&self, object: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for (task, state) in self.job.tasks.iter().zip(&self.state) {
            for derived in task.derived_fields.iter().filter(|d| d.parent == object) {
                for value in state.source.iter().filter_map(|r| r.text(&derived.field)) {
                    if seen.insert(value.clone()) {
                        values.push(value);
                    }
                }
            }
        }
        values
    }

    /// Projected fields plus lookup columns.
    ///
    /// Live stores resolve compound lookup columns through their component
    /// paths; files carry the composed column.
    fn retrieval_fields(&self, index: usize, from_file: bool) -> Vec<String> {
        let plan = self.job.plan(index);
        let mut fields = plan.query.fields.clone();
        let mut push = |field: String| {
            if !fields.contains(&field) {
                fields.push(field);
            }
        };
        for derived in &self.job.tasks[index].derived_fields {
            match compound_lookup(&derived.lookup_column) {
                Some((relationship, external_id)) if !from_file => {
                    for part in external_id.parts() {
                        push(format!("{relationship}.{part}"));
                    }
                }
                _ => push(derived.lookup_column.clone()),
            }
        }
        fields
    }

    /// Compose virtual columns on freshly retrieved rows.
    fn complete_rows(&self, index: usize, rows: &mut [Record], from_file: bool) {
        let plan = self.job.plan(index);
        let compound: Vec<(&str, String, ExternalId)> = if from_file {
            Vec::new()
        } else {
            self.job.tasks[index]
                .derived_fields
                .iter()
                .filter_map(|d| {
                    let (relationship, external_id) = compound_lookup(&d.lookup_column)?;
                    Some((d.lookup_column.as_str(), format!("{relationship}."), external_id))
                })
                .collect()
        };
        for row in rows {
            for (column, prefix, external_id) in &compound {
                let value = external_id.compound_value(row, prefix);
                row.set(*column, Value::from(value));
            }
            plan.fill_compound_key(row);
        }
    }
}

fn is_writable(plan: &ObjectPlan, derived: &DerivedField) -> bool {
    plan.fields
        .get(&derived.field)
        .map_or(false, |f| !f.export_only)
}

/// Split `Rel.$$A$B` into the relationship and the compound external id.
fn compound_lookup(column: &str) -> Option<(&str, ExternalId)> {
    let (relationship, external_id) = column.split_once('.')?;
    external_id
        .starts_with(COMPOUND_FIELD_PREFIX)
        .then(|| (relationship, ExternalId::from_column(external_id)))
}

/// Distinct external id values of rows, as stored in the id column.
fn external_id_values(plan: &ObjectPlan, rows: &[Record]) -> Vec<String> {
    let column = plan.external_id_column();
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|r| r.text(&column))
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// Run `base` once per batch of values with `field IN (batch)` added and
/// merge the results by id.
fn fetch_in(
    store: &mut StoreHandle,
    base: &Query,
    field: &str,
    values: Vec<String>,
    batch_size: usize,
) -> Result<Vec<Record>> {
    let mut rows = Vec::new();
    for batch in values.chunks(batch_size.max(1)) {
        let mut query = base.clone();
        query.and_where(Condition::in_list(field, batch.iter().map(String::as_str)));
        let fetched = store.query(&query)?;
        merge_by_id(&mut rows, fetched);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::confirm::{ConfirmPolicy, RecordedConfirm};
    use crate::migration::testing::{catalog, script};
    use crate::migration::{ScriptCompiler, TaskPlanner};
    use crate::script::Script;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        source: StoreHandle,
        target: StoreHandle,
        config: MigrationConfig,
        diagnostics: Diagnostics,
    }

    impl Harness {
        fn new(source: MemoryStore, target: MemoryStore) -> Self {
            let dir = TempDir::new().unwrap();
            let config = MigrationConfig::default()
                .with_prompt(false)
                .with_report_dir(dir.path());
            let diagnostics = Diagnostics::new(dir.path());
            Self {
                _dir: dir,
                source: StoreHandle::live("source", source),
                target: StoreHandle::live("target", target),
                config,
                diagnostics,
            }
        }

        fn run(&mut self, script: &Script, confirm: &mut dyn Confirm) -> Result<MigrationReport> {
            let graph = ScriptCompiler::new(script, &mut self.source, &mut self.target).compile()?;
            let job = TaskPlanner::plan(graph)?;
            MigrationExecutor::new(
                &job,
                &mut self.source,
                &mut self.target,
                &self.config,
                &mut self.diagnostics,
                confirm,
            )
            .run()
        }

        fn target(&self) -> &MemoryStore {
            self.target.memory_store().unwrap()
        }
    }

    fn accounts() -> Vec<Record> {
        vec![
            Record::with_id("A1").with("Name", "Acme").with("Code__c", "C-1"),
            Record::with_id("A2").with("Name", "Globex").with("Code__c", "C-2"),
        ]
    }

    fn account_and_contact() -> Script {
        script(&[
            ("SELECT Id, Name, Code__c FROM Account", Operation::Upsert, Some("Code__c")),
            ("SELECT Id, LastName, Account__c FROM Contact", Operation::Upsert, Some("LastName")),
        ])
    }

    #[test]
    fn test_references_resolved_through_parent_writes() {
        let source = MemoryStore::new(catalog())
            .with_records("Account", accounts())
            .with_records(
                "Contact",
                vec![Record::with_id("K1").with("LastName", "Doe").with("Account__c", "A2")],
            );
        let mut harness = Harness::new(source, MemoryStore::new(catalog()));
        let report = harness
            .run(&account_and_contact(), &mut ConfirmPolicy::AlwaysAbort)
            .unwrap();

        assert_eq!(report.order, vec!["Account", "Contact"]);
        assert_eq!(report.task("Account").unwrap().inserted, 2);
        let globex = harness.target().find("Account", "Code__c", "C-2").unwrap();
        let doe = harness.target().find("Contact", "LastName", "Doe").unwrap();
        assert_eq!(doe.text("Account__c").as_deref(), globex.id());
        assert_ne!(globex.id(), Some("A2"));
    }

    #[test]
    fn test_upsert_updates_matched_rows() {
        let source = MemoryStore::new(catalog()).with_records("Account", accounts());
        let target = MemoryStore::new(catalog()).with_records(
            "Account",
            vec![Record::with_id("T1").with("Name", "Old Acme").with("Code__c", "C-1")],
        );
        let mut harness = Harness::new(source, target);
        let script = script(&[(
            "SELECT Id, Name, Code__c FROM Account",
            Operation::Upsert,
            Some("Code__c"),
        )]);
        let report = harness.run(&script, &mut ConfirmPolicy::AlwaysAbort).unwrap();

        let summary = report.task("Account").unwrap();
        assert_eq!((summary.updated, summary.inserted), (1, 1));
        let writes = harness.target().writes();
        assert_eq!(writes[0].operation, WriteOperation::Update);
        assert_eq!(writes[0].rows[0].id(), Some("T1"));
        assert_eq!(writes[1].operation, WriteOperation::Insert);
        assert_eq!(
            harness.target().find("Account", "Code__c", "C-1").unwrap().text("Name").as_deref(),
            Some("Acme")
        );
    }

    #[test]
    fn test_nothing_to_delete() {
        let source = MemoryStore::new(catalog()).with_records("Account", accounts());
        let mut harness = Harness::new(source, MemoryStore::new(catalog()));
        let mut script = script(&[(
            "SELECT Id, Name, Code__c FROM Account",
            Operation::Insert,
            Some("Code__c"),
        )]);
        script.objects[0].delete_old_data = true;
        let report = harness.run(&script, &mut ConfirmPolicy::AlwaysAbort).unwrap();

        assert!(harness.target().deletes().is_empty());
        assert_eq!(report.task("Account").unwrap().deleted, 0);
        assert_eq!(report.task("Account").unwrap().inserted, 2);
    }

    #[test]
    fn test_old_data_deleted_before_insert() {
        let source = MemoryStore::new(catalog()).with_records("Account", accounts());
        let target = MemoryStore::new(catalog()).with_records(
            "Account",
            vec![
                Record::with_id("T1").with("Name", "Acme").with("Code__c", "C-1"),
                Record::with_id("T2").with("Name", "Stale").with("Code__c", "C-9"),
            ],
        );
        let mut harness = Harness::new(source, target);
        let mut script = script(&[(
            "SELECT Id, Name, Code__c FROM Account",
            Operation::Upsert,
            Some("Code__c"),
        )]);
        script.objects[0].delete_old_data = true;
        let report = harness.run(&script, &mut ConfirmPolicy::AlwaysAbort).unwrap();

        assert_eq!(report.task("Account").unwrap().operation, Operation::Insert);
        assert_eq!(report.task("Account").unwrap().deleted, 2);
        assert_eq!(harness.target().deletes()[0].1, vec!["T1", "T2"]);
        assert_eq!(harness.target().records("Account").len(), 2);
        assert!(harness.target().find("Account", "Code__c", "C-9").is_none());
    }

    #[test]
    fn test_missing_parent_omitted_and_empty_reference_nulled() {
        let source = MemoryStore::new(catalog())
            .with_records("Account", accounts())
            .with_records(
                "Contact",
                vec![
                    Record::with_id("K1").with("LastName", "Doe").with("Account__c", "A1"),
                    Record::with_id("K2").with("LastName", "Roe").with("Account__c", Value::Null),
                ],
            );
        let mut harness = Harness::new(source, MemoryStore::new(catalog()));
        let script = script(&[(
            "SELECT Id, LastName, Account__c FROM Contact",
            Operation::Insert,
            Some("LastName"),
        )]);
        let report = harness.run(&script, &mut ConfirmPolicy::AlwaysAbort).unwrap();

        let contact = report.task("Contact").unwrap();
        assert_eq!(contact.missing_parents, 1);
        let write = harness
            .target()
            .writes()
            .iter()
            .find(|w| w.object == "Contact")
            .unwrap();
        assert!(!write.rows[0].contains("Account__c"));
        assert_eq!(write.rows[1].get("Account__c"), Some(&Value::Null));

        let missing = &harness.diagnostics.missing_parents()[0];
        assert_eq!(missing.child_record_id, "K1");
        assert_eq!(missing.parent_object, "Account");
        assert_eq!(missing.missing_value, "Acme");
        assert!(harness.diagnostics.missing_parents_path().exists());
    }

    #[test]
    fn test_declined_prompt_aborts_before_writing() {
        let source = MemoryStore::new(catalog())
            .with_records("Account", accounts())
            .with_records(
                "Contact",
                vec![Record::with_id("K1").with("LastName", "Doe").with("Account__c", "A1")],
            );
        let mut harness = Harness::new(source, MemoryStore::new(catalog()));
        harness.config = harness.config.clone().with_prompt(true);
        let script = script(&[(
            "SELECT Id, LastName, Account__c FROM Contact",
            Operation::Insert,
            Some("LastName"),
        )]);
        let mut confirm = RecordedConfirm::new(vec![false]);
        let err = harness.run(&script, &mut confirm).unwrap_err();

        assert!(err.is_user_abort());
        assert_eq!(confirm.prompts.len(), 1);
        assert!(confirm.prompts[0].starts_with("Contact: 1 missing parent records"));
        assert!(harness.target().writes().is_empty());
        assert!(harness.diagnostics.missing_parents_path().exists());
    }

    #[test]
    fn test_self_reference_written_in_backward_pass() {
        let source = MemoryStore::new(catalog()).with_records(
            "Contact",
            vec![
                Record::with_id("K1").with("LastName", "Boss").with("ReportsTo__c", Value::Null),
                Record::with_id("K2").with("LastName", "Staff").with("ReportsTo__c", "K1"),
            ],
        );
        let mut harness = Harness::new(source, MemoryStore::new(catalog()));
        let script = script(&[(
            "SELECT Id, LastName, ReportsTo__c FROM Contact",
            Operation::Insert,
            Some("LastName"),
        )]);
        harness.run(&script, &mut ConfirmPolicy::AlwaysAbort).unwrap();

        let writes = harness.target().writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].operation, WriteOperation::Insert);
        assert!(writes[0].rows.iter().all(|r| !r.contains("ReportsTo__c")));
        assert_eq!(writes[1].operation, WriteOperation::Update);

        let boss = harness.target().find("Contact", "LastName", "Boss").unwrap();
        let staff = harness.target().find("Contact", "LastName", "Staff").unwrap();
        assert_eq!(staff.text("ReportsTo__c").as_deref(), boss.id());
        assert_eq!(boss.get("ReportsTo__c"), Some(&Value::Null));
    }

    #[test]
    fn test_limited_parent_scopes_children() {
        let source = MemoryStore::new(catalog())
            .with_records("Account", accounts())
            .with_records(
                "Contact",
                vec![
                    Record::with_id("K1").with("LastName", "Doe").with("Account__c", "A1"),
                    Record::with_id("K2").with("LastName", "Roe").with("Account__c", "A2"),
                ],
            );
        let mut harness = Harness::new(source, MemoryStore::new(catalog()));
        let script = script(&[
            (
                "SELECT Id, Name, Code__c FROM Account WHERE Code__c = 'C-1'",
                Operation::Upsert,
                Some("Code__c"),
            ),
            ("SELECT Id, LastName, Account__c FROM Contact", Operation::Upsert, Some("LastName")),
        ]);
        let report = harness.run(&script, &mut ConfirmPolicy::AlwaysAbort).unwrap();

        let contact = report.task("Contact").unwrap();
        assert_eq!(contact.source_policy, VolumePolicy::ReferenceScoped);
        assert_eq!(contact.source_rows, 1);
        let source = harness.source.memory_store().unwrap();
        assert!(source
            .queries()
            .iter()
            .any(|q| q.contains("FROM Contact WHERE Account__c IN ('A1')")));
        assert_eq!(harness.target().records("Contact").len(), 1);
    }

    #[test]
    fn test_failed_batch_is_fatal_without_partial_success() {
        let source = MemoryStore::new(catalog()).with_records("Account", accounts());
        let mut target = MemoryStore::new(catalog());
        target.fail_batch("Account", 0);
        let mut harness = Harness::new(source, target);
        harness.config.allow_partial_batch_success = false;
        let script = script(&[(
            "SELECT Id, Name, Code__c FROM Account",
            Operation::Insert,
            Some("Code__c"),
        )]);
        let err = harness.run(&script, &mut ConfirmPolicy::AlwaysAbort).unwrap_err();

        assert!(matches!(err, Error::Run { .. }));
        assert_eq!(harness.diagnostics.issues()[0].severity.to_string(), "ERROR");
        assert!(harness.diagnostics.issues_path().exists());
    }

    #[test]
    fn test_failed_batch_tolerated_with_partial_success() {
        let source = MemoryStore::new(catalog()).with_records("Account", accounts());
        let mut target = MemoryStore::new(catalog());
        target.fail_batch("Account", 1);
        let mut harness = Harness::new(source, target);
        harness.target.set_batch_size(1);
        let script = script(&[(
            "SELECT Id, Name, Code__c FROM Account",
            Operation::Insert,
            Some("Code__c"),
        )]);
        let report = harness.run(&script, &mut ConfirmPolicy::AlwaysAbort).unwrap();

        let summary = report.task("Account").unwrap();
        assert_eq!((summary.inserted, summary.failed), (1, 1));
        assert_eq!(harness.diagnostics.issue_count(), 1);
    }

    #[test]
    fn test_target_matched_by_external_id_batches() {
        let source = MemoryStore::new(catalog()).with_records("Account", accounts());
        let target = MemoryStore::new(catalog()).with_records(
            "Account",
            vec![
                Record::with_id("T1").with("Name", "Old Acme").with("Code__c", "C-1"),
                Record::with_id("T9").with("Name", "Initech").with("Code__c", "C-9"),
            ],
        );
        let mut harness = Harness::new(source, target);
        harness.config = harness
            .config
            .clone()
            .with_thresholds(1000, 0)
            .with_in_batch_size(1);
        let script = script(&[(
            "SELECT Id, Name, Code__c FROM Account",
            Operation::Upsert,
            Some("Code__c"),
        )]);
        let report = harness.run(&script, &mut ConfirmPolicy::AlwaysAbort).unwrap();

        let summary = report.task("Account").unwrap();
        assert_eq!(summary.target_policy, VolumePolicy::ReferenceScoped);
        assert_eq!(summary.target_rows, 1);
        assert_eq!((summary.updated, summary.inserted), (1, 1));
        let queries = harness.target().queries();
        assert!(queries.iter().any(|q| q.ends_with("FROM Account WHERE Code__c IN ('C-1')")));
        assert!(queries.iter().any(|q| q.ends_with("FROM Account WHERE Code__c IN ('C-2')")));
        assert_eq!(
            harness.target().find("Account", "Code__c", "C-1").unwrap().text("Name").as_deref(),
            Some("Acme")
        );
        assert_eq!(harness.target().records("Account").len(), 3);
    }

    #[test]
    fn test_referenced_parent_fetched_in_second_pass() {
        let source = MemoryStore::new(catalog())
            .with_records(
                "Contact",
                vec![
                    Record::with_id("K1").with("LastName", "Doe"),
                    Record::with_id("K2").with("LastName", "Roe"),
                    Record::with_id("K3").with("LastName", "Poe"),
                ],
            )
            .with_records(
                "Case",
                vec![
                    Record::with_id("S1").with("Subject", "Help").with("Contact__c", "K2"),
                    Record::with_id("S2").with("Subject", "Other").with("Contact__c", "K3"),
                ],
            );
        let target = MemoryStore::new(catalog()).with_records(
            "Contact",
            vec![
                Record::with_id("T5").with("LastName", "Roe"),
                Record::with_id("T6").with("LastName", "Smith"),
            ],
        );
        let mut harness = Harness::new(source, target);
        harness.config = harness.config.clone().with_thresholds(1000, 0);
        let script = script(&[
            (
                "SELECT Id, LastName FROM Contact WHERE LastName = 'Doe'",
                Operation::Upsert,
                Some("LastName"),
            ),
            (
                "SELECT Id, Subject, Contact__c FROM Case WHERE Subject = 'Help'",
                Operation::Insert,
                Some("Subject"),
            ),
        ]);
        let report = harness.run(&script, &mut ConfirmPolicy::AlwaysAbort).unwrap();

        assert_eq!(report.order, vec!["Contact", "Case"]);
        let contact = report.task("Contact").unwrap();
        assert_eq!(contact.source_policy, VolumePolicy::ReferenceScoped);
        assert_eq!(contact.target_policy, VolumePolicy::ReferenceScoped);
        assert_eq!((contact.source_rows, contact.target_rows), (2, 1));
        assert_eq!((contact.updated, contact.inserted), (1, 1));

        let source = harness.source.memory_store().unwrap();
        assert!(source
            .queries()
            .iter()
            .any(|q| q.ends_with("FROM Contact WHERE Id IN ('K2')")));
        let target_queries = harness.target().queries();
        assert!(target_queries
            .iter()
            .any(|q| q.ends_with("FROM Contact WHERE LastName IN ('Doe')")));
        assert!(target_queries
            .iter()
            .any(|q| q.ends_with("FROM Contact WHERE LastName IN ('Roe')")));

        assert!(harness.target().find("Contact", "LastName", "Poe").is_none());
        let help = harness.target().find("Case", "Subject", "Help").unwrap();
        assert_eq!(help.text("Contact__c").as_deref(), Some("T5"));
        assert_eq!(harness.target().records("Case").len(), 1);
    }

    #[test]
    fn test_rejected_write_call_asks_operator() {
        let source = MemoryStore::new(catalog()).with_records("Account", accounts());
        let mut target = MemoryStore::new(catalog());
        target.lock("Account");
        let mut harness = Harness::new(source, target);
        harness.config = harness.config.clone().with_prompt(true);
        let script = script(&[(
            "SELECT Id, Name, Code__c FROM Account",
            Operation::Insert,
            Some("Code__c"),
        )]);

        let mut confirm = RecordedConfirm::new(vec![true]);
        let report = harness.run(&script, &mut confirm).unwrap();
        assert_eq!(confirm.prompts.len(), 1);
        assert!(confirm.prompts[0].starts_with("Account: insert failed"));
        assert!(confirm.prompts[0].contains("Account is locked"));
        let summary = report.task("Account").unwrap();
        assert_eq!((summary.inserted, summary.failed), (0, 2));
        assert_eq!(harness.diagnostics.issues()[0].severity.to_string(), "ERROR");
        assert!(harness.diagnostics.issues_path().exists());
    }

    #[test]
    fn test_rejected_write_call_declined() {
        let source = MemoryStore::new(catalog()).with_records("Account", accounts());
        let mut target = MemoryStore::new(catalog());
        target.lock("Account");
        let mut harness = Harness::new(source, target);
        harness.config = harness.config.clone().with_prompt(true);
        let script = script(&[(
            "SELECT Id, Name, Code__c FROM Account",
            Operation::Insert,
            Some("Code__c"),
        )]);

        let mut confirm = RecordedConfirm::new(vec![false]);
        let err = harness.run(&script, &mut confirm).unwrap_err();
        assert!(err.is_user_abort());
        assert!(harness.diagnostics.issues_path().exists());
    }
}

