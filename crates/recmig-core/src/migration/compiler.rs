//! Script compilation.
//!
//! Turns script entries and store metadata into an [`ObjectGraph`]: parsed
//! and completed queries, field metadata bound on both stores, placeholder
//! plans for referenced objects the script does not list, and reference
//! fields rebound to their parent's external id. Any failure aborts the
//! whole compilation.

use super::plan::{
    ExternalId, FieldPlan, ObjectGraph, ObjectPlan, PlanOrigin, DEFAULT_EXTERNAL_ID,
    RECORD_TYPE_EXTERNAL_ID, RECORD_TYPE_FIELD, RECORD_TYPE_OBJECT, RECORD_TYPE_OBJECT_FIELD,
};
use crate::catalog::{FieldDescribe, ObjectDescribe};
use crate::crypto;
use crate::error::{Error, Result, SchemaError};
use crate::record::ID_FIELD;
use crate::script::{Operation, Script, ScriptObject};
use crate::store::StoreHandle;
use indexmap::IndexMap;
use recmig_query::{Condition, Query};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// Source and target metadata of one object.
#[derive(Debug, Clone)]
struct DescribePair {
    source: ObjectDescribe,
    target: ObjectDescribe,
}

impl DescribePair {
    fn add_field(&mut self, field: FieldDescribe) {
        self.source.add_field(field.clone());
        self.target.add_field(field);
    }
}

/// Compiles a script against two stores.
pub struct ScriptCompiler<'a> {
    script: &'a Script,
    source: &'a mut StoreHandle,
    target: &'a mut StoreHandle,
    password: Option<&'a str>,
    describes: HashMap<String, DescribePair>,
}

impl<'a> ScriptCompiler<'a> {
    /// Create a compiler.
    pub fn new(script: &'a Script, source: &'a mut StoreHandle, target: &'a mut StoreHandle) -> Self {
        Self {
            script,
            source,
            target,
            password: None,
            describes: HashMap::new(),
        }
    }

    /// Decrypt store credentials with this password.
    pub fn with_password(mut self, password: Option<&'a str>) -> Self {
        self.password = password;
        self
    }

    /// Compile the script.
    pub fn compile(mut self) -> Result<ObjectGraph> {
        self.resolve_credentials();

        let mut graph = self.parse_objects()?;
        Self::add_record_type(&mut graph);

        for name in graph.names() {
            let pair = self.describe_pair(&name)?;
            self.describes.insert(name, pair);
        }

        self.add_delete_references(&mut graph);
        for plan in graph.iter_mut() {
            let pair = self
                .describes
                .get_mut(&plan.name)
                .ok_or_else(|| Error::Plan(format!("no metadata for {}", plan.name)))?;
            Self::complete_projection(plan, pair);
        }

        self.materialize(&mut graph)?;
        Self::bind_references(&mut graph)?;
        Self::filter_record_types(&mut graph);

        info!(
            objects = graph.len(),
            placeholders = graph.iter().filter(|p| p.is_placeholder()).count(),
            "script compiled"
        );
        Ok(graph)
    }

    /// Decrypt credentials on both handles, all or nothing per handle.
    fn resolve_credentials(&mut self) {
        let Some(password) = self.password else {
            return;
        };
        for handle in [&mut *self.source, &mut *self.target] {
            if handle.credentials().is_empty() {
                continue;
            }
            let credentials = crypto::decrypt_credentials(handle.credentials(), password);
            handle.set_credentials(credentials);
        }
    }

    fn parse_objects(&self) -> Result<ObjectGraph> {
        let mut graph = ObjectGraph::new();
        for entry in &self.script.objects {
            if entry.excluded && entry.operation != Operation::Readonly {
                debug!(query = %entry.query, "object excluded");
                continue;
            }
            let plan = Self::plan_entry(entry)?;
            if graph.contains(&plan.name) {
                return Err(Error::Config(format!("object {} is listed twice", plan.name)));
            }
            graph.insert(plan);
        }
        if graph.is_empty() {
            return Err(Error::Config(
                "no objects left to migrate after exclusions".to_string(),
            ));
        }
        Ok(graph)
    }

    fn plan_entry(entry: &ScriptObject) -> Result<ObjectPlan> {
        let label = entry.name.as_deref().unwrap_or("script object");
        let mut query = parse_query(&entry.query, label)?;
        if let Some(name) = &entry.name {
            if *name != query.object {
                return Err(Error::Config(format!(
                    "object {name} has a query on {}",
                    query.object
                )));
            }
        }

        let mut external_id = ExternalId::parse(entry.external_id.as_deref().unwrap_or(""));
        if external_id.is_empty() {
            external_id = ExternalId::parse(DEFAULT_EXTERNAL_ID);
        }

        let mut operation = entry.operation;
        let mut delete_old_data = entry.delete_old_data;
        if operation == Operation::Delete {
            query = query.with_fields([ID_FIELD]);
            delete_old_data = true;
        }
        if delete_old_data && operation == Operation::Upsert {
            operation = Operation::Insert;
        }

        let mut plan = ObjectPlan::new(query, operation, external_id);
        plan.delete_old_data = delete_old_data;
        plan.use_full_scan = entry.use_full_scan;
        plan.use_full_scan_on_target = entry.use_full_scan_on_target;

        if delete_old_data {
            let delete_query = match &entry.delete_query {
                Some(text) => {
                    let parsed = parse_query(text, &plan.name)?;
                    if parsed.object != plan.name {
                        return Err(Error::Config(format!(
                            "delete query of {} selects from {}",
                            plan.name, parsed.object
                        )));
                    }
                    parsed.with_fields([ID_FIELD])
                }
                None => plan.query.with_fields([ID_FIELD]),
            };
            plan.delete_query = Some(delete_query);
        }
        Ok(plan)
    }

    /// Synthesize the record type object when classification columns are used.
    fn add_record_type(graph: &mut ObjectGraph) {
        if let Some(existing) = graph.get_mut(RECORD_TYPE_OBJECT) {
            existing.external_id = ExternalId::parse(RECORD_TYPE_EXTERNAL_ID);
            existing.query.ensure_field(RECORD_TYPE_EXTERNAL_ID);
            existing.query.ensure_field(RECORD_TYPE_OBJECT_FIELD);
            return;
        }
        let classified = graph
            .iter()
            .any(|p| p.query.contains_field(RECORD_TYPE_FIELD));
        if !classified {
            return;
        }
        let query = Query::new(
            RECORD_TYPE_OBJECT,
            [ID_FIELD, RECORD_TYPE_EXTERNAL_ID, RECORD_TYPE_OBJECT_FIELD],
        );
        let mut plan = ObjectPlan::new(
            query,
            Operation::Readonly,
            ExternalId::parse(RECORD_TYPE_EXTERNAL_ID),
        );
        plan.origin = PlanOrigin::RecordType;
        debug!("record type object synthesized");
        graph.insert(plan);
    }

    /// Describe an object on both stores.
    ///
    /// A file store without metadata mirrors the other side.
    fn describe_pair(&mut self, object: &str) -> Result<DescribePair> {
        let source = self.source.describe(object)?;
        let target = self.target.describe(object)?;
        match (source, target) {
            (Some(source), Some(target)) => Ok(DescribePair { source, target }),
            (None, Some(target)) if self.source.is_file() => Ok(DescribePair {
                source: target.clone(),
                target,
            }),
            (Some(source), None) if self.target.is_file() => Ok(DescribePair {
                target: source.clone(),
                source,
            }),
            (None, _) => Err(SchemaError::ObjectMissing {
                object: object.to_string(),
                store: self.source.name().to_string(),
            }
            .into()),
            (_, None) => Err(SchemaError::ObjectMissing {
                object: object.to_string(),
                store: self.target.name().to_string(),
            }
            .into()),
        }
    }

    /// Project the reference fields of delete objects that point at other
    /// listed objects, so their ordering survives the id-only projection.
    fn add_delete_references(&self, graph: &mut ObjectGraph) {
        let listed = graph.names();
        for plan in graph.iter_mut().filter(|p| p.operation == Operation::Delete) {
            let Some(pair) = self.describes.get(&plan.name) else {
                continue;
            };
            for field in pair.target.reference_fields() {
                let Some(parent) = field.reference_to.as_deref() else {
                    continue;
                };
                if parent != plan.name && listed.iter().any(|n| n == parent) {
                    plan.query.ensure_field(field.name.clone());
                }
            }
        }
    }

    /// Put the id first, make sure the external id is projected and drop
    /// relationship paths, which the planner derives itself.
    fn complete_projection(plan: &mut ObjectPlan, pair: &mut DescribePair) {
        plan.query.ensure_field_first(ID_FIELD);

        let before = plan.query.fields.len();
        plan.query.fields.retain(|f| !f.contains('.'));
        if plan.query.fields.len() != before {
            debug!(object = %plan.name, "relationship paths dropped from projection");
        }

        if plan.is_record_type() {
            plan.query.ensure_field(RECORD_TYPE_EXTERNAL_ID);
            plan.query.ensure_field(RECORD_TYPE_OBJECT_FIELD);
        }
        if plan.operation == Operation::Delete || plan.external_id.is_empty() {
            return;
        }

        let external_id = plan.external_id.clone();
        if external_id.is_compound() {
            pair.add_field(FieldDescribe::synthesized(external_id.column()));
            for part in external_id.parts() {
                if plan.query.ensure_field(part.clone()) {
                    plan.external_id_export_only = true;
                }
            }
        } else if plan.query.ensure_field(external_id.column()) {
            plan.external_id_export_only = true;
        }
    }

    /// Build field plans, synthesizing placeholders for unlisted parents.
    fn materialize(&mut self, graph: &mut ObjectGraph) -> Result<()> {
        let mut pending: VecDeque<String> = graph.names().into();
        while let Some(name) = pending.pop_front() {
            let mut new_parents: Vec<String> = Vec::new();
            let fields = {
                let plan = graph
                    .get(&name)
                    .ok_or_else(|| Error::Plan(format!("unknown object {name}")))?;
                let pair = self
                    .describes
                    .get(&name)
                    .ok_or_else(|| Error::Plan(format!("no metadata for {name}")))?;
                let mut fields = IndexMap::new();
                for field_name in &plan.query.fields {
                    let field = self.field_plan(plan, pair, field_name)?;
                    if let Some(parent) = &field.reference_to {
                        if !graph.contains(parent) && !new_parents.contains(parent) {
                            new_parents.push(parent.clone());
                        }
                    }
                    fields.insert(field_name.clone(), field);
                }
                fields
            };
            if let Some(plan) = graph.get_mut(&name) {
                plan.fields = fields;
            }

            for parent in new_parents {
                let mut pair = self.describe_pair(&parent)?;
                let mut placeholder = placeholder_plan(&parent, &pair.target);
                Self::complete_projection(&mut placeholder, &mut pair);
                info!(object = %parent, referenced_by = %name, "placeholder object added");
                self.describes.insert(parent.clone(), pair);
                graph.insert(placeholder);
                pending.push_back(parent);
            }
        }
        Ok(())
    }

    fn field_plan(&self, plan: &ObjectPlan, pair: &DescribePair, name: &str) -> Result<FieldPlan> {
        let missing = |store: &str| -> Error {
            SchemaError::FieldMissing {
                object: plan.name.clone(),
                field: name.to_string(),
                store: store.to_string(),
            }
            .into()
        };
        let source = pair
            .source
            .field(name)
            .ok_or_else(|| missing(self.source.name()))?;
        let target = pair
            .target
            .field(name)
            .ok_or_else(|| missing(self.target.name()))?;

        let reference_to = target
            .reference_to
            .clone()
            .or_else(|| source.reference_to.clone());
        let is_external_id = plan.external_id.parts().iter().any(|p| p == name);
        let export_only =
            !target.is_writable() || (is_external_id && plan.external_id_export_only);

        Ok(FieldPlan {
            name: name.to_string(),
            relationship: reference_to.as_ref().map(|_| target.relationship()),
            reference_to,
            is_master_detail: target.master_detail,
            export_only,
            parent_external_id: None,
        })
    }

    /// Point every reference field at its parent's external id and build
    /// the per-object reference indexes.
    fn bind_references(graph: &mut ObjectGraph) -> Result<()> {
        let external_ids: HashMap<String, ExternalId> = graph
            .iter()
            .map(|p| (p.name.clone(), p.external_id.clone()))
            .collect();

        for plan in graph.iter_mut() {
            plan.referenced_objects.clear();
            plan.referenced_fields.clear();
            let name = plan.name.clone();
            for field in plan.fields.values_mut() {
                let Some(parent) = field.reference_to.clone() else {
                    continue;
                };
                let external_id = external_ids
                    .get(&parent)
                    .filter(|e| !e.is_empty())
                    .ok_or_else(|| {
                        Error::Plan(format!(
                            "{name}.{} references {parent}, which has no external id",
                            field.name
                        ))
                    })?;
                field.parent_external_id = Some(external_id.column());
                if let Some(column) = field.lookup_column() {
                    plan.referenced_fields
                        .insert(column, (field.name.clone(), external_id.column()));
                }
                if parent != name {
                    plan.referenced_objects.insert(parent);
                }
            }
        }
        Ok(())
    }

    /// Restrict record types to the objects whose records are classified.
    fn filter_record_types(graph: &mut ObjectGraph) {
        let classified: Vec<String> = graph
            .iter()
            .filter(|p| p.fields.contains_key(RECORD_TYPE_FIELD))
            .map(|p| p.name.clone())
            .collect();
        if classified.is_empty() {
            return;
        }
        if let Some(record_type) = graph.get_mut(RECORD_TYPE_OBJECT) {
            debug!(objects = ?classified, "record types filtered by object");
            record_type
                .query
                .and_where(Condition::in_list(RECORD_TYPE_OBJECT_FIELD, classified));
        }
    }
}

/// Read-only plan for a referenced object the script does not list.
fn placeholder_plan(object: &str, describe: &ObjectDescribe) -> ObjectPlan {
    let has_name = describe.has_field(DEFAULT_EXTERNAL_ID);
    let (fields, external_id) = if has_name {
        (vec![ID_FIELD, DEFAULT_EXTERNAL_ID], DEFAULT_EXTERNAL_ID)
    } else {
        (vec![ID_FIELD], "")
    };
    let mut plan = ObjectPlan::new(
        Query::new(object, fields),
        Operation::Readonly,
        ExternalId::parse(external_id),
    );
    plan.origin = PlanOrigin::Placeholder;
    plan
}

fn parse_query(text: &str, object: &str) -> Result<Query> {
    recmig_query::parse(text).map_err(|source| Error::Query {
        object: object.to_string(),
        rendered: source.render(text),
        source,
    })
}
