//! Compiled object plans.
//!
//! The compiler turns script entries into [`ObjectPlan`]s held in an
//! [`ObjectGraph`]. Plans refer to each other by object name only.

use crate::record::{Record, Value, ID_FIELD};
use crate::script::Operation;
use indexmap::{IndexMap, IndexSet};
use recmig_query::Query;

/// Object holding record type classifications.
pub const RECORD_TYPE_OBJECT: &str = "RecordType";

/// Reference field pointing at a record type.
pub const RECORD_TYPE_FIELD: &str = "RecordTypeId";

/// External id of record types.
pub const RECORD_TYPE_EXTERNAL_ID: &str = "DeveloperName";

/// Field naming the object a record type belongs to.
pub const RECORD_TYPE_OBJECT_FIELD: &str = "SobjectType";

/// External id used when the script names none.
pub const DEFAULT_EXTERNAL_ID: &str = "Name";

/// Prefix of virtual compound external id columns.
pub const COMPOUND_FIELD_PREFIX: &str = "$$";

/// Separator between component names in a compound column name.
pub const COMPOUND_FIELD_SEPARATOR: char = '$';

/// Separator between component names in the script, and values in keys.
pub const COMPOUND_VALUE_SEPARATOR: char = ';';

/// An external id: one field, or several forming a compound key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalId {
    parts: Vec<String>,
}

impl ExternalId {
    /// Parse `Field` or `Field1;Field2`. Blank input yields an empty id.
    pub fn parse(text: &str) -> Self {
        let parts = text
            .split(COMPOUND_VALUE_SEPARATOR)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        Self { parts }
    }

    /// Parse a column name: plain, or `$$Field1$Field2`.
    pub fn from_column(column: &str) -> Self {
        match column.strip_prefix(COMPOUND_FIELD_PREFIX) {
            Some(rest) => Self {
                parts: rest
                    .split(COMPOUND_FIELD_SEPARATOR)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect(),
            },
            None => Self::parse(column),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn is_compound(&self) -> bool {
        self.parts.len() > 1
    }

    /// Component fields.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Column holding the id: the field itself, or the virtual compound column.
    pub fn column(&self) -> String {
        if self.is_compound() {
            let joined: Vec<&str> = self.parts.iter().map(String::as_str).collect();
            format!(
                "{COMPOUND_FIELD_PREFIX}{}",
                joined.join(&COMPOUND_FIELD_SEPARATOR.to_string())
            )
        } else {
            self.parts.first().cloned().unwrap_or_default()
        }
    }

    /// Compute the compound value of a record from prefixed component columns.
    ///
    /// Returns `None` when every component is blank.
    pub fn compound_value(&self, record: &Record, prefix: &str) -> Option<String> {
        let values: Vec<String> = self
            .parts
            .iter()
            .map(|p| record.text(&format!("{prefix}{p}")).unwrap_or_default())
            .collect();
        if values.iter().all(String::is_empty) {
            None
        } else {
            Some(values.join(&COMPOUND_VALUE_SEPARATOR.to_string()))
        }
    }
}

impl std::fmt::Display for ExternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.column())
    }
}

/// A projected field with its resolved metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPlan {
    pub name: String,
    /// Referenced object, for reference fields.
    pub reference_to: Option<String>,
    /// Relationship name used for lookup columns.
    pub relationship: Option<String>,
    pub is_master_detail: bool,
    /// Read for matching only, never written.
    pub export_only: bool,
    /// External id column of the referenced object.
    pub parent_external_id: Option<String>,
}

impl FieldPlan {
    pub fn is_reference(&self) -> bool {
        self.reference_to.is_some()
    }

    /// Column carrying the parent's external id, e.g. `Account__r.Code__c`.
    pub fn lookup_column(&self) -> Option<String> {
        match (&self.relationship, &self.parent_external_id) {
            (Some(rel), Some(ext)) => Some(format!("{rel}.{ext}")),
            _ => None,
        }
    }
}

/// Where a plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOrigin {
    /// Listed in the script.
    Script,
    /// Synthesized for a referenced object missing from the script.
    Placeholder,
    /// Synthesized record type classification object.
    RecordType,
}

/// A compiled object: its query, operation and resolved fields.
#[derive(Debug, Clone)]
pub struct ObjectPlan {
    pub name: String,
    pub operation: Operation,
    pub external_id: ExternalId,
    pub query: Query,
    /// Query selecting target rows to delete before the run.
    pub delete_query: Option<Query>,
    /// Resolved fields in projection order.
    pub fields: IndexMap<String, FieldPlan>,
    /// Objects referenced by this plan's reference fields.
    pub referenced_objects: IndexSet<String>,
    /// Reference field to (field, referenced external id column).
    pub referenced_fields: IndexMap<String, (String, String)>,
    pub origin: PlanOrigin,
    pub delete_old_data: bool,
    pub use_full_scan: bool,
    pub use_full_scan_on_target: bool,
    /// The external id was added to the projection by the compiler.
    pub external_id_export_only: bool,
}

impl ObjectPlan {
    /// Create a plan from a parsed query.
    pub fn new(query: Query, operation: Operation, external_id: ExternalId) -> Self {
        Self {
            name: query.object.clone(),
            operation,
            external_id,
            query,
            delete_query: None,
            fields: IndexMap::new(),
            referenced_objects: IndexSet::new(),
            referenced_fields: IndexMap::new(),
            origin: PlanOrigin::Script,
            delete_old_data: false,
            use_full_scan: false,
            use_full_scan_on_target: false,
            external_id_export_only: false,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.origin == PlanOrigin::Placeholder
    }

    pub fn is_synthesized(&self) -> bool {
        self.origin != PlanOrigin::Script
    }

    pub fn is_record_type(&self) -> bool {
        self.name == RECORD_TYPE_OBJECT
    }

    /// Column holding this object's external id.
    pub fn external_id_column(&self) -> String {
        self.external_id.column()
    }

    /// Reference fields in projection order.
    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldPlan> {
        self.fields.values().filter(|f| f.is_reference())
    }

    /// Whether some master-detail field of this plan points at `master`.
    pub fn is_detail_of(&self, master: &str) -> bool {
        self.reference_fields()
            .any(|f| f.is_master_detail && f.reference_to.as_deref() == Some(master))
    }

    /// Fields the write pass may send, excluding identifiers and references.
    pub fn writable_plain_fields(&self) -> impl Iterator<Item = &FieldPlan> {
        self.fields
            .values()
            .filter(|f| f.name != ID_FIELD && !f.export_only && !f.is_reference())
    }

    /// Matching key of a record.
    ///
    /// Record types are keyed by `SobjectType;DeveloperName`; compound ids by
    /// their virtual column.
    pub fn key_of(&self, record: &Record) -> Option<String> {
        if self.is_record_type() {
            let object = record.text(RECORD_TYPE_OBJECT_FIELD)?;
            let name = record.text(RECORD_TYPE_EXTERNAL_ID)?;
            return Some(record_type_key(&object, &name));
        }
        let column = self.external_id_column();
        record
            .text(&column)
            .or_else(|| {
                self.external_id
                    .is_compound()
                    .then(|| self.external_id.compound_value(record, ""))
                    .flatten()
            })
    }

    /// Fill the virtual compound external id column on a record.
    pub fn fill_compound_key(&self, record: &mut Record) {
        if self.external_id.is_compound() {
            let value = self.external_id.compound_value(record, "");
            record.set(self.external_id_column(), Value::from(value));
        }
    }
}

/// Lookup key of a record type for one object.
pub fn record_type_key(object: &str, developer_name: &str) -> String {
    format!("{object}{COMPOUND_VALUE_SEPARATOR}{developer_name}")
}

/// All compiled plans, in script order followed by synthesized plans.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    objects: IndexMap<String, ObjectPlan>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plan, replacing any with the same name.
    pub fn insert(&mut self, plan: ObjectPlan) {
        self.objects.insert(plan.name.clone(), plan);
    }

    pub fn get(&self, name: &str) -> Option<&ObjectPlan> {
        self.objects.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ObjectPlan> {
        self.objects.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectPlan> {
        self.objects.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ObjectPlan> {
        self.objects.values_mut()
    }

    pub fn names(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
