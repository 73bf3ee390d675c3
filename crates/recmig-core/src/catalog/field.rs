//! Field metadata.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Metadata for a single field of an object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescribe {
    /// Field name.
    pub name: String,
    /// Referenced object type, for lookup fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_to: Option<String>,
    /// Relationship name used in dotted paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_name: Option<String>,
    /// Whether the reference is master-detail.
    #[serde(default)]
    pub master_detail: bool,
    #[serde(default = "default_true")]
    pub creatable: bool,
    #[serde(default = "default_true")]
    pub updateable: bool,
    /// Formula or rollup field, never writable.
    #[serde(default)]
    pub calculated: bool,
    /// Synthesized by the engine rather than reported by a store.
    #[serde(skip)]
    pub is_virtual: bool,
}

impl FieldDescribe {
    /// Create a plain writable field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference_to: None,
            relationship_name: None,
            master_detail: false,
            creatable: true,
            updateable: true,
            calculated: false,
            is_virtual: false,
        }
    }

    /// Create a lookup field referencing another object type.
    pub fn reference(name: impl Into<String>, reference_to: impl Into<String>) -> Self {
        Self {
            reference_to: Some(reference_to.into()),
            ..Self::new(name)
        }
    }

    /// Create a master-detail field referencing its master.
    pub fn master_detail(name: impl Into<String>, master: impl Into<String>) -> Self {
        Self {
            master_detail: true,
            ..Self::reference(name, master)
        }
    }

    /// Create a field that can be read but never written.
    pub fn readonly(name: impl Into<String>) -> Self {
        Self {
            creatable: false,
            updateable: false,
            ..Self::new(name)
        }
    }

    /// Create an engine-side field that no store holds.
    pub fn synthesized(name: impl Into<String>) -> Self {
        Self {
            is_virtual: true,
            ..Self::readonly(name)
        }
    }

    /// Set the relationship name.
    pub fn with_relationship(mut self, relationship: impl Into<String>) -> Self {
        self.relationship_name = Some(relationship.into());
        self
    }

    /// Whether the field references another object type.
    pub fn is_reference(&self) -> bool {
        self.reference_to.is_some()
    }

    /// Whether the engine may write this field.
    pub fn is_writable(&self) -> bool {
        (self.creatable || self.updateable) && !self.calculated && !self.is_virtual
    }

    /// Relationship name for dotted paths through this field.
    ///
    /// Falls back to the naming convention when the store reports none:
    /// `Account__c` becomes `Account__r` and `AccountId` becomes `Account`.
    pub fn relationship(&self) -> String {
        if let Some(name) = &self.relationship_name {
            return name.clone();
        }
        if let Some(stem) = self.name.strip_suffix("__c") {
            format!("{stem}__r")
        } else if let Some(stem) = self.name.strip_suffix("Id").filter(|s| !s.is_empty()) {
            stem.to_string()
        } else {
            self.name.clone()
        }
    }
}
