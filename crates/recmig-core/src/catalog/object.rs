//! Object type metadata.

use super::field::FieldDescribe;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Metadata for an object type: its name and fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescribe {
    /// Object type name.
    pub name: String,
    /// Fields keyed by name.
    #[serde(with = "field_list")]
    pub fields: IndexMap<String, FieldDescribe>,
}

impl ObjectDescribe {
    /// Create an object with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    /// Add a field.
    pub fn with_field(mut self, field: FieldDescribe) -> Self {
        self.add_field(field);
        self
    }

    /// Add plain writable fields by name.
    pub fn with_fields<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        for name in names {
            self.add_field(FieldDescribe::new(name));
        }
        self
    }

    /// Insert or replace a field.
    pub fn add_field(&mut self, field: FieldDescribe) {
        self.fields.insert(field.name.clone(), field);
    }

    /// Get a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescribe> {
        self.fields.get(name)
    }

    /// Check if a field exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Fields that reference other object types.
    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldDescribe> {
        self.fields.values().filter(|f| f.is_reference())
    }

    /// Find the reference field whose relationship name matches.
    pub fn field_by_relationship(&self, relationship: &str) -> Option<&FieldDescribe> {
        self.reference_fields().find(|f| f.relationship() == relationship)
    }
}

/// Fields serialize as a list; the map is rebuilt on load.
mod field_list {
    use super::FieldDescribe;
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        fields: &IndexMap<String, FieldDescribe>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let list: Vec<&FieldDescribe> = fields.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<IndexMap<String, FieldDescribe>, D::Error> {
        let list = Vec::<FieldDescribe>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|f| (f.name.clone(), f)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_lookup() {
        let contact = ObjectDescribe::new("Contact")
            .with_fields(["Id", "LastName"])
            .with_field(FieldDescribe::reference("AccountId", "Account"));

        assert!(contact.has_field("LastName"));
        assert_eq!(contact.reference_fields().count(), 1);
        assert_eq!(
            contact.field_by_relationship("Account").map(|f| f.name.as_str()),
            Some("AccountId")
        );
    }

    #[test]
    fn test_json_field_list() {
        let json = r#"{"name":"Account","fields":[{"name":"Id"},{"name":"Name"}]}"#;
        let describe: ObjectDescribe = serde_json::from_str(json).unwrap();
        assert_eq!(describe.fields.keys().collect::<Vec<_>>(), vec!["Id", "Name"]);
    }
}
