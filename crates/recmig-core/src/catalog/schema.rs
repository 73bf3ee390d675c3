//! A set of object descriptions, loadable from a `schema.json` file.

use super::ObjectDescribe;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Object descriptions keyed by object name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Described objects.
    pub objects: Vec<ObjectDescribe>,
    #[serde(skip)]
    index: IndexMap<String, usize>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object description, replacing one with the same name.
    pub fn with_object(mut self, object: ObjectDescribe) -> Self {
        self.add_object(object);
        self
    }

    /// Insert or replace an object description.
    pub fn add_object(&mut self, object: ObjectDescribe) {
        match self.index.get(&object.name) {
            Some(&i) => self.objects[i] = object,
            None => {
                self.index.insert(object.name.clone(), self.objects.len());
                self.objects.push(object);
            }
        }
    }

    /// Look up an object by name.
    pub fn get(&self, name: &str) -> Option<&ObjectDescribe> {
        self.index.get(name).map(|&i| &self.objects[i])
    }

    /// Number of described objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Parse a catalog from JSON.
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let parsed: Catalog = serde_json::from_str(json)?;
        let mut catalog = Catalog::new();
        for object in parsed.objects {
            catalog.add_object(object);
        }
        Ok(catalog)
    }

    /// Load a catalog from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&text).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}
