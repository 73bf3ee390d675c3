//! recmig core - record migration between stores.
//!
//! Moves records of related object types from a source store to a target
//! store, matching records by external id instead of store-assigned
//! identifiers and rewriting references so they point at target records.
//!
//! The crate provides the record model, store metadata, the script
//! document, the store contract with file and in-memory stores, and the
//! migration engine.

pub mod catalog;
pub mod crypto;
pub mod error;
pub mod migration;
pub mod record;
pub mod script;
pub mod store;

pub use catalog::{Catalog, FieldDescribe, ObjectDescribe};
pub use crypto::{decrypt_value, encrypt_value, Cipher};
pub use error::{Error, Result, SchemaError};
pub use migration::{
    Confirm, ConfirmPolicy, MigrationConfig, MigrationExecutor, MigrationReport, MigrationRunner,
    ScriptCompiler, TaskPlanner,
};
pub use record::{Record, Value};
pub use script::{Operation, Script, ScriptObject, StoreKind, StoreSelector};
pub use store::{FileStore, MemoryStore, RecordStore, StoreHandle};

/// Re-export of the query crate.
pub use recmig_query as query;
