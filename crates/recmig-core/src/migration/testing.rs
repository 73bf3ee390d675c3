//! Shared fixtures for engine unit tests.

use crate::catalog::{Catalog, FieldDescribe, ObjectDescribe};
use crate::script::{Operation, Script, ScriptObject};
use crate::store::{MemoryStore, StoreHandle};

/// A small CRM-like catalog with lookups, a self reference, a cycle and a
/// master-detail pair.
pub fn catalog() -> Catalog {
    Catalog::new()
        .with_object(
            ObjectDescribe::new("Account")
                .with_fields(["Id", "Name", "Code__c", "Rating__c"])
                .with_field(FieldDescribe::reference("Parent__c", "Account"))
                .with_field(FieldDescribe::reference("PrimaryContact__c", "Contact"))
                .with_field(FieldDescribe::reference("RecordTypeId", "RecordType"))
                .with_field(FieldDescribe::readonly("Formula__c")),
        )
        .with_object(
            ObjectDescribe::new("Contact")
                .with_fields(["Id", "LastName", "Email"])
                .with_field(FieldDescribe::reference("Account__c", "Account"))
                .with_field(FieldDescribe::reference("ReportsTo__c", "Contact")),
        )
        .with_object(
            ObjectDescribe::new("Case")
                .with_fields(["Id", "Subject"])
                .with_field(FieldDescribe::reference("Account__c", "Account"))
                .with_field(FieldDescribe::reference("Contact__c", "Contact")),
        )
        .with_object(
            ObjectDescribe::new("Invoice__c")
                .with_fields(["Id", "Name"])
                .with_field(FieldDescribe::master_detail("Account__c", "Account")),
        )
        .with_object(
            ObjectDescribe::new("RecordType")
                .with_fields(["Id", "Name", "DeveloperName", "SobjectType"]),
        )
}

/// A live handle over a memory store.
pub fn live(name: &str, catalog: Catalog) -> StoreHandle {
    StoreHandle::live(name, MemoryStore::new(catalog))
}

/// A script from `(query, operation, external id)` entries.
pub fn script(entries: &[(&str, Operation, Option<&str>)]) -> Script {
    let objects = entries
        .iter()
        .map(|(query, operation, external_id)| {
            let object = ScriptObject::new(*query, *operation);
            match external_id {
                Some(ext) => object.with_external_id(*ext),
                None => object,
            }
        })
        .collect();
    Script::new(objects)
}
