//! Object metadata as reported by stores.
//!
//! Stores describe each object type they hold: its fields, which of them
//! reference other types, and which are writable.

mod field;
mod object;
mod schema;

pub use field::FieldDescribe;
pub use object::ObjectDescribe;
pub use schema::Catalog;
