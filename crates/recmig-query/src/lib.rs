//! recmig query text
//!
//! Parser and composer for the `SELECT ... FROM ...` query dialect used in
//! migration scripts. The migration engine treats queries as structured
//! values: it parses the text once, rewrites projections and predicates,
//! and composes text again only when a store needs it.
//!
//! # Syntax
//!
//! ```text
//! SELECT Id, Name, Account__r.Code__c FROM Contact
//! SELECT Id FROM Account WHERE Type IN ('Customer', 'Partner') AND NOT Name LIKE 'Test%'
//! SELECT Id, Name FROM Account ORDER BY Name DESC LIMIT 100 OFFSET 20
//! ```
//!
//! # Usage
//!
//! ```rust
//! use recmig_query::{parse, Condition};
//!
//! let mut query = parse("SELECT Id, Name FROM Account").unwrap();
//! query.and_where(Condition::in_list("Id", ["001A", "001B"]));
//! assert_eq!(
//!     query.to_string(),
//!     "SELECT Id, Name FROM Account WHERE Id IN ('001A', '001B')"
//! );
//! ```

pub mod ast;
pub mod compose;
pub mod error;
pub mod lexer;
pub mod parser;

pub use ast::{CompareOp, Condition, Literal, OrderBy, Query, SortDirection};
pub use error::{ParseError, ParseErrorKind};

/// Parse query text into a structured [`Query`].
///
/// ```rust
/// let query = recmig_query::parse("SELECT Id FROM Account LIMIT 10").unwrap();
/// assert_eq!(query.object, "Account");
/// assert_eq!(query.limit, Some(10));
/// ```
pub fn parse(source: &str) -> Result<Query, ParseError> {
    parser::parse(source)
}

/// Compose a structured query back into text.
pub fn compose(query: &Query) -> String {
    query.to_string()
}

/// Tokenize query text (for debugging/testing).
pub fn tokenize(source: &str) -> Vec<lexer::SpannedToken> {
    lexer::tokenize(source)
}
