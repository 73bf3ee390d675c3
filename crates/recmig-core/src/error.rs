//! Core error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Migration errors, grouped by the stage that raises them.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid invocation or script.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading or writing a file failed.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record file could not be read or written as CSV.
    #[error("csv error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A JSON document could not be parsed.
    #[error("invalid json in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An object query failed to parse.
    #[error("invalid query for {object}:\n{rendered}")]
    Query {
        object: String,
        rendered: String,
        #[source]
        source: recmig_query::ParseError,
    },

    /// A type or field is missing on one of the stores.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The reference graph cannot be planned.
    #[error("plan error: {0}")]
    Plan(String),

    /// A remote query or write failed.
    #[error("run error on {object}: {message}")]
    Run { object: String, message: String },

    /// The operator declined to continue at a prompt.
    #[error("execution aborted by user: {0}")]
    UserAborted(String),

    /// Encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Error::Csv {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn run(object: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Run {
            object: object.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error was raised by an explicit decline at a prompt.
    pub fn is_user_abort(&self) -> bool {
        matches!(self, Error::UserAborted(_))
    }
}

/// Metadata missing on a store.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The object type is not described by the store.
    #[error("object {object} is missing on {store}")]
    ObjectMissing { object: String, store: String },

    /// A projected field is not described by the store.
    #[error("field {object}.{field} is missing on {store}")]
    FieldMissing {
        object: String,
        field: String,
        store: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_display() {
        let err: Error = SchemaError::FieldMissing {
            object: "Contact".to_string(),
            field: "Code__c".to_string(),
            store: "target".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "schema error: field Contact.Code__c is missing on target"
        );
    }

    #[test]
    fn test_user_abort() {
        assert!(Error::UserAborted("declined".into()).is_user_abort());
        assert!(!Error::Plan("cycle".into()).is_user_abort());
    }
}
