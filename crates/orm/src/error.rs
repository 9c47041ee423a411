//! Error types for the data-access layer
//!
//! Provides error handling for relationship configuration, query building,
//! statement execution, and cache bookkeeping.

use std::fmt;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for ORM operations
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Database connection or statement error
    Database(String),
    /// Update/delete matched no rows in the named table
    NotFound(String),
    /// Relationship configuration is invalid (registration time)
    Configuration(String),
    /// A filter/eager/prefetch path references an unknown field or an edge
    /// kind not permitted in that context (compile time)
    InvalidPath(String),
    /// A forward relationship with a null identifier was dereferenced
    NullRelationship(String),
    /// Foreign key constraint violation, carrying the attempted operation
    Integrity {
        table: String,
        operation: String,
        message: String,
    },
    /// Serialization/deserialization error
    Serialization(String),
    /// Connection lifecycle error
    Connection(String),
    /// Query building error
    Query(String),
    /// Transaction error
    Transaction(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Database(msg) => write!(f, "Database error: {}", msg),
            ModelError::NotFound(table) => write!(f, "Record not found in table '{}'", table),
            ModelError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ModelError::InvalidPath(msg) => write!(f, "Invalid relationship path: {}", msg),
            ModelError::NullRelationship(msg) => write!(f, "Null relationship: {}", msg),
            ModelError::Integrity {
                table,
                operation,
                message,
            } => write!(
                f,
                "Integrity violation during {} on '{}': {}",
                operation, table, message
            ),
            ModelError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ModelError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ModelError::Query(msg) => write!(f, "Query error: {}", msg),
            ModelError::Transaction(msg) => write!(f, "Transaction error: {}", msg),
        }
    }
}

impl std::error::Error for ModelError {}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ModelError::NotFound("books".to_string());
        assert_eq!(err.to_string(), "Record not found in table 'books'");

        let err = ModelError::Integrity {
            table: "books".to_string(),
            operation: "insert".to_string(),
            message: "FOREIGN KEY constraint failed".to_string(),
        };
        assert!(err.to_string().contains("insert"));
        assert!(err.to_string().contains("books"));
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<i64>("not a number").unwrap_err();
        let err: ModelError = json_err.into();
        assert!(matches!(err, ModelError::Serialization(_)));
    }
}
