use thiserror::Error;

/// Errors raised while registering or checking catalog metadata
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Table not found: {0}")]
    TableNotFound(String),
    #[error("Table already exists: {0}")]
    DuplicateTable(String),
    #[error("Column not found: {0}")]
    ColumnNotFound(String),
    #[error("Duplicate column {column} in table {table}")]
    DuplicateColumn { table: String, column: String },
    #[error("Index {index} on table {table} references unknown column {column}")]
    InvalidIndex { table: String, index: String, column: String },
    #[error("Incompatible types for operation: {0} {1} {2}")]
    IncompatibleTypes(String, String, String),
    #[error("Illegal mix of collations ({0}) and ({1})")]
    CollationMismatch(String, String),
    #[error("Invalid statistics for table {0}: {1}")]
    InvalidStatistics(String, String),
}

/// Catalog validation result
pub type ValidationResult<T> = Result<T, ValidationError>;
