// Column Management Module
//
// This module defines the Column type that represents a table column.

use super::schema::DataType;
use serde::{Serialize, Deserialize};

/// Represents a column in a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    name: String,
    /// Column data type
    data_type: DataType,
    /// Whether this column can contain NULL values
    nullable: bool,
    /// Collation for text columns
    collation: Option<String>,
}

impl Column {
    /// Create a new column
    pub fn new(name: &str, data_type: DataType, nullable: bool) -> Self {
        Column {
            name: name.to_string(),
            data_type,
            nullable,
            collation: None,
        }
    }

    /// Builder-style collation setter
    pub fn with_collation(mut self, collation: &str) -> Self {
        self.collation = Some(collation.to_string());
        self
    }

    /// Get the column name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the column data type
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Check if the column can contain NULL values
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn collation(&self) -> Option<&str> {
        self.collation.as_deref()
    }
}
