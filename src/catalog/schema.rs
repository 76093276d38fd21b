// Schema Types Module
//
// This module defines the data types known to the optimizer's catalog.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Data types supported by the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
    Timestamp,
    Blob,
}

impl DataType {
    /// Bytes a value of this type occupies in a temporary-table key.
    /// Variable-size types use a fixed prefix length.
    pub fn key_length(&self) -> usize {
        match self {
            DataType::Integer => 8,
            DataType::Float => 8,
            DataType::Boolean => 1,
            DataType::Date => 4,
            DataType::Timestamp => 8,
            DataType::Text => 32,
            DataType::Blob => 32,
        }
    }

    /// Blobs cannot be used as a temporary-table key
    pub fn is_keyable(&self) -> bool {
        !matches!(self, DataType::Blob)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Integer => "INTEGER",
            DataType::Float => "FLOAT",
            DataType::Text => "TEXT",
            DataType::Boolean => "BOOLEAN",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Blob => "BLOB",
        };
        write!(f, "{}", name)
    }
}
