//! Table Metadata Module
//!
//! This module defines the Table type together with the index and statistics
//! metadata the cost model reads.

use super::column::Column;
use super::{ValidationError, ValidationResult};
use serde::{Serialize, Deserialize};

/// Index over one or more columns of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    /// Average number of rows sharing one full key value
    pub rows_per_key: f64,
}

impl Index {
    pub fn unique(name: &str, columns: &[&str]) -> Self {
        Index {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: true,
            rows_per_key: 1.0,
        }
    }

    pub fn non_unique(name: &str, columns: &[&str], rows_per_key: f64) -> Self {
        Index {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
            rows_per_key,
        }
    }
}

/// Statistics the optimizer uses for a base table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStatistics {
    /// Estimated number of rows
    pub row_count: f64,
    /// Cost of one full table scan
    pub scan_cost: f64,
    /// Length in bytes of a row identifier
    pub rowid_length: usize,
}

impl TableStatistics {
    pub fn new(row_count: f64) -> Self {
        TableStatistics {
            row_count,
            scan_cost: (row_count / 10.0).max(1.0),
            rowid_length: 8,
        }
    }
}

impl Default for TableStatistics {
    fn default() -> Self {
        TableStatistics::new(1000.0)
    }
}

/// Represents a table definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name
    name: String,
    /// Columns in the table
    columns: Vec<Column>,
    /// Indexes defined on the table
    #[serde(default)]
    indexes: Vec<Index>,
    #[serde(default)]
    statistics: TableStatistics,
}

impl Table {
    /// Create a new table with the given name and columns
    pub fn new(name: &str, columns: Vec<Column>) -> Self {
        Table {
            name: name.to_string(),
            columns,
            indexes: Vec::new(),
            statistics: TableStatistics::default(),
        }
    }

    /// Builder-style index registration
    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_statistics(mut self, statistics: TableStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    /// Get the table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get all columns
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Get a column by name
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Check if the table has a column with the given name
    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn statistics(&self) -> &TableStatistics {
        &self.statistics
    }

    /// Check column names are unique and every index column exists
    pub fn validate(&self) -> ValidationResult<()> {
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name() == col.name()) {
                return Err(ValidationError::DuplicateColumn {
                    table: self.name.clone(),
                    column: col.name().to_string(),
                });
            }
        }
        for index in &self.indexes {
            if let Some(missing) = index.columns.iter().find(|c| !self.has_column(c)) {
                return Err(ValidationError::InvalidIndex {
                    table: self.name.clone(),
                    index: index.name.clone(),
                    column: missing.clone(),
                });
            }
        }
        if !(self.statistics.row_count >= 0.0) || !(self.statistics.scan_cost >= 0.0) {
            return Err(ValidationError::InvalidStatistics(
                self.name.clone(),
                "row count and scan cost must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}
