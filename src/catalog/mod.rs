//! Catalog Module
//!
//! This module holds the table metadata consulted by the optimizer: columns,
//! indexes and statistics.

pub mod schema;
pub mod table;
pub mod column;
pub mod compatibility;
pub mod validation_error;

// Re-export key types
pub use self::schema::DataType;
pub use self::table::{Table, Index, TableStatistics};
pub use self::column::Column;
pub use self::compatibility::{TypeInfo, check_equality_compatibility, check_materialization_key};
pub use self::validation_error::{ValidationError, ValidationResult};

use linked_hash_map::LinkedHashMap;
use serde::{Serialize, Deserialize};

/// The Catalog is the repository of table definitions, kept in
/// registration order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    tables: LinkedHashMap<String, Table>,
}

impl Catalog {
    /// Create a new, empty catalog
    pub fn new() -> Self {
        Catalog { tables: LinkedHashMap::new() }
    }

    /// Register a table
    pub fn create_table(&mut self, table: Table) -> ValidationResult<()> {
        if self.tables.contains_key(table.name()) {
            return Err(ValidationError::DuplicateTable(table.name().to_string()));
        }
        table.validate()?;
        self.tables.insert(table.name().to_string(), table);
        Ok(())
    }

    /// Get a table by name
    pub fn get_table(&self, table_name: &str) -> ValidationResult<&Table> {
        self.tables
            .get(table_name)
            .ok_or_else(|| ValidationError::TableNotFound(table_name.to_string()))
    }

    /// Tables in registration order
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Validate every table, used after loading a catalog from JSON
    pub fn validate(&self) -> ValidationResult<()> {
        for table in self.tables.values() {
            table.validate()?;
        }
        Ok(())
    }
}
