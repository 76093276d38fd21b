// Optimizer Configuration
//
// This module defines the switches and limits consulted by subquery
// conversion, strategy selection and the join-order search.

use serde::{Serialize, Deserialize};

use crate::common::types::MAX_TABLES;
use crate::query::planner::error::{PlannerError, PlannerResult};

/// Optimizer switches and limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Allow merging subqueries into the parent join as semi-join nests
    pub semijoin: bool,
    pub firstmatch: bool,
    pub loosescan: bool,
    /// Allow materialization, both for nests and for non-mergeable subqueries
    pub materialization: bool,
    pub in_to_exists: bool,
    /// Allow join buffering inside FirstMatch spans with a single inner table
    pub semijoin_with_cache: bool,
    /// Join buffering level, 0 disables it
    pub join_cache_level: u32,
    /// Largest in-memory temporary table, in bytes
    pub max_heap_table_size: u64,
    /// Table slot budget for one query block
    pub max_tables: usize,
    /// Rows held by one join buffer fill
    pub join_buffer_rows: f64,
    /// Branch-and-bound pruning in the join-order search
    pub prune_search: bool,
    pub trace: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            semijoin: true,
            firstmatch: true,
            loosescan: true,
            materialization: true,
            in_to_exists: true,
            semijoin_with_cache: true,
            join_cache_level: 2,
            max_heap_table_size: 16 * 1024 * 1024,
            max_tables: MAX_TABLES,
            join_buffer_rows: 128.0,
            prune_search: true,
            trace: false,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> PlannerResult<()> {
        if self.max_tables == 0 || self.max_tables > MAX_TABLES {
            return Err(PlannerError::InvalidInput(format!(
                "max_tables must be between 1 and {}, got {}",
                MAX_TABLES, self.max_tables
            )));
        }
        if !(self.join_buffer_rows >= 1.0) {
            return Err(PlannerError::InvalidInput(format!(
                "join_buffer_rows must be at least 1, got {}",
                self.join_buffer_rows
            )));
        }
        if !self.materialization && !self.in_to_exists {
            return Err(PlannerError::InvalidInput(
                "at least one of materialization and in_to_exists must be enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn join_buffering_enabled(&self) -> bool {
        self.join_cache_level > 0
    }
}
