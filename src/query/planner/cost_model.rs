// Cost Model for Query Optimization
//
// This module provides the access-path estimates consumed by the join-order
// search and the semi-join strategy pickers, plus the temporary-table costs
// used by materialization and duplicate weedout.

use serde::{Serialize, Deserialize};

use crate::catalog::Index;
use crate::common::types::{TableId, TableMap};
use crate::query::planner::config::OptimizerConfig;
use crate::query::planner::error::{PlannerError, PlannerResult};
use crate::query::planner::semijoin::context::{SemiJoinContext, TableInfo};

/// Cost of comparing one row against the join condition
pub const TIME_FOR_COMPARE: f64 = 5.0;

/// Cost of one lookup or write into an in-memory temporary table
pub const HEAP_TEMPTABLE_LOOKUP_COST: f64 = 0.05;

/// Cost of one lookup or write into an on-disk temporary table
pub const DISK_TEMPTABLE_LOOKUP_COST: f64 = 1.0;

/// Cost of one lookup into a temporary table holding `rows` rows of
/// `row_size` bytes
pub fn tmp_table_lookup_cost(config: &OptimizerConfig, rows: f64, row_size: usize) -> f64 {
    let heap_rows = config.max_heap_table_size as f64 / row_size.max(1) as f64;
    if rows > heap_rows {
        DISK_TEMPTABLE_LOOKUP_COST
    } else {
        HEAP_TEMPTABLE_LOOKUP_COST
    }
}

/// Cost of one write into a temporary table
pub fn tmp_table_write_cost(config: &OptimizerConfig, rows: f64, row_size: usize) -> f64 {
    tmp_table_lookup_cost(config, rows, row_size)
}

/// How a table is read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccessMethod {
    /// Full table scan
    Scan,
    /// Full index scan returning rows in index order
    IndexScan { index: String },
    /// Lookup on a non-unique key or a key prefix
    Ref { index: String, key_parts: usize, depends_on: TableMap },
    /// Lookup on a fully bound unique key, at most one row
    EqRef { index: String, depends_on: TableMap },
}

impl AccessMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AccessMethod::Scan => "scan",
            AccessMethod::IndexScan { .. } => "index_scan",
            AccessMethod::Ref { .. } => "ref",
            AccessMethod::EqRef { .. } => "eq_ref",
        }
    }

    /// Tables whose values the lookup key needs
    pub fn depends_on(&self) -> TableMap {
        match self {
            AccessMethod::Ref { depends_on, .. } | AccessMethod::EqRef { depends_on, .. } => *depends_on,
            AccessMethod::Scan | AccessMethod::IndexScan { .. } => TableMap::EMPTY,
        }
    }

    pub fn index(&self) -> Option<&str> {
        match self {
            AccessMethod::Scan => None,
            AccessMethod::IndexScan { index } | AccessMethod::Ref { index, .. } | AccessMethod::EqRef { index, .. } => {
                Some(index)
            }
        }
    }
}

/// Estimated access to one table for a given prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPath {
    pub method: AccessMethod,
    /// Cost of reading the table for the whole prefix
    pub read_cost: f64,
    /// Rows produced per prefix row
    pub records_read: f64,
    pub use_join_buffer: bool,
    /// Rows come out grouped by the requested loose-scan columns
    pub grouped_output: bool,
}

impl AccessPath {
    /// Cost including the comparisons of the produced rows
    pub fn total_cost(&self, prefix_rows: f64) -> f64 {
        self.read_cost + prefix_rows * self.records_read / TIME_FOR_COMPARE
    }
}

/// One request to the access-path estimator
#[derive(Debug, Clone)]
pub struct AccessRequest<'a> {
    pub table: TableId,
    /// Tables already in the prefix
    pub bound_tables: TableMap,
    /// Rows produced by the prefix
    pub prefix_rows: f64,
    pub join_buffer_allowed: bool,
    /// Ask for an index scan grouped by these columns
    pub loose_scan_columns: Option<&'a [String]>,
}

impl<'a> AccessRequest<'a> {
    pub fn new(table: TableId, bound_tables: TableMap, prefix_rows: f64, join_buffer_allowed: bool) -> Self {
        AccessRequest { table, bound_tables, prefix_rows, join_buffer_allowed, loose_scan_columns: None }
    }
}

/// Physical access-path costing for a single table
pub trait AccessPathEstimator {
    fn estimate_access_path(&self, ctx: &SemiJoinContext, req: &AccessRequest<'_>) -> PlannerResult<AccessPath>;
}

/// Cost model driven by catalog statistics and key equalities
#[derive(Debug, Clone, Default)]
pub struct StatisticsCostModel;

impl StatisticsCostModel {
    /// Create a new cost model
    pub fn new() -> Self {
        StatisticsCostModel
    }

    fn scan_path(&self, ctx: &SemiJoinContext, info: &TableInfo, req: &AccessRequest<'_>) -> AccessPath {
        let stats = &info.stats;
        let use_join_buffer = req.join_buffer_allowed && !req.bound_tables.is_empty();
        let read_cost = if use_join_buffer {
            // One scan per join buffer fill
            stats.scan_cost * (req.prefix_rows / ctx.config.join_buffer_rows).ceil().max(1.0)
        } else {
            stats.scan_cost * req.prefix_rows
        };
        AccessPath {
            method: AccessMethod::Scan,
            read_cost,
            records_read: stats.row_count.max(1.0),
            use_join_buffer,
            grouped_output: false,
        }
    }

    fn lookup_path(&self, ctx: &SemiJoinContext, info: &TableInfo, index: &Index, req: &AccessRequest<'_>) -> Option<AccessPath> {
        let mut depends_on = TableMap::EMPTY;
        let mut key_parts = 0;
        for column in &index.columns {
            let usable = ctx
                .key_uses_for(info.id)
                .find(|k| &k.column == column && k.value_tables.is_subset_of(req.bound_tables));
            match usable {
                Some(key_use) => {
                    depends_on |= key_use.value_tables;
                    key_parts += 1;
                }
                None => break,
            }
        }
        if key_parts == 0 {
            return None;
        }
        Some(self.key_path(info, index, key_parts, depends_on, req.prefix_rows))
    }

    fn key_path(&self, info: &TableInfo, index: &Index, key_parts: usize, depends_on: TableMap, prefix_rows: f64) -> AccessPath {
        if index.unique && key_parts == index.columns.len() {
            return AccessPath {
                method: AccessMethod::EqRef { index: index.name.clone(), depends_on },
                read_cost: prefix_rows,
                records_read: 1.0,
                use_join_buffer: false,
                grouped_output: false,
            };
        }
        let rows = rows_per_key_prefix(info, index, key_parts);
        AccessPath {
            method: AccessMethod::Ref { index: index.name.clone(), key_parts, depends_on },
            read_cost: prefix_rows * (1.0 + rows * 0.1),
            records_read: rows,
            use_join_buffer: false,
            grouped_output: false,
        }
    }

    fn loose_scan_path(&self, info: &TableInfo, columns: &[String], prefix_rows: f64) -> Option<AccessPath> {
        let index = info.indexes.iter().find(|index| {
            columns.len() <= index.columns.len()
                && index.columns[..columns.len()].iter().all(|c| columns.contains(c))
                && columns.iter().all(|c| index.columns[..columns.len()].contains(c))
        })?;
        let groups = (info.stats.row_count / rows_per_key_prefix(info, index, columns.len())).max(1.0);
        Some(AccessPath {
            method: AccessMethod::IndexScan { index: index.name.clone() },
            read_cost: info.stats.scan_cost * prefix_rows,
            records_read: groups,
            use_join_buffer: false,
            grouped_output: true,
        })
    }
}

/// Rows sharing one value of the first `key_parts` columns of an index
fn rows_per_key_prefix(info: &TableInfo, index: &Index, key_parts: usize) -> f64 {
    let missing = index.columns.len().saturating_sub(key_parts) as i32;
    (index.rows_per_key * 10f64.powi(missing)).min(info.stats.row_count).max(1.0)
}

impl AccessPathEstimator for StatisticsCostModel {
    fn estimate_access_path(&self, ctx: &SemiJoinContext, req: &AccessRequest<'_>) -> PlannerResult<AccessPath> {
        let info = ctx.table(req.table)?;
        if !(info.stats.row_count >= 0.0) || !(info.stats.scan_cost >= 0.0) {
            return Err(PlannerError::NoAccessPath { table: req.table });
        }

        if let Some(columns) = req.loose_scan_columns {
            return self
                .loose_scan_path(info, columns, req.prefix_rows)
                .ok_or(PlannerError::NoAccessPath { table: req.table });
        }

        let mut best = self.scan_path(ctx, info, req);
        for index in &info.indexes {
            if let Some(path) = self.lookup_path(ctx, info, index, req) {
                if path.total_cost(req.prefix_rows) < best.total_cost(req.prefix_rows) {
                    best = path;
                }
            }
        }
        Ok(best)
    }
}
