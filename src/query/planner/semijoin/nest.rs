// Semi-Join Nest Model
//
// This module defines the semi-join nest created when a subquery is merged
// into its parent join, and the materialization descriptor attached to a
// nest that can be executed as materialize-and-probe.

use serde::{Serialize, Deserialize};

use crate::common::types::{TableMap, NestId, SubqueryId, JoinId};
use crate::query::ast::Expression;
use crate::query::statement::BlockOwner;
use super::prefix::Position;

/// One subquery's tables folded into the parent join graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemiJoinNest {
    pub id: NestId,
    /// Subquery predicate the nest was created from
    pub subquery: SubqueryId,
    /// Nested join of the parent's join tree holding the inner tables
    pub join_id: JoinId,
    /// Block the nest was merged into
    pub owner: BlockOwner,
    pub inner_tables: TableMap,
    /// Outer tables referenced by the subquery's own filter
    pub corr_tables: TableMap,
    /// Outer tables the nest condition needs, the left operand included
    pub depends_on: TableMap,
    /// Subquery filter AND the injected equalities
    pub on_expr: Expression,
    /// Left operand components, one per compared column
    pub outer_exprs: Vec<Expression>,
    /// Subquery select-list components, one per compared column
    pub inner_exprs: Vec<Expression>,
    /// All compared pairs can be stored in a temporary-table key
    pub mat_allowed: bool,
    /// The materialized result can also be scanned in full
    pub scan_allowed: bool,
}

impl SemiJoinNest {
    pub fn is_correlated(&self) -> bool {
        !self.corr_tables.is_empty()
    }

    /// Tables that must be in the prefix before the nest's duplicates can be
    /// removed
    pub fn required_tables(&self) -> TableMap {
        self.inner_tables | self.depends_on | self.corr_tables
    }

    /// Materialize-and-probe requires an uncorrelated nest with keyable
    /// compared columns
    pub fn can_materialize(&self) -> bool {
        self.mat_allowed && !self.is_correlated()
    }
}

/// Materialization estimate for a nest, produced by a search restricted to
/// the nest's tables
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializationInfo {
    /// Number of inner tables
    pub tables: usize,
    /// Distinct rows stored in the temporary table
    pub rows: f64,
    pub rows_with_duplicates: f64,
    /// Cost to run the inner join and fill the temporary table
    pub materialization_cost: f64,
    /// Cost of one key lookup in the temporary table
    pub lookup_cost: f64,
    /// Cost of one full scan of the temporary table
    pub scan_cost: f64,
    /// Inner join order chosen by the nested search
    pub positions: Vec<Position>,
    /// Key length of one temporary-table row
    pub row_size: usize,
    pub is_used: bool,
    pub is_scan: bool,
}
