// Materialization Optimizer
//
// This module estimates materialize-and-probe execution: per semi-join nest,
// the inner join is optimized on its own and its result stored in a
// temporary table with a unique key; per non-mergeable subquery, the cost of
// materializing it once is weighed against re-running it for every outer
// row.

use log::{debug, info};
use serde::{Serialize, Deserialize};
use serde_json::json;

use crate::catalog::DataType;
use crate::common::types::{SubqueryId, TableMap, cost_add, cost_mult};
use crate::query::ast::Expression;
use crate::query::planner::config::OptimizerConfig;
use crate::query::planner::cost_model::{tmp_table_lookup_cost, tmp_table_write_cost, AccessPathEstimator};
use crate::query::planner::error::{PlannerError, PlannerResult};
use crate::query::planner::join_reordering::{JoinOrderSearch, SearchResult};
use crate::query::planner::semijoin::context::SemiJoinContext;
use crate::query::planner::semijoin::nest::MaterializationInfo;
use crate::query::planner::trace::OptimizerTrace;

/// Key length of a temporary-table row holding the given expressions.
/// Columns of enclosing blocks are constants and stored like computed values.
pub fn materialized_row_size(ctx: &SemiJoinContext, exprs: &[Expression]) -> PlannerResult<usize> {
    let mut size = 0;
    for expr in exprs {
        size += match expr {
            Expression::Column(col) if ctx.join_tables.contains(col.table) => {
                let table = ctx.table(col.table)?;
                let column = table
                    .columns
                    .iter()
                    .find(|c| c.name() == col.name)
                    .ok_or_else(|| PlannerError::UnknownColumn(format!("{}.{}", table.alias, col.name)))?;
                column.data_type().key_length()
            }
            _ => DataType::Integer.key_length(),
        };
    }
    Ok(size)
}

/// Upper bound on the distinct rows of a result whose columns come from the
/// given expressions: the product of the row counts of their tables
pub fn distinct_rows_bound(ctx: &SemiJoinContext, exprs: &[Expression], tables: TableMap) -> f64 {
    let used = exprs.iter().fold(TableMap::EMPTY, |acc, e| acc | e.used_tables()) & tables;
    used.iter()
        .filter_map(|t| ctx.table(t).ok())
        .fold(1.0, |acc, t| cost_mult(acc, t.stats.row_count))
}

/// A nest can be materialized when it is uncorrelated, its compared columns
/// are keyable and no other nest refers to its inner tables
fn nest_materializable(ctx: &SemiJoinContext, idx: usize) -> bool {
    let state = &ctx.nests[idx];
    if state.removed || !state.nest.can_materialize() {
        return false;
    }
    let inner = state.inner_tables();
    !ctx.nests
        .iter()
        .enumerate()
        .any(|(i, other)| i != idx && !other.removed && (other.nest.depends_on | other.nest.corr_tables).overlaps(inner))
}

/// Attach a materialization estimate to every nest that can be executed as
/// materialize-and-probe
pub fn optimize_semijoin_nests(
    ctx: &mut SemiJoinContext,
    estimator: &dyn AccessPathEstimator,
    trace: &mut OptimizerTrace,
) -> PlannerResult<()> {
    if !ctx.config.materialization {
        return Ok(());
    }
    for idx in 0..ctx.nests.len() {
        if !nest_materializable(ctx, idx) {
            continue;
        }
        let nest_id = ctx.nests[idx].id();
        let info = {
            let ctx_ref: &SemiJoinContext = ctx;
            let state = &ctx_ref.nests[idx];
            let inner = JoinOrderSearch::within_nest(ctx_ref, estimator, nest_id)?.find_best_plan()?;
            let bound = distinct_rows_bound(ctx_ref, &state.nest.inner_exprs, state.inner_tables());
            let rows = inner.record_count.min(bound);
            let row_size = materialized_row_size(ctx_ref, &state.nest.inner_exprs)?;
            let lookup_cost = tmp_table_lookup_cost(&ctx_ref.config, rows, row_size);
            let write_cost = tmp_table_write_cost(&ctx_ref.config, rows, row_size);
            MaterializationInfo {
                tables: inner.positions.len(),
                rows,
                rows_with_duplicates: inner.record_count,
                materialization_cost: cost_add(inner.cost, cost_mult(rows, write_cost)),
                lookup_cost,
                scan_cost: cost_mult(rows, lookup_cost),
                positions: inner.positions,
                row_size,
                is_used: false,
                is_scan: false,
            }
        };
        info!(
            "Semi-join nest #{} materializes {:.2} rows at cost {:.2}",
            nest_id, info.rows, info.materialization_cost
        );
        trace.add(
            "semijoin_materialization",
            json!({
                "nest": nest_id,
                "rows": info.rows,
                "materialization_cost": info.materialization_cost,
                "lookup_cost": info.lookup_cost,
                "scan_cost": info.scan_cost,
                "join_order": info.positions.iter().map(|p| p.table).collect::<Vec<_>>(),
            }),
        );
        ctx.nests[idx].mat_info = Some(info);
    }
    Ok(())
}

/// Execution chosen for a subquery that is not merged into its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubqueryPlan {
    /// Materialize once, probe per outer row
    Materialize,
    /// Re-run with the left operand pushed down, per outer row
    InToExists,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubqueryPlanChoice {
    pub subquery: SubqueryId,
    pub plan: SubqueryPlan,
    pub materialization_cost: f64,
    pub exists_cost: f64,
    /// Distinct rows of the materialized result
    pub rows: f64,
}

/// Estimates feeding the materialize versus re-execute decision
#[derive(Debug, Clone)]
pub struct SubqueryCostInputs<'a> {
    /// Plan of the subquery run once on its own
    pub inner: &'a SearchResult,
    /// Plan of one run with the compared columns bound
    pub exists: &'a SearchResult,
    pub distinct_rows_bound: f64,
    /// Outer rows the predicate is evaluated for
    pub outer_rows: f64,
    pub row_size: usize,
}

/// Compare materialize-and-probe with re-execution per outer row. A
/// disabled strategy is never chosen.
pub fn choose_subquery_plan(config: &OptimizerConfig, subquery: SubqueryId, inputs: &SubqueryCostInputs<'_>) -> SubqueryPlanChoice {
    let rows = inputs.inner.record_count.min(inputs.distinct_rows_bound);
    let write_cost = tmp_table_write_cost(config, rows, inputs.row_size);
    let lookup_cost = tmp_table_lookup_cost(config, rows, inputs.row_size);
    let materialization_cost = cost_add(
        cost_add(inputs.inner.cost, cost_mult(rows, write_cost)),
        cost_mult(inputs.outer_rows, lookup_cost),
    );
    let exists_cost = cost_mult(inputs.outer_rows, inputs.exists.cost);

    let plan = if !config.materialization {
        SubqueryPlan::InToExists
    } else if !config.in_to_exists || materialization_cost < exists_cost {
        SubqueryPlan::Materialize
    } else {
        SubqueryPlan::InToExists
    };
    debug!(
        "Subquery #{}: materialization {:.2}, in-to-exists {:.2}, chose {:?}",
        subquery, materialization_cost, exists_cost, plan
    );
    SubqueryPlanChoice { subquery, plan, materialization_cost, exists_cost, rows }
}
