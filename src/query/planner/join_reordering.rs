// Join Order Search
//
// This module provides the depth-first join-order search that drives the
// join-prefix tracker. It extends a prefix one table at a time, respects
// outer-join ordering, rejects complete orders that leave semi-join
// duplicates unremoved and keeps the cheapest complete order.

use log::{debug, info};

use crate::common::types::{TableId, TableMap, NestId};
use crate::query::planner::cost_model::AccessPathEstimator;
use crate::query::planner::error::{PlannerError, PlannerResult};
use crate::query::planner::semijoin::context::SemiJoinContext;
use crate::query::planner::semijoin::prefix::{JoinPrefix, Position};

/// Best complete join order found by a search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub positions: Vec<Position>,
    pub cost: f64,
    pub record_count: f64,
}

impl SearchResult {
    pub fn order(&self) -> Vec<TableId> {
        self.positions.iter().map(|p| p.table).collect()
    }
}

/// Join-order search over the tables of one block, or of one nest
pub struct JoinOrderSearch<'a> {
    ctx: &'a SemiJoinContext,
    estimator: &'a dyn AccessPathEstimator,
    tables: TableMap,
    sjm_nest: Option<NestId>,
    best: Option<SearchResult>,
    complete_plans: usize,
}

impl<'a> JoinOrderSearch<'a> {
    /// Search over every table of the block
    pub fn new(ctx: &'a SemiJoinContext, estimator: &'a dyn AccessPathEstimator) -> Self {
        JoinOrderSearch {
            ctx,
            estimator,
            tables: ctx.join_tables,
            sjm_nest: None,
            best: None,
            complete_plans: 0,
        }
    }

    /// Search over the inner tables of one nest, used to estimate its
    /// materialization
    pub fn within_nest(ctx: &'a SemiJoinContext, estimator: &'a dyn AccessPathEstimator, nest: NestId) -> PlannerResult<Self> {
        let tables = ctx.nest(nest)?.inner_tables();
        Ok(JoinOrderSearch {
            ctx,
            estimator,
            tables,
            sjm_nest: Some(nest),
            best: None,
            complete_plans: 0,
        })
    }

    fn new_prefix(&self) -> PlannerResult<JoinPrefix<'a>> {
        match self.sjm_nest {
            Some(nest) => JoinPrefix::within_nest(self.ctx, self.estimator, nest),
            None => Ok(JoinPrefix::new(self.ctx, self.estimator, self.tables)),
        }
    }

    /// Number of complete orders costed by the last search
    pub fn complete_plans(&self) -> usize {
        self.complete_plans
    }

    /// Find the cheapest valid join order
    pub fn find_best_plan(&mut self) -> PlannerResult<SearchResult> {
        self.best = None;
        self.complete_plans = 0;
        let mut prefix = self.new_prefix()?;
        self.extend(&mut prefix)?;

        let best = self.best.take().ok_or(PlannerError::NoValidPlan)?;
        info!(
            "Best join order {:?} with cost {:.2} and {:.2} rows ({} complete orders costed)",
            best.order()
                .iter()
                .map(|t| self.ctx.alias(*t))
                .collect::<Vec<_>>(),
            best.cost,
            best.record_count,
            self.complete_plans
        );
        Ok(best)
    }

    /// Cost one fixed join order
    pub fn evaluate_order(&self, order: &[TableId]) -> PlannerResult<SearchResult> {
        let mut prefix = self.new_prefix()?;
        for &table in order {
            if !self.can_place(prefix.placed_tables(), table)? {
                return Err(PlannerError::InvalidInput(format!(
                    "table {} cannot be placed after {:?}",
                    self.ctx.alias(table),
                    prefix.placed_tables()
                )));
            }
            prefix.push(table)?;
        }
        if !prefix.is_complete() || !prefix.dups_producing_tables().is_empty() {
            return Err(PlannerError::NoValidPlan);
        }
        Ok(SearchResult {
            cost: prefix.cost(),
            record_count: prefix.record_count(),
            positions: prefix.into_positions(),
        })
    }

    fn extend(&mut self, prefix: &mut JoinPrefix<'a>) -> PlannerResult<()> {
        if prefix.is_complete() {
            self.complete_plans += 1;
            if !prefix.dups_producing_tables().is_empty() {
                debug!("Rejecting order with unremoved duplicates from {:?}", prefix.dups_producing_tables());
                return Ok(());
            }
            let better = self.best.as_ref().map_or(true, |best| prefix.cost() < best.cost);
            if better {
                self.best = Some(SearchResult {
                    positions: prefix.positions().to_vec(),
                    cost: prefix.cost(),
                    record_count: prefix.record_count(),
                });
            }
            return Ok(());
        }

        if self.ctx.config.prune_search {
            if let Some(best) = &self.best {
                if prefix.cost() >= best.cost {
                    return Ok(());
                }
            }
        }

        let remaining = prefix.remaining_tables();
        let candidates: Vec<TableId> = self
            .ctx
            .join_order
            .iter()
            .copied()
            .filter(|t| remaining.contains(*t))
            .collect();

        for table in candidates {
            if !self.can_place(prefix.placed_tables(), table)? {
                if self.ctx.straight_join {
                    break;
                }
                continue;
            }
            match prefix.push(table) {
                Ok(_) => {}
                Err(PlannerError::NoAccessPath { table }) => {
                    debug!("No access path for {} after {:?}", self.ctx.alias(table), prefix.placed_tables());
                    continue;
                }
                Err(e) => return Err(e),
            }
            let result = self.extend(prefix);
            prefix.pop();
            result?;
            if self.ctx.straight_join {
                break;
            }
        }
        Ok(())
    }

    /// Outer-join dependencies are placed, and an outer-join operand that
    /// was started is finished before any table outside it
    fn can_place(&self, placed: TableMap, table: TableId) -> PlannerResult<bool> {
        let info = self.ctx.table(table)?;
        if !(info.dependencies & self.tables).is_subset_of(placed) {
            return Ok(false);
        }
        for other in placed {
            if let Some(operand) = self.ctx.table(other)?.outer_join_tables {
                let operand = operand & self.tables;
                if !operand.is_subset_of(placed) && !operand.contains(table) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
