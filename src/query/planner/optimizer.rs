// Query Optimizer Implementation
//
// This module drives subquery optimization for a statement: conversion of
// subquery predicates, then per block the pull-out of functionally
// dependent tables, materialization estimates, the join-order search and
// plan finalization.

use std::collections::HashMap;

use log::info;
use serde_json::json;

use crate::catalog::{Catalog, TableStatistics};
use crate::common::types::{SubqueryId, cost_mult};
use crate::query::planner::config::OptimizerConfig;
use crate::query::planner::cost_model::{AccessPathEstimator, StatisticsCostModel};
use crate::query::planner::error::PlannerResult;
use crate::query::planner::join_reordering::JoinOrderSearch;
use crate::query::planner::materialization::{
    choose_subquery_plan, distinct_rows_bound, materialized_row_size, optimize_semijoin_nests, SubqueryCostInputs,
    SubqueryPlanChoice,
};
use crate::query::planner::semijoin::classifier::find_left_operand;
use crate::query::planner::semijoin::context::SemiJoinContext;
use crate::query::planner::semijoin::convert::convert_subqueries_to_semijoins;
use crate::query::planner::semijoin::finalize::{finalize_plan, FinalizedPlan};
use crate::query::planner::semijoin::pullout::pull_out_semijoin_tables;
use crate::query::planner::trace::OptimizerTrace;
use crate::query::statement::{BlockOwner, ConversionOutcome, Statement, TableSource};

static DEFAULT_COST_MODEL: StatisticsCostModel = StatisticsCostModel;

/// Optimized plan of one query block
#[derive(Debug, Clone)]
pub struct BlockPlan {
    pub owner: BlockOwner,
    pub context: SemiJoinContext,
    pub plan: FinalizedPlan,
}

/// Plan of a subquery executed separately from its parent
#[derive(Debug, Clone)]
pub struct SubqueryBlockPlan {
    pub subquery: SubqueryId,
    pub outcome: ConversionOutcome,
    pub block: BlockPlan,
}

/// Result of optimizing a statement
#[derive(Debug, Clone)]
pub struct OptimizedQuery {
    pub root: BlockPlan,
    pub subqueries: Vec<SubqueryBlockPlan>,
    pub trace: OptimizerTrace,
}

/// The semi-join subquery optimizer
pub struct SemiJoinOptimizer<'a> {
    catalog: &'a Catalog,
    estimator: &'a dyn AccessPathEstimator,
    config: OptimizerConfig,
}

impl<'a> SemiJoinOptimizer<'a> {
    /// Create an optimizer using the statistics cost model
    pub fn new(catalog: &'a Catalog, config: OptimizerConfig) -> Self {
        SemiJoinOptimizer { catalog, estimator: &DEFAULT_COST_MODEL, config }
    }

    /// Create an optimizer with a custom access-path estimator
    pub fn with_estimator(catalog: &'a Catalog, estimator: &'a dyn AccessPathEstimator, config: OptimizerConfig) -> Self {
        SemiJoinOptimizer { catalog, estimator, config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Validate the statement and convert its subquery predicates. Safe to
    /// call again on a converted statement.
    pub fn prepare(&self, stmt: &mut Statement, trace: &mut OptimizerTrace) -> PlannerResult<()> {
        self.config.validate()?;
        stmt.validate(self.catalog)?;
        let estimate = |s: &Statement, id: SubqueryId, t: &mut OptimizerTrace| self.estimate_subquery(s, id, t);
        convert_subqueries_to_semijoins(stmt, self.catalog, &self.config, &estimate, trace)
    }

    /// Optimize one block of a converted statement. The statement is not
    /// modified, so every execution starts from the same state.
    pub fn plan_block(&self, stmt: &Statement, owner: BlockOwner, trace: &mut OptimizerTrace) -> PlannerResult<BlockPlan> {
        let mut ctx = self.prepare_context(stmt, owner, trace)?;
        let result = JoinOrderSearch::new(&ctx, self.estimator).find_best_plan()?;
        let plan = finalize_plan(&mut ctx, self.estimator, &result, trace)?;
        Ok(BlockPlan { owner, context: ctx, plan })
    }

    /// Convert and optimize a statement
    pub fn optimize(&self, stmt: &mut Statement) -> PlannerResult<OptimizedQuery> {
        let mut trace = OptimizerTrace::new(self.config.trace);
        self.prepare(stmt, &mut trace)?;
        let root = self.plan_block(stmt, BlockOwner::Root, &mut trace)?;

        let mut subqueries = Vec::new();
        for sub in &stmt.subqueries {
            let outcome = match &sub.outcome {
                Some(outcome @ (ConversionOutcome::Materialized { .. } | ConversionOutcome::InToExists)) => outcome.clone(),
                _ => continue,
            };
            let block = self.plan_block(stmt, BlockOwner::Subquery(sub.id), &mut trace)?;
            subqueries.push(SubqueryBlockPlan { subquery: sub.id, outcome, block });
        }

        info!(
            "Optimized statement: cost {:.2}, {} separately executed subqueries",
            root.plan.cost,
            subqueries.len()
        );
        Ok(OptimizedQuery { root, subqueries, trace })
    }

    /// Compare materialization with re-execution per outer row for a
    /// subquery that is not merged into its parent
    pub fn estimate_subquery(&self, stmt: &Statement, id: SubqueryId, trace: &mut OptimizerTrace) -> PlannerResult<SubqueryPlanChoice> {
        let ctx = self.prepare_context(stmt, BlockOwner::Subquery(id), trace)?;
        let sub = stmt.subquery(id)?;
        let select_list = &sub.block.select_list;

        let inner = JoinOrderSearch::new(&ctx, self.estimator).find_best_plan()?;
        let bound = ctx.with_bound_columns(select_list);
        let exists = JoinOrderSearch::new(&bound, self.estimator).find_best_plan()?;

        let left = match &sub.left_operand {
            Some(left) => Some(left.clone()),
            None => find_left_operand(stmt.block(sub.parent)?, id),
        };
        let mut outer_rows = 1.0;
        if let Some(left) = &left {
            for table in left.used_tables() {
                if let TableSource::Base { name } = &stmt.table_entry(table)?.source {
                    outer_rows = cost_mult(outer_rows, self.catalog.get_table(name)?.statistics().row_count);
                }
            }
        }

        let inputs = SubqueryCostInputs {
            inner: &inner,
            exists: &exists,
            distinct_rows_bound: distinct_rows_bound(&ctx, select_list, ctx.join_tables),
            outer_rows,
            row_size: materialized_row_size(&ctx, select_list)?,
        };
        let choice = choose_subquery_plan(&self.config, id, &inputs);
        trace.add(
            "subquery_plan",
            json!({
                "subquery": id,
                "plan": format!("{:?}", choice.plan),
                "materialization_cost": choice.materialization_cost,
                "exists_cost": choice.exists_cost,
                "rows": choice.rows,
            }),
        );
        Ok(choice)
    }

    /// Build a block's context with the pull-out and materialization
    /// estimates applied
    fn prepare_context(&self, stmt: &Statement, owner: BlockOwner, trace: &mut OptimizerTrace) -> PlannerResult<SemiJoinContext> {
        let mut materialized = HashMap::new();
        for table in stmt.block(owner)?.leaf_tables() {
            if let TableSource::MaterializedSubquery { subquery } = stmt.table_entry(table)?.source {
                let choice = self.estimate_subquery(stmt, subquery, trace)?;
                materialized.insert(table, TableStatistics::new(choice.rows.max(1.0)));
            }
        }
        let mut ctx = SemiJoinContext::build(stmt, self.catalog, owner, &self.config, &materialized)?;
        pull_out_semijoin_tables(&mut ctx, trace)?;
        optimize_semijoin_nests(&mut ctx, self.estimator, trace)?;
        Ok(ctx)
    }
}
