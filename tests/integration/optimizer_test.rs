use std::cell::Cell;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bayundb_semijoin::catalog::{Catalog, Index};
use bayundb_semijoin::common::types::{TableId, TableMap};
use bayundb_semijoin::query::ast::{Expression, QueryBlock};
use bayundb_semijoin::query::planner::semijoin::SemiJoinContext;
use bayundb_semijoin::query::planner::{
    AccessPath, AccessPathEstimator, AccessRequest, OptimizerConfig, PlannerError, PlannerResult, SemiJoinOptimizer,
    StatisticsCostModel,
};
use bayundb_semijoin::query::statement::{ConversionOutcome, Statement};

#[path = "../common/mod.rs"]
mod common;

use common::*;

// ot.a IN (SELECT it1.x FROM it1) AND ot.b IN (SELECT it2.x FROM it2)
//   AND ot.c IN (SELECT it3.x FROM it3)
fn three_subqueries(rows: [f64; 4]) -> Result<(Catalog, Statement, [TableId; 4])> {
    let catalog = catalog(vec![
        int_table("ot", &["a", "b", "c"], rows[0]),
        int_table("it1", &["x"], rows[1]).with_index(Index::non_unique("ix1", &["x"], 10.0)),
        int_table("it2", &["x"], rows[2]),
        int_table("it3", &["x"], rows[3]).with_index(Index::non_unique("ix3", &["x"], 2.0)),
    ])?;
    let mut stmt = Statement::new(QueryBlock::new());
    let ot = stmt.add_table("ot", "ot");
    let it1 = stmt.add_table("it1", "it1");
    let it2 = stmt.add_table("it2", "it2");
    let it3 = stmt.add_table("it3", "it3");
    root_tables(&mut stmt, &[ot]);
    for (outer, inner) in [("a", it1), ("b", it2), ("c", it3)] {
        let sq = in_subquery(&mut stmt, &[inner], col(inner, "x"), None);
        add_root_filter(&mut stmt, Expression::in_subquery(col(ot, outer), sq));
    }
    Ok((catalog, stmt, [ot, it1, it2, it3]))
}

#[test]
fn test_every_nest_is_handled_by_one_strategy() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(2024);
    for _ in 0..10 {
        let rows = [
            rng.gen_range(1..100000) as f64,
            rng.gen_range(1..100000) as f64,
            rng.gen_range(1..100000) as f64,
            rng.gen_range(1..100000) as f64,
        ];
        let (catalog, mut stmt, tables) = three_subqueries(rows)?;
        let optimized = SemiJoinOptimizer::new(&catalog, OptimizerConfig::default()).optimize(&mut stmt)?;

        assert_eq!(stmt.nests.len(), 3);
        let plan = &optimized.root.plan;
        assert_eq!(plan.entries.len(), 4);
        let order: TableMap = plan.order().into_iter().collect();
        assert_eq!(order, tables.iter().copied().collect::<TableMap>());
        assert_nests_covered_once(&optimized.root.context, plan);
        assert!(plan.cost.is_finite() && plan.cost > 0.0);
    }
    Ok(())
}

#[test]
fn test_explain_text_lists_tables_in_join_order() -> Result<()> {
    let (catalog, mut stmt, _) = three_subqueries([1000.0, 100.0, 100.0, 100.0])?;
    let optimized = SemiJoinOptimizer::new(&catalog, OptimizerConfig::default()).optimize(&mut stmt)?;

    let text = optimized.to_string();
    let mut lines = text.lines();
    assert!(lines.next().map_or(false, |l| l.starts_with("Block root: cost=")));
    let aliases: Vec<&str> = lines
        .map(|l| l.trim().split_whitespace().nth(1).unwrap_or_default().trim_end_matches(':'))
        .collect();
    let expected: Vec<String> = optimized.root.plan.entries.iter().map(|e| e.alias.clone()).collect();
    assert_eq!(aliases, expected);
    assert!(text.contains("Start "));
    Ok(())
}

#[test]
fn test_json_output_carries_trace_only_when_enabled() -> Result<()> {
    let (catalog, mut stmt, _) = three_subqueries([1000.0, 100.0, 100.0, 100.0])?;
    let quiet = SemiJoinOptimizer::new(&catalog, OptimizerConfig::default()).optimize(&mut stmt.clone())?;
    let json = quiet.to_json();
    assert!(json.get("trace").is_none());
    assert_eq!(json["root"]["join_order"].as_array().map(|a| a.len()), Some(4));
    assert_eq!(json["root"]["block"], "root");
    assert!(!json["root"]["spans"].as_array().map_or(true, |a| a.is_empty()));

    let config = OptimizerConfig { trace: true, ..OptimizerConfig::default() };
    let traced = SemiJoinOptimizer::new(&catalog, config).optimize(&mut stmt)?;
    let json = traced.to_json();
    let steps = json["trace"].as_array().cloned().unwrap_or_default();
    let names: Vec<&str> = steps.iter().filter_map(|s| s["step"].as_str()).collect();
    assert_eq!(names.iter().filter(|n| **n == "subquery_conversion").count(), 3);
    assert_eq!(names.iter().filter(|n| **n == "semijoin_materialization").count(), 3);
    assert!(names.contains(&"finalized_plan"));
    Ok(())
}

#[test]
fn test_table_budget_limits_merging() -> Result<()> {
    let (catalog, mut stmt, _) = three_subqueries([1000.0, 100.0, 100.0, 100.0])?;
    let config = OptimizerConfig { max_tables: 2, ..OptimizerConfig::default() };
    let optimized = SemiJoinOptimizer::new(&catalog, config).optimize(&mut stmt)?;

    assert_eq!(stmt.nests.len(), 1);
    assert_eq!(stmt.subqueries[0].outcome, Some(ConversionOutcome::SemiJoin { nest: 0 }));
    for sub in &stmt.subqueries[1..] {
        assert!(!matches!(sub.outcome, Some(ConversionOutcome::SemiJoin { .. }) | None));
    }
    assert!(optimized.root.plan.entries.len() <= 2 + stmt.subqueries.len());
    Ok(())
}

#[test]
fn test_invalid_config_is_rejected_before_conversion() -> Result<()> {
    let (catalog, mut stmt, _) = three_subqueries([10.0, 10.0, 10.0, 10.0])?;
    let config = OptimizerConfig { materialization: false, in_to_exists: false, ..OptimizerConfig::default() };
    let err = SemiJoinOptimizer::new(&catalog, config).optimize(&mut stmt).unwrap_err();
    assert!(matches!(err, PlannerError::InvalidInput(_)));
    assert!(!stmt.converted);
    assert!(stmt.subqueries.iter().all(|s| s.outcome.is_none()));
    Ok(())
}

#[test]
fn test_unknown_catalog_table_is_reported() -> Result<()> {
    let catalog = catalog(vec![int_table("ot", &["a"], 10.0)])?;
    let mut stmt = Statement::new(QueryBlock::new());
    let ot = stmt.add_table("ot", "ot");
    let missing = stmt.add_table("missing", "missing");
    root_tables(&mut stmt, &[ot, missing]);

    let err = SemiJoinOptimizer::new(&catalog, OptimizerConfig::default()).optimize(&mut stmt).unwrap_err();
    assert!(matches!(err, PlannerError::Catalog(_)));
    Ok(())
}

// Delegates to the statistics model and counts the requests
struct CountingEstimator {
    inner: StatisticsCostModel,
    calls: Cell<usize>,
}

impl AccessPathEstimator for CountingEstimator {
    fn estimate_access_path(&self, ctx: &SemiJoinContext, req: &AccessRequest<'_>) -> PlannerResult<AccessPath> {
        self.calls.set(self.calls.get() + 1);
        self.inner.estimate_access_path(ctx, req)
    }
}

#[test]
fn test_custom_estimator_drives_the_search() -> Result<()> {
    let (catalog, mut stmt, _) = three_subqueries([1000.0, 100.0, 100.0, 100.0])?;
    let estimator = CountingEstimator { inner: StatisticsCostModel::new(), calls: Cell::new(0) };
    let optimizer = SemiJoinOptimizer::with_estimator(&catalog, &estimator, OptimizerConfig::default());
    let custom = optimizer.optimize(&mut stmt.clone())?;
    assert!(estimator.calls.get() > 0);

    let default = SemiJoinOptimizer::new(&catalog, OptimizerConfig::default()).optimize(&mut stmt)?;
    assert_eq!(custom.root.plan, default.root.plan);
    Ok(())
}
