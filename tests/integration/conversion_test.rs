use anyhow::Result;
use bayundb_semijoin::catalog::Index;
use bayundb_semijoin::query::ast::{Expression, JoinNode};
use bayundb_semijoin::query::planner::{OptimizerConfig, OptimizerTrace, PlannerError, SemiJoinOptimizer};
use bayundb_semijoin::query::statement::{ConversionOutcome, Statement, TableSource};
use bayundb_semijoin::QueryBlock;

#[path = "../common/mod.rs"]
mod common;

use common::*;

// ot.a IN (SELECT it.a FROM it WHERE it.a > 5)
fn unique_lookup_statement() -> Result<(bayundb_semijoin::Catalog, Statement)> {
    let catalog = catalog(vec![
        int_table("ot", &["a"], 10.0),
        int_table("it", &["a"], 10000.0).with_index(Index::unique("pk", &["a"])),
    ])?;
    let mut stmt = Statement::new(QueryBlock::new());
    let ot = stmt.add_table("ot", "ot");
    let it = stmt.add_table("it", "it");
    root_tables(&mut stmt, &[ot]);
    let sq = in_subquery(&mut stmt, &[it], col(it, "a"), Some(gt(col(it, "a"), 5)));
    add_root_filter(&mut stmt, Expression::in_subquery(col(ot, "a"), sq));
    Ok((catalog, stmt))
}

// ot.a IN (SELECT it.a FROM it GROUP BY it.a)
fn grouped_statement(outer_rows: f64, inner_rows: f64) -> Result<(bayundb_semijoin::Catalog, Statement)> {
    let catalog = catalog(vec![int_table("ot", &["a"], outer_rows), int_table("it", &["a"], inner_rows)])?;
    let mut stmt = Statement::new(QueryBlock::new());
    let ot = stmt.add_table("ot", "ot");
    let it = stmt.add_table("it", "it");
    root_tables(&mut stmt, &[ot]);
    let sq = in_subquery(&mut stmt, &[it], col(it, "a"), None);
    stmt.subqueries[sq].block.group_by = vec![col(it, "a")];
    add_root_filter(&mut stmt, Expression::in_subquery(col(ot, "a"), sq));
    Ok((catalog, stmt))
}

#[test]
fn test_uncorrelated_in_subquery_is_merged() -> Result<()> {
    let (catalog, mut stmt) = unique_lookup_statement()?;
    let optimizer = SemiJoinOptimizer::new(&catalog, OptimizerConfig::default());
    optimizer.prepare(&mut stmt, &mut OptimizerTrace::disabled())?;

    assert_eq!(stmt.subqueries[0].outcome, Some(ConversionOutcome::SemiJoin { nest: 0 }));
    assert_eq!(stmt.nests.len(), 1);
    assert_eq!(stmt.nests[0].inner_tables.iter().collect::<Vec<_>>(), vec![1]);
    assert!(!stmt.nests[0].is_correlated());
    assert!(stmt.root.leaf_tables().contains(1));
    Ok(())
}

#[test]
fn test_conversion_is_byte_identical_on_reexecution() -> Result<()> {
    let (catalog, mut stmt) = unique_lookup_statement()?;
    let optimizer = SemiJoinOptimizer::new(&catalog, OptimizerConfig::default());

    optimizer.prepare(&mut stmt, &mut OptimizerTrace::disabled())?;
    let first = bincode::serialize(&stmt)?;
    optimizer.prepare(&mut stmt, &mut OptimizerTrace::disabled())?;
    let second = bincode::serialize(&stmt)?;
    assert_eq!(first, second);

    // Planning never writes back to the statement
    let plan1 = optimizer.optimize(&mut stmt)?;
    let plan2 = optimizer.optimize(&mut stmt)?;
    assert_eq!(bincode::serialize(&stmt)?, first);
    assert_eq!(plan1.root.plan, plan2.root.plan);
    Ok(())
}

#[test]
fn test_grouped_subquery_with_many_outer_rows_is_materialized() -> Result<()> {
    let (catalog, mut stmt) = grouped_statement(100000.0, 1000.0)?;
    let optimizer = SemiJoinOptimizer::new(&catalog, OptimizerConfig::default());
    let optimized = optimizer.optimize(&mut stmt)?;

    let table = match stmt.subqueries[0].outcome {
        Some(ConversionOutcome::Materialized { table }) => table,
        ref other => panic!("expected materialization, got {:?}", other),
    };
    assert_eq!(stmt.tables[table].source, TableSource::MaterializedSubquery { subquery: 0 });
    assert!(stmt.root.leaf_tables().contains(table));
    assert!(stmt.nests.is_empty());
    assert!(optimized.root.plan.order().contains(&table));
    assert_eq!(optimized.subqueries.len(), 1);
    Ok(())
}

#[test]
fn test_grouped_subquery_with_single_outer_row_uses_exists() -> Result<()> {
    let (catalog, mut stmt) = grouped_statement(1.0, 1000.0)?;
    let optimizer = SemiJoinOptimizer::new(&catalog, OptimizerConfig::default());
    let optimized = optimizer.optimize(&mut stmt)?;

    assert_eq!(stmt.subqueries[0].outcome, Some(ConversionOutcome::InToExists));
    assert_eq!(stmt.root.where_clause, Some(Expression::Exists { subquery: 0 }));
    assert_eq!(
        stmt.subqueries[0].block.having,
        Some(Expression::eq(col(1, "a"), col(0, "a")))
    );
    assert_eq!(optimized.root.plan.order(), vec![0]);
    assert_eq!(optimized.subqueries.len(), 1);
    assert_eq!(optimized.subqueries[0].outcome, ConversionOutcome::InToExists);
    Ok(())
}

#[test]
fn test_predicate_in_left_join_on_clause_is_never_merged() -> Result<()> {
    let catalog = catalog(vec![
        int_table("ot1", &["a"], 100.0),
        int_table("ot2", &["a"], 100.0),
        int_table("it", &["a"], 100.0),
    ])?;
    let mut stmt = Statement::new(QueryBlock::new());
    let ot1 = stmt.add_table("ot1", "ot1");
    let ot2 = stmt.add_table("ot2", "ot2");
    let it = stmt.add_table("it", "it");
    let sq = in_subquery(&mut stmt, &[it], col(it, "a"), None);
    let on = Expression::and(
        Expression::eq(col(ot2, "a"), col(ot1, "a")),
        Expression::in_subquery(col(ot2, "a"), sq),
    );
    stmt.root.join_list = vec![JoinNode::table(ot1), JoinNode::left_join(ot2, on)];

    let optimizer = SemiJoinOptimizer::new(&catalog, OptimizerConfig::default());
    let optimized = optimizer.optimize(&mut stmt)?;

    assert_eq!(stmt.subqueries[sq].outcome, Some(ConversionOutcome::InToExists));
    assert!(stmt.nests.is_empty());
    assert!(!stmt.root.leaf_tables().contains(it));
    assert!(stmt.root.join_list[1].on().map_or(false, |on| on.contains_subquery(sq)));
    assert!(!optimized.root.plan.order().contains(&it));
    assert!(optimized.root.plan.spans().is_empty());
    Ok(())
}

#[test]
fn test_row_degree_mismatch_aborts_statement() -> Result<()> {
    let catalog = catalog(vec![int_table("ot", &["a", "b"], 10.0), int_table("it", &["a"], 10.0)])?;
    let mut stmt = Statement::new(QueryBlock::new());
    let ot = stmt.add_table("ot", "ot");
    let it = stmt.add_table("it", "it");
    root_tables(&mut stmt, &[ot]);
    let sq = in_subquery(&mut stmt, &[it], col(it, "a"), None);
    add_root_filter(&mut stmt, Expression::in_subquery(Expression::Row(vec![col(ot, "a"), col(ot, "b")]), sq));

    let optimizer = SemiJoinOptimizer::new(&catalog, OptimizerConfig::default());
    let err = optimizer.optimize(&mut stmt).unwrap_err();
    assert_eq!(err, PlannerError::OperandColumns { expected: 2, actual: 1 });
    assert!(!stmt.converted);
    Ok(())
}

#[test]
fn test_semijoin_switch_off_keeps_tables_out_of_parent() -> Result<()> {
    let (catalog, mut stmt) = unique_lookup_statement()?;
    let config = OptimizerConfig { semijoin: false, materialization: false, ..OptimizerConfig::default() };
    let optimizer = SemiJoinOptimizer::new(&catalog, config);
    let optimized = optimizer.optimize(&mut stmt)?;

    assert_eq!(stmt.subqueries[0].outcome, Some(ConversionOutcome::InToExists));
    assert_eq!(optimized.root.plan.order(), vec![0]);
    // The injected equality makes the subquery a unique lookup per outer row
    let sub_plan = &optimized.subqueries[0].block.plan;
    assert_eq!(sub_plan.entries[0].access.method.name(), "eq_ref");
    Ok(())
}
