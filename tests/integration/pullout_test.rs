use std::collections::HashMap;

use anyhow::Result;
use bayundb_semijoin::catalog::{Catalog, Index};
use bayundb_semijoin::common::types::TableMap;
use bayundb_semijoin::query::ast::{Expression, QueryBlock};
use bayundb_semijoin::query::planner::semijoin::{find_eq_ref_candidate, pull_out_semijoin_tables, SemiJoinContext};
use bayundb_semijoin::query::planner::{AccessMethod, OptimizerConfig, OptimizerTrace, SemiJoinOptimizer};
use bayundb_semijoin::query::statement::{BlockOwner, Statement};

#[path = "../common/mod.rs"]
mod common;

use common::*;

fn prepared(catalog: &Catalog, stmt: &mut Statement) -> Result<SemiJoinContext> {
    let config = OptimizerConfig::default();
    SemiJoinOptimizer::new(catalog, config.clone()).prepare(stmt, &mut OptimizerTrace::disabled())?;
    Ok(SemiJoinContext::build(stmt, catalog, BlockOwner::Root, &config, &HashMap::new())?)
}

#[test]
fn test_unique_inner_table_is_pulled_out_and_looked_up() -> Result<()> {
    // ot.a IN (SELECT it.a FROM it WHERE it.a > 5), it.a unique
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

    let optimizer = SemiJoinOptimizer::new(&catalog, OptimizerConfig { trace: true, ..OptimizerConfig::default() });
    let optimized = optimizer.optimize(&mut stmt)?;

    let nest = &optimized.root.context.nests[0];
    assert!(nest.removed);
    assert_eq!(nest.pulled_out, TableMap::single(it));
    assert_eq!(optimized.root.context.table(it)?.emb_sj_nest, None);

    let plan = &optimized.root.plan;
    assert_eq!(plan.order(), vec![ot, it]);
    assert!(plan.spans().is_empty());
    assert!(plan.materialized_nests.is_empty());
    assert_eq!(
        plan.entries[1].access.method,
        AccessMethod::EqRef { index: "pk".to_string(), depends_on: TableMap::single(ot) }
    );
    assert!(optimized.trace.steps().iter().any(|s| s["step"] == "pull_out"));

    // The nest itself survives in the statement for the next execution
    assert_eq!(stmt.nests[0].inner_tables, TableMap::single(it));
    Ok(())
}

#[test]
fn test_pulled_tables_stay_functionally_dependent() -> Result<()> {
    // ot.a IN (SELECT it1.a FROM it1, it2 WHERE it1.a = ot.b AND it2.b = it1.b)
    let catalog = catalog(vec![
        int_table("ot", &["a", "b"], 100.0),
        int_table("it1", &["a", "b"], 1000.0).with_index(Index::unique("pk", &["a"])),
        int_table("it2", &["b"], 1000.0).with_index(Index::non_unique("ib", &["b"], 10.0)),
    ])?;
    let mut stmt = Statement::new(QueryBlock::new());
    let ot = stmt.add_table("ot", "ot");
    let it1 = stmt.add_table("it1", "it1");
    let it2 = stmt.add_table("it2", "it2");
    root_tables(&mut stmt, &[ot]);
    let filter = Expression::and(
        Expression::eq(col(it1, "a"), col(ot, "b")),
        Expression::eq(col(it2, "b"), col(it1, "b")),
    );
    let sq = in_subquery(&mut stmt, &[it1, it2], col(it1, "a"), Some(filter));
    add_root_filter(&mut stmt, Expression::in_subquery(col(ot, "a"), sq));

    let mut ctx = prepared(&catalog, &mut stmt)?;
    pull_out_semijoin_tables(&mut ctx, &mut OptimizerTrace::disabled())?;

    let nest = &ctx.nests[0];
    assert_eq!(nest.pulled_out, TableMap::single(it1));
    assert_eq!(nest.inner_tables(), TableMap::single(it2));
    assert!(!nest.removed);
    assert!(nest.nest.corr_tables.contains(it1));

    // Every pulled table is still bound through a unique key by tables
    // outside the remaining nest
    for table in nest.pulled_out {
        assert!(find_eq_ref_candidate(&ctx, table, nest.inner_tables())?);
    }
    // and nothing left behind could have been pulled
    for table in nest.inner_tables() {
        assert!(!find_eq_ref_candidate(&ctx, table, nest.inner_tables())?);
    }
    Ok(())
}

#[test]
fn test_pull_out_is_recomputed_per_execution() -> Result<()> {
    let catalog = catalog(vec![
        int_table("ot", &["a"], 10.0),
        int_table("it", &["a"], 100.0).with_index(Index::unique("pk", &["a"])),
    ])?;
    let mut stmt = Statement::new(QueryBlock::new());
    let ot = stmt.add_table("ot", "ot");
    let it = stmt.add_table("it", "it");
    root_tables(&mut stmt, &[ot]);
    let sq = in_subquery(&mut stmt, &[it], col(it, "a"), None);
    add_root_filter(&mut stmt, Expression::in_subquery(col(ot, "a"), sq));

    let mut first = prepared(&catalog, &mut stmt)?;
    pull_out_semijoin_tables(&mut first, &mut OptimizerTrace::disabled())?;
    let mut second = prepared(&catalog, &mut stmt)?;
    assert!(!second.nests[0].removed);
    pull_out_semijoin_tables(&mut second, &mut OptimizerTrace::disabled())?;

    assert_eq!(first.nests, second.nests);
    assert!(second.nests[0].removed);
    Ok(())
}
