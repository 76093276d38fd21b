use std::collections::HashMap;

use anyhow::Result;
use bayundb_semijoin::catalog::{Catalog, Index};
use bayundb_semijoin::common::types::{TableId, TableMap};
use bayundb_semijoin::query::ast::{Expression, QueryBlock};
use bayundb_semijoin::query::planner::materialization::optimize_semijoin_nests;
use bayundb_semijoin::query::planner::semijoin::{
    finalize_plan, pull_out_semijoin_tables, FinalizedPlan, JumpTarget, SemiJoinContext, SjStrategy,
};
use bayundb_semijoin::query::planner::{
    AccessMethod, JoinOrderSearch, OptimizerConfig, OptimizerTrace, SemiJoinOptimizer, StatisticsCostModel,
};
use bayundb_semijoin::query::statement::{BlockOwner, Statement};

#[path = "../common/mod.rs"]
mod common;

use common::*;

// Convert, then finalize the given join order of the root block
fn finalize_order(
    catalog: &Catalog,
    stmt: &mut Statement,
    config: OptimizerConfig,
    order: &[TableId],
) -> Result<(SemiJoinContext, FinalizedPlan)> {
    SemiJoinOptimizer::new(catalog, config.clone()).prepare(stmt, &mut OptimizerTrace::disabled())?;
    let mut ctx = SemiJoinContext::build(stmt, catalog, BlockOwner::Root, &config, &HashMap::new())?;
    let model = StatisticsCostModel::new();
    pull_out_semijoin_tables(&mut ctx, &mut OptimizerTrace::disabled())?;
    optimize_semijoin_nests(&mut ctx, &model, &mut OptimizerTrace::disabled())?;
    let result = JoinOrderSearch::new(&ctx, &model).evaluate_order(order)?;
    let plan = finalize_plan(&mut ctx, &model, &result, &mut OptimizerTrace::disabled())?;
    assert_nests_covered_once(&ctx, &plan);
    Ok((ctx, plan))
}

// ot.a IN (SELECT it.b FROM it)
fn simple_semijoin() -> (Statement, TableId, TableId) {
    let mut stmt = Statement::new(QueryBlock::new());
    let ot = stmt.add_table("ot", "ot");
    let it = stmt.add_table("it", "it");
    root_tables(&mut stmt, &[ot]);
    let sq = in_subquery(&mut stmt, &[it], col(it, "b"), None);
    add_root_filter(&mut stmt, Expression::in_subquery(col(ot, "a"), sq));
    (stmt, ot, it)
}

#[test]
fn test_loose_scan_reads_grouped_index() -> Result<()> {
    let catalog = catalog(vec![
        int_table("ot", &["a"], 100.0).with_index(Index::unique("pk", &["a"])),
        int_table("it", &["b"], 10000.0).with_index(Index::non_unique("ib", &["b"], 100.0)),
    ])?;
    let (mut stmt, ot, it) = simple_semijoin();
    let config = OptimizerConfig { firstmatch: false, materialization: false, ..OptimizerConfig::default() };
    let (_, plan) = finalize_order(&catalog, &mut stmt, config, &[it, ot])?;

    let spans = plan.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].strategy, SjStrategy::LooseScan);
    assert_eq!((spans[0].start, spans[0].len), (0, 1));
    assert_eq!(plan.entries[0].access.method, AccessMethod::IndexScan { index: "ib".to_string() });
    assert!(plan.entries[0].access.grouped_output);
    assert_eq!(plan.entries[0].loose_scan_match, Some(0));
    assert_eq!(plan.entries[1].strategy, SjStrategy::None);
    Ok(())
}

#[test]
fn test_materialization_lookup_after_outer_table() -> Result<()> {
    let catalog = catalog(vec![int_table("ot", &["a"], 1000.0), int_table("it", &["b"], 100000.0)])?;
    let (mut stmt, ot, it) = simple_semijoin();
    let config = OptimizerConfig { firstmatch: false, loosescan: false, ..OptimizerConfig::default() };
    let (ctx, plan) = finalize_order(&catalog, &mut stmt, config, &[ot, it])?;

    let spans = plan.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].strategy, SjStrategy::MaterializeLookup);
    assert_eq!((spans[0].start, spans[0].len), (1, 1));
    assert_eq!(plan.entries[1].materialization, Some(0));
    assert_eq!(plan.materialized_nests, vec![0]);
    assert_eq!(plan.sjm_lookup_tables, TableMap::single(it));
    assert!(plan.sjm_scan_tables.is_empty());

    let mat = ctx.nests[0].mat_info.as_ref().expect("materialization estimate");
    assert!(mat.is_used && !mat.is_scan);
    assert_eq!(mat.rows, 100000.0);
    assert_eq!(mat.row_size, 8);
    Ok(())
}

#[test]
fn test_materialization_scan_drives_outer_lookups() -> Result<()> {
    let catalog = catalog(vec![
        int_table("ot", &["a"], 100000.0).with_index(Index::unique("pk", &["a"])),
        int_table("it", &["b"], 100.0),
    ])?;
    let (mut stmt, ot, it) = simple_semijoin();
    let config = OptimizerConfig { firstmatch: false, loosescan: false, ..OptimizerConfig::default() };
    let (ctx, plan) = finalize_order(&catalog, &mut stmt, config, &[it, ot])?;

    let spans = plan.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].strategy, SjStrategy::MaterializeScan);
    assert_eq!((spans[0].start, spans[0].len), (0, 1));
    assert_eq!(plan.sjm_scan_tables, TableMap::single(it));
    assert_eq!(plan.entries[0].materialization, Some(0));
    assert_eq!(plan.entries[1].strategy, SjStrategy::None);
    assert_eq!(
        plan.entries[1].access.method,
        AccessMethod::EqRef { index: "pk".to_string(), depends_on: TableMap::single(it) }
    );
    // The outer lookup runs once per materialized row
    assert_eq!(plan.entries[1].prefix_record_count, 100.0);
    assert!(ctx.nests[0].mat_info.as_ref().map_or(false, |m| m.is_scan));
    Ok(())
}

#[test]
fn test_first_match_jumps_to_last_outer_table() -> Result<()> {
    let catalog = catalog(vec![
        int_table("ot1", &["a"], 10.0),
        int_table("ot2", &["c"], 10.0),
        int_table("it", &["b"], 1000.0).with_index(Index::non_unique("ib", &["b"], 10.0)),
    ])?;
    let mut stmt = Statement::new(QueryBlock::new());
    let ot1 = stmt.add_table("ot1", "ot1");
    let ot2 = stmt.add_table("ot2", "ot2");
    let it = stmt.add_table("it", "it");
    root_tables(&mut stmt, &[ot1, ot2]);
    let sq = in_subquery(&mut stmt, &[it], col(it, "b"), None);
    add_root_filter(&mut stmt, Expression::in_subquery(col(ot1, "a"), sq));

    let config = OptimizerConfig { loosescan: false, materialization: false, ..OptimizerConfig::default() };
    let (_, plan) = finalize_order(&catalog, &mut stmt, config, &[ot1, ot2, it])?;

    let spans = plan.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].strategy, SjStrategy::FirstMatch);
    assert_eq!((spans[0].start, spans[0].len), (2, 1));
    assert_eq!(plan.entries[2].first_match_jump, Some(JumpTarget::Position(1)));
    assert!(!plan.entries[2].access.use_join_buffer);
    assert!(plan.complex_firstmatch_tables.is_empty());
    Ok(())
}

#[test]
fn test_weedout_start_moves_to_plan_start_with_join_buffer() -> Result<()> {
    let catalog = catalog(vec![int_table("ot1", &["a"], 100.0), int_table("ot2", &["c"], 100.0), int_table("it", &["b"], 100.0)])?;
    let mut stmt = Statement::new(QueryBlock::new());
    let ot1 = stmt.add_table("ot1", "ot1");
    let ot2 = stmt.add_table("ot2", "ot2");
    let it = stmt.add_table("it", "it");
    root_tables(&mut stmt, &[ot1, ot2]);
    let sq = in_subquery(&mut stmt, &[it], col(it, "b"), None);
    add_root_filter(&mut stmt, Expression::in_subquery(col(ot1, "a"), sq));

    let config = OptimizerConfig {
        firstmatch: false,
        loosescan: false,
        materialization: false,
        ..OptimizerConfig::default()
    };
    let (_, plan) = finalize_order(&catalog, &mut stmt, config, &[ot2, it, ot1])?;

    let spans = plan.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].strategy, SjStrategy::DuplicateWeedout);
    assert_eq!((spans[0].start, spans[0].len), (1, 2));
    let weedout = plan.entries[1].weedout.as_ref().expect("weedout setup");
    // Full scans read through the join buffer, so the key covers ot2 too
    assert_eq!(weedout.start, 0);
    assert_eq!(weedout.rowid_tables, vec![ot2, ot1]);
    assert_eq!(weedout.rowid_length, 16);
    assert_eq!(weedout.check_position, 2);
    Ok(())
}

#[test]
fn test_weedout_start_stays_without_join_buffering() -> Result<()> {
    let catalog = catalog(vec![int_table("ot1", &["a"], 100.0), int_table("ot2", &["c"], 100.0), int_table("it", &["b"], 100.0)])?;
    let mut stmt = Statement::new(QueryBlock::new());
    let ot1 = stmt.add_table("ot1", "ot1");
    let ot2 = stmt.add_table("ot2", "ot2");
    let it = stmt.add_table("it", "it");
    root_tables(&mut stmt, &[ot1, ot2]);
    let sq = in_subquery(&mut stmt, &[it], col(it, "b"), None);
    add_root_filter(&mut stmt, Expression::in_subquery(col(ot1, "a"), sq));

    let config = OptimizerConfig {
        firstmatch: false,
        loosescan: false,
        materialization: false,
        join_cache_level: 0,
        ..OptimizerConfig::default()
    };
    let (_, plan) = finalize_order(&catalog, &mut stmt, config, &[ot2, it, ot1])?;

    let weedout = plan.entries[1].weedout.as_ref().expect("weedout setup");
    assert_eq!(weedout.start, 1);
    assert_eq!(weedout.rowid_tables, vec![ot1]);
    assert_eq!(weedout.rowid_length, 8);
    Ok(())
}

#[test]
fn test_complex_first_match_jumps_per_inner_run() -> Result<()> {
    let catalog = catalog(vec![
        int_table("ot1", &["a"], 10.0),
        int_table("nt", &["c"], 10.0),
        int_table("it1", &["x", "y"], 100.0),
        int_table("it2", &["y"], 100.0),
    ])?;
    // ot1.a IN (SELECT it1.x FROM it1, it2 WHERE it2.y = it1.y)
    let mut stmt = Statement::new(QueryBlock::new());
    let ot1 = stmt.add_table("ot1", "ot1");
    let nt = stmt.add_table("nt", "nt");
    let it1 = stmt.add_table("it1", "it1");
    let it2 = stmt.add_table("it2", "it2");
    root_tables(&mut stmt, &[ot1, nt]);
    let sq = in_subquery(&mut stmt, &[it1, it2], col(it1, "x"), Some(Expression::eq(col(it2, "y"), col(it1, "y"))));
    add_root_filter(&mut stmt, Expression::in_subquery(col(ot1, "a"), sq));

    // Without join buffering the range costs less than a weedout over it
    let config = OptimizerConfig {
        loosescan: false,
        materialization: false,
        join_cache_level: 0,
        ..OptimizerConfig::default()
    };
    let (_, plan) = finalize_order(&catalog, &mut stmt, config, &[ot1, it1, nt, it2])?;

    let spans = plan.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].strategy, SjStrategy::FirstMatch);
    assert_eq!((spans[0].start, spans[0].len), (1, 3));
    assert_eq!(spans[0].handled_tables, [it1, it2].into_iter().collect::<TableMap>());

    // it1 skips back over nt to ot1, it2 back to nt
    assert_eq!(plan.entries[1].first_match_jump, Some(JumpTarget::Position(0)));
    assert_eq!(plan.entries[2].first_match_jump, None);
    assert_eq!(plan.entries[3].first_match_jump, Some(JumpTarget::Position(2)));
    assert_eq!(plan.complex_firstmatch_tables, [it1, nt, it2].into_iter().collect::<TableMap>());
    assert!(plan.entries[1..].iter().all(|e| !e.access.use_join_buffer));
    Ok(())
}
