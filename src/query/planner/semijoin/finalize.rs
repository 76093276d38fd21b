// Plan Finalizer
//
// This module turns the best join order into an executable plan. A backward
// walk fixes, for every strategy tag left by the search, the span of
// positions it covers and re-derives the access paths the strategy
// requires. A forward walk then sets up each span's execution: the weedout
// rowid table, the FirstMatch jump-back targets, the LooseScan match
// position and the materialization nest.

use log::{debug, info};
use serde::{Serialize, Deserialize};
use serde_json::json;

use crate::common::types::{TableId, TableMap, NestId, cost_mult};
use crate::query::planner::cost_model::{AccessMethod, AccessPath, AccessPathEstimator, AccessRequest};
use crate::query::planner::error::{PlannerError, PlannerResult};
use crate::query::planner::join_reordering::SearchResult;
use crate::query::planner::trace::OptimizerTrace;
use super::context::SemiJoinContext;
use super::prefix::Position;
use super::strategy::SjStrategy;

/// Where FirstMatch resumes once a match was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JumpTarget {
    /// The range starts the plan: the row is complete, fetch the next one
    BeforePlan,
    Position(usize),
}

/// Duplicate weedout over a range of positions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeedoutSetup {
    /// First position whose row ids go into the weedout key
    pub start: usize,
    /// Position after which a row combination is checked
    pub check_position: usize,
    /// Tables whose row ids form the key
    pub rowid_tables: Vec<TableId>,
    pub rowid_length: usize,
}

/// One table of the final plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub table: TableId,
    pub alias: String,
    pub access: AccessPath,
    pub prefix_record_count: f64,
    pub prefix_cost: f64,
    /// Strategy of the span starting here
    pub strategy: SjStrategy,
    /// Length of the span starting here, 0 elsewhere
    pub n_sj_tables: usize,
    /// Nest tables whose duplicates the span removes
    pub handled_tables: TableMap,
    pub materialization: Option<NestId>,
    pub first_match_jump: Option<JumpTarget>,
    /// Last position of a LooseScan span
    pub loose_scan_match: Option<usize>,
    pub weedout: Option<WeedoutSetup>,
}

/// A run of positions handled by one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub len: usize,
    pub strategy: SjStrategy,
    pub handled_tables: TableMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedPlan {
    pub entries: Vec<PlanEntry>,
    pub cost: f64,
    pub record_count: f64,
    pub sjm_lookup_tables: TableMap,
    pub sjm_scan_tables: TableMap,
    /// Tables of FirstMatch ranges interleaved with outer tables
    pub complex_firstmatch_tables: TableMap,
    pub materialized_nests: Vec<NestId>,
}

impl FinalizedPlan {
    pub fn spans(&self) -> Vec<Span> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.strategy != SjStrategy::None)
            .map(|(start, e)| Span {
                start,
                len: e.n_sj_tables,
                strategy: e.strategy,
                handled_tables: e.handled_tables,
            })
            .collect()
    }

    pub fn order(&self) -> Vec<TableId> {
        self.entries.iter().map(|e| e.table).collect()
    }
}

/// Fix strategy spans, then set up duplicate elimination for the chosen
/// join order
pub fn finalize_plan(
    ctx: &mut SemiJoinContext,
    estimator: &dyn AccessPathEstimator,
    result: &SearchResult,
    trace: &mut OptimizerTrace,
) -> PlannerResult<FinalizedPlan> {
    let mut positions = result.positions.clone();
    let (sjm_lookup_tables, sjm_scan_tables) = fix_semijoin_strategies(ctx, estimator, &mut positions)?;
    let mut plan = FinalizedPlan {
        entries: Vec::with_capacity(positions.len()),
        cost: result.cost,
        record_count: result.record_count,
        sjm_lookup_tables,
        sjm_scan_tables,
        complex_firstmatch_tables: TableMap::EMPTY,
        materialized_nests: Vec::new(),
    };
    for pos in &positions {
        plan.entries.push(PlanEntry {
            table: pos.table,
            alias: ctx.alias(pos.table).to_string(),
            access: pos.access.clone(),
            prefix_record_count: pos.prefix_record_count,
            prefix_cost: pos.prefix_cost,
            strategy: pos.sj_strategy,
            n_sj_tables: pos.n_sj_tables,
            handled_tables: TableMap::EMPTY,
            materialization: None,
            first_match_jump: None,
            loose_scan_match: None,
            weedout: None,
        });
    }
    setup_semijoin_dups_elimination(ctx, &positions, &mut plan)?;

    for span in plan.spans() {
        info!(
            "{} over positions {}..{} removes duplicates of {:?}",
            span.strategy,
            span.start,
            span.start + span.len,
            span.handled_tables
        );
    }
    trace.add(
        "finalized_plan",
        json!({
            "order": plan.entries.iter().map(|e| e.alias.clone()).collect::<Vec<_>>(),
            "spans": plan.spans().iter().map(|s| json!({
                "strategy": s.strategy.name(),
                "start": s.start,
                "tables": s.len,
            })).collect::<Vec<_>>(),
            "cost": plan.cost,
            "rows": plan.record_count,
        }),
    );
    Ok(plan)
}

fn missing(what: &str, idx: usize) -> PlannerError {
    PlannerError::InvalidInput(format!("{} missing at position {}", what, idx))
}

fn span_start(tablenr: usize, tables: usize) -> PlannerResult<usize> {
    (tablenr + 1)
        .checked_sub(tables)
        .ok_or_else(|| missing("materialized span", tablenr))
}

/// Walk the plan from the end. Every strategy tag decides the span of
/// positions it covers; the tag moves to the span's first position.
fn fix_semijoin_strategies(
    ctx: &mut SemiJoinContext,
    estimator: &dyn AccessPathEstimator,
    positions: &mut [Position],
) -> PlannerResult<(TableMap, TableMap)> {
    let mut handled = TableMap::EMPTY;
    let mut sjm_lookup_tables = TableMap::EMPTY;
    let mut sjm_scan_tables = TableMap::EMPTY;
    let join_buffering = ctx.config.join_buffering_enabled();

    let mut tablenr = positions.len();
    while tablenr > 0 {
        tablenr -= 1;
        let strategy = positions[tablenr].sj_strategy;
        if strategy == SjStrategy::None || handled.contains(positions[tablenr].table) {
            continue;
        }
        let pickers = positions[tablenr].pickers.clone();

        let (first, n_tables) = match strategy {
            SjStrategy::MaterializeLookup => {
                let nest_id = ctx
                    .table(positions[tablenr].table)?
                    .emb_sj_nest
                    .ok_or_else(|| missing("semi-join nest", tablenr))?;
                let mat = ctx.nest(nest_id)?.mat_info.clone().ok_or_else(|| missing("materialization", tablenr))?;
                let first = span_start(tablenr, mat.tables)?;
                positions[first..first + mat.tables].clone_from_slice(&mat.positions);
                for j in first..first + mat.tables {
                    let prev_rows = if j == 0 { 1.0 } else { positions[j - 1].prefix_record_count };
                    positions[j].prefix_record_count = cost_mult(prev_rows, positions[j].access.records_read);
                }
                for p in &positions[first..first + mat.tables] {
                    sjm_lookup_tables.insert(p.table);
                }
                if let Some(info) = ctx.nest_mut(nest_id)?.mat_info.as_mut() {
                    info.is_used = true;
                    info.is_scan = false;
                }
                (first, mat.tables)
            }
            SjStrategy::MaterializeScan => {
                let last_inner = pickers.sj_mat.scan_last_inner();
                let nest_id = ctx
                    .table(positions[last_inner].table)?
                    .emb_sj_nest
                    .ok_or_else(|| missing("semi-join nest", last_inner))?;
                let mat = ctx.nest(nest_id)?.mat_info.clone().ok_or_else(|| missing("materialization", last_inner))?;
                let first = span_start(last_inner, mat.tables)?;
                let end = first + mat.tables;
                positions[first..end].clone_from_slice(&mat.positions);
                for p in &positions[first..end] {
                    sjm_scan_tables.insert(p.table);
                }

                // Outer tables after the nest are read once per
                // materialized row
                let mut prefix_rows = if first == 0 { 1.0 } else { positions[first - 1].prefix_record_count };
                prefix_rows = cost_mult(prefix_rows, mat.rows);
                for p in &mut positions[first..end] {
                    p.prefix_record_count = prefix_rows;
                }
                let mut bound: TableMap = positions[..end].iter().map(|p| p.table).collect();
                for i in end..=tablenr {
                    let table = positions[i].table;
                    let req = AccessRequest::new(table, bound, prefix_rows, join_buffering);
                    let path = estimator.estimate_access_path(ctx, &req)?;
                    prefix_rows = cost_mult(prefix_rows, path.records_read);
                    positions[i].access = path;
                    positions[i].prefix_record_count = prefix_rows;
                    bound.insert(table);
                }
                if let Some(info) = ctx.nest_mut(nest_id)?.mat_info.as_mut() {
                    info.is_used = true;
                    info.is_scan = true;
                }
                (first, mat.tables)
            }
            SjStrategy::FirstMatch => {
                let first = pickers.first_match.first_table().ok_or_else(|| missing("FirstMatch range", tablenr))?;
                rederive_without_join_buffer(ctx, estimator, positions, first, tablenr, false, tablenr)?;
                (first, tablenr - first + 1)
            }
            SjStrategy::LooseScan => {
                let first = pickers.loose_scan.first_table().ok_or_else(|| missing("LooseScan range", tablenr))?;
                let n_inner = ctx
                    .nest_of(positions[first].table)?
                    .map(|n| n.inner_tables().len())
                    .ok_or_else(|| missing("semi-join nest", first))?;
                let no_jbuf_before = if join_buffering { first + n_inner } else { usize::MAX };
                rederive_without_join_buffer(ctx, estimator, positions, first, tablenr, true, no_jbuf_before)?;
                (first, n_inner)
            }
            SjStrategy::DuplicateWeedout => {
                let first = pickers.dups_weedout.first_table();
                (first, tablenr - first + 1)
            }
            SjStrategy::None => continue,
        };

        debug!("{} span fixed at positions {}..{}", strategy, first, first + n_tables);
        positions[first].sj_strategy = strategy;
        positions[first].n_sj_tables = n_tables;
        for (i, pos) in positions.iter_mut().enumerate().skip(first).take(n_tables) {
            if i != first {
                pos.sj_strategy = SjStrategy::None;
                pos.n_sj_tables = 0;
            }
            handled.insert(pos.table);
        }
        if tablenr != first && tablenr >= first + n_tables {
            positions[tablenr].sj_strategy = SjStrategy::None;
        }
    }
    Ok((sjm_lookup_tables, sjm_scan_tables))
}

/// Re-derive the access paths of positions `first..=last` the way the span
/// is executed: no join buffer before `no_jbuf_before`, and the loose-scan
/// path at `first` when `first_alt` is set
fn rederive_without_join_buffer(
    ctx: &SemiJoinContext,
    estimator: &dyn AccessPathEstimator,
    positions: &mut [Position],
    first: usize,
    last: usize,
    first_alt: bool,
    no_jbuf_before: usize,
) -> PlannerResult<()> {
    let mut rows = if first == 0 { 1.0 } else { positions[first - 1].prefix_record_count };
    let mut bound: TableMap = positions[..first].iter().map(|p| p.table).collect();
    for i in first..=last {
        let table = positions[i].table;
        if i == first && first_alt {
            if let Some(path) = positions[i].loose_scan.clone() {
                positions[i].access = path;
            }
        } else if positions[i].access.use_join_buffer && i < no_jbuf_before {
            let req = AccessRequest::new(table, bound, rows, false);
            positions[i].access = estimator.estimate_access_path(ctx, &req)?;
        }
        rows = cost_mult(rows, positions[i].access.records_read);
        bound.insert(table);
    }
    Ok(())
}

/// Whether a weedout range reads rows through a join buffer, which
/// reorders rows and forces the range to start at the first position
fn uses_join_buffer(ctx: &SemiJoinContext, pos: &Position) -> bool {
    let level = ctx.config.join_cache_level;
    pos.access.use_join_buffer
        || (matches!(pos.access.method, AccessMethod::Scan) && level != 0)
        || (level > 2 && matches!(pos.access.method, AccessMethod::Ref { .. } | AccessMethod::EqRef { .. }))
}

/// Outer tables need their row id in the weedout key unless an eq_ref
/// lookup makes them functionally dependent on tables of the same
/// outer-join operand
fn sj_table_is_included(ctx: &SemiJoinContext, pos: &Position) -> PlannerResult<bool> {
    let info = ctx.table(pos.table)?;
    if info.emb_sj_nest.is_some() {
        return Ok(false);
    }
    if let AccessMethod::EqRef { depends_on, .. } = &pos.access.method {
        for dep in *depends_on {
            if ctx.table(dep)?.outer_join_tables != info.outer_join_tables {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    Ok(true)
}

fn setup_semijoin_dups_elimination(ctx: &SemiJoinContext, positions: &[Position], plan: &mut FinalizedPlan) -> PlannerResult<()> {
    let mut i = 0;
    while i < positions.len() {
        let strategy = positions[i].sj_strategy;
        let span = positions[i].n_sj_tables.max(1);
        if strategy == SjStrategy::None {
            i += 1;
            continue;
        }
        let end = (i + span).min(positions.len());

        let mut handled = TableMap::EMPTY;
        for pos in &positions[i..end] {
            if ctx.table(pos.table)?.emb_sj_nest.is_some() {
                handled.insert(pos.table);
            }
        }
        plan.entries[i].handled_tables = handled;

        match strategy {
            SjStrategy::MaterializeLookup | SjStrategy::MaterializeScan => {
                let nest = ctx.table(positions[i].table)?.emb_sj_nest;
                plan.entries[i].materialization = nest;
                if let Some(nest) = nest {
                    plan.materialized_nests.push(nest);
                }
            }
            SjStrategy::LooseScan => {
                plan.entries[i].loose_scan_match = Some(end - 1);
            }
            SjStrategy::DuplicateWeedout => {
                let start = if (i..end).any(|j| j != 0 && uses_join_buffer(ctx, &positions[j])) { 0 } else { i };
                let mut rowid_tables = Vec::new();
                let mut rowid_length = 0;
                for pos in &positions[start..end] {
                    if sj_table_is_included(ctx, pos)? {
                        rowid_tables.push(pos.table);
                        rowid_length += ctx.table(pos.table)?.stats.rowid_length;
                    }
                }
                plan.entries[i].weedout = Some(WeedoutSetup {
                    start,
                    check_position: end - 1,
                    rowid_tables,
                    rowid_length,
                });
            }
            SjStrategy::FirstMatch => {
                let mut jump_to = if i == 0 { JumpTarget::BeforePlan } else { JumpTarget::Position(i - 1) };
                let mut complex_range = false;
                let mut tables_in_range = TableMap::EMPTY;
                for j in i..end {
                    tables_in_range.insert(positions[j].table);
                    if ctx.table(positions[j].table)?.emb_sj_nest.is_none() && j > i {
                        // An outer table inside the range: the inner table
                        // before it jumps back past it
                        if ctx.table(positions[j - 1].table)?.emb_sj_nest.is_some() {
                            plan.entries[j - 1].first_match_jump = Some(jump_to);
                        }
                        jump_to = JumpTarget::Position(j);
                        complex_range = true;
                    }
                }
                plan.entries[end - 1].first_match_jump = Some(jump_to);
                if complex_range {
                    plan.complex_firstmatch_tables |= tables_in_range;
                }
            }
            SjStrategy::None => {}
        }
        i = end;
    }
    Ok(())
}
