// Join-Prefix State Tracker
//
// This module keeps one Position per table of a candidate join order. Each
// push estimates the new table's access path, runs the strategy pickers and
// records the cheapest way found so far to remove the duplicates of the
// nests in the prefix. A pop is a truncation: every position is a complete
// value, so backtracking never needs an inverse update.

use log::debug;

use crate::common::types::{TableId, TableMap, NestId, cost_add, cost_mult};
use crate::query::planner::cost_model::{AccessPath, AccessPathEstimator, AccessRequest, TIME_FOR_COMPARE};
use crate::query::planner::error::{PlannerError, PlannerResult};
use super::context::SemiJoinContext;
use super::strategy::{is_multiple_semi_joins, PickContext, PickerKind, PickerStates, SjStrategy};

/// One table slot of a candidate join order
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub table: TableId,
    pub access: AccessPath,
    /// Index scan grouped by the nest's compared columns, when the table can
    /// start a LooseScan range
    pub loose_scan: Option<AccessPath>,
    /// Rows produced by the prefix ending here
    pub prefix_record_count: f64,
    /// Cost of the prefix ending here
    pub prefix_cost: f64,
    /// Tables not yet placed after this one
    pub remaining_tables: TableMap,
    /// Nest tables whose fan-out no strategy has removed yet
    pub dups_producing_tables: TableMap,
    pub inner_tables_handled_with_other_sjs: TableMap,
    /// Inner tables of nests that are partially placed
    pub cur_sj_inner_tables: TableMap,
    /// Nest tables handled by materialize-and-probe
    pub sjm_lookup_tables: TableMap,
    pub pickers: PickerStates,
    pub sj_strategy: SjStrategy,
    /// Span length, set on the first position of a span by the finalizer
    pub n_sj_tables: usize,
}

impl Position {
    /// Position with the plain join cost of `access` after a prefix of
    /// `prev_rows` rows and `prev_cost` cost
    pub fn new(table: TableId, access: AccessPath, prev_rows: f64, prev_cost: f64) -> Self {
        let prefix_record_count = cost_mult(prev_rows, access.records_read);
        let prefix_cost = cost_add(prev_cost, cost_add(access.read_cost, prefix_record_count / TIME_FOR_COMPARE));
        Position {
            table,
            access,
            loose_scan: None,
            prefix_record_count,
            prefix_cost,
            remaining_tables: TableMap::EMPTY,
            dups_producing_tables: TableMap::EMPTY,
            inner_tables_handled_with_other_sjs: TableMap::EMPTY,
            cur_sj_inner_tables: TableMap::EMPTY,
            sjm_lookup_tables: TableMap::EMPTY,
            pickers: PickerStates::empty(),
            sj_strategy: SjStrategy::None,
            n_sj_tables: 0,
        }
    }
}

/// Read access to the positions before the one being built and to the one
/// being built
#[derive(Clone, Copy)]
pub struct PrefixView<'a> {
    earlier: &'a [Position],
    current: &'a Position,
}

impl<'a> PrefixView<'a> {
    pub fn new(earlier: &'a [Position], current: &'a Position) -> Self {
        PrefixView { earlier, current }
    }

    pub fn at(&self, idx: usize) -> &'a Position {
        if idx < self.earlier.len() {
            &self.earlier[idx]
        } else {
            self.current
        }
    }

    pub fn len(&self) -> usize {
        self.earlier.len() + 1
    }

    /// Tables at positions before `idx`
    pub fn tables_before(&self, idx: usize) -> TableMap {
        (0..idx.min(self.len())).map(|i| self.at(i).table).collect()
    }
}

/// A join prefix under construction
pub struct JoinPrefix<'a> {
    ctx: &'a SemiJoinContext,
    estimator: &'a dyn AccessPathEstimator,
    all_tables: TableMap,
    /// Set when optimizing the inner join of one nest for materialization
    sjm_nest: Option<NestId>,
    positions: Vec<Position>,
}

impl<'a> JoinPrefix<'a> {
    pub fn new(ctx: &'a SemiJoinContext, estimator: &'a dyn AccessPathEstimator, all_tables: TableMap) -> Self {
        JoinPrefix { ctx, estimator, all_tables, sjm_nest: None, positions: Vec::new() }
    }

    /// Prefix over the inner tables of one nest
    pub fn within_nest(ctx: &'a SemiJoinContext, estimator: &'a dyn AccessPathEstimator, nest: NestId) -> PlannerResult<Self> {
        let inner = ctx.nest(nest)?.inner_tables();
        Ok(JoinPrefix { ctx, estimator, all_tables: inner, sjm_nest: Some(nest), positions: Vec::new() })
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn all_tables(&self) -> TableMap {
        self.all_tables
    }

    pub fn placed_tables(&self) -> TableMap {
        self.positions.iter().map(|p| p.table).collect()
    }

    pub fn remaining_tables(&self) -> TableMap {
        self.all_tables - self.placed_tables()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_tables().is_empty()
    }

    pub fn cost(&self) -> f64 {
        self.positions.last().map_or(0.0, |p| p.prefix_cost)
    }

    pub fn record_count(&self) -> f64 {
        self.positions.last().map_or(1.0, |p| p.prefix_record_count)
    }

    /// Nest tables whose duplicates are not removed yet
    pub fn dups_producing_tables(&self) -> TableMap {
        self.positions.last().map_or(TableMap::EMPTY, |p| p.dups_producing_tables)
    }

    /// Add a table to the prefix. On error the prefix is left unchanged.
    pub fn push(&mut self, table: TableId) -> PlannerResult<&Position> {
        let remaining = self.remaining_tables();
        if !remaining.contains(table) {
            return Err(PlannerError::InvalidInput(format!("table #{} is not placeable", table)));
        }
        let remaining = remaining - TableMap::single(table);
        let bound = self.placed_tables();
        let idx = self.positions.len();
        let prev_rows = self.record_count();
        let prev_cost = self.cost();

        let join_buffer_allowed = self.ctx.config.join_buffering_enabled() && idx > 0;
        let req = AccessRequest::new(table, bound, prev_rows, join_buffer_allowed);
        let access = self.estimator.estimate_access_path(self.ctx, &req)?;

        let mut pos = Position::new(table, access, prev_rows, prev_cost);
        pos.remaining_tables = remaining;
        pos.loose_scan = self.loose_scan_path(table, bound, remaining, prev_rows)?;
        self.advance_sj_state(&mut pos, idx)?;

        self.positions.push(pos);
        Ok(&self.positions[idx])
    }

    /// Remove the last table
    pub fn pop(&mut self) -> Option<Position> {
        self.positions.pop()
    }

    pub fn into_positions(self) -> Vec<Position> {
        self.positions
    }

    /// Grouped index scan for a table that can start a LooseScan range: the
    /// first table of its nest, outside any open range, with every
    /// correlated table already placed and some left-operand table still to
    /// come
    fn loose_scan_path(&self, table: TableId, bound: TableMap, remaining: TableMap, prev_rows: f64) -> PlannerResult<Option<AccessPath>> {
        let ctx = self.ctx;
        if self.sjm_nest.is_some() || !ctx.config.loosescan {
            return Ok(None);
        }
        let nest = match ctx.nest_of(table)? {
            Some(nest) => nest,
            None => return Ok(None),
        };
        let placeable = remaining | TableMap::single(table);
        let cur_sj_inner = self.positions.last().map_or(TableMap::EMPTY, |p| p.cur_sj_inner_tables);
        if !nest.inner_tables().is_subset_of(placeable)
            || !cur_sj_inner.is_empty()
            || placeable.overlaps(nest.nest.corr_tables)
            || !remaining.overlaps(nest.nest.depends_on)
        {
            return Ok(None);
        }

        let columns: Vec<String> = nest
            .nest
            .inner_exprs
            .iter()
            .filter_map(|e| match e {
                crate::query::ast::Expression::Column(col) if col.table == table => Some(col.name.clone()),
                _ => None,
            })
            .collect();
        if columns.is_empty() {
            return Ok(None);
        }

        let mut req = AccessRequest::new(table, bound, prev_rows, false);
        req.loose_scan_columns = Some(&columns);
        match self.estimator.estimate_access_path(ctx, &req) {
            Ok(path) if path.grouped_output => Ok(Some(path)),
            Ok(_) | Err(PlannerError::NoAccessPath { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Run the strategy pickers for the position being added and merge
    /// their verdicts
    fn advance_sj_state(&self, pos: &mut Position, idx: usize) -> PlannerResult<()> {
        let ctx = self.ctx;
        let prev = self.positions.last();
        if self.sjm_nest.is_some() || !ctx.has_semijoins() {
            pos.sj_strategy = SjStrategy::None;
            return Ok(());
        }

        let new_table = pos.table;
        let remaining = pos.remaining_tables;
        let nest_inner = ctx.nest_of(new_table)?.map(|n| n.inner_tables());

        let (mut pickers, mut handled_with_other, mut dups, prev_cur_sj_inner, mut sjm_lookup) = match prev {
            None => (PickerStates::empty(), TableMap::EMPTY, TableMap::EMPTY, TableMap::EMPTY, TableMap::EMPTY),
            Some(p) => (
                PickerStates::carried_from(&p.pickers),
                p.inner_tables_handled_with_other_sjs,
                p.dups_producing_tables,
                p.cur_sj_inner_tables,
                p.sjm_lookup_tables,
            ),
        };
        if let Some(inner) = nest_inner {
            dups |= inner;
        }

        let mut record_count = pos.prefix_record_count;
        let mut read_time = pos.prefix_cost;
        let mut strategy = SjStrategy::None;

        // Values before the first adoption, restored on a conflict
        let mut prev_dups = dups;
        let mut prev_sjm_lookup = sjm_lookup;
        let mut prev_record_count = record_count;
        let mut prev_read_time = read_time;
        let mut prev_kind: Option<PickerKind> = None;

        let mut i = 0;
        while i < PickerKind::ALL.len() {
            let kind = PickerKind::ALL[i];
            let view = PrefixView::new(&self.positions, pos);
            let pick = PickContext {
                sj: ctx,
                estimator: self.estimator,
                prefix: view,
                idx,
                new_table,
                remaining_tables: remaining,
                cur_sj_inner_tables: prev_cur_sj_inner,
                record_count,
                read_time,
            };
            let verdict = pickers.picker_mut(kind).evaluate(&pick)?;

            if let Some(verdict) = verdict {
                let removes_new_fanout = dups.overlaps(verdict.handled);
                let cheaper = verdict.read_time < read_time && !verdict.handled.overlaps(handled_with_other);
                if removes_new_fanout || cheaper {
                    if strategy == SjStrategy::None || verdict.handled == (prev_dups ^ dups) {
                        if strategy == SjStrategy::None {
                            prev_dups = dups;
                            prev_sjm_lookup = sjm_lookup;
                            prev_record_count = record_count;
                            prev_read_time = read_time;
                        }
                        prev_kind = Some(kind);
                        pickers.picker_mut(kind).mark_used();
                        strategy = verdict.strategy;
                        if verdict.strategy == SjStrategy::MaterializeLookup {
                            sjm_lookup |= verdict.handled;
                        } else {
                            sjm_lookup -= verdict.handled;
                        }
                        read_time = verdict.read_time;
                        record_count = verdict.record_count;
                        dups -= verdict.handled;
                        if is_multiple_semi_joins(ctx, &view, idx, verdict.handled)? {
                            handled_with_other |= verdict.handled;
                        }
                        debug!(
                            "position {} ({}): adopt {} for {:?}, cost {:.2}, rows {:.2}",
                            idx,
                            ctx.alias(new_table),
                            verdict.strategy,
                            verdict.handled,
                            read_time,
                            record_count
                        );
                    } else {
                        // Partial overlap with the adopted strategy: undo it
                        // and let the most general strategy decide
                        if let Some(adopted) = prev_kind.take() {
                            pickers.picker_mut(adopted).reset_for_new_prefix();
                        }
                        dups = prev_dups;
                        sjm_lookup = prev_sjm_lookup;
                        record_count = prev_record_count;
                        read_time = prev_read_time;
                        debug!(
                            "position {} ({}): {} conflicts with {}, falling back to weedout",
                            idx,
                            ctx.alias(new_table),
                            verdict.strategy,
                            strategy
                        );
                        strategy = SjStrategy::None;
                        i = PickerKind::WEEDOUT_INDEX;
                        continue;
                    }
                } else {
                    pickers.picker_mut(kind).reset_for_new_prefix();
                }
            }
            i += 1;
        }

        let mut cur_sj_inner = prev_cur_sj_inner;
        if let Some(inner) = nest_inner {
            cur_sj_inner |= inner;
            if !remaining.overlaps(inner) {
                cur_sj_inner -= inner;
            }
        }

        pos.prefix_cost = read_time;
        pos.prefix_record_count = record_count;
        pos.dups_producing_tables = dups;
        pos.inner_tables_handled_with_other_sjs = handled_with_other;
        pos.cur_sj_inner_tables = cur_sj_inner;
        pos.sjm_lookup_tables = sjm_lookup;
        pos.pickers = pickers;
        pos.sj_strategy = strategy;
        Ok(())
    }
}
