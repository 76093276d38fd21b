// Semi-Join Strategy Pickers
//
// This module defines the contract shared by the duplicate-elimination
// strategy pickers and the helpers they use to recost a span of the join
// prefix. Each picker keeps a small scratch record per prefix position; the
// join-prefix tracker merges their verdicts.

use std::fmt;

use serde::{Serialize, Deserialize};

use crate::common::types::{TableId, TableMap, cost_add, cost_mult};
use crate::query::planner::cost_model::{AccessPath, AccessPathEstimator, AccessRequest, TIME_FOR_COMPARE};
use crate::query::planner::error::PlannerResult;
use super::context::SemiJoinContext;
use super::pickers::{DuplicateWeedoutPicker, FirstMatchPicker, LooseScanPicker, SjMaterializationPicker};
use super::prefix::PrefixView;

/// Strategy tag of a join-prefix position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SjStrategy {
    #[default]
    None,
    FirstMatch,
    LooseScan,
    MaterializeLookup,
    MaterializeScan,
    DuplicateWeedout,
}

impl SjStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SjStrategy::None => "none",
            SjStrategy::FirstMatch => "FirstMatch",
            SjStrategy::LooseScan => "LooseScan",
            SjStrategy::MaterializeLookup => "SJ-Materialization",
            SjStrategy::MaterializeScan => "SJ-Materialization-Scan",
            SjStrategy::DuplicateWeedout => "DuplicateWeedout",
        }
    }

    pub fn is_materialization(&self) -> bool {
        matches!(self, SjStrategy::MaterializeLookup | SjStrategy::MaterializeScan)
    }
}

impl fmt::Display for SjStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A closed span reported by a picker
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyVerdict {
    /// Prefix cost with the span recosted for the strategy
    pub read_time: f64,
    /// Prefix row count with the handled fan-out removed
    pub record_count: f64,
    /// Inner tables whose fan-out the span removes
    pub handled: TableMap,
    pub strategy: SjStrategy,
}

/// Everything a picker sees when a table is added to the prefix
pub struct PickContext<'a> {
    pub sj: &'a SemiJoinContext,
    pub estimator: &'a dyn AccessPathEstimator,
    pub prefix: PrefixView<'a>,
    /// Position of the new table
    pub idx: usize,
    pub new_table: TableId,
    /// Tables not yet in the prefix, the new table excluded
    pub remaining_tables: TableMap,
    /// Inner tables of nests with an open interleaving range before the new
    /// table was added
    pub cur_sj_inner_tables: TableMap,
    /// Prefix row count, as adjusted by strategies adopted so far at this
    /// position
    pub record_count: f64,
    /// Prefix cost, as adjusted by strategies adopted so far at this position
    pub read_time: f64,
}

/// Incremental evaluator of one duplicate-elimination strategy
pub trait StrategyPicker {
    /// Clear the scratch state, used at the first position and after a
    /// conflict
    fn reset_for_new_prefix(&mut self);

    /// Initialize from the previous position's scratch state
    fn carry_state_forward(&mut self, prev: &Self)
    where
        Self: Sized;

    /// React to the new table. Returns a verdict when a span closes here.
    fn evaluate(&mut self, pick: &PickContext<'_>) -> PlannerResult<Option<StrategyVerdict>>;

    fn mark_used(&mut self);

    fn is_used(&self) -> bool;
}

/// Pickers in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerKind {
    FirstMatch,
    LooseScan,
    SjMaterialization,
    DuplicateWeedout,
}

impl PickerKind {
    pub const ALL: [PickerKind; 4] = [
        PickerKind::FirstMatch,
        PickerKind::LooseScan,
        PickerKind::SjMaterialization,
        PickerKind::DuplicateWeedout,
    ];

    /// Index of the fallback picker in `ALL`
    pub const WEEDOUT_INDEX: usize = 3;
}

/// Scratch state of every picker at one position
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PickerStates {
    pub first_match: FirstMatchPicker,
    pub loose_scan: LooseScanPicker,
    pub sj_mat: SjMaterializationPicker,
    pub dups_weedout: DuplicateWeedoutPicker,
}

impl PickerStates {
    pub fn empty() -> Self {
        let mut states = PickerStates::default();
        for kind in PickerKind::ALL {
            states.picker_mut(kind).reset_for_new_prefix();
        }
        states
    }

    pub fn carried_from(prev: &PickerStates) -> Self {
        let mut states = PickerStates::default();
        states.first_match.carry_state_forward(&prev.first_match);
        states.loose_scan.carry_state_forward(&prev.loose_scan);
        states.sj_mat.carry_state_forward(&prev.sj_mat);
        states.dups_weedout.carry_state_forward(&prev.dups_weedout);
        states
    }

    pub fn picker_mut(&mut self, kind: PickerKind) -> &mut dyn StrategyPicker {
        match kind {
            PickerKind::FirstMatch => &mut self.first_match,
            PickerKind::LooseScan => &mut self.loose_scan,
            PickerKind::SjMaterialization => &mut self.sj_mat,
            PickerKind::DuplicateWeedout => &mut self.dups_weedout,
        }
    }
}

/// Rows and cost of a recosted span
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanCost {
    /// Prefix rows times the fan-out of the span's non-nest tables
    pub outer_rows: f64,
    pub cost: f64,
}

/// Recost positions `first..=last` as they run when duplicates are removed
/// by stopping at the first match: join buffering is disabled for every
/// position before `no_jbuf_before`, and with `first_alt` the first position
/// is read with its loose-scan path.
pub fn optimize_wo_join_buffering(
    pick: &PickContext<'_>,
    first: usize,
    last: usize,
    first_alt: bool,
    no_jbuf_before: usize,
) -> PlannerResult<SpanCost> {
    let (mut rows, mut cost) = match first.checked_sub(1) {
        Some(before) => {
            let pos = pick.prefix.at(before);
            (pos.prefix_record_count, pos.prefix_cost)
        }
        None => (1.0, 0.0),
    };
    let mut outer_rows = rows;
    let mut bound = pick.prefix.tables_before(first);

    for i in first..=last {
        let pos = pick.prefix.at(i);
        let path: AccessPath = if i == first && first_alt {
            match &pos.loose_scan {
                Some(path) => path.clone(),
                None => pos.access.clone(),
            }
        } else if pos.access.use_join_buffer && i < no_jbuf_before {
            let req = AccessRequest::new(pos.table, bound, rows, false);
            pick.estimator.estimate_access_path(pick.sj, &req)?
        } else {
            pos.access.clone()
        };

        rows = cost_mult(rows, path.records_read);
        cost = cost_add(cost, cost_add(path.read_cost, rows / TIME_FOR_COMPARE));
        if pick.sj.table(pos.table)?.emb_sj_nest.is_none() {
            outer_rows = cost_mult(outer_rows, path.records_read);
        }
        bound.insert(pos.table);
    }
    Ok(SpanCost { outer_rows, cost })
}

/// Whether the fan-out in `handled` was removed together with another
/// nest's fan-out, looking at the nearest nest table of the prefix that
/// overlaps it
pub fn is_multiple_semi_joins(sj: &SemiJoinContext, prefix: &PrefixView<'_>, idx: usize, handled: TableMap) -> PlannerResult<bool> {
    for i in (0..=idx).rev() {
        if let Some(nest) = sj.nest_of(prefix.at(i).table)? {
            if handled.overlaps(nest.inner_tables()) {
                return Ok(handled != nest.inner_tables());
            }
        }
    }
    Ok(false)
}
