// FirstMatch Strategy
//
// Removes a nest's duplicates by stopping at the first matching row
// combination of its inner tables and jumping back to the last outer table.

use log::debug;

use crate::common::types::TableMap;
use crate::query::planner::error::PlannerResult;
use crate::query::planner::semijoin::strategy::{
    optimize_wo_join_buffering, PickContext, SjStrategy, StrategyPicker, StrategyVerdict,
};

/// Scratch state of an open FirstMatch range
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FirstMatchPicker {
    /// Position where the range starts
    first_table: Option<usize>,
    /// Tables remaining when the range was opened
    first_rtbl: TableMap,
    /// Inner tables that must be placed before the range can close
    need_tables: TableMap,
    is_used: bool,
}

impl FirstMatchPicker {
    pub fn first_table(&self) -> Option<usize> {
        self.first_table
    }

    pub fn is_open(&self) -> bool {
        self.first_table.is_some()
    }

    fn invalidate(&mut self) {
        self.first_table = None;
        self.first_rtbl = TableMap::EMPTY;
        self.need_tables = TableMap::EMPTY;
    }
}

impl StrategyPicker for FirstMatchPicker {
    fn reset_for_new_prefix(&mut self) {
        self.invalidate();
        self.is_used = false;
    }

    fn carry_state_forward(&mut self, prev: &Self) {
        if prev.is_used {
            self.invalidate();
        } else {
            self.first_table = prev.first_table;
            self.first_rtbl = prev.first_rtbl;
            self.need_tables = prev.need_tables;
        }
        self.is_used = false;
    }

    fn evaluate(&mut self, pick: &PickContext<'_>) -> PlannerResult<Option<StrategyVerdict>> {
        let sj = pick.sj;
        if !sj.config.firstmatch || sj.has_outer_join {
            self.invalidate();
            return Ok(None);
        }
        // An outer table inside an open range makes it a complex range, the
        // jump-back targets are worked out when the plan is finalized
        let nest = match sj.nest_of(pick.new_table)? {
            Some(nest) => nest,
            None => return Ok(None),
        };

        let outer_corr_tables = nest.nest.corr_tables | nest.nest.depends_on;
        let inner_tables = nest.inner_tables();
        let placeable = pick.remaining_tables | TableMap::single(pick.new_table);

        if pick.cur_sj_inner_tables.is_empty()
            && !pick.remaining_tables.overlaps(outer_corr_tables)
            && inner_tables.is_subset_of(placeable)
        {
            self.first_table = Some(pick.idx);
            self.need_tables = inner_tables;
            self.first_rtbl = pick.remaining_tables;
        }

        let first = match self.first_table {
            Some(first) => first,
            None => return Ok(None),
        };

        // A span closed by another strategy inside the range would be
        // swallowed by it
        if (first..pick.idx).any(|j| pick.prefix.at(j).sj_strategy != SjStrategy::None) {
            self.invalidate();
            return Ok(None);
        }

        if outer_corr_tables.overlaps(self.first_rtbl) {
            // The nest needs an outer table that was placed after the range
            // started
            self.invalidate();
            return Ok(None);
        }
        self.need_tables |= inner_tables;

        if self.need_tables.overlaps(pick.remaining_tables) {
            return Ok(None);
        }

        let (record_count, read_time) = if pick.idx == first && sj.config.semijoin_with_cache {
            // Single inner table: join buffering is allowed and the cost is
            // unchanged, only its fan-out goes away
            let records_read = pick.prefix.at(pick.idx).access.records_read;
            let rows = if pick.record_count != 0.0 && records_read > 0.0 {
                pick.record_count / records_read
            } else {
                pick.record_count
            };
            (rows, pick.read_time)
        } else {
            let span = optimize_wo_join_buffering(pick, first, pick.idx, false, pick.idx)?;
            (span.outer_rows, span.cost)
        };

        debug!(
            "FirstMatch range {}..={} closes with cost {:.2}, rows {:.2}",
            first, pick.idx, read_time, record_count
        );
        Ok(Some(StrategyVerdict {
            read_time,
            record_count,
            handled: self.need_tables,
            strategy: SjStrategy::FirstMatch,
        }))
    }

    fn mark_used(&mut self) {
        self.is_used = true;
    }

    fn is_used(&self) -> bool {
        self.is_used
    }
}
