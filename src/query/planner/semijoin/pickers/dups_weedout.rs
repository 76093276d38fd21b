// DuplicateWeedout Strategy
//
// Removes duplicates by recording the row ids of the outer tables in the
// span in a temporary table and dropping combinations already seen. Always
// applicable, it also covers interleaved nests and outer-join operands.

use log::debug;

use crate::common::types::{TableMap, cost_add, cost_mult};
use crate::query::planner::cost_model::{tmp_table_lookup_cost, tmp_table_write_cost, TIME_FOR_COMPARE};
use crate::query::planner::error::PlannerResult;
use crate::query::planner::semijoin::strategy::{PickContext, SjStrategy, StrategyPicker, StrategyVerdict};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DuplicateWeedoutPicker {
    first_table: usize,
    /// Tables the open range must cover before it can close
    tables: TableMap,
    is_used: bool,
}

impl DuplicateWeedoutPicker {
    pub fn first_table(&self) -> usize {
        self.first_table
    }
}

impl StrategyPicker for DuplicateWeedoutPicker {
    fn reset_for_new_prefix(&mut self) {
        self.first_table = 0;
        self.tables = TableMap::EMPTY;
        self.is_used = false;
    }

    fn carry_state_forward(&mut self, prev: &Self) {
        if prev.is_used {
            self.reset_for_new_prefix();
        } else {
            self.first_table = prev.first_table;
            self.tables = prev.tables;
        }
        self.is_used = false;
    }

    fn evaluate(&mut self, pick: &PickContext<'_>) -> PlannerResult<Option<StrategyVerdict>> {
        let sj = pick.sj;
        if let Some(nest) = sj.nest_of(pick.new_table)? {
            if self.tables.is_empty() {
                self.first_table = pick.idx;
            }
            self.tables |= nest.nest.required_tables();
        }
        if self.tables.is_empty() {
            return Ok(None);
        }
        // Entering the inner side of an outer join pulls in the whole operand
        if let Some(operand) = sj.table(pick.new_table)?.outer_join_tables {
            self.tables |= operand;
        }
        if self.tables.overlaps(pick.remaining_tables) {
            return Ok(None);
        }

        let first = self.first_table;
        let (mut dups_cost, prefix_rec_count, mut rec_size) = match first.checked_sub(1) {
            Some(before) => {
                let pos = pick.prefix.at(before);
                (pos.prefix_cost, pos.prefix_record_count, 8)
            }
            None => (0.0, 1.0, 0),
        };

        let mut handled = TableMap::EMPTY;
        let mut current_fanout = prefix_rec_count;
        let mut inner_fanout = 1.0;
        let mut outer_fanout = 1.0;
        for j in first..=pick.idx {
            let pos = pick.prefix.at(j);
            current_fanout = cost_mult(current_fanout, pos.access.records_read);
            dups_cost = cost_add(dups_cost, cost_add(pos.access.read_cost, current_fanout / TIME_FOR_COMPARE));
            let info = sj.table(pos.table)?;
            if info.emb_sj_nest.is_some() {
                inner_fanout = cost_mult(inner_fanout, pos.access.records_read);
                handled.insert(pos.table);
            } else {
                outer_fanout = cost_mult(outer_fanout, pos.access.records_read);
                rec_size += info.stats.rowid_length;
            }
        }

        // outer_fanout rows are written, each probed inner_fanout times
        let one_lookup_cost = tmp_table_lookup_cost(&sj.config, outer_fanout, rec_size);
        let one_write_cost = tmp_table_write_cost(&sj.config, outer_fanout, rec_size);
        let first_rows = pick.prefix.at(first).prefix_record_count;
        let write_cost = cost_mult(first_rows, outer_fanout * one_write_cost);
        let full_lookup_cost = cost_mult(first_rows, cost_mult(outer_fanout, inner_fanout * one_lookup_cost));
        dups_cost = cost_add(dups_cost, cost_add(write_cost, full_lookup_cost));

        debug!(
            "DuplicateWeedout range {}..={} over {:?} costs {:.2}",
            first, pick.idx, handled, dups_cost
        );
        Ok(Some(StrategyVerdict {
            read_time: dups_cost,
            record_count: cost_mult(prefix_rec_count, outer_fanout),
            handled,
            strategy: SjStrategy::DuplicateWeedout,
        }))
    }

    fn mark_used(&mut self) {
        self.is_used = true;
    }

    fn is_used(&self) -> bool {
        self.is_used
    }
}
