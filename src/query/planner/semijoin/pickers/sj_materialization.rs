// SJ-Materialization Strategy
//
// Materializes the nest's inner join into a temporary table with a unique
// key, then either probes it once per outer row (lookup) or scans it as the
// driving input of the outer tables that follow (scan).

use log::debug;

use crate::common::types::{TableMap, cost_add, cost_mult};
use crate::query::planner::cost_model::{AccessRequest, TIME_FOR_COMPARE};
use crate::query::planner::error::{PlannerError, PlannerResult};
use crate::query::planner::semijoin::context::NestState;
use crate::query::planner::semijoin::strategy::{PickContext, SjStrategy, StrategyPicker, StrategyVerdict};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SjMaterializationPicker {
    /// Tables that must be placed before an open scan range can close
    scan_need_tables: TableMap,
    /// Position of the last inner table of the scanned nest
    scan_last_inner: usize,
    is_used: bool,
}

impl SjMaterializationPicker {
    pub fn scan_last_inner(&self) -> usize {
        self.scan_last_inner
    }
}

/// The new table completes a nest whose inner tables occupy the trailing
/// positions. Returns the nest and whether it must be scanned rather than
/// probed, because tables the nest condition needs are still missing.
fn at_sjmat_pos<'a>(pick: &PickContext<'a>) -> PlannerResult<Option<(&'a NestState, bool)>> {
    let sj = pick.sj;
    let nest = match sj.nest_of(pick.new_table)? {
        Some(nest) if nest.mat_info.is_some() => nest,
        _ => return Ok(None),
    };
    if pick.remaining_tables.overlaps(nest.inner_tables()) {
        return Ok(None);
    }
    let n_tables = nest.inner_tables().len();
    for i in 1..n_tables {
        let preceding = match pick.idx.checked_sub(i) {
            Some(j) => pick.prefix.at(j).table,
            None => return Ok(None),
        };
        if sj.table(preceding)?.emb_sj_nest != Some(nest.id()) {
            return Ok(None);
        }
    }
    let scan = pick.remaining_tables.overlaps(nest.inner_tables() | nest.nest.depends_on);
    if scan && !nest.nest.scan_allowed {
        return Ok(None);
    }
    Ok(Some((nest, scan)))
}

impl StrategyPicker for SjMaterializationPicker {
    fn reset_for_new_prefix(&mut self) {
        self.scan_need_tables = TableMap::EMPTY;
        self.scan_last_inner = 0;
        self.is_used = false;
    }

    fn carry_state_forward(&mut self, prev: &Self) {
        if prev.is_used {
            self.reset_for_new_prefix();
        } else {
            self.scan_need_tables = prev.scan_need_tables;
            self.scan_last_inner = prev.scan_last_inner;
        }
        self.is_used = false;
    }

    fn evaluate(&mut self, pick: &PickContext<'_>) -> PlannerResult<Option<StrategyVerdict>> {
        let sj = pick.sj;
        if let Some((nest, scan)) = at_sjmat_pos(pick)? {
            let mat = nest.mat_info.as_ref().ok_or(PlannerError::UnknownNest(nest.id()))?;
            if scan {
                // The fan-out of the scan is removed once the outer tables
                // the nest needs are in the prefix
                self.scan_need_tables = nest.nest.required_tables();
                self.scan_last_inner = pick.idx;
            } else {
                let (prefix_cost, prefix_rows) = match pick.idx.checked_sub(mat.tables) {
                    Some(before) => {
                        let pos = pick.prefix.at(before);
                        (pos.prefix_cost, pos.prefix_record_count)
                    }
                    None => (0.0, 1.0),
                };
                let read_time = cost_add(
                    prefix_cost,
                    cost_add(mat.materialization_cost, cost_mult(prefix_rows, mat.lookup_cost)),
                );
                debug!("SJ-Materialization lookup for nest #{} costs {:.2}", nest.id(), read_time);
                return Ok(Some(StrategyVerdict {
                    read_time,
                    record_count: prefix_rows,
                    handled: nest.inner_tables(),
                    strategy: SjStrategy::MaterializeLookup,
                }));
            }
        }

        if self.scan_need_tables.is_empty() || self.scan_need_tables.overlaps(pick.remaining_tables) {
            return Ok(None);
        }

        let last_inner_table = pick.prefix.at(self.scan_last_inner).table;
        let nest = sj
            .nest_of(last_inner_table)?
            .ok_or_else(|| PlannerError::InvalidInput(format!("materialization scan ends at non-nest table #{}", last_inner_table)))?;
        let mat = nest.mat_info.as_ref().ok_or(PlannerError::UnknownNest(nest.id()))?;
        let first_tab = (self.scan_last_inner + 1)
            .checked_sub(mat.tables)
            .ok_or(PlannerError::UnknownNest(nest.id()))?;

        let (mut cost, mut rows) = match first_tab.checked_sub(1) {
            Some(before) => {
                let pos = pick.prefix.at(before);
                (pos.prefix_cost, pos.prefix_record_count)
            }
            None => (0.0, 1.0),
        };
        cost = cost_add(cost, cost_add(mat.materialization_cost, cost_mult(rows, mat.scan_cost)));
        rows = cost_mult(rows, mat.rows);

        // Row counts changed for everything after the scan, recost it
        let mut bound = pick.prefix.tables_before(first_tab + mat.tables);
        for i in (first_tab + mat.tables)..=pick.idx {
            let table = pick.prefix.at(i).table;
            let req = AccessRequest::new(table, bound, rows, sj.config.join_buffering_enabled());
            let path = pick.estimator.estimate_access_path(sj, &req)?;
            rows = cost_mult(rows, path.records_read);
            cost = cost_add(cost, cost_add(path.read_cost, rows / TIME_FOR_COMPARE));
            bound.insert(table);
        }
        if mat.rows > 0.0 {
            rows /= mat.rows;
        }

        debug!("SJ-Materialization scan for nest #{} costs {:.2}", nest.id(), cost);
        Ok(Some(StrategyVerdict {
            read_time: cost,
            record_count: rows,
            handled: nest.inner_tables(),
            strategy: SjStrategy::MaterializeScan,
        }))
    }

    fn mark_used(&mut self) {
        self.is_used = true;
    }

    fn is_used(&self) -> bool {
        self.is_used
    }
}
