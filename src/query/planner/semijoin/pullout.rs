// Semi-Join Table Pull-Out
//
// This module moves tables out of a semi-join nest when they are
// functionally dependent on tables outside it: a unique index of the table
// has every key part bound by an equality whose other side only uses outer
// tables. Such a table yields at most one row per outer row combination, so
// joining it directly cannot produce duplicates.

use log::{debug, info};
use serde_json::json;

use crate::common::types::{TableId, TableMap};
use crate::query::planner::error::PlannerResult;
use crate::query::planner::trace::OptimizerTrace;
use super::context::SemiJoinContext;

/// Whether some unique index of `table` has all its key parts bound by
/// equalities that do not reference `sj_inner_tables`
pub fn find_eq_ref_candidate(ctx: &SemiJoinContext, table: TableId, sj_inner_tables: TableMap) -> PlannerResult<bool> {
    let info = ctx.table(table)?;
    for index in info.indexes.iter().filter(|i| i.unique) {
        let all_bound = index.columns.iter().all(|column| {
            ctx.key_uses_for(table)
                .any(|k| &k.column == column && !k.value_tables.overlaps(sj_inner_tables))
        });
        if all_bound && !index.columns.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Pull functionally dependent tables out of every nest of the block. A
/// nest whose tables are all pulled out is removed.
pub fn pull_out_semijoin_tables(ctx: &mut SemiJoinContext, trace: &mut OptimizerTrace) -> PlannerResult<()> {
    for n in 0..ctx.nests.len() {
        let (nest_id, inner) = {
            let state = &ctx.nests[n];
            if state.removed || state.has_nested_joins {
                continue;
            }
            (state.id(), state.inner_tables())
        };

        // Tables other inner tables must follow stay in the nest
        let mut dep_tables = TableMap::EMPTY;
        for t in inner {
            dep_tables |= ctx.table(t)?.dependencies;
        }

        let mut pulled = TableMap::EMPTY;
        loop {
            let mut pulled_a_table = false;
            for t in inner - pulled {
                if dep_tables.contains(t) || ctx.table(t)?.dependencies.overlaps(inner) {
                    continue;
                }
                if find_eq_ref_candidate(ctx, t, inner - pulled)? {
                    debug!("Pulling {} out of semi-join nest #{}", ctx.alias(t), nest_id);
                    pulled.insert(t);
                    pulled_a_table = true;
                }
            }
            if !pulled_a_table {
                break;
            }
        }

        if pulled.is_empty() {
            continue;
        }
        for t in pulled {
            ctx.table_mut(t)?.emb_sj_nest = None;
        }
        let state = &mut ctx.nests[n];
        state.nest.inner_tables -= pulled;
        state.nest.corr_tables |= pulled;
        state.nest.depends_on |= pulled;
        state.pulled_out |= pulled;
        state.removed = state.nest.inner_tables.is_empty();
        info!(
            "Pulled {:?} out of semi-join nest #{}{}",
            pulled,
            nest_id,
            if state.removed { ", nest removed" } else { "" }
        );
        trace.add(
            "pull_out",
            json!({
                "nest": nest_id,
                "pulled_out": pulled.iter().collect::<Vec<_>>(),
                "remaining": state.nest.inner_tables.iter().collect::<Vec<_>>(),
                "removed": state.removed,
            }),
        );
    }
    Ok(())
}
