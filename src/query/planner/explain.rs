// Plan Explain Output
//
// This module renders optimized plans as text, one line per table in join
// order, and as JSON.

use std::fmt;

use serde_json::{json, Value};

use crate::query::planner::cost_model::AccessMethod;
use crate::query::planner::optimizer::{BlockPlan, OptimizedQuery};
use crate::query::planner::semijoin::finalize::{JumpTarget, PlanEntry};
use crate::query::planner::semijoin::strategy::SjStrategy;
use crate::query::statement::BlockOwner;

fn access_text(method: &AccessMethod) -> String {
    match method {
        AccessMethod::Scan => "scan".to_string(),
        AccessMethod::IndexScan { index } => format!("index_scan({})", index),
        AccessMethod::Ref { index, key_parts, .. } => format!("ref({}, {} parts)", index, key_parts),
        AccessMethod::EqRef { index, .. } => format!("eq_ref({})", index),
    }
}

fn entry_extras(entry: &PlanEntry) -> String {
    let mut extras = Vec::new();
    if entry.strategy != SjStrategy::None {
        extras.push(format!("Start {} ({} tables)", entry.strategy, entry.n_sj_tables));
    }
    if entry.access.use_join_buffer {
        extras.push("join buffer".to_string());
    }
    if let Some(nest) = entry.materialization {
        extras.push(format!("nest #{}", nest));
    }
    match entry.first_match_jump {
        Some(JumpTarget::BeforePlan) => extras.push("FirstMatch".to_string()),
        Some(JumpTarget::Position(pos)) => extras.push(format!("FirstMatch(#{})", pos)),
        None => {}
    }
    if let Some(pos) = entry.loose_scan_match {
        extras.push(format!("LooseScan match at #{}", pos));
    }
    if let Some(weedout) = &entry.weedout {
        extras.push(format!(
            "Weedout from #{}, {} rowid bytes",
            weedout.start, weedout.rowid_length
        ));
    }
    if extras.is_empty() {
        String::new()
    } else {
        format!("; {}", extras.join("; "))
    }
}

fn owner_text(owner: BlockOwner) -> String {
    match owner {
        BlockOwner::Root => "root".to_string(),
        BlockOwner::Subquery(id) => format!("subquery #{}", id),
    }
}

impl fmt::Display for BlockPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block {}: cost={:.2} rows={:.2}",
            owner_text(self.owner),
            self.plan.cost,
            self.plan.record_count
        )?;
        for (pos, entry) in self.plan.entries.iter().enumerate() {
            write!(
                f,
                "\n  #{} {}: {} rows={:.2} cost={:.2}{}",
                pos,
                entry.alias,
                access_text(&entry.access.method),
                entry.prefix_record_count,
                entry.prefix_cost,
                entry_extras(entry)
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for OptimizedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for sub in &self.subqueries {
            write!(f, "\n{} ({})\n{}", owner_text(sub.block.owner), sub.outcome.name(), sub.block)?;
        }
        Ok(())
    }
}

impl BlockPlan {
    pub fn to_json(&self) -> Value {
        json!({
            "block": owner_text(self.owner),
            "cost": self.plan.cost,
            "rows": self.plan.record_count,
            "join_order": self.plan.entries.iter().map(|e| e.alias.clone()).collect::<Vec<_>>(),
            "entries": self.plan.entries,
            "spans": self.plan.spans(),
            "materialized_nests": self.plan.materialized_nests,
        })
    }
}

impl OptimizedQuery {
    /// Plan tree as JSON, with the trace when tracing was enabled
    pub fn to_json(&self) -> Value {
        let mut out = json!({
            "root": self.root.to_json(),
            "subqueries": self.subqueries.iter().map(|s| json!({
                "subquery": s.subquery,
                "outcome": s.outcome,
                "plan": s.block.to_json(),
            })).collect::<Vec<_>>(),
        });
        if self.trace.is_enabled() {
            out["trace"] = self.trace.to_json();
        }
        out
    }
}
