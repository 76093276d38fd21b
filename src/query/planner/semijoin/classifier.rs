// Subquery Predicate Classifier
//
// This module decides, for each subquery predicate of a block, where it sits
// in its parent and which conversions it is eligible for: merging into the
// parent join as a semi-join nest, materialization as a derived table, a
// degenerate constant rewrite, or the per-row existence check fallback.

use crate::catalog::Catalog;
use crate::common::types::{SubqueryId, MAX_TABLES};
use crate::query::ast::{Expression, JoinNode, QueryBlock};
use crate::query::planner::config::OptimizerConfig;
use crate::query::planner::error::{PlannerError, PlannerResult};
use crate::query::statement::{PredicateKind, Statement};

/// Where a subquery predicate sits in its parent block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateLocation {
    /// Top-level AND-conjunct of the WHERE clause
    Where,
    /// Top-level AND-conjunct of an ON clause. `path` holds the child
    /// indexes leading to the join-list element carrying the ON clause.
    On { path: Vec<usize>, under_outer_join: bool },
    /// Below an OR, a NOT, or in the select list, HAVING or ORDER BY
    Nested,
}

/// Classification of one subquery predicate
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub subquery: SubqueryId,
    pub location: PredicateLocation,
    pub correlated: bool,
    /// Number of distinct outer tables the subquery refers to
    pub outer_ref_count: usize,
    /// Conversion explicitly disabled by a hint
    pub blocked: bool,
    /// Can be merged into the parent join
    pub mergeable: bool,
    /// Can be materialized as a derived table of the parent join
    pub jtbm_allowed: bool,
    /// Replaceable by a constant condition: `Some(true)` when the subquery
    /// can never return a row
    pub degenerate: Option<bool>,
    /// Tables the merge adds to the parent block
    pub table_count: usize,
}

impl Candidate {
    /// Merge order within a block: blocked predicates first, then
    /// correlated ones, then by the number of outer tables referenced. Higher
    /// values are handled first.
    pub fn priority(&self) -> u64 {
        let max = (MAX_TABLES + 1) as u64;
        (self.blocked as u64) * 2 * max + (self.correlated as u64) * max + self.outer_ref_count as u64
    }
}

/// Locate the predicate of a subquery in its parent block
pub fn locate_predicate(block: &QueryBlock, id: SubqueryId) -> Option<PredicateLocation> {
    if let Some(top_level) = block.where_clause.as_ref().and_then(|w| w.subquery_position(id)) {
        return Some(if top_level { PredicateLocation::Where } else { PredicateLocation::Nested });
    }
    let mut path = Vec::new();
    if let Some(location) = locate_in_join_list(&block.join_list, id, false, &mut path) {
        return Some(location);
    }
    let elsewhere = block
        .select_list
        .iter()
        .chain(block.group_by.iter())
        .chain(block.having.iter())
        .chain(block.order_by.iter())
        .any(|e| e.contains_subquery(id));
    if elsewhere {
        Some(PredicateLocation::Nested)
    } else {
        None
    }
}

fn locate_in_join_list(list: &[JoinNode], id: SubqueryId, outer: bool, path: &mut Vec<usize>) -> Option<PredicateLocation> {
    for (i, node) in list.iter().enumerate() {
        path.push(i);
        let under_outer_join = outer || node.is_outer_join();
        if let Some(top_level) = node.on().and_then(|on| on.subquery_position(id)) {
            return Some(if top_level {
                PredicateLocation::On { path: path.clone(), under_outer_join }
            } else {
                PredicateLocation::Nested
            });
        }
        if let JoinNode::Nested(n) = node {
            if let Some(location) = locate_in_join_list(&n.children, id, under_outer_join, path) {
                return Some(location);
            }
        }
        path.pop();
    }
    None
}

/// Left operand of an IN predicate, searched in every expression of the block
pub fn find_left_operand(block: &QueryBlock, id: SubqueryId) -> Option<Expression> {
    block
        .expressions()
        .into_iter()
        .find_map(|e| e.find_in_left_operand(id))
        .cloned()
}

/// Classify the predicate of a subquery
pub fn classify(stmt: &Statement, catalog: &Catalog, config: &OptimizerConfig, id: SubqueryId) -> PlannerResult<Candidate> {
    let sub = stmt.subquery(id)?;
    let parent = stmt.block(sub.parent)?;
    let block = &sub.block;
    let location = locate_predicate(parent, id).ok_or_else(|| {
        PlannerError::InvalidInput(format!("predicate of subquery #{} not found in its parent block", id))
    })?;

    let outer_refs = stmt.outer_references(id)?;
    let left = find_left_operand(parent, id);
    let left_has_subquery = left.as_ref().map_or(false, |l| !l.subqueries().is_empty());

    let plain_select = !block.is_union
        && block.group_by.is_empty()
        && !block.has_aggregates
        && block.having.is_none()
        && block.limit.is_none()
        && !block.recursive_reference;

    let degenerate = if plain_select && !left_has_subquery {
        let where_false = block.where_clause.as_ref().map_or(false, Expression::is_const_false);
        if where_false {
            Some(true)
        } else if block.join_list.is_empty() {
            Some(false)
        } else {
            None
        }
    } else {
        None
    };

    let top_level = match &location {
        PredicateLocation::Where => true,
        PredicateLocation::On { under_outer_join, .. } => !under_outer_join,
        PredicateLocation::Nested => false,
    };

    let mergeable = config.semijoin
        && sub.kind == PredicateKind::In
        && top_level
        && plain_select
        && !block.no_semijoin
        && !parent.straight_join
        && !left_has_subquery
        && !block.join_list.is_empty();

    let jtbm_allowed = config.materialization
        && sub.kind == PredicateKind::In
        && location == PredicateLocation::Where
        && outer_refs.is_empty()
        && !block.is_union
        && !block.recursive_reference
        && !left_has_subquery
        && !block.join_list.is_empty()
        && keyable_pairs(stmt, catalog, left.as_ref(), &block.select_list)?;

    Ok(Candidate {
        subquery: id,
        location,
        correlated: !outer_refs.is_empty(),
        outer_ref_count: outer_refs.len(),
        blocked: block.no_semijoin,
        mergeable,
        jtbm_allowed,
        degenerate,
        table_count: block.leaf_tables().len(),
    })
}

/// Every compared pair can be stored in a temporary-table key
fn keyable_pairs(stmt: &Statement, catalog: &Catalog, left: Option<&Expression>, select_list: &[Expression]) -> PlannerResult<bool> {
    let left = match left {
        Some(left) => left,
        None => return Ok(false),
    };
    let outer = left.row_items();
    if outer.len() != select_list.len() {
        return Ok(false);
    }
    for (o, i) in outer.into_iter().zip(select_list) {
        let keyable = match (stmt.expression_type(catalog, o)?, stmt.expression_type(catalog, i)?) {
            (Some(l), Some(r)) => crate::catalog::check_materialization_key(&l, &r),
            _ => false,
        };
        if !keyable {
            return Ok(false);
        }
    }
    Ok(true)
}
