// Subquery To Semi-Join Conversion
//
// This module rewrites the subquery predicates of a statement, innermost
// blocks first. Within a block, predicates are handled in priority order
// while the block's table budget lasts. Each predicate receives exactly one
// outcome: a semi-join nest merged into the parent join, a materialized
// derived table, a constant rewrite, or the per-row existence check.

use log::{debug, info};
use serde_json::json;

use crate::catalog::{check_equality_compatibility, check_materialization_key, Catalog};
use crate::common::types::{NestId, SubqueryId, TableId, TableMap, MAX_TABLES};
use crate::query::ast::{Expression, JoinNode, JoinType, NestedJoin, QueryBlock, TableRef};
use crate::query::planner::config::OptimizerConfig;
use crate::query::planner::error::{PlannerError, PlannerResult};
use crate::query::planner::materialization::{SubqueryPlan, SubqueryPlanChoice};
use crate::query::planner::trace::OptimizerTrace;
use crate::query::statement::{
    BlockOwner, ConversionOutcome, PredicateKind, Statement, TableEntry, TableSource, materialized_column_name,
};
use super::classifier::{classify, find_left_operand, locate_predicate, Candidate, PredicateLocation};
use super::nest::SemiJoinNest;

/// Estimates materialization against re-execution for a subquery that is
/// not merged
pub type SubqueryEstimator<'a> = dyn Fn(&Statement, SubqueryId, &mut OptimizerTrace) -> PlannerResult<SubqueryPlanChoice> + 'a;

/// Convert every subquery predicate of the statement. Running it again on a
/// converted statement changes nothing.
pub fn convert_subqueries_to_semijoins(
    stmt: &mut Statement,
    catalog: &Catalog,
    config: &OptimizerConfig,
    estimate: &SubqueryEstimator<'_>,
    trace: &mut OptimizerTrace,
) -> PlannerResult<()> {
    if stmt.converted {
        debug!("Statement already converted, skipping");
        return Ok(());
    }

    for owner in stmt.blocks_bottom_up() {
        let mut candidates: Vec<Candidate> = Vec::new();
        for id in stmt.child_subqueries(owner) {
            if stmt.subquery(id)?.outcome.is_none() {
                candidates.push(classify(stmt, catalog, config, id)?);
            }
        }
        candidates.sort_by(|a, b| b.priority().cmp(&a.priority()).then(a.subquery.cmp(&b.subquery)));

        for candidate in candidates {
            let id = candidate.subquery;
            let pairs = compared_pairs(stmt, catalog, id)?;
            let block_tables = stmt.block(owner)?.leaf_tables().len();

            let outcome = if let Some(always_false) = candidate.degenerate {
                apply_degenerate(stmt, id, always_false)?
            } else if candidate.mergeable && block_tables + candidate.table_count <= config.max_tables {
                let nest = merge_into_parent(stmt, id, &pairs)?;
                ConversionOutcome::SemiJoin { nest }
            } else if candidate.jtbm_allowed
                && stmt.tables.len() < MAX_TABLES
                && block_tables < config.max_tables
                && estimate(&*stmt, id, &mut *trace)?.plan == SubqueryPlan::Materialize
            {
                let table = materialize_as_table(stmt, id, &pairs)?;
                ConversionOutcome::Materialized { table }
            } else {
                rewrite_in_to_exists(stmt, id, &pairs)?;
                ConversionOutcome::InToExists
            };

            info!("Subquery #{} converted to {}", id, outcome.name());
            trace.add(
                "subquery_conversion",
                json!({
                    "subquery": id,
                    "priority": candidate.priority(),
                    "correlated": candidate.correlated,
                    "outcome": outcome.name(),
                }),
            );
            stmt.subquery_mut(id)?.outcome = Some(outcome);
        }
    }

    stmt.converted = true;
    Ok(())
}

/// Compared (outer, inner) expression pairs of an IN predicate, with their
/// equality checked. Empty for EXISTS.
struct ComparedPairs {
    left: Option<Expression>,
    outer: Vec<Expression>,
    inner: Vec<Expression>,
    keyable: bool,
}

fn compared_pairs(stmt: &Statement, catalog: &Catalog, id: SubqueryId) -> PlannerResult<ComparedPairs> {
    let sub = stmt.subquery(id)?;
    if sub.kind == PredicateKind::Exists {
        return Ok(ComparedPairs { left: None, outer: Vec::new(), inner: Vec::new(), keyable: false });
    }
    let left = find_left_operand(stmt.block(sub.parent)?, id).ok_or_else(|| {
        PlannerError::InvalidInput(format!("IN predicate of subquery #{} has no left operand", id))
    })?;
    let outer: Vec<Expression> = left.row_items().into_iter().cloned().collect();
    let inner = sub.block.select_list.clone();
    if outer.len() != inner.len() {
        return Err(PlannerError::OperandColumns { expected: outer.len(), actual: inner.len() });
    }

    let mut keyable = true;
    for (o, i) in outer.iter().zip(&inner) {
        match (stmt.expression_type(catalog, o)?, stmt.expression_type(catalog, i)?) {
            (Some(l), Some(r)) => {
                check_equality_compatibility(&l, &r).map_err(|cause| PlannerError::SemiJoinEquality {
                    left: o.to_string(),
                    right: i.to_string(),
                    cause,
                })?;
                keyable &= check_materialization_key(&l, &r);
            }
            _ => keyable = false,
        }
    }
    Ok(ComparedPairs { left: Some(left), outer, inner, keyable })
}

/// Replace the predicate of a subquery in every expression of a block
fn replace_predicate(block: &mut QueryBlock, id: SubqueryId, replacement: &Expression) -> bool {
    fn in_join_list(list: &mut [JoinNode], id: SubqueryId, replacement: &Expression) -> bool {
        let mut replaced = false;
        for node in list.iter_mut() {
            if let Some(on) = node.on_mut() {
                replaced |= on.replace_subquery(id, replacement);
            }
            if let JoinNode::Nested(n) = node {
                replaced |= in_join_list(&mut n.children, id, replacement);
            }
        }
        replaced
    }

    let mut replaced = false;
    for expr in block
        .where_clause
        .iter_mut()
        .chain(block.prepared_where.iter_mut())
        .chain(block.select_list.iter_mut())
        .chain(block.group_by.iter_mut())
        .chain(block.having.iter_mut())
        .chain(block.order_by.iter_mut())
    {
        replaced |= expr.replace_subquery(id, replacement);
    }
    replaced | in_join_list(&mut block.join_list, id, replacement)
}

/// Children of a merged or inlined subquery now live in its parent
fn reparent_children(stmt: &mut Statement, id: SubqueryId, parent: BlockOwner) {
    for sub in stmt.subqueries.iter_mut().filter(|s| s.parent == BlockOwner::Subquery(id)) {
        sub.parent = parent;
    }
    for nest in stmt.nests.iter_mut().filter(|n| n.owner == BlockOwner::Subquery(id)) {
        nest.owner = parent;
    }
}

fn node_at_path<'a>(list: &'a mut [JoinNode], path: &[usize]) -> PlannerResult<&'a mut JoinNode> {
    let (first, rest) = path
        .split_first()
        .ok_or_else(|| PlannerError::InvalidInput("empty join path".to_string()))?;
    let node = list
        .get_mut(*first)
        .ok_or_else(|| PlannerError::InvalidInput(format!("join path index {} out of range", first)))?;
    if rest.is_empty() {
        return Ok(node);
    }
    match node {
        JoinNode::Nested(n) => node_at_path(&mut n.children, rest),
        JoinNode::Table(_) => Err(PlannerError::InvalidInput("join path runs through a table".to_string())),
    }
}

/// Merge the subquery's tables into the parent join as a new semi-join nest
fn merge_into_parent(stmt: &mut Statement, id: SubqueryId, pairs: &ComparedPairs) -> PlannerResult<NestId> {
    let parent = stmt.subquery(id)?.parent;
    let location = locate_predicate(stmt.block(parent)?, id)
        .ok_or_else(|| PlannerError::InvalidInput(format!("predicate of subquery #{} not found", id)))?;
    let outer_refs = stmt.outer_references(id)?;
    let child_nest_tables = stmt
        .nests
        .iter()
        .filter(|n| n.owner == BlockOwner::Subquery(id))
        .fold(TableMap::EMPTY, |acc, n| acc | n.inner_tables);

    let nest_id = stmt.nests.len();
    let join_id = stmt.allocate_join_id();
    let wrapper_id = join_id + 1;

    let (join_list, sub_where) = {
        let sub = stmt.subquery_mut(id)?;
        sub.block.prepared_where = None;
        (std::mem::take(&mut sub.block.join_list), sub.block.where_clause.take())
    };
    let (lifted, kept): (Vec<JoinNode>, Vec<JoinNode>) = join_list
        .into_iter()
        .partition(|node| matches!(node, JoinNode::Nested(n) if n.sj_nest.is_some()));
    let inner_tables = crate::query::ast::leaf_tables(&kept) - child_nest_tables;

    let equalities: Vec<Expression> = pairs
        .outer
        .iter()
        .zip(&pairs.inner)
        .enumerate()
        .map(|(ordinal, (o, i))| Expression::SemiJoinEquality {
            outer: Box::new(o.clone()),
            inner: Box::new(i.clone()),
            ordinal,
        })
        .collect();
    let on_expr = Expression::and_all(sub_where.into_iter().chain(equalities).collect());

    let left_tables = pairs.left.as_ref().map_or(TableMap::EMPTY, Expression::used_tables);
    let scan_allowed = pairs.keyable && pairs.inner.iter().all(|e| matches!(e, Expression::Column(_)));

    let mut nodes = vec![JoinNode::Nested(NestedJoin {
        id: join_id,
        join: JoinType::Inner,
        on: None,
        children: kept,
        sj_nest: Some(nest_id),
    })];
    nodes.extend(lifted);

    let block = stmt.block_mut(parent)?;
    let truth = Expression::true_literal();
    match &location {
        PredicateLocation::Where => {
            for clause in [&mut block.where_clause, &mut block.prepared_where] {
                if let Some(expr) = clause.take() {
                    let mut expr = expr;
                    expr.replace_subquery(id, &truth);
                    *clause = Some(Expression::and(expr, on_expr.clone()));
                }
            }
            block.join_list.extend(nodes);
        }
        PredicateLocation::On { path, .. } => {
            let node = node_at_path(&mut block.join_list, path)?;
            let wrapped = match node {
                JoinNode::Table(t) => Some((t.table, t.join, t.on.take())),
                JoinNode::Nested(_) => None,
            };
            // A table carrying the ON clause is wrapped so the nest joins
            // under the same condition
            if let Some((table, join, on)) = wrapped {
                *node = JoinNode::Nested(NestedJoin {
                    id: wrapper_id,
                    join,
                    on,
                    children: vec![JoinNode::Table(TableRef { table, join: JoinType::Inner, on: None })],
                    sj_nest: None,
                });
            }
            if let JoinNode::Nested(n) = node {
                n.children.extend(nodes);
                let on = n.on.take().map(|mut e| {
                    e.replace_subquery(id, &truth);
                    e
                });
                n.on = Some(Expression::and(on.unwrap_or_else(Expression::true_literal), on_expr.clone()));
            }
        }
        PredicateLocation::Nested => {
            return Err(PlannerError::InvalidInput(format!("subquery #{} is not a top-level conjunct", id)));
        }
    }
    if matches!(location, PredicateLocation::On { .. }) {
        stmt.next_join_id = stmt.next_join_id.max(wrapper_id + 1);
    }

    reparent_children(stmt, id, parent);
    stmt.nests.push(SemiJoinNest {
        id: nest_id,
        subquery: id,
        join_id,
        owner: parent,
        inner_tables,
        corr_tables: outer_refs,
        depends_on: outer_refs | left_tables,
        on_expr,
        outer_exprs: pairs.outer.clone(),
        inner_exprs: pairs.inner.clone(),
        mat_allowed: pairs.keyable,
        scan_allowed,
    });
    let sub = stmt.subquery_mut(id)?;
    sub.left_operand = pairs.left.clone();
    debug!("Subquery #{} merged as semi-join nest #{} over {:?}", id, nest_id, inner_tables);
    Ok(nest_id)
}

/// Attach the subquery to the parent join as a materialized derived table
/// with a unique key over all its columns, probed through `left_i = col{i}`
fn materialize_as_table(stmt: &mut Statement, id: SubqueryId, pairs: &ComparedPairs) -> PlannerResult<TableId> {
    let parent = stmt.subquery(id)?.parent;
    let table = stmt.tables.len();
    if table >= MAX_TABLES {
        return Err(PlannerError::TooManyTables(table + 1, MAX_TABLES));
    }
    stmt.tables.push(TableEntry {
        alias: format!("<subquery{}>", id),
        source: TableSource::MaterializedSubquery { subquery: id },
    });

    let equalities: Vec<Expression> = pairs
        .outer
        .iter()
        .enumerate()
        .map(|(i, o)| Expression::eq(o.clone(), Expression::column(table, &materialized_column_name(i))))
        .collect();
    let replacement = Expression::and_all(equalities);

    let block = stmt.block_mut(parent)?;
    replace_predicate(block, id, &replacement);
    block.join_list.push(JoinNode::table(table));

    stmt.subquery_mut(id)?.left_operand = pairs.left.clone();
    debug!("Subquery #{} materialized as table #{}", id, table);
    Ok(table)
}

/// Push `select_i = left_i` into the subquery and turn the predicate into an
/// existence check evaluated per outer row
fn rewrite_in_to_exists(stmt: &mut Statement, id: SubqueryId, pairs: &ComparedPairs) -> PlannerResult<()> {
    let parent = stmt.subquery(id)?.parent;
    let pushed: Vec<Expression> = pairs
        .inner
        .iter()
        .zip(&pairs.outer)
        .map(|(i, o)| Expression::eq(i.clone(), o.clone()))
        .collect();

    {
        let sub = stmt.subquery_mut(id)?;
        sub.left_operand = pairs.left.clone();
        if !pushed.is_empty() {
            let block = &mut sub.block;
            let grouped = block.has_aggregates || !block.group_by.is_empty() || block.having.is_some();
            let target = if grouped { &mut block.having } else { &mut block.where_clause };
            let current = target.take().unwrap_or_else(Expression::true_literal);
            *target = Some(Expression::and(current, Expression::and_all(pushed)));
        }
    }

    replace_predicate(stmt.block_mut(parent)?, id, &Expression::Exists { subquery: id });
    Ok(())
}

/// Replace a subquery that returns no row, or that has no tables, by a
/// constant condition in the parent
fn apply_degenerate(stmt: &mut Statement, id: SubqueryId, always_false: bool) -> PlannerResult<ConversionOutcome> {
    let parent = stmt.subquery(id)?.parent;
    let left = find_left_operand(stmt.block(parent)?, id);
    let replacement = if always_false {
        Expression::false_literal()
    } else {
        let outer: Vec<Expression> = left
            .as_ref()
            .map(|l| l.row_items().into_iter().cloned().collect())
            .unwrap_or_default();
        let sub = stmt.subquery_mut(id)?;
        let filter = sub.block.where_clause.take();
        let mut conjuncts: Vec<Expression> = outer
            .into_iter()
            .zip(sub.block.select_list.iter().cloned())
            .map(|(o, i)| Expression::eq(o, i))
            .collect();
        conjuncts.extend(filter);
        Expression::and_all(conjuncts)
    };

    replace_predicate(stmt.block_mut(parent)?, id, &replacement);
    if !always_false {
        reparent_children(stmt, id, parent);
    }
    stmt.subquery_mut(id)?.left_operand = left;
    debug!("Subquery #{} replaced by {}", id, replacement);
    Ok(ConversionOutcome::Degenerate { always_false })
}
