#![allow(dead_code)]

use anyhow::Result;
use bayundb_semijoin::catalog::{Catalog, Column, DataType, Table, TableStatistics};
use bayundb_semijoin::common::types::{SubqueryId, TableId, TableMap};
use bayundb_semijoin::query::ast::{Expression, JoinNode, Operator, QueryBlock, Value};
use bayundb_semijoin::query::planner::semijoin::{FinalizedPlan, SemiJoinContext};
use bayundb_semijoin::query::statement::{BlockOwner, PredicateKind, Statement};

// Integer column shorthand
pub fn int_col(name: &str) -> Column {
    Column::new(name, DataType::Integer, false)
}

// Table with integer columns and the given row count
pub fn int_table(name: &str, columns: &[&str], rows: f64) -> Table {
    Table::new(name, columns.iter().map(|c| int_col(c)).collect()).with_statistics(TableStatistics::new(rows))
}

// Build a catalog from a list of tables
pub fn catalog(tables: Vec<Table>) -> Result<Catalog> {
    let mut catalog = Catalog::new();
    for table in tables {
        catalog.create_table(table)?;
    }
    Ok(catalog)
}

pub fn col(table: TableId, name: &str) -> Expression {
    Expression::column(table, name)
}

pub fn gt(left: Expression, value: i64) -> Expression {
    Expression::binary(left, Operator::GreaterThan, Expression::literal(Value::Integer(value)))
}

// AND an expression into the WHERE clause of the root block
pub fn add_root_filter(stmt: &mut Statement, expr: Expression) {
    stmt.root.where_clause = Some(match stmt.root.where_clause.take() {
        Some(current) => Expression::and(current, expr),
        None => expr,
    });
}

// Root block joining the given tables
pub fn root_tables(stmt: &mut Statement, tables: &[TableId]) {
    stmt.root.join_list = tables.iter().map(|t| JoinNode::table(*t)).collect();
}

// Register `SELECT <select> FROM <tables> WHERE <filter>` as an IN subquery
// of the root block and return its id. The predicate itself is not placed.
pub fn in_subquery(stmt: &mut Statement, tables: &[TableId], select: Expression, filter: Option<Expression>) -> SubqueryId {
    let mut block = QueryBlock::new();
    block.join_list = tables.iter().map(|t| JoinNode::table(*t)).collect();
    block.select_list = vec![select];
    block.where_clause = filter;
    stmt.add_subquery(PredicateKind::In, BlockOwner::Root, block)
}

// Every live nest is covered by exactly one span, and the spans handle
// nothing but nest tables
pub fn assert_nests_covered_once(ctx: &SemiJoinContext, plan: &FinalizedPlan) {
    let spans = plan.spans();
    let mut handled = TableMap::EMPTY;
    for span in &spans {
        assert!(
            !span.handled_tables.overlaps(handled),
            "tables {:?} handled by more than one span",
            span.handled_tables & handled
        );
        handled |= span.handled_tables;
    }
    for nest in ctx.nests.iter().filter(|n| !n.removed) {
        let inner = nest.inner_tables();
        let covering: Vec<_> = spans.iter().filter(|s| s.handled_tables.overlaps(inner)).collect();
        assert_eq!(covering.len(), 1, "nest #{} covered by {} spans", nest.id(), covering.len());
        assert!(inner.is_subset_of(covering[0].handled_tables));
    }
    assert_eq!(handled, ctx.nest_tables());
}
