// Query Tree Definitions
//
// This module defines the resolved query tree the optimizer works on:
// expressions, the join tree of a query block and the query block itself.
// Column references are already bound to statement-wide table slots.

use std::fmt;

use serde::{Serialize, Deserialize};
use crate::common::types::{TableId, TableMap, SubqueryId, JoinId, NestId};

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    NotEquals,
    LessThan,
    GreaterThan,
    LessEquals,
    GreaterEquals,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "<>",
            Operator::LessThan => "<",
            Operator::GreaterThan => ">",
            Operator::LessEquals => "<=",
            Operator::GreaterEquals => ">=",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Equals
                | Operator::NotEquals
                | Operator::LessThan
                | Operator::GreaterThan
                | Operator::LessEquals
                | Operator::GreaterEquals
        )
    }
}

/// Column reference bound to a table slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnReference {
    pub table: TableId,
    pub name: String,
}

/// Expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Literal(Value),
    Column(ColumnReference),
    BinaryOp {
        left: Box<Expression>,
        op: Operator,
        right: Box<Expression>,
    },
    Not(Box<Expression>),
    /// Row constructor, `(a, b)`
    Row(Vec<Expression>),
    /// `left IN (subquery)`
    InSubquery {
        left: Box<Expression>,
        subquery: SubqueryId,
    },
    /// `EXISTS (subquery)`
    Exists {
        subquery: SubqueryId,
    },
    /// Equality injected when a subquery is merged into its parent.
    /// `ordinal` is the position of the pair in the compared row.
    SemiJoinEquality {
        outer: Box<Expression>,
        inner: Box<Expression>,
        ordinal: usize,
    },
}

impl Expression {
    pub fn column(table: TableId, name: &str) -> Self {
        Expression::Column(ColumnReference { table, name: name.to_string() })
    }

    pub fn literal(value: Value) -> Self {
        Expression::Literal(value)
    }

    pub fn true_literal() -> Self {
        Expression::Literal(Value::Boolean(true))
    }

    pub fn false_literal() -> Self {
        Expression::Literal(Value::Boolean(false))
    }

    pub fn binary(left: Expression, op: Operator, right: Expression) -> Self {
        Expression::BinaryOp { left: Box::new(left), op, right: Box::new(right) }
    }

    pub fn eq(left: Expression, right: Expression) -> Self {
        Expression::binary(left, Operator::Equals, right)
    }

    pub fn in_subquery(left: Expression, subquery: SubqueryId) -> Self {
        Expression::InSubquery { left: Box::new(left), subquery }
    }

    /// AND two conditions together, dropping constant TRUE operands
    pub fn and(left: Expression, right: Expression) -> Self {
        if left.is_const_true() {
            right
        } else if right.is_const_true() {
            left
        } else {
            Expression::binary(left, Operator::And, right)
        }
    }

    /// AND a list of conditions; an empty list is TRUE
    pub fn and_all(items: Vec<Expression>) -> Self {
        items.into_iter().fold(Expression::true_literal(), Expression::and)
    }

    pub fn is_const_true(&self) -> bool {
        matches!(self, Expression::Literal(Value::Boolean(true)))
    }

    /// Constant FALSE, including a conjunction with a FALSE conjunct
    pub fn is_const_false(&self) -> bool {
        match self {
            Expression::Literal(Value::Boolean(false)) => true,
            Expression::BinaryOp { left, op: Operator::And, right } => {
                left.is_const_false() || right.is_const_false()
            }
            _ => false,
        }
    }

    /// Tables referenced directly by this expression. Tables referenced only
    /// from inside a subquery are not included.
    pub fn used_tables(&self) -> TableMap {
        let mut map = TableMap::EMPTY;
        self.collect_tables(&mut map);
        map
    }

    fn collect_tables(&self, map: &mut TableMap) {
        match self {
            Expression::Literal(_) | Expression::Exists { .. } => {}
            Expression::Column(col) => map.insert(col.table),
            Expression::BinaryOp { left, right, .. } => {
                left.collect_tables(map);
                right.collect_tables(map);
            }
            Expression::Not(inner) => inner.collect_tables(map),
            Expression::Row(items) => items.iter().for_each(|e| e.collect_tables(map)),
            Expression::InSubquery { left, .. } => left.collect_tables(map),
            Expression::SemiJoinEquality { outer, inner, .. } => {
                outer.collect_tables(map);
                inner.collect_tables(map);
            }
        }
    }

    /// Top-level AND-conjuncts
    pub fn conjuncts(&self) -> Vec<&Expression> {
        let mut out = Vec::new();
        self.collect_conjuncts(&mut out);
        out
    }

    fn collect_conjuncts<'a>(&'a self, out: &mut Vec<&'a Expression>) {
        match self {
            Expression::BinaryOp { left, op: Operator::And, right } => {
                left.collect_conjuncts(out);
                right.collect_conjuncts(out);
            }
            other => out.push(other),
        }
    }

    /// Components of a row constructor, or the expression itself
    pub fn row_items(&self) -> Vec<&Expression> {
        match self {
            Expression::Row(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    /// Equality conjuncts usable for index lookups, as `(left, right)` pairs
    pub fn equalities(&self) -> Vec<(&Expression, &Expression)> {
        self.conjuncts()
            .into_iter()
            .filter_map(|c| match c {
                Expression::BinaryOp { left, op: Operator::Equals, right } => Some((&**left, &**right)),
                Expression::SemiJoinEquality { outer, inner, .. } => Some((&**outer, &**inner)),
                _ => None,
            })
            .collect()
    }

    /// Subquery ids referenced anywhere in the expression
    pub fn subqueries(&self) -> Vec<SubqueryId> {
        let mut out = Vec::new();
        self.collect_subqueries(&mut out);
        out
    }

    fn collect_subqueries(&self, out: &mut Vec<SubqueryId>) {
        match self {
            Expression::Literal(_) | Expression::Column(_) => {}
            Expression::BinaryOp { left, right, .. } => {
                left.collect_subqueries(out);
                right.collect_subqueries(out);
            }
            Expression::Not(inner) => inner.collect_subqueries(out),
            Expression::Row(items) => items.iter().for_each(|e| e.collect_subqueries(out)),
            Expression::InSubquery { left, subquery } => {
                left.collect_subqueries(out);
                out.push(*subquery);
            }
            Expression::Exists { subquery } => out.push(*subquery),
            Expression::SemiJoinEquality { outer, inner, .. } => {
                outer.collect_subqueries(out);
                inner.collect_subqueries(out);
            }
        }
    }

    pub fn contains_subquery(&self, id: SubqueryId) -> bool {
        self.subqueries().contains(&id)
    }

    /// Position of a subquery predicate: `Some(true)` when it is a top-level
    /// AND-conjunct, `Some(false)` when nested under another operator
    pub fn subquery_position(&self, id: SubqueryId) -> Option<bool> {
        if self.conjuncts().iter().any(|c| c.is_predicate_of(id)) {
            Some(true)
        } else if self.contains_subquery(id) {
            Some(false)
        } else {
            None
        }
    }

    fn is_predicate_of(&self, id: SubqueryId) -> bool {
        match self {
            Expression::InSubquery { subquery, .. } | Expression::Exists { subquery } => *subquery == id,
            _ => false,
        }
    }

    /// Left operand of the `IN` predicate for the given subquery
    pub fn find_in_left_operand(&self, id: SubqueryId) -> Option<&Expression> {
        match self {
            Expression::InSubquery { left, subquery } if *subquery == id => Some(left),
            Expression::Literal(_) | Expression::Column(_) | Expression::Exists { .. } => None,
            Expression::BinaryOp { left, right, .. } => {
                left.find_in_left_operand(id).or_else(|| right.find_in_left_operand(id))
            }
            Expression::Not(inner) => inner.find_in_left_operand(id),
            Expression::Row(items) => items.iter().find_map(|e| e.find_in_left_operand(id)),
            Expression::InSubquery { left, .. } => left.find_in_left_operand(id),
            Expression::SemiJoinEquality { outer, inner, .. } => {
                outer.find_in_left_operand(id).or_else(|| inner.find_in_left_operand(id))
            }
        }
    }

    /// Replace the predicate node of a subquery. Returns true if a node was
    /// replaced.
    pub fn replace_subquery(&mut self, id: SubqueryId, replacement: &Expression) -> bool {
        if self.is_predicate_of(id) {
            *self = replacement.clone();
            return true;
        }
        match self {
            Expression::Literal(_) | Expression::Column(_) | Expression::Exists { .. } => false,
            Expression::BinaryOp { left, right, .. } => {
                let l = left.replace_subquery(id, replacement);
                let r = right.replace_subquery(id, replacement);
                l || r
            }
            Expression::Not(inner) => inner.replace_subquery(id, replacement),
            Expression::Row(items) => {
                let mut replaced = false;
                for item in items.iter_mut() {
                    replaced |= item.replace_subquery(id, replacement);
                }
                replaced
            }
            Expression::InSubquery { left, .. } => left.replace_subquery(id, replacement),
            Expression::SemiJoinEquality { outer, inner, .. } => {
                let o = outer.replace_subquery(id, replacement);
                let i = inner.replace_subquery(id, replacement);
                o || i
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(v) => write!(f, "{}", v),
            Expression::Column(col) => write!(f, "#{}.{}", col.table, col.name),
            Expression::BinaryOp { left, op, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expression::Not(inner) => write!(f, "NOT {}", inner),
            Expression::Row(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Expression::InSubquery { left, subquery } => write!(f, "{} IN <subquery{}>", left, subquery),
            Expression::Exists { subquery } => write!(f, "EXISTS <subquery{}>", subquery),
            Expression::SemiJoinEquality { outer, inner, .. } => write!(f, "{} = {}", outer, inner),
        }
    }
}

/// Join type of a join-list element relative to the elements before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JoinType {
    #[default]
    Inner,
    /// Left outer join: this element is the inner side
    Left,
}

/// Single table in a join list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    pub table: TableId,
    #[serde(default)]
    pub join: JoinType,
    #[serde(default)]
    pub on: Option<Expression>,
}

/// Parenthesized join, or a semi-join nest when `sj_nest` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedJoin {
    pub id: JoinId,
    #[serde(default)]
    pub join: JoinType,
    #[serde(default)]
    pub on: Option<Expression>,
    pub children: Vec<JoinNode>,
    #[serde(default)]
    pub sj_nest: Option<NestId>,
}

/// Element of a join list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JoinNode {
    Table(TableRef),
    Nested(NestedJoin),
}

impl JoinNode {
    pub fn table(table: TableId) -> Self {
        JoinNode::Table(TableRef { table, join: JoinType::Inner, on: None })
    }

    pub fn left_join(table: TableId, on: Expression) -> Self {
        JoinNode::Table(TableRef { table, join: JoinType::Left, on: Some(on) })
    }

    pub fn join_type(&self) -> JoinType {
        match self {
            JoinNode::Table(t) => t.join,
            JoinNode::Nested(n) => n.join,
        }
    }

    pub fn on(&self) -> Option<&Expression> {
        match self {
            JoinNode::Table(t) => t.on.as_ref(),
            JoinNode::Nested(n) => n.on.as_ref(),
        }
    }

    pub fn on_mut(&mut self) -> &mut Option<Expression> {
        match self {
            JoinNode::Table(t) => &mut t.on,
            JoinNode::Nested(n) => &mut n.on,
        }
    }

    pub fn is_outer_join(&self) -> bool {
        self.join_type() == JoinType::Left
    }

    /// All table slots at or below this node
    pub fn leaf_tables(&self) -> TableMap {
        match self {
            JoinNode::Table(t) => TableMap::single(t.table),
            JoinNode::Nested(n) => leaf_tables(&n.children),
        }
    }
}

/// All table slots in a join list
pub fn leaf_tables(list: &[JoinNode]) -> TableMap {
    list.iter().fold(TableMap::EMPTY, |acc, node| acc | node.leaf_tables())
}

/// One SELECT: its join list, filters and shape flags
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryBlock {
    pub join_list: Vec<JoinNode>,
    pub where_clause: Option<Expression>,
    /// Copy of the WHERE clause kept for re-execution of a prepared statement
    pub prepared_where: Option<Expression>,
    pub select_list: Vec<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub has_aggregates: bool,
    pub order_by: Vec<Expression>,
    pub limit: Option<u64>,
    pub is_union: bool,
    pub straight_join: bool,
    /// Conversion to a semi-join disabled by a hint
    pub no_semijoin: bool,
    /// The block references the recursive CTE it belongs to
    pub recursive_reference: bool,
}

impl QueryBlock {
    pub fn new() -> Self {
        QueryBlock::default()
    }

    pub fn leaf_tables(&self) -> TableMap {
        leaf_tables(&self.join_list)
    }

    pub fn has_outer_join(&self) -> bool {
        fn any_outer(list: &[JoinNode]) -> bool {
            list.iter().any(|node| {
                node.is_outer_join()
                    || matches!(node, JoinNode::Nested(n) if any_outer(&n.children))
            })
        }
        any_outer(&self.join_list)
    }

    /// Every expression owned by the block, including ON conditions
    pub fn expressions(&self) -> Vec<&Expression> {
        fn on_exprs<'a>(list: &'a [JoinNode], out: &mut Vec<&'a Expression>) {
            for node in list {
                if let Some(on) = node.on() {
                    out.push(on);
                }
                if let JoinNode::Nested(n) = node {
                    on_exprs(&n.children, out);
                }
            }
        }
        let mut out: Vec<&Expression> = Vec::new();
        out.extend(self.where_clause.iter());
        out.extend(self.select_list.iter());
        out.extend(self.group_by.iter());
        out.extend(self.having.iter());
        out.extend(self.order_by.iter());
        on_exprs(&self.join_list, &mut out);
        out
    }
}
