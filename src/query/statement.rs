// Statement Arena
//
// This module holds everything that survives across executions of a
// prepared statement: the global table slots, the subquery predicates with
// their conversion outcome, and the semi-join nests created by conversion.

use serde::{Serialize, Deserialize};

use crate::catalog::{Catalog, DataType, TypeInfo};
use crate::common::types::{TableId, TableMap, NestId, SubqueryId, JoinId, MAX_TABLES};
use crate::query::ast::{Expression, JoinNode, QueryBlock, Value, Operator};
use crate::query::planner::error::{PlannerError, PlannerResult};
use crate::query::planner::semijoin::nest::SemiJoinNest;

/// Where the rows of a table slot come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableSource {
    /// A catalog table
    Base { name: String },
    /// The materialized result of a non-mergeable subquery. Its columns are
    /// named `col0`, `col1`, ... after the subquery's select list.
    MaterializedSubquery { subquery: SubqueryId },
}

/// One statement-wide table slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub alias: String,
    pub source: TableSource,
}

/// Owner of a query block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockOwner {
    Root,
    Subquery(SubqueryId),
}

/// Kind of subquery predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredicateKind {
    /// `expr IN (SELECT ...)` and `expr = ANY (SELECT ...)`
    In,
    Exists,
}

/// Result of classifying a subquery predicate. Attached exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConversionOutcome {
    /// Merged into the parent join as a semi-join nest
    SemiJoin { nest: NestId },
    /// Kept as a materialized pseudo-table in the parent join
    Materialized { table: TableId },
    /// Evaluated per outer row through an injected correlated condition
    InToExists,
    /// Subquery without tables or with a constant FALSE filter
    Degenerate { always_false: bool },
}

impl ConversionOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            ConversionOutcome::SemiJoin { .. } => "semijoin",
            ConversionOutcome::Materialized { .. } => "materialized",
            ConversionOutcome::InToExists => "in_to_exists",
            ConversionOutcome::Degenerate { .. } => "degenerate",
        }
    }
}

/// A subquery predicate and its query block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subquery {
    pub id: SubqueryId,
    pub kind: PredicateKind,
    pub parent: BlockOwner,
    pub block: QueryBlock,
    #[serde(default)]
    pub outcome: Option<ConversionOutcome>,
    /// Left operand of an `IN` predicate, recorded when the predicate is
    /// removed from its parent
    #[serde(default)]
    pub left_operand: Option<Expression>,
}

/// A resolved statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub tables: Vec<TableEntry>,
    pub root: QueryBlock,
    #[serde(default)]
    pub subqueries: Vec<Subquery>,
    #[serde(default)]
    pub nests: Vec<SemiJoinNest>,
    #[serde(default)]
    pub next_join_id: JoinId,
    /// Set once the one-time conversion has run
    #[serde(default)]
    pub converted: bool,
}

impl Statement {
    pub fn new(root: QueryBlock) -> Self {
        Statement {
            tables: Vec::new(),
            root,
            subqueries: Vec::new(),
            nests: Vec::new(),
            next_join_id: 0,
            converted: false,
        }
    }

    /// Register a catalog table under an alias and return its slot
    pub fn add_table(&mut self, alias: &str, name: &str) -> TableId {
        self.tables.push(TableEntry {
            alias: alias.to_string(),
            source: TableSource::Base { name: name.to_string() },
        });
        self.tables.len() - 1
    }

    /// Register a subquery predicate and return its id
    pub fn add_subquery(&mut self, kind: PredicateKind, parent: BlockOwner, block: QueryBlock) -> SubqueryId {
        let id = self.subqueries.len();
        self.subqueries.push(Subquery { id, kind, parent, block, outcome: None, left_operand: None });
        id
    }

    pub fn subquery(&self, id: SubqueryId) -> PlannerResult<&Subquery> {
        self.subqueries.get(id).ok_or(PlannerError::UnknownSubquery(id))
    }

    pub fn subquery_mut(&mut self, id: SubqueryId) -> PlannerResult<&mut Subquery> {
        self.subqueries.get_mut(id).ok_or(PlannerError::UnknownSubquery(id))
    }

    pub fn table_entry(&self, id: TableId) -> PlannerResult<&TableEntry> {
        self.tables.get(id).ok_or(PlannerError::UnknownTable(format!("#{}", id)))
    }

    pub fn block(&self, owner: BlockOwner) -> PlannerResult<&QueryBlock> {
        match owner {
            BlockOwner::Root => Ok(&self.root),
            BlockOwner::Subquery(id) => Ok(&self.subquery(id)?.block),
        }
    }

    pub fn block_mut(&mut self, owner: BlockOwner) -> PlannerResult<&mut QueryBlock> {
        match owner {
            BlockOwner::Root => Ok(&mut self.root),
            BlockOwner::Subquery(id) => Ok(&mut self.subquery_mut(id)?.block),
        }
    }

    /// Subqueries whose predicate lives directly in the given block
    pub fn child_subqueries(&self, owner: BlockOwner) -> Vec<SubqueryId> {
        self.subqueries
            .iter()
            .filter(|s| s.parent == owner)
            .map(|s| s.id)
            .collect()
    }

    /// Blocks in post-order: every subquery before the block containing it
    pub fn blocks_bottom_up(&self) -> Vec<BlockOwner> {
        fn visit(stmt: &Statement, owner: BlockOwner, out: &mut Vec<BlockOwner>) {
            for child in stmt.child_subqueries(owner) {
                visit(stmt, BlockOwner::Subquery(child), out);
            }
            out.push(owner);
        }
        let mut out = Vec::new();
        visit(self, BlockOwner::Root, &mut out);
        out
    }

    /// Tables of a block and of every subquery below it
    pub fn deep_tables(&self, owner: BlockOwner) -> PlannerResult<TableMap> {
        let mut map = self.block(owner)?.leaf_tables();
        for child in self.child_subqueries(owner) {
            map |= self.deep_tables(BlockOwner::Subquery(child))?;
        }
        Ok(map)
    }

    /// Tables referenced anywhere inside the block tree of `owner`
    fn deep_used_tables(&self, owner: BlockOwner) -> PlannerResult<TableMap> {
        let block = self.block(owner)?;
        let mut map = block
            .expressions()
            .into_iter()
            .fold(TableMap::EMPTY, |acc, e| acc | e.used_tables());
        for child in self.child_subqueries(owner) {
            map |= self.deep_used_tables(BlockOwner::Subquery(child))?;
        }
        Ok(map)
    }

    /// Outer tables a subquery refers to. Empty for an uncorrelated subquery.
    pub fn outer_references(&self, id: SubqueryId) -> PlannerResult<TableMap> {
        let owner = BlockOwner::Subquery(id);
        Ok(self.deep_used_tables(owner)? - self.deep_tables(owner)?)
    }

    pub fn join_id_in_use(&self) -> JoinId {
        fn max_id(list: &[JoinNode]) -> Option<JoinId> {
            list.iter()
                .filter_map(|node| match node {
                    JoinNode::Nested(n) => Some(max_id(&n.children).map_or(n.id, |c| c.max(n.id))),
                    JoinNode::Table(_) => None,
                })
                .max()
        }
        let mut next = self.next_join_id;
        let blocks = std::iter::once(&self.root).chain(self.subqueries.iter().map(|s| &s.block));
        for block in blocks {
            if let Some(id) = max_id(&block.join_list) {
                next = next.max(id + 1);
            }
        }
        next
    }

    /// Allocate a fresh nested-join id
    pub fn allocate_join_id(&mut self) -> JoinId {
        let id = self.join_id_in_use();
        self.next_join_id = id + 1;
        id
    }

    /// Type and collation of an expression. `None` stands for an untyped NULL.
    pub fn expression_type(&self, catalog: &Catalog, expr: &Expression) -> PlannerResult<Option<TypeInfo>> {
        let info = match expr {
            Expression::Literal(Value::Null) => return Ok(None),
            Expression::Literal(Value::Integer(_)) => TypeInfo::new(DataType::Integer, None),
            Expression::Literal(Value::Float(_)) => TypeInfo::new(DataType::Float, None),
            Expression::Literal(Value::Text(_)) => TypeInfo::new(DataType::Text, None),
            Expression::Literal(Value::Boolean(_)) => TypeInfo::new(DataType::Boolean, None),
            Expression::Column(col) => match &self.table_entry(col.table)?.source {
                TableSource::Base { name } => {
                    let table = catalog.get_table(name)?;
                    let column = table
                        .get_column(&col.name)
                        .ok_or_else(|| PlannerError::UnknownColumn(format!("{}.{}", name, col.name)))?;
                    TypeInfo::new(column.data_type().clone(), column.collation().map(str::to_string))
                }
                TableSource::MaterializedSubquery { subquery } => {
                    let item = materialized_column_index(&col.name)
                        .and_then(|i| self.subqueries.get(*subquery).and_then(|s| s.block.select_list.get(i)))
                        .ok_or_else(|| PlannerError::UnknownColumn(col.name.clone()))?;
                    return self.expression_type(catalog, item);
                }
            },
            Expression::BinaryOp { left, op, right } => {
                if op.is_comparison() || matches!(op, Operator::And | Operator::Or) {
                    TypeInfo::new(DataType::Boolean, None)
                } else {
                    let l = self.expression_type(catalog, left)?;
                    let r = self.expression_type(catalog, right)?;
                    match (l, r) {
                        (Some(l), Some(r)) if l.data_type == DataType::Float || r.data_type == DataType::Float => {
                            TypeInfo::new(DataType::Float, None)
                        }
                        (Some(l), _) => l,
                        (None, r) => return Ok(r),
                    }
                }
            }
            Expression::Not(_)
            | Expression::InSubquery { .. }
            | Expression::Exists { .. }
            | Expression::SemiJoinEquality { .. } => TypeInfo::new(DataType::Boolean, None),
            Expression::Row(_) => {
                return Err(PlannerError::InvalidInput("row constructor has no scalar type".to_string()))
            }
        };
        Ok(Some(info))
    }

    /// Check slot count, table names and column references
    pub fn validate(&self, catalog: &Catalog) -> PlannerResult<()> {
        if self.tables.len() > MAX_TABLES {
            return Err(PlannerError::TooManyTables(self.tables.len(), MAX_TABLES));
        }
        for entry in &self.tables {
            match &entry.source {
                TableSource::Base { name } => {
                    catalog.get_table(name)?;
                }
                TableSource::MaterializedSubquery { subquery } => {
                    self.subquery(*subquery)?;
                }
            }
        }
        for (i, sub) in self.subqueries.iter().enumerate() {
            if sub.id != i {
                return Err(PlannerError::InvalidInput(format!("subquery #{} stored at position {}", sub.id, i)));
            }
            if let BlockOwner::Subquery(parent) = sub.parent {
                if parent == sub.id {
                    return Err(PlannerError::InvalidInput(format!("subquery #{} is its own parent", sub.id)));
                }
                self.subquery(parent)?;
            }
        }
        for owner in self.blocks_bottom_up() {
            let block = self.block(owner)?;
            for table in block.leaf_tables() {
                self.table_entry(table)?;
            }
            for expr in block.expressions() {
                self.validate_columns(catalog, expr)?;
            }
        }
        Ok(())
    }

    fn validate_columns(&self, catalog: &Catalog, expr: &Expression) -> PlannerResult<()> {
        match expr {
            Expression::Literal(_) | Expression::Exists { .. } => Ok(()),
            Expression::Column(_) => self.expression_type(catalog, expr).map(|_| ()),
            Expression::BinaryOp { left, right, .. } => {
                self.validate_columns(catalog, left)?;
                self.validate_columns(catalog, right)
            }
            Expression::Not(inner) => self.validate_columns(catalog, inner),
            Expression::Row(items) => items.iter().try_for_each(|e| self.validate_columns(catalog, e)),
            Expression::InSubquery { left, subquery } => {
                self.subquery(*subquery)?;
                self.validate_columns(catalog, left)
            }
            Expression::SemiJoinEquality { outer, inner, .. } => {
                self.validate_columns(catalog, outer)?;
                self.validate_columns(catalog, inner)
            }
        }
    }
}

/// Column name of the i-th column of a materialized subquery
pub fn materialized_column_name(i: usize) -> String {
    format!("col{}", i)
}

fn materialized_column_index(name: &str) -> Option<usize> {
    name.strip_prefix("col").and_then(|n| n.parse().ok())
}
