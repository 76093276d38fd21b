// Semi-Join Optimization Context
//
// This module builds the per-execution view of one query block that the
// join-order search and the strategy pickers read: table metadata, semi-join
// nest membership, outer-join embedding and usable key equalities. Nothing
// here is written back to the statement.

use std::collections::HashMap;

use crate::catalog::{Catalog, Column, DataType, Index, TableStatistics};
use crate::common::types::{TableId, TableMap, NestId, SubqueryId};
use crate::query::ast::{Expression, JoinNode};
use crate::query::planner::config::OptimizerConfig;
use crate::query::planner::error::{PlannerError, PlannerResult};
use crate::query::statement::{BlockOwner, Statement, TableSource, materialized_column_name};
use super::nest::{MaterializationInfo, SemiJoinNest};

/// An equality `table.column = <expression over value_tables>` usable for
/// index lookups
#[derive(Debug, Clone, PartialEq)]
pub struct KeyUse {
    pub table: TableId,
    pub column: String,
    pub value_tables: TableMap,
}

/// A table of the block as seen by the optimizer
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub id: TableId,
    pub alias: String,
    pub columns: Vec<Column>,
    pub stats: TableStatistics,
    pub indexes: Vec<Index>,
    /// Semi-join nest the table belongs to
    pub emb_sj_nest: Option<NestId>,
    /// Tables of the innermost outer-join operand containing this table
    pub outer_join_tables: Option<TableMap>,
    /// Tables that must precede this one in any join order
    pub dependencies: TableMap,
    pub materialized_subquery: Option<SubqueryId>,
}

impl TableInfo {
    pub fn is_outer_join_inner(&self) -> bool {
        self.outer_join_tables.is_some()
    }
}

/// Per-execution state of a semi-join nest
#[derive(Debug, Clone, PartialEq)]
pub struct NestState {
    pub nest: SemiJoinNest,
    /// The nest wraps further nested joins
    pub has_nested_joins: bool,
    pub mat_info: Option<MaterializationInfo>,
    /// Tables moved out of the nest
    pub pulled_out: TableMap,
    /// Every inner table was pulled out
    pub removed: bool,
}

impl NestState {
    pub fn id(&self) -> NestId {
        self.nest.id
    }

    pub fn inner_tables(&self) -> TableMap {
        self.nest.inner_tables
    }
}

/// Optimizer view of one query block
#[derive(Debug, Clone)]
pub struct SemiJoinContext {
    pub config: OptimizerConfig,
    pub owner: BlockOwner,
    tables: HashMap<TableId, TableInfo>,
    /// All tables of the block
    pub join_tables: TableMap,
    /// Tables in declaration order
    pub join_order: Vec<TableId>,
    pub nests: Vec<NestState>,
    pub key_uses: Vec<KeyUse>,
    pub has_outer_join: bool,
    pub straight_join: bool,
}

struct Embedding {
    sj_nest: Option<NestId>,
    outer_join_tables: Option<TableMap>,
    dependencies: TableMap,
}

impl SemiJoinContext {
    /// Build the context for a block. `materialized` gives the statistics of
    /// materialized-subquery pseudo-tables.
    pub fn build(
        stmt: &Statement,
        catalog: &Catalog,
        owner: BlockOwner,
        config: &OptimizerConfig,
        materialized: &HashMap<TableId, TableStatistics>,
    ) -> PlannerResult<Self> {
        let block = stmt.block(owner)?;
        let mut ctx = SemiJoinContext {
            config: config.clone(),
            owner,
            tables: HashMap::new(),
            join_tables: block.leaf_tables(),
            join_order: Vec::new(),
            nests: Vec::new(),
            key_uses: Vec::new(),
            has_outer_join: block.has_outer_join(),
            straight_join: block.straight_join,
        };

        let top = Embedding { sj_nest: None, outer_join_tables: None, dependencies: TableMap::EMPTY };
        ctx.add_join_list(stmt, catalog, materialized, &block.join_list, &top)?;

        for nest in stmt.nests.iter().filter(|n| n.owner == owner) {
            let has_nested_joins = find_nested_join(&block.join_list, nest.join_id)
                .map(|children| children.iter().any(|c| matches!(c, JoinNode::Nested(_))))
                .unwrap_or(false);
            // References to enclosing blocks are constants within this block
            let mut nest = nest.clone();
            nest.corr_tables &= ctx.join_tables;
            nest.depends_on &= ctx.join_tables;
            let removed = nest.inner_tables.is_empty();
            ctx.nests.push(NestState { nest, has_nested_joins, mat_info: None, pulled_out: TableMap::EMPTY, removed });
        }

        for expr in block.expressions() {
            ctx.collect_key_uses(expr);
        }
        Ok(ctx)
    }

    fn add_join_list(
        &mut self,
        stmt: &Statement,
        catalog: &Catalog,
        materialized: &HashMap<TableId, TableStatistics>,
        list: &[JoinNode],
        outer: &Embedding,
    ) -> PlannerResult<()> {
        let mut preceding = TableMap::EMPTY;
        for node in list {
            let leaves = node.leaf_tables();
            let embedding = if node.is_outer_join() {
                Embedding {
                    sj_nest: outer.sj_nest,
                    outer_join_tables: Some(leaves),
                    dependencies: outer.dependencies | preceding,
                }
            } else {
                Embedding {
                    sj_nest: outer.sj_nest,
                    outer_join_tables: outer.outer_join_tables,
                    dependencies: outer.dependencies,
                }
            };
            match node {
                JoinNode::Table(t) => {
                    let info = self.table_info(stmt, catalog, materialized, t.table, &embedding)?;
                    self.join_order.push(t.table);
                    self.tables.insert(t.table, info);
                }
                JoinNode::Nested(n) => {
                    let inner = Embedding {
                        sj_nest: n.sj_nest.or(embedding.sj_nest),
                        ..embedding
                    };
                    self.add_join_list(stmt, catalog, materialized, &n.children, &inner)?;
                }
            }
            preceding |= leaves;
        }
        Ok(())
    }

    fn table_info(
        &self,
        stmt: &Statement,
        catalog: &Catalog,
        materialized: &HashMap<TableId, TableStatistics>,
        id: TableId,
        embedding: &Embedding,
    ) -> PlannerResult<TableInfo> {
        let entry = stmt.table_entry(id)?;
        let (columns, stats, indexes, materialized_subquery) = match &entry.source {
            TableSource::Base { name } => {
                let table = catalog.get_table(name)?;
                (
                    table.columns().to_vec(),
                    table.statistics().clone(),
                    table.indexes().to_vec(),
                    None,
                )
            }
            TableSource::MaterializedSubquery { subquery } => {
                let sub = stmt.subquery(*subquery)?;
                let mut columns = Vec::new();
                for (i, item) in sub.block.select_list.iter().enumerate() {
                    let data_type = stmt
                        .expression_type(catalog, item)?
                        .map(|t| t.data_type)
                        .unwrap_or(DataType::Integer);
                    columns.push(Column::new(&materialized_column_name(i), data_type, true));
                }
                let names: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
                let key: Vec<&str> = names.iter().map(String::as_str).collect();
                let stats = materialized.get(&id).cloned().unwrap_or_default();
                (columns, stats, vec![Index::unique("distinct_key", &key)], Some(*subquery))
            }
        };
        Ok(TableInfo {
            id,
            alias: entry.alias.clone(),
            columns,
            stats,
            indexes,
            emb_sj_nest: embedding.sj_nest,
            outer_join_tables: embedding.outer_join_tables,
            dependencies: embedding.dependencies,
            materialized_subquery,
        })
    }

    fn collect_key_uses(&mut self, expr: &Expression) {
        for (left, right) in expr.equalities() {
            self.add_key_use(left, right);
            self.add_key_use(right, left);
        }
    }

    fn add_key_use(&mut self, key: &Expression, value: &Expression) {
        if let Expression::Column(col) = key {
            let value_tables = value.used_tables() & self.join_tables;
            if self.join_tables.contains(col.table) && !value_tables.contains(col.table) {
                self.key_uses.push(KeyUse { table: col.table, column: col.name.clone(), value_tables });
            }
        }
    }

    /// Copy of the context where the given columns are bound to constants,
    /// as they are when the subquery is evaluated for one outer row
    pub fn with_bound_columns(&self, columns: &[Expression]) -> Self {
        let mut ctx = self.clone();
        for expr in columns {
            if let Expression::Column(col) = expr {
                if ctx.join_tables.contains(col.table) {
                    ctx.key_uses.push(KeyUse {
                        table: col.table,
                        column: col.name.clone(),
                        value_tables: TableMap::EMPTY,
                    });
                }
            }
        }
        ctx
    }

    pub fn table(&self, id: TableId) -> PlannerResult<&TableInfo> {
        self.tables.get(&id).ok_or_else(|| PlannerError::UnknownTable(format!("#{}", id)))
    }

    pub fn table_mut(&mut self, id: TableId) -> PlannerResult<&mut TableInfo> {
        self.tables.get_mut(&id).ok_or_else(|| PlannerError::UnknownTable(format!("#{}", id)))
    }

    pub fn nest(&self, id: NestId) -> PlannerResult<&NestState> {
        self.nests.iter().find(|n| n.id() == id).ok_or(PlannerError::UnknownNest(id))
    }

    pub fn nest_mut(&mut self, id: NestId) -> PlannerResult<&mut NestState> {
        self.nests.iter_mut().find(|n| n.id() == id).ok_or(PlannerError::UnknownNest(id))
    }

    /// Nest the table belongs to, if any
    pub fn nest_of(&self, table: TableId) -> PlannerResult<Option<&NestState>> {
        match self.table(table)?.emb_sj_nest {
            Some(id) => self.nest(id).map(Some),
            None => Ok(None),
        }
    }

    pub fn has_semijoins(&self) -> bool {
        self.nests.iter().any(|n| !n.removed)
    }

    /// Inner tables of all live nests
    pub fn nest_tables(&self) -> TableMap {
        self.nests
            .iter()
            .filter(|n| !n.removed)
            .fold(TableMap::EMPTY, |acc, n| acc | n.inner_tables())
    }

    pub fn key_uses_for(&self, table: TableId) -> impl Iterator<Item = &KeyUse> {
        self.key_uses.iter().filter(move |k| k.table == table)
    }

    pub fn alias(&self, table: TableId) -> &str {
        self.tables.get(&table).map(|t| t.alias.as_str()).unwrap_or("?")
    }
}

fn find_nested_join(list: &[JoinNode], id: usize) -> Option<&[JoinNode]> {
    list.iter().find_map(|node| match node {
        JoinNode::Nested(n) if n.id == id => Some(n.children.as_slice()),
        JoinNode::Nested(n) => find_nested_join(&n.children, id),
        JoinNode::Table(_) => None,
    })
}
