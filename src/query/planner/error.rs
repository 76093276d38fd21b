// Planner Errors
//
// This module defines the error type returned by every stage of subquery
// optimization.

use thiserror::Error;

use crate::catalog::ValidationError;
use crate::common::types::{TableId, SubqueryId, NestId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    #[error("Cannot build semi-join equality {left} = {right}: {cause}")]
    SemiJoinEquality {
        left: String,
        right: String,
        #[source]
        cause: ValidationError,
    },

    #[error("Operand should contain {expected} column(s), found {actual}")]
    OperandColumns { expected: usize, actual: usize },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Unknown subquery: #{0}")]
    UnknownSubquery(SubqueryId),

    #[error("Unknown semi-join nest: #{0}")]
    UnknownNest(NestId),

    #[error("No valid access path for table #{table}")]
    NoAccessPath { table: TableId },

    #[error("No valid join order found")]
    NoValidPlan,

    #[error("Too many tables: {0} (maximum is {1})")]
    TooManyTables(usize, usize),

    #[error("Catalog error: {0}")]
    Catalog(#[from] ValidationError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type PlannerResult<T> = Result<T, PlannerError>;
