// BayunDB Query Processing Module
//
// This module contains the resolved statement model and the subquery
// optimizer that plans it.

pub mod ast;
pub mod statement;
pub mod planner;

pub use statement::{Statement, Subquery, ConversionOutcome};
