// BayunDB Semi-Join Subquery Optimizer

pub mod common;
pub mod catalog;
pub mod query;

// Re-export key items for convenient access
pub use catalog::Catalog;
pub use query::ast::{Expression, JoinNode, QueryBlock};
pub use query::statement::{BlockOwner, PredicateKind, Statement};
pub use query::planner::{OptimizedQuery, OptimizerConfig, PlannerError, PlannerResult, SemiJoinOptimizer};
