// Query Planner Module
//
// This module is responsible for choosing how the subqueries of a statement
// are executed and for the join order of every query block.

pub mod config;
pub mod error;
pub mod trace;
pub mod cost_model;
pub mod join_reordering;
pub mod materialization;
pub mod semijoin;
pub mod optimizer;
pub mod explain;

// Export key types
pub use self::config::OptimizerConfig;
pub use self::error::{PlannerError, PlannerResult};
pub use self::trace::OptimizerTrace;
pub use self::cost_model::{AccessMethod, AccessPath, AccessPathEstimator, AccessRequest, StatisticsCostModel};
pub use self::join_reordering::{JoinOrderSearch, SearchResult};
pub use self::materialization::{SubqueryPlan, SubqueryPlanChoice};
pub use self::optimizer::{BlockPlan, OptimizedQuery, SemiJoinOptimizer, SubqueryBlockPlan};
