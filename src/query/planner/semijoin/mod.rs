// Semi-Join Subquery Optimization
//
// This module turns IN/EXISTS subquery predicates into semi-join nests of
// the parent join and chooses, per nest, how the duplicates introduced by
// the merge are removed.

pub mod nest;
pub mod context;
pub mod classifier;
pub mod convert;
pub mod pullout;
pub mod strategy;
pub mod pickers;
pub mod prefix;
pub mod finalize;

pub use self::nest::{MaterializationInfo, SemiJoinNest};
pub use self::context::{KeyUse, NestState, SemiJoinContext, TableInfo};
pub use self::classifier::{Candidate, PredicateLocation};
pub use self::convert::convert_subqueries_to_semijoins;
pub use self::pullout::{find_eq_ref_candidate, pull_out_semijoin_tables};
pub use self::strategy::{SjStrategy, StrategyPicker};
pub use self::prefix::{JoinPrefix, Position};
pub use self::finalize::{finalize_plan, FinalizedPlan, JumpTarget, PlanEntry, Span, WeedoutSetup};
