pub mod types;

pub use self::types::{TableId, TableMap, NestId, SubqueryId, JoinId, MAX_TABLES, cost_add, cost_mult};
