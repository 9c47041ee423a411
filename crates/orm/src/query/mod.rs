//! Query Module - Fluent builder, join planning, compilation, and execution

pub mod builder;
pub mod join_planner;
pub mod sql;
pub mod types;
pub mod where_clause;
pub mod execution;

// Re-export main types
pub use builder::QueryBuilder;
pub use join_planner::{JoinInfo, JoinPlanner, PathContext, ROOT_ALIAS};
pub use sql::CompiledQuery;
pub use types::{CacheDirective, JoinKind, OrderDirection, QueryOperator, WhereCondition};
