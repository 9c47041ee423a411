//! # tether-orm: Relationship-aware data mapper for embedded SQLite
//!
//! Maps declarative record definitions onto SQLite tables and resolves the
//! relationships between them without hand-written joins:
//!
//! - a process-wide relationship registry with deferred forward-reference
//!   resolution;
//! - lazy-loading proxies for forward foreign keys;
//! - a many-to-many manager speaking the junction-table protocol;
//! - a join planner behind `select_related`, relationship-path filters, and
//!   a batch prefetcher behind `prefetch_related`;
//! - a per-connection result cache invalidated synchronously by writes.
//!
//! Execution is single-threaded and synchronous; one logical operation per
//! connection at a time.

pub mod cache;
pub mod connection;
pub mod error;
pub mod loading;
pub mod model;
pub mod query;
pub mod relationships;
pub mod transaction;

// Re-export core traits and types
pub use cache::{CacheStats, QueryCache, QueryCacheConfig};
pub use connection::{ConnectionConfig, ConnectionError, Row, SqliteConnection};
pub use error::{ModelError, ModelResult, OrmError, OrmResult};
pub use loading::{PrefetchPayload, PrefetchSet, Prefetcher};
pub use model::{Model, ModelCrud};
pub use query::{
    CompiledQuery, JoinInfo, JoinKind, OrderDirection, QueryBuilder, QueryOperator,
};
pub use relationships::{
    BelongsTo, HasMany, HasOne, JunctionConfig, ManyToMany, ModelInfo, ReferentialAction,
    RelationshipKind, RelationshipMetadata, RelationshipRegistry, ReverseAccessor,
};
pub use transaction::Transaction;
