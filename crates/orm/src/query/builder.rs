//! Query Builder - Fluent accumulation of query state
//!
//! The builder only accumulates; the compiled statement is derived entirely
//! from the accumulated state, so the order builder methods are called in
//! never changes the result.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::relationships::registry::RelationshipRegistry;

use super::types::{CacheDirective, OrderDirection, WhereCondition};

/// Fluent query builder over one root model
#[derive(Debug)]
pub struct QueryBuilder<M> {
    pub(crate) registry: Option<Arc<RelationshipRegistry>>,
    pub(crate) wheres: Vec<WhereCondition>,
    pub(crate) order_by: Vec<(String, OrderDirection)>,
    pub(crate) limit_count: Option<i64>,
    pub(crate) offset_count: Option<i64>,
    pub(crate) selected: Option<Vec<String>>,
    pub(crate) excluded: Vec<String>,
    pub(crate) eager_paths: BTreeSet<String>,
    pub(crate) prefetch_paths: BTreeSet<String>,
    pub(crate) cache: CacheDirective,
    pub(crate) distinct: bool,
    _marker: PhantomData<M>,
}

impl<M> Clone for QueryBuilder<M> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            wheres: self.wheres.clone(),
            order_by: self.order_by.clone(),
            limit_count: self.limit_count,
            offset_count: self.offset_count,
            selected: self.selected.clone(),
            excluded: self.excluded.clone(),
            eager_paths: self.eager_paths.clone(),
            prefetch_paths: self.prefetch_paths.clone(),
            cache: self.cache,
            distinct: self.distinct,
            _marker: PhantomData,
        }
    }
}

impl<M> Default for QueryBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> QueryBuilder<M> {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            registry: None,
            wheres: Vec::new(),
            order_by: Vec::new(),
            limit_count: None,
            offset_count: None,
            selected: None,
            excluded: Vec::new(),
            eager_paths: BTreeSet::new(),
            prefetch_paths: BTreeSet::new(),
            cache: CacheDirective::default(),
            distinct: false,
            _marker: PhantomData,
        }
    }

    /// Attach the registry used to resolve relationship paths
    pub fn with_registry(mut self, registry: Arc<RelationshipRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Order results by a field
    pub fn order_by(mut self, field: &str, direction: OrderDirection) -> Self {
        self.order_by.push((field.to_string(), direction));
        self
    }

    /// Order results by a field, descending when `reverse` is set
    pub fn order(self, field: &str, reverse: bool) -> Self {
        let direction = if reverse {
            OrderDirection::Desc
        } else {
            OrderDirection::Asc
        };
        self.order_by(field, direction)
    }

    /// Cap the number of rows returned
    pub fn limit(mut self, count: i64) -> Self {
        self.limit_count = Some(count);
        self
    }

    /// Skip the first `count` rows
    pub fn offset(mut self, count: i64) -> Self {
        self.offset_count = Some(count);
        self
    }

    /// Restrict the selected columns; the primary key is always included
    pub fn fields(mut self, columns: &[&str]) -> Self {
        self.selected = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Drop columns from the selection
    pub fn exclude(mut self, columns: &[&str]) -> Self {
        self.excluded
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Select a single column (plus the primary key)
    pub fn only(self, column: &str) -> Self {
        self.fields(&[column])
    }

    /// Select distinct rows
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Eagerly load forward relationship paths via joins
    pub fn select_related(mut self, paths: &[&str]) -> Self {
        self.eager_paths
            .extend(paths.iter().map(|p| p.to_string()));
        self
    }

    /// Batch-load reverse or many-to-many relationship paths after the root
    /// query
    pub fn prefetch_related(mut self, paths: &[&str]) -> Self {
        self.prefetch_paths
            .extend(paths.iter().map(|p| p.to_string()));
        self
    }

    /// Skip the result cache for this query
    pub fn bypass_cache(mut self) -> Self {
        self.cache.bypass = true;
        self
    }

    /// Cache this query's result for the given TTL
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl = Some(ttl);
        self
    }
}
