//! Query Builder execution against a connection
//!
//! The compiled root statement runs through the result cache; eager rows
//! hydrate related instances in the same pass, and prefetch paths trigger
//! their batched follow-up queries before instances are returned.

use serde_json::Value;

use crate::connection::SqliteConnection;
use crate::error::{ModelError, ModelResult};
use crate::loading::Prefetcher;
use crate::model::Model;
use crate::relationships::registry::RelationshipRegistry;

use super::builder::QueryBuilder;
use super::types::OrderDirection;

impl<M: Model> QueryBuilder<M> {
    /// Execute the query and decode every row
    pub fn fetch_all(&self, conn: &SqliteConnection) -> ModelResult<Vec<M>> {
        let registry = self.effective_registry(conn);
        let compiled = self.compile_select_using(Some(registry))?;
        let (rows, _from_cache) = conn.query_cached(
            &compiled.table,
            &compiled.sql,
            &compiled.params,
            &compiled.fields_signature,
            &compiled.dependencies,
            self.cache.bypass,
            self.cache.ttl,
        )?;

        let mut models = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut instance = M::from_row(row)?;
            // Prefix paths sort before their extensions, so parents hydrate
            // before nested levels are delivered.
            for path in &compiled.eager_paths {
                instance.apply_eager(path, &row.scoped(path))?;
            }
            models.push(instance);
        }

        if !self.prefetch_paths.is_empty() && !models.is_empty() {
            let pk_column = M::primary_key_name();
            let keys: Vec<Value> = rows
                .iter()
                .map(|row| row.value(pk_column).cloned().unwrap_or(Value::Null))
                .collect();
            let prefetcher = Prefetcher::new(conn, registry);
            for path in &self.prefetch_paths {
                let set = prefetcher.run(M::table_name(), &keys, path)?;
                for (instance, key) in models.iter_mut().zip(keys.iter()) {
                    instance.apply_prefetch(&set.payload_for(key))?;
                }
            }
        }
        Ok(models)
    }

    /// Execute with `LIMIT 1` and return the single row, if any
    pub fn fetch_one(&self, conn: &SqliteConnection) -> ModelResult<Option<M>> {
        let mut results = self.clone().limit(1).fetch_all(conn)?;
        Ok(results.pop())
    }

    /// The first row under the accumulated order (primary key order when
    /// none was declared)
    pub fn fetch_first(&self, conn: &SqliteConnection) -> ModelResult<Option<M>> {
        let mut query = self.clone();
        if query.order_by.is_empty() {
            query = query.order_by(M::primary_key_name(), OrderDirection::Asc);
        }
        query.fetch_one(conn)
    }

    /// The last row under the accumulated order, via a reversed query
    pub fn fetch_last(&self, conn: &SqliteConnection) -> ModelResult<Option<M>> {
        let mut query = self.clone();
        if query.order_by.is_empty() {
            query = query.order_by(M::primary_key_name(), OrderDirection::Desc);
        } else {
            for (_, direction) in &mut query.order_by {
                *direction = direction.reversed();
            }
        }
        query.fetch_one(conn)
    }

    /// Count matching rows without decoding them
    pub fn count(&self, conn: &SqliteConnection) -> ModelResult<i64> {
        let registry = self.effective_registry(conn);
        let compiled = self.compile_count_using(Some(registry))?;
        let (rows, _from_cache) = conn.query_cached(
            &compiled.table,
            &compiled.sql,
            &compiled.params,
            &compiled.fields_signature,
            &compiled.dependencies,
            self.cache.bypass,
            self.cache.ttl,
        )?;
        rows.first()
            .ok_or_else(|| ModelError::Query("count returned no rows".to_string()))?
            .get("n")
    }

    /// Whether any matching row exists
    pub fn exists(&self, conn: &SqliteConnection) -> ModelResult<bool> {
        Ok(self.count(conn)? > 0)
    }

    /// Delete every matching row
    ///
    /// Matching zero rows is a not-found error, never a silent success.
    pub fn delete(&self, conn: &SqliteConnection) -> ModelResult<usize> {
        let compiled = self.compile_delete_using()?;
        let deleted =
            conn.execute_write(&compiled.table, "delete", &compiled.sql, &compiled.params)?;
        if deleted == 0 {
            return Err(ModelError::NotFound(compiled.table));
        }
        Ok(deleted)
    }

    /// Update every matching row with the given field changes
    pub fn update(&self, conn: &SqliteConnection, changes: &[(&str, Value)]) -> ModelResult<usize> {
        let changes: Vec<(String, Value)> = changes
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect();
        let compiled = self.compile_update_using(&changes)?;
        let updated =
            conn.execute_write(&compiled.table, "update", &compiled.sql, &compiled.params)?;
        if updated == 0 {
            return Err(ModelError::NotFound(compiled.table));
        }
        Ok(updated)
    }

    fn effective_registry<'a>(&'a self, conn: &'a SqliteConnection) -> &'a RelationshipRegistry {
        match &self.registry {
            Some(registry) => registry.as_ref(),
            None => conn.registry().as_ref(),
        }
    }
}

impl SqliteConnection {
    /// Start a query over a model, bound to this connection's registry
    pub fn select<M: Model>(&self) -> QueryBuilder<M> {
        QueryBuilder::new().with_registry(self.registry().clone())
    }
}
