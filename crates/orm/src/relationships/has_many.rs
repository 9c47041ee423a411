//! HasMany - Reverse one-to-many accessor
//!
//! Bound to the owning row's key and the foreign key column on the related
//! table. Reads are served from an attached prefetch view when one is
//! present; otherwise each read queries the store.

use serde_json::Value;

use crate::connection::SqliteConnection;
use crate::error::{ModelError, ModelResult};
use crate::model::Model;
use crate::query::builder::QueryBuilder;

/// Accessor for the many side of a one-to-many relationship
#[derive(Debug, Clone)]
pub struct HasMany<T> {
    foreign_key: String,
    owner_key: Value,
    loaded: Option<Vec<T>>,
}

impl<T> Default for HasMany<T> {
    fn default() -> Self {
        Self {
            foreign_key: String::new(),
            owner_key: Value::Null,
            loaded: None,
        }
    }
}

impl<T: Model + Clone> HasMany<T> {
    /// Create an accessor over the given foreign key column
    pub fn new(foreign_key: &str) -> Self {
        Self {
            foreign_key: foreign_key.to_string(),
            owner_key: Value::Null,
            loaded: None,
        }
    }

    /// Bind the accessor to the owning row's key
    pub fn bind(mut self, owner_key: Value) -> Self {
        self.owner_key = owner_key;
        self
    }

    /// Fetch all related rows, ordered by primary key
    pub fn fetch_all(&self, conn: &SqliteConnection) -> ModelResult<Vec<T>> {
        if let Some(loaded) = &self.loaded {
            return Ok(loaded.clone());
        }
        let owner = self.require_owner()?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {}",
            T::table_name(),
            self.foreign_key,
            T::primary_key_name()
        );
        let rows = conn.query_rows(&sql, &[owner])?;
        rows.iter().map(T::from_row).collect()
    }

    /// Fetch the first related row, if any
    pub fn fetch_one(&self, conn: &SqliteConnection) -> ModelResult<Option<T>> {
        if let Some(loaded) = &self.loaded {
            return Ok(loaded.first().cloned());
        }
        let owner = self.require_owner()?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} LIMIT 1",
            T::table_name(),
            self.foreign_key,
            T::primary_key_name()
        );
        let rows = conn.query_rows(&sql, &[owner])?;
        match rows.first() {
            Some(row) => Ok(Some(T::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Count related rows without decoding them
    pub fn count(&self, conn: &SqliteConnection) -> ModelResult<i64> {
        if let Some(loaded) = &self.loaded {
            return Ok(loaded.len() as i64);
        }
        let owner = self.require_owner()?;
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE {} = ?",
            T::table_name(),
            self.foreign_key
        );
        let rows = conn.query_rows(&sql, &[owner])?;
        rows.first()
            .ok_or_else(|| ModelError::Query("count returned no rows".to_string()))?
            .get("n")
    }

    /// Whether any related row exists
    pub fn exists(&self, conn: &SqliteConnection) -> ModelResult<bool> {
        if let Some(loaded) = &self.loaded {
            return Ok(!loaded.is_empty());
        }
        Ok(self.count(conn)? > 0)
    }

    /// A query builder restricted to the related set
    pub fn filter(&self) -> ModelResult<QueryBuilder<T>> {
        let owner = self.require_owner()?;
        Ok(QueryBuilder::new().where_eq(&self.foreign_key, owner))
    }

    /// Install a prefetched view; later reads are served from it
    pub fn set_loaded(&mut self, rows: Vec<T>) {
        self.loaded = Some(rows);
    }

    /// The prefetched view, if one is attached
    pub fn loaded(&self) -> Option<&[T]> {
        self.loaded.as_deref()
    }

    /// Drop the prefetched view; the next read queries the store
    pub fn invalidate_loaded(&mut self) {
        self.loaded = None;
    }

    fn require_owner(&self) -> ModelResult<Value> {
        if self.owner_key.is_null() || self.foreign_key.is_empty() {
            return Err(ModelError::Query(format!(
                "'{}' accessor is not bound to a saved row",
                T::table_name()
            )));
        }
        Ok(self.owner_key.clone())
    }
}
