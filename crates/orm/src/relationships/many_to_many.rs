//! ManyToMany - Junction-table relationship manager
//!
//! Mediates membership operations against the junction table implied by a
//! many-to-many edge. A pair is stored at most once; for a symmetric
//! self-relationship one normalized row represents both directions, and
//! membership queries match both column orders so either side sees the same
//! result.

use serde_json::Value;
use tracing::debug;

use crate::connection::SqliteConnection;
use crate::error::{ModelError, ModelResult};
use crate::model::Model;
use crate::query::builder::QueryBuilder;
use crate::relationships::metadata::JunctionConfig;
use crate::relationships::registry::ReverseAccessor;

use super::metadata::RelationshipMetadata;

/// Accessor and write surface for a many-to-many relationship
#[derive(Debug, Clone)]
pub struct ManyToMany<T> {
    junction: JunctionConfig,
    symmetric: bool,
    owner_key: Value,
    loaded: Option<Vec<T>>,
}

impl<T> Default for ManyToMany<T> {
    fn default() -> Self {
        Self {
            junction: JunctionConfig::new(String::new(), String::new(), String::new()),
            symmetric: false,
            owner_key: Value::Null,
            loaded: None,
        }
    }
}

impl<T: Model + Clone> ManyToMany<T> {
    /// Create a manager over an explicit junction configuration
    pub fn new(junction: JunctionConfig, symmetric: bool) -> Self {
        Self {
            junction,
            symmetric,
            owner_key: Value::Null,
            loaded: None,
        }
    }

    /// Create a manager from a forward many-to-many edge
    pub fn from_edge(edge: &RelationshipMetadata) -> ModelResult<Self> {
        let junction = edge.junction_or_default().ok_or_else(|| {
            ModelError::Configuration(format!(
                "relationship '{}' is not many-to-many",
                edge.name
            ))
        })?;
        Ok(Self::new(junction, edge.symmetric))
    }

    /// Create a manager from the reverse side of a many-to-many edge
    pub fn from_accessor(accessor: &ReverseAccessor) -> ModelResult<Self> {
        let junction = accessor.junction.clone().ok_or_else(|| {
            ModelError::Configuration(format!(
                "reverse accessor '{}' is not many-to-many",
                accessor.name
            ))
        })?;
        Ok(Self::new(junction, false))
    }

    /// Bind the manager to the owning row's key
    pub fn bind(mut self, owner_key: Value) -> Self {
        self.owner_key = owner_key;
        self
    }

    /// Link the given instances, ignoring pairs that already exist
    ///
    /// Returns the number of junction rows actually inserted. Any attached
    /// prefetch view is dropped.
    pub fn add(&mut self, conn: &SqliteConnection, others: &[&T]) -> ModelResult<usize> {
        let owner = self.require_owner()?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?, ?)",
            self.junction.table, self.junction.local_column, self.junction.remote_column
        );
        let mut inserted = 0;
        for other in others.iter().copied() {
            let other_key = require_key(other)?;
            let (a, b) = self.pair(owner.clone(), other_key);
            inserted += conn.execute_write(&self.junction.table, "insert", &sql, &[a, b])?;
        }
        debug!(table = %self.junction.table, inserted = inserted, "linked pairs");
        self.loaded = None;
        Ok(inserted)
    }

    /// Unlink the given instances; a missing pair is a no-op
    pub fn remove(&mut self, conn: &SqliteConnection, others: &[&T]) -> ModelResult<usize> {
        let owner = self.require_owner()?;
        let sql = if self.symmetric {
            format!(
                "DELETE FROM {} WHERE ({local} = ? AND {remote} = ?) OR ({remote} = ? AND {local} = ?)",
                self.junction.table,
                local = self.junction.local_column,
                remote = self.junction.remote_column
            )
        } else {
            format!(
                "DELETE FROM {} WHERE {} = ? AND {} = ?",
                self.junction.table, self.junction.local_column, self.junction.remote_column
            )
        };
        let mut removed = 0;
        for other in others.iter().copied() {
            let other_key = require_key(other)?;
            let params: Vec<Value> = if self.symmetric {
                vec![
                    owner.clone(),
                    other_key.clone(),
                    owner.clone(),
                    other_key,
                ]
            } else {
                vec![owner.clone(), other_key]
            };
            removed += conn.execute_write(&self.junction.table, "delete", &sql, &params)?;
        }
        self.loaded = None;
        Ok(removed)
    }

    /// Unlink every pair involving the owning row
    pub fn clear(&mut self, conn: &SqliteConnection) -> ModelResult<usize> {
        let owner = self.require_owner()?;
        let (sql, params): (String, Vec<Value>) = if self.symmetric {
            (
                format!(
                    "DELETE FROM {} WHERE {} = ? OR {} = ?",
                    self.junction.table, self.junction.local_column, self.junction.remote_column
                ),
                vec![owner.clone(), owner],
            )
        } else {
            (
                format!(
                    "DELETE FROM {} WHERE {} = ?",
                    self.junction.table, self.junction.local_column
                ),
                vec![owner],
            )
        };
        let removed = conn.execute_write(&self.junction.table, "delete", &sql, &params)?;
        self.loaded = None;
        Ok(removed)
    }

    /// Replace the full membership atomically
    pub fn set(&mut self, conn: &SqliteConnection, others: &[&T]) -> ModelResult<()> {
        let tx = conn.transaction()?;
        self.clear(conn)?;
        self.add(conn, others)?;
        tx.commit()
    }

    /// Fetch all related rows through the junction, ordered by primary key
    pub fn fetch_all(&self, conn: &SqliteConnection) -> ModelResult<Vec<T>> {
        if let Some(loaded) = &self.loaded {
            return Ok(loaded.clone());
        }
        let (sql, params) = self.join_query("r.*", "")?;
        let rows = conn.query_rows(&sql, &params)?;
        rows.iter().map(T::from_row).collect()
    }

    /// Fetch the first related row, if any
    pub fn fetch_one(&self, conn: &SqliteConnection) -> ModelResult<Option<T>> {
        if let Some(loaded) = &self.loaded {
            return Ok(loaded.first().cloned());
        }
        let (sql, params) = self.join_query("r.*", " LIMIT 1")?;
        let rows = conn.query_rows(&sql, &params)?;
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
        let (sql, params) = self.count_query()?;
        let rows = conn.query_rows(&sql, &params)?;
        rows.first()
            .ok_or_else(|| ModelError::Query("count returned no rows".to_string()))?
            .get("n")
    }

    /// Whether any related row exists
    pub fn exists(&self, conn: &SqliteConnection) -> ModelResult<bool> {
        Ok(self.count(conn)? > 0)
    }

    /// A query builder restricted to the related set
    pub fn filter(&self) -> ModelResult<QueryBuilder<T>> {
        let owner = self.require_owner()?;
        let (sub_sql, params) = if self.symmetric {
            (
                format!(
                    "SELECT {remote} FROM {table} WHERE {local} = ? UNION SELECT {local} FROM {table} WHERE {remote} = ?",
                    table = self.junction.table,
                    local = self.junction.local_column,
                    remote = self.junction.remote_column
                ),
                vec![owner.clone(), owner],
            )
        } else {
            (
                format!(
                    "SELECT {} FROM {} WHERE {} = ?",
                    self.junction.remote_column, self.junction.table, self.junction.local_column
                ),
                vec![owner],
            )
        };
        Ok(QueryBuilder::new().where_in_subquery(T::primary_key_name(), &sub_sql, params))
    }

    /// Install a prefetched view; later reads are served from it
    pub fn set_loaded(&mut self, rows: Vec<T>) {
        self.loaded = Some(rows);
    }

    /// The prefetched view, if one is attached
    pub fn loaded(&self) -> Option<&[T]> {
        self.loaded.as_deref()
    }

    fn join_query(&self, select: &str, suffix: &str) -> ModelResult<(String, Vec<Value>)> {
        let owner = self.require_owner()?;
        if self.symmetric {
            let sql = format!(
                "SELECT {select} FROM {related} r INNER JOIN {table} j \
                 ON (j.{local} = ? AND j.{remote} = r.{pk}) OR (j.{remote} = ? AND j.{local} = r.{pk}) \
                 ORDER BY r.{pk}{suffix}",
                select = select,
                related = T::table_name(),
                table = self.junction.table,
                local = self.junction.local_column,
                remote = self.junction.remote_column,
                pk = T::primary_key_name(),
                suffix = suffix
            );
            Ok((sql, vec![owner.clone(), owner]))
        } else {
            let sql = format!(
                "SELECT {select} FROM {related} r INNER JOIN {table} j \
                 ON j.{remote} = r.{pk} WHERE j.{local} = ? ORDER BY r.{pk}{suffix}",
                select = select,
                related = T::table_name(),
                table = self.junction.table,
                local = self.junction.local_column,
                remote = self.junction.remote_column,
                pk = T::primary_key_name(),
                suffix = suffix
            );
            Ok((sql, vec![owner]))
        }
    }

    fn count_query(&self) -> ModelResult<(String, Vec<Value>)> {
        let owner = self.require_owner()?;
        if self.symmetric {
            let sql = format!(
                "SELECT COUNT(*) AS n FROM {table} j WHERE j.{local} = ? OR j.{remote} = ?",
                table = self.junction.table,
                local = self.junction.local_column,
                remote = self.junction.remote_column
            );
            Ok((sql, vec![owner.clone(), owner]))
        } else {
            let sql = format!(
                "SELECT COUNT(*) AS n FROM {table} j WHERE j.{local} = ?",
                table = self.junction.table,
                local = self.junction.local_column
            );
            Ok((sql, vec![owner]))
        }
    }

    /// Normalize a symmetric pair so one stored row covers both directions
    fn pair(&self, owner: Value, other: Value) -> (Value, Value) {
        if self.symmetric && key_order(&other, &owner) {
            (other, owner)
        } else {
            (owner, other)
        }
    }

    fn require_owner(&self) -> ModelResult<Value> {
        if self.owner_key.is_null() || self.junction.table.is_empty() {
            return Err(ModelError::Query(format!(
                "'{}' accessor is not bound to a saved row",
                T::table_name()
            )));
        }
        Ok(self.owner_key.clone())
    }
}

/// Strict ordering over key values: numbers numerically, otherwise by their
/// rendered form
fn key_order(a: &Value, b: &Value) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x < y,
        _ => a.to_string() < b.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_numeric_before_lexicographic() {
        assert!(key_order(&Value::from(2), &Value::from(10)));
        assert!(!key_order(&Value::from(10), &Value::from(2)));
        assert!(key_order(&Value::from("a"), &Value::from("b")));
    }
}

fn require_key<T: Model>(value: &T) -> ModelResult<Value> {
    let key = value.primary_key_value()?;
    if key.is_null() {
        return Err(ModelError::Query(format!(
            "related '{}' instance has no primary key",
            T::table_name()
        )));
    }
    Ok(key)
}
