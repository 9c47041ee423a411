//! HasOne - Reverse one-to-one accessor

use serde_json::Value;

use crate::connection::SqliteConnection;
use crate::error::{ModelError, ModelResult};
use crate::model::Model;

/// Accessor for the single related row of a one-to-one relationship
#[derive(Debug, Clone)]
pub struct HasOne<T> {
    foreign_key: String,
    owner_key: Value,
    loaded: Option<Option<T>>,
}

impl<T> Default for HasOne<T> {
    fn default() -> Self {
        Self {
            foreign_key: String::new(),
            owner_key: Value::Null,
            loaded: None,
        }
    }
}

impl<T: Model + Clone> HasOne<T> {
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

    /// Fetch the related row; absence is a normal `None`
    pub fn fetch(&self, conn: &SqliteConnection) -> ModelResult<Option<T>> {
        if let Some(loaded) = &self.loaded {
            return Ok(loaded.clone());
        }
        if self.owner_key.is_null() || self.foreign_key.is_empty() {
            return Err(ModelError::Query(format!(
                "'{}' accessor is not bound to a saved row",
                T::table_name()
            )));
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? LIMIT 1",
            T::table_name(),
            self.foreign_key
        );
        let rows = conn.query_rows(&sql, &[self.owner_key.clone()])?;
        match rows.first() {
            Some(row) => Ok(Some(T::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Whether the related row exists
    pub fn exists(&self, conn: &SqliteConnection) -> ModelResult<bool> {
        Ok(self.fetch(conn)?.is_some())
    }

    /// Install a prefetched view
    pub fn set_loaded(&mut self, row: Option<T>) {
        self.loaded = Some(row);
    }

    /// Drop the prefetched view
    pub fn invalidate_loaded(&mut self) {
        self.loaded = None;
    }
}
