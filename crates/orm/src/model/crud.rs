//! CRUD extension methods over `Model`
//!
//! Row-level insert/update/delete/find. All writes flow through the
//! connection's write path so dependent cache entries are evicted before the
//! call returns.

use chrono::Utc;
use serde_json::Value;

use crate::connection::SqliteConnection;
use crate::error::{ModelError, ModelResult};
use crate::model::Model;

/// Row-level persistence operations, implemented for every model
pub trait ModelCrud: Model {
    /// Insert this instance as a new row
    ///
    /// A missing primary key is assigned from the store's generated rowid.
    fn insert(&mut self, conn: &SqliteConnection) -> ModelResult<()> {
        if Self::uses_timestamps() {
            let now = Utc::now();
            self.set_created_at(now);
            self.set_updated_at(now);
        }

        let fields = self.to_fields();
        let had_key = self.primary_key().is_some();
        let mut columns: Vec<&String> = fields
            .keys()
            .filter(|col| had_key || col.as_str() != Self::primary_key_name())
            .collect();
        columns.sort_unstable();

        let placeholders = vec!["?"; columns.len()].join(", ");
        let column_list = columns
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            Self::table_name(),
            column_list,
            placeholders
        );
        let params: Vec<Value> = columns
            .iter()
            .map(|col| fields.get(*col).cloned().unwrap_or(Value::Null))
            .collect();

        conn.execute_write(Self::table_name(), "insert", &sql, &params)?;

        if !had_key {
            let rowid = conn.last_insert_rowid();
            if let Ok(key) = serde_json::from_value(Value::from(rowid)) {
                self.set_primary_key(key);
            }
        }
        Ok(())
    }

    /// Update the row matching this instance's primary key
    ///
    /// A zero-row match is a not-found error, never a silent success.
    fn update(&mut self, conn: &SqliteConnection) -> ModelResult<()> {
        let key = self.require_key("update")?;
        if Self::uses_timestamps() {
            self.set_updated_at(Utc::now());
        }

        let fields = self.to_fields();
        let mut columns: Vec<&String> = fields
            .keys()
            .filter(|col| col.as_str() != Self::primary_key_name())
            .collect();
        columns.sort_unstable();

        let assignments = columns
            .iter()
            .map(|col| format!("{} = ?", col))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            Self::table_name(),
            assignments,
            Self::primary_key_name()
        );
        let mut params: Vec<Value> = columns
            .iter()
            .map(|col| fields.get(*col).cloned().unwrap_or(Value::Null))
            .collect();
        params.push(key);

        let changed = conn.execute_write(Self::table_name(), "update", &sql, &params)?;
        if changed == 0 {
            return Err(ModelError::NotFound(Self::table_name().to_string()));
        }
        Ok(())
    }

    /// Delete the row matching this instance's primary key
    fn delete(&self, conn: &SqliteConnection) -> ModelResult<()> {
        let key = self.require_key("delete")?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            Self::table_name(),
            Self::primary_key_name()
        );
        let changed = conn.execute_write(Self::table_name(), "delete", &sql, &[key])?;
        if changed == 0 {
            return Err(ModelError::NotFound(Self::table_name().to_string()));
        }
        Ok(())
    }

    /// Load a row by primary key; absence is a normal `None`
    fn find(conn: &SqliteConnection, key: &Self::PrimaryKey) -> ModelResult<Option<Self>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? LIMIT 1",
            Self::table_name(),
            Self::primary_key_name()
        );
        let param = serde_json::to_value(key)?;
        let rows = conn.query_rows(&sql, &[param])?;
        match rows.first() {
            Some(row) => Ok(Some(Self::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Load a row by primary key or fail with not-found
    fn find_or_fail(conn: &SqliteConnection, key: &Self::PrimaryKey) -> ModelResult<Self> {
        Self::find(conn, key)?.ok_or_else(|| ModelError::NotFound(Self::table_name().to_string()))
    }

    #[doc(hidden)]
    fn require_key(&self, operation: &str) -> ModelResult<Value> {
        match self.primary_key() {
            Some(key) => serde_json::to_value(key).map_err(ModelError::from),
            None => Err(ModelError::Query(format!(
                "cannot {} '{}' without a primary key",
                operation,
                Self::table_name()
            ))),
        }
    }
}

impl<M: Model> ModelCrud for M {}
