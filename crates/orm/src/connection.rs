//! Connection - Synchronous execution context over embedded SQLite
//!
//! Wraps a `rusqlite::Connection` together with the relationship registry and
//! the per-connection query cache. Every statement the engine issues flows
//! through here: reads may be served from the cache, writes evict dependent
//! cache entries before returning.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rusqlite::types::ValueRef;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheStats, QueryCache, QueryCacheConfig};
use crate::error::{ModelError, ModelResult};
use crate::relationships::registry::RelationshipRegistry;

/// Connection lifecycle error types
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to open database at '{path}': {source}")]
    OpenFailed {
        path: String,
        source: rusqlite::Error,
    },

    #[error("Failed to apply connection pragma: {0}")]
    PragmaFailed(rusqlite::Error),

    #[error("Failed to close connection: {0}")]
    CloseFailed(rusqlite::Error),
}

impl From<ConnectionError> for ModelError {
    fn from(err: ConnectionError) -> Self {
        ModelError::Connection(err.to_string())
    }
}

/// A decoded result row: column name to value mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: HashMap<String, Value>,
}

impl Row {
    /// Create a row from a column/value mapping
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Get a typed column value; missing columns and nulls are errors
    pub fn get<T: DeserializeOwned>(&self, column: &str) -> ModelResult<T> {
        let value = self.values.get(column).ok_or_else(|| {
            ModelError::Serialization(format!("column '{}' missing from row", column))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            ModelError::Serialization(format!("column '{}' decode failed: {}", column, e))
        })
    }

    /// Get a typed column value, mapping SQL NULL (or absence) to `None`
    pub fn get_opt<T: DeserializeOwned>(&self, column: &str) -> ModelResult<Option<T>> {
        match self.values.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                ModelError::Serialization(format!("column '{}' decode failed: {}", column, e))
            }),
        }
    }

    /// Raw value for a column, if present
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Whether the row contains the column
    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Column names present in the row
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Project the columns prefixed with `"{path}__"` into a new row with the
    /// prefix stripped; used to hand joined-in related columns to the related
    /// model's decoder.
    pub fn scoped(&self, path: &str) -> Row {
        let prefix = format!("{}__", path);
        let values = self
            .values
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&prefix)
                    .map(|stripped| (stripped.to_string(), v.clone()))
            })
            .collect();
        Row { values }
    }

    /// Whether every value in the row is SQL NULL (an unmatched LEFT JOIN)
    pub fn is_all_null(&self) -> bool {
        !self.values.is_empty() && self.values.values().all(Value::is_null)
    }
}

/// Configuration for opening a connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Busy timeout for contended database files
    pub busy_timeout: Duration,
    /// Whether to enforce foreign key constraints (`PRAGMA foreign_keys`)
    pub enforce_foreign_keys: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            enforce_foreign_keys: true,
        }
    }
}

/// Synchronous connection to an embedded SQLite database
///
/// Not safe for concurrent use from multiple threads without external
/// serialization; the engine assumes at most one logical operation in flight.
pub struct SqliteConnection {
    inner: rusqlite::Connection,
    registry: Arc<RelationshipRegistry>,
    cache: RwLock<QueryCache>,
    queries_executed: AtomicU64,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("queries_executed", &self.queries_executed())
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a database file, applying the default configuration
    pub fn open<P: AsRef<Path>>(
        path: P,
        registry: Arc<RelationshipRegistry>,
    ) -> Result<Self, ConnectionError> {
        let path_display = path.as_ref().display().to_string();
        let inner =
            rusqlite::Connection::open(path).map_err(|source| ConnectionError::OpenFailed {
                path: path_display.clone(),
                source,
            })?;
        debug!(path = %path_display, "opened sqlite database");
        Self::configure(inner, registry, ConnectionConfig::default())
    }

    /// Open a database file with explicit configuration
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        registry: Arc<RelationshipRegistry>,
        config: ConnectionConfig,
    ) -> Result<Self, ConnectionError> {
        let display = path.as_ref().display().to_string();
        let inner =
            rusqlite::Connection::open(path).map_err(|source| ConnectionError::OpenFailed {
                path: display,
                source,
            })?;
        Self::configure(inner, registry, config)
    }

    /// Open an in-memory database
    pub fn open_in_memory(
        registry: Arc<RelationshipRegistry>,
    ) -> Result<Self, ConnectionError> {
        let inner =
            rusqlite::Connection::open_in_memory().map_err(|source| ConnectionError::OpenFailed {
                path: ":memory:".to_string(),
                source,
            })?;
        Self::configure(inner, registry, ConnectionConfig::default())
    }

    fn configure(
        inner: rusqlite::Connection,
        registry: Arc<RelationshipRegistry>,
        config: ConnectionConfig,
    ) -> Result<Self, ConnectionError> {
        inner
            .busy_timeout(config.busy_timeout)
            .map_err(ConnectionError::PragmaFailed)?;
        if config.enforce_foreign_keys {
            inner
                .pragma_update(None, "foreign_keys", true)
                .map_err(ConnectionError::PragmaFailed)?;
        }
        Ok(Self {
            inner,
            registry,
            cache: RwLock::new(QueryCache::new(QueryCacheConfig::default())),
            queries_executed: AtomicU64::new(0),
        })
    }

    /// The relationship registry this connection consults
    pub fn registry(&self) -> &Arc<RelationshipRegistry> {
        &self.registry
    }

    /// Number of statements executed against the store (cache hits excluded)
    pub fn queries_executed(&self) -> u64 {
        self.queries_executed.load(Ordering::Relaxed)
    }

    /// Execute a read statement and decode all result rows
    pub fn query_rows(&self, sql: &str, params: &[Value]) -> ModelResult<Vec<Row>> {
        debug!(sql = sql, "executing query");
        self.queries_executed.fetch_add(1, Ordering::Relaxed);

        let mut stmt = self
            .inner
            .prepare(sql)
            .map_err(|e| ModelError::Query(format!("{}: {}", e, sql)))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let bound = bind_values(params);
        let mut rows = stmt
            .query(rusqlite::params_from_iter(bound))
            .map_err(|e| ModelError::Database(e.to_string()))?;

        let mut decoded = Vec::new();
        while let Some(row) = rows.next().map_err(|e| ModelError::Database(e.to_string()))? {
            let mut values = HashMap::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                let value = row
                    .get_ref(i)
                    .map_err(|e| ModelError::Database(e.to_string()))?;
                values.insert(name.clone(), column_to_value(value));
            }
            decoded.push(Row::new(values));
        }
        Ok(decoded)
    }

    /// Execute a read statement through the query cache
    ///
    /// `dependencies` names every table the result depends on; the entry is
    /// evicted when any of them is written. Returns the rows and whether they
    /// came from the cache.
    pub(crate) fn query_cached(
        &self,
        table: &str,
        sql: &str,
        params: &[Value],
        fields: &str,
        dependencies: &BTreeSet<String>,
        bypass: bool,
        ttl: Option<Duration>,
    ) -> ModelResult<(Vec<Row>, bool)> {
        let enabled = self
            .cache
            .read()
            .map(|c| c.is_enabled())
            .unwrap_or(false);
        if !enabled || bypass {
            return Ok((self.query_rows(sql, params)?, false));
        }

        let signature = QueryCache::signature(table, sql, params, fields);
        if let Ok(mut cache) = self.cache.write() {
            if let Some(rows) = cache.lookup(&signature) {
                return Ok((rows, true));
            }
        }

        let rows = self.query_rows(sql, params)?;
        if let Ok(mut cache) = self.cache.write() {
            cache.store(signature, rows.clone(), dependencies.clone(), ttl);
        }
        Ok((rows, false))
    }

    /// Execute a write statement against `table`
    ///
    /// Translates constraint failures into integrity errors carrying the
    /// table and operation, and synchronously evicts every cache entry
    /// depending on a table the write may touch before returning.
    pub fn execute_write(
        &self,
        table: &str,
        operation: &str,
        sql: &str,
        params: &[Value],
    ) -> ModelResult<usize> {
        debug!(table = table, operation = operation, sql = sql, "executing write");
        self.queries_executed.fetch_add(1, Ordering::Relaxed);

        let bound = bind_values(params);
        let changed = self
            .inner
            .execute(sql, rusqlite::params_from_iter(bound))
            .map_err(|e| translate_write_error(e, table, operation))?;

        let affected = self.registry.write_dependencies(table, operation);
        if let Ok(mut cache) = self.cache.write() {
            for dep in &affected {
                cache.invalidate_table(dep);
            }
        }
        Ok(changed)
    }

    /// Execute raw SQL (DDL, transaction control); bypasses counting and cache
    pub fn execute_batch(&self, sql: &str) -> ModelResult<()> {
        self.inner
            .execute_batch(sql)
            .map_err(|e| ModelError::Database(format!("{}: {}", e, sql)))
    }

    /// Primary key of the most recently inserted row
    pub fn last_insert_rowid(&self) -> i64 {
        self.inner.last_insert_rowid()
    }

    /// Enable the query cache with the given default TTL
    pub fn enable_query_cache(&self, default_ttl: Duration) {
        if let Ok(mut cache) = self.cache.write() {
            cache.enable(default_ttl);
        }
    }

    /// Disable the query cache
    pub fn disable_query_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.disable();
        }
    }

    /// Discard all cached entries; counters are preserved
    pub fn clear_query_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    /// Hit/miss counters for the query cache
    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .read()
            .map(|c| c.stats())
            .unwrap_or_default()
    }

    /// Number of live cache entries
    pub fn cached_queries(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Close the connection, clearing the cache and resetting its counters
    pub fn close(self) -> Result<(), ConnectionError> {
        if let Ok(mut cache) = self.cache.write() {
            cache.reset();
        }
        self.queries_executed.store(0, Ordering::Relaxed);
        match self.inner.close() {
            Ok(()) => Ok(()),
            Err((_conn, err)) => {
                warn!(error = %err, "connection close failed");
                Err(ConnectionError::CloseFailed(err))
            }
        }
    }
}

/// Convert a raw SQLite column value into the engine's value currency
fn column_to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(r) => serde_json::Number::from_f64(r)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

/// Convert bound parameter values into SQLite values
fn bind_values(params: &[Value]) -> Vec<rusqlite::types::Value> {
    params
        .iter()
        .map(|value| match value {
            Value::Null => rusqlite::types::Value::Null,
            Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    rusqlite::types::Value::Integer(i)
                } else {
                    rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => rusqlite::types::Value::Text(s.clone()),
            other => rusqlite::types::Value::Text(other.to_string()),
        })
        .collect()
}

/// Map a store-level write failure into the domain error taxonomy
fn translate_write_error(err: rusqlite::Error, table: &str, operation: &str) -> ModelError {
    if let rusqlite::Error::SqliteFailure(ffi_err, message) = &err {
        if ffi_err.code == rusqlite::ErrorCode::ConstraintViolation {
            return ModelError::Integrity {
                table: table.to_string(),
                operation: operation.to_string(),
                message: message
                    .clone()
                    .unwrap_or_else(|| "constraint violation".to_string()),
            };
        }
    }
    ModelError::Database(format!("{} on '{}' failed: {}", operation, table, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> SqliteConnection {
        let registry = Arc::new(RelationshipRegistry::new());
        SqliteConnection::open_in_memory(registry).unwrap()
    }

    #[test]
    fn test_query_rows_decodes_columns() {
        let conn = test_conn();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL)")
            .unwrap();
        conn.execute_write(
            "t",
            "insert",
            "INSERT INTO t (name, score) VALUES (?, ?)",
            &[Value::from("alpha"), Value::from(1.5)],
        )
        .unwrap();

        let rows = conn.query_rows("SELECT * FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String>("name").unwrap(), "alpha");
        assert_eq!(rows[0].get::<i64>("id").unwrap(), 1);
        assert!(rows[0].get_opt::<String>("missing").unwrap().is_none());
    }

    #[test]
    fn test_query_counter_tracks_statements() {
        let conn = test_conn();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .unwrap();
        assert_eq!(conn.queries_executed(), 0);
        conn.query_rows("SELECT * FROM t", &[]).unwrap();
        conn.query_rows("SELECT * FROM t", &[]).unwrap();
        assert_eq!(conn.queries_executed(), 2);
    }

    #[test]
    fn test_integrity_violation_carries_context() {
        let conn = test_conn();
        conn.execute_batch(
            "CREATE TABLE parents (id INTEGER PRIMARY KEY);
             CREATE TABLE children (
                 id INTEGER PRIMARY KEY,
                 parent_id INTEGER NOT NULL REFERENCES parents(id)
             );",
        )
        .unwrap();

        let err = conn
            .execute_write(
                "children",
                "insert",
                "INSERT INTO children (parent_id) VALUES (?)",
                &[Value::from(99)],
            )
            .unwrap_err();
        match err {
            ModelError::Integrity {
                table, operation, ..
            } => {
                assert_eq!(table, "children");
                assert_eq!(operation, "insert");
            }
            other => panic!("expected integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_row_scoping_strips_prefix() {
        let mut values = HashMap::new();
        values.insert("id".to_string(), Value::from(1));
        values.insert("author__id".to_string(), Value::from(7));
        values.insert("author__name".to_string(), Value::from("b"));
        let row = Row::new(values);

        let scoped = row.scoped("author");
        assert_eq!(scoped.get::<i64>("id").unwrap(), 7);
        assert_eq!(scoped.get::<String>("name").unwrap(), "b");
        assert!(!scoped.contains("author__id"));
    }

    #[test]
    fn test_all_null_row_detection() {
        let mut values = HashMap::new();
        values.insert("id".to_string(), Value::Null);
        values.insert("name".to_string(), Value::Null);
        assert!(Row::new(values).is_all_null());

        let mut values = HashMap::new();
        values.insert("id".to_string(), Value::from(3));
        assert!(!Row::new(values).is_all_null());
    }
}
