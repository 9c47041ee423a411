//! Lazy Forward-Relationship Proxy - Deferred loading of belongs_to targets
//!
//! A `BelongsTo<T>` stands in for a related record that has not been loaded
//! yet. The first dereference performs exactly one point lookup through the
//! connection; later dereferences reuse the resolved value. Equality is
//! defined over resolved values, never over proxy identity, and the type
//! deliberately implements no `Hash` — it must not be used as a map or set
//! key.

use serde_json::Value;
use tracing::debug;

use crate::connection::{Row, SqliteConnection};
use crate::error::{ModelError, ModelResult};
use crate::model::Model;

/// Resolution state of a forward relationship
#[derive(Debug, Clone)]
enum LazyState<T> {
    /// The foreign key is null
    Null,
    /// The foreign key is known but the target row has not been loaded
    Unresolved(Value),
    /// The target row has been loaded and cached
    Resolved { key: Value, value: Box<T> },
}

/// Lazy proxy for a forward foreign-key relationship
#[derive(Debug, Clone)]
pub struct BelongsTo<T> {
    state: LazyState<T>,
    nullable: bool,
}

impl<T> Default for BelongsTo<T> {
    fn default() -> Self {
        Self {
            state: LazyState::Null,
            nullable: true,
        }
    }
}

impl<T: Model> BelongsTo<T> {
    /// Create a proxy from a foreign key value; `Value::Null` means unset
    pub fn from_key(key: Value, nullable: bool) -> Self {
        let state = if key.is_null() {
            LazyState::Null
        } else {
            LazyState::Unresolved(key)
        };
        Self { state, nullable }
    }

    /// Create a proxy already holding a loaded instance
    pub fn from_instance(value: T) -> ModelResult<Self> {
        let key = value.primary_key_value()?;
        Ok(Self {
            state: LazyState::Resolved {
                key,
                value: Box::new(value),
            },
            nullable: false,
        })
    }

    /// The stored foreign key, if any
    pub fn key(&self) -> Option<&Value> {
        match &self.state {
            LazyState::Null => None,
            LazyState::Unresolved(key) | LazyState::Resolved { key, .. } => Some(key),
        }
    }

    /// Whether the foreign key is null
    pub fn is_null(&self) -> bool {
        matches!(self.state, LazyState::Null)
    }

    /// Whether the target has been loaded
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, LazyState::Resolved { .. })
    }

    /// Dereference the relationship, loading the target on first access
    ///
    /// A null foreign key is an error here; callers expecting null should use
    /// [`try_get`](Self::try_get).
    pub fn get(&mut self, conn: &SqliteConnection) -> ModelResult<&T> {
        self.resolve(conn)?;
        match &self.state {
            LazyState::Resolved { value, .. } => Ok(value),
            LazyState::Null => Err(ModelError::NullRelationship(format!(
                "'{}' relationship is null",
                T::table_name()
            ))),
            LazyState::Unresolved(_) => Err(ModelError::Query(format!(
                "'{}' relationship failed to resolve",
                T::table_name()
            ))),
        }
    }

    /// Dereference the relationship, mapping a null key to `None`
    pub fn try_get(&mut self, conn: &SqliteConnection) -> ModelResult<Option<&T>> {
        if self.is_null() {
            return Ok(None);
        }
        self.get(conn).map(Some)
    }

    /// The cached value, when already resolved
    pub fn resolved(&self) -> Option<&T> {
        match &self.state {
            LazyState::Resolved { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Mutable access to the cached value, for nested hydration
    pub fn resolved_mut(&mut self) -> Option<&mut T> {
        match &mut self.state {
            LazyState::Resolved { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Point the relationship at a model instance, extracting its key
    pub fn set_instance(&mut self, value: T) -> ModelResult<()> {
        let key = value.primary_key_value()?;
        if key.is_null() {
            return Err(ModelError::Query(format!(
                "related '{}' instance has no primary key",
                T::table_name()
            )));
        }
        self.state = LazyState::Resolved {
            key,
            value: Box::new(value),
        };
        Ok(())
    }

    /// Point the relationship at a raw identifier
    ///
    /// A changed identifier discards any cached resolved value. Identifiers
    /// must be numbers or strings; anything else is rejected.
    pub fn set_key(&mut self, key: Value) -> ModelResult<()> {
        if key.is_null() {
            return self.set_null();
        }
        if !key.is_number() && !key.is_string() {
            return Err(ModelError::Query(format!(
                "invalid foreign key value for '{}': {}",
                T::table_name(),
                key
            )));
        }
        let unchanged = self.key() == Some(&key);
        if !unchanged {
            self.state = LazyState::Unresolved(key);
        }
        Ok(())
    }

    /// Clear the relationship; only permitted on nullable edges
    pub fn set_null(&mut self) -> ModelResult<()> {
        if !self.nullable {
            return Err(ModelError::Configuration(format!(
                "relationship to '{}' is not nullable",
                T::table_name()
            )));
        }
        self.state = LazyState::Null;
        Ok(())
    }

    /// Install an eagerly loaded value without touching the store
    pub fn set_resolved(&mut self, value: T) -> ModelResult<()> {
        let key = value.primary_key_value()?;
        self.state = LazyState::Resolved {
            key,
            value: Box::new(value),
        };
        Ok(())
    }

    /// Hydrate from joined-in columns; an all-null row means an unmatched
    /// LEFT JOIN and leaves the relationship null
    pub fn hydrate(&mut self, row: &Row) -> ModelResult<()> {
        if row.is_all_null() {
            self.state = LazyState::Null;
            return Ok(());
        }
        self.set_resolved(T::from_row(row)?)
    }

    /// Value equality, loading both sides if necessary
    ///
    /// Two proxies with null keys are equal.
    pub fn eq_with(
        &mut self,
        other: &mut BelongsTo<T>,
        conn: &SqliteConnection,
    ) -> ModelResult<bool>
    where
        T: PartialEq,
    {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ok(true),
            (true, false) | (false, true) => Ok(false),
            (false, false) => Ok(self.get(conn)? == other.get(conn)?),
        }
    }

    fn resolve(&mut self, conn: &SqliteConnection) -> ModelResult<()> {
        let key = match &self.state {
            LazyState::Unresolved(key) => key.clone(),
            _ => return Ok(()),
        };
        debug!(table = T::table_name(), "resolving lazy relationship");
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? LIMIT 1",
            T::table_name(),
            T::primary_key_name()
        );
        let rows = conn.query_rows(&sql, &[key.clone()])?;
        let row = rows
            .first()
            .ok_or_else(|| ModelError::NotFound(T::table_name().to_string()))?;
        self.state = LazyState::Resolved {
            key,
            value: Box::new(T::from_row(row)?),
        };
        Ok(())
    }
}
