//! Model - Base trait for records mapped onto tables
//!
//! The validation/schema layer external to this engine is responsible for
//! declaring fields and coercing types; the engine only needs to read the
//! table metadata, construct instances from row mappings, and hand
//! relationship data to instances through the hydration hooks.

pub mod crud;

pub use crud::ModelCrud;

use std::collections::HashMap;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::connection::Row;
use crate::error::{ModelError, ModelResult};
use crate::loading::PrefetchPayload;
use crate::relationships::metadata::RelationshipMetadata;

/// Core trait for database models
pub trait Model: Debug + Sized + Serialize + for<'de> serde::Deserialize<'de> {
    /// The type used for this model's primary key
    type PrimaryKey: Clone + Debug + PartialEq + Serialize + DeserializeOwned;

    /// Table name for this model
    fn table_name() -> &'static str;

    /// Model type name, used for default reverse accessor naming
    fn model_name() -> &'static str {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("model")
    }

    /// Primary key column name
    fn primary_key_name() -> &'static str {
        "id"
    }

    /// All column names on the mapped table, in declaration order
    fn columns() -> &'static [&'static str];

    /// Relationship edges owned by this model
    fn relationships() -> Vec<RelationshipMetadata> {
        Vec::new()
    }

    /// Get the primary key value for this instance
    fn primary_key(&self) -> Option<Self::PrimaryKey>;

    /// Set the primary key value for this instance
    fn set_primary_key(&mut self, key: Self::PrimaryKey);

    /// Check if this model maintains created_at/updated_at columns
    fn uses_timestamps() -> bool {
        false
    }

    /// Set created_at timestamp
    fn set_created_at(&mut self, _timestamp: DateTime<Utc>) {}

    /// Set updated_at timestamp
    fn set_updated_at(&mut self, _timestamp: DateTime<Utc>) {}

    /// Construct an instance from a decoded row mapping
    fn from_row(row: &Row) -> ModelResult<Self>;

    /// Convert the instance to column/value pairs for writes
    fn to_fields(&self) -> HashMap<String, Value>;

    /// Receive joined-in related columns for an eager-load path
    ///
    /// Models with forward relationships override this with a match on their
    /// relationship names; the default rejects every path.
    fn apply_eager(&mut self, path: &str, _row: &Row) -> ModelResult<()> {
        Err(ModelError::InvalidPath(format!(
            "model '{}' has no eager-loadable relationship '{}'",
            Self::model_name(),
            path
        )))
    }

    /// Receive batched rows for a prefetch path
    ///
    /// Models with reverse or many-to-many relationships override this; the
    /// default rejects every path.
    fn apply_prefetch(&mut self, payload: &PrefetchPayload<'_>) -> ModelResult<()> {
        Err(ModelError::InvalidPath(format!(
            "model '{}' has no prefetchable relationship '{}'",
            Self::model_name(),
            payload.relation()
        )))
    }

    /// The primary key rendered as a parameter value
    fn primary_key_value(&self) -> ModelResult<Value> {
        match self.primary_key() {
            Some(key) => serde_json::to_value(key).map_err(ModelError::from),
            None => Ok(Value::Null),
        }
    }
}
