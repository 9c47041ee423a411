//! Relationship Registry - Process-wide metadata storage with deferred
//! forward-reference resolution
//!
//! Edges naming a table that has not registered yet are held pending and
//! flushed when that table registers. Registration validates everything it is
//! about to change before touching any registry state, so a configuration
//! error never leaves a partial registration behind.

use std::collections::BTreeSet;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{ModelError, ModelResult};
use crate::model::Model;
use super::metadata::{pluralize, JunctionConfig, RelationshipKind, RelationshipMetadata};

/// Table-level description of a registered model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    /// The model's type name (e.g. "Author")
    pub model_name: String,
    /// The table the model maps to
    pub table_name: String,
    /// Primary key column name
    pub primary_key: String,
    /// All column names, in declaration order
    pub columns: Vec<String>,
}

/// A reverse accessor installed on the target of a forward edge
#[derive(Debug, Clone, PartialEq)]
pub struct ReverseAccessor {
    /// Accessor name on the target model
    pub name: String,
    /// How the accessor resolves (has_one, has_many, or many_to_many)
    pub kind: RelationshipKind,
    /// Table owning the forward edge
    pub source_table: String,
    /// Foreign key column on the source table (empty for many-to-many)
    pub foreign_key: String,
    /// Junction seen from the target's side, for many-to-many edges
    pub junction: Option<JunctionConfig>,
    /// Name of the forward edge this accessor mirrors
    pub edge_name: String,
}

/// Registry mapping tables to models and models to their relationship edges
#[derive(Debug, Default)]
pub struct RelationshipRegistry {
    /// table name -> model info
    models: DashMap<String, ModelInfo>,

    /// owning table -> outgoing edges
    edges: DashMap<String, Vec<RelationshipMetadata>>,

    /// target table -> reverse accessors installed on it
    reverse: DashMap<String, Vec<ReverseAccessor>>,

    /// awaited table name -> edges waiting for it to register
    pending: DashMap<String, Vec<RelationshipMetadata>>,
}

impl RelationshipRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model type together with its declared edges
    pub fn register_model<M: Model>(&self) -> ModelResult<()> {
        let info = ModelInfo {
            model_name: M::model_name().to_string(),
            table_name: M::table_name().to_string(),
            primary_key: M::primary_key_name().to_string(),
            columns: M::columns().iter().map(|c| c.to_string()).collect(),
        };
        self.register(info, M::relationships())
    }

    /// Register a model's table mapping and edges
    ///
    /// Also flushes any pending edges whose forward reference names this
    /// table. All validation happens before any state is committed.
    pub fn register(&self, info: ModelInfo, edges: Vec<RelationshipMetadata>) -> ModelResult<()> {
        if self.models.contains_key(&info.table_name) {
            return Err(ModelError::Configuration(format!(
                "table '{}' is already registered",
                info.table_name
            )));
        }

        let mut edges = edges;
        for edge in &mut edges {
            if edge.local_table.is_empty() {
                edge.local_table = info.table_name.clone();
            } else if edge.local_table != info.table_name {
                return Err(ModelError::Configuration(format!(
                    "edge '{}' declares owning table '{}' but is registered under '{}'",
                    edge.name, edge.local_table, info.table_name
                )));
            }
            edge.validate()?;
        }

        // Edges previously parked on this table's name become resolvable now.
        let flushed: Vec<RelationshipMetadata> = self
            .pending
            .get(&info.table_name)
            .map(|p| p.value().clone())
            .unwrap_or_default();

        // Prospective reverse accessors: from this model's own resolvable
        // edges and from the flushed ones. Validate the whole batch against
        // existing accessors before committing anything.
        let mut prospective: Vec<(String, ReverseAccessor)> = Vec::new();
        for edge in &edges {
            let resolvable =
                edge.related_table == info.table_name || self.models.contains_key(&edge.related_table);
            if resolvable {
                if let Some(accessor) = self.reverse_accessor_for(edge, &info.model_name)? {
                    prospective.push((edge.related_table.clone(), accessor));
                }
            }
        }
        for edge in &flushed {
            let owner = self.owner_model_name(&edge.local_table);
            if let Some(accessor) = self.reverse_accessor_for(edge, &owner)? {
                prospective.push((info.table_name.clone(), accessor));
            }
        }
        self.check_reverse_collisions(&prospective)?;

        // Commit.
        debug!(table = %info.table_name, edges = edges.len(), "registering model");
        let table_name = info.table_name.clone();
        self.models.insert(table_name.clone(), info);
        for edge in edges {
            let resolvable =
                edge.related_table == table_name || self.models.contains_key(&edge.related_table);
            if !resolvable {
                self.pending
                    .entry(edge.related_table.clone())
                    .or_default()
                    .push(edge.clone());
            }
            self.edges.entry(table_name.clone()).or_default().push(edge);
        }
        for (target, accessor) in prospective {
            self.reverse.entry(target).or_default().push(accessor);
        }
        self.pending.remove(&table_name);
        Ok(())
    }

    /// Register a single edge after its owning model
    pub fn register_edge(&self, edge: RelationshipMetadata) -> ModelResult<()> {
        if edge.local_table.is_empty() {
            return Err(ModelError::Configuration(format!(
                "edge '{}' must name its owning table",
                edge.name
            )));
        }
        edge.validate()?;

        let resolvable = self.models.contains_key(&edge.related_table);
        if resolvable {
            self.add_reverse_accessor(&edge)?;
        } else {
            self.pending
                .entry(edge.related_table.clone())
                .or_default()
                .push(edge.clone());
        }
        self.edges
            .entry(edge.local_table.clone())
            .or_default()
            .push(edge);
        Ok(())
    }

    /// Install the reverse accessor implied by a forward edge
    ///
    /// Called for each edge as it links; symmetric self-referential
    /// many-to-many edges install nothing. Collisions with an existing
    /// accessor name are a configuration error and leave the registry
    /// untouched.
    pub fn add_reverse_accessor(&self, edge: &RelationshipMetadata) -> ModelResult<()> {
        if edge.local_table.is_empty() {
            return Err(ModelError::Configuration(format!(
                "edge '{}' must name its owning table",
                edge.name
            )));
        }
        let owner = self.owner_model_name(&edge.local_table);
        let Some(accessor) = self.reverse_accessor_for(edge, &owner)? else {
            return Ok(());
        };
        let prospective = vec![(edge.related_table.clone(), accessor)];
        self.check_reverse_collisions(&prospective)?;
        for (target, accessor) in prospective {
            self.reverse.entry(target).or_default().push(accessor);
        }
        Ok(())
    }

    /// Resolve a table name to its registered model info
    pub fn resolve(&self, table: &str) -> Option<ModelInfo> {
        self.models.get(table).map(|m| m.value().clone())
    }

    /// All outgoing edges owned by a table
    pub fn edges_for(&self, table: &str) -> Vec<RelationshipMetadata> {
        self.edges
            .get(table)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// All reverse accessors installed on a table
    pub fn reverse_for(&self, table: &str) -> Vec<ReverseAccessor> {
        self.reverse
            .get(table)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Look up an owned edge by name
    pub fn owned_edge(&self, table: &str, name: &str) -> Option<RelationshipMetadata> {
        self.edges
            .get(table)
            .and_then(|edges| edges.iter().find(|e| e.name == name).cloned())
    }

    /// Look up a forward (belongs_to) edge by name
    pub fn forward_edge(&self, table: &str, name: &str) -> Option<RelationshipMetadata> {
        self.owned_edge(table, name)
            .filter(|e| e.kind.is_forward())
    }

    /// Look up a reverse accessor by name
    pub fn reverse_accessor(&self, table: &str, name: &str) -> Option<ReverseAccessor> {
        self.reverse
            .get(table)
            .and_then(|accessors| accessors.iter().find(|a| a.name == name).cloned())
    }

    /// Number of edges still waiting for their target table to register
    pub fn pending_edges(&self) -> usize {
        self.pending.iter().map(|p| p.len()).sum()
    }

    /// Tables whose cached query results a write to `table` may stale
    ///
    /// Always includes the written table itself. Deletes add the transitive
    /// closure over referencing tables whose foreign keys cascade or null
    /// out, plus any junction tables attached to the written table.
    pub fn write_dependencies(&self, table: &str, operation: &str) -> BTreeSet<String> {
        let mut affected = BTreeSet::new();
        affected.insert(table.to_string());
        if operation == "delete" {
            self.collect_delete_closure(table, &mut affected);
        }
        affected
    }

    fn collect_delete_closure(&self, table: &str, affected: &mut BTreeSet<String>) {
        // Junction rows referencing the deleted rows go away with them.
        for entry in self.edges.iter() {
            for edge in entry.value() {
                if edge.kind == RelationshipKind::ManyToMany
                    && (edge.local_table == table || edge.related_table == table)
                {
                    if let Some(junction) = edge.junction_or_default() {
                        affected.insert(junction.table);
                    }
                }
            }
        }
        // Rows holding a foreign key into the deleted table may be cascaded
        // or nulled; cascaded rows propagate further.
        for accessor in self.reverse_for(table) {
            if accessor.kind == RelationshipKind::ManyToMany {
                continue;
            }
            let Some(edge) = self.owned_edge(&accessor.source_table, &accessor.edge_name) else {
                continue;
            };
            if edge.on_delete.touches_referencing_rows()
                && affected.insert(accessor.source_table.clone())
            {
                self.collect_delete_closure(&accessor.source_table, affected);
            }
        }
    }

    /// Derive the reverse accessor a forward edge installs, if any
    fn reverse_accessor_for(
        &self,
        edge: &RelationshipMetadata,
        owner_model_name: &str,
    ) -> ModelResult<Option<ReverseAccessor>> {
        match edge.kind {
            RelationshipKind::BelongsTo => {
                let name = match &edge.related_name {
                    Some(name) => name.clone(),
                    None => pluralize(&owner_model_name.to_lowercase()),
                };
                let kind = if edge.unique {
                    RelationshipKind::HasOne
                } else {
                    RelationshipKind::HasMany
                };
                Ok(Some(ReverseAccessor {
                    name,
                    kind,
                    source_table: edge.local_table.clone(),
                    foreign_key: edge.foreign_key.clone(),
                    junction: None,
                    edge_name: edge.name.clone(),
                }))
            }
            RelationshipKind::ManyToMany => {
                // A symmetric self-relationship reads the same from both
                // sides; the forward accessor covers both directions.
                if edge.symmetric {
                    return Ok(None);
                }
                let name = match &edge.related_name {
                    Some(name) => name.clone(),
                    None => pluralize(&owner_model_name.to_lowercase()),
                };
                let junction = edge.junction_or_default().ok_or_else(|| {
                    ModelError::Configuration(format!(
                        "many-to-many edge '{}' has no junction table",
                        edge.name
                    ))
                })?;
                Ok(Some(ReverseAccessor {
                    name,
                    kind: RelationshipKind::ManyToMany,
                    source_table: edge.local_table.clone(),
                    foreign_key: String::new(),
                    junction: Some(junction.flipped()),
                    edge_name: edge.name.clone(),
                }))
            }
            // has_one/has_many edges are themselves the reverse-side view of
            // a belongs_to declared on the related model.
            RelationshipKind::HasOne | RelationshipKind::HasMany => Ok(None),
        }
    }

    /// Model name of a registered table, falling back to the table name
    fn owner_model_name(&self, table: &str) -> String {
        self.models
            .get(table)
            .map(|m| m.model_name.clone())
            .unwrap_or_else(|| table.to_string())
    }

    fn check_reverse_collisions(
        &self,
        prospective: &[(String, ReverseAccessor)],
    ) -> ModelResult<()> {
        for (i, (target, accessor)) in prospective.iter().enumerate() {
            let existing = self.reverse_for(target);
            if existing.iter().any(|a| a.name == accessor.name) {
                return Err(ModelError::Configuration(format!(
                    "reverse accessor '{}' already exists on table '{}'",
                    accessor.name, target
                )));
            }
            let duplicate_in_batch = prospective[..i]
                .iter()
                .any(|(t, a)| t == target && a.name == accessor.name);
            if duplicate_in_batch {
                return Err(ModelError::Configuration(format!(
                    "two edges install the same reverse accessor '{}' on table '{}'",
                    accessor.name, target
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(model: &str, table: &str, columns: &[&str]) -> ModelInfo {
        ModelInfo {
            model_name: model.to_string(),
            table_name: table.to_string(),
            primary_key: "id".to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_pending_edge_resolves_on_registration() {
        let registry = RelationshipRegistry::new();
        registry
            .register(
                info("Book", "books", &["id", "title", "author_id"]),
                vec![RelationshipMetadata::belongs_to(
                    "author", "authors", "author_id",
                )],
            )
            .unwrap();
        assert_eq!(registry.pending_edges(), 1);
        assert!(registry.reverse_accessor("authors", "books").is_none());

        registry
            .register(info("Author", "authors", &["id", "name"]), Vec::new())
            .unwrap();
        assert_eq!(registry.pending_edges(), 0);

        let accessor = registry.reverse_accessor("authors", "books").unwrap();
        assert_eq!(accessor.kind, RelationshipKind::HasMany);
        assert_eq!(accessor.source_table, "books");
        assert_eq!(accessor.foreign_key, "author_id");
    }

    #[test]
    fn test_related_name_overrides_default() {
        let registry = RelationshipRegistry::new();
        registry
            .register(info("Author", "authors", &["id", "name"]), Vec::new())
            .unwrap();
        registry
            .register(
                info("Book", "books", &["id", "title", "author_id"]),
                vec![RelationshipMetadata::belongs_to("author", "authors", "author_id")
                    .with_related_name("works")],
            )
            .unwrap();
        assert!(registry.reverse_accessor("authors", "works").is_some());
        assert!(registry.reverse_accessor("authors", "books").is_none());
    }

    #[test]
    fn test_reverse_name_collision_is_rejected_without_partial_state() {
        let registry = RelationshipRegistry::new();
        registry
            .register(info("Author", "authors", &["id"]), Vec::new())
            .unwrap();
        registry
            .register(
                info("Book", "books", &["id", "author_id"]),
                vec![RelationshipMetadata::belongs_to("author", "authors", "author_id")
                    .with_related_name("works")],
            )
            .unwrap();

        let err = registry
            .register(
                info("Review", "reviews", &["id", "author_id"]),
                vec![RelationshipMetadata::belongs_to("author", "authors", "author_id")
                    .with_related_name("works")],
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::Configuration(_)));
        // Nothing about the failed registration stuck.
        assert!(registry.resolve("reviews").is_none());
        assert!(registry.edges_for("reviews").is_empty());
    }

    #[test]
    fn test_one_to_one_installs_has_one_reverse() {
        let registry = RelationshipRegistry::new();
        registry
            .register(info("User", "users", &["id"]), Vec::new())
            .unwrap();
        registry
            .register(
                info("Profile", "profiles", &["id", "user_id"]),
                vec![RelationshipMetadata::belongs_to("user", "users", "user_id")
                    .one_to_one()
                    .with_related_name("profile")],
            )
            .unwrap();
        let accessor = registry.reverse_accessor("users", "profile").unwrap();
        assert_eq!(accessor.kind, RelationshipKind::HasOne);
    }

    #[test]
    fn test_symmetric_self_m2m_installs_no_reverse() {
        let registry = RelationshipRegistry::new();
        registry
            .register(
                info("User", "users", &["id", "name"]),
                vec![RelationshipMetadata::many_to_many("friends", "users").symmetric()],
            )
            .unwrap();
        assert!(registry.reverse_for("users").is_empty());
        assert!(registry.owned_edge("users", "friends").is_some());
    }

    #[test]
    fn test_m2m_reverse_junction_is_flipped() {
        let registry = RelationshipRegistry::new();
        registry
            .register(info("Tag", "tags", &["id", "label"]), Vec::new())
            .unwrap();
        registry
            .register(
                info("Book", "books", &["id", "title"]),
                vec![RelationshipMetadata::many_to_many("tags", "tags")],
            )
            .unwrap();

        let accessor = registry.reverse_accessor("tags", "books").unwrap();
        let junction = accessor.junction.unwrap();
        assert_eq!(junction.table, "books_tags");
        assert_eq!(junction.local_column, "tag_id");
        assert_eq!(junction.remote_column, "book_id");
    }

    #[test]
    fn test_write_dependencies_follow_cascade_closure() {
        let registry = RelationshipRegistry::new();
        registry
            .register(info("Author", "authors", &["id"]), Vec::new())
            .unwrap();
        registry
            .register(
                info("Book", "books", &["id", "author_id"]),
                vec![RelationshipMetadata::belongs_to(
                    "author", "authors", "author_id",
                )],
            )
            .unwrap();
        registry
            .register(
                info("Review", "reviews", &["id", "book_id"]),
                vec![RelationshipMetadata::belongs_to("book", "books", "book_id")
                    .with_related_name("reviews")],
            )
            .unwrap();

        let deps = registry.write_dependencies("authors", "delete");
        assert!(deps.contains("authors"));
        assert!(deps.contains("books"));
        assert!(deps.contains("reviews"));

        let deps = registry.write_dependencies("authors", "update");
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn test_duplicate_table_registration_is_rejected() {
        let registry = RelationshipRegistry::new();
        registry
            .register(info("Author", "authors", &["id"]), Vec::new())
            .unwrap();
        assert!(registry
            .register(info("Author", "authors", &["id"]), Vec::new())
            .is_err());
    }
}
