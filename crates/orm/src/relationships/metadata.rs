//! Relationship Metadata - Declarative descriptions of edges between models

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Defines the kind of relationship between two models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// One-to-one, foreign key on the related table
    HasOne,
    /// One-to-many, foreign key on the related table
    HasMany,
    /// Many-to-one, foreign key on the owning table
    BelongsTo,
    /// Many-to-many through a junction table
    ManyToMany,
}

impl RelationshipKind {
    /// Returns true if this kind resolves to a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Self::HasMany | Self::ManyToMany)
    }

    /// Returns true if the owning table holds the foreign key
    ///
    /// Forward edges are the only kind eager loading and filter-path
    /// traversal may walk.
    pub fn is_forward(self) -> bool {
        matches!(self, Self::BelongsTo)
    }

    /// Returns true if this kind requires a junction table
    pub fn requires_junction(self) -> bool {
        matches!(self, Self::ManyToMany)
    }
}

/// Referential action applied by the store on delete/update of the target row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferentialAction {
    #[default]
    Cascade,
    Restrict,
    SetNull,
    NoAction,
}

impl ReferentialAction {
    /// SQL fragment for constraint declarations
    pub fn as_sql(self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }

    /// Whether a delete of the target may mutate rows holding the key
    pub fn touches_referencing_rows(self) -> bool {
        matches!(self, ReferentialAction::Cascade | ReferentialAction::SetNull)
    }
}

/// Junction table configuration for many-to-many relationships
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionConfig {
    /// The junction table name
    pub table: String,

    /// Column in the junction table pointing at the owning model
    pub local_column: String,

    /// Column in the junction table pointing at the related model
    pub remote_column: String,
}

impl JunctionConfig {
    /// Create a junction configuration
    pub fn new(table: String, local_column: String, remote_column: String) -> Self {
        Self {
            table,
            local_column,
            remote_column,
        }
    }

    /// Derive the default junction for a pair of tables
    ///
    /// The table name is the alphabetical concatenation of the two table
    /// names; columns are the singularized table names suffixed with `_id`.
    /// A self-referential pair disambiguates the remote column with an
    /// `other_` prefix.
    pub fn default_for(local_table: &str, related_table: &str) -> Self {
        let mut names = [local_table, related_table];
        names.sort_unstable();
        let table = format!("{}_{}", names[0], names[1]);

        let local_column = format!("{}_id", singularize(local_table));
        let remote_column = if local_table == related_table {
            format!("other_{}_id", singularize(related_table))
        } else {
            format!("{}_id", singularize(related_table))
        };
        Self {
            table,
            local_column,
            remote_column,
        }
    }

    /// The same junction seen from the related model's side
    pub fn flipped(&self) -> Self {
        Self {
            table: self.table.clone(),
            local_column: self.remote_column.clone(),
            remote_column: self.local_column.clone(),
        }
    }

    /// Validate the junction configuration
    pub fn validate(&self) -> ModelResult<()> {
        if self.table.is_empty() {
            return Err(ModelError::Configuration(
                "junction table name cannot be empty".to_string(),
            ));
        }
        if self.local_column.is_empty() || self.remote_column.is_empty() {
            return Err(ModelError::Configuration(
                "junction columns cannot be empty".to_string(),
            ));
        }
        if self.local_column == self.remote_column {
            return Err(ModelError::Configuration(
                "junction local and remote columns must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metadata describing one directed relationship edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipMetadata {
    /// The kind of relationship
    pub kind: RelationshipKind,

    /// Name of the relationship (field name on the owning model)
    pub name: String,

    /// The owning model's table; filled in at registration when empty
    pub local_table: String,

    /// The related model's table name
    pub related_table: String,

    /// Foreign key column (on the owning table for belongs_to, on the
    /// related table for has_one/has_many; unused for many_to_many)
    pub foreign_key: String,

    /// Key column the foreign key references (defaults to "id")
    pub local_key: String,

    /// Name of the reverse accessor installed on the related model;
    /// defaults to the pluralized owning model name
    pub related_name: Option<String>,

    /// Whether the foreign key may be null
    pub nullable: bool,

    /// Action on delete of the referenced row
    pub on_delete: ReferentialAction,

    /// Action on update of the referenced key
    pub on_update: ReferentialAction,

    /// Junction configuration for many-to-many edges
    pub junction: Option<JunctionConfig>,

    /// Self-referential many-to-many where one stored pair represents both
    /// directions; installs no reverse accessor
    pub symmetric: bool,

    /// One-to-one cardinality on a belongs_to edge; the reverse accessor
    /// yields a single instance instead of a collection
    pub unique: bool,
}

impl RelationshipMetadata {
    fn new(kind: RelationshipKind, name: &str, related_table: &str, foreign_key: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            local_table: String::new(),
            related_table: related_table.to_string(),
            foreign_key: foreign_key.to_string(),
            local_key: "id".to_string(),
            related_name: None,
            nullable: false,
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::Cascade,
            junction: None,
            symmetric: false,
            unique: false,
        }
    }

    /// A many-to-one edge: the owning table holds `foreign_key`
    pub fn belongs_to(name: &str, related_table: &str, foreign_key: &str) -> Self {
        Self::new(RelationshipKind::BelongsTo, name, related_table, foreign_key)
    }

    /// A one-to-many edge: the related table holds `foreign_key`
    pub fn has_many(name: &str, related_table: &str, foreign_key: &str) -> Self {
        Self::new(RelationshipKind::HasMany, name, related_table, foreign_key)
    }

    /// A one-to-one edge: the related table holds `foreign_key`
    pub fn has_one(name: &str, related_table: &str, foreign_key: &str) -> Self {
        Self::new(RelationshipKind::HasOne, name, related_table, foreign_key)
    }

    /// A many-to-many edge through a junction table
    pub fn many_to_many(name: &str, related_table: &str) -> Self {
        Self::new(RelationshipKind::ManyToMany, name, related_table, "")
    }

    /// Set the owning table explicitly
    pub fn with_local_table(mut self, local_table: &str) -> Self {
        self.local_table = local_table.to_string();
        self
    }

    /// Set the referenced key column
    pub fn with_local_key(mut self, local_key: &str) -> Self {
        self.local_key = local_key.to_string();
        self
    }

    /// Override the reverse accessor name
    pub fn with_related_name(mut self, related_name: &str) -> Self {
        self.related_name = Some(related_name.to_string());
        self
    }

    /// Mark the foreign key as nullable
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the on-delete action
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Set the on-update action
    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    /// Override the junction table configuration
    pub fn with_junction(mut self, junction: JunctionConfig) -> Self {
        self.junction = Some(junction);
        self
    }

    /// Mark a self-referential many-to-many edge as symmetric
    pub fn symmetric(mut self) -> Self {
        self.symmetric = true;
        self
    }

    /// Declare one-to-one cardinality on a belongs_to edge
    pub fn one_to_one(mut self) -> Self {
        self.unique = true;
        self
    }

    /// The junction for this edge, deriving the default when unset
    pub fn junction_or_default(&self) -> Option<JunctionConfig> {
        if self.kind != RelationshipKind::ManyToMany {
            return None;
        }
        Some(
            self.junction
                .clone()
                .unwrap_or_else(|| JunctionConfig::default_for(&self.local_table, &self.related_table)),
        )
    }

    /// Validate the metadata for internal consistency
    ///
    /// Registration calls this before any registry state is touched.
    pub fn validate(&self) -> ModelResult<()> {
        if self.name.is_empty() {
            return Err(ModelError::Configuration(
                "relationship name cannot be empty".to_string(),
            ));
        }
        if self.related_table.is_empty() {
            return Err(ModelError::Configuration(format!(
                "relationship '{}' must name a related table",
                self.name
            )));
        }
        if self.kind.requires_junction() {
            if !self.foreign_key.is_empty() {
                return Err(ModelError::Configuration(format!(
                    "many-to-many relationship '{}' does not take a foreign key column",
                    self.name
                )));
            }
            if let Some(junction) = &self.junction {
                junction.validate()?;
            }
        } else {
            if self.foreign_key.is_empty() {
                return Err(ModelError::Configuration(format!(
                    "relationship '{}' requires a foreign key column",
                    self.name
                )));
            }
            if self.junction.is_some() {
                return Err(ModelError::Configuration(format!(
                    "relationship '{}' of kind {:?} does not take a junction table",
                    self.name, self.kind
                )));
            }
        }
        if self.symmetric {
            if self.kind != RelationshipKind::ManyToMany {
                return Err(ModelError::Configuration(format!(
                    "relationship '{}' cannot be symmetric: only many-to-many edges may be",
                    self.name
                )));
            }
            if !self.local_table.is_empty() && self.local_table != self.related_table {
                return Err(ModelError::Configuration(format!(
                    "symmetric relationship '{}' must be self-referential",
                    self.name
                )));
            }
        }
        if self.unique && self.kind != RelationshipKind::BelongsTo {
            return Err(ModelError::Configuration(format!(
                "relationship '{}' cannot be one-to-one: only belongs_to edges may be",
                self.name
            )));
        }
        if self.on_delete == ReferentialAction::SetNull && !self.nullable {
            return Err(ModelError::Configuration(format!(
                "relationship '{}' declares SET NULL on delete but is not nullable",
                self.name
            )));
        }
        Ok(())
    }
}

/// Reduce a plural table name to its singular form for column derivation
pub fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        format!("{}y", stem)
    } else if let Some(stem) = name.strip_suffix("ses") {
        format!("{}s", stem)
    } else if let Some(stem) = name.strip_suffix("xes") {
        format!("{}x", stem)
    } else if name.ends_with("ss") {
        name.to_string()
    } else if let Some(stem) = name.strip_suffix('s') {
        stem.to_string()
    } else {
        name.to_string()
    }
}

/// Produce the plural form of a model name for default reverse accessors
pub fn pluralize(name: &str) -> String {
    let ends_with_vowel_y = name.ends_with("ay")
        || name.ends_with("ey")
        || name.ends_with("iy")
        || name.ends_with("oy")
        || name.ends_with("uy");
    if name.ends_with('y') && !ends_with_vowel_y {
        format!("{}ies", &name[..name.len() - 1])
    } else if name.ends_with('s')
        || name.ends_with("sh")
        || name.ends_with("ch")
        || name.ends_with('x')
        || name.ends_with('z')
    {
        format!("{}es", name)
    } else {
        format!("{}s", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_belongs_to_builder() {
        let edge = RelationshipMetadata::belongs_to("author", "authors", "author_id")
            .with_local_table("books")
            .nullable()
            .on_delete(ReferentialAction::SetNull);
        assert_eq!(edge.kind, RelationshipKind::BelongsTo);
        assert!(edge.kind.is_forward());
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_set_null_requires_nullable() {
        let edge = RelationshipMetadata::belongs_to("author", "authors", "author_id")
            .on_delete(ReferentialAction::SetNull);
        assert!(matches!(
            edge.validate(),
            Err(crate::error::ModelError::Configuration(_))
        ));
    }

    #[test]
    fn test_many_to_many_rejects_foreign_key() {
        let mut edge = RelationshipMetadata::many_to_many("tags", "tags");
        edge.foreign_key = "tag_id".to_string();
        assert!(edge.validate().is_err());
    }

    #[test]
    fn test_symmetric_must_be_self_referential() {
        let edge = RelationshipMetadata::many_to_many("friends", "users")
            .with_local_table("people")
            .symmetric();
        assert!(edge.validate().is_err());

        let edge = RelationshipMetadata::many_to_many("friends", "users")
            .with_local_table("users")
            .symmetric();
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_default_junction_naming_is_alphabetical() {
        let junction = JunctionConfig::default_for("tags", "books");
        assert_eq!(junction.table, "books_tags");
        assert_eq!(junction.local_column, "tag_id");
        assert_eq!(junction.remote_column, "book_id");

        let junction = JunctionConfig::default_for("books", "tags");
        assert_eq!(junction.table, "books_tags");
        assert_eq!(junction.local_column, "book_id");
        assert_eq!(junction.remote_column, "tag_id");
    }

    #[test]
    fn test_self_referential_junction_columns_differ() {
        let junction = JunctionConfig::default_for("users", "users");
        assert_eq!(junction.table, "users_users");
        assert_eq!(junction.local_column, "user_id");
        assert_eq!(junction.remote_column, "other_user_id");
        assert!(junction.validate().is_ok());
    }

    #[test]
    fn test_pluralize_and_singularize() {
        assert_eq!(pluralize("book"), "books");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(singularize("books"), "book");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
    }
}
