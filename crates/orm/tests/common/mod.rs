//! Shared fixtures: a small library schema with every relationship kind
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tether_orm::loading::PrefetchPayload;
use tether_orm::relationships::metadata::JunctionConfig;
use tether_orm::{
    BelongsTo, HasMany, ManyToMany, Model, ModelError, ModelResult, RelationshipMetadata,
    RelationshipRegistry, Row, SqliteConnection,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: Option<i64>,
    pub name: String,
    #[serde(skip)]
    pub books: HasMany<Book>,
}

impl PartialEq for Author {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Author {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            books: HasMany::default(),
        }
    }
}

impl Model for Author {
    type PrimaryKey = i64;

    fn table_name() -> &'static str {
        "authors"
    }

    fn columns() -> &'static [&'static str] {
        &["id", "name"]
    }

    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn set_primary_key(&mut self, key: i64) {
        self.id = Some(key);
    }

    fn from_row(row: &Row) -> ModelResult<Self> {
        let id: Option<i64> = row.get_opt("id")?;
        Ok(Self {
            id,
            name: row.get_opt::<String>("name")?.unwrap_or_default(),
            books: HasMany::new("author_id").bind(json!(id)),
        })
    }

    fn to_fields(&self) -> HashMap<String, Value> {
        let mut fields = HashMap::new();
        fields.insert("id".to_string(), json!(self.id));
        fields.insert("name".to_string(), Value::String(self.name.clone()));
        fields
    }

    fn apply_prefetch(&mut self, payload: &PrefetchPayload<'_>) -> ModelResult<()> {
        match payload.relation() {
            "books" => {
                self.books.set_loaded(payload.decode::<Book>()?);
                Ok(())
            }
            other => Err(ModelError::InvalidPath(format!(
                "unknown prefetch relation '{}' on Author",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: Option<i64>,
    pub title: String,
    #[serde(skip)]
    pub author: BelongsTo<Author>,
    #[serde(skip)]
    pub tags: ManyToMany<Tag>,
}

impl Book {
    pub fn new(title: &str, author_id: i64) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            author: BelongsTo::from_key(json!(author_id), false),
            tags: ManyToMany::default(),
        }
    }
}

impl Model for Book {
    type PrimaryKey = i64;

    fn table_name() -> &'static str {
        "books"
    }

    fn columns() -> &'static [&'static str] {
        &["id", "title", "author_id"]
    }

    fn relationships() -> Vec<RelationshipMetadata> {
        vec![
            RelationshipMetadata::belongs_to("author", "authors", "author_id")
                .with_related_name("books"),
            RelationshipMetadata::many_to_many("tags", "tags"),
        ]
    }

    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn set_primary_key(&mut self, key: i64) {
        self.id = Some(key);
    }

    fn from_row(row: &Row) -> ModelResult<Self> {
        let id: Option<i64> = row.get_opt("id")?;
        Ok(Self {
            id,
            title: row.get_opt::<String>("title")?.unwrap_or_default(),
            author: BelongsTo::from_key(
                row.value("author_id").cloned().unwrap_or(Value::Null),
                false,
            ),
            tags: ManyToMany::new(JunctionConfig::default_for("books", "tags"), false)
                .bind(json!(id)),
        })
    }

    fn to_fields(&self) -> HashMap<String, Value> {
        let mut fields = HashMap::new();
        fields.insert("id".to_string(), json!(self.id));
        fields.insert("title".to_string(), Value::String(self.title.clone()));
        fields.insert(
            "author_id".to_string(),
            self.author.key().cloned().unwrap_or(Value::Null),
        );
        fields
    }

    fn apply_eager(&mut self, path: &str, row: &Row) -> ModelResult<()> {
        match path {
            "author" => self.author.hydrate(row),
            other => Err(ModelError::InvalidPath(format!(
                "unknown eager relation '{}' on Book",
                other
            ))),
        }
    }

    fn apply_prefetch(&mut self, payload: &PrefetchPayload<'_>) -> ModelResult<()> {
        match payload.relation() {
            "tags" => {
                self.tags.set_loaded(payload.decode::<Tag>()?);
                Ok(())
            }
            other => Err(ModelError::InvalidPath(format!(
                "unknown prefetch relation '{}' on Book",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Option<i64>,
    pub label: String,
}

impl Tag {
    pub fn new(label: &str) -> Self {
        Self {
            id: None,
            label: label.to_string(),
        }
    }
}

impl Model for Tag {
    type PrimaryKey = i64;

    fn table_name() -> &'static str {
        "tags"
    }

    fn columns() -> &'static [&'static str] {
        &["id", "label"]
    }

    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn set_primary_key(&mut self, key: i64) {
        self.id = Some(key);
    }

    fn from_row(row: &Row) -> ModelResult<Self> {
        Ok(Self {
            id: row.get_opt("id")?,
            label: row.get_opt::<String>("label")?.unwrap_or_default(),
        })
    }

    fn to_fields(&self) -> HashMap<String, Value> {
        let mut fields = HashMap::new();
        fields.insert("id".to_string(), json!(self.id));
        fields.insert("label".to_string(), Value::String(self.label.clone()));
        fields
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
    #[serde(skip)]
    pub friends: ManyToMany<User>,
}

impl User {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            friends: ManyToMany::default(),
        }
    }
}

impl Model for User {
    type PrimaryKey = i64;

    fn table_name() -> &'static str {
        "users"
    }

    fn columns() -> &'static [&'static str] {
        &["id", "name"]
    }

    fn relationships() -> Vec<RelationshipMetadata> {
        vec![RelationshipMetadata::many_to_many("friends", "users").symmetric()]
    }

    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn set_primary_key(&mut self, key: i64) {
        self.id = Some(key);
    }

    fn from_row(row: &Row) -> ModelResult<Self> {
        let id: Option<i64> = row.get_opt("id")?;
        Ok(Self {
            id,
            name: row.get_opt::<String>("name")?.unwrap_or_default(),
            friends: ManyToMany::new(JunctionConfig::default_for("users", "users"), true)
                .bind(json!(id)),
        })
    }

    fn to_fields(&self) -> HashMap<String, Value> {
        let mut fields = HashMap::new();
        fields.insert("id".to_string(), json!(self.id));
        fields.insert("name".to_string(), Value::String(self.name.clone()));
        fields
    }
}

/// Registry with the full fixture schema registered
pub fn registry() -> Arc<RelationshipRegistry> {
    let registry = RelationshipRegistry::new();
    registry.register_model::<Author>().unwrap();
    registry.register_model::<Tag>().unwrap();
    registry.register_model::<Book>().unwrap();
    registry.register_model::<User>().unwrap();
    Arc::new(registry)
}

/// In-memory connection with tables created and the fixture registry bound
pub fn connection() -> SqliteConnection {
    let conn = SqliteConnection::open_in_memory(registry()).unwrap();
    create_tables(&conn);
    conn
}

/// Create the fixture schema on an open connection
pub fn create_tables(conn: &SqliteConnection) {
    conn.execute_batch(
        "CREATE TABLE authors (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             name TEXT NOT NULL
         );
         CREATE TABLE books (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             title TEXT NOT NULL,
             author_id INTEGER NOT NULL REFERENCES authors(id) ON DELETE CASCADE
         );
         CREATE INDEX idx_books_author_id ON books(author_id);
         CREATE TABLE tags (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             label TEXT NOT NULL
         );
         CREATE TABLE books_tags (
             book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
             tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
             UNIQUE(book_id, tag_id)
         );
         CREATE INDEX idx_books_tags_book_id ON books_tags(book_id);
         CREATE INDEX idx_books_tags_tag_id ON books_tags(tag_id);
         CREATE TABLE users (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             name TEXT NOT NULL
         );
         CREATE TABLE users_users (
             user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
             other_user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
             UNIQUE(user_id, other_user_id)
         );
         CREATE INDEX idx_users_users_user_id ON users_users(user_id);
         CREATE INDEX idx_users_users_other_user_id ON users_users(other_user_id);",
    )
    .unwrap();
}
