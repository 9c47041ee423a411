//! Join Planner - Turns dotted relationship paths into aliased join clauses
//!
//! One join per traversed hop; a path requested twice (or sharing a prefix
//! with another path) reuses the alias allocated for it. Only forward
//! (belongs_to) edges participate: eager loading and filter traversal across
//! reverse or many-to-many edges is rejected before any statement executes.

use std::collections::HashMap;

use crate::error::{ModelError, ModelResult};
use crate::relationships::registry::RelationshipRegistry;

use super::types::JoinKind;

/// Alias of the root table in every planned statement
pub const ROOT_ALIAS: &str = "t0";

/// One planned join hop
#[derive(Debug, Clone, PartialEq)]
pub struct JoinInfo {
    /// Table alias allocated for this hop
    pub alias: String,
    /// Joined table name
    pub table: String,
    /// Relationship field name for this hop
    pub field_name: String,
    /// Alias of the table holding the foreign key
    pub parent_alias: String,
    /// Foreign key column on the parent
    pub fk_column: String,
    /// Key column referenced on the joined table
    pub related_key: String,
    /// Inner for required hops, left when any hop up the path is nullable
    pub kind: JoinKind,
    /// Full dotted path up to and including this hop, used for deduplication
    pub path: String,
    /// Whether this hop's foreign key is nullable
    pub nullable: bool,
}

impl JoinInfo {
    /// Render this hop as a join clause
    pub fn to_sql(&self) -> String {
        format!(
            "{} {} {} ON {}.{} = {}.{}",
            self.kind,
            self.table,
            self.alias,
            self.parent_alias,
            self.fk_column,
            self.alias,
            self.related_key
        )
    }
}

/// Context a relationship path appears in; shapes the error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathContext {
    EagerLoad,
    FilterTraversal,
}

/// Allocates aliases and join clauses for the paths of one query
#[derive(Debug)]
pub struct JoinPlanner {
    root_table: String,
    joins: Vec<JoinInfo>,
    by_path: HashMap<String, usize>,
}

impl JoinPlanner {
    /// Create a planner rooted at the given table
    pub fn new(root_table: &str) -> Self {
        Self {
            root_table: root_table.to_string(),
            joins: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    /// Plan every hop of an eager-load path
    pub fn plan_eager_path(
        &mut self,
        registry: &RelationshipRegistry,
        path: &str,
    ) -> ModelResult<()> {
        let mut parent_alias = ROOT_ALIAS.to_string();
        let mut parent_table = self.root_table.clone();
        let mut parent_left = false;
        let mut walked = String::new();

        for segment in path.split("__") {
            if !walked.is_empty() {
                walked.push_str("__");
            }
            walked.push_str(segment);

            let index = self.join_segment(
                registry,
                &parent_alias,
                &parent_table,
                segment,
                &walked,
                parent_left,
                PathContext::EagerLoad,
            )?;
            let join = &self.joins[index];
            parent_alias = join.alias.clone();
            parent_table = join.table.clone();
            parent_left = join.kind == JoinKind::Left;
        }
        Ok(())
    }

    /// Plan the traversal part of a filter path and resolve the terminal
    /// column, returning `(alias, column)`
    pub fn plan_filter_path(
        &mut self,
        registry: &RelationshipRegistry,
        path: &str,
    ) -> ModelResult<(String, String)> {
        let segments: Vec<&str> = path.split("__").collect();
        let (column, relations) = match segments.split_last() {
            Some((column, relations)) => (*column, relations),
            None => {
                return Err(ModelError::InvalidPath("empty filter path".to_string()));
            }
        };

        let mut parent_alias = ROOT_ALIAS.to_string();
        let mut parent_table = self.root_table.clone();
        let mut parent_left = false;
        let mut walked = String::new();

        for segment in relations {
            if !walked.is_empty() {
                walked.push_str("__");
            }
            walked.push_str(segment);

            let index = self.join_segment(
                registry,
                &parent_alias,
                &parent_table,
                segment,
                &walked,
                parent_left,
                PathContext::FilterTraversal,
            )?;
            let join = &self.joins[index];
            parent_alias = join.alias.clone();
            parent_table = join.table.clone();
            parent_left = join.kind == JoinKind::Left;
        }

        // The terminal segment must be a column on the table reached.
        if let Some(info) = registry.resolve(&parent_table) {
            if !info.columns.iter().any(|c| c == column) {
                return Err(ModelError::InvalidPath(format!(
                    "'{}' is not a column of '{}' (path '{}')",
                    column, parent_table, path
                )));
            }
        }
        Ok((parent_alias, column.to_string()))
    }

    /// All planned joins, in alias-allocation order
    pub fn joins(&self) -> &[JoinInfo] {
        &self.joins
    }

    /// Whether any join has been planned
    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// The join planned for a full path, if any
    pub fn join_for(&self, path: &str) -> Option<&JoinInfo> {
        self.by_path.get(path).map(|i| &self.joins[*i])
    }

    /// Render all join clauses in allocation order
    pub fn join_clause_sql(&self) -> String {
        self.joins
            .iter()
            .map(|join| join.to_sql())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[allow(clippy::too_many_arguments)]
    fn join_segment(
        &mut self,
        registry: &RelationshipRegistry,
        parent_alias: &str,
        parent_table: &str,
        segment: &str,
        path: &str,
        parent_left: bool,
        context: PathContext,
    ) -> ModelResult<usize> {
        if let Some(index) = self.by_path.get(path) {
            return Ok(*index);
        }

        let edge = match registry.owned_edge(parent_table, segment) {
            Some(edge) if edge.kind.is_forward() => edge,
            Some(edge) => {
                let hint = match context {
                    PathContext::EagerLoad => "use prefetch_related for reverse and many-to-many paths",
                    PathContext::FilterTraversal => {
                        "filters may only traverse forward foreign keys"
                    }
                };
                return Err(ModelError::InvalidPath(format!(
                    "'{}' on '{}' is a {:?} edge; {}",
                    segment, parent_table, edge.kind, hint
                )));
            }
            None => {
                if registry.reverse_accessor(parent_table, segment).is_some() {
                    let hint = match context {
                        PathContext::EagerLoad => "use prefetch_related for reverse paths",
                        PathContext::FilterTraversal => {
                            "filters may only traverse forward foreign keys"
                        }
                    };
                    return Err(ModelError::InvalidPath(format!(
                        "'{}' on '{}' is a reverse accessor; {}",
                        segment, parent_table, hint
                    )));
                }
                return Err(ModelError::InvalidPath(format!(
                    "unknown relationship '{}' on '{}'",
                    segment, parent_table
                )));
            }
        };

        if registry.resolve(&edge.related_table).is_none() {
            return Err(ModelError::InvalidPath(format!(
                "related table '{}' of '{}' is not registered",
                edge.related_table, segment
            )));
        }

        let kind = if edge.nullable || parent_left {
            JoinKind::Left
        } else {
            JoinKind::Inner
        };
        let join = JoinInfo {
            alias: format!("t{}", self.joins.len() + 1),
            table: edge.related_table.clone(),
            field_name: segment.to_string(),
            parent_alias: parent_alias.to_string(),
            fk_column: edge.foreign_key.clone(),
            related_key: edge.local_key.clone(),
            kind,
            path: path.to_string(),
            nullable: edge.nullable,
        };
        self.joins.push(join);
        let index = self.joins.len() - 1;
        self.by_path.insert(path.to_string(), index);
        Ok(index)
    }
}
