//! Prefetch Batcher - Bounded follow-up queries for reverse and M2M paths
//!
//! After the root query, each declared path executes one additional query
//! per segment (two for a many-to-many hop: junction then related table)
//! keyed by the set of parent primary keys, independent of how many rows
//! either side holds. Results are grouped by parent key and attached to the
//! owning instances.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use crate::connection::{Row, SqliteConnection};
use crate::error::{ModelError, ModelResult};
use crate::model::Model;
use crate::relationships::metadata::{JunctionConfig, RelationshipKind};
use crate::relationships::registry::RelationshipRegistry;

/// Batched rows for one relationship path level, grouped by parent key
#[derive(Debug, Clone)]
pub struct PrefetchSet {
    /// Relationship name at this level
    relation: String,
    /// How the relationship resolves (has_one, has_many, many_to_many)
    kind: RelationshipKind,
    /// Primary key column of this level's rows, read by nested levels
    pk_column: String,
    /// Related rows keyed by the rendered parent key, each list ordered by
    /// the related primary key
    rows_by_parent: HashMap<String, Vec<Row>>,
    /// Nested prefetch levels keyed off this level's rows
    children: Vec<PrefetchSet>,
}

impl PrefetchSet {
    /// The slice of this set belonging to one parent instance
    pub fn payload_for(&self, parent_key: &Value) -> PrefetchPayload<'_> {
        static EMPTY: &[Row] = &[];
        let rows = self
            .rows_by_parent
            .get(&render_key(parent_key))
            .map(Vec::as_slice)
            .unwrap_or(EMPTY);
        PrefetchPayload {
            relation: &self.relation,
            kind: self.kind,
            pk_column: &self.pk_column,
            rows,
            children: &self.children,
        }
    }

    /// The relationship name this set was built for
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Total number of related rows fetched at this level
    pub fn len(&self) -> usize {
        self.rows_by_parent.values().map(Vec::len).sum()
    }

    /// Whether no related rows were fetched
    pub fn is_empty(&self) -> bool {
        self.rows_by_parent.is_empty()
    }
}

/// One parent instance's view of a prefetch level
#[derive(Debug, Clone, Copy)]
pub struct PrefetchPayload<'a> {
    relation: &'a str,
    kind: RelationshipKind,
    pk_column: &'a str,
    rows: &'a [Row],
    children: &'a [PrefetchSet],
}

impl<'a> PrefetchPayload<'a> {
    /// The relationship name being delivered
    pub fn relation(&self) -> &str {
        self.relation
    }

    /// How the relationship resolves
    pub fn kind(&self) -> RelationshipKind {
        self.kind
    }

    /// Decode the rows into instances, applying nested levels to each
    pub fn decode<T: Model>(&self) -> ModelResult<Vec<T>> {
        let mut decoded = Vec::with_capacity(self.rows.len());
        for row in self.rows {
            let mut instance = T::from_row(row)?;
            let key = row.value(self.pk_column).cloned().unwrap_or(Value::Null);
            for child in self.children {
                instance.apply_prefetch(&child.payload_for(&key))?;
            }
            decoded.push(instance);
        }
        Ok(decoded)
    }

    /// Decode at most one row, for has_one relationships
    pub fn decode_one<T: Model>(&self) -> ModelResult<Option<T>> {
        Ok(self.decode::<T>()?.into_iter().next())
    }
}

/// Executes the follow-up queries for declared prefetch paths
pub struct Prefetcher<'a> {
    conn: &'a SqliteConnection,
    registry: &'a RelationshipRegistry,
}

/// How one path segment resolves against the registry
enum SegmentPlan {
    Reverse {
        kind: RelationshipKind,
        related_table: String,
        foreign_key: String,
    },
    ManyToMany {
        related_table: String,
        junction: JunctionConfig,
        symmetric: bool,
    },
}

impl<'a> Prefetcher<'a> {
    /// Create a prefetcher bound to a connection and registry
    pub fn new(conn: &'a SqliteConnection, registry: &'a RelationshipRegistry) -> Self {
        Self { conn, registry }
    }

    /// Run the batched queries for one dotted path
    pub fn run(
        &self,
        root_table: &str,
        parent_keys: &[Value],
        path: &str,
    ) -> ModelResult<PrefetchSet> {
        let segments: Vec<&str> = path.split("__").collect();
        self.load_level(root_table, parent_keys, &segments)
    }

    fn load_level(
        &self,
        table: &str,
        parent_keys: &[Value],
        segments: &[&str],
    ) -> ModelResult<PrefetchSet> {
        let segment = segments[0];
        let plan = resolve_segment(self.registry, table, segment)?;

        let (related_table, kind, rows_by_parent) = match plan {
            SegmentPlan::Reverse {
                kind,
                related_table,
                foreign_key,
            } => {
                let rows = self.fetch_reverse(&related_table, &foreign_key, parent_keys)?;
                (related_table, kind, rows)
            }
            SegmentPlan::ManyToMany {
                related_table,
                junction,
                symmetric,
            } => {
                let rows = self.fetch_many_to_many(
                    &related_table,
                    &junction,
                    symmetric,
                    parent_keys,
                )?;
                (related_table, RelationshipKind::ManyToMany, rows)
            }
        };

        let related_info = self.registry.resolve(&related_table).ok_or_else(|| {
            ModelError::InvalidPath(format!(
                "related table '{}' is not registered",
                related_table
            ))
        })?;

        let mut children = Vec::new();
        if segments.len() > 1 {
            let child_keys = collect_keys(
                rows_by_parent.values().flatten(),
                &related_info.primary_key,
            );
            children.push(self.load_level(&related_table, &child_keys, &segments[1..])?);
        }

        debug!(
            relation = segment,
            rows = rows_by_parent.values().map(Vec::len).sum::<usize>(),
            "prefetched relationship level"
        );
        Ok(PrefetchSet {
            relation: segment.to_string(),
            kind,
            pk_column: related_info.primary_key,
            rows_by_parent,
            children,
        })
    }

    /// One query: related rows holding a foreign key into the parent set
    fn fetch_reverse(
        &self,
        related_table: &str,
        foreign_key: &str,
        parent_keys: &[Value],
    ) -> ModelResult<HashMap<String, Vec<Row>>> {
        let mut grouped: HashMap<String, Vec<Row>> = HashMap::new();
        if parent_keys.is_empty() {
            return Ok(grouped);
        }
        let keys = dedup_keys(parent_keys);
        let pk = self
            .registry
            .resolve(related_table)
            .map(|info| info.primary_key)
            .unwrap_or_else(|| "id".to_string());
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT * FROM {} WHERE {} IN ({}) ORDER BY {}",
            related_table, foreign_key, placeholders, pk
        );
        let rows = self.conn.query_rows(&sql, &keys)?;
        for row in rows {
            let parent = row.value(foreign_key).cloned().unwrap_or(Value::Null);
            grouped.entry(render_key(&parent)).or_default().push(row);
        }
        Ok(grouped)
    }

    /// Two queries: junction pairs for the parent set, then the related rows
    fn fetch_many_to_many(
        &self,
        related_table: &str,
        junction: &JunctionConfig,
        symmetric: bool,
        parent_keys: &[Value],
    ) -> ModelResult<HashMap<String, Vec<Row>>> {
        let mut grouped: HashMap<String, Vec<Row>> = HashMap::new();
        if parent_keys.is_empty() {
            return Ok(grouped);
        }
        let keys = dedup_keys(parent_keys);
        let parent_set: HashSet<String> = keys.iter().map(render_key).collect();
        let placeholders = vec!["?"; keys.len()].join(", ");

        let (sql, params): (String, Vec<Value>) = if symmetric {
            let mut params = keys.clone();
            params.extend(keys.iter().cloned());
            (
                format!(
                    "SELECT {local}, {remote} FROM {table} WHERE {local} IN ({ph}) OR {remote} IN ({ph})",
                    local = junction.local_column,
                    remote = junction.remote_column,
                    table = junction.table,
                    ph = placeholders
                ),
                params,
            )
        } else {
            (
                format!(
                    "SELECT {local}, {remote} FROM {table} WHERE {local} IN ({ph})",
                    local = junction.local_column,
                    remote = junction.remote_column,
                    table = junction.table,
                    ph = placeholders
                ),
                keys.clone(),
            )
        };
        let pair_rows = self.conn.query_rows(&sql, &params)?;

        // parent rendered key -> related keys, in junction order
        let mut pairs: Vec<(String, Value)> = Vec::new();
        for row in &pair_rows {
            let local = row
                .value(&junction.local_column)
                .cloned()
                .unwrap_or(Value::Null);
            let remote = row
                .value(&junction.remote_column)
                .cloned()
                .unwrap_or(Value::Null);
            if parent_set.contains(&render_key(&local)) {
                pairs.push((render_key(&local), remote.clone()));
            }
            if symmetric
                && parent_set.contains(&render_key(&remote))
                && render_key(&local) != render_key(&remote)
            {
                pairs.push((render_key(&remote), local));
            }
        }
        if pairs.is_empty() {
            return Ok(grouped);
        }

        let related_keys: Vec<Value> = dedup_keys(
            &pairs.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>(),
        );
        let pk = self
            .registry
            .resolve(related_table)
            .map(|info| info.primary_key)
            .unwrap_or_else(|| "id".to_string());
        let placeholders = vec!["?"; related_keys.len()].join(", ");
        let sql = format!(
            "SELECT * FROM {} WHERE {} IN ({}) ORDER BY {}",
            related_table, pk, placeholders, pk
        );
        let related_rows = self.conn.query_rows(&sql, &related_keys)?;

        let by_key: HashMap<String, &Row> = related_rows
            .iter()
            .map(|row| {
                let key = row.value(&pk).cloned().unwrap_or(Value::Null);
                (render_key(&key), row)
            })
            .collect();

        // Walk related rows in primary-key order so each parent's list is
        // ordered consistently with the reverse case.
        for row in &related_rows {
            let row_key = render_key(&row.value(&pk).cloned().unwrap_or(Value::Null));
            for (parent, related) in &pairs {
                if render_key(related) == row_key {
                    if let Some(matched) = by_key.get(&row_key) {
                        grouped
                            .entry(parent.clone())
                            .or_default()
                            .push((*matched).clone());
                    }
                }
            }
        }
        Ok(grouped)
    }
}

/// Tables a prefetch path will touch; also validates the path
///
/// Used by the compile step both to sign cache dependencies and to reject
/// invalid paths before any statement executes.
pub fn path_dependencies(
    registry: &RelationshipRegistry,
    root_table: &str,
    path: &str,
) -> ModelResult<BTreeSet<String>> {
    let mut tables = BTreeSet::new();
    let mut table = root_table.to_string();
    for segment in path.split("__") {
        match resolve_segment(registry, &table, segment)? {
            SegmentPlan::Reverse { related_table, .. } => {
                tables.insert(related_table.clone());
                table = related_table;
            }
            SegmentPlan::ManyToMany {
                related_table,
                junction,
                ..
            } => {
                tables.insert(junction.table);
                tables.insert(related_table.clone());
                table = related_table;
            }
        }
        if registry.resolve(&table).is_none() {
            return Err(ModelError::InvalidPath(format!(
                "related table '{}' is not registered",
                table
            )));
        }
    }
    Ok(tables)
}

/// Resolve one path segment to its reverse or many-to-many plan
///
/// Forward (belongs_to) segments are rejected here: they are eager-load
/// territory.
fn resolve_segment(
    registry: &RelationshipRegistry,
    table: &str,
    segment: &str,
) -> ModelResult<SegmentPlan> {
    if let Some(edge) = registry.owned_edge(table, segment) {
        return match edge.kind {
            RelationshipKind::BelongsTo => Err(ModelError::InvalidPath(format!(
                "'{}' on '{}' is a forward foreign key; use select_related",
                segment, table
            ))),
            RelationshipKind::HasOne | RelationshipKind::HasMany => Ok(SegmentPlan::Reverse {
                kind: edge.kind,
                related_table: edge.related_table.clone(),
                foreign_key: edge.foreign_key.clone(),
            }),
            RelationshipKind::ManyToMany => {
                let junction = edge.junction_or_default().ok_or_else(|| {
                    ModelError::Configuration(format!(
                        "many-to-many edge '{}' has no junction table",
                        edge.name
                    ))
                })?;
                Ok(SegmentPlan::ManyToMany {
                    related_table: edge.related_table.clone(),
                    junction,
                    symmetric: edge.symmetric,
                })
            }
        };
    }
    if let Some(accessor) = registry.reverse_accessor(table, segment) {
        return match accessor.kind {
            RelationshipKind::ManyToMany => {
                let junction = accessor.junction.clone().ok_or_else(|| {
                    ModelError::Configuration(format!(
                        "reverse accessor '{}' has no junction table",
                        accessor.name
                    ))
                })?;
                Ok(SegmentPlan::ManyToMany {
                    related_table: accessor.source_table.clone(),
                    junction,
                    symmetric: false,
                })
            }
            kind => Ok(SegmentPlan::Reverse {
                kind,
                related_table: accessor.source_table.clone(),
                foreign_key: accessor.foreign_key.clone(),
            }),
        };
    }
    Err(ModelError::InvalidPath(format!(
        "unknown relationship '{}' on '{}'",
        segment, table
    )))
}

/// Distinct primary keys of a set of rows, for the next prefetch level
fn collect_keys<'r>(rows: impl Iterator<Item = &'r Row>, column: &str) -> Vec<Value> {
    let keys: Vec<Value> = rows
        .filter_map(|row| row.value(column).cloned())
        .collect();
    dedup_keys(&keys)
}

/// Render a key value for use as a grouping map key
fn render_key(value: &Value) -> String {
    value.to_string()
}

/// Deduplicate and sort key values by their rendered form
fn dedup_keys(keys: &[Value]) -> Vec<Value> {
    let mut seen = BTreeSet::new();
    let mut out: Vec<Value> = Vec::new();
    for key in keys {
        if key.is_null() {
            continue;
        }
        if seen.insert(render_key(key)) {
            out.push(key.clone());
        }
    }
    out.sort_by(|a, b| render_key(a).cmp(&render_key(b)));
    out
}
