//! Query Builder SQL generation
//!
//! Compiles accumulated builder state into one statement plus its parameter
//! list. Conditions are sorted into a canonical order and relationship paths
//! are planned over sorted path sets, so two builders holding the same state
//! compile to byte-identical SQL regardless of the order their methods were
//! called in. The compiled statement is the unit the result cache signs.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::loading::prefetch::path_dependencies;
use crate::model::Model;
use crate::relationships::registry::RelationshipRegistry;

use super::builder::QueryBuilder;
use super::join_planner::{JoinPlanner, ROOT_ALIAS};
use super::types::{QueryOperator, WhereCondition};

/// A fully compiled statement, ready for execution and cache signing
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub table: String,
    /// Root table plus every table touched by a join or prefetch path
    pub dependencies: BTreeSet<String>,
    /// Field-subset component of the cache signature
    pub fields_signature: String,
    /// Eager paths (prefix closure, sorted) whose columns ride along in the
    /// statement; drives hydration after decoding
    pub eager_paths: Vec<String>,
}

impl<M: Model> QueryBuilder<M> {
    /// Compile the SELECT statement for this builder's state
    pub fn to_sql_with_params(&self) -> ModelResult<(String, Vec<Value>)> {
        let compiled = self.compile_select_using(self.registry.as_deref())?;
        Ok((compiled.sql, compiled.params))
    }

    pub(crate) fn compile_select_using(
        &self,
        registry: Option<&RelationshipRegistry>,
    ) -> ModelResult<CompiledQuery> {
        let table = M::table_name();
        let registry = self.require_registry_if_needed(registry)?;

        // Every prefix of an eager path gets its own join and column set, so
        // intermediate instances hydrate too.
        let eager_closure: BTreeSet<String> = self
            .eager_paths
            .iter()
            .flat_map(|p| path_prefixes(p))
            .collect();

        let mut planner = JoinPlanner::new(table);
        if let Some(reg) = registry {
            for path in &eager_closure {
                planner.plan_eager_path(reg, path)?;
            }
        }

        let rendered_wheres = self.resolve_wheres(registry, &mut planner, false)?;
        let has_joins = !planner.is_empty();

        let root_cols = self.root_columns();
        let mut select_parts: Vec<String> = Vec::new();
        if has_joins {
            if root_cols.is_empty() {
                select_parts.push(format!("{}.*", ROOT_ALIAS));
            } else {
                select_parts.extend(root_cols.iter().map(|c| format!("{}.{}", ROOT_ALIAS, c)));
            }
            for path in &eager_closure {
                let join = planner.join_for(path).ok_or_else(|| {
                    ModelError::Query(format!("no join planned for eager path '{}'", path))
                })?;
                let info = registry
                    .and_then(|r| r.resolve(&join.table))
                    .ok_or_else(|| {
                        ModelError::InvalidPath(format!(
                            "related table '{}' is not registered",
                            join.table
                        ))
                    })?;
                for col in &info.columns {
                    select_parts.push(format!("{}.{} AS {}__{}", join.alias, col, path, col));
                }
            }
        } else if root_cols.is_empty() {
            select_parts.push("*".to_string());
        } else {
            select_parts.extend(root_cols.iter().cloned());
        }

        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&select_parts.join(", "));
        sql.push_str(" FROM ");
        sql.push_str(table);
        if has_joins {
            sql.push(' ');
            sql.push_str(ROOT_ALIAS);
            sql.push(' ');
            sql.push_str(&planner.join_clause_sql());
        }

        let mut params = Vec::new();
        append_where_clause(&mut sql, &mut params, &rendered_wheres, has_joins)?;

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let clauses: Vec<String> = self
                .order_by
                .iter()
                .map(|(field, direction)| {
                    if has_joins {
                        format!("{}.{} {}", ROOT_ALIAS, field, direction)
                    } else {
                        format!("{} {}", field, direction)
                    }
                })
                .collect();
            sql.push_str(&clauses.join(", "));
        }

        if let Some(limit) = self.limit_count {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset_count {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        let mut dependencies: BTreeSet<String> = BTreeSet::new();
        dependencies.insert(table.to_string());
        for join in planner.joins() {
            dependencies.insert(join.table.clone());
        }
        if let Some(reg) = registry {
            for path in &self.prefetch_paths {
                dependencies.extend(path_dependencies(reg, table, path)?);
            }
        }

        let fields_signature = if root_cols.is_empty() {
            "*".to_string()
        } else {
            root_cols.join(",")
        };

        Ok(CompiledQuery {
            sql,
            params,
            table: table.to_string(),
            dependencies,
            fields_signature,
            eager_paths: eager_closure.into_iter().collect(),
        })
    }

    pub(crate) fn compile_count_using(
        &self,
        registry: Option<&RelationshipRegistry>,
    ) -> ModelResult<CompiledQuery> {
        let table = M::table_name();
        let registry = self.require_registry_if_needed(registry)?;

        let mut planner = JoinPlanner::new(table);
        let rendered_wheres = self.resolve_wheres(registry, &mut planner, false)?;
        let has_joins = !planner.is_empty();

        let mut sql = String::from("SELECT COUNT(*) AS n FROM ");
        sql.push_str(table);
        if has_joins {
            sql.push(' ');
            sql.push_str(ROOT_ALIAS);
            sql.push(' ');
            sql.push_str(&planner.join_clause_sql());
        }
        let mut params = Vec::new();
        append_where_clause(&mut sql, &mut params, &rendered_wheres, has_joins)?;

        let mut dependencies: BTreeSet<String> = BTreeSet::new();
        dependencies.insert(table.to_string());
        for join in planner.joins() {
            dependencies.insert(join.table.clone());
        }

        Ok(CompiledQuery {
            sql,
            params,
            table: table.to_string(),
            dependencies,
            fields_signature: "count".to_string(),
            eager_paths: Vec::new(),
        })
    }

    pub(crate) fn compile_delete_using(&self) -> ModelResult<CompiledQuery> {
        let table = M::table_name();
        self.reject_paths_for("delete")?;

        let mut planner = JoinPlanner::new(table);
        let rendered_wheres = self.resolve_wheres(None, &mut planner, true)?;

        let mut sql = format!("DELETE FROM {}", table);
        let mut params = Vec::new();
        append_where_clause(&mut sql, &mut params, &rendered_wheres, false)?;

        let mut dependencies = BTreeSet::new();
        dependencies.insert(table.to_string());
        Ok(CompiledQuery {
            sql,
            params,
            table: table.to_string(),
            dependencies,
            fields_signature: "delete".to_string(),
            eager_paths: Vec::new(),
        })
    }

    pub(crate) fn compile_update_using(
        &self,
        changes: &[(String, Value)],
    ) -> ModelResult<CompiledQuery> {
        let table = M::table_name();
        self.reject_paths_for("update")?;
        if changes.is_empty() {
            return Err(ModelError::Query(
                "update requires at least one field change".to_string(),
            ));
        }

        let mut sorted: Vec<&(String, Value)> = changes.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut sql = format!("UPDATE {} SET ", table);
        let mut params = Vec::new();
        let assignments: Vec<String> = sorted
            .iter()
            .map(|(column, value)| {
                params.push(value.clone());
                format!("{} = ?", column)
            })
            .collect();
        sql.push_str(&assignments.join(", "));

        let mut planner = JoinPlanner::new(table);
        let rendered_wheres = self.resolve_wheres(None, &mut planner, true)?;
        append_where_clause(&mut sql, &mut params, &rendered_wheres, false)?;

        let mut dependencies = BTreeSet::new();
        dependencies.insert(table.to_string());
        Ok(CompiledQuery {
            sql,
            params,
            table: table.to_string(),
            dependencies,
            fields_signature: "update".to_string(),
            eager_paths: Vec::new(),
        })
    }

    /// Canonically sorted conditions with their columns resolved to
    /// alias-qualified expressions
    fn resolve_wheres(
        &self,
        registry: Option<&RelationshipRegistry>,
        planner: &mut JoinPlanner,
        forbid_paths: bool,
    ) -> ModelResult<Vec<(String, WhereCondition)>> {
        let mut wheres = self.wheres.clone();
        wheres.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let table = M::table_name();
        let mut resolved = Vec::with_capacity(wheres.len());
        for cond in wheres {
            let expr = if cond.column.contains("__") {
                if forbid_paths {
                    return Err(ModelError::InvalidPath(format!(
                        "relationship path '{}' is not supported in write statements",
                        cond.column
                    )));
                }
                let reg = registry.ok_or_else(|| {
                    ModelError::Configuration(format!(
                        "no registry attached; cannot resolve path '{}'",
                        cond.column
                    ))
                })?;
                let (alias, column) = planner.plan_filter_path(reg, &cond.column)?;
                format!("{}.{}", alias, column)
            } else {
                if let Some(info) = registry.and_then(|r| r.resolve(table)) {
                    if !info.columns.iter().any(|c| c == &cond.column) {
                        return Err(ModelError::InvalidPath(format!(
                            "'{}' is not a column of '{}'",
                            cond.column, table
                        )));
                    }
                }
                cond.column.clone()
            };
            resolved.push((expr, cond));
        }
        Ok(resolved)
    }

    /// Columns selected off the root table; empty means `*`
    fn root_columns(&self) -> Vec<String> {
        let pk = M::primary_key_name();
        let mut cols: Vec<String> = match &self.selected {
            Some(selected) => selected.clone(),
            None if !self.excluded.is_empty() => {
                M::columns().iter().map(|c| c.to_string()).collect()
            }
            None => return Vec::new(),
        };
        cols.retain(|c| c == pk || !self.excluded.contains(c));
        if !cols.iter().any(|c| c == pk) {
            cols.push(pk.to_string());
        }
        cols
    }

    fn require_registry_if_needed<'a>(
        &'a self,
        registry: Option<&'a RelationshipRegistry>,
    ) -> ModelResult<Option<&'a RelationshipRegistry>> {
        let needs_registry = !self.eager_paths.is_empty()
            || !self.prefetch_paths.is_empty()
            || self.wheres.iter().any(|w| w.column.contains("__"));
        if needs_registry && registry.is_none() {
            return Err(ModelError::Configuration(
                "relationship paths require a registry-bound query".to_string(),
            ));
        }
        Ok(registry)
    }

    fn reject_paths_for(&self, operation: &str) -> ModelResult<()> {
        if !self.eager_paths.is_empty() || !self.prefetch_paths.is_empty() {
            return Err(ModelError::Query(format!(
                "eager/prefetch paths are not supported on {}",
                operation
            )));
        }
        Ok(())
    }
}

/// Expand a dotted path into its cumulative prefixes
pub(crate) fn path_prefixes(path: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut walked = String::new();
    for segment in path.split("__") {
        if !walked.is_empty() {
            walked.push_str("__");
        }
        walked.push_str(segment);
        prefixes.push(walked.clone());
    }
    prefixes
}

fn append_where_clause(
    sql: &mut String,
    params: &mut Vec<Value>,
    rendered: &[(String, WhereCondition)],
    qualify_root: bool,
) -> ModelResult<()> {
    if rendered.is_empty() {
        return Ok(());
    }
    sql.push_str(" WHERE ");
    let mut parts = Vec::with_capacity(rendered.len());
    for (expr, cond) in rendered {
        // Plain root columns keep their alias only when joins are present;
        // resolved path expressions already carry one.
        let expr = if qualify_root && !expr.contains('.') {
            format!("{}.{}", ROOT_ALIAS, expr)
        } else {
            expr.clone()
        };
        parts.push(render_condition(&expr, cond, params)?);
    }
    sql.push_str(&parts.join(" AND "));
    Ok(())
}

fn render_condition(
    expr: &str,
    cond: &WhereCondition,
    params: &mut Vec<Value>,
) -> ModelResult<String> {
    match cond.operator {
        QueryOperator::IsNull | QueryOperator::IsNotNull => {
            Ok(format!("{} {}", expr, cond.operator))
        }
        QueryOperator::In | QueryOperator::NotIn => {
            if let Some((sub_sql, sub_params)) = &cond.subquery {
                params.extend(sub_params.iter().cloned());
                return Ok(format!("{} {} ({})", expr, cond.operator, sub_sql));
            }
            if cond.values.is_empty() {
                // An empty IN list matches nothing; NOT IN matches everything.
                return Ok(match cond.operator {
                    QueryOperator::In => "0 = 1".to_string(),
                    _ => "1 = 1".to_string(),
                });
            }
            let placeholders = vec!["?"; cond.values.len()].join(", ");
            params.extend(cond.values.iter().cloned());
            Ok(format!("{} {} ({})", expr, cond.operator, placeholders))
        }
        _ => {
            let value = cond.value.clone().ok_or_else(|| {
                ModelError::Query(format!("predicate on '{}' is missing a value", expr))
            })?;
            params.push(value);
            Ok(format!("{} {} ?", expr, cond.operator))
        }
    }
}
