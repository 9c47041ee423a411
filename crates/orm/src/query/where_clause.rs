//! Query Builder WHERE clause operations
//!
//! Every method accepts either a plain column name or a dotted relationship
//! path (`author__name`); path resolution happens at compile time.

use serde_json::Value;

use super::builder::QueryBuilder;
use super::types::{QueryOperator, WhereCondition};

impl<M> QueryBuilder<M> {
    /// Add a predicate with an explicit operator
    pub fn where_op<T: Into<Value>>(
        mut self,
        column: &str,
        operator: QueryOperator,
        value: T,
    ) -> Self {
        self.wheres.push(WhereCondition {
            column: column.to_string(),
            operator,
            value: Some(value.into()),
            values: Vec::new(),
            subquery: None,
        });
        self
    }

    /// Add an equality predicate
    pub fn filter<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::Equal, value)
    }

    /// Add an equality predicate
    pub fn where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::Equal, value)
    }

    /// Add a not-equal predicate
    pub fn where_ne<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::NotEqual, value)
    }

    /// Add a greater-than predicate
    pub fn where_gt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::GreaterThan, value)
    }

    /// Add a greater-than-or-equal predicate
    pub fn where_gte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::GreaterThanOrEqual, value)
    }

    /// Add a less-than predicate
    pub fn where_lt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::LessThan, value)
    }

    /// Add a less-than-or-equal predicate
    pub fn where_lte<T: Into<Value>>(self, column: &str, value: T) -> Self {
        self.where_op(column, QueryOperator::LessThanOrEqual, value)
    }

    /// Add a LIKE predicate
    pub fn where_like(self, column: &str, pattern: &str) -> Self {
        self.where_op(column, QueryOperator::Like, pattern)
    }

    /// Add a NOT LIKE predicate
    pub fn where_not_like(self, column: &str, pattern: &str) -> Self {
        self.where_op(column, QueryOperator::NotLike, pattern)
    }

    /// Add an IN predicate
    pub fn where_in<T: Into<Value>>(mut self, column: &str, values: Vec<T>) -> Self {
        self.wheres.push(WhereCondition {
            column: column.to_string(),
            operator: QueryOperator::In,
            value: None,
            values: values.into_iter().map(Into::into).collect(),
            subquery: None,
        });
        self
    }

    /// Add a NOT IN predicate
    pub fn where_not_in<T: Into<Value>>(mut self, column: &str, values: Vec<T>) -> Self {
        self.wheres.push(WhereCondition {
            column: column.to_string(),
            operator: QueryOperator::NotIn,
            value: None,
            values: values.into_iter().map(Into::into).collect(),
            subquery: None,
        });
        self
    }

    /// Add an IS NULL predicate
    pub fn where_null(mut self, column: &str) -> Self {
        self.wheres.push(WhereCondition {
            column: column.to_string(),
            operator: QueryOperator::IsNull,
            value: None,
            values: Vec::new(),
            subquery: None,
        });
        self
    }

    /// Add an IS NOT NULL predicate
    pub fn where_not_null(mut self, column: &str) -> Self {
        self.wheres.push(WhereCondition {
            column: column.to_string(),
            operator: QueryOperator::IsNotNull,
            value: None,
            values: Vec::new(),
            subquery: None,
        });
        self
    }

    /// Add an IN predicate over a parameterized subquery
    pub fn where_in_subquery(mut self, column: &str, sql: &str, params: Vec<Value>) -> Self {
        self.wheres.push(WhereCondition {
            column: column.to_string(),
            operator: QueryOperator::In,
            value: None,
            values: Vec::new(),
            subquery: Some((sql.to_string(), params)),
        });
        self
    }
}
