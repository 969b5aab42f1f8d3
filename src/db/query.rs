//! Parameterized SQL assembly.
//!
//! [`QueryAssembler`] composes a `SELECT` statement from clauses and collects
//! bind values alongside it. Positional markers use the `$N` form, which both
//! PostgreSQL and SQLite (through sqlx) accept.
//!
//! ```
//! use taskwatch::db::query::{QueryAssembler, SqlValue};
//! use taskwatch::db::SortOrder;
//!
//! let built = QueryAssembler::new()
//!     .select(["id", "state"])
//!     .from("jobs")
//!     .filter("state = ?", "done")
//!     .order_by("id", SortOrder::Desc)
//!     .limit(10)
//!     .offset(5)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(
//!     built.sql,
//!     "SELECT id, state FROM jobs WHERE state = $1 ORDER BY id DESC LIMIT $2 OFFSET $3"
//! );
//! assert_eq!(
//!     built.params,
//!     vec![SqlValue::from("done"), SqlValue::Int(10), SqlValue::Int(5)]
//! );
//! ```

use super::{DbError, DbResult, SortOrder};
use crate::models::JobId;

/// Token in filter templates that is replaced by the next positional marker.
const PLACEHOLDER: char = '?';

/// A bind value carried next to the SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<JobId> for SqlValue {
    fn from(value: JobId) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

/// Join flavor for [`QueryAssembler::join_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinKind {
    #[default]
    Left,
    Inner,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Inner => "INNER JOIN",
        }
    }
}

/// SQL text plus the bind values it references, in marker order.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Fluent builder for a single `SELECT` statement.
///
/// `build` consumes the assembler, so every statement needs its own
/// instance.
#[derive(Debug, Default)]
#[must_use]
pub struct QueryAssembler {
    select: Option<String>,
    from: Option<String>,
    joins: Vec<String>,
    conditions: Vec<String>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    params: Vec<SqlValue>,
    /// First filter template that had a value but no placeholder.
    unbound: Option<String>,
}

impl QueryAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the projected columns. Required before [`build`](Self::build).
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields = fields
            .into_iter()
            .map(|f| f.as_ref().trim().to_string())
            .filter(|f| !f.is_empty())
            .collect::<Vec<_>>();
        self.select = (!fields.is_empty()).then(|| fields.join(", "));
        self
    }

    pub fn from(mut self, table: &str) -> Self {
        self.from = Some(table.to_string());
        self
    }

    /// Append a `LEFT JOIN`.
    pub fn join(self, table: &str, condition: &str) -> Self {
        self.join_with(JoinKind::Left, table, condition)
    }

    pub fn join_with(mut self, kind: JoinKind, table: &str, condition: &str) -> Self {
        self.joins
            .push(format!("{} {} ON {}", kind.as_sql(), table, condition));
        self
    }

    /// Append an `AND`-joined condition bound to `value`.
    ///
    /// Every `?` in `template` becomes the same new positional marker, so a
    /// value can be referenced more than once (`a = ? OR b = ?`). A template
    /// without any `?` makes [`build`](Self::build) fail with
    /// [`DbError::MissingPlaceholder`].
    pub fn filter(mut self, template: &str, value: impl Into<SqlValue>) -> Self {
        if !template.contains(PLACEHOLDER) && self.unbound.is_none() {
            self.unbound = Some(template.to_string());
        }
        self.params.push(value.into());
        let marker = format!("${}", self.params.len());
        self.conditions
            .push(template.replace(PLACEHOLDER, &marker));
        self
    }

    /// Append a static condition verbatim.
    pub fn filter_raw(mut self, condition: &str) -> Self {
        self.conditions.push(condition.to_string());
        self
    }

    pub fn group_by(mut self, field: &str) -> Self {
        self.group_by.push(field.to_string());
        self
    }

    pub fn order_by(mut self, field: &str, order: SortOrder) -> Self {
        self.order_by
            .push(format!("{} {}", field, order.as_sql()));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Render the statement.
    ///
    /// Markers follow the order values were supplied: filter values first,
    /// then `LIMIT`, then `OFFSET`.
    pub fn build(self) -> DbResult<BuiltQuery> {
        let select = self.select.ok_or(DbError::MissingClause("SELECT"))?;
        if let Some(template) = self.unbound {
            return Err(DbError::MissingPlaceholder(template));
        }
        let mut params = self.params;
        let mut sql = format!("SELECT {}", select);

        if let Some(from) = &self.from {
            sql.push_str(" FROM ");
            sql.push_str(from);
        }

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }

        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        if let Some(limit) = self.limit {
            params.push(SqlValue::Int(limit));
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }

        if let Some(offset) = self.offset {
            params.push(SqlValue::Int(offset));
            sql.push_str(&format!(" OFFSET ${}", params.len()));
        }

        Ok(BuiltQuery { sql, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker_positions(sql: &str) -> Vec<usize> {
        let re = regex::Regex::new(r"\$(\d+)").unwrap();
        re.captures_iter(sql)
            .map(|c| c[1].parse().unwrap())
            .collect()
    }

    #[test]
    fn test_build_without_select_fails() {
        let result = QueryAssembler::new().from("jobs").build();
        assert!(matches!(result, Err(DbError::MissingClause("SELECT"))));
    }

    #[test]
    fn test_empty_select_counts_as_missing() {
        let result = QueryAssembler::new()
            .select(Vec::<&str>::new())
            .from("jobs")
            .build();
        assert!(matches!(result, Err(DbError::MissingClause(_))));
    }

    #[test]
    fn test_filter_without_placeholder_fails() {
        let result = QueryAssembler::new()
            .select(["id"])
            .from("jobs")
            .filter("state = 'done'", "done")
            .filter("owner_id = ?", "alice")
            .build();
        match result {
            Err(DbError::MissingPlaceholder(template)) => assert_eq!(template, "state = 'done'"),
            other => panic!("expected MissingPlaceholder, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_limit_offset_ordering() {
        let built = QueryAssembler::new()
            .select(["id"])
            .from("jobs")
            .filter("state = ?", "done")
            .limit(10)
            .offset(5)
            .build()
            .unwrap();

        assert_eq!(
            built.params,
            vec![
                SqlValue::Text("done".into()),
                SqlValue::Int(10),
                SqlValue::Int(5)
            ]
        );
        assert_eq!(built.sql.matches(" WHERE ").count(), 1);
        assert_eq!(built.sql.matches(" LIMIT ").count(), 1);
        assert_eq!(built.sql.matches(" OFFSET ").count(), 1);

        let where_pos = built.sql.find(" WHERE ").unwrap();
        let limit_pos = built.sql.find(" LIMIT ").unwrap();
        let offset_pos = built.sql.find(" OFFSET ").unwrap();
        assert!(where_pos < limit_pos && limit_pos < offset_pos);
        assert_eq!(marker_positions(&built.sql), vec![1, 2, 3]);
    }

    #[test]
    fn test_limit_marker_follows_later_filters() {
        // limit() before filter() still numbers the limit after the filter value
        let built = QueryAssembler::new()
            .select(["id"])
            .from("jobs")
            .limit(20)
            .filter("owner_id = ?", "alice")
            .build()
            .unwrap();

        assert_eq!(built.sql, "SELECT id FROM jobs WHERE owner_id = $1 LIMIT $2");
        assert_eq!(
            built.params,
            vec![SqlValue::from("alice"), SqlValue::Int(20)]
        );
    }

    #[test]
    fn test_raw_filters_and_values_join_with_and() {
        let built = QueryAssembler::new()
            .select(["id"])
            .from("jobs")
            .filter_raw("reported_at IS NULL")
            .filter("state = ?", "failed")
            .filter("owner_id = ?", "bob")
            .build()
            .unwrap();

        assert_eq!(
            built.sql,
            "SELECT id FROM jobs WHERE reported_at IS NULL AND state = $1 AND owner_id = $2"
        );
        assert_eq!(built.params.len(), 2);
    }

    #[test]
    fn test_repeated_placeholder_shares_marker() {
        let built = QueryAssembler::new()
            .select(["job_id"])
            .from("task_dependencies")
            .filter("job_id = ?", 7_i64)
            .filter("(pre_task_id = ? OR post_task_id = ?)", "t1")
            .build()
            .unwrap();

        assert_eq!(
            built.sql,
            "SELECT job_id FROM task_dependencies WHERE job_id = $1 AND (pre_task_id = $2 OR post_task_id = $2)"
        );
        assert_eq!(built.params, vec![SqlValue::Int(7), SqlValue::from("t1")]);
    }

    #[test]
    fn test_joins_groups_and_orders_keep_call_order() {
        let built = QueryAssembler::new()
            .select(["j.id", "COUNT(t.id) AS total"])
            .from("jobs j")
            .join("tasks t", "t.job_id = j.id")
            .join_with(JoinKind::Inner, "streams s", "s.job_id = j.id")
            .group_by("j.id")
            .group_by("j.state")
            .order_by("j.id", SortOrder::Desc)
            .order_by("j.state", SortOrder::Asc)
            .build()
            .unwrap();

        assert_eq!(
            built.sql,
            "SELECT j.id, COUNT(t.id) AS total FROM jobs j \
             LEFT JOIN tasks t ON t.job_id = j.id \
             INNER JOIN streams s ON s.job_id = j.id \
             GROUP BY j.id, j.state ORDER BY j.id DESC, j.state ASC"
        );
        assert!(built.params.is_empty());
    }

    #[test]
    fn test_build_is_deterministic() {
        let make = || {
            QueryAssembler::new()
                .select(["id"])
                .from("jobs")
                .filter("id LIKE ?", "%4%")
                .order_by("id", SortOrder::Desc)
                .limit(50)
                .offset(0)
                .build()
                .unwrap()
        };
        assert_eq!(make(), make());
    }

    #[test]
    fn test_sql_value_conversions() {
        assert_eq!(SqlValue::from(3_i32), SqlValue::Int(3));
        assert_eq!(SqlValue::from(0.5_f64), SqlValue::Float(0.5));
        assert_eq!(SqlValue::from(true), SqlValue::Bool(true));
        assert_eq!(
            SqlValue::from(String::from("x")),
            SqlValue::Text("x".into())
        );
        assert_eq!(SqlValue::from(JobId::from(12)), SqlValue::from("12"));
    }
}
