use sqlx::{
    Sqlite,
    query::Query,
    sqlite::{SqliteArguments, SqlitePool},
};

use crate::{
    db::{
        error::{DbError, DbResult},
        query::{BuiltQuery, SqlValue},
        repos::{DEPENDENCY_TABLE, StoreCapabilities},
    },
    models::JobId,
};

/// Prepare a built statement with its parameters bound in marker order.
pub fn prepare(built: &BuiltQuery) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    let mut query = sqlx::query(&built.sql);
    for param in &built.params {
        query = match param {
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Bool(v) => query.bind(*v),
        };
    }
    query
}

/// Parse an optional JSON column stored as TEXT.
pub fn parse_json(raw: Option<String>) -> DbResult<Option<serde_json::Value>> {
    raw.map(|s| serde_json::from_str(&s)).transpose().map_err(DbError::from)
}

/// Parse a state column, treating unknown values as corrupt data.
pub fn parse_state<T: std::str::FromStr<Err = String>>(raw: &str) -> DbResult<T> {
    raw.parse()
        .map_err(|e| DbError::Internal(format!("Invalid state in database: {}", e)))
}

/// Parse a job id column stored as TEXT.
pub fn parse_job_id(raw: &str) -> DbResult<JobId> {
    raw.parse()
        .map_err(|e| DbError::Internal(format!("Invalid job id in database: {}", e)))
}

/// Detect optional tables present in the schema.
pub async fn probe_capabilities(pool: &SqlitePool) -> DbResult<StoreCapabilities> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = $1",
    )
    .bind(DEPENDENCY_TABLE)
    .fetch_one(pool)
    .await?;

    Ok(StoreCapabilities {
        dependencies: count > 0,
    })
}
