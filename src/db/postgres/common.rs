use sqlx::{
    PgPool, Postgres,
    postgres::PgArguments,
    query::Query,
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
pub fn prepare(built: &BuiltQuery) -> Query<'_, Postgres, PgArguments> {
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

pub fn parse_state<T: std::str::FromStr<Err = String>>(raw: &str) -> DbResult<T> {
    raw.parse()
        .map_err(|e| DbError::Internal(format!("Invalid state in database: {}", e)))
}

/// Parse a job id column stored as TEXT.
pub fn parse_job_id(raw: &str) -> DbResult<JobId> {
    raw.parse()
        .map_err(|e| DbError::Internal(format!("Invalid job id in database: {}", e)))
}

/// Detect optional tables in the current schema.
pub async fn probe_capabilities(pool: &PgPool) -> DbResult<StoreCapabilities> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM information_schema.tables
        WHERE table_schema = current_schema() AND table_name = $1
        "#,
    )
    .bind(DEPENDENCY_TABLE)
    .fetch_one(pool)
    .await?;

    Ok(StoreCapabilities {
        dependencies: count > 0,
    })
}
