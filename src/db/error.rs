use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not configured")]
    NotConfigured,

    #[error("Not found")]
    NotFound,

    /// A statement was built without a clause it cannot do without.
    #[error("Query is missing a required {0} clause")]
    MissingClause(&'static str),

    /// A filter was given a bind value but its template has no `?` for it.
    #[error("Filter has a value but no placeholder: {0}")]
    MissingPlaceholder(String),

    /// Requested limit/offset lies outside the accepted bounds.
    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DbResult<T> = Result<T, DbError>;
