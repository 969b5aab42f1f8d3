mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod query;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// PostgreSQL pool configuration with optional read replica.
#[cfg(feature = "database-postgres")]
pub struct PgPoolPair {
    /// Primary pool for writes.
    pub write: sqlx::PgPool,
    /// Optional read replica pool. If None, reads use the write pool.
    pub read: Option<sqlx::PgPool>,
}

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(PgPoolPair),
    #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
    _None(std::convert::Infallible),
}

/// Record store backed by SQLite or PostgreSQL.
///
/// Optional capabilities are probed once at construction and handed to the
/// record repository, so a deployment without dependency storage never issues
/// statements against the missing table.
pub struct DbPool {
    inner: PoolStorage,
    capabilities: StoreCapabilities,
    records: Arc<dyn RecordRepo>,
}

impl DbPool {
    /// Wrap an existing SQLite pool.
    #[cfg(feature = "database-sqlite")]
    pub async fn from_sqlite(pool: sqlx::SqlitePool) -> DbResult<Self> {
        let capabilities = sqlite::probe_capabilities(&pool).await?;
        let records = Arc::new(sqlite::SqliteRecordRepo::new(pool.clone(), capabilities));
        Ok(DbPool {
            inner: PoolStorage::Sqlite(pool),
            capabilities,
            records,
        })
    }

    /// Wrap existing PostgreSQL pools.
    #[cfg(feature = "database-postgres")]
    pub async fn from_postgres(
        write_pool: sqlx::PgPool,
        read_pool: Option<sqlx::PgPool>,
    ) -> DbResult<Self> {
        let capabilities = postgres::probe_capabilities(&write_pool).await?;
        let records = Arc::new(postgres::PostgresRecordRepo::new(
            write_pool.clone(),
            read_pool.clone(),
            capabilities,
        ));
        Ok(DbPool {
            inner: PoolStorage::Postgres(PgPoolPair {
                write: write_pool,
                read: read_pool,
            }),
            capabilities,
            records,
        })
    }

    /// Connect using configuration.
    ///
    /// Migrations run before the capability probe when the config asks for
    /// them, so a freshly created store reports its full capabilities.
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .foreign_keys(true)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                if cfg.run_migrations {
                    run_sqlite_migrations(&pool).await?;
                }

                Self::from_sqlite(pool).await
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                let options = |url: &str| -> DbResult<sqlx::postgres::PgConnectOptions> {
                    let options: sqlx::postgres::PgConnectOptions = url.parse()?;
                    Ok(options.ssl_mode(cfg.ssl_mode.into()))
                };
                let pool_options = || {
                    sqlx::postgres::PgPoolOptions::new()
                        .min_connections(cfg.min_connections)
                        .max_connections(cfg.max_connections)
                        .acquire_timeout(std::time::Duration::from_secs(cfg.connect_timeout_secs))
                        .idle_timeout(std::time::Duration::from_secs(cfg.idle_timeout_secs))
                };

                let write_pool = pool_options().connect_with(options(cfg.url.as_str())?).await?;

                let read_pool = if let Some(read_url) = &cfg.read_url {
                    tracing::info!("Configuring read replica pool");
                    Some(pool_options().connect_with(options(read_url.as_str())?).await?)
                } else {
                    None
                };

                if cfg.run_migrations {
                    run_postgres_migrations(&write_pool).await?;
                }

                Self::from_postgres(write_pool, read_pool).await
            }
        }
    }

    /// Run database migrations using sqlx's migration runner.
    ///
    /// Capabilities are not re-probed; reconnect to pick up tables created
    /// by the migrations.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => run_sqlite_migrations(pool).await,
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => run_postgres_migrations(&pools.write).await,
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Get the record repository.
    pub fn records(&self) -> Arc<dyn RecordRepo> {
        Arc::clone(&self.records)
    }

    pub fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    /// Name of the backing store, for logging.
    pub fn backend(&self) -> &'static str {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(_) => "sqlite",
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(_) => "postgres",
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Health check for database connectivity
    pub async fn health_check(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                sqlx::query("SELECT 1").execute(&pools.write).await?;
                if let Some(read) = &pools.read {
                    sqlx::query("SELECT 1").execute(read).await?;
                }
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => pool.close().await,
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                pools.write.close().await;
                if let Some(read) = &pools.read {
                    read.close().await;
                }
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }
}

#[cfg(feature = "database-sqlite")]
async fn run_sqlite_migrations(pool: &sqlx::SqlitePool) -> DbResult<()> {
    tracing::info!("Running SQLite migrations");
    sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
    tracing::info!("SQLite migrations completed successfully");
    Ok(())
}

#[cfg(feature = "database-postgres")]
async fn run_postgres_migrations(pool: &sqlx::PgPool) -> DbResult<()> {
    tracing::info!("Running PostgreSQL migrations");
    sqlx::migrate!("./migrations_sqlx/postgres").run(pool).await?;
    tracing::info!("PostgreSQL migrations completed successfully");
    Ok(())
}
