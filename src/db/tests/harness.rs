//! Test harness for database repository testing
//!
//! Provides utilities for setting up test databases:
//! - SQLite: Fast in-memory databases with real migrations
//! - PostgreSQL: Testcontainers-based instances with real migrations
//!
//! Record repositories only read and delete, so rows are seeded through a
//! [`Fixture`] that talks to the pool directly.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use sqlx::types::Json;

use crate::models::{ExecutionState, JobId};

/// Create an in-memory SQLite pool for testing
///
/// A single connection keeps every statement on the same in-memory database,
/// and makes a leaked transaction visible as a hang in the next query.
#[cfg(feature = "database-sqlite")]
pub async fn create_sqlite_pool() -> sqlx::SqlitePool {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

/// Run SQLite migrations on the pool
///
/// Uses the actual migration files to ensure tests match production schema
#[cfg(feature = "database-sqlite")]
pub async fn run_sqlite_migrations(pool: &sqlx::SqlitePool) {
    sqlx::migrate!("./migrations_sqlx/sqlite")
        .run(pool)
        .await
        .expect("Failed to run SQLite migrations");
}

/// Fixed reference instant so orderings are deterministic.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn at(offset_secs: i64) -> DateTime<Utc> {
    base_time() + Duration::seconds(offset_secs)
}

/// Direct pool access for seeding rows and injecting failures.
pub enum Fixture {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(sqlx::PgPool),
}

/// Run the same statement expression against whichever pool backs the fixture.
macro_rules! on_pool {
    ($fixture:expr, |$pool:ident| $body:expr) => {
        match $fixture {
            #[cfg(feature = "database-sqlite")]
            Fixture::Sqlite($pool) => $body,
            #[cfg(feature = "database-postgres")]
            Fixture::Postgres($pool) => $body,
        }
    };
}

impl Fixture {
    /// Numeric jobs are created `id` seconds after [`base_time`], UUID jobs at it.
    pub async fn insert_job(
        &self,
        id: JobId,
        state: ExecutionState,
        owner_id: Option<&str>,
    ) {
        let created_at = match id {
            JobId::Numeric(n) => at(n as i64),
            JobId::Uuid(_) => base_time(),
        };
        on_pool!(self, |pool| {
            sqlx::query(
                "INSERT INTO jobs (id, state, owner_id, created_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(id.to_string())
            .bind(state.as_str())
            .bind(owner_id)
            .bind(created_at)
            .execute(pool)
            .await
            .expect("Failed to insert job");
        })
    }

    pub async fn insert_task(
        &self,
        job_id: JobId,
        task_id: &str,
        state: ExecutionState,
        created_offset_secs: i64,
    ) {
        self.insert_task_with_payload(job_id, task_id, state, created_offset_secs, None)
            .await
    }

    pub async fn insert_task_with_payload(
        &self,
        job_id: JobId,
        task_id: &str,
        state: ExecutionState,
        created_offset_secs: i64,
        definition: Option<Value>,
    ) {
        let job_id = job_id.to_string();
        let created_at = at(created_offset_secs);
        let progress = if state == ExecutionState::Done { 1.0 } else { 0.0 };
        on_pool!(self, |pool| {
            sqlx::query(
                r#"
                INSERT INTO tasks (id, job_id, state, progress, max_retries, created_at, updated_at, definition)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(task_id)
            .bind(&job_id)
            .bind(state.as_str())
            .bind(progress)
            .bind(3_i64)
            .bind(created_at)
            .bind(created_at)
            .bind(definition.clone().map(Json))
            .execute(pool)
            .await
            .expect("Failed to insert task");
        })
    }

    pub async fn insert_dependency(
        &self,
        job_id: JobId,
        pre_task_id: &str,
        post_task_id: &str,
    ) {
        let job_id = job_id.to_string();
        on_pool!(self, |pool| {
            sqlx::query(
                "INSERT INTO task_dependencies (job_id, pre_task_id, post_task_id) VALUES ($1, $2, $3)",
            )
            .bind(&job_id)
            .bind(pre_task_id)
            .bind(post_task_id)
            .execute(pool)
            .await
            .expect("Failed to insert dependency");
        })
    }

    pub async fn insert_stream(
        &self,
        id: &str,
        job_id: JobId,
        created_offset_secs: i64,
    ) {
        let job_id = job_id.to_string();
        let created_at = at(created_offset_secs);
        on_pool!(self, |pool| {
            sqlx::query(
                "INSERT INTO streams (id, job_id, created_at, updated_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(id)
            .bind(&job_id)
            .bind(created_at)
            .bind(created_at)
            .execute(pool)
            .await
            .expect("Failed to insert stream");
        })
    }

    /// Number of rows in `table`.
    pub async fn count(&self, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        on_pool!(self, |pool| {
            sqlx::query_scalar::<_, i64>(&sql)
                .fetch_one(pool)
                .await
                .expect("Failed to count rows")
        })
    }

    /// Make every `DELETE FROM jobs` abort, after earlier statements in the
    /// same transaction have already run.
    pub async fn fail_job_deletes(&self) {
        self.fail_deletes_on("jobs").await
    }

    /// Make every `DELETE FROM tasks` abort, after dependency edges in the
    /// same transaction have already been removed.
    pub async fn fail_task_deletes(&self) {
        self.fail_deletes_on("tasks").await
    }

    async fn fail_deletes_on(&self, table: &str) {
        let name = format!("fail_{}_delete", table);
        match self {
            #[cfg(feature = "database-sqlite")]
            Fixture::Sqlite(pool) => {
                sqlx::query(&format!(
                    r#"
                    CREATE TRIGGER {name} BEFORE DELETE ON {table}
                    BEGIN
                        SELECT RAISE(ABORT, 'simulated failure');
                    END
                    "#
                ))
                .execute(pool)
                .await
                .expect("Failed to install trigger");
            }
            #[cfg(feature = "database-postgres")]
            Fixture::Postgres(pool) => {
                sqlx::query(&format!(
                    r#"
                    CREATE FUNCTION {name}() RETURNS trigger AS $$
                    BEGIN
                        RAISE EXCEPTION 'simulated failure';
                    END;
                    $$ LANGUAGE plpgsql
                    "#
                ))
                .execute(pool)
                .await
                .expect("Failed to create trigger function");
                sqlx::query(&format!(
                    "CREATE TRIGGER {name} BEFORE DELETE ON {table} \
                     FOR EACH ROW EXECUTE FUNCTION {name}()"
                ))
                .execute(pool)
                .await
                .expect("Failed to install trigger");
            }
        }
    }

    /// Remove the optional dependency table, as in deployments that never
    /// created it.
    pub async fn drop_dependency_table(&self) {
        on_pool!(self, |pool| {
            sqlx::query("DROP TABLE task_dependencies")
                .execute(pool)
                .await
                .expect("Failed to drop task_dependencies");
        })
    }
}

/// PostgreSQL test harness using testcontainers
#[cfg(feature = "database-postgres")]
pub mod postgres {
    use std::sync::OnceLock;

    use sqlx::PgPool;
    use testcontainers_modules::{
        postgres::Postgres,
        testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner},
    };
    use tokio::sync::OnceCell;

    /// Shared container state - initialized once per test run
    struct SharedContainer {
        #[allow(dead_code)] // Test infrastructure: keeps container alive
        container: ContainerAsync<Postgres>,
        connection_string: String,
    }

    static SHARED_CONTAINER: OnceLock<OnceCell<SharedContainer>> = OnceLock::new();

    async fn get_shared_container() -> &'static SharedContainer {
        let cell = SHARED_CONTAINER.get_or_init(OnceCell::new);
        cell.get_or_init(|| async {
            let container = Postgres::default()
                .with_tag("18-alpine")
                .start()
                .await
                .expect("Failed to start PostgreSQL container");

            let host = container.get_host().await.expect("Failed to get host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("Failed to get port");

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            SharedContainer {
                container,
                connection_string,
            }
        })
        .await
    }

    /// Create a pool whose `search_path` points at a fresh schema, so each
    /// test sees an empty store while sharing one container.
    pub async fn create_isolated_postgres_pool() -> PgPool {
        let shared = get_shared_container().await;

        let admin_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&shared.connection_string)
            .await
            .expect("Failed to connect to PostgreSQL");

        let schema_name = format!("test_{}", uuid::Uuid::new_v4().simple());

        sqlx::query(&format!("CREATE SCHEMA \"{}\"", schema_name))
            .execute(&admin_pool)
            .await
            .expect("Failed to create test schema");

        let isolated_url = format!(
            "{}?options=-c search_path={}",
            shared.connection_string, schema_name
        );

        sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&isolated_url)
            .await
            .expect("Failed to connect to isolated schema")
    }

    pub async fn run_postgres_migrations(pool: &PgPool) {
        sqlx::migrate!("./migrations_sqlx/postgres")
            .run(pool)
            .await
            .expect("Failed to run PostgreSQL migrations");
    }
}
