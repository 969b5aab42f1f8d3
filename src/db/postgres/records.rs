use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::common::{parse_job_id, parse_state, prepare};
use crate::{
    db::{
        error::{DbError, DbResult},
        query::QueryAssembler,
        repos::{Page, PageResult, RecordRepo, SortOrder, StoreCapabilities, statements},
    },
    models::{
        AppliedJobFilters, ClearResult, ColumnSchema, DeletedTask, Job, JobId, JobSummary,
        RECORD_TABLES, SchemaDescription, Stream, TableSchema, Task, TaskCounts, TaskDependency, TerminalState,
    },
};

pub struct PostgresRecordRepo {
    write_pool: PgPool,
    read_pool: PgPool,
    capabilities: StoreCapabilities,
}

impl PostgresRecordRepo {
    pub fn new(
        write_pool: PgPool,
        read_pool: Option<PgPool>,
        capabilities: StoreCapabilities,
    ) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
            capabilities,
        }
    }

    fn job_from_row(row: &PgRow) -> DbResult<Job> {
        Ok(Job {
            id: parse_job_id(&row.try_get::<String, _>("id")?)?,
            state: parse_state(&row.try_get::<String, _>("state")?)?,
            error: row.try_get("error")?,
            owner_id: row.try_get("owner_id")?,
            reported_at: row.try_get("reported_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn task_from_row(row: &PgRow) -> DbResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            job_id: parse_job_id(&row.try_get::<String, _>("job_id")?)?,
            state: parse_state(&row.try_get::<String, _>("state")?)?,
            progress: row.try_get("progress")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            timeout_secs: row.try_get("timeout_secs")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            updated_at: row.try_get("updated_at")?,
            definition: row.try_get("definition")?,
            output: row.try_get("output")?,
        })
    }
}

#[async_trait]
impl RecordRepo for PostgresRecordRepo {
    async fn list_jobs_with_stats(
        &self,
        filters: &AppliedJobFilters,
        page: Page,
    ) -> DbResult<PageResult<JobSummary>> {
        let list = statements::job_stats(filters, page)?;
        let rows = prepare(&list).fetch_all(&self.read_pool).await?;

        let items = rows
            .iter()
            .map(|row| {
                Ok(JobSummary {
                    job: Self::job_from_row(row)?,
                    tasks: TaskCounts {
                        total: row.try_get("total_tasks")?,
                        completed: row.try_get("completed_tasks")?,
                        running: row.try_get("running_tasks")?,
                        pending: row.try_get("pending_tasks")?,
                        failed: row.try_get("failed_tasks")?,
                    },
                })
            })
            .collect::<DbResult<Vec<_>>>()?;

        let count = statements::job_count(filters)?;
        let total: i64 = prepare(&count)
            .fetch_one(&self.read_pool)
            .await?
            .try_get("total")?;

        Ok(PageResult::new(items, total))
    }

    async fn get_job(&self, job_id: JobId) -> DbResult<Option<Job>> {
        let built = statements::job_by_id(job_id)?;
        let row = prepare(&built).fetch_optional(&self.read_pool).await?;
        row.as_ref().map(Self::job_from_row).transpose()
    }

    async fn list_tasks(&self, job_id: JobId) -> DbResult<Vec<Task>> {
        let built = statements::tasks_for_job(job_id)?;
        let rows = prepare(&built).fetch_all(&self.read_pool).await?;
        rows.iter().map(Self::task_from_row).collect()
    }

    async fn list_dependencies(&self, job_id: JobId) -> DbResult<Vec<TaskDependency>> {
        if !self.capabilities.dependencies {
            return Ok(Vec::new());
        }

        let built = statements::dependencies_for_job(job_id)?;
        let rows = prepare(&built).fetch_all(&self.read_pool).await?;
        rows.iter()
            .map(|row| {
                Ok(TaskDependency {
                    job_id: parse_job_id(&row.try_get::<String, _>("job_id")?)?,
                    pre_task_id: row.try_get("pre_task_id")?,
                    post_task_id: row.try_get("post_task_id")?,
                })
            })
            .collect()
    }

    async fn delete_job(&self, job_id: JobId) -> DbResult<()> {
        let mut tx = self.write_pool.begin().await?;

        let exists = statements::job_exists(job_id)?;
        if prepare(&exists).fetch_optional(&mut *tx).await?.is_none() {
            return Err(DbError::NotFound);
        }

        if self.capabilities.dependencies {
            sqlx::query(statements::DELETE_JOB_DEPENDENCIES)
                .bind(job_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(statements::DELETE_JOB_TASKS)
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(statements::DELETE_JOB)
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await?;

        // Lost a race with a concurrent delete
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_task(&self, job_id: JobId, task_id: &str) -> DbResult<DeletedTask> {
        let mut tx = self.write_pool.begin().await?;

        let exists = statements::task_exists(job_id, task_id)?;
        if prepare(&exists).fetch_optional(&mut *tx).await?.is_none() {
            return Err(DbError::NotFound);
        }

        if self.capabilities.dependencies {
            sqlx::query(statements::DELETE_TASK_DEPENDENCIES)
                .bind(job_id.to_string())
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(statements::DELETE_TASK)
            .bind(job_id.to_string())
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(DeletedTask {
            job_id,
            task_id: task_id.to_string(),
        })
    }

    async fn clear_by_state(&self, state: TerminalState) -> DbResult<ClearResult> {
        let mut tx = self.write_pool.begin().await?;

        // The deletes re-evaluate state membership. One snapshot for the whole
        // sweep keeps them on the captured ids, and the row locks make
        // concurrent writers to those jobs wait instead of failing the sweep.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        let select = statements::job_ids_in_state(state, true)?;
        let job_ids = prepare(&select)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| parse_job_id(&row.try_get::<String, _>("id")?))
            .collect::<DbResult<Vec<JobId>>>()?;

        if job_ids.is_empty() {
            tx.commit().await?;
            return Ok(ClearResult::empty());
        }

        let mut deleted_jobs = 0;
        for stmt in statements::clear_by_state(state, self.capabilities.dependencies)? {
            deleted_jobs = prepare(&stmt).execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(ClearResult {
            deleted_jobs_count: deleted_jobs,
            job_ids,
        })
    }

    async fn list_streams(&self, page: Page) -> DbResult<PageResult<Stream>> {
        let built = statements::streams(page)?;
        let rows = prepare(&built).fetch_all(&self.read_pool).await?;
        let items = rows
            .iter()
            .map(|row| {
                Ok(Stream {
                    id: row.try_get("id")?,
                    job_id: parse_job_id(&row.try_get::<String, _>("job_id")?)?,
                    created_at: row.try_get("created_at")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect::<DbResult<Vec<_>>>()?;

        let count = statements::stream_count()?;
        let total: i64 = prepare(&count)
            .fetch_one(&self.read_pool)
            .await?
            .try_get("total")?;

        Ok(PageResult::new(items, total))
    }

    async fn describe_schema(&self) -> DbResult<SchemaDescription> {
        let table_list = RECORD_TABLES
            .iter()
            .map(|t| format!("'{}'", t))
            .collect::<Vec<_>>()
            .join(", ");

        // information_schema uses domain types that sqlx cannot decode directly
        let built = QueryAssembler::new()
            .select([
                "CAST(table_name AS TEXT) AS table_name",
                "CAST(column_name AS TEXT) AS column_name",
                "CAST(data_type AS TEXT) AS data_type",
                "CAST(is_nullable AS TEXT) AS is_nullable",
            ])
            .from("information_schema.columns")
            .filter_raw("table_schema = current_schema()")
            .filter_raw(&format!("table_name IN ({})", table_list))
            .order_by("table_name", SortOrder::Asc)
            .order_by("ordinal_position", SortOrder::Asc)
            .build()?;

        let rows = prepare(&built).fetch_all(&self.read_pool).await?;

        let mut tables: Vec<TableSchema> = Vec::new();
        for row in &rows {
            let table: String = row.try_get("table_name")?;
            let is_nullable: String = row.try_get("is_nullable")?;
            let column = ColumnSchema {
                name: row.try_get("column_name")?,
                data_type: row.try_get("data_type")?,
                nullable: is_nullable == "YES",
            };
            match tables.iter_mut().find(|t| t.name == table) {
                Some(existing) => existing.columns.push(column),
                None => tables.push(TableSchema {
                    name: table,
                    columns: vec![column],
                }),
            }
        }

        Ok(SchemaDescription::new(tables, self.capabilities.dependencies))
    }

    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }
}
