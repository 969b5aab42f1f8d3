use async_trait::async_trait;

use super::{Page, PageResult};
use crate::{
    db::error::DbResult,
    models::{
        AppliedJobFilters, ClearResult, DeletedTask, Job, JobId, JobSummary, SchemaDescription,
        Stream, Task, TaskDependency, TerminalState,
    },
};

/// Optional store features, probed once when the pool is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct StoreCapabilities {
    /// Whether the `task_dependencies` table exists.
    pub dependencies: bool,
}

/// Name of the optional dependency table.
pub const DEPENDENCY_TABLE: &str = "task_dependencies";

/// Reads and transactional deletes over job, task, dependency and stream
/// records.
///
/// Mutating methods run in a single transaction each. A method that fails
/// leaves the store as it was before the call.
#[async_trait]
pub trait RecordRepo: Send + Sync {
    /// List jobs newest first with per-state task counts.
    async fn list_jobs_with_stats(
        &self,
        filters: &AppliedJobFilters,
        page: Page,
    ) -> DbResult<PageResult<JobSummary>>;

    async fn get_job(&self, job_id: JobId) -> DbResult<Option<Job>>;

    /// Tasks of a job, oldest first.
    async fn list_tasks(&self, job_id: JobId) -> DbResult<Vec<Task>>;

    /// Dependency edges of a job ordered by (pre, post). Empty when the store
    /// has no dependency table.
    async fn list_dependencies(&self, job_id: JobId) -> DbResult<Vec<TaskDependency>>;

    /// Delete a job with its edges and tasks.
    ///
    /// Returns `DbError::NotFound` without touching anything when the job
    /// does not exist.
    async fn delete_job(&self, job_id: JobId) -> DbResult<()>;

    /// Delete one task and every edge naming it.
    async fn delete_task(&self, job_id: JobId, task_id: &str) -> DbResult<DeletedTask>;

    /// Delete every job in `state`, returning the ids that were removed.
    async fn clear_by_state(&self, state: TerminalState) -> DbResult<ClearResult>;

    /// List streams, most recently created first.
    async fn list_streams(&self, page: Page) -> DbResult<PageResult<Stream>>;

    async fn describe_schema(&self) -> DbResult<SchemaDescription>;

    fn capabilities(&self) -> StoreCapabilities;
}

/// Statements shared by the SQLite and PostgreSQL repositories.
///
/// Every statement uses `$N` markers, so the same text runs on both backends.
/// Backend-specific SQL (row decoding, introspection) stays in the backend
/// modules.
pub(crate) mod statements {
    use crate::{
        db::{
            SortOrder,
            error::DbResult,
            query::{BuiltQuery, QueryAssembler},
        },
        models::{AppliedJobFilters, ExecutionState, JobId, JobIdMatch, TerminalState},
    };

    use super::Page;

    /// Order job ids numerically when they are decimal integers: a shorter
    /// id sorts before a longer one, so `9` precedes `10`.
    fn order_by_job_id(query: QueryAssembler, column: &str, order: SortOrder) -> QueryAssembler {
        query
            .order_by(&format!("LENGTH({})", column), order)
            .order_by(column, order)
    }

    const JOB_COLUMNS: [&str; 6] = [
        "j.id",
        "j.state",
        "j.error",
        "j.owner_id",
        "j.reported_at",
        "j.created_at",
    ];

    const TASK_COLUMNS: [&str; 12] = [
        "id",
        "job_id",
        "state",
        "progress",
        "retry_count",
        "max_retries",
        "timeout_secs",
        "created_at",
        "started_at",
        "updated_at",
        "definition",
        "output",
    ];

    fn count_in_state(state: ExecutionState, alias: &str) -> String {
        format!(
            "COALESCE(SUM(CASE WHEN t.state = '{}' THEN 1 ELSE 0 END), 0) AS {}",
            state.as_str(),
            alias
        )
    }

    /// Escape LIKE wildcards so user input only matches literally.
    fn escape_like(value: &str) -> String {
        let mut escaped = String::with_capacity(value.len());
        for c in value.chars() {
            if matches!(c, '\\' | '%' | '_') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }

    fn apply_job_filters(mut query: QueryAssembler, filters: &AppliedJobFilters) -> QueryAssembler {
        if let Some(job_id) = &filters.job_id {
            query = match filters.job_id_match.unwrap_or_default() {
                JobIdMatch::Exact => query.filter("j.id = ?", job_id),
                JobIdMatch::Contains => query.filter(
                    "j.id LIKE ? ESCAPE '\\'",
                    format!("%{}%", escape_like(job_id)),
                ),
            };
        }
        if let Some(state) = filters.state {
            query = query.filter("j.state = ?", state.as_str());
        }
        if let Some(owner_id) = &filters.owner_id {
            query = query.filter("j.owner_id = ?", owner_id);
        }
        query
    }

    pub fn job_stats(filters: &AppliedJobFilters, page: Page) -> DbResult<BuiltQuery> {
        let columns = JOB_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain([
                "COUNT(t.id) AS total_tasks".to_string(),
                count_in_state(ExecutionState::Done, "completed_tasks"),
                count_in_state(ExecutionState::Running, "running_tasks"),
                count_in_state(ExecutionState::Pending, "pending_tasks"),
                count_in_state(ExecutionState::Failed, "failed_tasks"),
            ]);

        let query = QueryAssembler::new()
            .select(columns)
            .from("jobs j")
            .join("tasks t", "t.job_id = j.id");

        let query = apply_job_filters(query, filters)
            .group_by("j.id")
            .group_by("j.state")
            .group_by("j.error")
            .group_by("j.owner_id")
            .group_by("j.reported_at")
            .group_by("j.created_at");

        order_by_job_id(query, "j.id", SortOrder::Desc)
            .limit(page.limit)
            .offset(page.offset)
            .build()
    }

    pub fn job_count(filters: &AppliedJobFilters) -> DbResult<BuiltQuery> {
        let query = QueryAssembler::new().select(["COUNT(*) AS total"]).from("jobs j");
        apply_job_filters(query, filters).build()
    }

    pub fn job_by_id(job_id: JobId) -> DbResult<BuiltQuery> {
        QueryAssembler::new()
            .select(JOB_COLUMNS)
            .from("jobs j")
            .filter("j.id = ?", job_id)
            .build()
    }

    pub fn job_exists(job_id: JobId) -> DbResult<BuiltQuery> {
        QueryAssembler::new()
            .select(["id"])
            .from("jobs")
            .filter("id = ?", job_id)
            .build()
    }

    pub fn task_exists(job_id: JobId, task_id: &str) -> DbResult<BuiltQuery> {
        QueryAssembler::new()
            .select(["id"])
            .from("tasks")
            .filter("job_id = ?", job_id)
            .filter("id = ?", task_id)
            .build()
    }

    pub fn tasks_for_job(job_id: JobId) -> DbResult<BuiltQuery> {
        QueryAssembler::new()
            .select(TASK_COLUMNS)
            .from("tasks")
            .filter("job_id = ?", job_id)
            .order_by("created_at", SortOrder::Asc)
            .order_by("id", SortOrder::Asc)
            .build()
    }

    pub fn dependencies_for_job(job_id: JobId) -> DbResult<BuiltQuery> {
        QueryAssembler::new()
            .select(["job_id", "pre_task_id", "post_task_id"])
            .from("task_dependencies")
            .filter("job_id = ?", job_id)
            .order_by("pre_task_id", SortOrder::Asc)
            .order_by("post_task_id", SortOrder::Asc)
            .build()
    }

    /// Ids of every job in `state`, in ascending id order.
    ///
    /// `lock_rows` appends `FOR UPDATE` (PostgreSQL only), so a job cannot
    /// leave or enter the captured set before the deletes that follow.
    pub fn job_ids_in_state(state: TerminalState, lock_rows: bool) -> DbResult<BuiltQuery> {
        let query = QueryAssembler::new()
            .select(["id"])
            .from("jobs")
            .filter("state = ?", state.as_str());

        let mut built = order_by_job_id(query, "id", SortOrder::Asc).build()?;
        if lock_rows {
            built.sql.push_str(" FOR UPDATE");
        }
        Ok(built)
    }

    pub fn streams(page: Page) -> DbResult<BuiltQuery> {
        QueryAssembler::new()
            .select(["id", "job_id", "created_at", "updated_at"])
            .from("streams")
            .order_by("created_at", SortOrder::Desc)
            .order_by("id", SortOrder::Asc)
            .limit(page.limit)
            .offset(page.offset)
            .build()
    }

    pub fn stream_count() -> DbResult<BuiltQuery> {
        QueryAssembler::new()
            .select(["COUNT(*) AS total"])
            .from("streams")
            .build()
    }

    pub const DELETE_JOB_DEPENDENCIES: &str = "DELETE FROM task_dependencies WHERE job_id = $1";
    pub const DELETE_JOB_TASKS: &str = "DELETE FROM tasks WHERE job_id = $1";
    pub const DELETE_JOB: &str = "DELETE FROM jobs WHERE id = $1";

    pub const DELETE_TASK_DEPENDENCIES: &str =
        "DELETE FROM task_dependencies WHERE job_id = $1 AND (pre_task_id = $2 OR post_task_id = $2)";
    pub const DELETE_TASK: &str = "DELETE FROM tasks WHERE job_id = $1 AND id = $2";

    /// Set-based deletes for every job in a state, in dependency order.
    ///
    /// Each statement scopes itself with the same state-membership subquery
    /// and binds the state as `$1`.
    pub fn clear_by_state(state: TerminalState, include_dependencies: bool) -> DbResult<Vec<BuiltQuery>> {
        let members = QueryAssembler::new()
            .select(["id"])
            .from("jobs")
            .filter("state = ?", state.as_str())
            .build()?;

        let mut targets = Vec::with_capacity(3);
        if include_dependencies {
            targets.push(format!(
                "DELETE FROM task_dependencies WHERE job_id IN ({})",
                members.sql
            ));
        }
        targets.push(format!("DELETE FROM tasks WHERE job_id IN ({})", members.sql));
        targets.push(format!("DELETE FROM jobs WHERE id IN ({})", members.sql));

        Ok(targets
            .into_iter()
            .map(|sql| BuiltQuery {
                sql,
                params: members.params.clone(),
            })
            .collect())
    }

}
