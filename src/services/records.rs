use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    config::PaginationConfig,
    db::{DbError, DbPool, DbResult, PageInfo, PageRequest},
    models::{
        AppliedJobFilters, ClearResult, DeletedTask, Job, JobFilters, JobId, JobSummary,
        SchemaDescription, Stream, Task, TaskDependency, TerminalState,
    },
    retention::RetentionTarget,
};

/// One page of jobs with their task counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListing {
    pub jobs: Vec<JobSummary>,
    pub pagination: PageInfo,
    /// Only the filters that were actually applied.
    pub applied_filters: AppliedJobFilters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    pub job: Job,
    pub tasks: Vec<Task>,
    pub task_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyListing {
    pub dependencies: Vec<TaskDependency>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamListing {
    pub streams: Vec<Stream>,
    pub pagination: PageInfo,
}

/// Service layer for job, task, dependency and stream records
#[derive(Clone)]
pub struct RecordService {
    db: Arc<DbPool>,
    pagination: PaginationConfig,
}

impl RecordService {
    pub fn new(db: Arc<DbPool>, pagination: PaginationConfig) -> Self {
        Self { db, pagination }
    }

    /// List jobs newest first with per-state task counts.
    ///
    /// Blank filter values and unrecognized states are dropped; the listing
    /// reports which filters remained.
    pub async fn list_jobs_with_stats(
        &self,
        filters: &JobFilters,
        request: PageRequest,
    ) -> DbResult<JobListing> {
        let page = request.resolve(&self.pagination)?;
        let applied = AppliedJobFilters::from(filters);

        let result = self
            .db
            .records()
            .list_jobs_with_stats(&applied, page)
            .await?;

        tracing::debug!(
            returned = result.items.len(),
            total = result.total,
            limit = page.limit,
            offset = page.offset,
            "Listed jobs"
        );

        Ok(JobListing {
            pagination: PageInfo::new(page, result.items.len(), result.total),
            jobs: result.items,
            applied_filters: applied,
        })
    }

    /// Get a job with all of its tasks.
    pub async fn get_job_detail(&self, job_id: JobId) -> DbResult<JobDetail> {
        let records = self.db.records();
        let job = records.get_job(job_id).await?.ok_or(DbError::NotFound)?;
        let tasks = records.list_tasks(job_id).await?;

        Ok(JobDetail {
            job,
            task_count: tasks.len(),
            tasks,
        })
    }

    pub async fn get_job_dependencies(&self, job_id: JobId) -> DbResult<DependencyListing> {
        let dependencies = self.db.records().list_dependencies(job_id).await?;
        Ok(DependencyListing {
            count: dependencies.len(),
            dependencies,
        })
    }

    /// Delete a job together with its tasks and dependency edges.
    pub async fn delete_job(&self, job_id: JobId) -> DbResult<JobId> {
        match self.db.records().delete_job(job_id).await {
            Ok(()) => {
                tracing::info!(job_id = %job_id, "Deleted job");
                Ok(job_id)
            }
            Err(DbError::NotFound) => Err(DbError::NotFound),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to delete job");
                Err(e)
            }
        }
    }

    /// Delete a single task and every dependency edge naming it.
    pub async fn delete_task(&self, job_id: JobId, task_id: &str) -> DbResult<DeletedTask> {
        match self.db.records().delete_task(job_id, task_id).await {
            Ok(deleted) => {
                tracing::info!(job_id = %job_id, task_id, "Deleted task");
                Ok(deleted)
            }
            Err(DbError::NotFound) => Err(DbError::NotFound),
            Err(e) => {
                tracing::error!(job_id = %job_id, task_id, error = %e, "Failed to delete task");
                Err(e)
            }
        }
    }

    /// Delete every job in a terminal state.
    pub async fn clear_by_state(&self, state: TerminalState) -> DbResult<ClearResult> {
        let start = Instant::now();
        let result = self.db.records().clear_by_state(state).await?;

        if result.deleted_jobs_count > 0 {
            tracing::info!(
                state = %state,
                deleted = result.deleted_jobs_count,
                duration_ms = start.elapsed().as_millis() as u64,
                "Cleared jobs by state"
            );
        } else {
            tracing::debug!(state = %state, "No jobs to clear");
        }

        Ok(result)
    }

    pub async fn list_streams(&self, request: PageRequest) -> DbResult<StreamListing> {
        let page = request.resolve(&self.pagination)?;
        let result = self.db.records().list_streams(page).await?;

        Ok(StreamListing {
            pagination: PageInfo::new(page, result.items.len(), result.total),
            streams: result.items,
        })
    }

    pub async fn describe_schema(&self) -> DbResult<SchemaDescription> {
        self.db.records().describe_schema().await
    }
}

#[async_trait]
impl RetentionTarget for RecordService {
    async fn clear_by_state(&self, state: TerminalState) -> DbResult<ClearResult> {
        RecordService::clear_by_state(self, state).await
    }
}
