use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExecutionState, JobId};

/// Unit of execution belonging to a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique within its job.
    pub id: String,
    pub job_id: JobId,
    pub state: ExecutionState,
    /// Fraction complete, 0.0 to 1.0.
    pub progress: f64,
    pub retry_count: i64,
    pub max_retries: i64,
    pub timeout_secs: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub definition: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
}

/// Precedence edge: `pre_task_id` must finish before `post_task_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDependency {
    pub job_id: JobId,
    pub pre_task_id: String,
    pub post_task_id: String,
}

/// Identifies a task removed by a single-task delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletedTask {
    pub job_id: JobId,
    pub task_id: String,
}
