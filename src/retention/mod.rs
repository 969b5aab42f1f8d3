//! Retention of finished jobs.
//!
//! The [`RetentionScheduler`] deletes jobs in terminal states, along with
//! their tasks and dependency edges, shortly after start and then on a fixed
//! interval. Each sweep runs two independent branches (completed and failed
//! jobs); a failure in one is recorded in the [`SweepResult`] and never stops
//! the other branch or the schedule.

mod scheduler;

use async_trait::async_trait;
pub use scheduler::{BranchOutcome, RetentionScheduler, RetentionStatus, SweepResult};

use crate::{
    db::DbResult,
    models::{ClearResult, TerminalState},
};

/// Something that can bulk-delete jobs by terminal state.
///
/// Implemented by [`RecordService`](crate::services::RecordService).
#[async_trait]
pub trait RetentionTarget: Send + Sync {
    async fn clear_by_state(&self, state: TerminalState) -> DbResult<ClearResult>;
}
