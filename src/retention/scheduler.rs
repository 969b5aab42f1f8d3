use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::RetentionTarget;
use crate::{
    config::{ConfigError, RetentionConfig},
    models::{JobId, TerminalState},
    observability::metrics,
};

/// Result of one branch of a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BranchOutcome {
    Cleared { count: u64, job_ids: Vec<JobId> },
    Failed { error: String },
}

impl BranchOutcome {
    pub fn deleted(&self) -> u64 {
        match self {
            BranchOutcome::Cleared { count, .. } => *count,
            BranchOutcome::Failed { .. } => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BranchOutcome::Failed { .. })
    }
}

/// Outcome of a sweep. A branch is `None` when disabled by configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub completed: Option<BranchOutcome>,
    pub failed: Option<BranchOutcome>,
    pub total_deleted: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SweepResult {
    pub fn has_failures(&self) -> bool {
        [&self.completed, &self.failed]
            .into_iter()
            .flatten()
            .any(BranchOutcome::is_failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionStatus {
    pub enabled: bool,
    pub running: bool,
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
    pub clear_completed: bool,
    pub clear_failed: bool,
    /// Only set while running.
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// The spawned schedule loop and the token that ends it.
struct ScheduleHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum SchedulerState {
    Stopped,
    Running(ScheduleHandle),
}

#[derive(Default)]
struct Timing {
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
}

/// State shared between the scheduler and its spawned loop.
struct Shared {
    target: Arc<dyn RetentionTarget>,
    config: RetentionConfig,
    /// Held for the duration of a sweep so scheduled and manual sweeps never
    /// overlap.
    sweep_lock: tokio::sync::Mutex<()>,
    timing: Mutex<Timing>,
}

/// `delay` from now, or `None` when that lies beyond the calendar range.
fn next_run_after(delay: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
}

/// Periodic and on-demand deletion of finished jobs.
///
/// Starts in the stopped state. [`start`](Self::start) spawns one loop that
/// sweeps after `initial_delay_secs` and then every `interval_secs` until
/// [`stop`](Self::stop) is called. Must be started from within a Tokio
/// runtime.
pub struct RetentionScheduler {
    shared: Arc<Shared>,
    state: Mutex<SchedulerState>,
}

impl RetentionScheduler {
    /// Fails if `config` does not pass [`RetentionConfig::validate`].
    pub fn new(
        target: Arc<dyn RetentionTarget>,
        config: RetentionConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                target,
                config,
                sweep_lock: tokio::sync::Mutex::new(()),
                timing: Mutex::new(Timing::default()),
            }),
            state: Mutex::new(SchedulerState::Stopped),
        })
    }

    /// Arm the schedule. Does nothing if retention is disabled or the
    /// scheduler is already running.
    pub fn start(&self) {
        let config = &self.shared.config;
        if !config.enabled {
            tracing::info!("Retention scheduler disabled by configuration");
            return;
        }

        let mut state = self.state.lock();
        if let SchedulerState::Running(schedule) = &*state {
            if !schedule.handle.is_finished() {
                tracing::info!("Retention scheduler already running");
                return;
            }
            tracing::warn!("Retention schedule loop had exited, restarting");
        }

        tracing::info!(
            interval_secs = config.interval_secs,
            initial_delay_secs = config.initial_delay_secs,
            clear_completed = config.clear_completed,
            clear_failed = config.clear_failed,
            "Starting retention scheduler"
        );

        self.shared.timing.lock().next_run_at = next_run_after(config.initial_delay());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_schedule(Arc::clone(&self.shared), cancel.clone()));
        *state = SchedulerState::Running(ScheduleHandle { cancel, handle });
    }

    /// Cancel future sweeps. A sweep already in progress runs to completion.
    pub fn stop(&self) {
        if let Some(schedule) = self.take_schedule() {
            schedule.cancel.cancel();
            tracing::info!("Retention scheduler stopped");
        }
    }

    /// Stop and wait for any in-flight sweep to finish.
    pub async fn shutdown(&self) {
        let Some(schedule) = self.take_schedule() else {
            return;
        };
        schedule.cancel.cancel();
        if let Err(e) = schedule.handle.await {
            tracing::error!(error = %e, "Retention scheduler task failed");
        }
        tracing::info!("Retention scheduler shut down");
    }

    fn take_schedule(&self) -> Option<ScheduleHandle> {
        let mut state = self.state.lock();
        self.shared.timing.lock().next_run_at = None;
        match std::mem::replace(&mut *state, SchedulerState::Stopped) {
            SchedulerState::Running(schedule) => Some(schedule),
            SchedulerState::Stopped => None,
        }
    }

    /// False once stopped, or if the schedule loop exited on its own.
    pub fn is_running(&self) -> bool {
        match &*self.state.lock() {
            SchedulerState::Running(schedule) => !schedule.handle.is_finished(),
            SchedulerState::Stopped => false,
        }
    }

    /// Run the enabled branches once.
    pub async fn sweep(&self) -> SweepResult {
        self.shared.sweep().await
    }

    /// Run a sweep now, regardless of the schedule or the `enabled` flag.
    pub async fn trigger_manual_sweep(&self) -> SweepResult {
        tracing::info!("Manual retention sweep triggered");
        self.shared.sweep().await
    }

    pub fn status(&self) -> RetentionStatus {
        let running = self.is_running();
        let config = &self.shared.config;
        let timing = self.shared.timing.lock();

        RetentionStatus {
            enabled: config.enabled,
            running,
            interval_secs: config.interval_secs,
            initial_delay_secs: config.initial_delay_secs,
            clear_completed: config.clear_completed,
            clear_failed: config.clear_failed,
            next_run_at: if running { timing.next_run_at } else { None },
            last_run_at: timing.last_run_at,
        }
    }
}

impl Drop for RetentionScheduler {
    fn drop(&mut self) {
        if let SchedulerState::Running(schedule) = &*self.state.get_mut() {
            schedule.cancel.cancel();
        }
    }
}

async fn run_schedule(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut delay = shared.config.initial_delay();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        // Not raced against cancellation: a sweep that has begun finishes
        shared.sweep().await;

        delay = shared.config.interval();
        if !cancel.is_cancelled() {
            shared.timing.lock().next_run_at = next_run_after(delay);
        }
    }

    tracing::debug!("Retention schedule loop exited");
}

impl Shared {
    async fn sweep(&self) -> SweepResult {
        let _guard = self.sweep_lock.lock().await;

        let started_at = Utc::now();
        let start = Instant::now();

        let completed = if self.config.clear_completed {
            Some(self.run_branch(TerminalState::Done).await)
        } else {
            None
        };
        let failed = if self.config.clear_failed {
            Some(self.run_branch(TerminalState::Failed).await)
        } else {
            None
        };

        let total_deleted = [&completed, &failed]
            .into_iter()
            .flatten()
            .map(BranchOutcome::deleted)
            .sum();

        let result = SweepResult {
            completed,
            failed,
            total_deleted,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        self.timing.lock().last_run_at = Some(started_at);

        if result.has_failures() {
            tracing::warn!(
                total_deleted = result.total_deleted,
                duration_ms = result.duration_ms,
                "Retention sweep finished with errors"
            );
        } else if result.total_deleted > 0 {
            tracing::info!(
                total_deleted = result.total_deleted,
                duration_ms = result.duration_ms,
                "Retention sweep complete"
            );
        } else {
            tracing::debug!("Retention sweep complete, no jobs to delete");
        }

        result
    }

    async fn run_branch(&self, state: TerminalState) -> BranchOutcome {
        match self.target.clear_by_state(state).await {
            Ok(cleared) => {
                if cleared.deleted_jobs_count > 0 {
                    metrics::record_retention_deletion(state, cleared.deleted_jobs_count);
                }
                BranchOutcome::Cleared {
                    count: cleared.deleted_jobs_count,
                    job_ids: cleared.job_ids,
                }
            }
            Err(e) => {
                metrics::record_retention_failure(state);
                tracing::error!(state = %state, error = %e, "Retention branch failed");
                BranchOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        db::{DbError, DbResult},
        models::ClearResult,
    };

    /// Records every call; optionally fails one state and/or takes time.
    #[derive(Default)]
    struct FakeTarget {
        calls: Mutex<Vec<TerminalState>>,
        fail: Option<TerminalState>,
        panic: bool,
        work: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FakeTarget {
        fn failing(state: TerminalState) -> Self {
            Self {
                fail: Some(state),
                ..Default::default()
            }
        }

        fn panicking() -> Self {
            Self {
                panic: true,
                ..Default::default()
            }
        }

        fn slow(work: Duration) -> Self {
            Self {
                work,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<TerminalState> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl RetentionTarget for FakeTarget {
        async fn clear_by_state(&self, state: TerminalState) -> DbResult<ClearResult> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            self.calls.lock().push(state);

            if !self.work.is_zero() {
                tokio::time::sleep(self.work).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.panic {
                panic!("target panicked");
            }
            if self.fail == Some(state) {
                return Err(DbError::Internal("simulated failure".into()));
            }
            let job_ids = match state {
                TerminalState::Done => vec![JobId::from(1), JobId::from(2)],
                TerminalState::Failed => vec![JobId::from(7)],
            };
            Ok(ClearResult {
                deleted_jobs_count: job_ids.len() as u64,
                job_ids,
            })
        }
    }

    fn enabled_config() -> RetentionConfig {
        RetentionConfig {
            enabled: true,
            interval_secs: 60,
            initial_delay_secs: 5,
            clear_completed: true,
            clear_failed: true,
        }
    }

    fn scheduler(target: &Arc<FakeTarget>, config: RetentionConfig) -> RetentionScheduler {
        RetentionScheduler::new(target.clone(), config).expect("valid config")
    }

    #[tokio::test]
    async fn test_sweep_runs_both_branches() {
        let target = Arc::new(FakeTarget::default());
        let scheduler = scheduler(&target, enabled_config());

        let result = scheduler.sweep().await;

        assert_eq!(
            result.completed,
            Some(BranchOutcome::Cleared {
                count: 2,
                job_ids: vec![JobId::from(1), JobId::from(2)]
            })
        );
        assert_eq!(
            result.failed,
            Some(BranchOutcome::Cleared {
                count: 1,
                job_ids: vec![JobId::from(7)]
            })
        );
        assert_eq!(result.total_deleted, 3);
        assert!(!result.has_failures());
        assert_eq!(target.calls(), vec![TerminalState::Done, TerminalState::Failed]);
    }

    #[tokio::test]
    async fn test_failing_branch_does_not_stop_the_other() {
        let target = Arc::new(FakeTarget::failing(TerminalState::Done));
        let scheduler = scheduler(&target, enabled_config());

        let result = scheduler.sweep().await;

        match &result.completed {
            Some(BranchOutcome::Failed { error }) => assert!(error.contains("simulated failure")),
            other => panic!("expected failed branch, got {:?}", other),
        }
        assert_eq!(result.failed.as_ref().map(BranchOutcome::deleted), Some(1));
        assert_eq!(result.total_deleted, 1);
        assert!(result.has_failures());
        assert_eq!(target.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_branch_is_skipped() {
        let target = Arc::new(FakeTarget::default());
        let config = RetentionConfig {
            clear_failed: false,
            ..enabled_config()
        };
        let scheduler = scheduler(&target, config);

        let result = scheduler.sweep().await;

        assert!(result.completed.is_some());
        assert!(result.failed.is_none());
        assert_eq!(target.calls(), vec![TerminalState::Done]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_sweep_precedes_interval() {
        let target = Arc::new(FakeTarget::default());
        let scheduler = scheduler(&target, enabled_config());

        scheduler.start();
        assert!(scheduler.is_running());
        assert!(target.calls().is_empty());

        // Initial delay is 5s, interval is 60s
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(target.calls().len(), 2);

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(target.calls().len(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(target.calls().len(), 4);

        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_sweeps() {
        let target = Arc::new(FakeTarget::default());
        let scheduler = scheduler(&target, enabled_config());

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(target.calls().len(), 2);

        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(scheduler.status().next_run_at.is_none());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(target.calls().len(), 2);

        // Idempotent
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_initial_sweep() {
        let target = Arc::new(FakeTarget::default());
        let scheduler = scheduler(&target, enabled_config());

        scheduler.start();
        scheduler.stop();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(target.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_sweep_completes_after_stop() {
        let target = Arc::new(FakeTarget::slow(Duration::from_secs(10)));
        let scheduler = scheduler(&target, enabled_config());

        scheduler.start();
        // Completed branch is mid-flight at t=6
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(target.calls(), vec![TerminalState::Done]);

        scheduler.shutdown().await;

        assert_eq!(target.calls(), vec![TerminalState::Done, TerminalState::Failed]);
        assert!(scheduler.status().last_run_at.is_some());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(target.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_when_disabled_is_noop() {
        let target = Arc::new(FakeTarget::default());
        let config = RetentionConfig {
            enabled: false,
            ..enabled_config()
        };
        let scheduler = scheduler(&target, config);

        scheduler.start();
        assert!(!scheduler.is_running());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(target.calls().is_empty());

        // Manual sweeps still work
        let result = scheduler.trigger_manual_sweep().await;
        assert_eq!(result.total_deleted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_keeps_one_schedule() {
        let target = Arc::new(FakeTarget::default());
        let scheduler = scheduler(&target, enabled_config());

        scheduler.start();
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(target.calls().len(), 2);

        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sweeps_are_serialized() {
        let target = Arc::new(FakeTarget::slow(Duration::from_secs(1)));
        let scheduler = scheduler(&target, enabled_config());

        let (a, b) = tokio::join!(scheduler.trigger_manual_sweep(), scheduler.sweep());

        assert_eq!(a.total_deleted, 3);
        assert_eq!(b.total_deleted, 3);
        assert_eq!(target.calls().len(), 4);
        assert_eq!(target.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reflects_lifecycle() {
        let target = Arc::new(FakeTarget::default());
        let scheduler = scheduler(&target, enabled_config());

        let status = scheduler.status();
        assert!(status.enabled);
        assert!(!status.running);
        assert_eq!(status.interval_secs, 60);
        assert_eq!(status.initial_delay_secs, 5);
        assert!(status.next_run_at.is_none());
        assert!(status.last_run_at.is_none());

        scheduler.start();
        let status = scheduler.status();
        assert!(status.running);
        assert!(status.next_run_at.is_some());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(scheduler.status().last_run_at.is_some());

        scheduler.stop();
        assert!(scheduler.status().next_run_at.is_none());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let target: Arc<dyn RetentionTarget> = Arc::new(FakeTarget::default());

        for config in [
            RetentionConfig {
                interval_secs: 0,
                initial_delay_secs: 0,
                ..enabled_config()
            },
            RetentionConfig {
                interval_secs: u64::MAX,
                ..enabled_config()
            },
        ] {
            let result = RetentionScheduler::new(target.clone(), config);
            assert!(matches!(result, Err(ConfigError::Validation(_))));
        }
    }

    #[test]
    fn test_next_run_after_out_of_range() {
        assert!(next_run_after(Duration::from_secs(u64::MAX)).is_none());
        assert!(next_run_after(Duration::from_secs(60)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_longest_interval() {
        let target = Arc::new(FakeTarget::default());
        let config = RetentionConfig {
            interval_secs: crate::config::MAX_INTERVAL_SECS,
            initial_delay_secs: crate::config::MAX_INTERVAL_SECS - 1,
            ..enabled_config()
        };
        let scheduler = scheduler(&target, config);

        scheduler.start();
        let status = scheduler.status();
        assert!(status.running);
        assert!(status.next_run_at.is_some());

        scheduler.shutdown().await;
        assert!(target.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exited_loop_reports_stopped_and_restarts() {
        let target = Arc::new(FakeTarget::panicking());
        let scheduler = scheduler(&target, enabled_config());

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(target.calls().len(), 1);

        let status = scheduler.status();
        assert!(!status.running);
        assert!(status.next_run_at.is_none());

        // A dead loop does not block a fresh start
        scheduler.start();
        assert!(scheduler.is_running());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(target.calls().len(), 2);
    }
}
