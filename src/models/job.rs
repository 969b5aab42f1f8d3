use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ExecutionState;

/// Job identifier: a non-negative integer or a UUID.
///
/// Stored as TEXT in every backend so one schema serves both kinds of
/// deployment. Numeric ids serialize as JSON numbers, UUIDs as hyphenated
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobId {
    Numeric(u64),
    Uuid(Uuid),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Numeric(n) => write!(f, "{}", n),
            JobId::Uuid(u) => write!(f, "{}", u.hyphenated()),
        }
    }
}

impl FromStr for JobId {
    type Err = String;

    /// Accepts decimal integers and UUIDs in any format `uuid` parses.
    /// The textual form is canonicalized, so `007` becomes `7` and
    /// upper-case UUIDs are lowered.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u64>() {
            return Ok(JobId::Numeric(n));
        }
        Uuid::parse_str(s)
            .map(JobId::Uuid)
            .map_err(|_| format!("Not a job id (expected an integer or UUID): {}", s))
    }
}

impl From<u64> for JobId {
    fn from(n: u64) -> Self {
        JobId::Numeric(n)
    }
}

impl From<Uuid> for JobId {
    fn from(u: Uuid) -> Self {
        JobId::Uuid(u)
    }
}

/// Top-level unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub state: ExecutionState,
    pub error: Option<String>,
    pub owner_id: Option<String>,
    /// Set once the job's outcome has been reported to its owner.
    pub reported_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn is_reported(&self) -> bool {
        self.reported_at.is_some()
    }
}

/// Per-state task tallies for one job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: i64,
    pub completed: i64,
    pub running: i64,
    pub pending: i64,
    pub failed: i64,
}

/// A job row with its aggregated task counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    #[serde(flatten)]
    pub job: Job,
    pub tasks: TaskCounts,
}

/// How the `job_id` filter is matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobIdMatch {
    #[default]
    Exact,
    /// Substring match on the textual id.
    Contains,
}

/// Filters accepted by the job listing.
///
/// Values that are blank or do not parse are dropped rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub job_id_match: JobIdMatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

/// Filters after normalization, as actually applied to the query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedJobFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id_match: Option<JobIdMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ExecutionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl AppliedJobFilters {
    pub fn is_empty(&self) -> bool {
        self.job_id.is_none() && self.state.is_none() && self.owner_id.is_none()
    }
}

impl From<&JobFilters> for AppliedJobFilters {
    fn from(filters: &JobFilters) -> Self {
        let non_blank = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let job_id_match = non_blank(&filters.job_id).map(|_| filters.job_id_match);
        // Exact matches compare against the stored canonical form
        let job_id = non_blank(&filters.job_id).map(|raw| match job_id_match {
            Some(JobIdMatch::Exact) => raw
                .parse::<JobId>()
                .map(|id| id.to_string())
                .unwrap_or(raw),
            _ => raw,
        });
        let state = filters
            .state
            .as_deref()
            .and_then(|s| s.trim().to_ascii_lowercase().parse().ok());

        Self {
            job_id,
            job_id_match,
            state,
            owner_id: non_blank(&filters.owner_id),
        }
    }
}

/// Outcome of a bulk delete by terminal state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearResult {
    pub deleted_jobs_count: u64,
    pub job_ids: Vec<JobId>,
}

impl ClearResult {
    pub fn empty() -> Self {
        Self::default()
    }
}
