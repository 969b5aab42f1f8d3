//! Data-access and retention layer for job and task execution records.
//!
//! - [`db`]: SQL assembly, the record repositories for SQLite and PostgreSQL,
//!   and the [`DbPool`](db::DbPool) that owns the connection pools.
//! - [`services`]: [`RecordService`](services::RecordService), the domain
//!   operations (paginated listings, transactional deletes, bulk clears).
//! - [`retention`]: [`RetentionScheduler`](retention::RetentionScheduler),
//!   which sweeps finished jobs on an interval or on demand.
//! - [`observability`]: logging setup and retention counters.

pub mod config;
pub mod db;
pub mod models;
pub mod observability;
pub mod retention;
pub mod services;
