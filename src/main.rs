use std::{error::Error, path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use serde::Serialize;
use taskwatch::{
    config::MonitorConfig,
    db::{DbPool, PageRequest},
    models::{JobFilters, JobId, JobIdMatch, TerminalState},
    observability,
    retention::RetentionScheduler,
    services::RecordService,
};

type CliResult = Result<(), Box<dyn Error>>;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "taskwatch.toml";

/// CLI arguments for taskwatch
#[derive(Parser, Debug)]
#[command(version, about = "Job and task record monitor", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./taskwatch.toml if it exists)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the retention scheduler until interrupted (default)
    Serve,
    /// Run one retention sweep now and print the result
    Sweep,
    /// Inspect or delete jobs
    Jobs {
        #[command(subcommand)]
        action: JobsCommand,
    },
    /// Delete tasks
    Tasks {
        #[command(subcommand)]
        action: TasksCommand,
    },
    /// Delete every job in a terminal state (done or failed)
    Clear { state: String },
    /// List streams, newest first
    Streams {
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Describe the record tables
    Schema,
    /// Run database migrations and exit
    Migrate,
}

#[derive(Subcommand, Debug)]
enum JobsCommand {
    /// List jobs newest first with task counts per state
    List {
        #[arg(long)]
        job_id: Option<String>,
        /// Match --job-id as a substring instead of exactly
        #[arg(long)]
        contains: bool,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Show a job and its tasks (id is an integer or UUID)
    Show { job_id: JobId },
    /// List a job's dependency edges
    Deps { job_id: JobId },
    /// Delete a job with its tasks and dependency edges
    Delete { job_id: JobId },
}

#[derive(Subcommand, Debug)]
enum TasksCommand {
    /// Delete one task and the dependency edges naming it
    Delete { job_id: JobId, task_id: String },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let result = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_serve(config).await,
        Command::Migrate => run_migrate(config).await,
        command => run_command(config, command).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(explicit_path: Option<PathBuf>) -> Result<MonitorConfig, Box<dyn Error>> {
    let path = match explicit_path {
        Some(path) => path,
        None => {
            let cwd_config = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !cwd_config.exists() {
                return Ok(MonitorConfig::default());
            }
            cwd_config
        }
    };

    Ok(MonitorConfig::from_file(&path)?)
}

async fn connect(config: &MonitorConfig) -> Result<Arc<DbPool>, Box<dyn Error>> {
    let db = DbPool::from_config(&config.database).await?;
    tracing::debug!(
        backend = db.backend(),
        dependencies = db.capabilities().dependencies,
        "Connected to record store"
    );
    Ok(Arc::new(db))
}

fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_serve(config: MonitorConfig) -> CliResult {
    observability::metrics::init_metrics(&config.observability.metrics)?;

    let db = connect(&config).await?;
    if let Err(e) = db.health_check().await {
        db.close().await;
        return Err(e.into());
    }

    tracing::info!(
        backend = db.backend(),
        dependencies = db.capabilities().dependencies,
        "Record store ready"
    );

    let service = Arc::new(RecordService::new(db.clone(), config.pagination));
    let scheduler = match RetentionScheduler::new(service, config.retention.clone()) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            db.close().await;
            return Err(e.into());
        }
    };
    scheduler.start();

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, waiting for in-flight sweep to complete...");

    if tokio::time::timeout(Duration::from_secs(30), scheduler.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Timeout waiting for retention sweep, it may not have completed");
    }

    db.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_migrate(config: MonitorConfig) -> CliResult {
    if config.database.is_none() {
        return Err("Database is not configured. Nothing to migrate.".into());
    }

    let db = connect(&config).await?;
    let result = db.run_migrations().await;
    db.close().await;
    result?;
    tracing::info!("Database migrations completed successfully");
    Ok(())
}

async fn run_command(config: MonitorConfig, command: Command) -> CliResult {
    let db = connect(&config).await?;
    run_on_pool(db, &config, command).await
}

/// Run a one-shot command, closing the pool whether or not it succeeds.
async fn run_on_pool(db: Arc<DbPool>, config: &MonitorConfig, command: Command) -> CliResult {
    let service = RecordService::new(db.clone(), config.pagination);

    let result = execute(&service, command, config).await;

    db.close().await;
    result
}

async fn execute(service: &RecordService, command: Command, config: &MonitorConfig) -> CliResult {
    match command {
        Command::Sweep => {
            let scheduler =
                RetentionScheduler::new(Arc::new(service.clone()), config.retention.clone())?;
            print_json(&scheduler.trigger_manual_sweep().await)
        }
        Command::Jobs { action } => run_jobs(service, action).await,
        Command::Tasks {
            action: TasksCommand::Delete { job_id, task_id },
        } => print_json(&service.delete_task(job_id, &task_id).await?),
        Command::Clear { state } => {
            let state: TerminalState = state.parse()?;
            print_json(&service.clear_by_state(state).await?)
        }
        Command::Streams { limit, offset } => {
            print_json(&service.list_streams(PageRequest::new(limit, offset)).await?)
        }
        Command::Schema => print_json(&service.describe_schema().await?),
        Command::Serve | Command::Migrate => Ok(()),
    }
}

async fn run_jobs(service: &RecordService, action: JobsCommand) -> CliResult {
    match action {
        JobsCommand::List {
            job_id,
            contains,
            state,
            owner,
            limit,
            offset,
        } => {
            let filters = JobFilters {
                job_id,
                job_id_match: if contains {
                    JobIdMatch::Contains
                } else {
                    JobIdMatch::Exact
                },
                state,
                owner_id: owner,
            };
            let listing = service
                .list_jobs_with_stats(&filters, PageRequest::new(limit, offset))
                .await?;
            print_json(&listing)
        }
        JobsCommand::Show { job_id } => print_json(&service.get_job_detail(job_id).await?),
        JobsCommand::Deps { job_id } => print_json(&service.get_job_dependencies(job_id).await?),
        JobsCommand::Delete { job_id } => {
            let deleted = service.delete_job(job_id).await?;
            print_json(&serde_json::json!({ "deleted_job_id": deleted }))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
