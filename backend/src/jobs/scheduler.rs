// Job Scheduler - Central scheduler for all background jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::MaintenanceJobs;
use crate::config::parse_value;
use crate::error::AppError;
use crate::events::EventHub;
use crate::notifications::NotificationService;

const MAX_EXECUTION_LOGS: usize = 100;

/// Jobs that can be run on demand, by name
pub const JOB_NAMES: [&str; 4] = ["heartbeat", "notification_cleanup", "overdue_scan", "daily_cleanup"];

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Unknown job: {0}")]
    UnknownJob(String),
}

pub type JobResult<T> = Result<T, JobError>;

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::UnknownJob(name) => AppError::NotFound(format!("Job '{}' not found", name)),
            JobError::DatabaseError(e) => AppError::from(e),
            JobError::SchedulerError(e) => AppError::InternalError(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub enabled: bool,
    pub notification_cleanup_interval_hours: u32,
    /// Hour of day (server time) for the overdue quotation scan
    pub overdue_scan_hour: u32,
    pub generation_log_retention_days: i32,
    pub read_notification_retention_days: i32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            notification_cleanup_interval_hours: 1,
            overdue_scan_hour: 9,
            generation_log_retention_days: 90,
            read_notification_retention_days: 30,
        }
    }
}

impl JobConfig {
    /// Overrides from `JOBS_*` variables. Set but malformed or out of range
    /// values are an error.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let config = Self {
            enabled: parse_value("JOBS_ENABLED", lookup("JOBS_ENABLED"))?.unwrap_or(defaults.enabled),
            notification_cleanup_interval_hours: parse_value(
                "JOBS_NOTIFICATION_CLEANUP_HOURS",
                lookup("JOBS_NOTIFICATION_CLEANUP_HOURS"),
            )?
            .unwrap_or(defaults.notification_cleanup_interval_hours),
            overdue_scan_hour: parse_value("JOBS_OVERDUE_SCAN_HOUR", lookup("JOBS_OVERDUE_SCAN_HOUR"))?
                .unwrap_or(defaults.overdue_scan_hour),
            generation_log_retention_days: parse_value(
                "JOBS_GENERATION_LOG_RETENTION_DAYS",
                lookup("JOBS_GENERATION_LOG_RETENTION_DAYS"),
            )?
            .unwrap_or(defaults.generation_log_retention_days),
            read_notification_retention_days: parse_value(
                "JOBS_READ_NOTIFICATION_RETENTION_DAYS",
                lookup("JOBS_READ_NOTIFICATION_RETENTION_DAYS"),
            )?
            .unwrap_or(defaults.read_notification_retention_days),
        };

        if !(1..=23).contains(&config.notification_cleanup_interval_hours) {
            anyhow::bail!("JOBS_NOTIFICATION_CLEANUP_HOURS must be between 1 and 23");
        }
        if config.overdue_scan_hour > 23 {
            anyhow::bail!("JOBS_OVERDUE_SCAN_HOUR must be between 0 and 23");
        }
        if config.generation_log_retention_days < 1 || config.read_notification_retention_days < 1 {
            anyhow::bail!("JOBS_*_RETENTION_DAYS must be at least 1");
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i64,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    PartialFailure,
}

type ExecutionLogs = Arc<RwLock<Vec<JobExecutionLog>>>;

async fn record(logs: &ExecutionLogs, job_name: &str, started_at: DateTime<Utc>, outcome: Result<i64, String>) {
    let completed_at = Utc::now();
    let (status, items_processed, errors) = match outcome {
        Ok(items) => (JobStatus::Completed, items, Vec::new()),
        Err(e) => (JobStatus::Failed, 0, vec![e]),
    };

    let mut logs = logs.write().await;
    logs.push(JobExecutionLog {
        id: Uuid::new_v4(),
        job_name: job_name.to_string(),
        started_at,
        completed_at: Some(completed_at),
        status,
        items_processed,
        errors,
        duration_ms: Some((completed_at - started_at).num_milliseconds()),
    });
    if logs.len() > MAX_EXECUTION_LOGS {
        let excess = logs.len() - MAX_EXECUTION_LOGS;
        logs.drain(..excess);
    }
}

/// Runs maintenance jobs and keeps their execution log. The cron schedule
/// and the on-demand endpoint share one runner.
#[derive(Clone)]
pub struct JobRunner {
    db_pool: PgPool,
    events: EventHub,
    notifications: NotificationService,
    config: JobConfig,
    execution_logs: ExecutionLogs,
}

impl JobRunner {
    pub fn new(db_pool: PgPool, events: EventHub, notifications: NotificationService, config: JobConfig) -> Self {
        Self {
            db_pool,
            events,
            notifications,
            config,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub async fn execution_logs(&self) -> Vec<JobExecutionLog> {
        self.execution_logs.read().await.clone()
    }

    /// Runs the named job now and records the run. Returns the number of
    /// items the job processed.
    pub async fn run(&self, job_name: &str) -> JobResult<i64> {
        let started_at = Utc::now();
        let (label, outcome) = match job_name {
            "heartbeat" => ("Event Stream Heartbeat", Ok(self.events.heartbeat().await.delivered as i64)),
            "notification_cleanup" => (
                "Notification Cleanup",
                MaintenanceJobs::cleanup_expired_notifications(&self.notifications)
                    .await
                    .map(|n| n as i64),
            ),
            "overdue_scan" => (
                "Overdue Quotation Scan",
                MaintenanceJobs::notify_overdue_quotations(&self.db_pool, &self.notifications)
                    .await
                    .map(|(_, sent)| sent as i64),
            ),
            "daily_cleanup" => ("Daily Cleanup", self.daily_cleanup().await),
            _ => return Err(JobError::UnknownJob(job_name.to_string())),
        };

        record(
            &self.execution_logs,
            label,
            started_at,
            outcome.as_ref().copied().map_err(|e| e.to_string()),
        )
        .await;

        Ok(outcome?)
    }

    async fn daily_cleanup(&self) -> Result<i64, sqlx::Error> {
        let generation_log =
            MaintenanceJobs::cleanup_generation_log(&self.db_pool, self.config.generation_log_retention_days).await;
        if let Err(e) = &generation_log {
            warn!("Task generation log cleanup failed: {}", e);
        }

        let read_notifications =
            MaintenanceJobs::cleanup_read_notifications(&self.db_pool, self.config.read_notification_retention_days)
                .await;
        if let Err(e) = &read_notifications {
            warn!("Read notification cleanup failed: {}", e);
        }

        MaintenanceJobs::analyze_tables(&self.db_pool).await;
        Ok((generation_log? + read_notifications?) as i64)
    }
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    runner: JobRunner,
    heartbeat_interval: Duration,
}

impl JobScheduler {
    pub async fn new(runner: JobRunner, heartbeat_interval: Duration) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            runner,
            heartbeat_interval,
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        if !self.runner.config().enabled {
            info!("Background jobs are disabled");
            return Ok(());
        }

        info!("Starting background job scheduler");

        self.schedule_heartbeat().await?;

        let config = self.runner.config();
        self.schedule(
            "notification_cleanup",
            format!("0 0 */{} * * *", config.notification_cleanup_interval_hours),
        )
        .await?;
        self.schedule("overdue_scan", format!("0 0 {} * * *", config.overdue_scan_hour))
            .await?;
        // 3 AM every day
        self.schedule("daily_cleanup", "0 0 3 * * *".to_string()).await?;

        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    /// Heartbeats run every few seconds and stay out of the execution log.
    async fn schedule_heartbeat(&self) -> JobResult<()> {
        let events = self.runner.events.clone();

        let job = Job::new_repeated_async(self.heartbeat_interval, move |_uuid, _lock| {
            let events = events.clone();

            Box::pin(async move {
                let report = events.heartbeat().await;
                debug!(
                    "Event stream heartbeat: {} delivered, {} removed, {} open",
                    report.delivered, report.removed, report.remaining
                );
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled event stream heartbeat every {:?}", self.heartbeat_interval);

        Ok(())
    }

    async fn schedule(&self, job_name: &'static str, cron_expr: String) -> JobResult<()> {
        let runner = self.runner.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let runner = runner.clone();

            Box::pin(async move {
                match runner.run(job_name).await {
                    Ok(items) => info!("Job {} processed {} item(s)", job_name, items),
                    Err(e) => error!("Job {} failed: {}", job_name, e),
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled {} ({})", job_name, cron_expr);

        Ok(())
    }
}
