// Background jobs
//
// Scheduled with tokio-cron-scheduler: event stream heartbeats, notification
// expiry, overdue quotation scans and daily housekeeping.

pub mod maintenance;
pub mod scheduler;

pub use maintenance::MaintenanceJobs;
pub use scheduler::{JobConfig, JobExecutionLog, JobRunner, JobScheduler, JOB_NAMES};
