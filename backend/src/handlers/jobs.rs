use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::CurrentEmployee;
use crate::error::ApiResult;
use crate::jobs::{JobExecutionLog, JOB_NAMES};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct JobRunResponse {
    pub job: String,
    pub items_processed: i64,
}

#[derive(Debug, Serialize)]
pub struct JobLogResponse {
    pub jobs: Vec<&'static str>,
    pub executions: Vec<JobExecutionLog>,
}

pub fn job_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/logs", get(execution_logs))
        .route("/:name/run", post(run_job))
}

/// Recent runs, newest last
async fn execution_logs(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
) -> ApiResult<Json<JobLogResponse>> {
    Ok(Json(JobLogResponse {
        jobs: JOB_NAMES.to_vec(),
        executions: state.jobs.execution_logs().await,
    }))
}

async fn run_job(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(name): Path<String>,
) -> ApiResult<Json<JobRunResponse>> {
    tracing::info!("Job {} run on demand by {}", name, employee.0.full_name());
    let items_processed = state.jobs.run(&name).await?;
    Ok(Json(JobRunResponse {
        job: name,
        items_processed,
    }))
}
