use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentEmployee;
use crate::error::ApiResult;
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::workflows::tasks::{CompletedTask, Reassignment};
use crate::workflows::{NewTask, TaskFilter};
use crate::AppState;
use ooak_shared::{AiTask, Priority, TaskStatus, TaskType};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 1, max = 255, message = "Task title is required"))]
    pub task_title: String,
    pub task_description: Option<String>,
    #[serde(default = "default_task_type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: Priority,
    pub assigned_to_employee_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub quotation_id: Option<Uuid>,
    pub client_name: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub business_impact: Option<String>,
    pub estimated_value: Option<Decimal>,
    pub metadata: Option<Value>,
}

fn default_task_type() -> TaskType {
    TaskType::General
}

#[derive(Debug, Deserialize)]
pub struct ArchiveTaskRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReassignTaskRequest {
    pub employee_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct MyTasksFilter {
    pub status: Option<TaskStatus>,
}

pub fn task_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/mine", get(my_tasks))
        .route("/:id", get(get_task))
        .route("/:id/complete", post(complete_task))
        .route("/:id/archive", post(archive_task))
        .route("/:id/reassign", post(reassign_task))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Json(payload): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<AiTask>)> {
    payload.validate()?;

    let task = state
        .tasks()
        .create(NewTask {
            task_description: payload.task_description,
            priority: payload.priority,
            assigned_to_employee_id: payload.assigned_to_employee_id,
            lead_id: payload.lead_id,
            quotation_id: payload.quotation_id,
            client_name: payload.client_name,
            due_date: payload.due_date,
            business_impact: payload.business_impact,
            estimated_value: payload.estimated_value,
            metadata: payload.metadata.unwrap_or_else(|| serde_json::json!({})),
            ..NewTask::new(payload.task_title.trim(), payload.task_type)
        })
        .await?;

    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<TaskFilter>,
) -> ApiResult<Json<PaginatedResponse<AiTask>>> {
    let (tasks, total) = state.tasks().list(&filter, &params).await?;
    Ok(Json(PaginatedResponse::new(tasks, &params, total)))
}

/// Tasks of the acting employee; pending only unless a status is given.
async fn my_tasks(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<MyTasksFilter>,
) -> ApiResult<Json<PaginatedResponse<AiTask>>> {
    let filter = TaskFilter {
        status: Some(filter.status.unwrap_or(TaskStatus::Pending)),
        assigned_to: Some(employee.id()),
        ..TaskFilter::default()
    };
    let (tasks, total) = state.tasks().list(&filter, &params).await?;
    Ok(Json(PaginatedResponse::new(tasks, &params, total)))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AiTask>> {
    Ok(Json(state.tasks().get(id).await?))
}

async fn complete_task(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CompletedTask>> {
    let completed = state.tasks().complete(id).await?;
    tracing::info!("Task {} completed by {}", id, employee.0.full_name());
    Ok(Json(completed))
}

async fn archive_task(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<ArchiveTaskRequest>,
) -> ApiResult<Json<AiTask>> {
    crate::validation::Validator::new()
        .required_string(Some(payload.reason.as_str()), "reason")
        .finish()?;
    Ok(Json(state.tasks().archive(id, payload.reason.trim()).await?))
}

async fn reassign_task(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReassignTaskRequest>,
) -> ApiResult<Json<Reassignment>> {
    let result = state
        .tasks()
        .reassign(id, payload.employee_id, employee.id())
        .await?;
    Ok(Json(result))
}
