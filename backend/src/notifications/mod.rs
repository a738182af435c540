pub mod service;

pub use service::{NewNotification, NotificationService, OverdueQuotation};

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
    routing::{delete, get, put},
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::CurrentEmployee;
use crate::error::{ApiError, ApiResult};
use crate::format::format_relative_time;
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::AppState;
use ooak_shared::Notification;

pub fn notification_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/:id/read", put(mark_as_read))
        .route("/read-all", put(mark_all_as_read))
        .route("/:id", delete(delete_notification))
        .route("/unread-count", get(get_unread_count))
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationFilter {
    pub read: Option<bool>,
    pub notification_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    #[serde(flatten)]
    pub notification: Notification,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<NotificationFilter>,
) -> ApiResult<impl IntoResponse> {
    const WHERE: &str = r#"
        WHERE user_id = $1
          AND ($2::boolean IS NULL OR is_read = $2)
          AND ($3::text IS NULL OR notification_type = $3)
          AND (expires_at IS NULL OR expires_at > NOW())
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM notifications {}", WHERE))
        .bind(employee.id())
        .bind(filter.read)
        .bind(&filter.notification_type)
        .fetch_one(&state.db_pool)
        .await?;

    let notifications = sqlx::query_as::<_, Notification>(&format!(
        "SELECT * FROM notifications {} ORDER BY created_at DESC LIMIT $4 OFFSET $5",
        WHERE
    ))
    .bind(employee.id())
    .bind(filter.read)
    .bind(&filter.notification_type)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db_pool)
    .await?;

    let data = notifications
        .into_iter()
        .map(|notification| NotificationResponse {
            relative_time: format_relative_time(notification.created_at),
            notification,
        })
        .collect();

    Ok(Json(PaginatedResponse::new(data, &params, total)))
}

async fn mark_as_read(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let result = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(employee.id())
        .execute(&state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Notification"));
    }

    Ok(Json(serde_json::json!({ "message": "Notification marked as read" })))
}

async fn mark_all_as_read(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
) -> ApiResult<impl IntoResponse> {
    let result = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND is_read = FALSE")
        .bind(employee.id())
        .execute(&state.db_pool)
        .await?;

    Ok(Json(serde_json::json!({
        "message": "All notifications marked as read",
        "updated_count": result.rows_affected()
    })))
}

async fn delete_notification(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(employee.id())
        .execute(&state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Notification"));
    }

    Ok(Json(serde_json::json!({ "message": "Notification deleted" })))
}

async fn get_unread_count(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
) -> ApiResult<impl IntoResponse> {
    let unread_count = unread_notifications(&state.db_pool, employee.id()).await?;

    Ok(Json(UnreadCountResponse { unread_count }))
}

/// Unread, unexpired notifications of one employee
pub async fn unread_notifications(pool: &PgPool, user_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM notifications
        WHERE user_id = $1 AND is_read = FALSE
          AND (expires_at IS NULL OR expires_at > NOW())
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}
