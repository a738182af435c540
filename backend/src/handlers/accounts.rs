use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::delete_unreferenced;
use crate::auth::CurrentEmployee;
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use ooak_shared::UserAccount;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    pub employee_id: Option<Uuid>,
    #[validate(length(min = 3, max = 100, message = "Username must be 3 to 100 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub role_id: Option<Uuid>,
}

pub fn account_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_accounts).post(create_account))
        .route("/:id", get(get_account).delete(delete_account))
}

async fn list_accounts(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
) -> ApiResult<Json<Vec<UserAccount>>> {
    let accounts = sqlx::query_as::<_, UserAccount>("SELECT * FROM user_accounts ORDER BY username")
        .fetch_all(&state.db_pool)
        .await?;
    Ok(Json(accounts))
}

async fn get_account(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<UserAccount>> {
    sqlx::query_as::<_, UserAccount>("SELECT * FROM user_accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db_pool)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User account"))
}

async fn create_account(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Json(payload): Json<CreateAccountRequest>,
) -> ApiResult<(StatusCode, Json<UserAccount>)> {
    payload.validate()?;

    let account = sqlx::query_as::<_, UserAccount>(
        r#"
        INSERT INTO user_accounts (employee_id, username, email, role_id)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(payload.employee_id)
    .bind(payload.username.trim())
    .bind(payload.email.trim())
    .bind(payload.role_id)
    .fetch_one(&state.db_pool)
    .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

async fn delete_account(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    delete_unreferenced(&state.db_pool, "DELETE FROM user_accounts WHERE id = $1", id, "User account").await?;
    tracing::info!("User account {} deleted by {}", id, employee.0.full_name());
    Ok(StatusCode::NO_CONTENT)
}
