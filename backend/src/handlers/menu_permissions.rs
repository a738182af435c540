use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::CurrentEmployee;
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use ooak_shared::{MenuItem, Role};

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionInput {
    pub menu_item_id: Uuid,
    #[serde(default)]
    pub can_view: bool,
    #[serde(default)]
    pub can_add: bool,
    #[serde(default)]
    pub can_edit: bool,
    #[serde(default)]
    pub can_delete: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReplacePermissionsRequest {
    pub permissions: Vec<PermissionInput>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MenuPermission {
    pub menu_item_id: Uuid,
    pub slug: String,
    pub label: String,
    pub path: Option<String>,
    pub parent_id: Option<Uuid>,
    pub can_view: bool,
    pub can_add: bool,
    pub can_edit: bool,
    pub can_delete: bool,
}

#[derive(Debug, Serialize)]
pub struct RolePermissions {
    pub role: Role,
    pub permissions: Vec<MenuPermission>,
}

pub fn menu_permission_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/items", get(list_menu_items))
        .route("/mine", get(my_menu))
        .route("/roles/:role_id", get(get_role_permissions).put(replace_role_permissions))
}

async fn load_role(state: &AppState, role_id: Uuid) -> ApiResult<Role> {
    sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
        .bind(role_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Role"))
}

async fn permissions_for(state: &AppState, role_id: Uuid) -> Result<Vec<MenuPermission>, sqlx::Error> {
    sqlx::query_as::<_, MenuPermission>(
        r#"
        SELECT m.id AS menu_item_id, m.slug, m.label, m.path, m.parent_id,
               p.can_view, p.can_add, p.can_edit, p.can_delete
        FROM role_menu_permissions p
        JOIN menu_items m ON m.id = p.menu_item_id
        WHERE p.role_id = $1
        ORDER BY m.sort_order, m.label
        "#,
    )
    .bind(role_id)
    .fetch_all(&state.db_pool)
    .await
}

async fn list_menu_items(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
) -> ApiResult<Json<Vec<MenuItem>>> {
    let items = sqlx::query_as::<_, MenuItem>("SELECT * FROM menu_items ORDER BY sort_order, label")
        .fetch_all(&state.db_pool)
        .await?;
    Ok(Json(items))
}

async fn get_role_permissions(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(role_id): Path<Uuid>,
) -> ApiResult<Json<RolePermissions>> {
    let role = load_role(&state, role_id).await?;
    let permissions = permissions_for(&state, role_id).await?;
    Ok(Json(RolePermissions { role, permissions }))
}

/// Swaps the role's whole permission set in one transaction.
async fn replace_role_permissions(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(role_id): Path<Uuid>,
    Json(payload): Json<ReplacePermissionsRequest>,
) -> ApiResult<Json<RolePermissions>> {
    let role = load_role(&state, role_id).await?;

    let mut seen = HashSet::new();
    if let Some(dup) = payload.permissions.iter().find(|p| !seen.insert(p.menu_item_id)) {
        return Err(ApiError::validation_single(
            "permissions",
            &format!("Menu item {} is listed more than once", dup.menu_item_id),
        ));
    }

    let mut tx = state.db_pool.begin().await?;

    sqlx::query("DELETE FROM role_menu_permissions WHERE role_id = $1")
        .bind(role_id)
        .execute(&mut *tx)
        .await?;

    for permission in &payload.permissions {
        sqlx::query(
            r#"
            INSERT INTO role_menu_permissions (role_id, menu_item_id, can_view, can_add, can_edit, can_delete)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(role_id)
        .bind(permission.menu_item_id)
        .bind(permission.can_view)
        .bind(permission.can_add)
        .bind(permission.can_edit)
        .bind(permission.can_delete)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::info!(
        "Role '{}' permissions replaced ({} items) by {}",
        role.title,
        payload.permissions.len(),
        employee.0.full_name()
    );

    let permissions = permissions_for(&state, role_id).await?;
    Ok(Json(RolePermissions { role, permissions }))
}

/// Visible menu entries the acting employee's role may view.
async fn my_menu(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
) -> ApiResult<Json<Vec<MenuPermission>>> {
    let Some(role_id) = employee.0.role_id else {
        return Ok(Json(Vec::new()));
    };

    let menu = sqlx::query_as::<_, MenuPermission>(
        r#"
        SELECT m.id AS menu_item_id, m.slug, m.label, m.path, m.parent_id,
               p.can_view, p.can_add, p.can_edit, p.can_delete
        FROM role_menu_permissions p
        JOIN menu_items m ON m.id = p.menu_item_id
        WHERE p.role_id = $1 AND p.can_view = TRUE AND m.is_visible = TRUE
        ORDER BY m.sort_order, m.label
        "#,
    )
    .bind(role_id)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(menu))
}
