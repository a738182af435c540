use axum::{
    extract::{Path, Query, State},
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
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::AppState;
use ooak_shared::{Employee, EmployeeStatus};

const SORTABLE_COLUMNS: &[&str] = &["created_at", "first_name", "last_name", "department", "job_title"];

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEmployeeRequest {
    #[validate(length(max = 50))]
    pub employee_code: Option<String>,
    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    pub first_name: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub last_name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub designation: Option<String>,
    pub company_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateEmployeeRequest {
    #[validate(length(min = 1, max = 100, message = "First name cannot be empty"))]
    pub first_name: Option<String>,
    #[validate(length(max = 100))]
    pub last_name: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub designation: Option<String>,
    pub company_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub status: Option<EmployeeStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmployeeFilter {
    pub status: Option<EmployeeStatus>,
    pub department: Option<String>,
    pub company_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub search: Option<String>,
}

pub fn employee_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_employees).post(create_employee))
        .route("/me", get(current_employee))
        .route("/:id", get(get_employee).put(update_employee).delete(delete_employee))
}

async fn list_employees(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<EmployeeFilter>,
) -> ApiResult<Json<PaginatedResponse<Employee>>> {
    const WHERE: &str = r#"
        WHERE ($1::employee_status IS NULL OR status = $1)
          AND ($2::text IS NULL OR department = $2)
          AND ($3::uuid IS NULL OR company_id = $3)
          AND ($4::uuid IS NULL OR branch_id = $4)
          AND ($5::text IS NULL
               OR (first_name || ' ' || last_name) ILIKE '%' || $5 || '%'
               OR email ILIKE '%' || $5 || '%'
               OR employee_code ILIKE '%' || $5 || '%')
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM employees {}", WHERE))
        .bind(filter.status)
        .bind(&filter.department)
        .bind(filter.company_id)
        .bind(filter.branch_id)
        .bind(&filter.search)
        .fetch_one(&state.db_pool)
        .await?;

    let employees = sqlx::query_as::<_, Employee>(&format!(
        "SELECT * FROM employees {} {} LIMIT $6 OFFSET $7",
        WHERE,
        params.order_clause(SORTABLE_COLUMNS, "created_at")
    ))
    .bind(filter.status)
    .bind(&filter.department)
    .bind(filter.company_id)
    .bind(filter.branch_id)
    .bind(&filter.search)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(PaginatedResponse::new(employees, &params, total)))
}

async fn current_employee(employee: CurrentEmployee) -> Json<Employee> {
    Json(employee.0)
}

async fn get_employee(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Employee>> {
    sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db_pool)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Employee"))
}

async fn create_employee(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Json(payload): Json<CreateEmployeeRequest>,
) -> ApiResult<(StatusCode, Json<Employee>)> {
    payload.validate()?;

    let employee = sqlx::query_as::<_, Employee>(
        r#"
        INSERT INTO employees (employee_code, first_name, last_name, email, job_title,
                               department, designation, company_id, branch_id, role_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(&payload.employee_code)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(&payload.email)
    .bind(&payload.job_title)
    .bind(&payload.department)
    .bind(&payload.designation)
    .bind(payload.company_id)
    .bind(payload.branch_id)
    .bind(payload.role_id)
    .fetch_one(&state.db_pool)
    .await?;

    tracing::info!("Employee {} created", employee.full_name());
    Ok((StatusCode::CREATED, Json(employee)))
}

async fn update_employee(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateEmployeeRequest>,
) -> ApiResult<Json<Employee>> {
    payload.validate()?;

    sqlx::query_as::<_, Employee>(
        r#"
        UPDATE employees
        SET first_name = COALESCE($2, first_name),
            last_name = COALESCE($3, last_name),
            email = COALESCE($4, email),
            job_title = COALESCE($5, job_title),
            department = COALESCE($6, department),
            designation = COALESCE($7, designation),
            company_id = COALESCE($8, company_id),
            branch_id = COALESCE($9, branch_id),
            role_id = COALESCE($10, role_id),
            status = COALESCE($11, status),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(payload.first_name.as_deref().map(str::trim))
    .bind(payload.last_name.as_deref().map(str::trim))
    .bind(&payload.email)
    .bind(&payload.job_title)
    .bind(&payload.department)
    .bind(&payload.designation)
    .bind(payload.company_id)
    .bind(payload.branch_id)
    .bind(payload.role_id)
    .bind(payload.status)
    .fetch_optional(&state.db_pool)
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::not_found("Employee"))
}

async fn delete_employee(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if employee.id() == id {
        return Err(ApiError::bad_request("You cannot delete your own employee record"));
    }

    delete_unreferenced(&state.db_pool, "DELETE FROM employees WHERE id = $1", id, "Employee").await?;
    tracing::info!("Employee {} deleted by {}", id, employee.0.full_name());
    Ok(StatusCode::NO_CONTENT)
}
