use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentEmployee;
use crate::database::{next_document_number, NumberSeries};
use crate::error::{ApiError, ApiResult};
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::validation::Validator;
use crate::workflows::lead_events::{LeadEvent, LeadEventKind, LeadTaskOutcome};
use crate::AppState;
use ooak_shared::{Employee, Lead, LeadStatus};

const SORTABLE_COLUMNS: &[&str] = &["created_at", "client_name", "estimated_value", "status", "lead_number"];

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLeadRequest {
    #[validate(length(min = 1, max = 255, message = "Client name is required"))]
    pub client_name: String,
    #[validate(email(message = "Invalid email address"))]
    pub client_email: Option<String>,
    #[validate(length(max = 50))]
    pub client_phone: Option<String>,
    pub source: Option<String>,
    pub estimated_value: Option<Decimal>,
    pub assigned_to: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeadFilter {
    pub company_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub status: Option<LeadStatus>,
    pub assigned_to: Option<Uuid>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: LeadStatus,
}

#[derive(Debug, Deserialize)]
pub struct AssignLeadRequest {
    pub employee_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RejectLeadRequest {
    pub reason: String,
}

/// A lead together with whatever tasks its event generated
#[derive(Debug, Serialize)]
pub struct LeadResponse {
    #[serde(flatten)]
    pub lead: Lead,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automation: Option<LeadTaskOutcome>,
}

pub fn lead_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_leads).post(create_lead))
        .route("/mine", get(my_leads))
        .route("/:id", get(get_lead))
        .route("/:id/status", put(update_lead_status))
        .route("/:id/assign", put(assign_lead))
        .route("/:id/reject", post(reject_lead))
}

async fn load_lead(state: &AppState, id: Uuid) -> ApiResult<Lead> {
    sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Lead"))
}

async fn active_employee(state: &AppState, id: Uuid) -> ApiResult<Employee> {
    let employee = sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee"))?;

    if !employee.is_active() {
        return Err(ApiError::bad_request(format!(
            "Cannot assign to inactive employee: {}",
            employee.full_name()
        )));
    }
    Ok(employee)
}

/// Runs the lead task rules; failures are logged and never fail the request.
async fn run_lead_rules(state: &AppState, event: LeadEvent) -> Option<LeadTaskOutcome> {
    match state.lead_tasks().process(&event).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            tracing::error!(
                "Lead rules for {} ({}) failed: {}",
                event.lead.lead_number,
                event.kind.as_str(),
                e
            );
            None
        }
    }
}

async fn create_lead(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Json(payload): Json<CreateLeadRequest>,
) -> ApiResult<(StatusCode, Json<LeadResponse>)> {
    payload.validate()?;
    Validator::new()
        .non_negative_amount(payload.estimated_value.as_ref(), "estimated_value")
        .finish()?;

    if let Some(assignee) = payload.assigned_to {
        active_employee(&state, assignee).await?;
    }

    let status = if payload.assigned_to.is_some() {
        LeadStatus::Assigned
    } else {
        LeadStatus::Unassigned
    };

    let mut tx = state.db_pool.begin().await?;
    let lead_number = next_document_number(&mut tx, NumberSeries::Lead).await?;

    let lead = sqlx::query_as::<_, Lead>(
        r#"
        INSERT INTO leads (lead_number, client_name, client_email, client_phone, source,
                           estimated_value, status, assigned_to, company_id, branch_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(&lead_number)
    .bind(payload.client_name.trim())
    .bind(&payload.client_email)
    .bind(&payload.client_phone)
    .bind(&payload.source)
    .bind(payload.estimated_value)
    .bind(status)
    .bind(payload.assigned_to)
    .bind(payload.company_id)
    .bind(payload.branch_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!("Lead {} created by {}", lead.lead_number, employee.0.full_name());

    let automation = if lead.assigned_to.is_some() {
        run_lead_rules(&state, LeadEvent::new(LeadEventKind::LeadAssigned, lead.clone(), "lead_created")).await
    } else {
        None
    };

    Ok((StatusCode::CREATED, Json(LeadResponse { lead, automation })))
}

async fn list_leads(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<LeadFilter>,
) -> ApiResult<Json<PaginatedResponse<Lead>>> {
    const WHERE: &str = r#"
        WHERE ($1::uuid IS NULL OR company_id = $1)
          AND ($2::uuid IS NULL OR branch_id = $2)
          AND ($3::lead_status IS NULL OR status = $3)
          AND ($4::uuid IS NULL OR assigned_to = $4)
          AND ($5::text IS NULL OR client_name ILIKE '%' || $5 || '%' OR lead_number ILIKE '%' || $5 || '%')
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM leads {}", WHERE))
        .bind(filter.company_id)
        .bind(filter.branch_id)
        .bind(filter.status)
        .bind(filter.assigned_to)
        .bind(&filter.search)
        .fetch_one(&state.db_pool)
        .await?;

    let leads = sqlx::query_as::<_, Lead>(&format!(
        "SELECT * FROM leads {} {} LIMIT $6 OFFSET $7",
        WHERE,
        params.order_clause(SORTABLE_COLUMNS, "created_at")
    ))
    .bind(filter.company_id)
    .bind(filter.branch_id)
    .bind(filter.status)
    .bind(filter.assigned_to)
    .bind(&filter.search)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(PaginatedResponse::new(leads, &params, total)))
}

/// Leads assigned to the acting employee that are still being worked.
async fn my_leads(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
) -> ApiResult<Json<Vec<Lead>>> {
    let leads = sqlx::query_as::<_, Lead>(
        r#"
        SELECT * FROM leads
        WHERE assigned_to = $1
          AND status NOT IN ('REJECTED', 'CLOSED_WON', 'CLOSED_LOST')
        ORDER BY created_at DESC
        "#,
    )
    .bind(employee.id())
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(leads))
}

async fn get_lead(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Lead>> {
    Ok(Json(load_lead(&state, id).await?))
}

async fn update_lead_status(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> ApiResult<Json<LeadResponse>> {
    if payload.status == LeadStatus::Rejected {
        return Err(ApiError::bad_request(
            "Use POST /api/v1/leads/:id/reject to reject a lead",
        ));
    }

    let current = load_lead(&state, id).await?;

    if current.status == payload.status {
        return Ok(Json(LeadResponse {
            lead: current,
            automation: None,
        }));
    }
    if current.status.is_terminal() {
        return Err(ApiError::bad_request(format!(
            "Lead {} is {} and can no longer change status",
            current.lead_number,
            current.status.as_str()
        )));
    }

    let lead = sqlx::query_as::<_, Lead>(
        r#"
        UPDATE leads SET status = $2, updated_at = NOW()
        WHERE id = $1 AND status NOT IN ('REJECTED', 'CLOSED_WON', 'CLOSED_LOST')
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(payload.status)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| {
        ApiError::bad_request(format!(
            "Lead {} was closed concurrently and can no longer change status",
            current.lead_number
        ))
    })?;

    tracing::info!(
        "Lead {} moved {} -> {} by {}",
        lead.lead_number,
        current.status.as_str(),
        lead.status.as_str(),
        employee.0.full_name()
    );

    let event = LeadEvent::new(LeadEventKind::LeadStatusChanged, lead.clone(), "lead_status_update")
        .with_previous_status(current.status);
    let automation = run_lead_rules(&state, event).await;

    Ok(Json(LeadResponse { lead, automation }))
}

async fn assign_lead(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignLeadRequest>,
) -> ApiResult<Json<LeadResponse>> {
    let current = load_lead(&state, id).await?;
    if current.status.is_terminal() {
        return Err(ApiError::bad_request(format!(
            "Lead {} is {} and cannot be assigned",
            current.lead_number,
            current.status.as_str()
        )));
    }
    let assignee = active_employee(&state, payload.employee_id).await?;

    let lead = sqlx::query_as::<_, Lead>(
        r#"
        UPDATE leads
        SET assigned_to = $2,
            status = CASE WHEN status IN ('NEW', 'UNASSIGNED') THEN 'ASSIGNED'::lead_status ELSE status END,
            is_reassigned = is_reassigned OR (assigned_to IS NOT NULL AND assigned_to <> $2),
            reassigned_at = CASE WHEN assigned_to IS NOT NULL AND assigned_to <> $2 THEN NOW() ELSE reassigned_at END,
            reassigned_by = CASE WHEN assigned_to IS NOT NULL AND assigned_to <> $2 THEN $3 ELSE reassigned_by END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(assignee.id)
    .bind(employee.id())
    .fetch_one(&state.db_pool)
    .await?;

    tracing::info!("Lead {} assigned to {}", lead.lead_number, assignee.full_name());

    let mut event = LeadEvent::new(LeadEventKind::LeadAssigned, lead.clone(), "lead_assignment");
    if current.status != lead.status {
        event = event.with_previous_status(current.status);
    }
    let automation = run_lead_rules(&state, event).await;

    Ok(Json(LeadResponse { lead, automation }))
}

async fn reject_lead(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectLeadRequest>,
) -> ApiResult<Json<Lead>> {
    Validator::new()
        .required_string(Some(payload.reason.as_str()), "reason")
        .finish()?;

    let current = load_lead(&state, id).await?;
    if current.status.is_terminal() {
        return Err(ApiError::bad_request(format!(
            "Lead {} is already {}",
            current.lead_number,
            current.status.as_str()
        )));
    }

    let mut tx = state.db_pool.begin().await?;

    let lead = sqlx::query_as::<_, Lead>(
        r#"
        UPDATE leads
        SET status = 'REJECTED', rejection_reason = $2, rejected_at = NOW(), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(payload.reason.trim())
    .fetch_one(&mut *tx)
    .await?;

    let archived = sqlx::query(
        r#"
        UPDATE ai_tasks
        SET status = 'archived',
            metadata = metadata || jsonb_build_object('archived_reason', 'Lead rejected', 'archived_at', NOW()),
            updated_at = NOW()
        WHERE lead_id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO activity_log (activity_type, entity_type, entity_id, description, performed_by)
        VALUES ('lead_rejected', 'lead', $1, $2, $3)
        "#,
    )
    .bind(id)
    .bind(format!("Lead {} rejected: {}", lead.lead_number, payload.reason.trim()))
    .bind(employee.id())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        "Lead {} rejected, {} pending task(s) archived",
        lead.lead_number,
        archived.rows_affected()
    );
    Ok(Json(lead))
}
