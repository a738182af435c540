use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentEmployee;
use crate::error::{ApiError, ApiResult};
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::validation::Validator;
use crate::workflows::quotations::{
    DecisionOutcome, NewQuotation, PaymentReceipt, RejectedQuotation, Submission,
};
use crate::workflows::Decision;
use crate::AppState;
use ooak_shared::{Quotation, QuotationStatus};

const SORTABLE_COLUMNS: &[&str] = &["created_at", "total_amount", "client_name", "status", "quotation_number"];

#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuotationRequest {
    pub lead_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255, message = "Client name is required"))]
    pub client_name: String,
    pub total_amount: Decimal,
    #[serde(default)]
    pub quotation_data: Option<Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuotationRequest {
    #[validate(length(min = 1, max = 255, message = "Client name cannot be empty"))]
    pub client_name: Option<String>,
    pub total_amount: Option<Decimal>,
    pub quotation_data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuotationFilter {
    pub status: Option<QuotationStatus>,
    pub lead_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectedFilter {
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub amount: Decimal,
}

pub fn quotation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_quotations).post(create_quotation))
        .route("/rejected", get(list_rejected))
        .route("/number/:number", get(get_quotation_by_number))
        .route("/number/:number/prepare-revision", post(prepare_revision))
        .route("/:id", get(get_quotation).put(update_quotation))
        .route("/:id/submit", post(submit_quotation))
        .route("/:id/decision", post(decide_quotation))
        .route("/:id/send", post(mark_quotation_sent))
        .route("/:id/payments", post(record_payment))
}

fn check_amount(amount: Option<&Decimal>) -> ApiResult<()> {
    Validator::new()
        .non_negative_amount(amount, "total_amount")
        .finish()
}

async fn create_quotation(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Json(payload): Json<CreateQuotationRequest>,
) -> ApiResult<(StatusCode, Json<Quotation>)> {
    payload.validate()?;
    check_amount(Some(&payload.total_amount))?;

    let client_name = payload.client_name.trim().to_string();
    let mut quotation_data = payload.quotation_data.unwrap_or_else(|| json!({}));
    if !quotation_data.is_object() {
        return Err(ApiError::validation_single("quotation_data", "Quotation data must be an object"));
    }
    if quotation_data.get("client_name").is_none() {
        quotation_data["client_name"] = json!(client_name);
    }

    let quotation = state
        .quotations()
        .create(NewQuotation {
            lead_id: payload.lead_id,
            client_name,
            total_amount: payload.total_amount,
            quotation_data,
            created_by: Some(employee.id()),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(quotation)))
}

async fn list_quotations(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<QuotationFilter>,
) -> ApiResult<Json<PaginatedResponse<Quotation>>> {
    const WHERE: &str = r#"
        WHERE ($1::quotation_status IS NULL OR status = $1)
          AND ($2::uuid IS NULL OR lead_id = $2)
          AND ($3::uuid IS NULL OR created_by = $3)
          AND ($4::text IS NULL OR client_name ILIKE '%' || $4 || '%' OR quotation_number ILIKE '%' || $4 || '%')
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM quotations {}", WHERE))
        .bind(filter.status)
        .bind(filter.lead_id)
        .bind(filter.created_by)
        .bind(&filter.search)
        .fetch_one(&state.db_pool)
        .await?;

    let quotations = sqlx::query_as::<_, Quotation>(&format!(
        "SELECT * FROM quotations {} {} LIMIT $5 OFFSET $6",
        WHERE,
        params.order_clause(SORTABLE_COLUMNS, "created_at")
    ))
    .bind(filter.status)
    .bind(filter.lead_id)
    .bind(filter.created_by)
    .bind(&filter.search)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(PaginatedResponse::new(quotations, &params, total)))
}

async fn get_quotation(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Quotation>> {
    Ok(Json(state.quotations().get(id).await?))
}

async fn get_quotation_by_number(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(number): Path<String>,
) -> ApiResult<Json<Quotation>> {
    Ok(Json(state.quotations().get_by_number(&number).await?))
}

/// Only drafts and quotations sent back for revision are editable.
async fn update_quotation(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateQuotationRequest>,
) -> ApiResult<Json<Quotation>> {
    payload.validate()?;
    check_amount(payload.total_amount.as_ref())?;
    if payload.quotation_data.as_ref().is_some_and(|d| !d.is_object()) {
        return Err(ApiError::validation_single("quotation_data", "Quotation data must be an object"));
    }

    let current = state.quotations().get(id).await?;
    if !current.status.can_submit() {
        return Err(ApiError::bad_request(format!(
            "Quotation {} is {} and cannot be edited",
            current.quotation_number,
            current.status.as_str()
        )));
    }

    let quotation = sqlx::query_as::<_, Quotation>(
        r#"
        UPDATE quotations
        SET client_name = COALESCE($2, client_name),
            total_amount = COALESCE($3, total_amount),
            quotation_data = COALESCE($4, quotation_data),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(payload.client_name.as_deref().map(str::trim))
    .bind(payload.total_amount)
    .bind(&payload.quotation_data)
    .fetch_one(&state.db_pool)
    .await?;

    Ok(Json(quotation))
}

async fn submit_quotation(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Submission>> {
    Ok(Json(state.quotations().submit_for_approval(id).await?))
}

async fn decide_quotation(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> ApiResult<Json<DecisionOutcome>> {
    let outcome = state
        .quotations()
        .decide(id, payload.decision, payload.comments, employee.id())
        .await?;
    Ok(Json(outcome))
}

async fn prepare_revision(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(number): Path<String>,
) -> ApiResult<Json<Value>> {
    let url = state.quotations().prepare_revision(&number).await?;
    Ok(Json(json!({ "success": true, "edit_url": url })))
}

async fn mark_quotation_sent(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Quotation>> {
    Ok(Json(state.quotations().mark_sent(id, employee.id()).await?))
}

async fn record_payment(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<PaymentRequest>,
) -> ApiResult<Json<PaymentReceipt>> {
    let receipt = state
        .quotations()
        .record_payment(id, payload.amount, employee.id())
        .await?;
    Ok(Json(receipt))
}

async fn list_rejected(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Query(filter): Query<RejectedFilter>,
) -> ApiResult<Json<Vec<RejectedQuotation>>> {
    Ok(Json(state.quotations().list_rejected(filter.created_by).await?))
}
