use axum::{extract::State, http::StatusCode, response::Json};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::CurrentEmployee;
use crate::database;
use crate::error::{ApiError, ApiResult, PG_FOREIGN_KEY_VIOLATION};
use crate::notifications;
use crate::AppState;

pub mod accounts;
pub mod employees;
pub mod jobs;
pub mod leads;
pub mod menu_permissions;
pub mod quotations;
pub mod sequences;
pub mod tasks;

pub use accounts::account_routes;
pub use employees::employee_routes;
pub use jobs::job_routes;
pub use leads::lead_routes;
pub use menu_permissions::menu_permission_routes;
pub use quotations::quotation_routes;
pub use sequences::sequence_routes;
pub use tasks::task_routes;

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub leads: LeadStats,
    pub tasks: TaskStats,
    pub quotations: QuotationStats,
    pub unread_notifications: i64,
}

#[derive(Debug, Serialize)]
pub struct LeadStats {
    pub total: i64,
    pub active: i64,
    pub won: i64,
    pub by_status: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
pub struct TaskStats {
    pub pending: i64,
    pub overdue: i64,
}

#[derive(Debug, Serialize)]
pub struct QuotationStats {
    pub by_status: BTreeMap<String, i64>,
    /// Pending approval plus approved
    pub pipeline_value: Decimal,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = database::health_check(&state.db_pool).await;
    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(json!({
            "status": if database { "healthy" } else { "degraded" },
            "service": "ooak-api",
            "database": database,
            "event_streams": state.events.connection_count().await,
            "pool": database::get_pool_stats(&state.db_pool),
        })),
    )
}

pub async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
) -> ApiResult<Json<DashboardStats>> {
    let lead_rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status::text, COUNT(*) FROM leads GROUP BY status")
            .fetch_all(&state.db_pool)
            .await?;

    let terminal = ["CLOSED_WON", "CLOSED_LOST", "REJECTED"];
    let total = lead_rows.iter().map(|(_, n)| n).sum();
    let active = lead_rows
        .iter()
        .filter(|(status, _)| !terminal.contains(&status.as_str()))
        .map(|(_, n)| n)
        .sum();
    let won = lead_rows
        .iter()
        .find(|(status, _)| status == "CLOSED_WON")
        .map(|(_, n)| *n)
        .unwrap_or(0);

    let (pending, overdue): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'pending'),
            COUNT(*) FILTER (WHERE status = 'pending' AND due_date < NOW())
        FROM ai_tasks
        "#,
    )
    .fetch_one(&state.db_pool)
    .await?;

    let quotation_rows: Vec<(String, i64, Decimal)> = sqlx::query_as(
        "SELECT status::text, COUNT(*), COALESCE(SUM(total_amount), 0) FROM quotations GROUP BY status",
    )
    .fetch_all(&state.db_pool)
    .await?;

    let pipeline_value = quotation_rows
        .iter()
        .filter(|(status, _, _)| status == "pending_approval" || status == "approved")
        .map(|(_, _, amount)| *amount)
        .sum();

    let unread_notifications = notifications::unread_notifications(&state.db_pool, employee.id()).await?;

    Ok(Json(DashboardStats {
        leads: LeadStats {
            total,
            active,
            won,
            by_status: lead_rows.into_iter().collect(),
        },
        tasks: TaskStats { pending, overdue },
        quotations: QuotationStats {
            by_status: quotation_rows
                .into_iter()
                .map(|(status, count, _)| (status, count))
                .collect(),
            pipeline_value,
        },
        unread_notifications,
    }))
}

/// Deletes one row inside a transaction. A row that other data still
/// references is reported as a conflict and the transaction rolls back.
pub(crate) async fn delete_unreferenced(
    pool: &PgPool,
    sql: &str,
    id: Uuid,
    resource: &str,
) -> ApiResult<()> {
    let mut tx = pool.begin().await?;

    match sqlx::query(sql).bind(id).execute(&mut *tx).await {
        Ok(result) if result.rows_affected() == 0 => Err(ApiError::not_found(resource)),
        Ok(_) => {
            tx.commit().await?;
            Ok(())
        }
        Err(sqlx::Error::Database(db_err))
            if db_err.code().as_deref() == Some(PG_FOREIGN_KEY_VIOLATION) =>
        {
            tx.rollback().await?;
            tracing::warn!("Refused to delete {} {}: {}", resource, id, db_err.message());
            Err(ApiError::conflict(format!(
                "{} is still referenced by other records and cannot be deleted",
                resource
            )))
        }
        Err(e) => Err(e.into()),
    }
}
