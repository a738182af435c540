use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, Response},
};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::EMPLOYEE_HEADER;

pub fn request_as(employee_id: Uuid, method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(EMPLOYEE_HEADER, employee_id.to_string());

    match body {
        Some(json) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("Failed to build request"),
        None => builder.body(Body::empty()).expect("Failed to build request"),
    }
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

// Database test helpers
pub async fn count_table_rows(pool: &sqlx::PgPool, table: &str) -> i64 {
    let query = format!("SELECT COUNT(*) as count FROM {}", table);
    sqlx::query_scalar::<_, i64>(&query)
        .fetch_one(pool)
        .await
        .unwrap_or(0)
}

pub async fn count_notifications(pool: &sqlx::PgPool, user_id: Uuid, notification_type: &str) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND notification_type = $2")
        .bind(user_id)
        .bind(notification_type)
        .fetch_one(pool)
        .await
        .unwrap_or(0)
}

pub async fn quotation_status(pool: &sqlx::PgPool, quotation_id: Uuid) -> String {
    sqlx::query_scalar::<_, String>("SELECT status::text FROM quotations WHERE id = $1")
        .bind(quotation_id)
        .fetch_one(pool)
        .await
        .expect("Failed to load quotation status")
}
