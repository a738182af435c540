use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;
use ooak_shared::Employee;

pub const EMPLOYEE_HEADER: &str = "x-employee-id";

/// The active employee on whose behalf the request runs
#[derive(Debug, Clone)]
pub struct CurrentEmployee(pub Employee);

impl CurrentEmployee {
    pub fn id(&self) -> Uuid {
        self.0.id
    }
}

pub(crate) fn employee_id_from_parts(parts: &Parts) -> Result<Uuid, AppError> {
    let raw = parts
        .headers
        .get(EMPLOYEE_HEADER)
        .and_then(|header| header.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing employee identity header".to_string()))?;

    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::Unauthorized("Malformed employee identity header".to_string()))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentEmployee {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let employee_id = employee_id_from_parts(parts)?;

        let employee = sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = $1")
            .bind(employee_id)
            .fetch_optional(&state.db_pool)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Employee not found".to_string()))?;

        if !employee.is_active() {
            return Err(AppError::Forbidden("Employee account is inactive".to_string()));
        }

        Ok(CurrentEmployee(employee))
    }
}
