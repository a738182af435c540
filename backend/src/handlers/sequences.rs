use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::CurrentEmployee;
use crate::error::{ApiError, ApiResult};
use crate::validation::Validator;
use crate::workflows::sequence::{
    self, PlannedStep, DEFAULT_DUE_AFTER_HOURS, DEFAULT_STEP_ICON, MAX_DUE_AFTER_HOURS,
};
use crate::AppState;
use ooak_shared::{Priority, SequenceRule, SequenceStep, SequenceTemplate};

#[derive(Debug, Clone, Deserialize)]
pub struct StepInput {
    pub title: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub due_after_hours: Option<i32>,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub is_conditional: bool,
    pub condition_type: Option<String>,
    pub condition_value: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleInput {
    #[serde(default = "default_rule_type")]
    pub rule_type: String,
    pub condition_field: String,
    pub condition_operator: String,
    pub condition_value: String,
    pub action_type: String,
    #[serde(default)]
    pub action_data: Value,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_rule_type() -> String {
    "conditional".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub steps: Vec<StepInput>,
    #[serde(default)]
    pub rules: Vec<RuleInput>,
}

/// Omitted fields are left alone; `steps` and `rules` replace the existing
/// rows when present.
#[derive(Debug, Deserialize)]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
    pub steps: Option<Vec<StepInput>>,
    pub rules: Option<Vec<RuleInput>>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Serialize)]
pub struct TemplateDetail {
    #[serde(flatten)]
    pub template: SequenceTemplate,
    pub steps: Vec<SequenceStep>,
    pub rules: Vec<SequenceRule>,
}

#[derive(Debug, Serialize)]
pub struct PlanPreview {
    pub total_steps: usize,
    pub estimated_duration_days: i32,
    pub steps: Vec<PlannedStep>,
}

pub fn sequence_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_templates).post(create_template))
        .route("/:id", get(get_template).put(update_template).delete(delete_template))
        .route("/:id/preview", post(preview_template))
}

fn validate_steps(validator: Validator, steps: &[StepInput]) -> Validator {
    let mut validator = validator.not_empty(steps, "steps");
    for (index, step) in steps.iter().enumerate() {
        let field = format!("steps[{}]", index);
        validator = validator
            .required_string(Some(step.title.as_str()), &format!("{}.title", field))
            .error_if(
                step.due_after_hours.is_some_and(|h| h < 0),
                &format!("{}.due_after_hours", field),
                "Due hours cannot be negative",
            )
            .error_if(
                step.due_after_hours.is_some_and(|h| h > MAX_DUE_AFTER_HOURS),
                &format!("{}.due_after_hours", field),
                &format!("Due hours cannot exceed {}", MAX_DUE_AFTER_HOURS),
            )
            .error_if(
                step.is_conditional && (step.condition_type.is_none() || step.condition_value.is_none()),
                &field,
                "Conditional steps need a condition type and value",
            );
    }
    validator
}

fn validate_rules(mut validator: Validator, rules: &[RuleInput]) -> Validator {
    for (index, rule) in rules.iter().enumerate() {
        if let Err(e) = sequence::validate_rule(
            &rule.condition_field,
            &rule.condition_operator,
            &rule.condition_value,
            &rule.action_type,
            &rule.action_data,
        ) {
            validator = validator.error(&format!("rules[{}]", index), &e.to_string());
        }
    }
    validator
}

/// `total_steps` and `estimated_duration_days` derived from the steps
fn template_metadata(steps: &[StepInput]) -> Value {
    let max_hours = steps
        .iter()
        .map(|s| s.due_after_hours.unwrap_or(DEFAULT_DUE_AFTER_HOURS))
        .max()
        .unwrap_or(0);
    json!({
        "total_steps": steps.len(),
        "estimated_duration_days": sequence::estimated_duration_days(max_hours),
    })
}

async fn insert_steps(
    tx: &mut Transaction<'_, Postgres>,
    template_id: Uuid,
    steps: &[StepInput],
) -> Result<(), sqlx::Error> {
    for (index, step) in steps.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO sequence_steps (
                sequence_template_id, step_number, title, description, icon, due_after_hours,
                priority, is_conditional, condition_type, condition_value, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(template_id)
        .bind(index as i32 + 1)
        .bind(step.title.trim())
        .bind(&step.description)
        .bind(step.icon.as_deref().unwrap_or(DEFAULT_STEP_ICON))
        .bind(step.due_after_hours.unwrap_or(DEFAULT_DUE_AFTER_HOURS))
        .bind(step.priority.unwrap_or_default())
        .bind(step.is_conditional)
        .bind(&step.condition_type)
        .bind(&step.condition_value)
        .bind(step.metadata.clone().unwrap_or_else(|| json!({})))
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn insert_rules(
    tx: &mut Transaction<'_, Postgres>,
    template_id: Uuid,
    rules: &[RuleInput],
) -> Result<(), sqlx::Error> {
    for rule in rules {
        sqlx::query(
            r#"
            INSERT INTO sequence_rules (
                sequence_template_id, rule_type, condition_field, condition_operator,
                condition_value, action_type, action_data, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(template_id)
        .bind(&rule.rule_type)
        .bind(&rule.condition_field)
        .bind(&rule.condition_operator)
        .bind(&rule.condition_value)
        .bind(&rule.action_type)
        .bind(&rule.action_data)
        .bind(rule.is_active)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn load_detail(state: &AppState, id: Uuid) -> ApiResult<TemplateDetail> {
    let template = sqlx::query_as::<_, SequenceTemplate>("SELECT * FROM task_sequence_templates WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Sequence template"))?;

    let steps = sqlx::query_as::<_, SequenceStep>(
        "SELECT * FROM sequence_steps WHERE sequence_template_id = $1 ORDER BY step_number",
    )
    .bind(id)
    .fetch_all(&state.db_pool)
    .await?;

    let rules = sqlx::query_as::<_, SequenceRule>(
        "SELECT * FROM sequence_rules WHERE sequence_template_id = $1 ORDER BY id",
    )
    .bind(id)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(TemplateDetail { template, steps, rules })
}

async fn list_templates(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
) -> ApiResult<Json<Vec<TemplateDetail>>> {
    let templates = sqlx::query_as::<_, SequenceTemplate>(
        "SELECT * FROM task_sequence_templates ORDER BY created_at DESC",
    )
    .fetch_all(&state.db_pool)
    .await?;

    let ids: Vec<Uuid> = templates.iter().map(|t| t.id).collect();

    let mut steps: HashMap<Uuid, Vec<SequenceStep>> = HashMap::new();
    for step in sqlx::query_as::<_, SequenceStep>(
        "SELECT * FROM sequence_steps WHERE sequence_template_id = ANY($1) ORDER BY step_number",
    )
    .bind(&ids)
    .fetch_all(&state.db_pool)
    .await?
    {
        steps.entry(step.sequence_template_id).or_default().push(step);
    }

    let mut rules: HashMap<Uuid, Vec<SequenceRule>> = HashMap::new();
    for rule in sqlx::query_as::<_, SequenceRule>(
        "SELECT * FROM sequence_rules WHERE sequence_template_id = ANY($1) ORDER BY id",
    )
    .bind(&ids)
    .fetch_all(&state.db_pool)
    .await?
    {
        rules.entry(rule.sequence_template_id).or_default().push(rule);
    }

    let details = templates
        .into_iter()
        .map(|template| TemplateDetail {
            steps: steps.remove(&template.id).unwrap_or_default(),
            rules: rules.remove(&template.id).unwrap_or_default(),
            template,
        })
        .collect();

    Ok(Json(details))
}

async fn get_template(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TemplateDetail>> {
    Ok(Json(load_detail(&state, id).await?))
}

async fn create_template(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
    Json(payload): Json<CreateTemplateRequest>,
) -> ApiResult<(StatusCode, Json<TemplateDetail>)> {
    let validator = Validator::new().required_string(Some(payload.name.as_str()), "name");
    let validator = validate_steps(validator, &payload.steps);
    validate_rules(validator, &payload.rules).finish()?;

    let mut tx = state.db_pool.begin().await?;

    let template_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO task_sequence_templates (name, description, category, is_active, created_by, metadata)
        VALUES ($1, $2, COALESCE($3, 'sales_followup'), $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(payload.name.trim())
    .bind(&payload.description)
    .bind(&payload.category)
    .bind(payload.is_active)
    .bind(employee.id())
    .bind(template_metadata(&payload.steps))
    .fetch_one(&mut *tx)
    .await?;

    insert_steps(&mut tx, template_id, &payload.steps).await?;
    insert_rules(&mut tx, template_id, &payload.rules).await?;

    tx.commit().await?;
    tracing::info!(
        "Sequence template '{}' created with {} steps and {} rules",
        payload.name.trim(),
        payload.steps.len(),
        payload.rules.len()
    );

    Ok((StatusCode::CREATED, Json(load_detail(&state, template_id).await?)))
}

async fn update_template(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTemplateRequest>,
) -> ApiResult<Json<TemplateDetail>> {
    let mut validator = Validator::new();
    if let Some(name) = &payload.name {
        validator = validator.required_string(Some(name.as_str()), "name");
    }
    if let Some(steps) = &payload.steps {
        validator = validate_steps(validator, steps);
    }
    if let Some(rules) = &payload.rules {
        validator = validate_rules(validator, rules);
    }
    validator.finish()?;

    let mut tx = state.db_pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE task_sequence_templates
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            category = COALESCE($4, category),
            is_active = COALESCE($5, is_active),
            metadata = CASE WHEN $6::jsonb IS NULL THEN metadata ELSE metadata || $6::jsonb END,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(payload.name.as_deref().map(str::trim))
    .bind(&payload.description)
    .bind(&payload.category)
    .bind(payload.is_active)
    .bind(payload.steps.as_deref().map(template_metadata))
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::not_found("Sequence template"));
    }

    if let Some(steps) = &payload.steps {
        sqlx::query("DELETE FROM sequence_steps WHERE sequence_template_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_steps(&mut tx, id, steps).await?;
    }

    if let Some(rules) = &payload.rules {
        sqlx::query("DELETE FROM sequence_rules WHERE sequence_template_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_rules(&mut tx, id, rules).await?;
    }

    tx.commit().await?;
    Ok(Json(load_detail(&state, id).await?))
}

async fn delete_template(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let result = sqlx::query("DELETE FROM task_sequence_templates WHERE id = $1")
        .bind(id)
        .execute(&state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Sequence template"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Plans the template against an ad-hoc context without creating tasks.
async fn preview_template(
    State(state): State<Arc<AppState>>,
    _employee: CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<PreviewRequest>,
) -> ApiResult<Json<PlanPreview>> {
    let detail = load_detail(&state, id).await?;
    let context = if payload.context.is_object() { payload.context } else { json!({}) };

    let steps = sequence::plan(&detail.steps, &detail.rules, &context);
    let max_hours = steps.iter().map(|s| s.due_after_hours).max().unwrap_or(0);

    Ok(Json(PlanPreview {
        total_steps: steps.len(),
        estimated_duration_days: sequence::estimated_duration_days(max_hours),
        steps,
    }))
}
