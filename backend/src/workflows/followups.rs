// Post-approval follow-up sequences
//
// Only one step of a quotation's sequence is pending at a time: approval
// creates step 1, completing a step creates the next one.

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::PgConnection;
use uuid::Uuid;

use super::sequence::{self, PlannedStep, Progression};
use super::tasks::{NewTask, TaskService};
use super::{WorkflowError, WorkflowResult};
use crate::config::WorkflowConfig;
use ooak_shared::{AiTask, Quotation, SequenceRule, SequenceStep, TaskType};

/// Plan for a quotation: the active template with the configured name, or
/// the built-in cadence when there is none.
pub async fn load_plan(
    conn: &mut PgConnection,
    config: &WorkflowConfig,
    quotation: &Quotation,
) -> WorkflowResult<(Option<Uuid>, Vec<PlannedStep>)> {
    let context = sequence::quotation_context(quotation);

    let template_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM task_sequence_templates
        WHERE name = $1 AND is_active = TRUE
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(&config.followup_template_name)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(template_id) = template_id else {
        let steps = sequence::default_followup_steps();
        let rules = sequence::default_followup_rules(config.high_value_threshold);
        return Ok((None, sequence::plan(&steps, &rules, &context)));
    };

    let steps = sqlx::query_as::<_, SequenceStep>(
        "SELECT * FROM sequence_steps WHERE sequence_template_id = $1 ORDER BY step_number",
    )
    .bind(template_id)
    .fetch_all(&mut *conn)
    .await?;

    let rules = sqlx::query_as::<_, SequenceRule>(
        "SELECT * FROM sequence_rules WHERE sequence_template_id = $1 AND is_active = TRUE ORDER BY id",
    )
    .bind(template_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok((Some(template_id), sequence::plan(&steps, &rules, &context)))
}

/// Quotation creator, else the lead owner.
async fn followup_assignee(conn: &mut PgConnection, quotation: &Quotation) -> WorkflowResult<Option<Uuid>> {
    if quotation.created_by.is_some() {
        return Ok(quotation.created_by);
    }
    let Some(lead_id) = quotation.lead_id else {
        return Ok(None);
    };
    let owner: Option<Option<Uuid>> = sqlx::query_scalar("SELECT assigned_to FROM leads WHERE id = $1")
        .bind(lead_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(owner.flatten())
}

fn step_task(
    quotation: &Quotation,
    step: &PlannedStep,
    total_steps: i32,
    template_id: Option<Uuid>,
    previous_task_id: Option<Uuid>,
    assignee: Option<Uuid>,
) -> NewTask {
    let context = sequence::quotation_context(quotation);
    let mut metadata = json!({
        "quotation_number": quotation.quotation_number,
        "task_type": TaskType::PostApprovalFollowup.as_str(),
        "sequence_step": step.step_number,
        "sequence_total_steps": total_steps,
        "is_sequential": true,
        "total_amount": quotation.total_amount,
        "step_key": step.metadata.get("key").cloned().unwrap_or(Value::Null),
    });
    if let Some(previous) = previous_task_id {
        metadata["previous_task_id"] = json!(previous);
    }
    if let Some(template) = template_id {
        metadata["sequence_template_id"] = json!(template);
    }

    NewTask {
        task_description: step.description.as_deref().map(|d| sequence::render(d, &context)),
        priority: step.priority,
        assigned_to_employee_id: assignee,
        lead_id: quotation.lead_id,
        quotation_id: Some(quotation.id),
        client_name: Some(quotation.display_client_name()),
        due_date: Some(Utc::now() + Duration::hours(step.due_after_hours as i64)),
        business_impact: Some(format!("Step {}/{}", step.step_number, total_steps)),
        ai_reasoning: Some(format!(
            "Sequential step {} of {} for {}",
            step.step_number, total_steps, quotation.quotation_number
        )),
        estimated_value: Some(quotation.total_amount),
        metadata,
        ..NewTask::new(sequence::render(&step.title, &context), TaskType::PostApprovalFollowup)
    }
}

async fn has_pending_sequential_task(conn: &mut PgConnection, quotation_id: Uuid) -> WorkflowResult<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM ai_tasks
            WHERE quotation_id = $1 AND status = 'pending' AND metadata->>'is_sequential' = 'true'
        )
        "#,
    )
    .bind(quotation_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

async fn load_quotation(conn: &mut PgConnection, id: Uuid) -> WorkflowResult<Quotation> {
    sqlx::query_as::<_, Quotation>("SELECT * FROM quotations WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(WorkflowError::NotFound("Quotation"))
}

/// Creates step 1 of the follow-up sequence. Does nothing when the
/// quotation already has a pending sequential task.
pub async fn start(tasks: &TaskService, quotation: &Quotation) -> WorkflowResult<Option<AiTask>> {
    let mut tx = tasks.pool().begin().await?;
    if has_pending_sequential_task(&mut tx, quotation.id).await? {
        tracing::info!("Follow-up sequence for {} already running", quotation.quotation_number);
        return Ok(None);
    }

    let (template_id, plan) = load_plan(&mut tx, tasks.workflow_config(), quotation).await?;
    let Some(first) = plan.first() else {
        tracing::warn!("Follow-up plan for {} is empty", quotation.quotation_number);
        return Ok(None);
    };

    let assignee = followup_assignee(&mut tx, quotation).await?;
    let step = step_task(quotation, first, plan.len() as i32, template_id, None, assignee);
    let task = TaskService::insert(&mut tx, &step).await?;
    tx.commit().await?;
    tasks.announce(&task).await;

    tracing::info!(
        "Started {}-step follow-up sequence for {}",
        plan.len(),
        quotation.quotation_number
    );
    Ok(Some(task))
}

/// Inserts the step after `completed` on the caller's transaction, unless
/// the sequence is finished or the quotation already has a pending
/// sequential task. The caller announces the returned task after commit.
pub async fn advance(
    conn: &mut PgConnection,
    config: &WorkflowConfig,
    completed: &AiTask,
) -> WorkflowResult<Option<AiTask>> {
    let Some(quotation_id) = completed.quotation_id else {
        return Ok(None);
    };

    if has_pending_sequential_task(conn, quotation_id).await? {
        tracing::info!("Quotation {} already has a pending follow-up step", quotation_id);
        return Ok(None);
    }

    let quotation = load_quotation(conn, quotation_id).await?;
    let (template_id, plan) = load_plan(conn, config, &quotation).await?;
    let current = completed.sequence_step().unwrap_or(1);

    match sequence::next_step(&plan, current) {
        Progression::Completed { total_steps } => {
            tracing::info!(
                "Follow-up sequence completed for {} ({} steps)",
                quotation.quotation_number,
                total_steps
            );
            Ok(None)
        }
        Progression::Next { step, total_steps } => {
            let assignee = match completed.assigned_to_employee_id {
                Some(id) => Some(id),
                None => followup_assignee(conn, &quotation).await?,
            };
            let next = step_task(&quotation, &step, total_steps, template_id, Some(completed.id), assignee);
            let task = TaskService::insert(conn, &next).await?;
            Ok(Some(task))
        }
    }
}
