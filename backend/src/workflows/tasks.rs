// AI task lifecycle: creation, completion, archiving and reassignment

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{followups, WorkflowError, WorkflowResult};
use crate::config::WorkflowConfig;
use crate::events::{EventHub, StreamEvent};
use crate::pagination::PaginationParams;
use ooak_shared::{AiTask, Employee, Priority, TaskStatus, TaskType};

pub const QUOTATION_SUPERSEDES_CONTACT: &str = "Contact completed - quotation already generated";

const SORTABLE_COLUMNS: &[&str] = &["created_at", "due_date", "priority", "status", "client_name"];

#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_title: String,
    pub task_description: Option<String>,
    pub task_type: TaskType,
    pub priority: Priority,
    pub assigned_to_employee_id: Option<Uuid>,
    /// Display name; looked up from the employee when omitted
    pub assigned_to: Option<String>,
    pub lead_id: Option<Uuid>,
    pub quotation_id: Option<Uuid>,
    pub client_name: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub business_impact: Option<String>,
    pub ai_reasoning: Option<String>,
    pub estimated_value: Option<Decimal>,
    pub metadata: Value,
}

impl NewTask {
    pub fn new(title: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            task_title: title.into(),
            task_description: None,
            task_type,
            priority: Priority::default(),
            assigned_to_employee_id: None,
            assigned_to: None,
            lead_id: None,
            quotation_id: None,
            client_name: None,
            due_date: None,
            business_impact: None,
            ai_reasoning: None,
            estimated_value: None,
            metadata: json!({}),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<Uuid>,
    pub client_name: Option<String>,
    pub lead_id: Option<Uuid>,
    pub quotation_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CompletedTask {
    pub task: AiTask,
    pub next_task: Option<AiTask>,
    pub sequence_completed: bool,
}

#[derive(Debug, Serialize)]
pub struct Reassignment {
    pub task: AiTask,
    pub task_reassigned: bool,
    pub lead_reassigned: bool,
    pub quotation_reassigned: bool,
    pub message: String,
}

#[derive(Clone)]
pub struct TaskService {
    db_pool: PgPool,
    events: EventHub,
    workflow: WorkflowConfig,
}

impl TaskService {
    pub fn new(db_pool: PgPool, events: EventHub, workflow: WorkflowConfig) -> Self {
        Self {
            db_pool,
            events,
            workflow,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db_pool
    }

    pub fn workflow_config(&self) -> &WorkflowConfig {
        &self.workflow
    }

    pub async fn create(&self, task: NewTask) -> WorkflowResult<AiTask> {
        let mut conn = self.db_pool.acquire().await?;
        let created = Self::insert(&mut *conn, &task).await?;
        self.announce(&created).await;
        Ok(created)
    }

    /// Inserts the task on the given connection, usually an open transaction.
    /// Callers run [`TaskService::announce`] once the row is committed.
    pub async fn insert(conn: &mut PgConnection, task: &NewTask) -> WorkflowResult<AiTask> {
        let created = sqlx::query_as::<_, AiTask>(
            r#"
            INSERT INTO ai_tasks (
                task_title, task_description, task_type, priority, status,
                assigned_to_employee_id, assigned_to, lead_id, quotation_id, client_name,
                due_date, business_impact, ai_reasoning, estimated_value, metadata
            )
            VALUES (
                $1, $2, $3, $4, 'pending',
                $5,
                COALESCE($6, (SELECT TRIM(first_name || ' ' || last_name) FROM employees WHERE id = $5)),
                $7, $8, $9, $10, $11, $12, $13, $14
            )
            RETURNING *
            "#,
        )
        .bind(&task.task_title)
        .bind(&task.task_description)
        .bind(task.task_type)
        .bind(task.priority)
        .bind(task.assigned_to_employee_id)
        .bind(&task.assigned_to)
        .bind(task.lead_id)
        .bind(task.quotation_id)
        .bind(&task.client_name)
        .bind(task.due_date)
        .bind(&task.business_impact)
        .bind(&task.ai_reasoning)
        .bind(task.estimated_value)
        .bind(&task.metadata)
        .fetch_one(&mut *conn)
        .await?;

        tracing::info!(
            "Created {} task {} '{}'",
            created.task_type.as_str(),
            created.id,
            created.task_title
        );
        Ok(created)
    }

    /// Post-commit work for a new task: contact tasks superseded by a
    /// quotation task are archived and the assignee is pushed the task.
    pub async fn announce(&self, created: &AiTask) {
        if created.quotation_id.is_some() {
            if let Some(client) = created.client_name.as_deref() {
                if let Err(e) = self.enforce_single_active_task(client).await {
                    tracing::warn!("Single active task rule failed for '{}': {}", client, e);
                }
            }
        }

        if let Some(assignee) = created.assigned_to_employee_id {
            self.events
                .publish(assignee, StreamEvent::task_assigned(created))
                .await;
        }
    }

    pub async fn get(&self, id: Uuid) -> WorkflowResult<AiTask> {
        sqlx::query_as::<_, AiTask>("SELECT * FROM ai_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(WorkflowError::NotFound("Task"))
    }

    pub async fn list(&self, filter: &TaskFilter, params: &PaginationParams) -> WorkflowResult<(Vec<AiTask>, i64)> {
        const WHERE: &str = r#"
            WHERE ($1::task_status IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR assigned_to_employee_id = $2)
              AND ($3::text IS NULL OR client_name ILIKE '%' || $3 || '%')
              AND ($4::uuid IS NULL OR lead_id = $4)
              AND ($5::uuid IS NULL OR quotation_id = $5)
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM ai_tasks {}", WHERE))
            .bind(filter.status)
            .bind(filter.assigned_to)
            .bind(&filter.client_name)
            .bind(filter.lead_id)
            .bind(filter.quotation_id)
            .fetch_one(&self.db_pool)
            .await?;

        let sql = format!(
            "SELECT * FROM ai_tasks {} {} LIMIT $6 OFFSET $7",
            WHERE,
            params.order_clause(SORTABLE_COLUMNS, "created_at")
        );
        let tasks = sqlx::query_as::<_, AiTask>(&sql)
            .bind(filter.status)
            .bind(filter.assigned_to)
            .bind(&filter.client_name)
            .bind(filter.lead_id)
            .bind(filter.quotation_id)
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(&self.db_pool)
            .await?;

        Ok((tasks, total))
    }

    /// Marks the task done and, for sequential follow-ups, creates the next
    /// step. Both happen in one transaction: if the next step cannot be
    /// created the task stays pending.
    pub async fn complete(&self, id: Uuid) -> WorkflowResult<CompletedTask> {
        let mut tx = self.db_pool.begin().await?;

        let task = sqlx::query_as::<_, AiTask>(
            r#"
            UPDATE ai_tasks
            SET status = 'completed', completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(task) = task else {
            tx.rollback().await?;
            let existing = self.get(id).await?;
            let state = match existing.status {
                TaskStatus::Pending => "pending",
                TaskStatus::Completed => "completed",
                TaskStatus::Archived => "archived",
            };
            return Err(WorkflowError::InvalidState(format!("Task is already {}", state)));
        };

        if !task.is_sequential() {
            tx.commit().await?;
            return Ok(CompletedTask {
                task,
                next_task: None,
                sequence_completed: false,
            });
        }

        let next_task = followups::advance(&mut *tx, &self.workflow, &task).await?;
        tx.commit().await?;

        if let Some(next) = &next_task {
            self.announce(next).await;
        }
        let sequence_completed = next_task.is_none()
            && task.sequence_step().unwrap_or(0) >= task.sequence_total_steps().unwrap_or(0);

        Ok(CompletedTask {
            task,
            next_task,
            sequence_completed,
        })
    }

    pub async fn archive(&self, id: Uuid, reason: &str) -> WorkflowResult<AiTask> {
        sqlx::query_as::<_, AiTask>(
            r#"
            UPDATE ai_tasks
            SET status = 'archived',
                metadata = metadata || jsonb_build_object('archived_reason', $2::text, 'archived_at', NOW()),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(WorkflowError::NotFound("Task"))
    }

    /// Once a client has a quotation-bound pending task, their remaining
    /// contact tasks are archived. Returns how many were archived.
    pub async fn enforce_single_active_task(&self, client_name: &str) -> WorkflowResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE ai_tasks
            SET status = 'archived',
                metadata = metadata || jsonb_build_object('archived_reason', $2::text, 'archived_at', NOW()),
                updated_at = NOW()
            WHERE client_name = $1
              AND status = 'pending'
              AND quotation_id IS NULL
              AND EXISTS (
                  SELECT 1 FROM ai_tasks q
                  WHERE q.client_name = $1 AND q.status = 'pending' AND q.quotation_id IS NOT NULL
              )
            "#,
        )
        .bind(client_name)
        .bind(QUOTATION_SUPERSEDES_CONTACT)
        .execute(&self.db_pool)
        .await?;

        let archived = result.rows_affected();
        if archived > 0 {
            tracing::info!("Archived {} contact task(s) for client '{}'", archived, client_name);
        }
        Ok(archived)
    }

    /// Moves the task to another active employee and carries the lead and
    /// quotation along. Lead and quotation updates are best effort.
    pub async fn reassign(&self, task_id: Uuid, employee_id: Uuid, performed_by: Uuid) -> WorkflowResult<Reassignment> {
        let task = self.get(task_id).await?;

        let employee = sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = $1")
            .bind(employee_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(WorkflowError::NotFound("Employee"))?;

        if !employee.is_active() {
            return Err(WorkflowError::InvalidState(format!(
                "Cannot reassign to inactive employee: {}",
                employee.full_name()
            )));
        }

        let name = employee.full_name();
        let updated = sqlx::query_as::<_, AiTask>(
            r#"
            UPDATE ai_tasks
            SET assigned_to_employee_id = $2, assigned_to = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(employee.id)
        .bind(&name)
        .fetch_one(&self.db_pool)
        .await?;

        let mut lead_reassigned = false;
        if let Some(lead_id) = task.lead_id {
            let result = sqlx::query(
                r#"
                UPDATE leads
                SET assigned_to = $2, is_reassigned = TRUE, reassigned_at = NOW(),
                    reassigned_by = $3, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(lead_id)
            .bind(employee.id)
            .bind(performed_by)
            .execute(&self.db_pool)
            .await;
            match result {
                Ok(r) => lead_reassigned = r.rows_affected() > 0,
                Err(e) => tracing::warn!("Task {} reassigned but lead {} update failed: {}", task_id, lead_id, e),
            }
        }

        let mut quotation_reassigned = false;
        if let Some(quotation_id) = task.quotation_id {
            let result = sqlx::query("UPDATE quotations SET created_by = $2, updated_at = NOW() WHERE id = $1")
                .bind(quotation_id)
                .bind(employee.id)
                .execute(&self.db_pool)
                .await;
            match result {
                Ok(r) => quotation_reassigned = r.rows_affected() > 0,
                Err(e) => tracing::warn!(
                    "Task {} reassigned but quotation {} update failed: {}",
                    task_id,
                    quotation_id,
                    e
                ),
            }
        }

        let mut carried = Vec::new();
        if lead_reassigned {
            carried.push("lead");
        }
        if quotation_reassigned {
            carried.push("quotation");
        }
        let suffix = if carried.is_empty() {
            String::new()
        } else {
            format!(" (with associated {})", carried.join(" and "))
        };
        let description = format!(
            "Task \"{}\" reassigned from {} to {}{}",
            task.task_title,
            task.assigned_to.as_deref().unwrap_or("unassigned"),
            name,
            suffix
        );

        if let Err(e) = sqlx::query(
            r#"
            INSERT INTO activity_log (activity_type, entity_type, entity_id, description, performed_by)
            VALUES ('task_reassignment', 'task', $1, $2, $3)
            "#,
        )
        .bind(task_id)
        .bind(&description)
        .bind(performed_by)
        .execute(&self.db_pool)
        .await
        {
            tracing::warn!("Failed to log reassignment of task {}: {}", task_id, e);
        }

        self.events
            .publish(employee.id, StreamEvent::task_assigned(&updated))
            .await;

        Ok(Reassignment {
            task: updated,
            task_reassigned: true,
            lead_reassigned,
            quotation_reassigned,
            message: format!("Task reassigned to {}", name),
        })
    }

    /// Pending tasks of one type for a quotation, e.g. open approval tasks.
    pub async fn complete_pending_for_quotation(&self, quotation_id: Uuid, task_type: TaskType) -> WorkflowResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE ai_tasks
            SET status = 'completed', completed_at = NOW(), updated_at = NOW()
            WHERE quotation_id = $1 AND task_type = $2 AND status = 'pending'
            "#,
        )
        .bind(quotation_id)
        .bind(task_type)
        .execute(&self.db_pool)
        .await?;
        Ok(result.rows_affected())
    }
}
