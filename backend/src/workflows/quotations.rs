// Quotation approval and rejection workflow

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::assignment::{AssignmentContext, AssignmentResult, FallbackEmployees, PgDirectory, TaskAssignmentValidator};
use super::lead_events::{LeadEvent, LeadEventKind, LeadTaskEngine};
use super::tasks::{NewTask, TaskService};
use super::{followups, WorkflowError, WorkflowResult};
use crate::database::{next_document_number, NumberSeries};
use crate::format::format_inr;
use crate::notifications::service::{kinds, NewNotification, NotificationService};
use ooak_shared::{AiTask, Lead, Priority, Quotation, QuotationApproval, QuotationStatus, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn status(&self) -> QuotationStatus {
        match self {
            Self::Approve => QuotationStatus::Approved,
            Self::Reject => QuotationStatus::Rejected,
        }
    }

    fn default_comment(&self) -> &'static str {
        match self {
            Self::Approve => "Approved by Sales Head",
            Self::Reject => "Rejected by Sales Head",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewQuotation {
    pub lead_id: Option<Uuid>,
    pub client_name: String,
    pub total_amount: Decimal,
    pub quotation_data: Value,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct Submission {
    pub quotation: Quotation,
    pub approval_task: AiTask,
    pub assignment: AssignmentResult,
}

#[derive(Debug, Serialize)]
pub struct DecisionOutcome {
    pub quotation: Quotation,
    pub approval: QuotationApproval,
    pub followup_task: Option<AiTask>,
    pub revision_task: Option<AiTask>,
}

#[derive(Debug, Serialize)]
pub struct RejectionNotice {
    pub revision_task: AiTask,
    pub assignment: AssignmentResult,
    pub notification_id: Uuid,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RejectedQuotation {
    pub id: Uuid,
    pub quotation_number: String,
    pub client_name: String,
    pub quotation_data: Value,
    pub total_amount: Decimal,
    pub status: QuotationStatus,
    pub created_by: Option<Uuid>,
    pub comments: Option<String>,
    pub rejected_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PaymentReceipt {
    pub quotation: Quotation,
    pub amount: Decimal,
    pub tasks_completed: u64,
}

pub fn revision_url(quotation_number: &str) -> String {
    format!("/sales/quotations/edit/{}", quotation_number)
}

fn not_submittable(quotation: &Quotation) -> WorkflowError {
    WorkflowError::InvalidState(format!(
        "Quotation {} is {} and cannot be submitted",
        quotation.quotation_number,
        quotation.status.as_str()
    ))
}

pub struct QuotationWorkflow {
    tasks: TaskService,
    notifications: NotificationService,
    validator: TaskAssignmentValidator<PgDirectory>,
}

impl QuotationWorkflow {
    pub fn new(tasks: TaskService, notifications: NotificationService) -> Self {
        let config = tasks.workflow_config();
        let validator = TaskAssignmentValidator::new(
            PgDirectory::new(tasks.pool().clone()),
            FallbackEmployees {
                sales: config.fallback_sales_employee,
                approval: config.fallback_approval_employee,
            },
        );
        Self {
            tasks,
            notifications,
            validator,
        }
    }

    fn pool(&self) -> &PgPool {
        self.tasks.pool()
    }

    pub async fn get(&self, id: Uuid) -> WorkflowResult<Quotation> {
        sqlx::query_as::<_, Quotation>("SELECT * FROM quotations WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(WorkflowError::NotFound("Quotation"))
    }

    pub async fn get_by_number(&self, quotation_number: &str) -> WorkflowResult<Quotation> {
        sqlx::query_as::<_, Quotation>("SELECT * FROM quotations WHERE quotation_number = $1")
            .bind(quotation_number)
            .fetch_optional(self.pool())
            .await?
            .ok_or(WorkflowError::NotFound("Quotation"))
    }

    async fn lead_for(&self, quotation: &Quotation) -> Option<Lead> {
        let lead_id = quotation.lead_id?;
        match sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1")
            .bind(lead_id)
            .fetch_optional(self.pool())
            .await
        {
            Ok(lead) => lead,
            Err(e) => {
                tracing::error!("Failed to load lead {} for quotation {}: {}", lead_id, quotation.quotation_number, e);
                None
            }
        }
    }

    async fn emit_lead_event(&self, kind: LeadEventKind, quotation: &Quotation, triggered_by: &str) {
        let Some(lead) = self.lead_for(quotation).await else {
            return;
        };
        let engine = LeadTaskEngine::new(self.tasks.clone());
        let event = LeadEvent::new(kind, lead, triggered_by).with_quotation(quotation.clone());
        if let Err(e) = engine.process(&event).await {
            tracing::error!("Lead event {} for {} failed: {}", kind.as_str(), quotation.quotation_number, e);
        }
    }

    /// Allocates the next `QT-YYYY-NNNN` number and stores a draft.
    pub async fn create(&self, new: NewQuotation) -> WorkflowResult<Quotation> {
        let mut tx = self.pool().begin().await?;
        let number = next_document_number(&mut tx, NumberSeries::Quotation).await?;

        let quotation = sqlx::query_as::<_, Quotation>(
            r#"
            INSERT INTO quotations (quotation_number, lead_id, client_name, total_amount, status, quotation_data, created_by)
            VALUES ($1, $2, $3, $4, 'draft', $5, $6)
            RETURNING *
            "#,
        )
        .bind(&number)
        .bind(new.lead_id)
        .bind(&new.client_name)
        .bind(new.total_amount)
        .bind(&new.quotation_data)
        .bind(new.created_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!("Created quotation {} for {}", quotation.quotation_number, quotation.client_name);

        self.emit_lead_event(LeadEventKind::QuotationCreated, &quotation, "quotation_created")
            .await;
        Ok(quotation)
    }

    /// Assigns an approver, then moves the quotation to pending approval and
    /// creates the approval task in one transaction. A failed assignment
    /// leaves the quotation untouched.
    pub async fn submit_for_approval(&self, id: Uuid) -> WorkflowResult<Submission> {
        let current = self.get(id).await?;
        if !current.status.can_submit() {
            return Err(not_submittable(&current));
        }

        let client = current.display_client_name();
        let assignment = self
            .validator
            .assign(&AssignmentContext {
                task_type: TaskType::QuotationApproval,
                lead_id: current.lead_id,
                quotation_id: Some(current.id),
                client_name: client.clone(),
            })
            .await?;
        for warning in &assignment.warnings {
            tracing::warn!("Approval assignment for {}: {}", current.quotation_number, warning);
        }

        let mut tx = self.pool().begin().await?;
        let quotation = sqlx::query_as::<_, Quotation>(
            r#"
            UPDATE quotations SET status = 'pending_approval', updated_at = NOW()
            WHERE id = $1 AND status IN ('draft', 'revision_required')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(quotation) = quotation else {
            tx.rollback().await?;
            return Err(not_submittable(&self.get(id).await?));
        };

        let approval = NewTask {
            task_description: Some(format!(
                "Review quotation {} for {} ({}) and approve or reject it.",
                quotation.quotation_number,
                client,
                format_inr(quotation.total_amount)
            )),
            priority: Priority::High,
            assigned_to_employee_id: Some(assignment.employee_id),
            assigned_to: Some(assignment.employee_name.clone()),
            lead_id: quotation.lead_id,
            quotation_id: Some(quotation.id),
            client_name: Some(client.clone()),
            due_date: Some(Utc::now() + Duration::hours(24)),
            business_impact: Some("high".to_string()),
            ai_reasoning: Some(assignment.reasoning.clone()),
            estimated_value: Some(quotation.total_amount),
            metadata: json!({
                "quotation_number": quotation.quotation_number,
                "assignment_confidence": assignment.confidence,
                "assignment_warnings": assignment.warnings,
            }),
            ..NewTask::new(
                format!("Approve quotation {} - {}", quotation.quotation_number, client),
                TaskType::QuotationApproval,
            )
        };
        let approval_task = TaskService::insert(&mut tx, &approval).await?;
        tx.commit().await?;
        self.tasks.announce(&approval_task).await;

        if let Err(e) = self
            .notifications
            .notify_approval_needed(&quotation, assignment.employee_id)
            .await
        {
            tracing::error!("Approval notification for {} failed: {}", quotation.quotation_number, e);
        }

        Ok(Submission {
            quotation,
            approval_task,
            assignment,
        })
    }

    /// Records the decision atomically, then runs the follow-up work. Nothing
    /// after the commit can fail the decision.
    pub async fn decide(
        &self,
        id: Uuid,
        decision: Decision,
        comments: Option<String>,
        approver_id: Uuid,
    ) -> WorkflowResult<DecisionOutcome> {
        let mut tx = self.pool().begin().await?;

        let current = sqlx::query_as::<_, Quotation>("SELECT * FROM quotations WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(WorkflowError::NotFound("Quotation"))?;

        if current.status != QuotationStatus::PendingApproval {
            return Err(WorkflowError::InvalidState(format!(
                "Quotation {} is {}, not pending approval",
                current.quotation_number,
                current.status.as_str()
            )));
        }

        let quotation = sqlx::query_as::<_, Quotation>(
            "UPDATE quotations SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(decision.status())
        .fetch_one(&mut *tx)
        .await?;

        let comments = comments
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| decision.default_comment().to_string());

        let approval = sqlx::query_as::<_, QuotationApproval>(
            r#"
            INSERT INTO quotation_approvals (quotation_id, approval_status, comments, approver_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(decision.status())
        .bind(&comments)
        .bind(approver_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(
            "Quotation {} {} by {}",
            quotation.quotation_number,
            quotation.status.as_str(),
            approver_id
        );

        if let Err(e) = self
            .tasks
            .complete_pending_for_quotation(id, TaskType::QuotationApproval)
            .await
        {
            tracing::error!("Closing approval tasks for {} failed: {}", quotation.quotation_number, e);
        }

        let mut outcome = DecisionOutcome {
            quotation,
            approval,
            followup_task: None,
            revision_task: None,
        };

        match decision {
            Decision::Approve => {
                match followups::start(&self.tasks, &outcome.quotation).await {
                    Ok(task) => {
                        if let Some(assignee) = task.as_ref().and_then(|t| t.assigned_to_employee_id) {
                            if let Err(e) = self
                                .notifications
                                .notify_client_followup(&outcome.quotation, assignee)
                                .await
                            {
                                tracing::error!(
                                    "Follow-up notice for {} failed: {}",
                                    outcome.quotation.quotation_number,
                                    e
                                );
                            }
                        }
                        outcome.followup_task = task;
                    }
                    Err(e) => tracing::error!(
                        "Starting follow-ups for {} failed: {}",
                        outcome.quotation.quotation_number,
                        e
                    ),
                }

                if let Some(creator) = outcome.quotation.created_by {
                    if let Err(e) = self
                        .notifications
                        .notify_quotation_approved(&outcome.quotation, creator)
                        .await
                    {
                        tracing::error!("Approval notice for {} failed: {}", outcome.quotation.quotation_number, e);
                    }
                }

                self.emit_lead_event(LeadEventKind::QuotationApproved, &outcome.quotation, "quotation_approval")
                    .await;
            }
            Decision::Reject => {
                match self.notify_rejection(&outcome.quotation, &comments, None).await {
                    Ok(notice) => outcome.revision_task = Some(notice.revision_task),
                    Err(e) => tracing::error!(
                        "Rejection workflow for {} failed: {}",
                        outcome.quotation.quotation_number,
                        e
                    ),
                }
            }
        }

        Ok(outcome)
    }

    /// Hands a rejected quotation back to its owner as a revision task.
    /// Clients are not messaged about rejections.
    pub async fn notify_rejection(
        &self,
        quotation: &Quotation,
        reason: &str,
        feedback: Option<&str>,
    ) -> WorkflowResult<RejectionNotice> {
        let client = quotation.display_client_name();
        let assignment = self
            .validator
            .assign(&AssignmentContext {
                task_type: TaskType::QuotationRevision,
                lead_id: quotation.lead_id,
                quotation_id: Some(quotation.id),
                client_name: client.clone(),
            })
            .await?;
        for warning in &assignment.warnings {
            tracing::warn!("Revision assignment for {}: {}", quotation.quotation_number, warning);
        }

        let amount = format_inr(quotation.total_amount);
        let description = format!(
            "Your quotation {number} for {client} has been rejected by the Sales Head.\n\n\
             Rejection details:\n\
             - Quotation: {number}\n\
             - Client: {client}\n\
             - Amount: {amount}\n\
             - Rejection reason: {reason}\n\n\
             Action required:\n\
             1. Review the rejection feedback\n\
             2. Revise pricing, services or terms as needed\n\
             3. Resubmit the quotation for approval",
            number = quotation.quotation_number,
            client = client,
            amount = amount,
            reason = reason,
        );

        let due_hours = self.tasks.workflow_config().revision_due_hours;
        let revision_task = self
            .tasks
            .create(NewTask {
                task_description: Some(description),
                priority: Priority::High,
                assigned_to_employee_id: Some(assignment.employee_id),
                assigned_to: Some(assignment.employee_name.clone()),
                lead_id: quotation.lead_id,
                quotation_id: Some(quotation.id),
                client_name: Some(client.clone()),
                due_date: Some(Utc::now() + Duration::hours(due_hours)),
                business_impact: Some("high".to_string()),
                ai_reasoning: Some(assignment.reasoning.clone()),
                estimated_value: Some(quotation.total_amount),
                metadata: json!({
                    "quotation_number": quotation.quotation_number,
                    "rejection_reason": reason,
                    "rejection_feedback": feedback,
                    "rejection_date": Utc::now(),
                    "requires_revision": true,
                    "original_amount": quotation.total_amount,
                    "workflow_type": "rejection_notification",
                }),
                ..NewTask::new(
                    format!("Quotation Rejected - {} ({})", client, quotation.quotation_number),
                    TaskType::QuotationRevision,
                )
            })
            .await?;

        let notification_id = self
            .notifications
            .create(
                NewNotification::new(
                    assignment.employee_id,
                    kinds::QUOTATION_REJECTED,
                    format!("Quotation {} Rejected", quotation.quotation_number),
                    format!(
                        "Quotation {} for {} has been rejected. Reason: {}",
                        quotation.quotation_number, client, reason
                    ),
                )
                .priority(Priority::High)
                .action(revision_url(&quotation.quotation_number), "Revise Quotation")
                .metadata(json!({
                    "quotation_number": quotation.quotation_number,
                    "quotation_id": quotation.id,
                    "rejection_reason": reason,
                    "rejection_feedback": feedback,
                    "requires_revision": true,
                })),
            )
            .await?;

        Ok(RejectionNotice {
            revision_task,
            assignment,
            notification_id,
        })
    }

    /// Reopens a rejected quotation for editing and returns its edit URL.
    pub async fn prepare_revision(&self, quotation_number: &str) -> WorkflowResult<String> {
        let updated = sqlx::query(
            r#"
            UPDATE quotations SET status = 'revision_required', updated_at = NOW()
            WHERE quotation_number = $1 AND status IN ('rejected', 'revision_required')
            "#,
        )
        .bind(quotation_number)
        .execute(self.pool())
        .await?;

        if updated.rows_affected() == 0 {
            let current = self.get_by_number(quotation_number).await?;
            return Err(WorkflowError::InvalidState(format!(
                "Quotation {} is {} and cannot be revised",
                current.quotation_number,
                current.status.as_str()
            )));
        }
        Ok(revision_url(quotation_number))
    }

    /// Marks an approved quotation as sent to the client.
    pub async fn mark_sent(&self, id: Uuid, sent_by: Uuid) -> WorkflowResult<Quotation> {
        let current = self.get(id).await?;
        if current.status != QuotationStatus::Approved {
            return Err(WorkflowError::InvalidState(format!(
                "Only approved quotations can be sent; {} is {}",
                current.quotation_number,
                current.status.as_str()
            )));
        }

        let quotation = sqlx::query_as::<_, Quotation>(
            r#"
            UPDATE quotations
            SET quotation_data = quotation_data || jsonb_build_object('sent_at', NOW(), 'sent_by', $2::uuid),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(sent_by)
        .fetch_one(self.pool())
        .await?;

        self.emit_lead_event(LeadEventKind::QuotationSent, &quotation, "quotation_sent")
            .await;
        Ok(quotation)
    }

    /// Records a client payment: closes open payment follow-ups and tells the
    /// sales rep and the business head.
    pub async fn record_payment(&self, id: Uuid, amount: Decimal, recorded_by: Uuid) -> WorkflowResult<PaymentReceipt> {
        if amount <= Decimal::ZERO {
            return Err(WorkflowError::InvalidState("Payment amount must be positive".to_string()));
        }

        let current = self.get(id).await?;
        if current.status != QuotationStatus::Approved {
            return Err(WorkflowError::InvalidState(format!(
                "Payments can only be recorded against approved quotations; {} is {}",
                current.quotation_number,
                current.status.as_str()
            )));
        }

        let quotation = sqlx::query_as::<_, Quotation>(
            r#"
            UPDATE quotations
            SET quotation_data = quotation_data || jsonb_build_object(
                    'last_payment_amount', $2::numeric,
                    'last_payment_at', NOW(),
                    'last_payment_recorded_by', $3::uuid),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(amount)
        .bind(recorded_by)
        .fetch_one(self.pool())
        .await?;

        let tasks_completed = self
            .tasks
            .complete_pending_for_quotation(id, TaskType::PaymentFollowUp)
            .await?;

        if let Err(e) = self
            .notifications
            .notify_payment_received(&quotation, quotation.created_by, amount)
            .await
        {
            tracing::error!("Payment notice for {} failed: {}", quotation.quotation_number, e);
        }

        if tasks_completed > 0 {
            if let Some(rep) = quotation.created_by {
                let action = format!("completed {} payment follow-up task(s)", tasks_completed);
                if let Err(e) = self.notifications.notify_automation_action(rep, &action, &quotation).await {
                    tracing::error!("Automation notice for {} failed: {}", quotation.quotation_number, e);
                }
            }
        }

        tracing::info!(
            "Payment of {} recorded for {}",
            format_inr(amount),
            quotation.quotation_number
        );
        Ok(PaymentReceipt {
            quotation,
            amount,
            tasks_completed,
        })
    }

    /// Quotations with a rejection on record, newest rejection first.
    pub async fn list_rejected(&self, created_by: Option<Uuid>) -> WorkflowResult<Vec<RejectedQuotation>> {
        let rows = sqlx::query_as::<_, RejectedQuotation>(
            r#"
            SELECT q.id, q.quotation_number, q.client_name, q.quotation_data, q.total_amount,
                   q.status, q.created_by, qa.comments, qa.approval_date AS rejected_at
            FROM quotations q
            JOIN quotation_approvals qa ON qa.quotation_id = q.id
            WHERE qa.approval_status = 'rejected'
              AND ($1::uuid IS NULL OR q.created_by = $1)
            ORDER BY qa.approval_date DESC
            "#,
        )
        .bind(created_by)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}
