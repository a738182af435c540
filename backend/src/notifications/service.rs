use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::events::{EventHub, StreamEvent};
use crate::format::format_inr;
use ooak_shared::{Notification, Priority, Quotation, QuotationStatus};

pub mod kinds {
    pub const OVERDUE: &str = "overdue";
    pub const APPROVAL_NEEDED: &str = "approval_needed";
    pub const QUOTATION_APPROVED: &str = "quotation_approved";
    pub const QUOTATION_REJECTED: &str = "quotation_rejected";
    pub const PAYMENT_RECEIVED: &str = "payment_received";
    pub const CLIENT_FOLLOWUP: &str = "client_followup";
    pub const AUTOMATION: &str = "automation";
    pub const TASK_ASSIGNED: &str = "task_assigned";
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub notification_type: String,
    pub priority: Option<Priority>,
    pub title: String,
    pub message: String,
    pub quotation_id: Option<Uuid>,
    pub action_url: Option<String>,
    pub action_label: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

impl NewNotification {
    pub fn new(user_id: Uuid, notification_type: &str, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id,
            notification_type: notification_type.to_string(),
            priority: None,
            title: title.into(),
            message: message.into(),
            quotation_id: None,
            action_url: None,
            action_label: None,
            expires_at: None,
            metadata: json!({}),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Links the notification to a quotation and its focus view.
    pub fn for_quotation(mut self, quotation_id: Uuid, label: &str) -> Self {
        self.quotation_id = Some(quotation_id);
        self.action_url = Some(format!("/sales/quotations?focus={}", quotation_id));
        self.action_label = Some(label.to_string());
        self
    }

    pub fn action(mut self, url: impl Into<String>, label: &str) -> Self {
        self.action_url = Some(url.into());
        self.action_label = Some(label.to_string());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A quotation stuck in a workflow stage past its due date
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OverdueQuotation {
    pub id: Uuid,
    pub quotation_number: String,
    pub client_name: String,
    pub total_amount: Decimal,
    pub status: QuotationStatus,
    pub assignee: Option<Uuid>,
    pub days_overdue: i64,
}

pub fn overdue_priority(days_overdue: i64) -> Priority {
    if days_overdue > 7 {
        Priority::Urgent
    } else {
        Priority::High
    }
}

pub fn should_escalate(days_overdue: i64) -> bool {
    days_overdue > 5
}

/// Persists notifications and pushes them to the recipient's open streams
#[derive(Clone)]
pub struct NotificationService {
    db_pool: PgPool,
    events: EventHub,
    business_head: Option<Uuid>,
}

impl NotificationService {
    pub fn new(db_pool: PgPool, events: EventHub, business_head: Option<Uuid>) -> Self {
        Self {
            db_pool,
            events,
            business_head,
        }
    }

    pub async fn create(&self, params: NewNotification) -> Result<Uuid, sqlx::Error> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (
                user_id, notification_type, priority, title, message,
                quotation_id, action_url, action_label, expires_at, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(params.user_id)
        .bind(&params.notification_type)
        .bind(params.priority.unwrap_or_default())
        .bind(&params.title)
        .bind(&params.message)
        .bind(params.quotation_id)
        .bind(&params.action_url)
        .bind(&params.action_label)
        .bind(params.expires_at)
        .bind(&params.metadata)
        .fetch_one(&self.db_pool)
        .await?;

        let id = notification.id;
        let delivered = self
            .events
            .publish(notification.user_id, StreamEvent::Notification(notification))
            .await;
        tracing::debug!(
            "Notification {} ({}) stored, pushed to {} stream(s)",
            id,
            params.notification_type,
            delivered
        );

        Ok(id)
    }

    pub async fn notify_overdue_quotation(&self, quotation: &OverdueQuotation) -> Result<(), sqlx::Error> {
        let days = quotation.days_overdue;

        if let Some(assignee) = quotation.assignee {
            self.create(
                NewNotification::new(
                    assignee,
                    kinds::OVERDUE,
                    format!("Quotation {} is overdue", quotation.quotation_number),
                    format!(
                        "{}'s quotation has been overdue for {} days in {} stage",
                        quotation.client_name,
                        days,
                        quotation.status.as_str()
                    ),
                )
                .priority(overdue_priority(days))
                .for_quotation(quotation.id, "View & Take Action")
                .metadata(json!({
                    "days_overdue": days,
                    "original_status": quotation.status.as_str(),
                    "client_name": quotation.client_name,
                })),
            )
            .await?;
        } else {
            tracing::warn!("Overdue quotation {} has no assignee", quotation.quotation_number);
        }

        if should_escalate(days) {
            match self.business_head {
                Some(head) => {
                    self.create(
                        NewNotification::new(
                            head,
                            kinds::OVERDUE,
                            format!("Critical: Quotation overdue {} days", days),
                            format!(
                                "{} - {} stuck in {}",
                                quotation.client_name,
                                format_inr(quotation.total_amount),
                                quotation.status.as_str()
                            ),
                        )
                        .priority(Priority::Urgent)
                        .for_quotation(quotation.id, "Investigate Now")
                        .metadata(json!({
                            "escalated": true,
                            "days_overdue": days,
                            "value_at_risk": quotation.total_amount,
                        })),
                    )
                    .await?;
                }
                None => tracing::warn!(
                    "Escalation for {} skipped: no business head configured",
                    quotation.quotation_number
                ),
            }
        }

        Ok(())
    }

    /// Notifies every overdue quotation; individual failures are logged and
    /// counted, never propagated. Returns the number that succeeded.
    pub async fn bulk_notify_overdue(&self, quotations: &[OverdueQuotation]) -> usize {
        let results = futures::future::join_all(
            quotations.iter().map(|q| self.notify_overdue_quotation(q)),
        )
        .await;

        results
            .into_iter()
            .zip(quotations)
            .filter(|(result, quotation)| match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Overdue notification for {} failed: {}", quotation.quotation_number, e);
                    false
                }
            })
            .count()
    }

    pub async fn notify_approval_needed(&self, quotation: &Quotation, approver_id: Uuid) -> Result<Uuid, sqlx::Error> {
        self.create(
            NewNotification::new(
                approver_id,
                kinds::APPROVAL_NEEDED,
                "New quotation pending your approval",
                format!(
                    "{} - {} quotation needs approval",
                    quotation.display_client_name(),
                    format_inr(quotation.total_amount)
                ),
            )
            .priority(Priority::High)
            .for_quotation(quotation.id, "Approve/Reject")
            .metadata(json!({
                "quotation_value": quotation.total_amount,
                "client_name": quotation.display_client_name(),
                "submitted_by": quotation.created_by,
            })),
        )
        .await
    }

    pub async fn notify_quotation_approved(&self, quotation: &Quotation, recipient: Uuid) -> Result<Uuid, sqlx::Error> {
        self.create(
            NewNotification::new(
                recipient,
                kinds::QUOTATION_APPROVED,
                "Quotation Approved!",
                format!(
                    "Quotation {} for {} has been approved!",
                    quotation.quotation_number,
                    quotation.display_client_name()
                ),
            )
            .priority(Priority::High)
            .for_quotation(quotation.id, "Start Follow-up")
            .metadata(json!({ "quotation_number": quotation.quotation_number })),
        )
        .await
    }

    /// Sales rep gets the actionable notification, the business head a summary.
    pub async fn notify_payment_received(
        &self,
        quotation: &Quotation,
        sales_rep: Option<Uuid>,
        amount: Decimal,
    ) -> Result<(), sqlx::Error> {
        let client = quotation.display_client_name();
        let metadata = json!({ "payment_amount": amount, "client_name": client });

        if let Some(rep) = sales_rep.or(quotation.created_by) {
            self.create(
                NewNotification::new(
                    rep,
                    kinds::PAYMENT_RECEIVED,
                    format!("Payment received for {}", client),
                    format!("{} payment confirmed. Ready for delivery confirmation.", format_inr(amount)),
                )
                .priority(Priority::Medium)
                .for_quotation(quotation.id, "Confirm Delivery")
                .metadata(metadata.clone()),
            )
            .await?;
        }

        if let Some(head) = self.business_head {
            self.create(
                NewNotification::new(
                    head,
                    kinds::PAYMENT_RECEIVED,
                    format!("Payment received - {}", format_inr(amount)),
                    format!("{} payment confirmed", client),
                )
                .priority(Priority::Low)
                .action("/sales/quotations", "View Dashboard")
                .metadata(metadata),
            )
            .await?;
        }

        Ok(())
    }

    pub async fn notify_client_followup(&self, quotation: &Quotation, assignee: Uuid) -> Result<Uuid, sqlx::Error> {
        self.create(
            NewNotification::new(
                assignee,
                kinds::CLIENT_FOLLOWUP,
                format!("Follow up with {}", quotation.display_client_name()),
                format!(
                    "Quotation worth {} needs client follow-up",
                    format_inr(quotation.total_amount)
                ),
            )
            .priority(Priority::Medium)
            .for_quotation(quotation.id, "Contact Client")
            .metadata(json!({
                "client_name": quotation.display_client_name(),
                "quotation_value": quotation.total_amount,
            })),
        )
        .await
    }

    pub async fn notify_automation_action(
        &self,
        user_id: Uuid,
        action: &str,
        quotation: &Quotation,
    ) -> Result<Uuid, sqlx::Error> {
        self.create(
            NewNotification::new(
                user_id,
                kinds::AUTOMATION,
                format!("Automation: {}", action),
                format!("System automatically {} for {}", action, quotation.display_client_name()),
            )
            .priority(Priority::Low)
            .for_quotation(quotation.id, "View Details")
            .metadata(json!({
                "automation_action": action,
                "client_name": quotation.display_client_name(),
                "triggered_at": Utc::now(),
            })),
        )
        .await
    }

    /// Deletes notifications past their expiry and returns how many went.
    pub async fn cleanup_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM notifications WHERE expires_at IS NOT NULL AND expires_at < NOW()")
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected())
    }
}
