use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "employee_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeStatus {
    Active,
    Inactive,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "lead_status", rename_all = "SCREAMING_SNAKE_CASE"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    Unassigned,
    Assigned,
    Contacted,
    Qualified,
    Proposal,
    Negotiation,
    ClosedWon,
    ClosedLost,
    Rejected,
}

impl LeadStatus {
    pub const TERMINAL: [LeadStatus; 3] = [
        LeadStatus::ClosedWon,
        LeadStatus::ClosedLost,
        LeadStatus::Rejected,
    ];

    /// Terminal leads never leave their state and drop out of work queues.
    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Unassigned => "UNASSIGNED",
            Self::Assigned => "ASSIGNED",
            Self::Contacted => "CONTACTED",
            Self::Qualified => "QUALIFIED",
            Self::Proposal => "PROPOSAL",
            Self::Negotiation => "NEGOTIATION",
            Self::ClosedWon => "CLOSED_WON",
            Self::ClosedLost => "CLOSED_LOST",
            Self::Rejected => "REJECTED",
        }
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "quotation_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuotationStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    RevisionRequired,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::RevisionRequired => "revision_required",
        }
    }

    /// Quotations can be sent for approval from draft or after a revision.
    pub fn can_submit(&self) -> bool {
        matches!(self, Self::Draft | Self::RevisionRequired)
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "task_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Archived,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "priority_level", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "task_type", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    LeadFollowUp,
    QuotationApproval,
    QuotationRevision,
    QuotationFollowUp,
    PaymentFollowUp,
    PostApprovalFollowup,
    Contact,
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadFollowUp => "lead_follow_up",
            Self::QuotationApproval => "quotation_approval",
            Self::QuotationRevision => "quotation_revision",
            Self::QuotationFollowUp => "quotation_follow_up",
            Self::PaymentFollowUp => "payment_follow_up",
            Self::PostApprovalFollowup => "post_approval_followup",
            Self::Contact => "contact",
            Self::General => "general",
        }
    }
}

// ---------------------------------------------------------------------------
// People
// ---------------------------------------------------------------------------

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: Uuid,
    pub employee_code: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub designation: Option<String>,
    pub company_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub status: EmployeeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    pub fn is_active(&self) -> bool {
        self.status == EmployeeStatus::Active
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: Uuid,
    pub employee_id: Option<Uuid>,
    pub username: String,
    pub email: String,
    pub role_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sales pipeline
// ---------------------------------------------------------------------------

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub lead_number: String,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub source: Option<String>,
    pub estimated_value: Option<Decimal>,
    pub status: LeadStatus,
    pub assigned_to: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub is_reassigned: bool,
    pub reassigned_at: Option<DateTime<Utc>>,
    pub reassigned_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quotation {
    pub id: Uuid,
    pub quotation_number: String,
    pub lead_id: Option<Uuid>,
    pub client_name: String,
    pub total_amount: Decimal,
    pub status: QuotationStatus,
    pub quotation_data: serde_json::Value,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Quotation {
    /// Client name as captured in the quotation payload, falling back to the column.
    pub fn display_client_name(&self) -> String {
        self.quotation_data
            .get("client_name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                if self.client_name.trim().is_empty() {
                    "Unknown Client".to_string()
                } else {
                    self.client_name.clone()
                }
            })
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotationApproval {
    pub id: Uuid,
    pub quotation_id: Uuid,
    pub approval_status: QuotationStatus,
    pub comments: Option<String>,
    pub approver_id: Option<Uuid>,
    pub approval_date: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tasks and sequences
// ---------------------------------------------------------------------------

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiTask {
    pub id: Uuid,
    pub task_title: String,
    pub task_description: Option<String>,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    pub assigned_to_employee_id: Option<Uuid>,
    pub assigned_to: Option<String>,
    pub lead_id: Option<Uuid>,
    pub quotation_id: Option<Uuid>,
    pub client_name: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub business_impact: Option<String>,
    pub ai_reasoning: Option<String>,
    pub estimated_value: Option<Decimal>,
    pub metadata: serde_json::Value,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AiTask {
    pub fn sequence_step(&self) -> Option<i32> {
        self.metadata
            .get("sequence_step")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
    }

    pub fn sequence_total_steps(&self) -> Option<i32> {
        self.metadata
            .get("sequence_total_steps")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
    }

    pub fn is_sequential(&self) -> bool {
        self.metadata
            .get("is_sequential")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub id: Uuid,
    pub sequence_template_id: Uuid,
    pub step_number: i32,
    pub title: String,
    pub description: Option<String>,
    pub icon: String,
    pub due_after_hours: i32,
    pub priority: Priority,
    pub is_conditional: bool,
    pub condition_type: Option<String>,
    pub condition_value: Option<String>,
    pub metadata: serde_json::Value,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceRule {
    pub id: Uuid,
    pub sequence_template_id: Uuid,
    pub rule_type: String,
    pub condition_field: String,
    pub condition_operator: String,
    pub condition_value: String,
    pub action_type: String,
    pub action_data: serde_json::Value,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Notifications and audit
// ---------------------------------------------------------------------------

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub quotation_id: Option<Uuid>,
    pub action_url: Option<String>,
    pub action_label: Option<String>,
    pub is_read: bool,
    pub metadata: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGenerationLog {
    pub id: Uuid,
    pub lead_id: Option<Uuid>,
    pub quotation_id: Option<Uuid>,
    pub rule_triggered: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub triggered_by: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: Uuid,
    pub activity_type: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub description: String,
    pub performed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Roles and menus
// ---------------------------------------------------------------------------

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: Uuid,
    pub slug: String,
    pub label: String,
    pub path: Option<String>,
    pub icon: Option<String>,
    pub parent_id: Option<Uuid>,
    pub sort_order: i32,
    pub is_visible: bool,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleMenuPermission {
    pub role_id: Uuid,
    pub menu_item_id: Uuid,
    pub can_view: bool,
    pub can_add: bool,
    pub can_edit: bool,
    pub can_delete: bool,
}
