// Task assignment validator
//
// Picks the employee who owns the next workflow step for a task type, checks
// the pick against the type's validation rules and falls back to a configured
// employee when the pick cannot be made or does not validate.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use ooak_shared::TaskType;

/// Minimal view of an employee used for assignment decisions
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EmployeeRef {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
}

/// Lookups the validator needs; backed by Postgres in production.
#[async_trait]
pub trait AssignmentDirectory: Send + Sync {
    /// Employee in `leads.assigned_to`, if the lead exists and is assigned
    async fn lead_owner(&self, lead_id: Uuid) -> Result<Option<EmployeeRef>, sqlx::Error>;
    async fn quotation_lead(&self, quotation_id: Uuid) -> Result<Option<Uuid>, sqlx::Error>;
    async fn sales_head(&self) -> Result<Option<EmployeeRef>, sqlx::Error>;
    async fn employee(&self, employee_id: Uuid) -> Result<Option<EmployeeRef>, sqlx::Error>;
}

const EMPLOYEE_REF_COLUMNS: &str = "e.id, TRIM(e.first_name || ' ' || e.last_name) AS name, \
     (e.status = 'active') AS is_active";

#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssignmentDirectory for PgDirectory {
    async fn lead_owner(&self, lead_id: Uuid) -> Result<Option<EmployeeRef>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM leads l JOIN employees e ON e.id = l.assigned_to WHERE l.id = $1",
            EMPLOYEE_REF_COLUMNS
        );
        sqlx::query_as::<_, EmployeeRef>(&sql)
            .bind(lead_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn quotation_lead(&self, quotation_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        let lead_id: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT lead_id FROM quotations WHERE id = $1")
                .bind(quotation_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(lead_id.flatten())
    }

    async fn sales_head(&self) -> Result<Option<EmployeeRef>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM employees e \
             WHERE e.status = 'active' \
               AND (e.job_title ILIKE '%sales%head%' OR e.job_title ILIKE '%head%sales%') \
             ORDER BY e.created_at, e.id \
             LIMIT 1",
            EMPLOYEE_REF_COLUMNS
        );
        sqlx::query_as::<_, EmployeeRef>(&sql)
            .fetch_optional(&self.pool)
            .await
    }

    async fn employee(&self, employee_id: Uuid) -> Result<Option<EmployeeRef>, sqlx::Error> {
        let sql = format!("SELECT {} FROM employees e WHERE e.id = $1", EMPLOYEE_REF_COLUMNS);
        sqlx::query_as::<_, EmployeeRef>(&sql)
            .bind(employee_id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Error, Debug)]
pub enum AssignmentError {
    #[error("No fallback employee configured for {0} tasks")]
    FallbackNotConfigured(&'static str),
    #[error("Fallback employee {0} not found")]
    FallbackNotFound(Uuid),
    #[error("Failed to get fallback assignment: {0}")]
    Directory(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone)]
pub struct AssignmentContext {
    pub task_type: TaskType,
    pub lead_id: Option<Uuid>,
    pub quotation_id: Option<Uuid>,
    pub client_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentResult {
    pub employee_id: Uuid,
    pub employee_name: String,
    pub confidence: Confidence,
    pub reasoning: String,
    pub warnings: Vec<String>,
}

/// Employees that receive work when the rule-based pick fails
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackEmployees {
    /// Revision and lead follow-up tasks
    pub sales: Option<Uuid>,
    pub approval: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    LeadOwnership,
    EmployeeExists,
    SalesHead,
}

#[derive(Debug, Default)]
struct CheckOutcome {
    error: Option<String>,
    warning: Option<String>,
}

impl CheckOutcome {
    fn ok() -> Self {
        Self::default()
    }

    fn failed(message: String) -> Self {
        Self {
            error: Some(message),
            warning: None,
        }
    }

    fn warn(message: &str) -> Self {
        Self {
            error: None,
            warning: Some(message.to_string()),
        }
    }
}

fn checks_for(task_type: TaskType) -> Option<&'static [Check]> {
    match task_type {
        TaskType::QuotationRevision => Some(&[Check::LeadOwnership, Check::EmployeeExists]),
        TaskType::QuotationApproval => Some(&[Check::SalesHead]),
        TaskType::LeadFollowUp => Some(&[Check::LeadOwnership]),
        _ => None,
    }
}

pub struct TaskAssignmentValidator<D> {
    directory: D,
    fallback: FallbackEmployees,
}

impl<D: AssignmentDirectory> TaskAssignmentValidator<D> {
    pub fn new(directory: D, fallback: FallbackEmployees) -> Self {
        Self {
            directory,
            fallback,
        }
    }

    pub async fn assign(&self, context: &AssignmentContext) -> Result<AssignmentResult, AssignmentError> {
        tracing::debug!(
            "Assigning {} task for client '{}'",
            context.task_type.as_str(),
            context.client_name
        );

        let Some(checks) = checks_for(context.task_type) else {
            tracing::warn!("No assignment rule for task type {}", context.task_type.as_str());
            return self.fallback(context, "No specific rule found").await;
        };

        let assignment = match self.pick(context).await {
            Ok(assignment) => assignment,
            Err(reason) => {
                tracing::warn!("Assignment failed: {}", reason);
                return self
                    .fallback(context, &format!("Assignment error: {}", reason))
                    .await;
            }
        };

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for check in checks {
            let outcome = self.check(*check, &assignment, context).await;
            errors.extend(outcome.error);
            warnings.extend(outcome.warning);
        }

        if !errors.is_empty() {
            let messages = errors.join(", ");
            tracing::error!("Assignment validation failed: {}", messages);
            let mut fallback = self
                .fallback(context, &format!("Validation failed: {}", messages))
                .await?;
            fallback.warnings = vec![format!("Original assignment failed validation: {}", messages)];
            return Ok(fallback);
        }

        Ok(AssignmentResult {
            warnings,
            ..assignment
        })
    }

    async fn pick(&self, context: &AssignmentContext) -> Result<AssignmentResult, String> {
        match context.task_type {
            TaskType::QuotationRevision => {
                if let Some(quotation_id) = context.quotation_id {
                    match self.directory.quotation_lead(quotation_id).await {
                        Ok(Some(lead_id)) => {
                            if let Ok(Some(owner)) = self.directory.lead_owner(lead_id).await {
                                return Ok(owner_assignment(owner, lead_id));
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::error!("Error finding quotation {}: {}", quotation_id, e),
                    }
                }
                if let Some(lead_id) = context.lead_id {
                    if let Some(owner) = self.directory.lead_owner(lead_id).await.map_err(|e| e.to_string())? {
                        return Ok(owner_assignment(owner, lead_id));
                    }
                }
                Err("Could not determine lead owner for quotation revision".to_string())
            }
            TaskType::QuotationApproval => {
                let head = self
                    .directory
                    .sales_head()
                    .await
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| "Sales Head not found".to_string())?;
                Ok(AssignmentResult {
                    employee_id: head.id,
                    employee_name: head.name,
                    confidence: Confidence::High,
                    reasoning: "Assigned to Sales Head for approval".to_string(),
                    warnings: Vec::new(),
                })
            }
            TaskType::LeadFollowUp => {
                let lead_id = context
                    .lead_id
                    .ok_or_else(|| "Lead ID required for lead follow-up assignment".to_string())?;
                let owner = self
                    .directory
                    .lead_owner(lead_id)
                    .await
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| format!("Lead owner not found for Lead ID: {}", lead_id))?;
                Ok(owner_assignment(owner, lead_id))
            }
            other => Err(format!("No assignment logic for {}", other.as_str())),
        }
    }

    async fn check(&self, check: Check, assignment: &AssignmentResult, context: &AssignmentContext) -> CheckOutcome {
        match check {
            Check::LeadOwnership => {
                let Some(lead_id) = context.lead_id else {
                    return CheckOutcome::warn("No lead ID provided for ownership validation");
                };
                match self.directory.lead_owner(lead_id).await {
                    Ok(Some(owner)) if owner.id == assignment.employee_id => CheckOutcome::ok(),
                    Ok(Some(owner)) => CheckOutcome::failed(format!(
                        "Assignment mismatch: Task assigned to {} ({}) but lead owner is {} ({})",
                        assignment.employee_name, assignment.employee_id, owner.name, owner.id
                    )),
                    Ok(None) => CheckOutcome::failed(format!("Lead owner not found for Lead ID: {}", lead_id)),
                    Err(e) => {
                        tracing::error!("Error loading owner of lead {}: {}", lead_id, e);
                        CheckOutcome::failed(format!("Lead owner not found for Lead ID: {}", lead_id))
                    }
                }
            }
            Check::EmployeeExists => match self.directory.employee(assignment.employee_id).await {
                Ok(Some(_)) => CheckOutcome::ok(),
                Ok(None) => CheckOutcome::failed(format!("Employee ID {} does not exist", assignment.employee_id)),
                Err(e) => {
                    tracing::error!("Error validating employee {}: {}", assignment.employee_id, e);
                    CheckOutcome::failed(format!("Error validating employee ID {}", assignment.employee_id))
                }
            },
            Check::SalesHead => match self.directory.sales_head().await {
                Ok(Some(head)) if head.id == assignment.employee_id => CheckOutcome::ok(),
                Ok(Some(head)) => CheckOutcome::failed(format!(
                    "Quotation approval must be assigned to Sales Head ({}), not {}",
                    head.name, assignment.employee_name
                )),
                Ok(None) | Err(_) => CheckOutcome::failed("Sales Head not found in system".to_string()),
            },
        }
    }

    async fn fallback(&self, context: &AssignmentContext, reason: &str) -> Result<AssignmentResult, AssignmentError> {
        tracing::warn!("Using fallback assignment: {}", reason);

        let (pool, fallback_id) = match context.task_type {
            TaskType::QuotationApproval => ("approval", self.fallback.approval),
            _ => ("sales", self.fallback.sales),
        };
        let fallback_id = fallback_id.ok_or(AssignmentError::FallbackNotConfigured(pool))?;

        let employee = self
            .directory
            .employee(fallback_id)
            .await?
            .ok_or(AssignmentError::FallbackNotFound(fallback_id))?;

        Ok(AssignmentResult {
            employee_id: employee.id,
            employee_name: employee.name,
            confidence: Confidence::Low,
            reasoning: format!("Fallback assignment: {}", reason),
            warnings: vec![format!("Used fallback assignment due to: {}", reason)],
        })
    }
}

fn owner_assignment(owner: EmployeeRef, lead_id: Uuid) -> AssignmentResult {
    AssignmentResult {
        employee_id: owner.id,
        employee_name: owner.name,
        confidence: Confidence::High,
        reasoning: format!("Assigned to lead owner (Lead ID: {})", lead_id),
        warnings: Vec::new(),
    }
}

/// In-memory directory for exercising assignment rules without a database
#[cfg(test)]
#[derive(Default)]
pub(crate) struct StaticDirectory {
    pub employees: Vec<EmployeeRef>,
    pub lead_owners: std::collections::HashMap<Uuid, Uuid>,
    pub quotation_leads: std::collections::HashMap<Uuid, Uuid>,
    pub sales_head: Option<Uuid>,
}

#[cfg(test)]
impl StaticDirectory {
    pub fn with_employee(mut self, name: &str) -> (Self, Uuid) {
        let id = Uuid::new_v4();
        self.employees.push(EmployeeRef {
            id,
            name: name.to_string(),
            is_active: true,
        });
        (self, id)
    }

    fn find(&self, id: Uuid) -> Option<EmployeeRef> {
        self.employees.iter().find(|e| e.id == id).cloned()
    }
}

#[cfg(test)]
#[async_trait]
impl AssignmentDirectory for StaticDirectory {
    async fn lead_owner(&self, lead_id: Uuid) -> Result<Option<EmployeeRef>, sqlx::Error> {
        Ok(self.lead_owners.get(&lead_id).and_then(|id| self.find(*id)))
    }

    async fn quotation_lead(&self, quotation_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        Ok(self.quotation_leads.get(&quotation_id).copied())
    }

    async fn sales_head(&self) -> Result<Option<EmployeeRef>, sqlx::Error> {
        Ok(self.sales_head.and_then(|id| self.find(id)))
    }

    async fn employee(&self, employee_id: Uuid) -> Result<Option<EmployeeRef>, sqlx::Error> {
        Ok(self.find(employee_id))
    }
}
