// Lead-to-task rules
//
// Pipeline events (assignment, status changes, quotation milestones) are
// matched against a fixed rule table. Each matching rule creates at most one
// task per lead, and every firing is written to task_generation_log.

use chrono::{Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::assignment::{AssignmentDirectory, PgDirectory};
use super::conditions::{Condition, ConditionGroup, ConditionOperator};
use super::tasks::{NewTask, TaskService};
use super::WorkflowResult;
use crate::format::format_inr;
use ooak_shared::{AiTask, Lead, LeadStatus, Priority, Quotation, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadEventKind {
    LeadAssigned,
    LeadStatusChanged,
    QuotationCreated,
    QuotationSent,
    QuotationApproved,
}

impl LeadEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadAssigned => "lead_assigned",
            Self::LeadStatusChanged => "lead_status_changed",
            Self::QuotationCreated => "quotation_created",
            Self::QuotationSent => "quotation_sent",
            Self::QuotationApproved => "quotation_approved",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeadEvent {
    pub kind: LeadEventKind,
    pub lead: Lead,
    pub previous_status: Option<LeadStatus>,
    pub quotation: Option<Quotation>,
    pub triggered_by: String,
}

impl LeadEvent {
    pub fn new(kind: LeadEventKind, lead: Lead, triggered_by: impl Into<String>) -> Self {
        Self {
            kind,
            lead,
            previous_status: None,
            quotation: None,
            triggered_by: triggered_by.into(),
        }
    }

    pub fn with_previous_status(mut self, status: LeadStatus) -> Self {
        self.previous_status = Some(status);
        self
    }

    pub fn with_quotation(mut self, quotation: Quotation) -> Self {
        self.quotation = Some(quotation);
        self
    }

    /// Fields the rule conditions are evaluated against
    pub fn context(&self) -> Value {
        json!({
            "event_type": self.kind.as_str(),
            "status": self.lead.status.as_str(),
            "previous_status": self.previous_status.map(|s| s.as_str()),
            "estimated_value": self.lead.estimated_value.and_then(|v| v.to_f64()).unwrap_or(0.0),
            "has_quotation": self.quotation.is_some(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Experience {
    Junior,
    Senior,
    Expert,
}

impl Experience {
    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Expert => &["head", "manager", "senior", "lead"],
            Self::Senior => &["senior", "head", "lead"],
            Self::Junior => &["junior", "associate", "resource"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssigneePreferences {
    pub departments: &'static [&'static str],
    pub designations: &'static [&'static str],
    pub experience: Option<Experience>,
    pub workload_balancing: bool,
    /// Route to the Sales Head before considering anyone else
    pub sales_head_first: bool,
}

/// An employee eligible for generated tasks
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Candidate {
    pub id: Uuid,
    pub name: String,
    pub department: Option<String>,
    pub designation: Option<String>,
    pub pending_tasks: i64,
}

fn narrow<'a>(pool: Vec<&'a Candidate>, keep: impl Fn(&Candidate) -> bool) -> Vec<&'a Candidate> {
    let narrowed: Vec<&Candidate> = pool.iter().copied().filter(|c| keep(c)).collect();
    if narrowed.is_empty() { pool } else { narrowed }
}

/// Narrows by department, designation and experience (each step skipped
/// when it would leave nobody), then picks the least loaded candidate when
/// balancing, else the first by name.
pub fn select_candidate<'a>(candidates: &'a [Candidate], prefs: &AssigneePreferences) -> Option<&'a Candidate> {
    let mut pool: Vec<&Candidate> = candidates.iter().collect();

    pool = narrow(pool, |c| {
        let department = c.department.as_deref().unwrap_or("").to_uppercase();
        prefs.departments.iter().any(|d| department.contains(&d.to_uppercase()))
    });

    if !prefs.designations.is_empty() {
        pool = narrow(pool, |c| {
            let designation = c.designation.as_deref().unwrap_or("").to_lowercase();
            prefs.designations.iter().any(|d| designation.contains(&d.to_lowercase()))
        });
    }

    if let Some(experience) = prefs.experience {
        pool = narrow(pool, |c| {
            let designation = c.designation.as_deref().unwrap_or("").to_lowercase();
            experience.keywords().iter().any(|k| designation.contains(k))
        });
    }

    if prefs.workload_balancing {
        pool.into_iter()
            .min_by(|a, b| a.pending_tasks.cmp(&b.pending_tasks).then_with(|| a.name.cmp(&b.name)))
    } else {
        pool.into_iter().min_by(|a, b| a.name.cmp(&b.name))
    }
}

pub struct LeadRule {
    pub id: &'static str,
    pub name: &'static str,
    pub task_type: TaskType,
    pub priority: Priority,
    pub sla_hours: i64,
    /// Fires when any group holds
    pub triggers: Vec<ConditionGroup>,
    pub assignee: AssigneePreferences,
}

fn event_is(kind: LeadEventKind) -> Condition {
    Condition::equals("event_type", json!(kind.as_str()))
}

fn status_is(status: LeadStatus) -> Condition {
    Condition::equals("status", json!(status.as_str()))
}

pub fn lead_rules(high_value_threshold: Decimal) -> Vec<LeadRule> {
    let high_value = Condition::new(
        "estimated_value",
        ConditionOperator::GreaterThanOrEquals,
        json!(high_value_threshold.to_f64().unwrap_or(100_000.0)),
    );

    vec![
        LeadRule {
            id: "lead_assignment_initial_contact",
            name: "Initial Contact Task on Lead Assignment",
            task_type: TaskType::LeadFollowUp,
            priority: Priority::Medium,
            sla_hours: 24,
            triggers: vec![
                ConditionGroup::and(vec![event_is(LeadEventKind::LeadAssigned)]),
                ConditionGroup::and(vec![
                    event_is(LeadEventKind::LeadStatusChanged),
                    Condition::equals("previous_status", json!(LeadStatus::Unassigned.as_str())),
                    status_is(LeadStatus::Assigned),
                ]),
            ],
            assignee: AssigneePreferences {
                departments: &["SALES", "SEO"],
                designations: &["Sales Head", "Sales Resource", "SEO"],
                experience: Some(Experience::Senior),
                workload_balancing: true,
                sales_head_first: false,
            },
        },
        LeadRule {
            id: "lead_qualification_task",
            name: "Lead Qualification Task",
            task_type: TaskType::LeadFollowUp,
            priority: Priority::Medium,
            sla_hours: 48,
            triggers: vec![ConditionGroup::and(vec![
                event_is(LeadEventKind::LeadStatusChanged),
                status_is(LeadStatus::Contacted),
            ])],
            assignee: AssigneePreferences {
                departments: &["SALES"],
                designations: &["Sales Head", "Senior Sales"],
                experience: Some(Experience::Senior),
                workload_balancing: false,
                sales_head_first: false,
            },
        },
        LeadRule {
            id: "quotation_preparation_task",
            name: "Quotation Preparation Task",
            task_type: TaskType::QuotationApproval,
            priority: Priority::High,
            sla_hours: 48,
            triggers: vec![ConditionGroup::and(vec![
                event_is(LeadEventKind::LeadStatusChanged),
                status_is(LeadStatus::Qualified),
            ])],
            assignee: AssigneePreferences {
                departments: &["SALES"],
                designations: &["Sales Head"],
                experience: Some(Experience::Expert),
                workload_balancing: false,
                sales_head_first: false,
            },
        },
        LeadRule {
            id: "high_value_lead_escalation",
            name: "High-Value Lead Escalation",
            task_type: TaskType::LeadFollowUp,
            priority: Priority::Urgent,
            sla_hours: 12,
            triggers: vec![
                ConditionGroup::and(vec![
                    high_value.clone(),
                    event_is(LeadEventKind::LeadAssigned),
                    status_is(LeadStatus::Assigned),
                ]),
                ConditionGroup::and(vec![
                    high_value,
                    event_is(LeadEventKind::LeadStatusChanged),
                    status_is(LeadStatus::Assigned),
                ]),
            ],
            assignee: AssigneePreferences {
                departments: &["SALES"],
                designations: &["Manager", "Sales Head"],
                experience: Some(Experience::Expert),
                workload_balancing: false,
                sales_head_first: true,
            },
        },
        LeadRule {
            id: "quotation_followup_task",
            name: "Quotation Follow-up Task",
            task_type: TaskType::QuotationFollowUp,
            priority: Priority::High,
            sla_hours: 24,
            triggers: vec![ConditionGroup::and(vec![
                event_is(LeadEventKind::QuotationSent),
                Condition::equals("has_quotation", json!(true)),
            ])],
            assignee: AssigneePreferences {
                departments: &["SALES"],
                designations: &["Sales Resource", "Sales Head"],
                experience: Some(Experience::Senior),
                workload_balancing: true,
                sales_head_first: false,
            },
        },
        LeadRule {
            id: "payment_followup_task",
            name: "Payment Follow-up Task",
            task_type: TaskType::PaymentFollowUp,
            priority: Priority::High,
            sla_hours: 72,
            triggers: vec![ConditionGroup::and(vec![
                event_is(LeadEventKind::QuotationApproved),
                Condition::equals("has_quotation", json!(true)),
            ])],
            assignee: AssigneePreferences {
                departments: &["SALES", "ACCOUNTS"],
                designations: &["Sales Head", "Accounts Manager"],
                experience: Some(Experience::Senior),
                workload_balancing: true,
                sales_head_first: false,
            },
        },
    ]
}

impl LeadRule {
    pub fn matches(&self, context: &Value) -> bool {
        self.triggers.iter().any(|group| group.evaluate(context))
    }

    fn draft(&self, event: &LeadEvent, default_value: Decimal) -> NewTask {
        let lead = &event.lead;
        let client = &lead.client_name;
        let lead_value = lead.estimated_value.unwrap_or(default_value);
        let quotation = event.quotation.as_ref();
        let quotation_value = quotation.map(|q| q.total_amount).unwrap_or(lead_value);
        let quotation_number = quotation.map(|q| q.quotation_number.as_str()).unwrap_or("");

        let (title, description, impact) = match self.id {
            "lead_assignment_initial_contact" => (
                format!("Initial contact with {}", client),
                format!(
                    "Make initial contact with {} (Lead #{}). Introduce yourself, understand their requirements and schedule a detailed discussion.",
                    client, lead.lead_number
                ),
                "First Impression",
            ),
            "lead_qualification_task" => (
                format!("Qualify lead requirements - {}", client),
                format!(
                    "Conduct a detailed qualification of {}: needs, budget, timeline and decision process.",
                    client
                ),
                "Lead Qualification",
            ),
            "quotation_preparation_task" => (
                format!("Prepare quotation for {}", client),
                format!(
                    "Prepare a quotation for {} covering services, pricing, terms and deliverables.",
                    client
                ),
                "Revenue Generation",
            ),
            "high_value_lead_escalation" => (
                format!(
                    "HIGH VALUE: Manage lead {} ({})",
                    client,
                    format_inr(lead.estimated_value.unwrap_or_default())
                ),
                format!(
                    "High-value lead ({}) requires immediate management attention. Client: {}.",
                    format_inr(lead.estimated_value.unwrap_or_default()),
                    client
                ),
                "Critical Revenue",
            ),
            "quotation_followup_task" => (
                format!("Follow up with {} about quotation", client),
                format!(
                    "Follow up with {} regarding quotation {} ({}). Address questions and request feedback.",
                    client,
                    quotation_number,
                    format_inr(quotation_value)
                ),
                "Deal Closure",
            ),
            _ => (
                format!("Payment follow-up for {}", client),
                format!(
                    "Follow up on payment for approved quotation {} from {} ({}).",
                    quotation_number,
                    client,
                    format_inr(quotation_value)
                ),
                "Cash Flow",
            ),
        };

        let estimated_value = if quotation.is_some() { quotation_value } else { lead_value };

        NewTask {
            task_description: Some(description),
            priority: self.priority,
            lead_id: Some(lead.id),
            quotation_id: quotation.map(|q| q.id),
            client_name: Some(client.clone()),
            due_date: Some(Utc::now() + Duration::hours(self.sla_hours)),
            business_impact: Some(impact.to_string()),
            ai_reasoning: Some(format!(
                "{} ({}): {} within {} hours. Value: {}.",
                self.name,
                self.id,
                event.kind.as_str(),
                self.sla_hours,
                format_inr(estimated_value)
            )),
            estimated_value: Some(estimated_value),
            metadata: json!({
                "ai_generated": true,
                "rule_id": self.id,
                "rule_name": self.name,
                "sla_hours": self.sla_hours,
                "triggered_by": event.triggered_by,
                "event_type": event.kind.as_str(),
            }),
            ..NewTask::new(title, self.task_type)
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct LeadTaskOutcome {
    pub tasks_generated: usize,
    pub tasks: Vec<AiTask>,
    pub skipped_rules: Vec<&'static str>,
    pub insights: Vec<String>,
}

pub struct LeadTaskEngine {
    tasks: TaskService,
    directory: PgDirectory,
    rules: Vec<LeadRule>,
    default_value: Decimal,
    high_value_threshold: Decimal,
}

impl LeadTaskEngine {
    pub fn new(tasks: TaskService) -> Self {
        let config = tasks.workflow_config().clone();
        let directory = PgDirectory::new(tasks.pool().clone());
        Self {
            tasks,
            directory,
            rules: lead_rules(config.high_value_lead_threshold),
            default_value: config.default_estimated_value,
            high_value_threshold: config.high_value_lead_threshold,
        }
    }

    fn pool(&self) -> &PgPool {
        self.tasks.pool()
    }

    /// Runs every matching rule. Rule failures are logged and recorded, never
    /// propagated; only loading candidates can fail the whole event.
    pub async fn process(&self, event: &LeadEvent) -> WorkflowResult<LeadTaskOutcome> {
        let context = event.context();
        let matching: Vec<&LeadRule> = self.rules.iter().filter(|r| r.matches(&context)).collect();
        let mut outcome = LeadTaskOutcome::default();

        if matching.is_empty() {
            return Ok(outcome);
        }

        tracing::info!(
            "Lead {} event {} matched {} rule(s)",
            event.lead.lead_number,
            event.kind.as_str(),
            matching.len()
        );

        let candidates = self.load_candidates().await?;

        for rule in matching {
            match self.already_fired(rule.id, event.lead.id).await {
                Ok(true) => {
                    tracing::debug!("Rule {} already fired for lead {}", rule.id, event.lead.id);
                    outcome.skipped_rules.push(rule.id);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Dedup check for rule {} failed: {}", rule.id, e);
                    continue;
                }
            }

            match self.fire(rule, event, &candidates).await {
                Ok(task) => {
                    self.log(rule, event, Some(&task), None).await;
                    outcome.tasks.push(task);
                }
                Err(e) => {
                    tracing::error!("Rule {} failed for lead {}: {}", rule.id, event.lead.id, e);
                    self.log(rule, event, None, Some(e.to_string())).await;
                }
            }
        }

        outcome.tasks_generated = outcome.tasks.len();
        outcome.insights = self.insights(event, &outcome);
        Ok(outcome)
    }

    async fn fire(&self, rule: &LeadRule, event: &LeadEvent, candidates: &[Candidate]) -> WorkflowResult<AiTask> {
        let mut draft = rule.draft(event, self.default_value);

        let mut assignee = None;
        if rule.assignee.sales_head_first {
            assignee = self
                .directory
                .sales_head()
                .await?
                .map(|head| (head.id, head.name, None, None));
        }
        if assignee.is_none() {
            assignee = select_candidate(candidates, &rule.assignee)
                .map(|c| (c.id, c.name.clone(), c.department.clone(), c.designation.clone()));
        }

        if let Some((id, name, department, designation)) = assignee {
            draft.assigned_to_employee_id = Some(id);
            draft.assigned_to = Some(name);
            draft.metadata["department_assigned"] = json!(department);
            draft.metadata["designation_assigned"] = json!(designation);
        } else {
            tracing::warn!("No employee available for rule {}", rule.id);
        }

        self.tasks.create(draft).await
    }

    async fn load_candidates(&self) -> WorkflowResult<Vec<Candidate>> {
        let candidates = sqlx::query_as::<_, Candidate>(
            r#"
            SELECT e.id,
                   TRIM(e.first_name || ' ' || e.last_name) AS name,
                   e.department,
                   e.designation,
                   COUNT(t.id) AS pending_tasks
            FROM employees e
            LEFT JOIN ai_tasks t
                   ON t.assigned_to_employee_id = e.id AND t.status = 'pending'
            WHERE e.status = 'active'
            GROUP BY e.id
            ORDER BY name
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(candidates)
    }

    async fn already_fired(&self, rule_id: &str, lead_id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM ai_tasks WHERE lead_id = $1 AND metadata->>'rule_id' = $2)",
        )
        .bind(lead_id)
        .bind(rule_id)
        .fetch_one(self.pool())
        .await
    }

    async fn log(&self, rule: &LeadRule, event: &LeadEvent, task: Option<&AiTask>, error: Option<String>) {
        let metadata = json!({
            "rule_name": rule.name,
            "event_type": event.kind.as_str(),
            "lead_status": event.lead.status.as_str(),
            "task_id": task.map(|t| t.id),
            "task_title": task.map(|t| t.task_title.clone()),
            "task_priority": rule.priority.as_str(),
            "sla_hours": rule.sla_hours,
        });

        let result = sqlx::query(
            r#"
            INSERT INTO task_generation_log
                (lead_id, quotation_id, rule_triggered, success, error_message, triggered_by, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.lead.id)
        .bind(event.quotation.as_ref().map(|q| q.id))
        .bind(rule.id)
        .bind(error.is_none())
        .bind(&error)
        .bind(&event.triggered_by)
        .bind(&metadata)
        .execute(self.pool())
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to record task generation for rule {}: {}", rule.id, e);
        }
    }

    fn insights(&self, event: &LeadEvent, outcome: &LeadTaskOutcome) -> Vec<String> {
        let mut insights = Vec::new();
        if outcome.tasks_generated > 0 {
            insights.push(format!(
                "Generated {} task(s) for {}",
                outcome.tasks_generated, event.lead.client_name
            ));
        }
        if let Some(value) = event.lead.estimated_value {
            if value >= self.high_value_threshold {
                insights.push(format!("High-value lead ({}) - escalated to management", format_inr(value)));
            }
        }
        if event.kind == LeadEventKind::LeadAssigned {
            insights.push("Lead assignment: 24-hour SLA for initial contact".to_string());
        }
        insights
    }
}
