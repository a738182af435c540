// Sequence planning - turns a template's steps and rules into the ordered
// follow-up plan for one quotation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use super::conditions::Condition;
use crate::format::format_inr;
use ooak_shared::{Priority, Quotation, SequenceRule, SequenceStep};

pub const DEFAULT_STEP_ICON: &str = "target";
pub const DEFAULT_DUE_AFTER_HOURS: i32 = 24;
/// One year; steps further out than this are rejected.
pub const MAX_DUE_AFTER_HOURS: i32 = 8760;

#[derive(Error, Debug, PartialEq)]
pub enum SequenceError {
    #[error("Unknown condition operator '{0}'")]
    UnknownOperator(String),
    #[error("Unknown action type '{0}'")]
    UnknownAction(String),
    #[error("Invalid action data for {action}: {reason}")]
    InvalidActionData { action: String, reason: String },
}

/// One step of a concrete plan, numbered from 1
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlannedStep {
    pub step_number: i32,
    pub title: String,
    pub description: Option<String>,
    pub icon: String,
    pub due_after_hours: i32,
    pub priority: Priority,
    pub metadata: Value,
}

impl PlannedStep {
    fn key(&self) -> Option<&str> {
        self.metadata.get("key").and_then(|v| v.as_str())
    }
}

/// Step payload carried by an `add_step` action
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NewStep {
    pub title: String,
    pub description: Option<String>,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_due_after_hours")]
    pub due_after_hours: i32,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub key: Option<String>,
}

fn default_icon() -> String {
    DEFAULT_STEP_ICON.to_string()
}

fn default_due_after_hours() -> i32 {
    DEFAULT_DUE_AFTER_HOURS
}

/// Which steps an action touches; no selector means every step.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct StepSelector {
    pub step_number: Option<i32>,
    #[serde(default)]
    pub step_keys: Vec<String>,
}

impl StepSelector {
    fn selects(&self, step: &PlannedStep) -> bool {
        let by_number = self.step_number.map(|n| n == step.step_number);
        let by_key = if self.step_keys.is_empty() {
            None
        } else {
            Some(step.key().map(|k| self.step_keys.iter().any(|s| s == k)).unwrap_or(false))
        };
        match (by_number, by_key) {
            (None, None) => true,
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (Some(a), Some(b)) => a || b,
        }
    }
}

/// Parsed `action_type` + `action_data` of a sequence rule
#[derive(Debug, Clone, PartialEq)]
pub enum RuleAction {
    AddStep { position: usize, step: NewStep },
    ModifyTiming {
        selector: StepSelector,
        due_after_hours: Option<i32>,
        multiplier: Option<f64>,
    },
    ChangePriority { selector: StepSelector, priority: Priority },
}

#[derive(Deserialize)]
struct AddStepData {
    position: Option<usize>,
    step: NewStep,
}

#[derive(Deserialize)]
struct ModifyTimingData {
    #[serde(flatten)]
    selector: StepSelector,
    due_after_hours: Option<i32>,
    multiplier: Option<f64>,
}

#[derive(Deserialize)]
struct ChangePriorityData {
    #[serde(flatten)]
    selector: StepSelector,
    priority: Priority,
}

fn invalid(action: &str, err: impl std::fmt::Display) -> SequenceError {
    SequenceError::InvalidActionData {
        action: action.to_string(),
        reason: err.to_string(),
    }
}

impl RuleAction {
    pub fn parse(action_type: &str, data: &Value) -> Result<Self, SequenceError> {
        match action_type {
            "add_step" => {
                let parsed: AddStepData =
                    serde_json::from_value(data.clone()).map_err(|e| invalid(action_type, e))?;
                Ok(Self::AddStep {
                    position: parsed.position.unwrap_or(usize::MAX),
                    step: parsed.step,
                })
            }
            "modify_timing" => {
                let parsed: ModifyTimingData =
                    serde_json::from_value(data.clone()).map_err(|e| invalid(action_type, e))?;
                if parsed.due_after_hours.is_none() && parsed.multiplier.is_none() {
                    return Err(invalid(action_type, "due_after_hours or multiplier is required"));
                }
                Ok(Self::ModifyTiming {
                    selector: parsed.selector,
                    due_after_hours: parsed.due_after_hours,
                    multiplier: parsed.multiplier,
                })
            }
            "change_priority" => {
                let parsed: ChangePriorityData =
                    serde_json::from_value(data.clone()).map_err(|e| invalid(action_type, e))?;
                Ok(Self::ChangePriority {
                    selector: parsed.selector,
                    priority: parsed.priority,
                })
            }
            other => Err(SequenceError::UnknownAction(other.to_string())),
        }
    }

    fn apply(&self, steps: &mut Vec<PlannedStep>) {
        match self {
            Self::AddStep { position, step } => {
                let index = position.saturating_sub(1).min(steps.len());
                let metadata = match &step.key {
                    Some(key) => json!({ "key": key }),
                    None => json!({}),
                };
                steps.insert(
                    index,
                    PlannedStep {
                        step_number: 0,
                        title: step.title.clone(),
                        description: step.description.clone(),
                        icon: step.icon.clone(),
                        due_after_hours: step.due_after_hours.max(0),
                        priority: step.priority,
                        metadata,
                    },
                );
                renumber(steps);
            }
            Self::ModifyTiming {
                selector,
                due_after_hours,
                multiplier,
            } => {
                for step in steps.iter_mut().filter(|s| selector.selects(s)) {
                    if let Some(hours) = due_after_hours {
                        step.due_after_hours = (*hours).max(0);
                    }
                    if let Some(factor) = multiplier {
                        let scaled = (step.due_after_hours as f64 * factor).round();
                        step.due_after_hours = scaled.max(0.0) as i32;
                    }
                }
            }
            Self::ChangePriority { selector, priority } => {
                for step in steps.iter_mut().filter(|s| selector.selects(s)) {
                    step.priority = *priority;
                }
            }
        }
    }
}

/// Rejects rules that would be skipped at planning time.
pub fn validate_rule(
    condition_field: &str,
    condition_operator: &str,
    condition_value: &str,
    action_type: &str,
    action_data: &Value,
) -> Result<(), SequenceError> {
    Condition::from_parts(condition_field, condition_operator, condition_value)
        .ok_or_else(|| SequenceError::UnknownOperator(condition_operator.to_string()))?;
    RuleAction::parse(action_type, action_data)?;
    Ok(())
}

fn renumber(steps: &mut [PlannedStep]) {
    for (index, step) in steps.iter_mut().enumerate() {
        step.step_number = index as i32 + 1;
    }
}

fn step_applies(step: &SequenceStep, context: &Value) -> bool {
    if !step.is_conditional {
        return true;
    }
    match (&step.condition_type, &step.condition_value) {
        (Some(field), Some(expression)) => Condition::from_expression(field, expression)
            .map(|c| c.evaluate(context))
            .unwrap_or(false),
        _ => false,
    }
}

/// Builds the plan: conditional steps are kept only when their condition
/// holds, then active rules apply in order. Step numbers referenced by a rule
/// are the numbers after every earlier rule has run.
pub fn plan(steps: &[SequenceStep], rules: &[SequenceRule], context: &Value) -> Vec<PlannedStep> {
    let mut ordered: Vec<&SequenceStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.step_number);

    let mut planned: Vec<PlannedStep> = ordered
        .into_iter()
        .filter(|s| step_applies(s, context))
        .map(|s| PlannedStep {
            step_number: 0,
            title: s.title.clone(),
            description: s.description.clone(),
            icon: s.icon.clone(),
            due_after_hours: s.due_after_hours.max(0),
            priority: s.priority,
            metadata: s.metadata.clone(),
        })
        .collect();
    renumber(&mut planned);

    for rule in rules.iter().filter(|r| r.is_active) {
        let Some(condition) =
            Condition::from_parts(&rule.condition_field, &rule.condition_operator, &rule.condition_value)
        else {
            tracing::warn!(
                "Skipping sequence rule {}: unknown operator '{}'",
                rule.id,
                rule.condition_operator
            );
            continue;
        };

        if !condition.evaluate(context) {
            continue;
        }

        match RuleAction::parse(&rule.action_type, &rule.action_data) {
            Ok(action) => action.apply(&mut planned),
            Err(e) => tracing::warn!("Skipping sequence rule {}: {}", rule.id, e),
        }
    }

    planned
}

/// Where a sequence stands after a step is completed
#[derive(Debug, Clone, PartialEq)]
pub enum Progression {
    Next { step: PlannedStep, total_steps: i32 },
    Completed { total_steps: i32 },
}

pub fn next_step(plan: &[PlannedStep], completed_step: i32) -> Progression {
    let total_steps = plan.len() as i32;
    let next = completed_step + 1;
    if next < 1 || next > total_steps {
        return Progression::Completed { total_steps };
    }
    Progression::Next {
        step: plan[(next - 1) as usize].clone(),
        total_steps,
    }
}

/// Evaluation context for a quotation's follow-up plan
pub fn quotation_context(quotation: &Quotation) -> Value {
    json!({
        "quotation_value": quotation.total_amount.to_f64().unwrap_or(0.0),
        "quotation_number": quotation.quotation_number,
        "client_name": quotation.display_client_name(),
        "amount": format_inr(quotation.total_amount),
        "client_type": quotation.quotation_data.get("client_type").cloned().unwrap_or(Value::Null),
        "event_type": quotation.quotation_data.get("event_type").cloned().unwrap_or(Value::Null),
    })
}

/// Substitutes `{field}` placeholders with values from the context.
pub fn render(text: &str, context: &Value) -> String {
    let Some(fields) = context.as_object() else {
        return text.to_string();
    };
    fields.iter().fold(text.to_string(), |acc, (key, value)| {
        let replacement = match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        acc.replace(&format!("{{{}}}", key), &replacement)
    })
}

/// Whole days until the latest step is due.
pub fn estimated_duration_days(max_due_after_hours: i32) -> i32 {
    max_due_after_hours.max(0) / 24
}

fn builtin_step(number: i32, key: &str, title: &str, description: &str, icon: &str, hours: i32, priority: Priority) -> SequenceStep {
    SequenceStep {
        id: Uuid::nil(),
        sequence_template_id: Uuid::nil(),
        step_number: number,
        title: title.to_string(),
        description: Some(description.to_string()),
        icon: icon.to_string(),
        due_after_hours: hours,
        priority,
        is_conditional: false,
        condition_type: None,
        condition_value: None,
        metadata: json!({ "key": key }),
    }
}

/// Post-approval cadence used when no active template is configured
pub fn default_followup_steps() -> Vec<SequenceStep> {
    vec![
        builtin_step(
            1,
            "initial_call",
            "Initial Follow-up Call - {quotation_number}",
            "Call {client_name} to confirm quotation receipt and answer any initial questions. Quote: {quotation_number} ({amount})",
            "phone",
            2,
            Priority::Medium,
        ),
        builtin_step(
            2,
            "whatsapp_checkin",
            "WhatsApp Check-in - {quotation_number}",
            "Message {client_name} to check whether they have reviewed the quotation and need any clarifications.",
            "message-circle",
            24,
            Priority::Medium,
        ),
        builtin_step(
            3,
            "detailed_discussion",
            "Detailed Discussion - {quotation_number}",
            "Schedule a detailed discussion with {client_name} about services, deliverables and timeline.",
            "target",
            72,
            Priority::Medium,
        ),
        builtin_step(
            4,
            "payment_discussion",
            "Payment Discussion - {quotation_number}",
            "Discuss payment terms and the advance with {client_name}. Total amount: {amount}",
            "indian-rupee",
            120,
            Priority::High,
        ),
        builtin_step(
            5,
            "final_followup",
            "Final Follow-up - {quotation_number}",
            "Close the deal with {client_name} or record the reasons for rejection.",
            "clipboard-check",
            168,
            Priority::Medium,
        ),
    ]
}

pub fn default_followup_rules(high_value_threshold: Decimal) -> Vec<SequenceRule> {
    let threshold = high_value_threshold.normalize().to_string();
    vec![
        SequenceRule {
            id: Uuid::nil(),
            sequence_template_id: Uuid::nil(),
            rule_type: "conditional_step".to_string(),
            condition_field: "quotation_value".to_string(),
            condition_operator: ">".to_string(),
            condition_value: threshold.clone(),
            action_type: "add_step".to_string(),
            action_data: json!({
                "position": 2,
                "step": {
                    "key": "team_discussion",
                    "title": "Team Discussion - {quotation_number}",
                    "description": "High-value quotation ({amount}). Discuss strategy with the sales head for {client_name}.",
                    "icon": "users",
                    "due_after_hours": 36,
                    "priority": "high"
                }
            }),
            is_active: true,
        },
        SequenceRule {
            id: Uuid::nil(),
            sequence_template_id: Uuid::nil(),
            rule_type: "priority_boost".to_string(),
            condition_field: "quotation_value".to_string(),
            condition_operator: ">".to_string(),
            condition_value: threshold,
            action_type: "change_priority".to_string(),
            action_data: json!({
                "step_keys": ["initial_call", "detailed_discussion", "final_followup"],
                "priority": "high"
            }),
            is_active: true,
        },
    ]
}
