// Rule conditions - evaluated against a JSON context built from the quotation or lead

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Condition operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    Matches,
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,
}

impl ConditionOperator {
    /// Accepts both the symbolic form stored on sequence rules and the long names.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "=" | "==" | "eq" | "equals" => Some(Self::Equals),
            "!=" | "<>" | "ne" | "not_equals" => Some(Self::NotEquals),
            "contains" => Some(Self::Contains),
            "matches" | "regex" => Some(Self::Matches),
            ">" | "gt" | "greater_than" => Some(Self::GreaterThan),
            ">=" | "gte" | "greater_than_or_equals" => Some(Self::GreaterThanOrEquals),
            "<" | "lt" | "less_than" => Some(Self::LessThan),
            "<=" | "lte" | "less_than_or_equals" => Some(Self::LessThanOrEquals),
            _ => None,
        }
    }
}

/// A single condition to evaluate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Field name to evaluate (supports dot notation for nested fields)
    pub field: String,
    pub operator: ConditionOperator,
    /// Value to compare against; numeric strings compare numerically
    pub value: Value,
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, serde_json::json!(value))
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    /// Builds a condition from the text columns of a sequence rule.
    pub fn from_parts(field: &str, operator: &str, value: &str) -> Option<Self> {
        let operator = ConditionOperator::parse(operator)?;
        Some(Self::new(field, operator, Value::String(value.to_string())))
    }

    /// Parses the compact form used on conditional steps, e.g. `>100000` or
    /// `=corporate`. A value without an operator prefix means equality.
    pub fn from_expression(field: &str, expression: &str) -> Option<Self> {
        let expression = expression.trim();
        for symbol in [">=", "<=", "!=", ">", "<", "="] {
            if let Some(rest) = expression.strip_prefix(symbol) {
                return Self::from_parts(field, symbol, rest.trim());
            }
        }
        if let Some(rest) = expression.strip_prefix("contains:") {
            return Self::from_parts(field, "contains", rest.trim());
        }
        Some(Self::new(
            field,
            ConditionOperator::Equals,
            Value::String(expression.to_string()),
        ))
    }

    pub fn evaluate(&self, context: &Value) -> bool {
        let field_value = lookup(context, &self.field);

        match self.operator {
            ConditionOperator::Equals => field_value
                .map(|v| values_equal(v, &self.value))
                .unwrap_or(false),
            ConditionOperator::NotEquals => field_value
                .map(|v| !values_equal(v, &self.value))
                .unwrap_or(true),
            ConditionOperator::Contains => match (field_value.and_then(as_text), as_text(&self.value)) {
                (Some(haystack), Some(needle)) => {
                    haystack.to_lowercase().contains(&needle.to_lowercase())
                }
                _ => false,
            },
            ConditionOperator::Matches => match (field_value.and_then(as_text), as_text(&self.value)) {
                (Some(s), Some(pattern)) => regex::Regex::new(&pattern)
                    .map(|re| re.is_match(&s))
                    .unwrap_or(false),
                _ => false,
            },
            ConditionOperator::GreaterThan => self.compare(field_value, |a, b| a > b),
            ConditionOperator::GreaterThanOrEquals => self.compare(field_value, |a, b| a >= b),
            ConditionOperator::LessThan => self.compare(field_value, |a, b| a < b),
            ConditionOperator::LessThanOrEquals => self.compare(field_value, |a, b| a <= b),
        }
    }

    fn compare(&self, field_value: Option<&Value>, op: impl Fn(f64, f64) -> bool) -> bool {
        match (field_value.and_then(as_number), as_number(&self.value)) {
            (Some(a), Some(b)) => op(a, b),
            _ => false,
        }
    }
}

/// Group of conditions with AND/OR logic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionGroup {
    /// Logic operator: "AND" or "OR"
    pub logic: String,
    pub conditions: Vec<Condition>,
}

impl ConditionGroup {
    pub fn and(conditions: Vec<Condition>) -> Self {
        Self {
            logic: "AND".to_string(),
            conditions,
        }
    }

    pub fn evaluate(&self, context: &Value) -> bool {
        let mut results = self.conditions.iter().map(|c| c.evaluate(context));
        if self.logic.eq_ignore_ascii_case("or") {
            results.any(|r| r)
        } else {
            results.all(|r| r)
        }
    }
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(context, |current, key| current.get(key))
        .filter(|v| !v.is_null())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return (a - b).abs() < f64::EPSILON;
    }
    match (as_text(left), as_text(right)) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b),
        _ => left == right,
    }
}
