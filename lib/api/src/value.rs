//! Tagged value type used for everything that crosses the rule boundary:
//! device attributes, trigger/condition/action operands and scene states.
//! Comparison goes through an explicit normalization step so that payload
//! variants like `"ON"`, `ON` and `on` compare equal.

use serde::{Deserialize, Serialize};

/// Two numbers closer than this compare equal.
pub const NUMERIC_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Arrays and objects, kept as raw JSON.
    Json(serde_json::Value),
}

impl Value {
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => Value::Number(f),
                None => Value::Json(value.clone()),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            other => Value::Json(other.clone()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Json(v) => v.clone(),
        }
    }

    /// Numeric view: numbers directly, strings leniently parsed (`" 23.0 "`).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Canonical string form: scalars collapse so that `"ON"`, `ON` and `on`
    /// are indistinguishable, and `1` equals `1.0`.
    pub fn normalized(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => normalize_number(*n),
            Value::String(s) => {
                let trimmed = s.trim();
                match trimmed.parse::<f64>() {
                    Ok(n) => normalize_number(n),
                    Err(_) => trimmed.to_lowercase(),
                }
            }
            Value::Json(v) => v.to_string(),
        }
    }

    /// Equality with numeric tolerance, falling back to normalized strings.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => approx_eq(a, b),
            _ => self.normalized() == other.normalized(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&normalize_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Json(v) => write!(f, "{v}"),
        }
    }
}

fn normalize_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= NUMERIC_TOLERANCE
}

/// Rule comparison operators. Stored under their serde names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, derive_more::Display)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CompareOp {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Between,
    Contains,
    StartsWith,
    EndsWith,
    ChangesTo,
    ChangesFrom,
    AnyChange,
}

impl CompareOp {
    /// Evaluate against an old/new value transition (device-state triggers).
    pub fn holds_for_change(
        &self,
        old: Option<&Value>,
        new: &Value,
        expected: Option<&Value>,
        expected2: Option<&Value>,
    ) -> bool {
        let old_norm = old.map(Value::normalized).unwrap_or_default();
        let new_norm = new.normalized();

        match self {
            CompareOp::AnyChange => old_norm != new_norm,
            CompareOp::ChangesTo => expected.is_some_and(|v| new_norm == v.normalized()),
            CompareOp::ChangesFrom => expected.is_some_and(|v| old_norm == v.normalized()),
            _ => self.holds_for_current(new, expected, expected2),
        }
    }

    /// Evaluate against a single current value (conditions, plain triggers).
    /// Transition operators never hold here.
    pub fn holds_for_current(&self, current: &Value, expected: Option<&Value>, expected2: Option<&Value>) -> bool {
        match self {
            CompareOp::Equals => expected.is_some_and(|v| current.loosely_equals(v)),
            CompareOp::NotEquals => expected.is_some_and(|v| !current.loosely_equals(v)),
            CompareOp::GreaterThan
            | CompareOp::GreaterThanOrEqual
            | CompareOp::LessThan
            | CompareOp::LessThanOrEqual => match (current.as_number(), expected.and_then(Value::as_number)) {
                (Some(a), Some(b)) => self.holds_numeric_order(a, b),
                _ => false,
            },
            CompareOp::Between => match (
                current.as_number(),
                expected.and_then(Value::as_number),
                expected2.and_then(Value::as_number),
            ) {
                (Some(a), Some(low), Some(high)) => between(a, low, high),
                _ => false,
            },
            CompareOp::Contains => {
                expected.is_some_and(|v| current.normalized().contains(v.normalized().as_str()))
            }
            CompareOp::StartsWith => {
                expected.is_some_and(|v| current.normalized().starts_with(v.normalized().as_str()))
            }
            CompareOp::EndsWith => {
                expected.is_some_and(|v| current.normalized().ends_with(v.normalized().as_str()))
            }
            CompareOp::ChangesTo | CompareOp::ChangesFrom | CompareOp::AnyChange => false,
        }
    }

    /// Evaluate against a numeric old/new pair (sensor-reading triggers).
    pub fn holds_for_number(&self, old: Option<f64>, new: f64, expected: Option<f64>, expected2: Option<f64>) -> bool {
        match self {
            CompareOp::AnyChange => old.is_some_and(|o| !approx_eq(o, new)),
            CompareOp::ChangesTo => {
                expected.is_some_and(|v| approx_eq(new, v) && old.is_none_or(|o| !approx_eq(o, v)))
            }
            CompareOp::ChangesFrom => {
                expected.is_some_and(|v| old.is_some_and(|o| approx_eq(o, v)) && !approx_eq(new, v))
            }
            CompareOp::Equals => expected.is_some_and(|v| approx_eq(new, v)),
            CompareOp::NotEquals => expected.is_some_and(|v| !approx_eq(new, v)),
            CompareOp::GreaterThan
            | CompareOp::GreaterThanOrEqual
            | CompareOp::LessThan
            | CompareOp::LessThanOrEqual => expected.is_some_and(|v| self.holds_numeric_order(new, v)),
            CompareOp::Between => match (expected, expected2) {
                (Some(low), Some(high)) => between(new, low, high),
                _ => false,
            },
            CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith => false,
        }
    }

    fn holds_numeric_order(&self, a: f64, b: f64) -> bool {
        match self {
            CompareOp::GreaterThan => a - b > NUMERIC_TOLERANCE,
            CompareOp::GreaterThanOrEqual => a - b > -NUMERIC_TOLERANCE,
            CompareOp::LessThan => b - a > NUMERIC_TOLERANCE,
            CompareOp::LessThanOrEqual => b - a > -NUMERIC_TOLERANCE,
            _ => false,
        }
    }
}

/// `Between` with swapped bounds evaluates as `[min, max]`.
fn between(a: f64, low: f64, high: f64) -> bool {
    let (low, high) = if low <= high { (low, high) } else { (high, low) };
    a >= low - NUMERIC_TOLERANCE && a <= high + NUMERIC_TOLERANCE
}
