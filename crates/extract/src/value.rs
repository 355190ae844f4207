use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

use crate::schema::FieldType;

static INTEGER_FORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d+$").expect("static regex"));

static FLOAT_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("static regex")
});

/// A single extracted value.
///
/// Serializes to the plain JSON value, so exported JSON reads back into
/// the same variant (integers stay integers, floats stay floats).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldValue::Integer(_) | FieldValue::Float(_))
    }

    /// Take a service value as-is, without a declared type.
    /// Nested arrays and objects are kept as their compact JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Array(_) | Value::Object(_) => FieldValue::String(value.to_string()),
        }
    }

    /// Convert a service value to `target`, accepting the canonical text
    /// forms of booleans and numbers. Returns `None` when the value does
    /// not fit; `null` is never passed in here.
    pub fn coerce(value: &Value, target: FieldType) -> Option<Self> {
        match target {
            FieldType::String => match value {
                Value::String(s) => Some(FieldValue::String(s.clone())),
                Value::Number(n) => Some(FieldValue::String(n.to_string())),
                Value::Bool(b) => Some(FieldValue::String(b.to_string())),
                _ => None,
            },
            FieldType::Boolean => match value {
                Value::Bool(b) => Some(FieldValue::Boolean(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(FieldValue::Boolean(false)),
                    Some(1) => Some(FieldValue::Boolean(true)),
                    _ => None,
                },
                Value::String(s) => parse_bool(s).map(FieldValue::Boolean),
                _ => None,
            },
            FieldType::Integer => match value {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        return Some(FieldValue::Integer(i));
                    }
                    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
                    let f = n.as_f64()?;
                    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                        Some(FieldValue::Integer(f as i64))
                    } else {
                        None
                    }
                }
                Value::String(s) => {
                    let s = s.trim();
                    if INTEGER_FORM.is_match(s) {
                        s.parse::<i64>().ok().map(FieldValue::Integer)
                    } else {
                        None
                    }
                }
                _ => None,
            },
            FieldType::Float => match value {
                Value::Number(n) => n.as_f64().map(FieldValue::Float),
                Value::String(s) => {
                    let s = s.trim();
                    if FLOAT_FORM.is_match(s) {
                        s.parse::<f64>()
                            .ok()
                            .filter(|f| f.is_finite())
                            .map(FieldValue::Float)
                    } else {
                        None
                    }
                }
                _ => None,
            },
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Text form used in CSV and Markdown cells. Null renders as an empty cell.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::String(s) => f.write_str(s),
        }
    }
}
