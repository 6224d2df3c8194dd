//! Schemaless attribute values carried by nodes (`requirements`, `metadata`)
//! and links (`conditions`).
//!
//! Values are an explicit tagged tree rather than raw JSON. The two lenient
//! extractions the tracker relies on, the `count` target and the `isGroup`
//! flag, live here with their coercion rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key in a node's `requirements` holding its numeric target.
pub const COUNT_KEY: &str = "count";

/// Key in a node's `metadata` marking it as a group aggregator.
pub const IS_GROUP_KEY: &str = "isGroup";

/// An open map of primitive, array or nested-map values.
pub type Attributes = BTreeMap<String, QuestValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum QuestValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<QuestValue>),
    Map(Attributes),
}

impl QuestValue {
    /// Loose truthiness: null, `false`, `0`, `NaN` and `""` are false;
    /// everything else (including empty arrays and maps) is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Array(_) | Self::Map(_) => true,
        }
    }

    /// Coerce to a non-negative integer count.
    ///
    /// Finite numbers are truncated; strings contribute their leading
    /// integer (`" 12 kills"` is 12). Negative results floor at zero and
    /// anything unparseable is `None`.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_count(&self) -> Option<u32> {
        match self {
            Self::Number(n) if n.is_finite() => Some(clamp_count(n.trunc())),
            Self::String(s) => leading_integer(s).map(|n| clamp_count(n as f64)),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for QuestValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<bool> for QuestValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for QuestValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for QuestValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Target count captured into a new progress row: `requirements.count`
/// coerced via [`QuestValue::as_count`], or 0.
pub fn target_count(requirements: &Attributes) -> u32 {
    requirements
        .get(COUNT_KEY)
        .and_then(QuestValue::as_count)
        .unwrap_or(0)
}

/// Whether `metadata.isGroup` is truthy.
pub fn is_group(metadata: &Attributes) -> bool {
    metadata.get(IS_GROUP_KEY).is_some_and(QuestValue::is_truthy)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn clamp_count(n: f64) -> u32 {
    n.clamp(0.0, f64::from(u32::MAX)) as u32
}

fn leading_integer(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    // Saturate instead of failing on absurdly long digit runs.
    let magnitude = digits[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -magnitude } else { magnitude })
}
