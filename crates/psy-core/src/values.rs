//! Open value model for module-specific result columns.
//!
//! Result tables share a fixed set of common columns (see [`crate::ids`]) and
//! add an arbitrary, per-module column set. Those extra columns travel as an
//! ordered `(name, FieldValue)` sequence whose names come from the live table
//! schema, never from a compile-time struct.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// A single stored value, mirroring the storage engine's value classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl FieldValue {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value, used by compute hooks and aggregation.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Real(r) => Some(*r),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Null | Self::Blob(_) => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert raw caller input (e.g. a decoded form body) into a field value.
    ///
    /// Booleans become `0`/`1`. Arrays and objects are rejected; module
    /// tables store scalars only.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for arrays and objects.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CoreError> {
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Integer(i64::from(*b))),
            serde_json::Value::Number(n) => Ok(n
                .as_i64()
                .map_or_else(|| Self::Real(n.as_f64().unwrap_or(f64::NAN)), Self::Integer)),
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Err(
                CoreError::Validation("result fields must be scalar values".into()),
            ),
        }
    }

    /// JSON rendering used in audit snapshots and diffs.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Real(r) => serde_json::Number::from_f64(*r)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Blob(b) => serde_json::Value::String(
                b.iter().map(|byte| format!("{byte:02x}")).collect(),
            ),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Ordered module-specific fields of one result record.
///
/// Insertion order is preserved; setting an existing name replaces its value
/// in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ModuleFields(Vec<(String, FieldValue)>);

impl ModuleFields {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Set `name` to `value`, replacing any previous value for that name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let idx = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(idx).1)
    }

    /// Overlay `other` on top of `self`; later values win.
    pub fn merge(&mut self, other: &Self) {
        for (name, value) in other.iter() {
            self.set(name, value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON object rendering, used for audit snapshots.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl FromIterator<(String, FieldValue)> for ModuleFields {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (name, value) in iter {
            fields.set(name, value);
        }
        fields
    }
}

impl IntoIterator for ModuleFields {
    type Item = (String, FieldValue);
    type IntoIter = std::vec::IntoIter<(String, FieldValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn set_replaces_in_place() {
        let mut fields = ModuleFields::new()
            .with("raw_score", 12)
            .with("notes", "calm");
        fields.set("raw_score", 14);

        let names: Vec<&str> = fields.names().collect();
        assert_eq!(names, vec!["raw_score", "notes"]);
        assert_eq!(fields.get("raw_score"), Some(&FieldValue::Integer(14)));
    }

    #[test]
    fn merge_overlays() {
        let mut base = ModuleFields::new().with("a", 1).with("b", 2);
        base.merge(&ModuleFields::new().with("b", 3).with("c", 4));
        assert_eq!(
            base,
            ModuleFields::new().with("a", 1).with("b", 3).with("c", 4)
        );
    }

    #[test]
    fn from_json_scalars() {
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(7)).unwrap(),
            FieldValue::Integer(7)
        );
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(2.5)).unwrap(),
            FieldValue::Real(2.5)
        );
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(true)).unwrap(),
            FieldValue::Integer(1)
        );
        assert!(FieldValue::from_json(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn numeric_views() {
        assert_eq!(FieldValue::Text(" 3 ".into()).as_i64(), Some(3));
        assert_eq!(FieldValue::Integer(4).as_f64(), Some(4.0));
        assert_eq!(FieldValue::Null.as_f64(), None);
    }

    #[test]
    fn to_json_object() {
        let fields = ModuleFields::new().with("score", 10).with("level", "high");
        assert_eq!(
            fields.to_json(),
            serde_json::json!({"score": 10, "level": "high"})
        );
    }
}
