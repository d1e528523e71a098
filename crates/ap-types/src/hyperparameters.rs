use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{ApResult, SubmissionError};

/// A concrete hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    /// Numeric view; integers widen, JSON numbers are accepted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(_) => None,
            Self::Json(v) => v.as_i64(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Json(v) => v.as_str(),
            _ => None,
        }
    }

    /// Convert a raw JSON value the way a search-space file spells it.
    pub fn from_json(value: &serde_json::Value) -> Self {
        if let Some(i) = value.as_i64() {
            Self::Int(i)
        } else if let Some(f) = value.as_f64() {
            Self::Float(f)
        } else {
            Self::Json(value.clone())
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Immutable named hyperparameter record handed to submissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hyperparameters {
    values: BTreeMap<String, ParameterValue>,
}

impl Hyperparameters {
    pub fn new(values: BTreeMap<String, ParameterValue>) -> Self {
        Self { values }
    }

    /// The empty record used under the self-tuning ruleset.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Required float-valued hyperparameter.
    pub fn f64(&self, name: &str) -> ApResult<f64> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| SubmissionError::MissingHyperparameter {
                name: name.to_string(),
            })?;
        value.as_f64().ok_or_else(|| {
            SubmissionError::HyperparameterType {
                name: name.to_string(),
                expected: "number",
            }
            .into()
        })
    }

    /// Optional float-valued hyperparameter with a fallback.
    pub fn f64_or(&self, name: &str, default: f64) -> f64 {
        self.values
            .get(name)
            .and_then(ParameterValue::as_f64)
            .unwrap_or(default)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Display for Hyperparameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApError;

    fn sample() -> Hyperparameters {
        Hyperparameters::empty()
            .with("learning_rate", ParameterValue::Float(0.01))
            .with("warmup_steps", ParameterValue::Int(10))
            .with("schedule", ParameterValue::Json(serde_json::json!("cosine")))
    }

    #[test]
    fn typed_accessors() {
        let hp = sample();
        assert_eq!(hp.f64("learning_rate").unwrap(), 0.01);
        assert_eq!(hp.f64("warmup_steps").unwrap(), 10.0);
        assert_eq!(hp.get("schedule").and_then(|v| v.as_str()), Some("cosine"));
        assert_eq!(hp.f64_or("beta1", 0.9), 0.9);
    }

    #[test]
    fn missing_and_mistyped_values_are_errors() {
        let hp = sample();
        match hp.f64("beta2") {
            Err(ApError::Submission(SubmissionError::MissingHyperparameter { name })) => {
                assert_eq!(name, "beta2")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            hp.f64("schedule"),
            Err(ApError::Submission(SubmissionError::HyperparameterType { .. }))
        ));
    }

    #[test]
    fn display_is_sorted_by_name() {
        assert_eq!(
            sample().to_string(),
            "{learning_rate=0.01, schedule=\"cosine\", warmup_steps=10}"
        );
    }

    #[test]
    fn serializes_as_flat_object() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["learning_rate"], serde_json::json!(0.01));
        assert_eq!(json["warmup_steps"], serde_json::json!(10));
        let back: Hyperparameters = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn from_json_prefers_integers() {
        assert_eq!(
            ParameterValue::from_json(&serde_json::json!(3)),
            ParameterValue::Int(3)
        );
        assert_eq!(
            ParameterValue::from_json(&serde_json::json!(0.5)),
            ParameterValue::Float(0.5)
        );
    }
}
