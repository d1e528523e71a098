use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named metric values produced by one evaluation.
pub type EvalMetrics = BTreeMap<String, f64>;

/// One untimed evaluation, tagged with the step count at which it ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub global_step: u64,
    pub metrics: EvalMetrics,
}

/// Append-only evaluation history of one training attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvalHistory {
    records: Vec<EvalRecord>,
}

impl EvalHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, global_step: u64, metrics: EvalMetrics) {
        self.records.push(EvalRecord {
            global_step,
            metrics,
        });
    }

    pub fn latest(&self) -> Option<&EvalRecord> {
        self.records.last()
    }

    pub fn records(&self) -> &[EvalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Values of a single metric in evaluation order.
    pub fn series(&self, metric: &str) -> Vec<(u64, f64)> {
        self.records
            .iter()
            .filter_map(|r| r.metrics.get(metric).map(|v| (r.global_step, *v)))
            .collect()
    }
}

/// Render metrics as `name=value` pairs for log lines.
pub fn format_metrics(metrics: &EvalMetrics) -> String {
    metrics
        .iter()
        .map(|(name, value)| format!("{name}={value:.4}"))
        .collect::<Vec<_>>()
        .join(" ")
}
