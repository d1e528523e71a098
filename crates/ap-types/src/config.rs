//! Per-workload training and evaluation configuration.
//!
//! Targets and budgets are data, not code: every workload carries a
//! [`WorkloadConfig`], and the benchmark's reference workloads are available as
//! named presets.

use serde::{Deserialize, Serialize};

/// Loss family a workload trains with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    SoftmaxCrossEntropy,
    SigmoidCrossEntropy,
    MeanSquaredError,
    CtcLoss,
    MeanAbsoluteError,
}

/// Which side of the target counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalDirection {
    /// Goal reached when the metric is strictly above the target (accuracy).
    Above,
    /// Goal reached when the metric is strictly below the target (loss, error).
    Below,
}

/// Training/evaluation configuration of one workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Eval metric the goal predicate reads, e.g. `"validation/accuracy"`.
    pub target_metric: String,
    pub target_value: f64,
    pub goal_direction: GoalDirection,
    pub loss_type: LossType,
    /// Budget of submission-attributable time.
    pub max_allowed_runtime_sec: f64,
    /// Minimum wall-clock gap between untimed evaluations.
    pub eval_period_time_sec: f64,
    pub num_train_examples: u64,
    pub num_eval_train_examples: u64,
    pub num_validation_examples: u64,
    pub num_test_examples: u64,
    pub eval_batch_size: usize,
    /// Rough number of steps a tuned baseline needs.
    pub step_hint: u64,
}

impl WorkloadConfig {
    pub fn new(target_metric: impl Into<String>, target_value: f64, direction: GoalDirection) -> Self {
        Self {
            target_metric: target_metric.into(),
            target_value,
            goal_direction: direction,
            loss_type: LossType::SoftmaxCrossEntropy,
            max_allowed_runtime_sec: 3600.0,
            eval_period_time_sec: 600.0,
            num_train_examples: 0,
            num_eval_train_examples: 0,
            num_validation_examples: 0,
            num_test_examples: 0,
            eval_batch_size: 1024,
            step_hint: 0,
        }
    }

    pub fn with_loss_type(mut self, loss_type: LossType) -> Self {
        self.loss_type = loss_type;
        self
    }

    pub fn with_budget(mut self, max_allowed_runtime_sec: f64, eval_period_time_sec: f64) -> Self {
        self.max_allowed_runtime_sec = max_allowed_runtime_sec;
        self.eval_period_time_sec = eval_period_time_sec;
        self
    }

    pub fn with_examples(mut self, train: u64, eval_train: u64, validation: u64, test: u64) -> Self {
        self.num_train_examples = train;
        self.num_eval_train_examples = eval_train;
        self.num_validation_examples = validation;
        self.num_test_examples = test;
        self
    }

    pub fn with_eval_batch_size(mut self, eval_batch_size: usize) -> Self {
        self.eval_batch_size = eval_batch_size;
        self
    }

    pub fn with_step_hint(mut self, step_hint: u64) -> Self {
        self.step_hint = step_hint;
        self
    }

    /// Compare a metric value against the target.
    pub fn is_goal(&self, value: f64) -> bool {
        match self.goal_direction {
            GoalDirection::Above => value > self.target_value,
            GoalDirection::Below => value < self.target_value,
        }
    }

    /// Configuration of one of the benchmark's reference workloads.
    pub fn preset(name: &str) -> Option<Self> {
        let config = match name {
            "cifar" => Self::new("validation/accuracy", 0.85, GoalDirection::Above)
                .with_budget(3600.0, 600.0)
                .with_examples(45_000, 10_000, 5_000, 10_000)
                .with_eval_batch_size(1024)
                .with_step_hint(4883),
            "imagenet_resnet" => Self::new("validation/accuracy", 0.76, GoalDirection::Above)
                .with_budget(111_600.0, 6000.0)
                .with_examples(1_281_167, 50_000, 50_000, 10_000),
            "criteo1tb" => Self::new("validation/loss", 0.1255, GoalDirection::Below)
                .with_loss_type(LossType::SigmoidCrossEntropy)
                .with_budget(6.0 * 60.0 * 60.0, 10.0 * 60.0)
                .with_examples(
                    4_195_197_692,
                    524_288 * 2,
                    89_137_318 / 2,
                    89_137_318 / 2,
                ),
            // Goal reads the train CTC loss, matching the reference workload.
            "librispeech_conformer" => Self::new("train/ctc_loss", 0.5, GoalDirection::Below)
                .with_loss_type(LossType::CtcLoss)
                .with_budget(36_000.0, 3000.0)
                .with_examples(28_539, 256, 2703, 2620),
            _ => return None,
        };
        Some(config)
    }

    pub fn preset_names() -> &'static [&'static str] {
        &["cifar", "criteo1tb", "imagenet_resnet", "librispeech_conformer"]
    }
}
