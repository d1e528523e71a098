//! The workload capability interface.
//!
//! A workload is a benchmark task: dataset, model family and target metric.
//! The harness drives it only through [`Workload`]; parameters, model state and
//! batches are associated types the harness moves around without looking
//! inside.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::{LossType, WorkloadConfig};
use crate::errors::{ApResult, WorkloadError};
use crate::eval::EvalMetrics;
use crate::rng::PrngKey;

/// Dataset split an input queue is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    EvalTrain,
    Validation,
    Test,
}

impl Split {
    /// Prefix used for metric names, e.g. `validation/accuracy`.
    pub fn metric_prefix(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::EvalTrain => "train",
            Self::Validation => "validation",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Train => "train",
            Self::EvalTrain => "eval_train",
            Self::Validation => "validation",
            Self::Test => "test",
        };
        f.write_str(name)
    }
}

/// Whether a forward pass is part of training or evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardPassMode {
    Train,
    Eval,
}

/// Shapes of every named parameter tensor of a model.
pub type ParamShapes = BTreeMap<String, Vec<usize>>;

/// Capability interface every benchmark workload implements.
///
/// One instance exists per registry key for the lifetime of the process and
/// is reused by every trial. `param_shapes` and `model_params_types` are
/// populated by `init_model_fn`; reading them earlier is a programming error
/// reported as [`WorkloadError::NotInitialized`].
pub trait Workload {
    type Params;
    /// Per-parameter type metadata handed to submissions.
    type ParamTypes;
    type ModelState;
    type Inputs;
    type Labels;
    type Logits;
    /// Restartable lazy sequence of `(inputs, labels)` batches.
    type InputQueue: Iterator<Item = (Self::Inputs, Self::Labels)>;

    fn name(&self) -> &str;

    fn config(&self) -> &WorkloadConfig;

    /// Number of shards (devices) a global batch is split across.
    fn shard_count(&self) -> usize {
        1
    }

    fn loss_type(&self) -> LossType {
        self.config().loss_type
    }

    /// Build the batch iterator for `split`. Must reject a batch size that does
    /// not divide evenly across [`Workload::shard_count`] shards.
    fn build_input_queue(
        &mut self,
        seed: PrngKey,
        split: Split,
        data_dir: Option<&Path>,
        global_batch_size: usize,
    ) -> ApResult<Self::InputQueue>;

    fn init_model_fn(&mut self, seed: PrngKey) -> ApResult<(Self::Params, Self::ModelState)>;

    fn param_shapes(&self) -> ApResult<&ParamShapes>;

    fn model_params_types(&self) -> ApResult<&Self::ParamTypes>;

    /// Train-time augmentation and preprocessing of a selected batch.
    fn preprocess_for_train(
        &self,
        inputs: Self::Inputs,
        labels: Self::Labels,
        _seed: PrngKey,
    ) -> ApResult<(Self::Inputs, Self::Labels)> {
        Ok((inputs, labels))
    }

    fn model_fn(
        &self,
        params: &Self::Params,
        inputs: &Self::Inputs,
        model_state: &Self::ModelState,
        mode: ForwardPassMode,
        seed: PrngKey,
        update_batch_norm: bool,
    ) -> ApResult<(Self::Logits, Self::ModelState)>;

    /// Per-example losses. Regularization is left to submissions.
    fn loss_fn(&self, labels: &Self::Labels, logits: &Self::Logits) -> ApResult<Vec<f64>>;

    /// Full evaluation of the model on the workload's eval splits.
    fn eval_model(
        &mut self,
        params: &Self::Params,
        model_state: &Self::ModelState,
        seed: PrngKey,
        data_dir: Option<&Path>,
    ) -> ApResult<EvalMetrics>;

    /// Goal predicate; by default compares the configured target metric.
    fn has_reached_goal(&self, metrics: &EvalMetrics) -> bool {
        let config = self.config();
        metrics
            .get(&config.target_metric)
            .is_some_and(|value| config.is_goal(*value))
    }
}

/// Gradient of the mean training loss, returned by [`GradientWorkload`].
#[derive(Debug, Clone)]
pub struct LossAndGrad<P, M> {
    pub loss: f64,
    pub grads: P,
    pub model_state: M,
}

/// Workloads that can differentiate their own training loss.
pub trait GradientWorkload: Workload {
    fn value_and_grad(
        &self,
        params: &Self::Params,
        model_state: &Self::ModelState,
        inputs: &Self::Inputs,
        labels: &Self::Labels,
        seed: PrngKey,
    ) -> ApResult<LossAndGrad<Self::Params, Self::ModelState>>;
}

/// Reject a global batch that cannot be split evenly across shards.
pub fn check_batch_divisible(workload: &str, global_batch_size: usize, shards: usize) -> ApResult<()> {
    if global_batch_size == 0 || shards == 0 || global_batch_size % shards != 0 {
        return Err(WorkloadError::IndivisibleBatch {
            workload: workload.to_string(),
            batch_size: global_batch_size,
            shards,
        }
        .into());
    }
    Ok(())
}
