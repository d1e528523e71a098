//! Gaussian-blob classification workload.
//!
//! Four well-separated classes in eight dimensions, trained with a linear
//! softmax model. Small enough to train in well under a second, yet it drives
//! every part of the workload interface: seeded input queues, sharded
//! batches, model state, memoized eval splits and a goal threshold.

mod backend;
mod data;
mod model;

pub use backend::Backend;
pub use data::{BlobSpec, BlobsQueue, Dataset, Matrix};
pub use model::{LinearSoftmax, ParameterType, ShardEval, ShardGrad};

use ap_types::{
    check_batch_divisible, ApResult, EvalMetrics, ForwardPassMode, GoalDirection, GradientWorkload,
    LossAndGrad, LossType, ParamShapes, PrngKey, Split, Workload, WorkloadConfig, WorkloadError,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Model state threaded through training: how many examples the model has
/// been trained on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobsModelState {
    pub examples_seen: u64,
}

/// Workload configuration of the blobs task.
pub fn blobs_config() -> WorkloadConfig {
    WorkloadConfig::new("validation/accuracy", 0.9, GoalDirection::Above)
        .with_loss_type(LossType::SoftmaxCrossEntropy)
        .with_budget(60.0, 0.5)
        .with_examples(4096, 1024, 1024, 1024)
        .with_eval_batch_size(256)
        .with_step_hint(200)
}

/// The blobs workload on one backend.
#[derive(Debug)]
pub struct BlobsWorkload {
    name: String,
    backend: Backend,
    config: WorkloadConfig,
    spec: BlobSpec,
    model: LinearSoftmax,
    /// Std of the Gaussian jitter added to training features.
    augment_std: f32,
    param_shapes: OnceLock<ParamShapes>,
    param_types: OnceLock<Vec<ParameterType>>,
    datasets: HashMap<Split, Arc<Dataset>>,
}

impl BlobsWorkload {
    /// Fails with `BackendUnavailable` when this build lacks `backend`.
    pub fn new(name: &str, backend: Backend) -> ApResult<Self> {
        backend.ensure_available()?;
        let spec = BlobSpec::default();
        Ok(Self {
            name: name.to_string(),
            backend,
            config: blobs_config(),
            spec,
            model: LinearSoftmax {
                num_features: spec.num_features,
                num_classes: spec.num_classes,
            },
            augment_std: 0.05,
            param_shapes: OnceLock::new(),
            param_types: OnceLock::new(),
            datasets: HashMap::new(),
        })
    }

    pub fn with_config(mut self, config: WorkloadConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the generated data. Shapes and cached splits are reset.
    pub fn with_spec(mut self, spec: BlobSpec) -> ApResult<Self> {
        spec.validate()?;
        self.spec = spec;
        self.model = LinearSoftmax {
            num_features: spec.num_features,
            num_classes: spec.num_classes,
        };
        self.param_shapes = OnceLock::new();
        self.param_types = OnceLock::new();
        self.datasets.clear();
        Ok(self)
    }

    pub fn with_augmentation(mut self, std: f32) -> Self {
        self.augment_std = std;
        self
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    fn split_size(&self, split: Split) -> u64 {
        match split {
            Split::Train => self.config.num_train_examples,
            Split::EvalTrain => self.config.num_eval_train_examples,
            Split::Validation => self.config.num_validation_examples,
            Split::Test => self.config.num_test_examples,
        }
    }

    /// Memoized dataset of `split`; generated on first use.
    fn dataset(&mut self, split: Split) -> ApResult<Arc<Dataset>> {
        if let Some(data) = self.datasets.get(&split) {
            return Ok(data.clone());
        }
        let size = self.split_size(split);
        if size == 0 {
            return Err(WorkloadError::UnsupportedSplit {
                workload: self.name.clone(),
                split: split.to_string(),
            }
            .into());
        }
        debug!("Generating {} examples for {} split of {}", size, split, self.name);
        let data = Arc::new(data::generate(&self.spec, split, size as usize));
        self.datasets.insert(split, data.clone());
        Ok(data)
    }

    fn check_params(&self, params: &[f32]) -> ApResult<()> {
        if self.param_shapes.get().is_none() {
            return Err(WorkloadError::NotInitialized {
                workload: self.name.clone(),
                what: "param_shapes",
            }
            .into());
        }
        if params.len() != self.model.num_params() {
            return Err(WorkloadError::Failed {
                message: format!(
                    "expected {} parameters, got {}",
                    self.model.num_params(),
                    params.len()
                ),
            }
            .into());
        }
        Ok(())
    }

    fn eval_split(&mut self, params: &[f32], split: Split, metrics: &mut EvalMetrics) -> ApResult<()> {
        let data = self.dataset(split)?;
        let batch_size = self.config.eval_batch_size.max(1);
        let model = self.model;
        let mut loss_sum = 0.0;
        let mut correct = 0usize;
        for (inputs, labels) in BlobsQueue::single_pass(data.clone(), batch_size) {
            for shard in self
                .backend
                .map_shards(labels.len(), |rows| model.evaluate(params, &inputs, &labels, rows))
            {
                loss_sum += shard.loss_sum;
                correct += shard.correct;
            }
        }
        let n = data.len() as f64;
        let prefix = split.metric_prefix();
        metrics.insert(format!("{prefix}/accuracy"), correct as f64 / n);
        metrics.insert(format!("{prefix}/loss"), loss_sum / n);
        Ok(())
    }
}

impl Workload for BlobsWorkload {
    type Params = Vec<f32>;
    type ParamTypes = Vec<ParameterType>;
    type ModelState = BlobsModelState;
    type Inputs = Matrix;
    type Labels = Vec<usize>;
    type Logits = Matrix;
    type InputQueue = BlobsQueue;

    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    fn shard_count(&self) -> usize {
        self.backend.shard_count()
    }

    fn build_input_queue(
        &mut self,
        seed: PrngKey,
        split: Split,
        data_dir: Option<&Path>,
        global_batch_size: usize,
    ) -> ApResult<BlobsQueue> {
        check_batch_divisible(&self.name, global_batch_size, self.shard_count())?;
        if let Some(dir) = data_dir {
            debug!("{} generates its data, ignoring data dir {}", self.name, dir.display());
        }
        let data = self.dataset(split)?;
        Ok(match split {
            Split::Train => BlobsQueue::repeating(data, global_batch_size, seed),
            _ => BlobsQueue::single_pass(data, global_batch_size),
        })
    }

    fn init_model_fn(&mut self, seed: PrngKey) -> ApResult<(Vec<f32>, BlobsModelState)> {
        let model = self.model;
        self.param_shapes.get_or_init(|| model.param_shapes());
        self.param_types.get_or_init(|| model.param_types());
        Ok((model.init(seed), BlobsModelState::default()))
    }

    fn param_shapes(&self) -> ApResult<&ParamShapes> {
        self.param_shapes.get().ok_or_else(|| {
            WorkloadError::NotInitialized {
                workload: self.name.clone(),
                what: "param_shapes",
            }
            .into()
        })
    }

    fn model_params_types(&self) -> ApResult<&Vec<ParameterType>> {
        self.param_types.get().ok_or_else(|| {
            WorkloadError::NotInitialized {
                workload: self.name.clone(),
                what: "model_params_types",
            }
            .into()
        })
    }

    fn preprocess_for_train(
        &self,
        mut inputs: Matrix,
        labels: Vec<usize>,
        seed: PrngKey,
    ) -> ApResult<(Matrix, Vec<usize>)> {
        if self.augment_std > 0.0 {
            let mut rng = seed.rng();
            for value in inputs.data_mut() {
                *value += self.augment_std * data::standard_normal(&mut rng);
            }
        }
        Ok((inputs, labels))
    }

    fn model_fn(
        &self,
        params: &Vec<f32>,
        inputs: &Matrix,
        model_state: &BlobsModelState,
        mode: ForwardPassMode,
        _seed: PrngKey,
        update_batch_norm: bool,
    ) -> ApResult<(Matrix, BlobsModelState)> {
        self.check_params(params)?;
        let logits = self.model.logits(params, inputs, 0..inputs.rows());
        let mut state = *model_state;
        if mode == ForwardPassMode::Train && update_batch_norm {
            state.examples_seen += inputs.rows() as u64;
        }
        Ok((logits, state))
    }

    fn loss_fn(&self, labels: &Vec<usize>, logits: &Matrix) -> ApResult<Vec<f64>> {
        if labels.len() != logits.rows() {
            return Err(WorkloadError::Failed {
                message: format!("{} labels for {} logit rows", labels.len(), logits.rows()),
            }
            .into());
        }
        Ok(labels
            .iter()
            .enumerate()
            .map(|(i, &label)| model::softmax_with_loss(logits.row(i), label).1)
            .collect())
    }

    fn eval_model(
        &mut self,
        params: &Vec<f32>,
        _model_state: &BlobsModelState,
        _seed: PrngKey,
        _data_dir: Option<&Path>,
    ) -> ApResult<EvalMetrics> {
        self.check_params(params)?;
        let mut metrics = EvalMetrics::new();
        for split in [Split::EvalTrain, Split::Validation, Split::Test] {
            self.eval_split(params, split, &mut metrics)?;
        }
        Ok(metrics)
    }
}

impl GradientWorkload for BlobsWorkload {
    fn value_and_grad(
        &self,
        params: &Vec<f32>,
        model_state: &BlobsModelState,
        inputs: &Matrix,
        labels: &Vec<usize>,
        _seed: PrngKey,
    ) -> ApResult<LossAndGrad<Vec<f32>, BlobsModelState>> {
        self.check_params(params)?;
        let rows = labels.len();
        if rows == 0 || inputs.rows() != rows {
            return Err(WorkloadError::Failed {
                message: format!("batch of {} inputs and {} labels", inputs.rows(), rows),
            }
            .into());
        }
        let model = self.model;
        let shards = self
            .backend
            .map_shards(rows, |range| model.gradient(params, inputs, labels, range));

        // Mean over the global batch, like a cross-shard all-reduce.
        let mut grads = vec![0.0f32; model.num_params()];
        let mut loss_sum = 0.0;
        for shard in shards {
            loss_sum += shard.loss_sum;
            for (g, s) in grads.iter_mut().zip(&shard.grads) {
                *g += s;
            }
        }
        let scale = 1.0 / rows as f32;
        grads.iter_mut().for_each(|g| *g *= scale);

        Ok(LossAndGrad {
            loss: loss_sum / rows as f64,
            grads,
            model_state: BlobsModelState {
                examples_seen: model_state.examples_seen + rows as u64,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_types::ApError;

    fn workload() -> BlobsWorkload {
        BlobsWorkload::new("blobs_native", Backend::Native).unwrap()
    }

    #[test]
    fn metadata_requires_init() {
        let mut w = workload();
        assert!(matches!(
            w.param_shapes(),
            Err(ApError::Workload(WorkloadError::NotInitialized { what: "param_shapes", .. }))
        ));
        assert!(w.model_params_types().is_err());
        let params = vec![0.0; w.model.num_params()];
        assert!(w
            .eval_model(&params, &BlobsModelState::default(), PrngKey::from_seed(0), None)
            .is_err());

        let (params, _) = w.init_model_fn(PrngKey::from_seed(0)).unwrap();
        assert_eq!(params.len(), 36);
        assert_eq!(w.param_shapes().unwrap()["dense/kernel"], vec![4, 8]);
        assert_eq!(w.model_params_types().unwrap().len(), 36);
    }

    #[test]
    fn spec_without_classes_or_features_is_rejected() {
        for spec in [
            BlobSpec {
                num_classes: 0,
                ..BlobSpec::default()
            },
            BlobSpec {
                num_features: 0,
                ..BlobSpec::default()
            },
            BlobSpec {
                noise_std: f32::NAN,
                ..BlobSpec::default()
            },
        ] {
            let err = workload().with_spec(spec).unwrap_err();
            assert!(err.is_config());
        }

        let spec = BlobSpec {
            num_features: 3,
            num_classes: 5,
            ..BlobSpec::default()
        };
        let mut w = workload().with_spec(spec).unwrap();
        let (params, _) = w.init_model_fn(PrngKey::from_seed(0)).unwrap();
        assert_eq!(params.len(), 5 * 3 + 5);
        assert_eq!(w.param_shapes().unwrap()["dense/kernel"], vec![5, 3]);
        let metrics = w
            .eval_model(&params, &BlobsModelState::default(), PrngKey::from_seed(1), None)
            .unwrap();
        assert!(metrics["validation/accuracy"].is_finite());
    }

    #[test]
    fn init_is_seeded() {
        let mut w = workload();
        let (a, _) = w.init_model_fn(PrngKey::from_seed(1)).unwrap();
        let (b, _) = w.init_model_fn(PrngKey::from_seed(1)).unwrap();
        let (c, _) = w.init_model_fn(PrngKey::from_seed(2)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn queue_rejects_batch_size_zero() {
        let mut w = workload();
        let err = w
            .build_input_queue(PrngKey::from_seed(0), Split::Train, None, 0)
            .unwrap_err();
        assert!(matches!(err, ApError::Workload(WorkloadError::IndivisibleBatch { .. })));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_queue_requires_divisible_batch() {
        let mut w = BlobsWorkload::new("blobs_parallel", Backend::Parallel).unwrap();
        assert_eq!(w.shard_count(), 4);
        assert!(w
            .build_input_queue(PrngKey::from_seed(0), Split::Train, None, 30)
            .is_err());
        assert!(w
            .build_input_queue(PrngKey::from_seed(0), Split::Train, None, 32)
            .is_ok());
    }

    #[cfg(not(feature = "parallel"))]
    #[test]
    fn parallel_backend_is_unavailable() {
        let err = BlobsWorkload::new("blobs_parallel", Backend::Parallel).unwrap_err();
        assert!(matches!(
            err,
            ApError::Workload(WorkloadError::BackendUnavailable { .. })
        ));
    }

    #[test]
    fn eval_reports_every_split() {
        let mut w = workload();
        let (params, state) = w.init_model_fn(PrngKey::from_seed(0)).unwrap();
        let metrics = w.eval_model(&params, &state, PrngKey::from_seed(0), None).unwrap();
        for name in [
            "train/accuracy",
            "train/loss",
            "validation/accuracy",
            "validation/loss",
            "test/accuracy",
            "test/loss",
        ] {
            assert!(metrics.contains_key(name), "{name}");
        }
        let accuracy = metrics["validation/accuracy"];
        assert!((0.0..=1.0).contains(&accuracy));
        assert!(!w.has_reached_goal(&EvalMetrics::from([("validation/accuracy".to_string(), 0.9)])));
        assert!(w.has_reached_goal(&EvalMetrics::from([("validation/accuracy".to_string(), 0.95)])));
    }

    #[test]
    fn loss_fn_agrees_with_gradient_loss() {
        let mut w = workload().with_augmentation(0.0);
        let (params, state) = w.init_model_fn(PrngKey::from_seed(4)).unwrap();
        let mut queue = w
            .build_input_queue(PrngKey::from_seed(4), Split::Train, None, 16)
            .unwrap();
        let (inputs, labels) = queue.next().unwrap();

        let (logits, new_state) = w
            .model_fn(&params, &inputs, &state, ForwardPassMode::Train, PrngKey::from_seed(0), true)
            .unwrap();
        assert_eq!(new_state.examples_seen, 16);
        let per_example = w.loss_fn(&labels, &logits).unwrap();
        let mean = per_example.iter().sum::<f64>() / per_example.len() as f64;

        let lg = w
            .value_and_grad(&params, &state, &inputs, &labels, PrngKey::from_seed(0))
            .unwrap();
        assert!((lg.loss - mean).abs() < 1e-5);
        assert_eq!(lg.model_state.examples_seen, 16);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_gradient_matches_native() {
        let mut native = workload();
        let mut parallel = BlobsWorkload::new("blobs_parallel", Backend::Parallel).unwrap();
        let (params, state) = native.init_model_fn(PrngKey::from_seed(8)).unwrap();
        parallel.init_model_fn(PrngKey::from_seed(8)).unwrap();
        let (inputs, labels) = native
            .build_input_queue(PrngKey::from_seed(8), Split::Train, None, 64)
            .unwrap()
            .next()
            .unwrap();

        let a = native
            .value_and_grad(&params, &state, &inputs, &labels, PrngKey::from_seed(0))
            .unwrap();
        let b = parallel
            .value_and_grad(&params, &state, &inputs, &labels, PrngKey::from_seed(0))
            .unwrap();
        assert!((a.loss - b.loss).abs() < 1e-9);
        for (x, y) in a.grads.iter().zip(&b.grads) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn preprocess_is_seeded_jitter() {
        let mut w = workload();
        let (inputs, labels) = w
            .build_input_queue(PrngKey::from_seed(0), Split::Train, None, 8)
            .unwrap()
            .next()
            .unwrap();
        let seed = PrngKey::from_seed(11);
        let (a, la) = w.preprocess_for_train(inputs.clone(), labels.clone(), seed).unwrap();
        let (b, _) = w.preprocess_for_train(inputs.clone(), labels.clone(), seed).unwrap();
        assert_eq!(a, b);
        assert_eq!(la, labels);
        assert_ne!(a, inputs);
    }
}
