//! A scripted workload and submission whose costs are charged to a shared
//! manual clock, so timing behavior can be asserted exactly.

#![allow(dead_code)]

use ap_engine::ManualClock;
use ap_types::{
    ApResult, EvalMetrics, ForwardPassMode, GoalDirection, Hyperparameters, ParamShapes, PrngKey,
    Split, Submission, SubmissionError, TrainState, UpdateOutcome, UpdateRequest, Workload,
    WorkloadConfig, WorkloadError,
};
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Endless queue of batch indices.
pub struct CountingQueue {
    next: u64,
    first_seed: PrngKey,
}

impl Iterator for CountingQueue {
    type Item = (u64, PrngKey);

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.next;
        self.next += 1;
        Some((batch, self.first_seed))
    }
}

/// Goal is reached once the model has taken `goal_steps` updates. Each
/// evaluation costs `eval_cost` seconds of clock time.
pub struct StepWorkload {
    pub config: WorkloadConfig,
    pub clock: Arc<ManualClock>,
    pub eval_cost: f64,
    pub shards: usize,
    shapes: OnceLock<ParamShapes>,
    types: OnceLock<Vec<&'static str>>,
    /// Data seed of the last train queue built, for reproducibility checks.
    pub last_data_seed: Option<PrngKey>,
    pub init_seeds: Vec<PrngKey>,
}

impl StepWorkload {
    pub fn new(clock: Arc<ManualClock>, goal_steps: f64) -> Self {
        let config = WorkloadConfig::new("validation/steps", goal_steps - 0.5, GoalDirection::Above)
            .with_budget(1_000.0, 0.0);
        Self {
            config,
            clock,
            eval_cost: 0.0,
            shards: 1,
            shapes: OnceLock::new(),
            types: OnceLock::new(),
            last_data_seed: None,
            init_seeds: Vec::new(),
        }
    }

    pub fn with_budget(mut self, max_runtime: f64, eval_period: f64) -> Self {
        self.config = self.config.with_budget(max_runtime, eval_period);
        self
    }

    pub fn with_eval_cost(mut self, seconds: f64) -> Self {
        self.eval_cost = seconds;
        self
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }
}

impl Workload for StepWorkload {
    /// Number of updates applied.
    type Params = u64;
    type ParamTypes = Vec<&'static str>;
    type ModelState = ();
    type Inputs = u64;
    type Labels = PrngKey;
    type Logits = f64;
    type InputQueue = CountingQueue;

    fn name(&self) -> &str {
        "step_counter"
    }

    fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    fn shard_count(&self) -> usize {
        self.shards
    }

    fn build_input_queue(
        &mut self,
        seed: PrngKey,
        _split: Split,
        _data_dir: Option<&Path>,
        global_batch_size: usize,
    ) -> ApResult<CountingQueue> {
        ap_types::check_batch_divisible(self.name(), global_batch_size, self.shards)?;
        self.last_data_seed = Some(seed);
        Ok(CountingQueue {
            next: 0,
            first_seed: seed,
        })
    }

    fn init_model_fn(&mut self, seed: PrngKey) -> ApResult<(u64, ())> {
        self.init_seeds.push(seed);
        self.shapes.get_or_init(|| ParamShapes::from([("count".to_string(), vec![1])]));
        self.types.get_or_init(|| vec!["count"]);
        Ok((0, ()))
    }

    fn param_shapes(&self) -> ApResult<&ParamShapes> {
        self.shapes.get().ok_or_else(|| {
            WorkloadError::NotInitialized {
                workload: self.name().to_string(),
                what: "param_shapes",
            }
            .into()
        })
    }

    fn model_params_types(&self) -> ApResult<&Vec<&'static str>> {
        self.types.get().ok_or_else(|| {
            WorkloadError::NotInitialized {
                workload: self.name().to_string(),
                what: "model_params_types",
            }
            .into()
        })
    }

    fn model_fn(
        &self,
        params: &u64,
        _inputs: &u64,
        _model_state: &(),
        _mode: ForwardPassMode,
        _seed: PrngKey,
        _update_batch_norm: bool,
    ) -> ApResult<(f64, ())> {
        Ok((*params as f64, ()))
    }

    fn loss_fn(&self, _labels: &PrngKey, logits: &f64) -> ApResult<Vec<f64>> {
        Ok(vec![-logits])
    }

    fn eval_model(
        &mut self,
        params: &u64,
        _model_state: &(),
        _seed: PrngKey,
        _data_dir: Option<&Path>,
    ) -> ApResult<EvalMetrics> {
        self.clock.advance(self.eval_cost);
        Ok(EvalMetrics::from([("validation/steps".to_string(), *params as f64)]))
    }
}

/// Charges `step_cost` seconds (hyperparameter, default `default_cost`) per
/// update, optionally declaring completion or failing at a given step.
#[derive(Clone)]
pub struct ScriptedSubmission {
    pub clock: Arc<ManualClock>,
    pub default_cost: f64,
    pub complete_at: Option<u64>,
    pub fail_at: Option<u64>,
    pub seen_steps: Vec<u64>,
    pub seen_eval_counts: Vec<usize>,
}

impl ScriptedSubmission {
    pub fn new(clock: Arc<ManualClock>, default_cost: f64) -> Self {
        Self {
            clock,
            default_cost,
            complete_at: None,
            fail_at: None,
            seen_steps: Vec::new(),
            seen_eval_counts: Vec::new(),
        }
    }
}

impl Submission<StepWorkload> for ScriptedSubmission {
    type OptimizerState = PrngKey;

    fn name(&self) -> &str {
        "scripted"
    }

    fn get_batch_size(&self, _workload_name: &str) -> ApResult<usize> {
        Ok(8)
    }

    fn init_optimizer_state(
        &mut self,
        _workload: &StepWorkload,
        _params: &u64,
        _model_state: &(),
        _hyperparameters: &Hyperparameters,
        seed: PrngKey,
    ) -> ApResult<PrngKey> {
        Ok(seed)
    }

    fn update_params(
        &mut self,
        _workload: &StepWorkload,
        state: TrainState<u64, (), PrngKey>,
        request: UpdateRequest<'_, StepWorkload>,
    ) -> ApResult<UpdateOutcome<u64, (), PrngKey>> {
        let step = request.global_step;
        self.seen_steps.push(step);
        self.seen_eval_counts.push(request.eval_results.len());
        if self.fail_at == Some(step) {
            return Err(SubmissionError::UpdateFailed {
                step,
                message: "scripted failure".to_string(),
            }
            .into());
        }
        self.clock
            .advance(request.hyperparameters.f64_or("step_cost", self.default_cost));
        let state = TrainState {
            params: state.params + 1,
            ..state
        };
        Ok(if self.complete_at == Some(step) {
            UpdateOutcome::Complete(state)
        } else {
            UpdateOutcome::Continue(state)
        })
    }
}
