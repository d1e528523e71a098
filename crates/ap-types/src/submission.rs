//! The submission capability interface.

use crate::config::LossType;
use crate::errors::{ApResult, WorkloadError};
use crate::eval::EvalHistory;
use crate::hyperparameters::Hyperparameters;
use crate::rng::PrngKey;
use crate::workload::Workload;

/// Everything a training step owns and replaces wholesale.
#[derive(Debug, Clone)]
pub struct TrainState<P, M, O> {
    pub optimizer_state: O,
    pub params: P,
    pub model_state: M,
}

/// Result of one `update_params` call.
///
/// `Complete` is how a submission declares training finished; it is a normal
/// terminal outcome, not an error.
#[derive(Debug, Clone)]
pub enum UpdateOutcome<P, M, O> {
    Continue(TrainState<P, M, O>),
    Complete(TrainState<P, M, O>),
}

impl<P, M, O> UpdateOutcome<P, M, O> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// Split into the new state and the completion flag.
    pub fn into_parts(self) -> (TrainState<P, M, O>, bool) {
        match self {
            Self::Continue(state) => (state, false),
            Self::Complete(state) => (state, true),
        }
    }
}

/// Borrowed context of one `update_params` call.
pub struct UpdateRequest<'a, W: Workload> {
    pub param_types: &'a W::ParamTypes,
    pub hyperparameters: &'a Hyperparameters,
    pub inputs: W::Inputs,
    pub labels: W::Labels,
    pub loss_type: LossType,
    pub eval_results: &'a EvalHistory,
    pub global_step: u64,
    pub seed: PrngKey,
}

/// Training algorithm under benchmark.
pub trait Submission<W: Workload> {
    type OptimizerState;

    fn name(&self) -> &str;

    /// Global batch size this submission trains `workload_name` with.
    fn get_batch_size(&self, workload_name: &str) -> ApResult<usize>;

    fn init_optimizer_state(
        &mut self,
        workload: &W,
        params: &W::Params,
        model_state: &W::ModelState,
        hyperparameters: &Hyperparameters,
        seed: PrngKey,
    ) -> ApResult<Self::OptimizerState>;

    fn update_params(
        &mut self,
        workload: &W,
        state: TrainState<W::Params, W::ModelState, Self::OptimizerState>,
        request: UpdateRequest<'_, W>,
    ) -> ApResult<UpdateOutcome<W::Params, W::ModelState, Self::OptimizerState>>;

    /// Pick the next raw batch. The default takes batches in queue order.
    #[allow(clippy::too_many_arguments)]
    fn data_selection(
        &mut self,
        _workload: &W,
        input_queue: &mut W::InputQueue,
        _optimizer_state: &Self::OptimizerState,
        _params: &W::Params,
        _hyperparameters: &Hyperparameters,
        _global_step: u64,
        _seed: PrngKey,
    ) -> ApResult<(W::Inputs, W::Labels)> {
        next_batch(input_queue)
    }
}

/// Pull one batch, treating an exhausted queue as an error.
pub fn next_batch<Q, T>(queue: &mut Q) -> ApResult<T>
where
    Q: Iterator<Item = T>,
{
    queue.next().ok_or_else(|| {
        WorkloadError::QueueExhausted {
            split: "train".to_string(),
        }
        .into()
    })
}
