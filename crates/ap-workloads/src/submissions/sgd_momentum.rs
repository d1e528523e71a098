use ap_types::{
    ApResult, Hyperparameters, PrngKey, Submission, TrainState, UpdateOutcome, UpdateRequest,
};
use tracing::trace;

use super::{check_update, reached_max_steps, reference_batch_size, FlatWorkload, WarmupCosine};
use crate::blobs::ParameterType;

/// Heavy-ball SGD with decoupled weight decay.
///
/// Hyperparameters (all optional): `learning_rate`, `beta1` (momentum),
/// `weight_decay`, `warmup_factor`, `max_steps`.
#[derive(Debug, Clone, Default)]
pub struct SgdMomentum;

#[derive(Debug, Clone, PartialEq)]
pub struct MomentumState {
    pub velocity: Vec<f32>,
    pub schedule: WarmupCosine,
    pub momentum: f32,
    pub weight_decay: f32,
}

impl SgdMomentum {
    pub const DEFAULT_LEARNING_RATE: f64 = 0.1;
    pub const DEFAULT_MOMENTUM: f64 = 0.9;

    pub fn new() -> Self {
        Self
    }
}

impl<W: FlatWorkload> Submission<W> for SgdMomentum {
    type OptimizerState = MomentumState;

    fn name(&self) -> &str {
        "sgd_momentum"
    }

    fn get_batch_size(&self, workload_name: &str) -> ApResult<usize> {
        reference_batch_size("sgd_momentum", workload_name)
    }

    fn init_optimizer_state(
        &mut self,
        workload: &W,
        params: &Vec<f32>,
        _model_state: &W::ModelState,
        hyperparameters: &Hyperparameters,
        _seed: PrngKey,
    ) -> ApResult<MomentumState> {
        Ok(MomentumState {
            velocity: vec![0.0; params.len()],
            schedule: WarmupCosine::from_hyperparameters(
                hyperparameters,
                Self::DEFAULT_LEARNING_RATE,
                workload.config().step_hint,
            ),
            momentum: hyperparameters.f64_or("beta1", Self::DEFAULT_MOMENTUM) as f32,
            weight_decay: hyperparameters.f64_or("weight_decay", 0.0) as f32,
        })
    }

    fn update_params(
        &mut self,
        workload: &W,
        state: TrainState<Vec<f32>, W::ModelState, MomentumState>,
        request: UpdateRequest<'_, W>,
    ) -> ApResult<UpdateOutcome<Vec<f32>, W::ModelState, MomentumState>> {
        let TrainState {
            mut optimizer_state,
            mut params,
            model_state,
        } = state;
        let step = request.global_step;
        let out = workload.value_and_grad(
            &params,
            &model_state,
            &request.inputs,
            &request.labels,
            request.seed,
        )?;
        check_update(step, out.loss, &params, &out.grads)?;

        let lr = optimizer_state.schedule.learning_rate(step) as f32;
        let momentum = optimizer_state.momentum;
        let decay = optimizer_state.weight_decay;
        for (((p, v), g), kind) in params
            .iter_mut()
            .zip(optimizer_state.velocity.iter_mut())
            .zip(&out.grads)
            .zip(request.param_types)
        {
            *v = momentum * *v + g;
            *p -= lr * *v;
            if *kind == ParameterType::Weight {
                *p -= lr * decay * *p;
            }
        }
        trace!("sgd_momentum step {} loss {:.4} lr {:.5}", step, out.loss, lr);

        let state = TrainState {
            optimizer_state,
            params,
            model_state: out.model_state,
        };
        Ok(if reached_max_steps(request.hyperparameters, step) {
            UpdateOutcome::Complete(state)
        } else {
            UpdateOutcome::Continue(state)
        })
    }
}
