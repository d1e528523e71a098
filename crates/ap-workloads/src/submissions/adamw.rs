use ap_types::{
    ApResult, Hyperparameters, PrngKey, Submission, TrainState, UpdateOutcome, UpdateRequest,
};
use tracing::trace;

use super::{check_update, reached_max_steps, reference_batch_size, FlatWorkload, WarmupCosine};
use crate::blobs::ParameterType;

/// Adam with decoupled weight decay.
///
/// Hyperparameters (all optional): `learning_rate`, `beta1`, `beta2`,
/// `epsilon`, `weight_decay`, `warmup_factor`, `max_steps`. A search space
/// may give `one_minus_beta1` instead of `beta1`.
#[derive(Debug, Clone, Default)]
pub struct AdamW;

#[derive(Debug, Clone, PartialEq)]
pub struct AdamWState {
    pub first_moment: Vec<f32>,
    pub second_moment: Vec<f32>,
    pub count: u64,
    pub schedule: WarmupCosine,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
}

impl AdamW {
    pub const DEFAULT_LEARNING_RATE: f64 = 1e-2;

    pub fn new() -> Self {
        Self
    }
}

fn beta1(hyperparameters: &Hyperparameters) -> f64 {
    match hyperparameters.get("one_minus_beta1").and_then(|v| v.as_f64()) {
        Some(one_minus) => 1.0 - one_minus,
        None => hyperparameters.f64_or("beta1", 0.9),
    }
}

impl<W: FlatWorkload> Submission<W> for AdamW {
    type OptimizerState = AdamWState;

    fn name(&self) -> &str {
        "adamw"
    }

    fn get_batch_size(&self, workload_name: &str) -> ApResult<usize> {
        reference_batch_size("adamw", workload_name)
    }

    fn init_optimizer_state(
        &mut self,
        workload: &W,
        params: &Vec<f32>,
        _model_state: &W::ModelState,
        hyperparameters: &Hyperparameters,
        _seed: PrngKey,
    ) -> ApResult<AdamWState> {
        Ok(AdamWState {
            first_moment: vec![0.0; params.len()],
            second_moment: vec![0.0; params.len()],
            count: 0,
            schedule: WarmupCosine::from_hyperparameters(
                hyperparameters,
                Self::DEFAULT_LEARNING_RATE,
                workload.config().step_hint,
            ),
            beta1: beta1(hyperparameters),
            beta2: hyperparameters.f64_or("beta2", 0.999),
            epsilon: hyperparameters.f64_or("epsilon", 1e-8),
            weight_decay: hyperparameters.f64_or("weight_decay", 0.0),
        })
    }

    fn update_params(
        &mut self,
        workload: &W,
        state: TrainState<Vec<f32>, W::ModelState, AdamWState>,
        request: UpdateRequest<'_, W>,
    ) -> ApResult<UpdateOutcome<Vec<f32>, W::ModelState, AdamWState>> {
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

        let opt = &mut optimizer_state;
        opt.count += 1;
        let lr = opt.schedule.learning_rate(step);
        let (b1, b2) = (opt.beta1, opt.beta2);
        let bias1 = 1.0 - b1.powi(opt.count as i32);
        let bias2 = 1.0 - b2.powi(opt.count as i32);
        for i in 0..params.len() {
            let g = out.grads[i] as f64;
            let m = b1 * opt.first_moment[i] as f64 + (1.0 - b1) * g;
            let v = b2 * opt.second_moment[i] as f64 + (1.0 - b2) * g * g;
            opt.first_moment[i] = m as f32;
            opt.second_moment[i] = v as f32;

            let mut delta = (m / bias1) / ((v / bias2).sqrt() + opt.epsilon);
            if request.param_types[i] == ParameterType::Weight {
                delta += opt.weight_decay * params[i] as f64;
            }
            params[i] -= (lr * delta) as f32;
        }
        trace!("adamw step {} loss {:.4} lr {:.5}", step, out.loss, lr);

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
