//! Reference submissions.
//!
//! Both optimizers work on any workload whose parameters are a flat `f32`
//! vector with per-scalar [`ParameterType`] metadata and that can compute its
//! own gradients.

mod adamw;
mod schedule;
mod sgd_momentum;

pub use adamw::{AdamW, AdamWState};
pub use schedule::WarmupCosine;
pub use sgd_momentum::{MomentumState, SgdMomentum};

use ap_types::{ApResult, GradientWorkload, Hyperparameters, SubmissionError};

use crate::blobs::ParameterType;

/// Registry path of the SGD-with-momentum submission.
pub const SGD_MOMENTUM_PATH: &str = "submissions/sgd_momentum";
/// Registry path of the AdamW submission.
pub const ADAMW_PATH: &str = "submissions/adamw";

/// Workloads the reference submissions can train.
pub trait FlatWorkload: GradientWorkload<Params = Vec<f32>, ParamTypes = Vec<ParameterType>> {}

impl<W> FlatWorkload for W where W: GradientWorkload<Params = Vec<f32>, ParamTypes = Vec<ParameterType>> {}

/// Global batch size of the reference submissions.
pub(crate) fn reference_batch_size(submission: &str, workload_name: &str) -> ApResult<usize> {
    if workload_name.starts_with("blobs") {
        Ok(128)
    } else {
        Err(SubmissionError::UnsupportedWorkload {
            submission: submission.to_string(),
            workload: workload_name.to_string(),
        }
        .into())
    }
}

/// Optional step cap: a submission declares training complete once it has
/// taken `max_steps` updates.
pub(crate) fn reached_max_steps(hyperparameters: &Hyperparameters, global_step: u64) -> bool {
    hyperparameters
        .get("max_steps")
        .and_then(|v| v.as_f64())
        .is_some_and(|max| (global_step + 1) as f64 >= max)
}

pub(crate) fn check_update(step: u64, loss: f64, params: &[f32], grads: &[f32]) -> ApResult<()> {
    if grads.len() != params.len() {
        return Err(SubmissionError::UpdateFailed {
            step,
            message: format!("{} gradients for {} parameters", grads.len(), params.len()),
        }
        .into());
    }
    if !loss.is_finite() {
        return Err(SubmissionError::UpdateFailed {
            step,
            message: format!("training loss diverged to {loss}"),
        }
        .into());
    }
    Ok(())
}
