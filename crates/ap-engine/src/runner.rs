// Training control loop: one full training attempt of a submission on a workload

use ap_types::{
    format_metrics, ApResult, EvalHistory, EvalMetrics, Hyperparameters, PrngKey, Split,
    Submission, TrainState, UpdateRequest, Workload,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::clock::Clock;

/// Outcome of one call to [`train_once`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// Seconds spent in data selection, preprocessing and parameter updates.
    pub accumulated_submission_time: f64,
    pub eval_results: EvalHistory,
    pub global_step: u64,
    pub goal_reached: bool,
    pub is_time_remaining: bool,
    pub training_complete: bool,
}

impl TrainingSummary {
    /// Time-to-goal, or infinity when the goal was never reached.
    pub fn score_seconds(&self) -> f64 {
        if self.goal_reached {
            self.accumulated_submission_time
        } else {
            f64::INFINITY
        }
    }

    pub fn num_evals(&self) -> usize {
        self.eval_results.len()
    }
}

/// Milestones of a training attempt, logged with structured fields.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent<'a> {
    Started {
        workload: &'a str,
        submission: &'a str,
        batch_size: usize,
        seed: PrngKey,
    },
    Evaluated {
        elapsed: f64,
        accumulated: f64,
        global_step: u64,
        metrics: &'a EvalMetrics,
    },
    Finished {
        workload: &'a str,
        summary: &'a TrainingSummary,
    },
}

impl TrainingEvent<'_> {
    pub fn emit(&self) {
        match self {
            Self::Started {
                workload,
                submission,
                batch_size,
                seed,
            } => info!(
                workload = *workload,
                submission = *submission,
                batch_size = *batch_size,
                seed = %seed,
                "Starting training"
            ),
            Self::Evaluated {
                elapsed,
                accumulated,
                global_step,
                metrics,
            } => info!(
                elapsed = *elapsed,
                accumulated = *accumulated,
                global_step = *global_step,
                "{:.2}s\t{}\t{}",
                elapsed,
                global_step,
                format_metrics(metrics)
            ),
            Self::Finished { workload, summary } => info!(
                workload = *workload,
                global_step = summary.global_step,
                accumulated = summary.accumulated_submission_time,
                evals = summary.num_evals(),
                goal_reached = summary.goal_reached,
                training_complete = summary.training_complete,
                "Training finished"
            ),
        }
    }
}

/// Train `submission` on `workload` once, until the goal is reached, the time
/// budget is spent, or the submission declares itself complete.
///
/// Only data selection, preprocessing and `update_params` are timed.
/// Evaluations run between steps off the clock. A step that overruns the
/// budget is noticed after it returns.
pub fn train_once<W, S>(
    workload: &mut W,
    batch_size: usize,
    submission: &mut S,
    hyperparameters: &Hyperparameters,
    rng: PrngKey,
    clock: &dyn Clock,
    data_dir: Option<&Path>,
) -> ApResult<TrainingSummary>
where
    W: Workload,
    S: Submission<W>,
{
    TrainingEvent::Started {
        workload: workload.name(),
        submission: submission.name(),
        batch_size,
        seed: rng,
    }
    .emit();

    let [data_rng, opt_init_rng, model_init_rng, loop_rng] = rng.split4();

    // Workload setup.
    let mut input_queue = workload.build_input_queue(data_rng, Split::Train, data_dir, batch_size)?;
    let (params, model_state) = workload.init_model_fn(model_init_rng)?;
    let optimizer_state = submission.init_optimizer_state(
        workload,
        &params,
        &model_state,
        hyperparameters,
        opt_init_rng,
    )?;
    let mut state = TrainState {
        optimizer_state,
        params,
        model_state,
    };

    let max_runtime = workload.config().max_allowed_runtime_sec;
    let eval_period = workload.config().eval_period_time_sec;
    let loss_type = workload.loss_type();

    let mut goal_reached = false;
    let mut is_time_remaining = true;
    let mut training_complete = false;
    let mut last_eval_time: Option<f64> = None;
    let mut accumulated_submission_time = 0.0;
    let mut eval_results = EvalHistory::new();
    let mut global_step: u64 = 0;
    let global_start_time = clock.now();

    while is_time_remaining && !goal_reached && !training_complete {
        let [data_select_rng, preprocess_rng, update_rng, eval_rng] =
            loop_rng.fold_in(global_step).split4();
        let start_time = clock.now();

        let (inputs, labels) = submission.data_selection(
            workload,
            &mut input_queue,
            &state.optimizer_state,
            &state.params,
            hyperparameters,
            global_step,
            data_select_rng,
        )?;
        let (inputs, labels) = workload.preprocess_for_train(inputs, labels, preprocess_rng)?;
        let request = UpdateRequest {
            param_types: workload.model_params_types()?,
            hyperparameters,
            inputs,
            labels,
            loss_type,
            eval_results: &eval_results,
            global_step,
            seed: update_rng,
        };
        let (next_state, complete) = submission
            .update_params(workload, state, request)?
            .into_parts();
        state = next_state;
        training_complete = complete;
        global_step += 1;

        let current_time = clock.now();
        accumulated_submission_time += current_time - start_time;
        is_time_remaining = accumulated_submission_time < max_runtime;
        debug!(
            "Step {} took {:.4}s, {:.3}s accumulated",
            global_step,
            current_time - start_time,
            accumulated_submission_time
        );

        // Untimed evaluation.
        let eval_due = last_eval_time.map_or(true, |last| current_time - last >= eval_period);
        if eval_due || training_complete {
            let metrics = workload.eval_model(&state.params, &state.model_state, eval_rng, data_dir)?;
            TrainingEvent::Evaluated {
                elapsed: current_time - global_start_time,
                accumulated: accumulated_submission_time,
                global_step,
                metrics: &metrics,
            }
            .emit();
            last_eval_time = Some(current_time);
            goal_reached = workload.has_reached_goal(&metrics);
            eval_results.push(global_step, metrics);
        }
    }

    let summary = TrainingSummary {
        accumulated_submission_time,
        eval_results,
        global_step,
        goal_reached,
        is_time_remaining,
        training_complete,
    };
    TrainingEvent::Finished {
        workload: workload.name(),
        summary: &summary,
    }
    .emit();
    Ok(summary)
}
