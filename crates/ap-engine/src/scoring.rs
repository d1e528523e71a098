// Tuning orchestrator: scores a submission on a workload under a tuning ruleset

use ap_optimizer::{
    generate_search_with, HaltonOptions, Score, SearchSpace, Trial, TrialResult, TuningConfig,
    TuningRuleset, TuningStatus,
};
use ap_types::{config_error, ApResult, Hyperparameters, PrngKey, Submission, Workload};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{error, info};

use crate::clock::Clock;
use crate::runner::{train_once, TrainingSummary};

/// Source of per-trial root seeds.
pub trait SeedSource {
    fn next_seed(&mut self) -> i64;
}

/// Seeds from operating-system randomness, a fresh one per trial.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSeedSource;

impl SeedSource for OsSeedSource {
    fn next_seed(&mut self) -> i64 {
        OsRng.next_u64() as i64
    }
}

/// How a submission is to be tuned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningRequest {
    pub ruleset: TuningRuleset,
    /// Search-space JSON file; required under the external ruleset.
    pub search_space: Option<PathBuf>,
    pub num_tuning_trials: usize,
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub halton: HaltonOptions,
}

impl TuningRequest {
    pub fn external(search_space: impl Into<PathBuf>, num_tuning_trials: usize) -> Self {
        Self {
            ruleset: TuningRuleset::External,
            search_space: Some(search_space.into()),
            num_tuning_trials,
            data_dir: None,
            halton: HaltonOptions::default(),
        }
    }

    pub fn self_tuning() -> Self {
        Self {
            ruleset: TuningRuleset::SelfTuning,
            search_space: None,
            num_tuning_trials: 1,
            data_dir: None,
            halton: HaltonOptions::default(),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_halton(mut self, halton: HaltonOptions) -> Self {
        self.halton = halton;
        self
    }

    fn tuning_config(&self, workload: &str, submission: &str) -> TuningConfig {
        let mut config = TuningConfig::new(workload, submission, self.ruleset)
            .with_num_tuning_trials(self.num_tuning_trials);
        if let Some(path) = &self.search_space {
            config = config.with_search_space(path.clone());
        }
        if let Some(dir) = &self.data_dir {
            config = config.with_data_dir(dir.clone());
        }
        config
    }
}

/// One finished trial with everything `train_once` reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial: Trial,
    pub summary: TrainingSummary,
}

/// Outcome of scoring a submission on a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub status: TuningStatus,
    pub score: Score,
    pub trials: Vec<TrialRecord>,
}

/// Score `submission` on `workload` under the request's tuning ruleset.
///
/// External tuning runs one trial per generated setting and keeps the fastest
/// time-to-goal. Self tuning runs one trial with no hyperparameters. An error
/// in any trial aborts scoring.
pub fn score_submission_on_workload<W, S>(
    workload: &mut W,
    submission: &mut S,
    request: &TuningRequest,
    clock: &dyn Clock,
    seeds: &mut dyn SeedSource,
) -> ApResult<ScoreReport>
where
    W: Workload,
    S: Submission<W>,
{
    let settings = match request.ruleset {
        TuningRuleset::External => {
            let path = request.search_space.as_ref().ok_or_else(|| {
                config_error!("Must provide a tuning search space JSON file when using external tuning")
            })?;
            let space = SearchSpace::from_file(path)?;
            generate_search_with(&space, request.num_tuning_trials, request.halton)?
        }
        TuningRuleset::SelfTuning => vec![Hyperparameters::empty()],
    };
    run_trials(workload, submission, request, &settings, clock, seeds)
}

/// Run one trial per setting, in order, and reduce to the best time-to-goal.
pub fn run_trials<W, S>(
    workload: &mut W,
    submission: &mut S,
    request: &TuningRequest,
    settings: &[Hyperparameters],
    clock: &dyn Clock,
    seeds: &mut dyn SeedSource,
) -> ApResult<ScoreReport>
where
    W: Workload,
    S: Submission<W>,
{
    let batch_size = submission.get_batch_size(workload.name())?;
    let config = request.tuning_config(workload.name(), submission.name());
    let mut status = TuningStatus::new(config);
    status.mark_running();
    info!(
        "Scoring {} on {} ({} tuning, {} trials, batch size {})",
        submission.name(),
        workload.name(),
        request.ruleset,
        settings.len(),
        batch_size
    );

    let mut trials = Vec::with_capacity(settings.len());
    for (index, hyperparameters) in settings.iter().enumerate() {
        let number = index + 1;
        let seed = seeds.next_seed();
        let mut trial = Trial::new(status.id, number, hyperparameters.clone(), seed);
        trial.mark_running();
        info!("--- Tuning run {}/{} ---", number, settings.len());

        let summary = match train_once(
            workload,
            batch_size,
            submission,
            hyperparameters,
            PrngKey::from_seed(seed),
            clock,
            request.data_dir.as_deref(),
        ) {
            Ok(summary) => summary,
            Err(e) => {
                error!(
                    tuning_id = %status.id,
                    trial_id = %trial.id,
                    seed = seed,
                    "Tuning trial {} failed, aborting scoring: {}",
                    number,
                    e
                );
                return Err(e);
            }
        };

        let result = TrialResult {
            trial_id: trial.id,
            trial_number: number,
            accumulated_seconds: summary.accumulated_submission_time,
            goal_reached: summary.goal_reached,
            global_step: summary.global_step,
            num_evals: summary.num_evals(),
        };
        info!(
            trial = number,
            seed = seed,
            global_step = summary.global_step,
            evals = summary.num_evals(),
            accumulated = summary.accumulated_submission_time,
            goal_reached = summary.goal_reached,
            "Tuning trial {}/{}: hyperparameters {}",
            number,
            settings.len(),
            hyperparameters
        );
        status.record(&result);
        trial.mark_completed(result);
        trials.push(TrialRecord { trial, summary });
    }

    let score = Score::from_results(trials.iter().filter_map(|r| r.trial.result.as_ref()));
    status.mark_completed();
    info!("Final score for {} on {}: {}", submission.name(), workload.name(), score);
    Ok(ScoreReport {
        status,
        score,
        trials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use ap_workloads::{Backend, BlobsWorkload, SgdMomentum};
    use std::io::Write;

    /// Deterministic seeds for reproducible test runs.
    struct CountingSeeds(i64);

    impl SeedSource for CountingSeeds {
        fn next_seed(&mut self) -> i64 {
            self.0 += 1;
            self.0
        }
    }

    fn workload() -> BlobsWorkload {
        let config = ap_workloads::blobs_config().with_budget(60.0, 0.0);
        BlobsWorkload::new("blobs_native", Backend::Native)
            .unwrap()
            .with_config(config)
    }

    #[test]
    fn os_seeds_differ() {
        let mut seeds = OsSeedSource;
        let drawn: std::collections::HashSet<i64> = (0..8).map(|_| seeds.next_seed()).collect();
        assert!(drawn.len() > 1);
    }

    #[test]
    fn external_tuning_requires_search_space() {
        let mut request = TuningRequest::external("unused.json", 2);
        request.search_space = None;
        let err = score_submission_on_workload(
            &mut workload(),
            &mut SgdMomentum::new(),
            &request,
            &ManualClock::new(),
            &mut CountingSeeds(0),
        )
        .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("search space"));
    }

    #[test]
    fn missing_search_space_file_is_an_error() {
        let request = TuningRequest::external("/nonexistent/space.json", 2);
        assert!(score_submission_on_workload(
            &mut workload(),
            &mut SgdMomentum::new(),
            &request,
            &ManualClock::new(),
            &mut CountingSeeds(0),
        )
        .is_err());
    }

    #[test]
    fn external_tuning_runs_every_generated_setting() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"learning_rate": {{"min": 0.05, "max": 0.2, "scaling": "log"}},
                "max_steps": {{"feasible_points": [500]}}}}"#
        )
        .unwrap();
        let request = TuningRequest::external(file.path(), 3);
        let report = score_submission_on_workload(
            &mut workload(),
            &mut SgdMomentum::new(),
            &request,
            &ManualClock::new(),
            &mut CountingSeeds(100),
        )
        .unwrap();

        assert_eq!(report.trials.len(), 3);
        let seeds: Vec<i64> = report.trials.iter().map(|t| t.trial.seed).collect();
        assert_eq!(seeds, vec![101, 102, 103]);
        assert!(report.trials.iter().all(|t| t.trial.hyperparameters.contains("learning_rate")));
        assert_eq!(report.status.trials_completed, 3);
        assert_eq!(report.status.config.search_space.as_deref(), Some(file.path()));
        assert_eq!(report.status.config.num_tuning_trials, 3);
        // The manual clock never moves, so every successful trial takes zero time.
        assert_eq!(report.score.seconds(), Some(0.0));
    }

    #[test]
    fn self_tuning_runs_one_trial_without_hyperparameters() {
        let report = score_submission_on_workload(
            &mut workload(),
            &mut SgdMomentum::new(),
            &TuningRequest::self_tuning(),
            &ManualClock::new(),
            &mut CountingSeeds(0),
        )
        .unwrap();
        assert_eq!(report.trials.len(), 1);
        assert!(report.trials[0].trial.hyperparameters.is_empty());
        assert_eq!(report.status.config.ruleset, TuningRuleset::SelfTuning);
        assert!(report.status.config.search_space.is_none());
        assert!(!report.score.is_failed());
    }

    #[test]
    fn report_serializes() {
        let report = score_submission_on_workload(
            &mut workload(),
            &mut SgdMomentum::new(),
            &TuningRequest::self_tuning(),
            &ManualClock::new(),
            &mut CountingSeeds(0),
        )
        .unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["score"]["status"], "reached");
        assert_eq!(json["trials"][0]["trial"]["trial_number"], 1);
        assert!(json["trials"][0]["summary"]["eval_results"].is_array());
    }
}
