//! Trial tracking and tuning run management.

use ap_types::{config_error, ApError, Hyperparameters};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Unique tuning run identifier.
pub type TuningId = Uuid;

/// Who is responsible for choosing hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningRuleset {
    /// The harness samples settings from a search space and runs one trial each.
    #[serde(rename = "external")]
    External,
    /// The submission tunes itself; the harness runs a single trial.
    #[serde(rename = "self")]
    SelfTuning,
}

impl FromStr for TuningRuleset {
    type Err = ApError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "external" => Ok(Self::External),
            "self" => Ok(Self::SelfTuning),
            other => Err(config_error!(
                "Unknown tuning ruleset `{other}`, expected `external` or `self`"
            )),
        }
    }
}

impl std::fmt::Display for TuningRuleset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::External => f.write_str("external"),
            Self::SelfTuning => f.write_str("self"),
        }
    }
}

/// Top-level configuration for scoring one submission on one workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    pub id: TuningId,
    pub workload: String,
    pub submission: String,
    pub ruleset: TuningRuleset,

    /// Search-space file; required under the external ruleset.
    pub search_space: Option<PathBuf>,

    /// Number of external tuning trials to run.
    pub num_tuning_trials: usize,

    /// Dataset root handed to workloads.
    pub data_dir: Option<PathBuf>,

    pub created_at: DateTime<Utc>,
}

impl TuningConfig {
    pub fn new(workload: &str, submission: &str, ruleset: TuningRuleset) -> Self {
        Self {
            id: Uuid::new_v4(),
            workload: workload.to_string(),
            submission: submission.to_string(),
            ruleset,
            search_space: None,
            num_tuning_trials: 20,
            data_dir: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_search_space(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_space = Some(path.into());
        self
    }

    pub fn with_num_tuning_trials(mut self, n: usize) -> Self {
        self.num_tuning_trials = n;
        self
    }

    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(path.into());
        self
    }
}

/// Lifecycle state for a tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningState {
    Pending,
    Running,
    Completed,
}

/// Aggregate status of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningStatus {
    pub id: TuningId,
    pub config: TuningConfig,
    pub state: TuningState,
    pub trials_completed: usize,
    pub trials_reached_goal: usize,
    pub best_trial: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TuningStatus {
    pub fn new(config: TuningConfig) -> Self {
        Self {
            id: config.id,
            config,
            state: TuningState::Pending,
            trials_completed: 0,
            trials_reached_goal: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = TuningState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = TuningState::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Count a finished trial and keep it if it is the fastest to reach the goal.
    pub fn record(&mut self, result: &TrialResult) {
        self.trials_completed += 1;
        if !result.goal_reached {
            return;
        }
        self.trials_reached_goal += 1;
        let improves = match &self.best_trial {
            None => true,
            Some(best) => result.score_seconds() < best.score_seconds(),
        };
        if improves {
            self.best_trial = Some(result.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial: one hyperparameter setting trained once under one seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub tuning_id: TuningId,
    pub trial_number: usize,
    pub hyperparameters: Hyperparameters,
    pub seed: i64,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Trial {
    pub fn new(
        tuning_id: TuningId,
        trial_number: usize,
        hyperparameters: Hyperparameters,
        seed: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tuning_id,
            trial_number,
            hyperparameters,
            seed,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: TrialResult) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
}

/// Outcome of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    pub trial_number: usize,
    /// Submission-attributable time, evaluation excluded.
    pub accumulated_seconds: f64,
    pub goal_reached: bool,
    pub global_step: u64,
    pub num_evals: usize,
}

impl TrialResult {
    /// Time used for ranking; unbounded for a trial that missed the goal.
    pub fn score_seconds(&self) -> f64 {
        if self.goal_reached {
            self.accumulated_seconds
        } else {
            f64::INFINITY
        }
    }
}

/// Reduced score of a whole tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Score {
    /// Fastest time-to-goal among all trials.
    Reached { seconds: f64, trial_number: usize },
    /// No trial reached the goal.
    Failed,
}

impl Score {
    /// Minimum time-to-goal over `results`.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a TrialResult>) -> Self {
        results
            .into_iter()
            .filter(|r| r.goal_reached)
            .min_by(|a, b| a.score_seconds().total_cmp(&b.score_seconds()))
            .map_or(Score::Failed, |best| Score::Reached {
                seconds: best.accumulated_seconds,
                trial_number: best.trial_number,
            })
    }

    pub fn seconds(&self) -> Option<f64> {
        match self {
            Self::Reached { seconds, .. } => Some(*seconds),
            Self::Failed => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reached { seconds, trial_number } => {
                write!(f, "{seconds:.3}s (trial {trial_number})")
            }
            Self::Failed => f.write_str("failed: no trial reached the goal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(trial_number: usize, seconds: f64, goal_reached: bool) -> TrialResult {
        TrialResult {
            trial_id: Uuid::new_v4(),
            trial_number,
            accumulated_seconds: seconds,
            goal_reached,
            global_step: 100,
            num_evals: 3,
        }
    }

    #[test]
    fn ruleset_parses_and_displays() {
        assert_eq!("external".parse::<TuningRuleset>().unwrap(), TuningRuleset::External);
        assert_eq!("self".parse::<TuningRuleset>().unwrap(), TuningRuleset::SelfTuning);
        assert!("internal".parse::<TuningRuleset>().unwrap_err().is_config());
        assert_eq!(TuningRuleset::SelfTuning.to_string(), "self");
        assert_eq!(
            serde_json::to_string(&TuningRuleset::SelfTuning).unwrap(),
            "\"self\""
        );
    }

    #[test]
    fn score_is_minimum_time_among_successes() {
        let results = vec![result(1, 10.0, true), result(2, 5.0, true), result(3, 8.0, true)];
        assert_eq!(
            Score::from_results(&results),
            Score::Reached {
                seconds: 5.0,
                trial_number: 2
            }
        );
    }

    #[test]
    fn failed_trials_never_win() {
        let results = vec![result(1, 1.0, false), result(2, 9.0, true)];
        assert_eq!(Score::from_results(&results).seconds(), Some(9.0));
        assert_eq!(results[0].score_seconds(), f64::INFINITY);
    }

    #[test]
    fn all_failed_is_total_failure() {
        let results = vec![result(1, 1.0, false), result(2, 2.0, false)];
        let score = Score::from_results(&results);
        assert!(score.is_failed());
        assert_eq!(score.seconds(), None);
        assert!(Score::from_results(&[]).is_failed());
    }

    #[test]
    fn status_tracks_best_trial() {
        let config = TuningConfig::new("blobs_native", "submissions/adamw", TuningRuleset::External)
            .with_num_tuning_trials(3);
        let mut status = TuningStatus::new(config);
        assert_eq!(status.state, TuningState::Pending);
        assert!(status.best_trial.is_none());

        status.mark_running();
        status.record(&result(1, 10.0, true));
        status.record(&result(2, 1.0, false));
        status.record(&result(3, 4.0, true));
        status.mark_completed();

        assert_eq!(status.state, TuningState::Completed);
        assert_eq!(status.trials_completed, 3);
        assert_eq!(status.trials_reached_goal, 2);
        let best = status.best_trial.as_ref().unwrap();
        assert_eq!(best.trial_number, 3);
        assert_eq!(best.score_seconds(), 4.0);
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn config_builders() {
        let config = TuningConfig::new("blobs_native", "adamw", TuningRuleset::External)
            .with_search_space("space.json")
            .with_data_dir("/data");
        assert_eq!(config.search_space, Some(PathBuf::from("space.json")));
        assert_eq!(config.data_dir, Some(PathBuf::from("/data")));
        assert_eq!(config.num_tuning_trials, 20);
    }

    #[test]
    fn trial_lifecycle() {
        let hp = Hyperparameters::empty();
        let mut trial = Trial::new(Uuid::new_v4(), 1, hp, -42);
        assert_eq!(trial.status, TrialStatus::Pending);

        trial.mark_running();
        assert_eq!(trial.status, TrialStatus::Running);
        assert!(trial.started_at.is_some());

        trial.mark_completed(result(1, 3.5, true));
        assert_eq!(trial.status, TrialStatus::Completed);
        assert!(trial.finished_at.is_some());
        assert_eq!(trial.result.as_ref().unwrap().accumulated_seconds, 3.5);
        assert_eq!(trial.seed, -42);
    }

    #[test]
    fn score_serializes_with_status_tag() {
        let json = serde_json::to_value(Score::Failed).unwrap();
        assert_eq!(json, serde_json::json!({"status": "failed"}));
        let reached = Score::Reached {
            seconds: 2.5,
            trial_number: 1,
        };
        let json = serde_json::to_value(reached).unwrap();
        assert_eq!(json["status"], "reached");
        assert_eq!(json["seconds"], 2.5);
    }
}
