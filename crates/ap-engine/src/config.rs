// Runner configuration: JSON file, then ALGOPERF_* environment, then CLI flags

use ap_optimizer::{HaltonOptions, TuningRuleset};
use ap_types::{config_error, ApResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::scoring::TuningRequest;

pub const ENV_DATA_DIR: &str = "ALGOPERF_DATA_DIR";
pub const ENV_SEARCH_SKIP: &str = "ALGOPERF_SEARCH_SKIP";

/// Everything the submission runner needs to score one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Registry key of the workload to run.
    pub workload: String,
    pub submission_path: String,
    pub tuning_ruleset: TuningRuleset,
    pub tuning_search_space: Option<PathBuf>,
    pub num_tuning_trials: usize,
    pub data_dir: Option<PathBuf>,
    /// Leading Halton points to discard.
    pub search_skip: u64,
    /// Where to write the JSON score report.
    pub report_json: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workload: "blobs_native".to_string(),
            submission_path: "submissions/adamw".to_string(),
            tuning_ruleset: TuningRuleset::External,
            tuning_search_space: None,
            num_tuning_trials: 20,
            data_dir: None,
            search_skip: HaltonOptions::default().skip,
            report_json: None,
        }
    }
}

impl RunnerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> ApResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        debug!("Loaded runner config from {}", path.display());
        Ok(config)
    }

    /// Apply `ALGOPERF_*` overrides from the process environment.
    pub fn with_env(self) -> ApResult<Self> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    pub fn with_env_from(mut self, var: impl Fn(&str) -> Option<String>) -> ApResult<Self> {
        if let Some(dir) = var(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(skip) = var(ENV_SEARCH_SKIP) {
            self.search_skip = skip
                .trim()
                .parse()
                .map_err(|e| config_error!("{}={} is not a step count: {}", ENV_SEARCH_SKIP, skip, e))?;
        }
        Ok(self)
    }

    pub fn with_workload(mut self, workload: impl Into<String>) -> Self {
        self.workload = workload.into();
        self
    }

    pub fn with_submission_path(mut self, path: impl Into<String>) -> Self {
        self.submission_path = path.into();
        self
    }

    pub fn with_tuning_ruleset(mut self, ruleset: TuningRuleset) -> Self {
        self.tuning_ruleset = ruleset;
        self
    }

    pub fn with_search_space(mut self, path: impl Into<PathBuf>) -> Self {
        self.tuning_search_space = Some(path.into());
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

    pub fn with_report_json(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_json = Some(path.into());
        self
    }

    pub fn validate(&self) -> ApResult<()> {
        if self.workload.is_empty() {
            return Err(config_error!("No workload given"));
        }
        if self.submission_path.is_empty() {
            return Err(config_error!("No submission path given"));
        }
        if self.tuning_ruleset == TuningRuleset::External {
            if self.tuning_search_space.is_none() {
                return Err(config_error!(
                    "Must provide a tuning search space JSON file when using external tuning"
                ));
            }
            if self.num_tuning_trials == 0 {
                return Err(config_error!("num_tuning_trials must be at least 1"));
            }
        }
        Ok(())
    }

    pub fn tuning_request(&self) -> TuningRequest {
        TuningRequest {
            ruleset: self.tuning_ruleset,
            search_space: self.tuning_search_space.clone(),
            num_tuning_trials: self.num_tuning_trials,
            data_dir: self.data_dir.clone(),
            halton: HaltonOptions {
                skip: self.search_skip,
                ..HaltonOptions::default()
            },
        }
    }
}
