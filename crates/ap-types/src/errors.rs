use thiserror::Error;

/// Main error type for the AlgoPerf harness
#[derive(Error, Debug)]
pub enum ApError {
    #[error("Workload error: {0}")]
    Workload(#[from] WorkloadError),

    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Search space error: {0}")]
    SearchSpace(#[from] SearchSpaceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApError {
    /// Configuration errors are fatal for the whole run and are never retried.
    pub fn is_config(&self) -> bool {
        match self {
            Self::Config(_) | Self::SearchSpace(_) => true,
            Self::Workload(e) => e.is_config(),
            _ => false,
        }
    }
}

/// Workload-related errors
#[derive(Error, Debug)]
pub enum WorkloadError {
    #[error("{what} read before init_model_fn() populated it for workload {workload}")]
    NotInitialized { workload: String, what: &'static str },

    #[error("Backend {backend} is not available in this build")]
    BackendUnavailable { backend: String },

    #[error("Split {split} is not supported by workload {workload}")]
    UnsupportedSplit { workload: String, split: String },

    #[error("Batch size {batch_size} is not divisible by the {shards} shards of workload {workload}")]
    IndivisibleBatch {
        workload: String,
        batch_size: usize,
        shards: usize,
    },

    #[error("Input queue for split {split} is exhausted")]
    QueueExhausted { split: String },

    #[error("Workload execution failed: {message}")]
    Failed { message: String },
}

impl WorkloadError {
    /// True for errors that describe a misconfigured run rather than a crash.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::IndivisibleBatch { .. } | Self::UnsupportedSplit { .. }
        )
    }
}

/// Errors raised by submission code
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Submission {submission} has no batch size for workload {workload}")]
    UnsupportedWorkload { submission: String, workload: String },

    #[error("Missing hyperparameter: {name}")]
    MissingHyperparameter { name: String },

    #[error("Hyperparameter {name} has the wrong type, expected {expected}")]
    HyperparameterType { name: String, expected: &'static str },

    #[error("Submission update failed at step {step}: {message}")]
    UpdateFailed { step: u64, message: String },
}

/// Search-space description errors
#[derive(Error, Debug)]
pub enum SearchSpaceError {
    #[error("Search space is empty")]
    Empty,

    #[error("Requested zero tuning trials")]
    NoTrials,

    #[error("Dimension {name}: {message}")]
    Malformed { name: String, message: String },

    #[error("Search space is not a JSON object")]
    NotAnObject,
}

/// Result type alias for harness operations
pub type ApResult<T> = Result<T, ApError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::ApError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::ApError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = WorkloadError::IndivisibleBatch {
            workload: "blobs_parallel".to_string(),
            batch_size: 30,
            shards: 4,
        };

        assert!(error.to_string().contains("30"));
        assert!(error.to_string().contains("4 shards"));
        assert!(error.is_config());
    }

    #[test]
    fn test_error_conversion() {
        let workload_error = WorkloadError::NotInitialized {
            workload: "blobs_native".to_string(),
            what: "param_shapes",
        };
        let ap_error: ApError = workload_error.into();

        match ap_error {
            ApError::Workload(WorkloadError::NotInitialized { what, .. }) => {
                assert_eq!(what, "param_shapes")
            }
            _ => panic!("Expected Workload error"),
        }
    }

    #[test]
    fn test_workload_config_errors_classify_at_top_level() {
        let indivisible: ApError = WorkloadError::IndivisibleBatch {
            workload: "blobs_parallel".to_string(),
            batch_size: 30,
            shards: 4,
        }
        .into();
        assert!(indivisible.is_config());

        let split: ApError = WorkloadError::UnsupportedSplit {
            workload: "blobs_native".to_string(),
            split: "train".to_string(),
        }
        .into();
        assert!(split.is_config());

        let crash: ApError = WorkloadError::Failed {
            message: "nan in logits".to_string(),
        }
        .into();
        assert!(!crash.is_config());
        let exhausted: ApError = WorkloadError::QueueExhausted {
            split: "train".to_string(),
        }
        .into();
        assert!(!exhausted.is_config());
    }

    #[test]
    fn test_macros() {
        let config_err = config_error!("Missing required field: {}", "min");
        assert!(config_err.is_config());
        let internal_err = internal_error!("Something went wrong");
        assert!(!internal_err.is_config());
    }

    #[test]
    fn search_space_errors_are_config_errors() {
        let err: ApError = SearchSpaceError::Empty.into();
        assert!(err.is_config());
    }
}
