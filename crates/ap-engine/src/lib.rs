// AlgoPerf harness engine
// Training control loop, tuning orchestration and the workload registry

pub mod clock;
pub mod config;
pub mod registry;
pub mod runner;
pub mod scoring;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RunnerConfig;
pub use registry::{global_registry, WorkloadRegistry};
pub use runner::{train_once, TrainingEvent, TrainingSummary};
pub use scoring::{
    run_trials, score_submission_on_workload, OsSeedSource, ScoreReport, SeedSource, TrialRecord,
    TuningRequest,
};
