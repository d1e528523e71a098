//! # ap-optimizer
//!
//! Hyperparameter search generation and tuning-trial bookkeeping.
//!
//! Provides the search-space model and its JSON file format, the Halton
//! quasi-random generator behind [`generate_search`], and the trial, status and
//! score types the tuning orchestrator records.

mod search;
mod trial;

pub use search::{
    generate_search, generate_search_with, HaltonOptions, HaltonSearch, ParameterDef,
    ParameterKind, SearchSpace, SearchStrategy,
};
pub use trial::{
    Score, Trial, TrialResult, TrialStatus, TuningConfig, TuningId, TuningRuleset, TuningState,
    TuningStatus,
};
