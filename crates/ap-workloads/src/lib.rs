//! Concrete workloads and submissions for the AlgoPerf harness.
//!
//! The harness core only sees the `Workload` and `Submission` traits; this
//! crate supplies the implementations it can load by name.

pub mod blobs;
pub mod catalog;
pub mod submissions;

pub use blobs::{blobs_config, Backend, BlobsModelState, BlobsWorkload, ParameterType};
pub use catalog::{lookup, CatalogEntry, LoadedWorkload, Lookup, WorkloadFactory, CATALOG};
pub use submissions::{AdamW, FlatWorkload, SgdMomentum, ADAMW_PATH, SGD_MOMENTUM_PATH};
