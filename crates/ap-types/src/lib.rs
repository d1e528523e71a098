pub mod errors;
pub mod rng;
pub mod hyperparameters;
pub mod config;
pub mod eval;
pub mod workload;
pub mod submission;

pub use errors::*;
pub use rng::*;
pub use hyperparameters::*;
pub use config::*;
pub use eval::*;
pub use workload::*;
pub use submission::*;
