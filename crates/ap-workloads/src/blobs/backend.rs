use ap_types::{ApResult, WorkloadError};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Execution backend of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Single shard on the calling thread.
    Native,
    /// Data-parallel shards on the rayon pool.
    Parallel,
}

impl Backend {
    pub const PARALLEL_SHARDS: usize = 4;

    pub fn name(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Parallel => "parallel",
        }
    }

    pub fn shard_count(self) -> usize {
        match self {
            Self::Native => 1,
            Self::Parallel => Self::PARALLEL_SHARDS,
        }
    }

    /// Whether this build was compiled with the backend.
    pub fn is_available(self) -> bool {
        match self {
            Self::Native => true,
            Self::Parallel => cfg!(feature = "parallel"),
        }
    }

    pub fn ensure_available(self) -> ApResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(WorkloadError::BackendUnavailable {
                backend: self.name().to_string(),
            }
            .into())
        }
    }

    /// Contiguous row ranges, one per shard. Shards past the last row are
    /// dropped, so a short final eval batch may use fewer shards.
    pub fn shard_ranges(self, rows: usize) -> Vec<Range<usize>> {
        let shards = self.shard_count();
        let chunk = rows.div_ceil(shards).max(1);
        (0..shards)
            .map(|s| (s * chunk).min(rows)..((s + 1) * chunk).min(rows))
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// Run `f` once per shard and return the per-shard results in order.
    pub fn map_shards<T, F>(self, rows: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Range<usize>) -> T + Send + Sync,
    {
        let ranges = self.shard_ranges(rows);
        match self {
            Self::Native => ranges.into_iter().map(f).collect(),
            Self::Parallel => {
                #[cfg(feature = "parallel")]
                {
                    use rayon::prelude::*;
                    ranges.into_par_iter().map(f).collect()
                }
                #[cfg(not(feature = "parallel"))]
                {
                    ranges.into_iter().map(f).collect()
                }
            }
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
