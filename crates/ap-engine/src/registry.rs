// Process-wide workload registry

use ap_types::{config_error, ApError, ApResult, Submission, WorkloadError};
use ap_workloads::{
    lookup, AdamW, CatalogEntry, FlatWorkload, LoadedWorkload, Lookup, SgdMomentum, ADAMW_PATH,
    CATALOG, SGD_MOMENTUM_PATH,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::scoring::{score_submission_on_workload, ScoreReport, SeedSource, TuningRequest};

/// Scores one submission type on workload `W`.
type ScoreFn<W> =
    fn(&mut W, &TuningRequest, &dyn Clock, &mut dyn SeedSource) -> ApResult<ScoreReport>;

fn score_with<W, S>(
    workload: &mut W,
    request: &TuningRequest,
    clock: &dyn Clock,
    seeds: &mut dyn SeedSource,
) -> ApResult<ScoreReport>
where
    W: ap_types::Workload,
    S: Submission<W> + Default,
{
    let mut submission = S::default();
    score_submission_on_workload(workload, &mut submission, request, clock, seeds)
}

/// Submissions that can train a flat-parameter workload, by path.
fn reference_submissions<W: FlatWorkload>() -> BTreeMap<&'static str, ScoreFn<W>> {
    let mut table: BTreeMap<&'static str, ScoreFn<W>> = BTreeMap::new();
    table.insert(SGD_MOMENTUM_PATH, score_with::<W, SgdMomentum>);
    table.insert(ADAMW_PATH, score_with::<W, AdamW>);
    table
}

/// A registered workload with its type erased.
trait RegisteredWorkload: Send {
    fn submission_paths(&self) -> Vec<&'static str>;

    fn score(
        &mut self,
        submission_path: &str,
        request: &TuningRequest,
        clock: &dyn Clock,
        seeds: &mut dyn SeedSource,
    ) -> ApResult<ScoreReport>;
}

struct Entry<W> {
    workload: W,
    submissions: BTreeMap<&'static str, ScoreFn<W>>,
}

impl<W: Send> RegisteredWorkload for Entry<W> {
    fn submission_paths(&self) -> Vec<&'static str> {
        self.submissions.keys().copied().collect()
    }

    fn score(
        &mut self,
        submission_path: &str,
        request: &TuningRequest,
        clock: &dyn Clock,
        seeds: &mut dyn SeedSource,
    ) -> ApResult<ScoreReport> {
        let score = *self.submissions.get(submission_path).ok_or_else(|| {
            config_error!(
                "Unknown submission {}, available: {}",
                submission_path,
                self.submission_paths().join(", ")
            )
        })?;
        score(&mut self.workload, request, clock, seeds)
    }
}

fn erase(loaded: LoadedWorkload) -> Box<dyn RegisteredWorkload> {
    match loaded {
        LoadedWorkload::Blobs(workload) => Box::new(Entry {
            workload,
            submissions: reference_submissions(),
        }),
    }
}

/// Workloads by registry key, one instance each.
///
/// Each instance sits behind its own mutex, held for the whole of a scoring
/// run, so trials on one workload never interleave.
pub struct WorkloadRegistry {
    catalog: &'static [CatalogEntry],
    entries: BTreeMap<String, Mutex<Box<dyn RegisteredWorkload>>>,
}

impl std::fmt::Debug for WorkloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadRegistry")
            .field("catalog", &self.catalog.len())
            .field("workloads", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for WorkloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self::with_catalog(CATALOG)
    }

    pub fn with_catalog(catalog: &'static [CatalogEntry]) -> Self {
        Self {
            catalog,
            entries: BTreeMap::new(),
        }
    }

    /// Load the workload `class_name` from module `path` under `registry_key`.
    ///
    /// A missing module or a backend this build lacks is logged and skipped.
    /// A module without `class_name` is a configuration error. Importing a key
    /// that is already registered does nothing.
    pub fn import_workload(&mut self, path: &str, registry_key: &str, class_name: &str) -> ApResult<()> {
        if self.entries.contains_key(registry_key) {
            debug!("Workload {} already registered", registry_key);
            return Ok(());
        }
        let entry = match lookup(self.catalog, path, class_name) {
            Lookup::Found(entry) => entry,
            Lookup::UnknownPath => {
                warn!("Could not import workload module {}, continuing", path);
                return Ok(());
            }
            Lookup::UnknownClass { available } => {
                return Err(config_error!(
                    "Could not find member {} in {}; module defines: {}",
                    class_name,
                    path,
                    available.join(", ")
                ));
            }
        };
        let loaded = match (entry.factory)(registry_key) {
            Ok(loaded) => loaded,
            Err(ApError::Workload(WorkloadError::BackendUnavailable { backend })) => {
                warn!(
                    "Skipping workload {}: backend {} is not available in this build",
                    registry_key, backend
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        info!("Registered workload {} from {}", registry_key, path);
        self.entries
            .insert(registry_key.to_string(), Mutex::new(erase(loaded)));
        Ok(())
    }

    /// Import every catalog entry under its default key.
    pub fn register_default_workloads(&mut self) -> ApResult<()> {
        for entry in self.catalog {
            self.import_workload(entry.path, entry.registry_key, entry.class_name)?;
        }
        Ok(())
    }

    pub fn contains(&self, registry_key: &str) -> bool {
        self.entries.contains_key(registry_key)
    }

    pub fn workload_names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn submission_paths(&self, registry_key: &str) -> ApResult<Vec<&'static str>> {
        Ok(self.entry(registry_key)?.lock().submission_paths())
    }

    fn entry(&self, registry_key: &str) -> ApResult<&Mutex<Box<dyn RegisteredWorkload>>> {
        self.entries.get(registry_key).ok_or_else(|| {
            config_error!(
                "Unknown workload {}, available: {}",
                registry_key,
                self.workload_names().join(", ")
            )
        })
    }

    /// Score the submission at `submission_path` on the registered workload.
    pub fn score(
        &self,
        registry_key: &str,
        submission_path: &str,
        request: &TuningRequest,
        clock: &dyn Clock,
        seeds: &mut dyn SeedSource,
    ) -> ApResult<ScoreReport> {
        let mut workload = self.entry(registry_key)?.lock();
        workload.score(submission_path, request, clock, seeds)
    }
}

/// The process-wide registry, with the default workloads imported on first
/// use.
pub fn global_registry() -> &'static RwLock<WorkloadRegistry> {
    static REGISTRY: OnceLock<RwLock<WorkloadRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = WorkloadRegistry::new();
        if let Err(e) = registry.register_default_workloads() {
            warn!("Default workload registration failed: {}", e);
        }
        RwLock::new(registry)
    })
}
