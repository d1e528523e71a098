//! Compiled-in catalog of loadable workloads.
//!
//! A workload is located by its module path and class name, the way a
//! benchmark configuration names it. The catalog answers three ways: found,
//! no such module, or a module without that class.

use ap_types::ApResult;

use crate::blobs::{Backend, BlobsWorkload};

/// A constructed workload, one variant per workload family.
#[derive(Debug)]
pub enum LoadedWorkload {
    Blobs(BlobsWorkload),
}

impl LoadedWorkload {
    pub fn name(&self) -> &str {
        use ap_types::Workload;
        match self {
            Self::Blobs(w) => w.name(),
        }
    }
}

/// Builds a workload registered under the given key.
pub type WorkloadFactory = fn(&str) -> ApResult<LoadedWorkload>;

#[derive(Clone, Copy)]
pub struct CatalogEntry {
    pub path: &'static str,
    pub class_name: &'static str,
    /// Key the workload is registered under by default.
    pub registry_key: &'static str,
    pub backend: Backend,
    pub factory: WorkloadFactory,
}

impl std::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("path", &self.path)
            .field("class_name", &self.class_name)
            .field("registry_key", &self.registry_key)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

/// Result of resolving a path and class name against a catalog.
#[derive(Debug)]
pub enum Lookup<'a> {
    Found(&'a CatalogEntry),
    UnknownPath,
    UnknownClass { available: Vec<&'static str> },
}

fn blobs_native(key: &str) -> ApResult<LoadedWorkload> {
    BlobsWorkload::new(key, Backend::Native).map(LoadedWorkload::Blobs)
}

fn blobs_parallel(key: &str) -> ApResult<LoadedWorkload> {
    BlobsWorkload::new(key, Backend::Parallel).map(LoadedWorkload::Blobs)
}

/// Every workload this build knows about. Entries whose backend was compiled
/// out stay listed; their factory reports the backend as unavailable.
pub static CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        path: "workloads/blobs/blobs_native/workload",
        class_name: "BlobsWorkload",
        registry_key: "blobs_native",
        backend: Backend::Native,
        factory: blobs_native,
    },
    CatalogEntry {
        path: "workloads/blobs/blobs_parallel/workload",
        class_name: "BlobsWorkload",
        registry_key: "blobs_parallel",
        backend: Backend::Parallel,
        factory: blobs_parallel,
    },
];

/// Resolve `path` and `class_name` in `catalog`.
pub fn lookup<'a>(catalog: &'a [CatalogEntry], path: &str, class_name: &str) -> Lookup<'a> {
    let mut in_module = catalog.iter().filter(|e| e.path == path).peekable();
    if in_module.peek().is_none() {
        return Lookup::UnknownPath;
    }
    let mut available = Vec::new();
    for entry in in_module {
        if entry.class_name == class_name {
            return Lookup::Found(entry);
        }
        available.push(entry.class_name);
    }
    Lookup::UnknownClass { available }
}
