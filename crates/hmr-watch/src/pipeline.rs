// SPDX-License-Identifier: Apache-2.0
//! Public entry point for the watch-and-build pipeline (`spec.md` §4.1
//! "Public operations").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use hmr_core::error::HmrError;
use hmr_core::graph::{Criticality, DependencyGraph};
use hmr_core::Fingerprint;

use crate::cache::ArtifactCache;
use crate::scheduler::{BuildScheduler, BuildSpec, JobHandle, Priority};
use crate::watcher::{Watcher, DEFAULT_DEBOUNCE};

/// The kind of source asset a registered vertex represents. `spec.md` §4.1
/// leaves the concrete kinds to the implementer; these are the ones a
/// simulation engine's build graph needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// A compiled code module.
    Module,
    /// A shader source file.
    Shader,
    /// A data/config asset (e.g. JSON, TOML).
    Data,
    /// A texture or other binary media asset.
    Texture,
}

struct RegisteredAsset {
    kind: AssetKind,
    path: PathBuf,
}

/// Ties together the dependency graph, build scheduler, and artifact cache
/// behind the six operations `spec.md` §4.1 names.
pub struct Pipeline {
    graph: RwLock<DependencyGraph>,
    assets: RwLock<HashMap<String, RegisteredAsset>>,
    scheduler: BuildScheduler,
    cache: ArtifactCache,
    watcher: RwLock<Option<Watcher>>,
    watched_roots: RwLock<Vec<PathBuf>>,
}

impl Pipeline {
    /// Construct a pipeline backed by `config`, starting a scheduler with a
    /// worker-count default of the number of performance cores.
    #[must_use]
    pub fn new(config: &hmr_core::HmrConfig, worker_count: Option<usize>) -> Self {
        Self {
            graph: RwLock::new(DependencyGraph::new()),
            assets: RwLock::new(HashMap::new()),
            scheduler: BuildScheduler::start(worker_count),
            cache: ArtifactCache::new(config),
            watcher: RwLock::new(None),
            watched_roots: RwLock::new(Vec::new()),
        }
    }

    /// Register a source asset as a dependency-graph vertex.
    ///
    /// # Errors
    /// Returns [`HmrError::InvalidArgument`] if `identifier` is empty, or a
    /// pre-existing-vertex error if `identifier` is already registered.
    pub fn register_asset(
        &self,
        identifier: &str,
        kind: AssetKind,
        path: PathBuf,
    ) -> Result<(), HmrError> {
        if identifier.is_empty() {
            return Err(HmrError::InvalidArgument("asset identifier is empty".into()));
        }
        let mut graph = self.graph.write();
        if !graph.add_vertex(identifier) {
            return Err(HmrError::InvalidArgument(format!(
                "asset {identifier} already registered"
            )));
        }
        self.assets
            .write()
            .insert(identifier.to_string(), RegisteredAsset { kind, path });
        debug!(identifier, ?kind, "registered asset");
        Ok(())
    }

    /// Declare that `source`'s build or correctness requires `dep`.
    ///
    /// # Errors
    /// Returns [`HmrError::WouldCreateCycle`] if the edge would close a
    /// cycle, or [`HmrError::NotFound`] if either vertex is unregistered.
    pub fn add_dependency(&self, source: &str, dep: &str, critical: bool) -> Result<(), HmrError> {
        let criticality = if critical {
            Criticality::Hard
        } else {
            Criticality::Soft
        };
        self.graph.write().add_edge(source, dep, criticality, 1.0)
    }

    /// Begin ingesting filesystem events for `root`.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if the watch backend fails to start or the
    /// path cannot be watched.
    pub fn start_watching(&self, root: &Path) -> Result<(), HmrError> {
        let mut guard = self.watcher.write();
        if guard.is_none() {
            *guard = Some(Watcher::new(DEFAULT_DEBOUNCE)?);
        }
        if let Some(watcher) = guard.as_mut() {
            watcher.start_watching(root)?;
        }
        self.watched_roots.write().push(root.to_path_buf());
        info!(root = %root.display(), "started watching");
        Ok(())
    }

    /// Stop ingesting filesystem events for every watched root.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if any watched path cannot be unwatched.
    pub fn stop_watching(&self) -> Result<(), HmrError> {
        let mut guard = self.watcher.write();
        if let Some(watcher) = guard.as_mut() {
            for root in self.watched_roots.read().iter() {
                watcher.stop_watching(root)?;
            }
        }
        *guard = None;
        self.watched_roots.write().clear();
        Ok(())
    }

    /// Enqueue a build for `identifier` at `priority`, returning a handle
    /// the caller can wait on. `build_fn` performs the actual compilation
    /// and is run on a worker thread; it may be called again with backoff
    /// if it reports a transient failure, so it must be safely repeatable.
    pub fn request_build(
        &self,
        fingerprint: Fingerprint,
        priority: Priority,
        build_fn: impl Fn() -> crate::scheduler::BuildOutcome + Send + Sync + 'static,
    ) -> JobHandle {
        self.scheduler.request_build(BuildSpec {
            fingerprint,
            priority,
            run: Box::new(build_fn),
        })
    }

    /// Look up a cached artifact.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] or [`HmrError::InvalidArtifactHeader`] if
    /// the on-disk tier exists but is unreadable or corrupt.
    pub fn lookup_artifact(
        &self,
        fingerprint: Fingerprint,
    ) -> Result<Option<(hmr_core::Artifact, bool)>, HmrError> {
        self.cache.lookup(fingerprint)
    }

    /// Pin an artifact against eviction while a reload transaction
    /// references it.
    pub fn pin_artifact(&self, fingerprint: Fingerprint) {
        self.cache.pin(fingerprint);
    }

    /// Release a pin taken by [`Pipeline::pin_artifact`].
    pub fn unpin_artifact(&self, fingerprint: Fingerprint) {
        self.cache.unpin(fingerprint);
    }

    /// Insert a freshly built artifact into the cache.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if the on-disk write fails.
    pub fn cache_artifact(
        &self,
        artifact: hmr_core::Artifact,
        header: &hmr_core::ArtifactHeader,
        dependencies: Vec<crate::cache::DependencySnapshot>,
    ) -> Result<(), HmrError> {
        self.cache.insert(artifact, header, dependencies)
    }

    /// Returns the minimal, dependency-respecting sequence of identifiers
    /// that must be rebuilt and reloaded after `changed_identifier`
    /// changes: the changed asset first, every dependent following in
    /// topological order (`spec.md` §4.1, scenario S2).
    #[must_use]
    pub fn compute_reload_order(&self, changed_identifier: &str) -> Vec<String> {
        self.graph.read().reload_order_from(changed_identifier)
    }

    /// Drain and return filesystem events that have cleared their debounce
    /// window, without blocking beyond `timeout`.
    #[must_use]
    pub fn poll_events(&self, timeout: Duration) -> Vec<crate::watcher::WatchEvent> {
        let guard = self.watcher.read();
        let Some(watcher) = guard.as_ref() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let deadline = std::time::Instant::now() + timeout;
        while let Ok(event) = watcher.events().recv_deadline(deadline) {
            out.push(event);
        }
        out
    }

    /// Current lifecycle state of a build job, if still tracked.
    #[must_use]
    pub fn job_state(&self, id: crate::scheduler::JobId) -> Option<crate::scheduler::JobState> {
        self.scheduler.job_state(id)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(err) = self.stop_watching() {
            warn!(%err, "failed to stop watching during pipeline shutdown");
        }
    }
}
