// SPDX-License-Identifier: Apache-2.0
//! Frame-Budgeted Runtime Integrator: the cooperative, single-threaded,
//! non-blocking entry point a host's frame loop calls once per frame
//! (`spec.md` §4.3 "Public operations").

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use hmr_reload::{ReloadEngine, TxId};
use hmr_watch::scheduler::JobHandle;

use crate::budget::{AdaptiveBudgeter, FrameBudgetConfig};

/// Outcome of a single [`Integrator::check_reloads`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    /// The queue was drained (or was already empty) within budget.
    Ok,
    /// The frame's reload budget ran out before the queue was drained;
    /// remaining work carries over to the next frame.
    BudgetExceeded,
    /// The integrator is paused; no work was attempted.
    Paused,
}

/// Per-frame bookkeeping, reset by [`Integrator::frame_begin`] and closed
/// out by [`Integrator::frame_end`].
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    /// Monotonically increasing frame counter supplied by the host.
    pub frame_number: u64,
    started_at: Instant,
}

/// Ties a watched build artifact back to the source directory the watcher
/// should observe for it.
#[derive(Debug, Clone)]
struct Watch {
    source_dir: PathBuf,
}

/// The Frame-Budgeted Runtime Integrator. Owns no worker threads of its
/// own — it only drains work other subsystems have already queued, inside
/// a time budget, so it never blocks the frame it's called from.
pub struct Integrator {
    engine: std::sync::Arc<ReloadEngine>,
    budgeter: Mutex<AdaptiveBudgeter>,
    enabled: std::sync::atomic::AtomicBool,
    paused: std::sync::atomic::AtomicBool,
    current_frame: Mutex<Option<FrameContext>>,
    pending_jobs: Mutex<VecDeque<JobHandle>>,
    pending_commits: Mutex<VecDeque<TxId>>,
    watches: Mutex<HashMap<PathBuf, Watch>>,
}

impl Integrator {
    /// Construct an integrator driving `engine`, with the default frame
    /// budget configuration.
    #[must_use]
    pub fn new(engine: std::sync::Arc<ReloadEngine>) -> Self {
        Self::with_config(engine, FrameBudgetConfig::default())
    }

    /// Construct an integrator with an explicit starting configuration.
    #[must_use]
    pub fn with_config(engine: std::sync::Arc<ReloadEngine>, config: FrameBudgetConfig) -> Self {
        Self {
            engine,
            budgeter: Mutex::new(AdaptiveBudgeter::new(config)),
            enabled: std::sync::atomic::AtomicBool::new(true),
            paused: std::sync::atomic::AtomicBool::new(false),
            current_frame: Mutex::new(None),
            pending_jobs: Mutex::new(VecDeque::new()),
            pending_commits: Mutex::new(VecDeque::new()),
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the live budget configuration (`spec.md` §4.3 `set_config`).
    pub fn set_config(&self, config: FrameBudgetConfig) {
        self.budgeter.lock().set_config(config);
    }

    /// Enable or disable reload checking entirely. A disabled integrator
    /// still tracks frame boundaries but `check_reloads` is a no-op.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, std::sync::atomic::Ordering::SeqCst);
    }

    /// Pause or resume reload work. Pausing takes effect immediately for
    /// new work; any transaction already mid-commit runs to completion —
    /// the integrator only stops *starting* new commits
    /// (`spec.md` §4.3 "Cancellation semantics").
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, std::sync::atomic::Ordering::SeqCst);
    }

    /// Register a build-artifact path as backed by `source_dir`, so a
    /// caller wiring up `hmr-watch` knows which root to watch for it.
    pub fn add_watch(&self, artifact_path: &Path, source_dir: &Path) {
        self.watches.lock().insert(
            artifact_path.to_path_buf(),
            Watch {
                source_dir: source_dir.to_path_buf(),
            },
        );
    }

    /// Remove a previously registered watch.
    pub fn remove_watch(&self, artifact_path: &Path) {
        self.watches.lock().remove(artifact_path);
    }

    /// Source directory registered for `artifact_path`, if any.
    #[must_use]
    pub fn watched_source_dir(&self, artifact_path: &Path) -> Option<PathBuf> {
        self.watches.lock().get(artifact_path).map(|w| w.source_dir.clone())
    }

    /// Register a build job whose completion `check_reloads` should poll
    /// for. Called by the host after it hands a build to the watch
    /// pipeline's scheduler.
    pub fn track_job(&self, handle: JobHandle) {
        self.pending_jobs.lock().push_back(handle);
    }

    /// Register a transaction already in the `Ready` phase (its `prepare`
    /// already ran) for the integrator to commit within a future frame's
    /// budget.
    pub fn track_ready_transaction(&self, tx_id: TxId) {
        self.pending_commits.lock().push_back(tx_id);
    }

    /// Begin a frame. Must be paired with a later [`Integrator::frame_end`].
    pub fn frame_begin(&self, frame_number: u64) {
        *self.current_frame.lock() = Some(FrameContext {
            frame_number,
            started_at: Instant::now(),
        });
    }

    /// Close out the current frame, feeding its wall time into the
    /// adaptive budgeter.
    pub fn frame_end(&self) {
        let Some(ctx) = self.current_frame.lock().take() else {
            warn!("frame_end called without a matching frame_begin");
            return;
        };
        self.budgeter.lock().record_frame_time(ctx.started_at.elapsed());
    }

    /// Cooperative reload pump: drains completed build jobs and commits
    /// ready transactions until either the queue is empty or this frame's
    /// budget is exhausted. Suspension points fall only between one job's
    /// completion and the next, or between one transaction's commit and
    /// the next — never mid-operation (`spec.md` §4.3 "Suspension
    /// points").
    pub fn check_reloads(&self) -> CheckResult {
        if self.paused.load(std::sync::atomic::Ordering::SeqCst) {
            return CheckResult::Paused;
        }
        if !self.enabled.load(std::sync::atomic::Ordering::SeqCst) {
            return CheckResult::Ok;
        }

        let mut budgeter = self.budgeter.lock();
        if budgeter.should_skip_check() {
            return CheckResult::Ok;
        }
        let budget = budgeter.current_budget();
        drop(budgeter);

        let start = Instant::now();
        loop {
            if start.elapsed() >= budget {
                return CheckResult::BudgetExceeded;
            }

            if self.drain_one_completed_job() {
                continue;
            }
            if self.commit_one_ready_transaction() {
                continue;
            }
            return CheckResult::Ok;
        }
    }

    /// Pop and poll the oldest tracked job once; `true` if it had
    /// completed (and was removed from the queue), `false` if the queue
    /// is empty or the head job is still running (in which case it is
    /// pushed back to the tail so other jobs get a turn).
    fn drain_one_completed_job(&self) -> bool {
        let mut jobs = self.pending_jobs.lock();
        let Some(job) = jobs.pop_front() else {
            return false;
        };
        match job.try_wait() {
            Some(outcome) => {
                debug!(job = ?job.id(), ok = outcome.is_ok(), "build job completed");
                true
            }
            None => {
                jobs.push_back(job);
                false
            }
        }
    }

    /// Commit one pending `Ready` transaction, if any remain.
    fn commit_one_ready_transaction(&self) -> bool {
        let Some(tx_id) = self.pending_commits.lock().pop_front() else {
            return false;
        };
        if let Err(err) = self.engine.commit(tx_id) {
            warn!(%tx_id, %err, "deferred commit failed");
        }
        true
    }

    /// Number of build jobs still awaiting completion.
    #[must_use]
    pub fn pending_job_count(&self) -> usize {
        self.pending_jobs.lock().len()
    }

    /// Number of transactions queued for a future commit.
    #[must_use]
    pub fn pending_commit_count(&self) -> usize {
        self.pending_commits.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmr_core::artifact::{AbiCompatibility, Artifact};
    use hmr_core::{ModuleId, Version};
    use hmr_reload::{ModuleHandle, ModuleRegistry};
    use hmr_watch::scheduler::{BuildScheduler, BuildSpec, Priority};
    use std::collections::HashSet;
    use std::time::Duration;

    fn sample_artifact(fp: hmr_core::Fingerprint) -> Artifact {
        Artifact {
            fingerprint: fp,
            path: "unused".into(),
            size: 0,
            exported_symbols: Vec::new(),
            abi_descriptor: Vec::new(),
            compatibility: AbiCompatibility::Identical,
            build_time: Duration::from_millis(1),
        }
    }

    fn engine_with_module(dir: &Path, id: &str) -> (std::sync::Arc<ReloadEngine>, ModuleId) {
        let registry = ModuleRegistry::new();
        let module_id = ModuleId::new(id);
        registry.register(
            module_id.clone(),
            ModuleHandle {
                version: Version::new(1, 0, 0, 0),
                fingerprint: hmr_core::Fingerprint([0u8; 32]),
                artifact_path: "old.bin".into(),
                exported_symbols: HashSet::new(),
                state: Vec::new(),
            },
        );
        let engine = ReloadEngine::new(dir, registry, hmr_reload::MigrationRegistry::new());
        (std::sync::Arc::new(engine), module_id)
    }

    #[test]
    fn disabled_integrator_reports_ok_without_doing_work() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with_module(dir.path(), "sim");
        let integrator = Integrator::new(engine);
        integrator.set_enabled(false);
        integrator.frame_begin(0);
        assert_eq!(integrator.check_reloads(), CheckResult::Ok);
        integrator.frame_end();
    }

    #[test]
    fn paused_integrator_reports_paused() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with_module(dir.path(), "sim");
        let integrator = Integrator::new(engine);
        integrator.set_paused(true);
        assert_eq!(integrator.check_reloads(), CheckResult::Paused);
    }

    #[test]
    fn tracked_job_is_drained_once_complete() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with_module(dir.path(), "sim");
        let integrator = Integrator::new(engine);

        let scheduler = BuildScheduler::start(Some(1));
        let handle = scheduler.request_build(BuildSpec {
            fingerprint: hmr_core::Fingerprint([1u8; 32]),
            priority: Priority::Normal,
            run: Box::new(|| Ok(sample_artifact(hmr_core::Fingerprint([1u8; 32])))),
        });
        handle.wait();
        integrator.track_job(handle);

        integrator.frame_begin(0);
        let mut attempts = 0;
        loop {
            if integrator.pending_job_count() == 0 {
                break;
            }
            assert_ne!(integrator.check_reloads(), CheckResult::Paused);
            attempts += 1;
            assert!(attempts < 1000, "job never drained");
        }
        integrator.frame_end();
    }

    #[test]
    fn frame_begin_without_end_is_tolerated_by_next_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with_module(dir.path(), "sim");
        let integrator = Integrator::new(engine);
        integrator.frame_begin(0);
        integrator.frame_begin(1);
        integrator.frame_end();
    }

    #[test]
    fn s5_budget_exceeded_is_reported_when_work_outlasts_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with_module(dir.path(), "sim");
        let config = FrameBudgetConfig {
            max_frame_budget_ns: 1,
            check_interval_frames: 1,
            adaptive_budgeting: false,
        };
        let integrator = Integrator::with_config(engine, config);

        let scheduler = BuildScheduler::start(Some(1));
        for i in 0..4 {
            let fp = hmr_core::Fingerprint([i; 32]);
            let handle = scheduler.request_build(BuildSpec {
                fingerprint: fp,
                priority: Priority::Normal,
                run: Box::new(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(sample_artifact(fp))
                }),
            });
            integrator.track_job(handle);
        }

        integrator.frame_begin(0);
        assert_eq!(integrator.check_reloads(), CheckResult::BudgetExceeded);
        integrator.frame_end();
    }
}
