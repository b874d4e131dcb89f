// SPDX-License-Identifier: Apache-2.0
//! Build job scheduling (`spec.md` §4.1 "Build scheduling").
//!
//! A bounded work-stealing-flavored pool: one lock-free queue per priority
//! class, workers drain strictly-higher-priority queues first and FIFO
//! within a class. Concurrent requests for the same fingerprint collapse
//! into a single execution (`spec.md` §8: "A build request for a
//! fingerprint already in-flight returns the existing job's handle").

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use hmr_core::Fingerprint;

/// Scheduling priority, ordered background < normal < high < critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Lowest priority; steered toward efficiency cores when available.
    Background,
    /// Default priority for ordinary rebuilds.
    Normal,
    /// User-initiated or latency-sensitive rebuilds.
    High,
    /// Rebuilds blocking the frame-budgeted integrator.
    Critical,
}

impl Priority {
    const ALL: [Self; 4] = [Self::Critical, Self::High, Self::Normal, Self::Background];

    /// Hint for which class of core this priority should prefer, per the
    /// heterogeneous-core steering policy in `spec.md` §4.1. This is the
    /// portable fallback described in `spec.md` §9 ("Hardware-specific
    /// optimizations... captured behind a small platform abstraction...
    /// Portable fallbacks MUST exist"); a host that can detect
    /// performance/efficiency cores may use this hint with its own affinity
    /// API, but nothing here requires one to exist.
    #[must_use]
    pub const fn core_affinity_hint(self) -> CoreAffinityHint {
        match self {
            Self::Background => CoreAffinityHint::Efficiency,
            Self::Normal | Self::High | Self::Critical => CoreAffinityHint::Performance,
        }
    }
}

/// Which class of core a job prefers to run on, when the host platform
/// exposes the distinction. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreAffinityHint {
    /// Prefer a high-clock / high-IPC core.
    Performance,
    /// Prefer a low-power core; acceptable for background work.
    Efficiency,
}

/// Lifecycle state of a build job (`spec.md` §3 "Build Job").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting in a priority queue.
    Queued,
    /// Currently executing on a worker.
    Running,
    /// Completed and produced an artifact.
    Succeeded,
    /// Completed with a build failure.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

/// Opaque identifier for a single enqueued build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

/// Captured failure detail (`spec.md` §4.1 "Failure semantics": "captured
/// verbatim (stderr, exit status)").
#[derive(Debug, Clone)]
pub struct BuildFailure {
    /// Raw stderr output from the build tool, if any was produced.
    pub stderr: String,
    /// Process exit status, if the failure came from a subprocess.
    pub exit_status: Option<i32>,
    /// `true` for I/O or tool-invocation failures eligible for retry;
    /// `false` for compile errors, which are terminal until the source
    /// changes (`spec.md` §4.1).
    pub transient: bool,
}

/// Outcome of one build execution, delivered to every waiter for that
/// fingerprint.
pub type BuildOutcome = Result<hmr_core::Artifact, BuildFailure>;

/// Transient build failures are retried up to this many times before the
/// final failure is delivered to waiters (`spec.md` §4.1 "Failure
/// semantics").
pub const MAX_TRANSIENT_RETRIES: u32 = 3;
/// Backoff before the first retry; doubles on each subsequent attempt.
pub const INITIAL_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// What a worker needs to actually perform a build; supplied by the
/// pipeline at `request_build` time.
pub struct BuildSpec {
    /// Fingerprint this build produces, if it succeeds.
    pub fingerprint: Fingerprint,
    /// Priority class this job was enqueued under.
    pub priority: Priority,
    /// The build closure itself. Runs on a worker thread, and is called
    /// again with exponential backoff if it reports a transient failure
    /// (`spec.md` §4.1); must not touch anything the frame loop reads
    /// without going through the artifact cache or module registry's own
    /// synchronization.
    pub run: Box<dyn Fn() -> BuildOutcome + Send + Sync>,
}

/// A handle returned by [`BuildScheduler::request_build`]. Clone to hand a
/// second waiter its own receiver; every clone observes the same outcome.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    fingerprint: Fingerprint,
    receiver: crossbeam_channel::Receiver<BuildOutcome>,
}

impl JobHandle {
    /// This job's identifier.
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// The fingerprint this job is building.
    #[must_use]
    pub const fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Block until the build completes.
    ///
    /// # Errors
    /// Returns the build's own [`BuildFailure`] if it failed; returns `Ok`
    /// with the produced artifact on success.
    pub fn wait(&self) -> BuildOutcome {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(BuildFailure {
                stderr: "build worker pool shut down before completion".to_string(),
                exit_status: None,
                transient: true,
            }))
    }

    /// Non-blocking poll for completion.
    #[must_use]
    pub fn try_wait(&self) -> Option<BuildOutcome> {
        self.receiver.try_recv().ok()
    }
}

struct QueuedJob {
    id: JobId,
    fingerprint: Fingerprint,
    run: Box<dyn Fn() -> BuildOutcome + Send + Sync>,
}

/// Bounded pool of workers draining four priority queues, deduplicating
/// concurrent requests for the same fingerprint.
pub struct BuildScheduler {
    next_id: AtomicU64,
    senders: std::collections::HashMap<Priority, crossbeam_channel::Sender<QueuedJob>>,
    inflight: Arc<DashMap<Fingerprint, Vec<crossbeam_channel::Sender<BuildOutcome>>>>,
    job_states: Arc<DashMap<JobId, JobState>>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl BuildScheduler {
    /// Start a pool with `worker_count` worker threads (defaults to
    /// [`num_cpus::get_physical`] when `None`, per `spec.md` §5: "thread
    /// count defaults to the number of performance cores").
    #[must_use]
    pub fn start(worker_count: Option<usize>) -> Self {
        let worker_count = worker_count.unwrap_or_else(num_cpus::get_physical).max(1);
        let inflight: Arc<DashMap<Fingerprint, Vec<crossbeam_channel::Sender<BuildOutcome>>>> =
            Arc::new(DashMap::new());
        let job_states = Arc::new(DashMap::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut senders = std::collections::HashMap::new();
        let mut receivers = std::collections::HashMap::new();
        for priority in Priority::ALL {
            let (tx, rx) = crossbeam_channel::unbounded();
            senders.insert(priority, tx);
            receivers.insert(priority, rx);
        }

        let mut workers = Vec::with_capacity(worker_count);
        for worker_index in 0..worker_count {
            let receivers = receivers.clone();
            let inflight = Arc::clone(&inflight);
            let job_states = Arc::clone(&job_states);
            let shutdown = Arc::clone(&shutdown);
            let handle = std::thread::Builder::new()
                .name(format!("hmr-build-{worker_index}"))
                .spawn(move || worker_loop(&receivers, &inflight, &job_states, &shutdown))
                .expect("spawning a build worker thread");
            workers.push(handle);
        }

        Self {
            next_id: AtomicU64::new(0),
            senders,
            inflight,
            job_states,
            shutdown,
            workers,
        }
    }

    /// Enqueue a build, or join an already in-flight build for the same
    /// fingerprint (`spec.md` §4.1 "Deduplication is mandatory").
    pub fn request_build(&self, spec: BuildSpec) -> JobHandle {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);

        let mut entry = self.inflight.entry(spec.fingerprint).or_default();
        entry.push(result_tx);
        let is_first_waiter = entry.len() == 1;
        drop(entry);

        self.job_states.insert(id, JobState::Queued);

        if is_first_waiter {
            let queued = QueuedJob {
                id,
                fingerprint: spec.fingerprint,
                run: spec.run,
            };
            let sender = self
                .senders
                .get(&spec.priority)
                .expect("all priority classes have a queue");
            let _ = sender.send(queued);
        }

        JobHandle {
            id,
            fingerprint: spec.fingerprint,
            receiver: result_rx,
        }
    }

    /// Current lifecycle state of a job, if it is still tracked. States are
    /// retained only until the job's outcome has been delivered.
    #[must_use]
    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        self.job_states.get(&id).map(|s| *s)
    }

    /// Number of distinct fingerprints currently building or queued.
    #[must_use]
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }
}

impl Drop for BuildScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    receivers: &std::collections::HashMap<Priority, crossbeam_channel::Receiver<QueuedJob>>,
    inflight: &DashMap<Fingerprint, Vec<crossbeam_channel::Sender<BuildOutcome>>>,
    job_states: &DashMap<JobId, JobState>,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let Some(job) = try_recv_highest_priority(receivers) else {
            std::thread::sleep(Duration::from_millis(2));
            continue;
        };

        job_states.insert(job.id, JobState::Running);
        let outcome = run_with_retry(&job.run);
        job_states.insert(
            job.id,
            if outcome.is_ok() {
                JobState::Succeeded
            } else {
                JobState::Failed
            },
        );

        if let Some((_, waiters)) = inflight.remove(&job.fingerprint) {
            for waiter in waiters {
                let _ = waiter.send(clone_outcome(&outcome));
            }
        }
        job_states.remove(&job.id);
    }
}

/// Run `build`, retrying with exponential backoff while it reports a
/// transient failure. A compile error (`transient: false`) is terminal and
/// returned on the first attempt (`spec.md` §4.1 "Failure semantics").
fn run_with_retry(build: &(dyn Fn() -> BuildOutcome + Send + Sync)) -> BuildOutcome {
    let mut backoff = INITIAL_RETRY_BACKOFF;
    let mut attempt = 0;
    loop {
        match build() {
            Ok(artifact) => return Ok(artifact),
            Err(failure) if failure.transient && attempt < MAX_TRANSIENT_RETRIES => {
                attempt += 1;
                std::thread::sleep(backoff);
                backoff *= 2;
            }
            Err(failure) => return Err(failure),
        }
    }
}

fn clone_outcome(outcome: &BuildOutcome) -> BuildOutcome {
    match outcome {
        Ok(artifact) => Ok(artifact.clone()),
        Err(failure) => Err(failure.clone()),
    }
}

fn try_recv_highest_priority(
    receivers: &std::collections::HashMap<Priority, crossbeam_channel::Receiver<QueuedJob>>,
) -> Option<QueuedJob> {
    for priority in Priority::ALL {
        if let Some(rx) = receivers.get(&priority) {
            if let Ok(job) = rx.try_recv() {
                return Some(job);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmr_core::artifact::{AbiCompatibility, Artifact};

    fn sample_artifact(fp: Fingerprint) -> Artifact {
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

    #[test]
    fn single_build_completes_and_delivers_result() {
        let scheduler = BuildScheduler::start(Some(2));
        let fp = Fingerprint([1u8; 32]);
        let handle = scheduler.request_build(BuildSpec {
            fingerprint: fp,
            priority: Priority::Normal,
            run: Box::new(move || Ok(sample_artifact(fp))),
        });
        let outcome = handle.wait();
        assert!(outcome.is_ok());
    }

    #[test]
    fn concurrent_requests_for_same_fingerprint_collapse() {
        let scheduler = BuildScheduler::start(Some(1));
        let fp = Fingerprint([2u8; 32]);
        let call_count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&call_count);

        let first = scheduler.request_build(BuildSpec {
            fingerprint: fp,
            priority: Priority::Normal,
            run: Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                Ok(sample_artifact(fp))
            }),
        });
        // A second request for the same fingerprint while the first is
        // in-flight must not spawn a second execution.
        let second = scheduler.request_build(BuildSpec {
            fingerprint: fp,
            priority: Priority::Normal,
            run: Box::new(|| panic!("should never run: deduplicated")),
        });

        assert!(first.wait().is_ok());
        assert!(second.wait().is_ok());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_is_reported_without_panicking_the_worker() {
        let scheduler = BuildScheduler::start(Some(1));
        let fp = Fingerprint([3u8; 32]);
        let handle = scheduler.request_build(BuildSpec {
            fingerprint: fp,
            priority: Priority::Critical,
            run: Box::new(|| {
                Err(BuildFailure {
                    stderr: "undefined symbol".to_string(),
                    exit_status: Some(1),
                    transient: false,
                })
            }),
        });
        assert!(handle.wait().is_err());

        // the worker must still be alive for subsequent jobs
        let fp2 = Fingerprint([4u8; 32]);
        let handle2 = scheduler.request_build(BuildSpec {
            fingerprint: fp2,
            priority: Priority::Normal,
            run: Box::new(move || Ok(sample_artifact(fp2))),
        });
        assert!(handle2.wait().is_ok());
    }

    #[test]
    fn priority_ordering_is_background_lowest() {
        assert!(Priority::Background < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }
}
