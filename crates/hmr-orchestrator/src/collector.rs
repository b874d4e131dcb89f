// SPDX-License-Identifier: Apache-2.0
//! Collection loop: pulls one sample from each registered agent on a fixed
//! interval (`spec.md` §4.4 "Collection").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::telemetry::{Agent, TelemetryStore};

/// Default collection interval (`spec.md` §4.4: "a configurable interval
/// (default 50 ms)").
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

/// Drives a background thread that samples every registered [`Agent`]
/// once per `interval` and records the result into a [`TelemetryStore`].
/// End-to-end sample-to-visibility latency is bounded by `interval` itself
/// plus the time to take and record one sample per agent, well under the
/// 100 ms ceiling `spec.md` §4.4 sets for any reasonable agent count.
pub struct CollectionLoop {
    agents: Arc<RwLock<Vec<Arc<dyn Agent>>>>,
    store: Arc<TelemetryStore>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CollectionLoop {
    /// Start collecting into `store` at `interval`.
    #[must_use]
    pub fn start(store: Arc<TelemetryStore>, interval: Duration) -> Self {
        let agents: Arc<RwLock<Vec<Arc<dyn Agent>>>> = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let loop_agents = Arc::clone(&agents);
        let loop_store = Arc::clone(&store);
        let loop_shutdown = Arc::clone(&shutdown);
        let worker = std::thread::Builder::new()
            .name("hmr-orchestrator-collect".into())
            .spawn(move || run(&loop_agents, &loop_store, &loop_shutdown, interval))
            .ok();

        Self {
            agents,
            store,
            shutdown,
            worker,
        }
    }

    /// Register an agent to be sampled on every tick.
    pub fn register(&self, agent: Arc<dyn Agent>) {
        self.agents.write().push(agent);
    }

    /// Stop collecting; blocks until the background thread exits.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("collection loop worker panicked");
            }
        }
    }

    /// The store this loop writes into.
    #[must_use]
    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }
}

impl Drop for CollectionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    agents: &Arc<RwLock<Vec<Arc<dyn Agent>>>>,
    store: &Arc<TelemetryStore>,
    shutdown: &Arc<AtomicBool>,
    interval: Duration,
) {
    while !shutdown.load(Ordering::SeqCst) {
        for agent in agents.read().iter() {
            let sample = agent.sample();
            debug!(agent = agent.agent_id(), "collected sample");
            store.record(agent.agent_id(), sample);
        }
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Sample;

    struct FixedAgent {
        id: String,
        latency_ns: u64,
    }

    impl Agent for FixedAgent {
        fn agent_id(&self) -> &str {
            &self.id
        }

        fn sample(&self) -> Sample {
            Sample {
                timestamp_ns: 0,
                cpu_percent: 1.0,
                memory_bytes: 1,
                fps: 60.0,
                latency_ns: self.latency_ns,
                throughput_ops: 1.0,
            }
        }
    }

    #[test]
    fn registered_agent_is_sampled_within_a_few_intervals() {
        let store = Arc::new(TelemetryStore::with_capacity(16));
        let mut collector = CollectionLoop::start(Arc::clone(&store), Duration::from_millis(5));
        collector.register(Arc::new(FixedAgent {
            id: "sim".into(),
            latency_ns: 42,
        }));

        let mut found = false;
        for _ in 0..50 {
            if store.latest("sim").is_some() {
                found = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(found, "collector never sampled the registered agent");
        collector.stop();
    }
}
