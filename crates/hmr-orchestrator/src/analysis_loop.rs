// SPDX-License-Identifier: Apache-2.0
//! Background analysis loop: classifies every agent with recorded
//! telemetry on a fixed interval, so a bottleneck surfaces proactively
//! instead of only when something polls for it (`spec.md` §4.4
//! "Analysis").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::analysis::{self, BottleneckSeverity, BottleneckThresholds, Trend, DEFAULT_WINDOW};
use crate::telemetry::TelemetryStore;

/// Default analysis interval (`spec.md` §4.4: "a configurable interval
/// (default 100 ms)").
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// One agent's most recently computed trend and bottleneck classification.
#[derive(Debug, Clone, Copy)]
pub struct BottleneckStatus {
    /// Trend computed over the default analysis window.
    pub trend: Trend,
    /// Bottleneck severity classified from that trend.
    pub severity: BottleneckSeverity,
}

/// Drives a background thread that classifies every agent the telemetry
/// store knows about once per `interval`, caching the result so a
/// bottleneck is visible without recomputing it on the calling thread.
pub struct AnalysisLoop {
    statuses: Arc<RwLock<HashMap<String, BottleneckStatus>>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AnalysisLoop {
    /// Start analyzing `store` at `interval` against `thresholds`.
    #[must_use]
    pub fn start(store: Arc<TelemetryStore>, interval: Duration, thresholds: BottleneckThresholds) -> Self {
        let statuses: Arc<RwLock<HashMap<String, BottleneckStatus>>> = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let loop_statuses = Arc::clone(&statuses);
        let loop_shutdown = Arc::clone(&shutdown);
        let worker = std::thread::Builder::new()
            .name("hmr-orchestrator-analyze".into())
            .spawn(move || run(&store, &loop_statuses, &loop_shutdown, interval, thresholds))
            .ok();

        Self {
            statuses,
            shutdown,
            worker,
        }
    }

    /// Most recently computed status for `agent_id`, if it has been
    /// classified at least once.
    #[must_use]
    pub fn status(&self, agent_id: &str) -> Option<BottleneckStatus> {
        self.statuses.read().get(agent_id).copied()
    }

    /// Every agent currently at or above [`BottleneckSeverity::Warning`].
    #[must_use]
    pub fn active_bottlenecks(&self) -> Vec<(String, BottleneckStatus)> {
        self.statuses
            .read()
            .iter()
            .filter(|(_, status)| status.severity >= BottleneckSeverity::Warning)
            .map(|(id, status)| (id.clone(), *status))
            .collect()
    }

    /// Stop analyzing; blocks until the background thread exits.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("analysis loop worker panicked");
            }
        }
    }
}

impl Drop for AnalysisLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    store: &Arc<TelemetryStore>,
    statuses: &Arc<RwLock<HashMap<String, BottleneckStatus>>>,
    shutdown: &Arc<AtomicBool>,
    interval: Duration,
    thresholds: BottleneckThresholds,
) {
    while !shutdown.load(Ordering::SeqCst) {
        for agent_id in store.agent_ids() {
            let samples = store.recent(&agent_id, DEFAULT_WINDOW);
            let Some(latest) = samples.last().copied() else {
                continue;
            };
            let trend = analysis::analyze(&samples, DEFAULT_WINDOW);
            let severity = analysis::classify_bottleneck(&latest, &trend, thresholds);
            debug!(agent = agent_id.as_str(), ?severity, "analyzed agent telemetry");
            statuses.write().insert(agent_id, BottleneckStatus { trend, severity });
        }
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Sample;

    fn sample(latency_ns: u64) -> Sample {
        Sample {
            timestamp_ns: 0,
            cpu_percent: 0.0,
            memory_bytes: 0,
            fps: 0.0,
            latency_ns,
            throughput_ops: 0.0,
        }
    }

    #[test]
    fn flags_a_spike_without_being_polled() {
        let store = Arc::new(TelemetryStore::with_capacity(64));
        for _ in 0..20 {
            store.record("sim", sample(100));
        }
        store.record("sim", sample(300));

        let mut analyzer = AnalysisLoop::start(
            Arc::clone(&store),
            Duration::from_millis(5),
            BottleneckThresholds::default(),
        );

        let mut found = false;
        for _ in 0..50 {
            if matches!(
                analyzer.status("sim").map(|s| s.severity),
                Some(BottleneckSeverity::Critical)
            ) {
                found = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(found, "analysis loop never classified the spike");
        assert_eq!(analyzer.active_bottlenecks().len(), 1);
        analyzer.stop();
    }

    #[test]
    fn agent_with_no_samples_is_never_classified() {
        let store = Arc::new(TelemetryStore::with_capacity(16));
        let mut analyzer = AnalysisLoop::start(
            Arc::clone(&store),
            Duration::from_millis(5),
            BottleneckThresholds::default(),
        );
        std::thread::sleep(Duration::from_millis(20));
        assert!(analyzer.status("ghost").is_none());
        analyzer.stop();
    }
}
