// SPDX-License-Identifier: Apache-2.0
//! Top-level facade tying telemetry collection, analysis, regression
//! gating, quality adaptation, and resource enforcement together
//! (`spec.md` §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::analysis::{self, BottleneckSeverity, BottleneckThresholds, Trend, DEFAULT_WINDOW};
use crate::analysis_loop::{self, AnalysisLoop, BottleneckStatus};
use crate::collector::CollectionLoop;
use crate::error::OrchestratorError;
use crate::quality::{QualityAdapter, QualityLevel};
use crate::regression::{self, Baseline, RegressionReport, RegressionThresholds};
use crate::resource::{EnforcementAction, ResourceLimits, ResourceMonitor, ResourceUsage};
use crate::telemetry::{Agent, Sample, TelemetryStore};

/// Coordinates the System Orchestrator's four responsibilities:
/// collection, analysis/bottleneck detection, regression gating, and
/// quality adaptation (`spec.md` §4.4 "Responsibility").
pub struct Orchestrator {
    collector: CollectionLoop,
    analyzer: AnalysisLoop,
    baseline: Mutex<Option<Baseline>>,
    regression_thresholds: RegressionThresholds,
    bottleneck_thresholds: BottleneckThresholds,
    quality: Mutex<QualityAdapter>,
    resources: RwLock<HashMap<String, Mutex<ResourceMonitor>>>,
}

impl Orchestrator {
    /// Construct an orchestrator collecting at `collection_interval` and
    /// adapting quality toward `target_frame_time`, starting at
    /// `initial_quality`.
    #[must_use]
    pub fn new(
        collection_interval: Duration,
        target_frame_time: Duration,
        initial_quality: QualityLevel,
    ) -> Self {
        let collector = CollectionLoop::start(Arc::new(TelemetryStore::new()), collection_interval);
        let bottleneck_thresholds = BottleneckThresholds::default();
        let analyzer = AnalysisLoop::start(
            Arc::clone(collector.store()),
            analysis_loop::DEFAULT_INTERVAL,
            bottleneck_thresholds,
        );
        Self {
            collector,
            analyzer,
            baseline: Mutex::new(None),
            regression_thresholds: RegressionThresholds::default(),
            bottleneck_thresholds,
            quality: Mutex::new(QualityAdapter::new(initial_quality, target_frame_time)),
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent the collection loop should sample.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) {
        self.collector.register(agent);
    }

    /// The underlying telemetry store (for ad hoc inspection/tests).
    #[must_use]
    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        self.collector.store()
    }

    /// Most recent sample recorded for `agent_id`.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::UnknownAgent`] if no sample has been
    /// recorded yet.
    pub fn latest_sample(&self, agent_id: &str) -> Result<Sample, OrchestratorError> {
        self.telemetry()
            .latest(agent_id)
            .ok_or_else(|| OrchestratorError::UnknownAgent(agent_id.to_string()))
    }

    /// Compute the current trend and bottleneck classification for
    /// `agent_id` over the default analysis window.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::UnknownAgent`] if no sample has been
    /// recorded yet.
    pub fn bottleneck_for(
        &self,
        agent_id: &str,
    ) -> Result<(Trend, BottleneckSeverity), OrchestratorError> {
        let samples = self.telemetry().recent(agent_id, DEFAULT_WINDOW);
        let latest = samples
            .last()
            .copied()
            .ok_or_else(|| OrchestratorError::UnknownAgent(agent_id.to_string()))?;
        let trend = analysis::analyze(&samples, DEFAULT_WINDOW);
        let severity = analysis::classify_bottleneck(&latest, &trend, self.bottleneck_thresholds);
        Ok((trend, severity))
    }

    /// The background analysis loop's most recently cached classification
    /// for `agent_id`, without recomputing it on the calling thread. `None`
    /// until the loop has analyzed at least one sample for this agent.
    #[must_use]
    pub fn cached_bottleneck_status(&self, agent_id: &str) -> Option<BottleneckStatus> {
        self.analyzer.status(agent_id)
    }

    /// Every agent the background analysis loop currently has flagged at
    /// or above [`BottleneckSeverity::Warning`].
    #[must_use]
    pub fn active_bottlenecks(&self) -> Vec<(String, BottleneckStatus)> {
        self.analyzer.active_bottlenecks()
    }

    /// Set the active regression baseline.
    pub fn set_baseline(&self, baseline: Baseline) {
        *self.baseline.lock() = Some(baseline);
    }

    /// Gate `current` against the active baseline.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::NoBaseline`] if [`Orchestrator::set_baseline`]
    /// has not been called.
    pub fn gate_regression(
        &self,
        current: Baseline,
        timestamp_ns: u64,
    ) -> Result<RegressionReport, OrchestratorError> {
        let baseline = (*self.baseline.lock()).ok_or(OrchestratorError::NoBaseline)?;
        Ok(regression::gate(&baseline, &current, self.regression_thresholds, timestamp_ns))
    }

    /// Feed an observed frame time into the quality adapter, returning the
    /// (possibly updated) quality level.
    pub fn observe_frame_time(&self, frame_time: Duration) -> QualityLevel {
        self.quality.lock().observe(frame_time)
    }

    /// Current quality level without taking a new observation.
    #[must_use]
    pub fn current_quality(&self) -> QualityLevel {
        self.quality.lock().current()
    }

    /// Evaluate one resource-usage sample for `module_id`, creating its
    /// monitor on first use.
    pub fn evaluate_resource(
        &self,
        module_id: &str,
        limits: ResourceLimits,
        usage: &ResourceUsage,
    ) -> Option<EnforcementAction> {
        if let Some(monitor) = self.resources.read().get(module_id) {
            return monitor.lock().evaluate(usage);
        }
        let mut resources = self.resources.write();
        resources
            .entry(module_id.to_string())
            .or_insert_with(|| Mutex::new(ResourceMonitor::new(limits)))
            .lock()
            .evaluate(usage)
    }
}
