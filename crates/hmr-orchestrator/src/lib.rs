// SPDX-License-Identifier: Apache-2.0
//! System Orchestrator: cross-agent telemetry collection, bottleneck
//! analysis, regression gating, quality adaptation, and resource
//! enforcement (`spec.md` §4.4).

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod analysis;
pub mod analysis_loop;
pub mod collector;
pub mod error;
pub mod orchestrator;
pub mod quality;
pub mod regression;
pub mod resource;
pub mod telemetry;

pub use analysis::{analyze, classify_bottleneck, trend_slope, BottleneckSeverity, BottleneckThresholds, Trend};
pub use analysis_loop::{AnalysisLoop, BottleneckStatus};
pub use collector::CollectionLoop;
pub use error::OrchestratorError;
pub use orchestrator::Orchestrator;
pub use quality::{QualityAdapter, QualityLevel, QualityParams};
pub use regression::{gate, Baseline, RegressionReport, RegressionThresholds};
pub use resource::{EnforcementAction, ResourceLimits, ResourceMonitor, ResourceUsage};
pub use telemetry::{Agent, CircularBuffer, Sample, TelemetryStore};
