// SPDX-License-Identifier: Apache-2.0
//! Trend analysis and bottleneck detection (`spec.md` §4.4 "Analysis").

use crate::telemetry::Sample;

/// Window size for trend-slope regression (`spec.md` §4.4: "over the last
/// N samples (default 50)").
pub const DEFAULT_WINDOW: usize = 50;

/// Default bottleneck severity thresholds, relative to an agent's rolling
/// baseline (`spec.md` §4.4: "default warning: +20%, critical: +50%").
#[derive(Debug, Clone, Copy)]
pub struct BottleneckThresholds {
    /// Fractional degradation that triggers a warning.
    pub warning: f64,
    /// Fractional degradation that triggers a critical flag.
    pub critical: f64,
}

impl Default for BottleneckThresholds {
    fn default() -> Self {
        Self {
            warning: 0.20,
            critical: 0.50,
        }
    }
}

/// Severity of a detected bottleneck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BottleneckSeverity {
    /// Latest sample is within the rolling baseline's normal range.
    None,
    /// Latest sample exceeds the warning threshold.
    Warning,
    /// Latest sample exceeds the critical threshold.
    Critical,
}

/// A computed linear trend over a sample window.
#[derive(Debug, Clone, Copy)]
pub struct Trend {
    /// Slope of latency (ns per sample index) over the window.
    pub latency_slope: f64,
    /// Mean latency over the window, used as the rolling baseline.
    pub baseline_latency_ns: f64,
}

/// Ordinary least squares slope of `latency_ns` against sample index.
/// Returns `0.0` for fewer than two samples.
#[must_use]
pub fn trend_slope(samples: &[Sample]) -> f64 {
    let n = samples.len();
    if n < 2 {
        return 0.0;
    }
    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let ys: Vec<f64> = samples.iter().map(|s| s.latency_ns as f64).collect();

    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for i in 0..n {
        let dx = xs[i] - mean_x;
        numerator += dx * (ys[i] - mean_y);
        denominator += dx * dx;
    }
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Compute a [`Trend`] over the most recent `window` samples (or fewer, if
/// the agent hasn't produced that many yet).
#[must_use]
pub fn analyze(samples: &[Sample], window: usize) -> Trend {
    let start = samples.len().saturating_sub(window);
    let slice = &samples[start..];
    let baseline = if slice.is_empty() {
        0.0
    } else {
        slice.iter().map(|s| s.latency_ns as f64).sum::<f64>() / slice.len() as f64
    };
    Trend {
        latency_slope: trend_slope(slice),
        baseline_latency_ns: baseline,
    }
}

/// Classify the latest sample against a rolling baseline.
#[must_use]
pub fn classify_bottleneck(
    latest: &Sample,
    trend: &Trend,
    thresholds: BottleneckThresholds,
) -> BottleneckSeverity {
    if trend.baseline_latency_ns <= 0.0 {
        return BottleneckSeverity::None;
    }
    let ratio = (latest.latency_ns as f64 - trend.baseline_latency_ns) / trend.baseline_latency_ns;
    if ratio >= thresholds.critical {
        BottleneckSeverity::Critical
    } else if ratio >= thresholds.warning {
        BottleneckSeverity::Warning
    } else {
        BottleneckSeverity::None
    }
}
