// SPDX-License-Identifier: Apache-2.0
//! Regression gating against a reference baseline (`spec.md` §4.4
//! "Regression gating", §8 scenario S6).

use serde::{Deserialize, Serialize};

/// Reference per-metric values a run is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Reference latency, in nanoseconds.
    pub latency_ns: u64,
    /// Reference resident memory, in bytes.
    pub memory_bytes: u64,
    /// Reference frames per second.
    pub fps: f32,
}

/// Fractional degradation allowed before a metric is flagged as regressed
/// (`spec.md` §4.4 defaults: "latency +20%, memory +15%, fps -10%").
#[derive(Debug, Clone, Copy)]
pub struct RegressionThresholds {
    /// Maximum tolerated latency increase, as a fraction of baseline.
    pub latency_pct: f64,
    /// Maximum tolerated memory increase, as a fraction of baseline.
    pub memory_pct: f64,
    /// Maximum tolerated fps decrease, as a (negative) fraction of baseline.
    pub fps_pct: f64,
}

impl Default for RegressionThresholds {
    fn default() -> Self {
        Self {
            latency_pct: 0.20,
            memory_pct: 0.15,
            fps_pct: -0.10,
        }
    }
}

/// Machine-readable regression report. Field order is fixed to match
/// `spec.md` §6's wire contract: "timestamp, regression_count,
/// ci_blocking flag, per-metric deltas" — `#[derive(Serialize)]` emits
/// fields in declaration order for any self-describing format
/// (`serde_json`'s object key order, in particular).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionReport {
    /// When this report was generated, in nanoseconds since an arbitrary
    /// epoch fixed at process start.
    pub timestamp_ns: u64,
    /// Number of metrics that breached their threshold.
    pub regression_count: u32,
    /// Whether this report should fail the enclosing CI job.
    pub ci_blocking: bool,
    /// Latency delta, as a fraction of baseline (positive = slower).
    pub latency_delta_pct: f64,
    /// Memory delta, as a fraction of baseline (positive = more memory).
    pub memory_delta_pct: f64,
    /// Fps delta, as a fraction of baseline (negative = fewer fps).
    pub fps_delta_pct: f64,
}

impl RegressionReport {
    /// Process exit code semantics `spec.md` §6 ties to this report:
    /// `0` if the run did not regress, non-zero otherwise.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.ci_blocking {
            1
        } else {
            0
        }
    }
}

/// Compare `current` to `baseline` under `thresholds`, producing a
/// [`RegressionReport`]. `timestamp_ns` is supplied by the caller so this
/// function stays free of wall-clock reads.
#[must_use]
pub fn gate(
    baseline: &Baseline,
    current: &Baseline,
    thresholds: RegressionThresholds,
    timestamp_ns: u64,
) -> RegressionReport {
    let latency_delta_pct = delta_pct(baseline.latency_ns as f64, current.latency_ns as f64);
    let memory_delta_pct = delta_pct(baseline.memory_bytes as f64, current.memory_bytes as f64);
    let fps_delta_pct = delta_pct(f64::from(baseline.fps), f64::from(current.fps));

    let mut regression_count = 0;
    if latency_delta_pct > thresholds.latency_pct {
        regression_count += 1;
    }
    if memory_delta_pct > thresholds.memory_pct {
        regression_count += 1;
    }
    if fps_delta_pct < thresholds.fps_pct {
        regression_count += 1;
    }

    RegressionReport {
        timestamp_ns,
        regression_count,
        ci_blocking: regression_count > 0,
        latency_delta_pct,
        memory_delta_pct,
        fps_delta_pct,
    }
}

fn delta_pct(baseline: f64, current: f64) -> f64 {
    if baseline == 0.0 {
        0.0
    } else {
        (current - baseline) / baseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(latency_ns: u64) -> Baseline {
        Baseline {
            latency_ns,
            memory_bytes: 1_000_000,
            fps: 60.0,
        }
    }

    #[test]
    fn s6_regression_gate_flags_latency_increase_and_clears_on_recovery() {
        let reference = baseline(10_000_000);

        let regressed = gate(&reference, &baseline(13_000_000), RegressionThresholds::default(), 1);
        assert!((regressed.latency_delta_pct - 0.30).abs() < 1e-9);
        assert!(regressed.ci_blocking);
        assert_eq!(regressed.exit_code(), 1);

        let recovered = gate(&reference, &baseline(11_000_000), RegressionThresholds::default(), 2);
        assert!((recovered.latency_delta_pct - 0.10).abs() < 1e-9);
        assert!(!recovered.ci_blocking);
        assert_eq!(recovered.exit_code(), 0);
    }

    #[test]
    fn field_order_matches_the_wire_contract() {
        let report = gate(&baseline(10), &baseline(10), RegressionThresholds::default(), 0);
        let json = serde_json::to_string(&report).unwrap();
        let timestamp_pos = json.find("timestamp_ns").unwrap();
        let count_pos = json.find("regression_count").unwrap();
        let blocking_pos = json.find("ci_blocking").unwrap();
        let latency_pos = json.find("latency_delta_pct").unwrap();
        assert!(timestamp_pos < count_pos);
        assert!(count_pos < blocking_pos);
        assert!(blocking_pos < latency_pos);
    }

    #[test]
    fn fps_drop_alone_triggers_a_regression() {
        let reference = baseline(10_000);
        let mut degraded = baseline(10_000);
        degraded.fps = 50.0; // -16.6%, breaches -10% threshold
        let report = gate(&reference, &degraded, RegressionThresholds::default(), 0);
        assert_eq!(report.regression_count, 1);
        assert!(report.ci_blocking);
    }
}
