// SPDX-License-Identifier: Apache-2.0
//! Adaptive per-frame time budgeting (`spec.md` §4.3 "Adaptive budgeting").

use std::time::Duration;

/// Live-tunable configuration for the frame budgeter
/// (`spec.md` §4.3 `set_config`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBudgetConfig {
    /// How many frames elapse between reload-availability checks while the
    /// budget is in its reduced state.
    pub check_interval_frames: u32,
    /// The budget's ceiling; never exceeded even during linear recovery.
    pub max_frame_budget_ns: u64,
    /// Whether the budget reduces itself under sustained overrun.
    pub adaptive_budgeting: bool,
}

impl Default for FrameBudgetConfig {
    fn default() -> Self {
        Self {
            check_interval_frames: 60,
            max_frame_budget_ns: 100_000,
            adaptive_budgeting: true,
        }
    }
}

/// Tracks a moving average of frame time and adapts the reload budget:
/// geometric (×0.5) reduction on sustained overrun, linear recovery once
/// frame time normalizes (`spec.md` §4.3 defaults: base 100 µs, check
/// every 60 frames, adaptive enabled).
#[derive(Debug)]
pub struct AdaptiveBudgeter {
    config: FrameBudgetConfig,
    current_budget_ns: u64,
    moving_avg_ns: f64,
    frames_to_skip: u32,
}

/// Exponential moving average smoothing factor for frame time.
const EMA_ALPHA: f64 = 0.1;
/// Fraction of the base budget restored per recovering frame.
const RECOVERY_FRACTION: f64 = 0.1;

impl AdaptiveBudgeter {
    /// Construct a budgeter at `config`'s starting budget.
    #[must_use]
    pub fn new(config: FrameBudgetConfig) -> Self {
        Self {
            current_budget_ns: config.max_frame_budget_ns,
            moving_avg_ns: 0.0,
            frames_to_skip: 0,
            config,
        }
    }

    /// Replace the live configuration. The current budget is clamped to
    /// the new ceiling.
    pub fn set_config(&mut self, config: FrameBudgetConfig) {
        self.config = config;
        self.current_budget_ns = self.current_budget_ns.min(config.max_frame_budget_ns);
    }

    /// The budget reload work may spend this frame.
    #[must_use]
    pub const fn current_budget(&self) -> Duration {
        Duration::from_nanos(self.current_budget_ns)
    }

    /// `true` if `check_reloads` should be skipped entirely this frame —
    /// the integrator decrements its own skip counter by calling this once
    /// per frame.
    pub fn should_skip_check(&mut self) -> bool {
        if self.frames_to_skip > 0 {
            self.frames_to_skip -= 1;
            true
        } else {
            false
        }
    }

    /// Feed a completed frame's wall time into the moving average, and
    /// adapt the budget if adaptive budgeting is enabled.
    pub fn record_frame_time(&mut self, frame_time: Duration) {
        let sample = frame_time.as_nanos() as f64;
        self.moving_avg_ns = if self.moving_avg_ns == 0.0 {
            sample
        } else {
            EMA_ALPHA.mul_add(sample, (1.0 - EMA_ALPHA) * self.moving_avg_ns)
        };

        if !self.config.adaptive_budgeting {
            return;
        }

        if self.moving_avg_ns > self.current_budget_ns as f64 {
            self.current_budget_ns = (self.current_budget_ns / 2).max(1);
            self.frames_to_skip = self.config.check_interval_frames;
        } else if self.current_budget_ns < self.config.max_frame_budget_ns {
            let recovery = (self.config.max_frame_budget_ns as f64 * RECOVERY_FRACTION) as u64;
            self.current_budget_ns =
                (self.current_budget_ns + recovery.max(1)).min(self.config.max_frame_budget_ns);
        }
    }

    /// Current moving average frame time, for telemetry.
    #[must_use]
    pub const fn moving_average_ns(&self) -> f64 {
        self.moving_avg_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sustained_overrun_reduces_budget_geometrically() {
        let mut budgeter = AdaptiveBudgeter::new(FrameBudgetConfig::default());
        let base = budgeter.current_budget().as_nanos();
        for _ in 0..20 {
            budgeter.record_frame_time(Duration::from_micros(500));
        }
        assert!(budgeter.current_budget().as_nanos() < base);
    }

    #[test]
    fn recovery_is_linear_and_capped_at_ceiling() {
        let config = FrameBudgetConfig {
            max_frame_budget_ns: 100_000,
            ..Default::default()
        };
        let mut budgeter = AdaptiveBudgeter::new(config);
        for _ in 0..10 {
            budgeter.record_frame_time(Duration::from_micros(500));
        }
        let reduced = budgeter.current_budget().as_nanos();
        assert!(reduced < 100_000);

        for _ in 0..30 {
            budgeter.record_frame_time(Duration::from_nanos(1));
        }
        assert!(budgeter.current_budget().as_nanos() <= 100_000);
    }

    #[test]
    fn non_adaptive_budget_never_changes() {
        let config = FrameBudgetConfig {
            adaptive_budgeting: false,
            ..Default::default()
        };
        let mut budgeter = AdaptiveBudgeter::new(config);
        let base = budgeter.current_budget();
        for _ in 0..20 {
            budgeter.record_frame_time(Duration::from_millis(10));
        }
        assert_eq!(budgeter.current_budget(), base);
    }

    #[test]
    fn skip_counter_is_consumed_once_per_frame() {
        let mut budgeter = AdaptiveBudgeter::new(FrameBudgetConfig::default());
        for _ in 0..5 {
            budgeter.record_frame_time(Duration::from_micros(500));
        }
        assert!(budgeter.should_skip_check());
    }
}
