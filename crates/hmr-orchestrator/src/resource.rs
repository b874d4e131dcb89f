// SPDX-License-Identifier: Apache-2.0
//! Per-module resource enforcement ladder (`spec.md` §5 "Resource
//! policy").

/// Declared resource limits for one module (`spec.md` §5: "heap bytes,
/// stack bytes, CPU %, thread count, file descriptors").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    /// Maximum heap usage, in bytes.
    pub heap_bytes: u64,
    /// Maximum stack usage, in bytes.
    pub stack_bytes: u64,
    /// Maximum CPU utilization, 0.0-100.0.
    pub cpu_percent: f32,
    /// Maximum live thread count.
    pub thread_count: u32,
    /// Maximum open file descriptors.
    pub file_descriptors: u32,
}

/// A sampled snapshot of actual resource usage, same shape as
/// [`ResourceLimits`].
pub type ResourceUsage = ResourceLimits;

/// Escalating enforcement actions (`spec.md` §5: "warn → throttle (reduce
/// scheduling priority) → suspend → terminate").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnforcementAction {
    /// Log a warning; no behavioral change.
    Warn,
    /// Reduce the module's scheduling priority.
    Throttle,
    /// Suspend the module; it stops running but is not torn down.
    Suspend,
    /// Terminate the module. Last resort.
    Terminate,
}

impl EnforcementAction {
    const fn next(self) -> Self {
        match self {
            Self::Warn => Self::Throttle,
            Self::Throttle => Self::Suspend,
            Self::Suspend | Self::Terminate => Self::Terminate,
        }
    }
}

/// Consecutive overage samples required before escalating past `Warn`.
/// Decision logic is branch-only (no I/O), keeping it within the <100 µs
/// budget `spec.md` §5 requires.
const ESCALATION_INTERVAL: u32 = 3;

/// Tracks one module's overage streak and current enforcement level.
#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    limits: ResourceLimits,
    consecutive_overages: u32,
    current_action: Option<EnforcementAction>,
}

impl ResourceMonitor {
    /// Construct a monitor enforcing `limits`.
    #[must_use]
    pub const fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            consecutive_overages: 0,
            current_action: None,
        }
    }

    /// Currently applied enforcement action, if any.
    #[must_use]
    pub const fn current_action(&self) -> Option<EnforcementAction> {
        self.current_action
    }

    /// Evaluate one usage sample. Returns `Some(action)` only on the frame
    /// the enforcement level changes (either escalating or clearing back
    /// to normal); returns `None` while the level is unchanged from the
    /// previous call.
    pub fn evaluate(&mut self, usage: &ResourceUsage) -> Option<EnforcementAction> {
        if within_limits(&self.limits, usage) {
            self.consecutive_overages = 0;
            self.current_action = None;
            return None;
        }

        self.consecutive_overages = self.consecutive_overages.saturating_add(1);
        let target = if self.consecutive_overages == 1 {
            EnforcementAction::Warn
        } else if self.consecutive_overages.is_multiple_of(ESCALATION_INTERVAL) {
            self.current_action.unwrap_or(EnforcementAction::Warn).next()
        } else {
            return None;
        };

        if self.current_action == Some(target) {
            return None;
        }
        self.current_action = Some(target);
        Some(target)
    }
}

fn within_limits(limits: &ResourceLimits, usage: &ResourceUsage) -> bool {
    usage.heap_bytes <= limits.heap_bytes
        && usage.stack_bytes <= limits.stack_bytes
        && usage.cpu_percent <= limits.cpu_percent
        && usage.thread_count <= limits.thread_count
        && usage.file_descriptors <= limits.file_descriptors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            heap_bytes: 1_000,
            stack_bytes: 1_000,
            cpu_percent: 50.0,
            thread_count: 4,
            file_descriptors: 16,
        }
    }

    fn over_heap(bytes: u64) -> ResourceUsage {
        ResourceUsage {
            heap_bytes: bytes,
            ..limits()
        }
    }

    #[test]
    fn usage_within_limits_never_enforces() {
        let mut monitor = ResourceMonitor::new(limits());
        assert_eq!(monitor.evaluate(&limits()), None);
        assert_eq!(monitor.current_action(), None);
    }

    #[test]
    fn first_overage_warns() {
        let mut monitor = ResourceMonitor::new(limits());
        assert_eq!(monitor.evaluate(&over_heap(2_000)), Some(EnforcementAction::Warn));
    }

    #[test]
    fn sustained_overage_escalates_past_warn() {
        let mut monitor = ResourceMonitor::new(limits());
        assert_eq!(monitor.evaluate(&over_heap(2_000)), Some(EnforcementAction::Warn));
        assert_eq!(monitor.evaluate(&over_heap(2_000)), None);
        assert_eq!(
            monitor.evaluate(&over_heap(2_000)),
            Some(EnforcementAction::Throttle)
        );
    }

    #[test]
    fn recovering_usage_clears_enforcement() {
        let mut monitor = ResourceMonitor::new(limits());
        monitor.evaluate(&over_heap(2_000));
        assert_eq!(monitor.evaluate(&limits()), None);
        assert_eq!(monitor.current_action(), None);
    }

    #[test]
    fn enforcement_never_skips_a_rung() {
        assert_eq!(EnforcementAction::Warn.next(), EnforcementAction::Throttle);
        assert_eq!(EnforcementAction::Throttle.next(), EnforcementAction::Suspend);
        assert_eq!(EnforcementAction::Suspend.next(), EnforcementAction::Terminate);
        assert_eq!(EnforcementAction::Terminate.next(), EnforcementAction::Terminate);
    }
}
