// SPDX-License-Identifier: Apache-2.0
//! Hysteretic quality-level adaptation (`spec.md` §4.4 "Quality
//! adaptation").

use std::time::{Duration, Instant};

/// Ordered rendering quality levels (`spec.md` §3 "Quality level").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityLevel {
    /// Lowest fidelity, highest frame-time headroom.
    Low,
    /// Default/balanced fidelity.
    Medium,
    /// High fidelity.
    High,
    /// Maximum fidelity.
    Ultra,
}

impl QualityLevel {
    const fn step_down(self) -> Self {
        match self {
            Self::Ultra => Self::High,
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }

    const fn step_up(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Ultra => Self::Ultra,
        }
    }

    /// Concrete rendering parameter caps a downstream collaborator should
    /// apply at this level (`spec.md` §4.4: "texture size, light count,
    /// shadow samples, etc.").
    #[must_use]
    pub const fn params(self) -> QualityParams {
        match self {
            Self::Low => QualityParams {
                texture_size_px: 512,
                light_count: 4,
                shadow_samples: 1,
            },
            Self::Medium => QualityParams {
                texture_size_px: 1024,
                light_count: 8,
                shadow_samples: 4,
            },
            Self::High => QualityParams {
                texture_size_px: 2048,
                light_count: 16,
                shadow_samples: 8,
            },
            Self::Ultra => QualityParams {
                texture_size_px: 4096,
                light_count: 32,
                shadow_samples: 16,
            },
        }
    }
}

/// Concrete parameter caps a quality level implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityParams {
    /// Maximum texture edge length, in pixels.
    pub texture_size_px: u32,
    /// Maximum simultaneous dynamic lights.
    pub light_count: u32,
    /// Shadow-map samples per light.
    pub shadow_samples: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upgrade,
    Downgrade,
}

/// Adapts [`QualityLevel`] to observed frame time, staying at the current
/// level unless metrics exceed the upgrade/downgrade band continuously for
/// `dwell` (`spec.md` §4.4: "stay at the current level unless metrics
/// exceed the upgrade/downgrade band for a configurable dwell time
/// (default 2 s)").
pub struct QualityAdapter {
    current: QualityLevel,
    target_frame_time: Duration,
    dwell: Duration,
    pending: Option<(Direction, Instant)>,
}

/// Default dwell time before a quality transition takes effect.
pub const DEFAULT_DWELL: Duration = Duration::from_secs(2);
/// Frame time ratio (observed / target) above which a downgrade is desired.
const DOWNGRADE_RATIO: f64 = 1.2;
/// Frame time ratio below which an upgrade is desired.
const UPGRADE_RATIO: f64 = 0.6;

impl QualityAdapter {
    /// Construct an adapter starting at `initial`, targeting
    /// `target_frame_time`, with the default dwell time.
    #[must_use]
    pub fn new(initial: QualityLevel, target_frame_time: Duration) -> Self {
        Self::with_dwell(initial, target_frame_time, DEFAULT_DWELL)
    }

    /// Construct an adapter with an explicit dwell time.
    #[must_use]
    pub const fn with_dwell(initial: QualityLevel, target_frame_time: Duration, dwell: Duration) -> Self {
        Self {
            current: initial,
            target_frame_time,
            dwell,
            pending: None,
        }
    }

    /// Current quality level.
    #[must_use]
    pub const fn current(&self) -> QualityLevel {
        self.current
    }

    /// Feed an observed frame time; returns the (possibly updated) current
    /// level. Call this once per measurement interval, not once per frame.
    pub fn observe(&mut self, frame_time: Duration) -> QualityLevel {
        let ratio = frame_time.as_secs_f64() / self.target_frame_time.as_secs_f64();
        let desired = if ratio > DOWNGRADE_RATIO {
            Some(Direction::Downgrade)
        } else if ratio < UPGRADE_RATIO {
            Some(Direction::Upgrade)
        } else {
            None
        };

        match (desired, self.pending) {
            (Some(direction), Some((pending_direction, since))) if direction == pending_direction => {
                if since.elapsed() >= self.dwell {
                    self.current = match direction {
                        Direction::Downgrade => self.current.step_down(),
                        Direction::Upgrade => self.current.step_up(),
                    };
                    self.pending = None;
                }
            }
            (Some(direction), _) => {
                self.pending = Some((direction, Instant::now()));
            }
            (None, _) => {
                self.pending = None;
            }
        }

        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brief_spike_below_dwell_time_does_not_downgrade() {
        let mut adapter = QualityAdapter::with_dwell(
            QualityLevel::High,
            Duration::from_millis(16),
            Duration::from_millis(200),
        );
        assert_eq!(adapter.observe(Duration::from_millis(30)), QualityLevel::High);
    }

    #[test]
    fn sustained_overrun_past_dwell_downgrades_once() {
        let mut adapter = QualityAdapter::with_dwell(
            QualityLevel::High,
            Duration::from_millis(16),
            Duration::from_millis(20),
        );
        adapter.observe(Duration::from_millis(30));
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(adapter.observe(Duration::from_millis(30)), QualityLevel::Medium);
    }

    #[test]
    fn recovering_frame_time_cancels_a_pending_downgrade() {
        let mut adapter = QualityAdapter::with_dwell(
            QualityLevel::High,
            Duration::from_millis(16),
            Duration::from_millis(20),
        );
        adapter.observe(Duration::from_millis(30));
        adapter.observe(Duration::from_millis(16));
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(adapter.observe(Duration::from_millis(16)), QualityLevel::High);
    }

    #[test]
    fn quality_level_ordering_is_low_to_ultra() {
        assert!(QualityLevel::Low < QualityLevel::Medium);
        assert!(QualityLevel::Medium < QualityLevel::High);
        assert!(QualityLevel::High < QualityLevel::Ultra);
    }

    #[test]
    fn ultra_never_steps_above_itself() {
        assert_eq!(QualityLevel::Ultra.step_up(), QualityLevel::Ultra);
        assert_eq!(QualityLevel::Low.step_down(), QualityLevel::Low);
    }
}
