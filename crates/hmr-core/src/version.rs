// SPDX-License-Identifier: Apache-2.0
//! Module version and the compatibility relation (`spec.md` §3, "Version
//! Compatibility Relation").

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A module's stability flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stability {
    /// Safe for general use; breaking changes require a major bump.
    Stable,
    /// May change without notice; callers opt in knowingly.
    Beta,
    /// Still functional but scheduled for removal.
    Deprecated,
    /// Known to break callers relying on prior behavior.
    Breaking,
}

/// `major.minor.patch.build` plus a [`Stability`] flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Major version — bumped on breaking changes.
    pub major: u32,
    /// Minor version — bumped when migration is required but ABI-compatible.
    pub minor: u32,
    /// Patch version — bumped for fixes that need no migration.
    pub patch: u32,
    /// Monotonic build counter, used to break ties between otherwise-equal
    /// semantic versions (e.g. two builds of the same patch release).
    pub build: u64,
    /// Stability flag.
    pub stability: Stability,
}

impl Version {
    /// Construct a `Stable` version with the given numeric components.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32, build: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            build,
            stability: Stability::Stable,
        }
    }

    /// Return the same version with a different stability flag.
    #[must_use]
    pub const fn with_stability(mut self, stability: Stability) -> Self {
        self.stability = stability;
        self
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.patch, self.build
        )
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.build).cmp(&(
            other.major,
            other.minor,
            other.patch,
            other.build,
        ))
    }
}

/// Outcome of comparing two [`Version`]s, per `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionCompat {
    /// Same major and minor — the new artifact can replace the old in place.
    Compatible,
    /// Same major, differing minor — a registered migration transform must run.
    MigrationRequired,
    /// Differing major — callers must treat this as a breaking change.
    Breaking,
    /// Either side is flagged deprecated; this overrides the other rules.
    Deprecated,
}

impl VersionCompat {
    /// Compute the compatibility relation between `from` and `to`.
    ///
    /// Rules (`spec.md` §3): differing major is always `Breaking`; same
    /// major with differing minor is `MigrationRequired`; same major+minor
    /// is `Compatible`; a `Deprecated` stability flag on either side
    /// overrides all of the above.
    #[must_use]
    pub fn classify(from: &Version, to: &Version) -> Self {
        if from.stability == Stability::Deprecated || to.stability == Stability::Deprecated {
            return Self::Deprecated;
        }
        if from.major != to.major {
            return Self::Breaking;
        }
        if from.minor != to.minor {
            return Self::MigrationRequired;
        }
        Self::Compatible
    }

    /// `false` only for [`VersionCompat::Deprecated`] — the one outcome
    /// `spec.md`'s Open Questions flags as "caller decides." Everything
    /// else is actionable without extra confirmation.
    #[must_use]
    pub const fn is_actionable(self) -> bool {
        !matches!(self, Self::Deprecated)
    }
}
