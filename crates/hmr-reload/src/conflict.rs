// SPDX-License-Identifier: Apache-2.0
//! Conflict classification and resolution policy (`spec.md` §4.2 "Conflict
//! detection and merge").

use parking_lot::Mutex;

use hmr_core::ModuleId;

/// The eight conflict classes `spec.md` §4.2 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictType {
    /// Two modules disagree on the shape of shared data.
    DataStructure,
    /// A function's signature changed in a way callers must re-resolve.
    FunctionSignature,
    /// The in-memory layout of shared state changed.
    MemoryLayout,
    /// The dependency graph's required build order was violated.
    DependencyChain,
    /// A module's state machine transitioned through an invalid path.
    StateMachine,
    /// Two modules contend for the same exclusive resource.
    ResourceAccess,
    /// Two participants mutate overlapping state at the same instant.
    ConcurrentModification,
    /// A semantic (behavioral) incompatibility not captured by the above.
    Semantic,
}

/// Severity of a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Recorded for audit purposes only.
    Info,
    /// Unlikely to cause observable issues.
    Low,
    /// May cause observable issues; worth surfacing.
    Medium,
    /// Likely to cause observable issues if auto-resolved incorrectly.
    High,
    /// Certain to corrupt state if mishandled.
    Critical,
}

/// Resolution strategies, in decreasing order of automation
/// (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionStrategy {
    /// Resolved without any merge step; the new version simply wins.
    AutoResolve,
    /// Line-based three-way merge of textual state representations.
    ThreeWayTextualMerge,
    /// AST-aware merge that understands the old and new code's structure.
    SemanticMerge,
    /// Merge aware of in-memory layout, for binary-compatible changes.
    StructuralMerge,
    /// Delegates to an optional, pluggable learned resolver (`spec.md` §9:
    /// "the core ships deterministic resolvers... and defines a stable
    /// interface for optional learned resolvers"). The core never invokes
    /// one itself; this variant exists so a policy table entry can name the
    /// extension point without the core depending on a learning runtime.
    MlAssisted,
    /// Surfaced to a human; the transaction blocks pending a decision.
    ManualReview,
    /// No automated resolution is attempted; the transaction fails.
    Reject,
}

/// Maps a conflict type to its default resolution strategy.
///
/// Biased toward the most automatable strategy that is still sound for
/// that class: `function-signature` and `memory-layout` conflicts default
/// to the non-automatic `structural-merge`/`manual-review` tier because an
/// incorrect auto-merge there silently corrupts memory rather than failing
/// loudly.
#[must_use]
pub const fn default_strategy(conflict_type: ConflictType) -> ResolutionStrategy {
    match conflict_type {
        ConflictType::DataStructure | ConflictType::ResourceAccess => {
            ResolutionStrategy::AutoResolve
        }
        ConflictType::DependencyChain => ResolutionStrategy::ThreeWayTextualMerge,
        ConflictType::StateMachine | ConflictType::Semantic => ResolutionStrategy::SemanticMerge,
        ConflictType::FunctionSignature => ResolutionStrategy::StructuralMerge,
        ConflictType::MemoryLayout | ConflictType::ConcurrentModification => {
            ResolutionStrategy::ManualReview
        }
    }
}

/// Outcome of attempting to apply a resolution strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The strategy resolved the conflict; the transaction may proceed.
    Resolved,
    /// The strategy requires a human decision not yet available.
    PendingReview,
    /// The conflict could not be resolved; the transaction must abort.
    Rejected(String),
}

/// A single detected conflict and how it was handled.
#[derive(Debug, Clone)]
pub struct Conflict {
    /// The two participants whose proposed swaps overlap.
    pub participants: (ModuleId, ModuleId),
    /// Classification of the conflict.
    pub conflict_type: ConflictType,
    /// Assessed severity.
    pub severity: Severity,
    /// Strategy selected to resolve it.
    pub strategy: ResolutionStrategy,
    /// What happened when the strategy was applied.
    pub outcome: ResolutionOutcome,
}

/// Append-only record of every conflict a transaction encountered
/// (`spec.md` §4.2: "The engine records every conflict and its outcome").
#[derive(Default)]
pub struct ConflictLog {
    entries: Mutex<Vec<Conflict>>,
}

impl ConflictLog {
    /// Construct an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a conflict.
    pub fn record(&self, conflict: Conflict) {
        self.entries.lock().push(conflict);
    }

    /// Snapshot of every conflict recorded so far.
    #[must_use]
    pub fn entries(&self) -> Vec<Conflict> {
        self.entries.lock().clone()
    }

    /// `true` if any recorded conflict rejected its transaction.
    #[must_use]
    pub fn has_rejection(&self) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|c| matches!(c.outcome, ResolutionOutcome::Rejected(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_biases_risky_classes_toward_manual_paths() {
        assert_eq!(
            default_strategy(ConflictType::MemoryLayout),
            ResolutionStrategy::ManualReview
        );
        assert_eq!(
            default_strategy(ConflictType::FunctionSignature),
            ResolutionStrategy::StructuralMerge
        );
        assert_eq!(
            default_strategy(ConflictType::DataStructure),
            ResolutionStrategy::AutoResolve
        );
    }

    #[test]
    fn log_tracks_rejections() {
        let log = ConflictLog::new();
        assert!(!log.has_rejection());
        log.record(Conflict {
            participants: (ModuleId::new("a"), ModuleId::new("b")),
            conflict_type: ConflictType::MemoryLayout,
            severity: Severity::Critical,
            strategy: ResolutionStrategy::ManualReview,
            outcome: ResolutionOutcome::Rejected("no reviewer available".into()),
        });
        assert!(log.has_rejection());
        assert_eq!(log.entries().len(), 1);
    }
}
