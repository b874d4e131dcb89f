// SPDX-License-Identifier: Apache-2.0
//! Transaction identity and phase state machine (`spec.md` §4.2
//! "Protocol (states and transitions)").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hmr_core::ModuleId;

use crate::registry::ModuleHandle;

/// Isolation level a transaction was begun under. `spec.md` §3 names
/// "isolation level" as a `Reload Transaction` attribute without enumerating
/// values; `Serializable` is the only level the engine currently offers —
/// every transaction observes a consistent registry snapshot at `begin`
/// (invariant R3) — so this exists to make that attribute explicit and
/// future-extensible rather than to select between real behaviors today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Every participant is validated against a single consistent snapshot
    /// of the registry taken at `begin`.
    #[default]
    Serializable,
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(u64);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

#[derive(Debug, Default)]
pub(crate) struct TxIdAllocator(AtomicU64);

impl TxIdAllocator {
    pub(crate) fn next(&self) -> TxId {
        TxId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// A transaction's position in the protocol named in `spec.md` §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Just allocated; no participant has been asked to prepare yet.
    Begin,
    /// Participants are validating artifacts and capturing pre-images.
    Prepare,
    /// All participants prepared successfully; eligible to commit.
    Ready,
    /// At least one participant failed to prepare.
    Failed,
    /// Publishing new handles to the registry.
    Commit,
    /// Discarding pending work, reverting to pre-images if any were
    /// published.
    Abort,
    /// Terminal: committed successfully.
    Complete,
    /// Terminal: aborted.
    Aborted,
}

impl Phase {
    /// `true` for [`Phase::Complete`] and [`Phase::Aborted`] — no further
    /// transition is valid.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Begin, Self::Prepare)
                | (Self::Prepare, Self::Ready)
                | (Self::Prepare, Self::Failed)
                | (Self::Ready, Self::Commit)
                | (Self::Ready, Self::Abort)
                | (Self::Failed, Self::Abort)
                | (Self::Commit, Self::Complete)
                | (Self::Abort, Self::Aborted)
        ) || (!self.is_terminal() && next == Self::Abort)
    }
}

/// Raised when a caller requests a transition the protocol does not allow.
#[derive(Debug, thiserror::Error)]
#[error("invalid transaction phase transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// Phase the transaction was in.
    pub from: Phase,
    /// Phase the caller tried to move to.
    pub to: Phase,
}

/// A single in-flight or completed reload transaction.
pub struct Transaction {
    /// Identifier allocated at `begin`.
    pub id: TxId,
    /// Modules participating in this transaction, in the order
    /// `spec.md` §4.2 uses for publication ("ordered by participant
    /// identifier").
    pub participants: Vec<ModuleId>,
    /// Isolation level this transaction was begun under.
    pub isolation: IsolationLevel,
    phase: Phase,
    /// Snapshots of each participant's handle before any mutation, kept
    /// until the transaction completes (`spec.md` §3 invariant R2).
    pub pre_images: HashMap<ModuleId, Arc<ModuleHandle>>,
    /// When `begin` was called; used to enforce phase budgets.
    pub began_at: Instant,
}

impl Transaction {
    pub(crate) fn new(id: TxId, mut participants: Vec<ModuleId>, isolation: IsolationLevel) -> Self {
        participants.sort();
        Self {
            id,
            participants,
            isolation,
            phase: Phase::Begin,
            pre_images: HashMap::new(),
            began_at: Instant::now(),
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Attempt to move to `next`, validating the transition against the
    /// protocol's state machine.
    ///
    /// # Errors
    /// Returns [`InvalidTransition`] if `next` is not reachable from the
    /// current phase.
    pub fn transition_to(&mut self, next: Phase) -> Result<(), InvalidTransition> {
        if !self.phase.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Elapsed time since `begin`.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.began_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        let mut tx = Transaction::new(TxId(0), vec![ModuleId::new("a")], IsolationLevel::default());
        assert!(tx.transition_to(Phase::Prepare).is_ok());
        assert!(tx.transition_to(Phase::Ready).is_ok());
        assert!(tx.transition_to(Phase::Commit).is_ok());
        assert!(tx.transition_to(Phase::Complete).is_ok());
        assert!(tx.phase().is_terminal());
    }

    #[test]
    fn failed_prepare_can_only_abort() {
        let mut tx = Transaction::new(TxId(1), vec![ModuleId::new("a")], IsolationLevel::default());
        tx.transition_to(Phase::Prepare).unwrap();
        tx.transition_to(Phase::Failed).unwrap();
        assert!(tx.transition_to(Phase::Commit).is_err());
        assert!(tx.transition_to(Phase::Abort).is_ok());
        assert!(tx.transition_to(Phase::Aborted).is_ok());
    }

    #[test]
    fn timeout_aborts_from_any_non_terminal_phase() {
        let mut tx = Transaction::new(TxId(2), vec![ModuleId::new("a")], IsolationLevel::default());
        tx.transition_to(Phase::Prepare).unwrap();
        assert!(tx.transition_to(Phase::Abort).is_ok());
    }

    #[test]
    fn terminal_phases_reject_further_transitions() {
        let mut tx = Transaction::new(TxId(3), vec![ModuleId::new("a")], IsolationLevel::default());
        tx.transition_to(Phase::Prepare).unwrap();
        tx.transition_to(Phase::Ready).unwrap();
        tx.transition_to(Phase::Abort).unwrap();
        tx.transition_to(Phase::Aborted).unwrap();
        assert!(tx.transition_to(Phase::Prepare).is_err());
    }

    #[test]
    fn participants_are_ordered_by_identifier() {
        let tx = Transaction::new(
            TxId(4),
            vec![ModuleId::new("z"), ModuleId::new("a"), ModuleId::new("m")],
            IsolationLevel::default(),
        );
        assert_eq!(
            tx.participants,
            vec![ModuleId::new("a"), ModuleId::new("m"), ModuleId::new("z")]
        );
    }
}
