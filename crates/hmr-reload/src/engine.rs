// SPDX-License-Identifier: Apache-2.0
//! Transaction orchestration: `begin_transaction`, `prepare`, `commit`,
//! `abort`, `rollback` (`spec.md` §4.2 "Public operations").

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use hmr_core::error::HmrError;
use hmr_core::{Fingerprint, ModuleId, Version, VersionCompat};

use crate::conflict::{
    Conflict, ConflictLog, ConflictType, ResolutionOutcome, ResolutionStrategy, Severity, default_strategy,
};
use crate::migration::{MigrationRegistry, StateVersion};
use crate::platform;
use crate::registry::{ModuleHandle, ModuleRegistry};
use crate::transaction::{InvalidTransition, IsolationLevel, Phase, Transaction, TxId, TxIdAllocator};
use crate::wal::WriteAheadLog;

/// `prepare` must complete within this budget (`spec.md` §4.2).
pub const PREPARE_BUDGET: Duration = Duration::from_millis(10);
/// `commit` budget for a single-module transaction.
pub const COMMIT_BUDGET_SINGLE: Duration = Duration::from_millis(5);
/// `commit` budget for a multi-module transaction chain.
pub const COMMIT_BUDGET_CHAIN: Duration = Duration::from_millis(15);
/// `rollback` budget.
pub const ROLLBACK_BUDGET: Duration = Duration::from_millis(2);

/// The new code and metadata a participant is being moved to, supplied by
/// the caller (who owns the build/artifact-loading step) when calling
/// [`ReloadEngine::prepare`].
#[derive(Debug, Clone)]
pub struct ParticipantUpdate {
    /// Module being updated.
    pub module_id: ModuleId,
    /// Version the module is moving to.
    pub new_version: Version,
    /// Fingerprint of the new artifact.
    pub new_fingerprint: Fingerprint,
    /// On-disk path of the new artifact.
    pub new_artifact_path: PathBuf,
    /// Exported symbols of the new artifact.
    pub new_exported_symbols: HashSet<String>,
    /// The state schema version the old handle's state blob is in.
    pub old_state_version: StateVersion,
    /// The state schema version the new module expects.
    pub new_state_version: StateVersion,
}

/// Emitted when a phase exceeds its configured budget. Non-fatal — the
/// transaction still completes (`spec.md` §4.2 "the engine MUST surface a
/// timing-violation event (non-fatal)... and MUST still complete the
/// transaction atomically").
#[derive(Debug, Clone)]
pub struct TimingViolation {
    /// Transaction this violation occurred in.
    pub tx_id: TxId,
    /// Phase that overran.
    pub phase: Phase,
    /// Configured budget for that phase.
    pub budget: Duration,
    /// Actual elapsed time.
    pub actual: Duration,
}

/// Errors the engine's public operations can return.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    /// Underlying core error (I/O, config, etc).
    #[error(transparent)]
    Core(#[from] HmrError),
    /// The requested transaction does not exist.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxId),
    /// An invalid phase transition was attempted.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// A participant is not registered in the module registry.
    #[error("participant {0} is not registered")]
    ParticipantNotRegistered(ModuleId),
    /// No migration transform exists for a required state version change.
    #[error("no migration transform from state version {from} to {to} for module {module}")]
    MissingMigration {
        /// Module the migration was required for.
        module: ModuleId,
        /// Old state schema version.
        from: u64,
        /// New state schema version.
        to: u64,
    },
    /// A conflict resolution strategy rejected the transaction.
    #[error("conflict rejected transaction: {0}")]
    ConflictRejected(String),
}

impl ReloadError {
    /// Map this error to the uniform [`hmr_core::ReturnCode`] space
    /// (`spec.md` §6).
    #[must_use]
    pub const fn code(&self) -> hmr_core::ReturnCode {
        match self {
            Self::Core(err) => err.code(),
            Self::UnknownTransaction(_) | Self::ParticipantNotRegistered(_) => {
                hmr_core::ReturnCode::NotFound
            }
            Self::InvalidTransition(_) => hmr_core::ReturnCode::VersionMismatch,
            Self::MissingMigration { .. } => hmr_core::ReturnCode::VersionMismatch,
            Self::ConflictRejected(_) => hmr_core::ReturnCode::Conflict,
        }
    }
}

struct ActiveTransaction {
    tx: Transaction,
    staged: HashMap<ModuleId, ParticipantUpdate>,
    wal_path: Option<PathBuf>,
}

/// Coordinates the module registry, WAL, migration registry, and conflict
/// log into the two-phase-commit protocol `spec.md` §4.2 describes.
pub struct ReloadEngine {
    registry: ModuleRegistry,
    wal: WriteAheadLog,
    migrations: MigrationRegistry,
    conflicts: ConflictLog,
    tx_ids: TxIdAllocator,
    transactions: parking_lot::Mutex<HashMap<TxId, ActiveTransaction>>,
    timing_violations: parking_lot::Mutex<Vec<TimingViolation>>,
}

impl ReloadEngine {
    /// Construct an engine rooted at `state_root` for its write-ahead log,
    /// replaying any transactions a previous run left behind.
    #[must_use]
    pub fn new(state_root: &Path, registry: ModuleRegistry, migrations: MigrationRegistry) -> Self {
        let wal = WriteAheadLog::new(state_root);
        Self::recover_from_wal(&wal);
        Self {
            registry,
            wal,
            migrations,
            conflicts: ConflictLog::new(),
            tx_ids: TxIdAllocator::default(),
            transactions: parking_lot::Mutex::new(HashMap::new()),
            timing_violations: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Crash recovery (`spec.md` §4.2 "Write-ahead log"): a `Committed`
    /// marker means every participant's handle was already published before
    /// the crash (`commit` only records it after the publish loop
    /// finishes), so rolling forward is just clearing the stale file.
    /// Its absence means publication never started, so rolling back is
    /// also a no-op — there is nothing in the registry to undo.
    fn recover_from_wal(wal: &WriteAheadLog) {
        let recovered = match wal.recover() {
            Ok(recovered) => recovered,
            Err(err) => {
                warn!(%err, "failed to scan write-ahead log during startup recovery");
                return;
            }
        };
        for tx in recovered {
            if tx.committed {
                warn!(tx_id = tx.tx_id, participants = ?tx.participants, "replaying a transaction committed before a prior crash");
            } else {
                warn!(tx_id = tx.tx_id, participants = ?tx.participants, "discarding a transaction that never reached commit before a prior crash");
            }
            if let Err(err) = wal.truncate(&tx.path) {
                warn!(%err, path = ?tx.path, "failed to truncate a recovered write-ahead log file");
            }
        }
    }

    /// Access the underlying module registry (read-mostly API consumers
    /// such as `hmr-frame` use this to resolve symbols).
    #[must_use]
    pub const fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Conflicts recorded across every transaction this engine has run.
    #[must_use]
    pub fn conflict_log(&self) -> &ConflictLog {
        &self.conflicts
    }

    /// Timing-violation events recorded so far.
    #[must_use]
    pub fn timing_violations(&self) -> Vec<TimingViolation> {
        self.timing_violations.lock().clone()
    }

    /// Begin a transaction over `participants`, capturing a consistent
    /// pre-image snapshot of each (invariant R3).
    ///
    /// # Errors
    /// Returns [`ReloadError::ParticipantNotRegistered`] if any participant
    /// is not currently registered.
    pub fn begin_transaction(
        &self,
        participants: Vec<ModuleId>,
        isolation: IsolationLevel,
    ) -> Result<TxId, ReloadError> {
        for id in &participants {
            if !self.registry.contains(id) {
                return Err(ReloadError::ParticipantNotRegistered(id.clone()));
            }
        }
        let id = self.tx_ids.next();
        let mut tx = Transaction::new(id, participants, isolation);
        for participant in tx.participants.clone() {
            if let Some(handle) = self.registry.get(&participant) {
                tx.pre_images.insert(participant, arc_swap::Guard::into_inner(handle));
            }
        }
        self.transactions.lock().insert(
            id,
            ActiveTransaction {
                tx,
                staged: HashMap::new(),
                wal_path: None,
            },
        );
        Ok(id)
    }

    /// Validate `updates`, capture pre-images, and write the WAL `prepare`
    /// record.
    ///
    /// # Errors
    /// Returns [`ReloadError::MissingMigration`] if a required migration
    /// transform is absent, or [`ReloadError::ConflictRejected`] if a
    /// detected conflict's resolution strategy rejects the transaction.
    pub fn prepare(
        &self,
        id: TxId,
        updates: Vec<ParticipantUpdate>,
    ) -> Result<(), ReloadError> {
        let mut transactions = self.transactions.lock();
        let active = transactions
            .get_mut(&id)
            .ok_or(ReloadError::UnknownTransaction(id))?;
        active.tx.transition_to(Phase::Prepare)?;

        let mut new_fingerprints = HashMap::new();
        for update in &updates {
            let pre_image = active.tx.pre_images.get(&update.module_id);
            if let Some(pre_image) = pre_image {
                let compat = VersionCompat::classify(&pre_image.version, &update.new_version);
                if compat == VersionCompat::MigrationRequired
                    && !self
                        .migrations
                        .has_transform(update.old_state_version, update.new_state_version)
                {
                    active.tx.transition_to(Phase::Failed)?;
                    return Err(ReloadError::MissingMigration {
                        module: update.module_id.clone(),
                        from: update.old_state_version.0,
                        to: update.new_state_version.0,
                    });
                }
            }
            new_fingerprints.insert(update.module_id.clone(), update.new_fingerprint);
        }

        if let Some(rejection) = self.detect_conflicts(&active.tx, &updates) {
            active.tx.transition_to(Phase::Failed)?;
            return Err(ReloadError::ConflictRejected(rejection));
        }

        let wal_path = self.wal.record_prepare(
            id_to_u64(id),
            nanos_since_epoch(active.tx.began_at),
            &active.tx.participants,
            &new_fingerprints,
        )?;
        active.wal_path = Some(wal_path);
        active.staged = updates
            .into_iter()
            .map(|u| (u.module_id.clone(), u))
            .collect();

        self.check_budget(id, Phase::Prepare, PREPARE_BUDGET, active.tx.elapsed());
        active.tx.transition_to(Phase::Ready)?;
        Ok(())
    }

    fn detect_conflicts(&self, tx: &Transaction, updates: &[ParticipantUpdate]) -> Option<String> {
        if updates.len() < 2 {
            return None;
        }
        for pair in updates.windows(2) {
            let [a, b] = pair else { continue };
            if a.old_state_version != b.old_state_version
                && tx.pre_images.contains_key(&a.module_id)
                && tx.pre_images.contains_key(&b.module_id)
            {
                let conflict_type = ConflictType::ConcurrentModification;
                let strategy = default_strategy(conflict_type);
                let outcome = if matches!(
                    strategy,
                    ResolutionStrategy::ManualReview | ResolutionStrategy::Reject
                ) {
                    ResolutionOutcome::Rejected(format!(
                        "{conflict_type:?} conflict between {} and {} requires {strategy:?}",
                        a.module_id, b.module_id
                    ))
                } else {
                    ResolutionOutcome::PendingReview
                };
                self.conflicts.record(Conflict {
                    participants: (a.module_id.clone(), b.module_id.clone()),
                    conflict_type,
                    severity: Severity::Medium,
                    strategy,
                    outcome,
                });
            }
        }
        self.conflicts.has_rejection().then(|| {
            "a detected conflict's resolution strategy requires manual review".to_string()
        })
    }

    /// Publish all prepared updates for a `Ready` transaction.
    ///
    /// # Errors
    /// Returns a [`ReloadError`] if the transaction is not in the `Ready`
    /// phase.
    pub fn commit(&self, id: TxId) -> Result<(), ReloadError> {
        let mut transactions = self.transactions.lock();
        let active = transactions
            .get_mut(&id)
            .ok_or(ReloadError::UnknownTransaction(id))?;
        active.tx.transition_to(Phase::Commit)?;

        let commit_start = std::time::Instant::now();
        let mut published: Vec<(ModuleId, Arc<ModuleHandle>)> = Vec::new();
        let publish_result = (|| -> Result<(), ReloadError> {
            for participant in active.tx.participants.clone() {
                let Some(update) = active.staged.get(&participant) else {
                    continue;
                };
                let pre_image = active.tx.pre_images.get(&participant);
                let old_state = pre_image.map(|p| p.state.clone()).unwrap_or_default();
                let migrated_state = self.migrations.migrate(
                    update.old_state_version,
                    update.new_state_version,
                    &old_state,
                )?;

                platform::flush_code_region(&update.new_fingerprint.0);
                platform::full_barrier();

                let new_handle = ModuleHandle {
                    version: update.new_version,
                    fingerprint: update.new_fingerprint,
                    artifact_path: update.new_artifact_path.clone(),
                    exported_symbols: update.new_exported_symbols.clone(),
                    state: migrated_state,
                };
                if let Some(old) = self.registry.publish(&participant, new_handle) {
                    published.push((participant, old));
                }
            }
            Ok(())
        })();

        if let Err(err) = publish_result {
            // Compensating rollback: restore every handle this commit
            // already swapped in before the failure, in reverse order.
            for (participant, old) in published.into_iter().rev() {
                self.registry.publish(&participant, (*old).clone());
            }
            active.tx.transition_to(Phase::Abort)?;
            active.tx.transition_to(Phase::Aborted)?;
            transactions.remove(&id);
            return Err(err);
        }

        if let Some(path) = &active.wal_path {
            self.wal.record_commit(path, id_to_u64(id))?;
            self.wal.truncate(path)?;
        }

        let budget = if active.tx.participants.len() > 1 {
            COMMIT_BUDGET_CHAIN
        } else {
            COMMIT_BUDGET_SINGLE
        };
        self.check_budget(id, Phase::Commit, budget, commit_start.elapsed());

        active.tx.transition_to(Phase::Complete)?;
        transactions.remove(&id);
        Ok(())
    }

    /// Discard a transaction's pending work; the registry is left exactly
    /// as it was before `begin` (invariant: "for all transactions T that
    /// return `abort`, the module registry equals its state just before
    /// `begin(T)`" — `spec.md` §8).
    ///
    /// # Errors
    /// Returns a [`ReloadError`] if the transaction cannot transition to
    /// `Abort` from its current phase.
    pub fn abort(&self, id: TxId) -> Result<(), ReloadError> {
        let mut transactions = self.transactions.lock();
        let active = transactions
            .get_mut(&id)
            .ok_or(ReloadError::UnknownTransaction(id))?;

        if !active.tx.phase().is_terminal() {
            active.tx.transition_to(Phase::Abort)?;
        }
        if let Some(path) = &active.wal_path {
            self.wal.truncate(path)?;
        }
        active.tx.transition_to(Phase::Aborted)?;
        transactions.remove(&id);
        Ok(())
    }

    /// Revert a single module to a previously captured handle (e.g. a
    /// rollback snapshot or quarantine checkpoint), outside the scope of
    /// an active transaction.
    ///
    /// # Errors
    /// Returns [`ReloadError::ParticipantNotRegistered`] if `module_id` is
    /// not currently registered.
    pub fn rollback(&self, module_id: &ModuleId, checkpoint: ModuleHandle) -> Result<(), ReloadError> {
        let started = std::time::Instant::now();
        if self.registry.publish(module_id, checkpoint).is_none() {
            return Err(ReloadError::ParticipantNotRegistered(module_id.clone()));
        }
        if started.elapsed() > ROLLBACK_BUDGET {
            warn!(module = %module_id, "rollback exceeded its budget");
        }
        Ok(())
    }

    fn check_budget(&self, id: TxId, phase: Phase, budget: Duration, actual: Duration) {
        if actual > budget {
            warn!(%id, ?phase, ?budget, ?actual, "transaction phase exceeded its budget");
            self.timing_violations.lock().push(TimingViolation {
                tx_id: id,
                phase,
                budget,
                actual,
            });
        }
    }
}

fn id_to_u64(id: TxId) -> u64 {
    // `TxId`'s Display is `tx-<n>`; parse it back out rather than exposing
    // the inner field, keeping the newtype opaque outside this crate.
    id.to_string()
        .trim_start_matches("tx-")
        .parse()
        .unwrap_or(0)
}

fn nanos_since_epoch(instant: std::time::Instant) -> u128 {
    let now_instant = std::time::Instant::now();
    let now_system = std::time::SystemTime::now();
    let offset = now_instant.saturating_duration_since(instant);
    now_system
        .checked_sub(offset)
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn engine_with_module(dir: &Path, id: &str) -> (ReloadEngine, ModuleId) {
        let registry = ModuleRegistry::new();
        let module_id = ModuleId::new(id);
        registry.register(
            module_id.clone(),
            ModuleHandle {
                version: Version::new(1, 0, 0, 0),
                fingerprint: Fingerprint([0u8; 32]),
                artifact_path: "old.bin".into(),
                exported_symbols: HashSet::new(),
                state: b"counter:1".to_vec(),
            },
        );
        let engine = ReloadEngine::new(dir, registry, MigrationRegistry::new());
        (engine, module_id)
    }

    fn update(module_id: &ModuleId, version: Version, fingerprint: u8) -> ParticipantUpdate {
        ParticipantUpdate {
            module_id: module_id.clone(),
            new_version: version,
            new_fingerprint: Fingerprint([fingerprint; 32]),
            new_artifact_path: "new.bin".into(),
            new_exported_symbols: HashSet::new(),
            old_state_version: StateVersion(1),
            new_state_version: StateVersion(1),
        }
    }

    #[test]
    fn s1_single_module_hot_swap_commits() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, module_id) = engine_with_module(dir.path(), "sim");

        let tx = engine
            .begin_transaction(vec![module_id.clone()], IsolationLevel::default())
            .unwrap();
        engine
            .prepare(tx, vec![update(&module_id, Version::new(1, 0, 1, 0), 7)])
            .unwrap();
        engine.commit(tx).unwrap();

        let current = engine.registry().get(&module_id).unwrap();
        assert_eq!(current.version, Version::new(1, 0, 1, 0));
        assert_eq!(current.fingerprint, Fingerprint([7u8; 32]));
    }

    #[test]
    fn s4_failed_prepare_aborts_without_changing_either_participant() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModuleRegistry::new();
        let m1 = ModuleId::new("m1");
        let m2 = ModuleId::new("m2");
        for id in [&m1, &m2] {
            registry.register(
                id.clone(),
                ModuleHandle {
                    version: Version::new(1, 0, 0, 0),
                    fingerprint: Fingerprint([0u8; 32]),
                    artifact_path: "old.bin".into(),
                    exported_symbols: HashSet::new(),
                    state: Vec::new(),
                },
            );
        }
        let engine = ReloadEngine::new(dir.path(), registry, MigrationRegistry::new());

        let tx = engine
            .begin_transaction(vec![m1.clone(), m2.clone()], IsolationLevel::default())
            .unwrap();

        // m2's prepare requires a migration with no transform registered
        let mut m2_update = update(&m2, Version::new(1, 1, 0, 0), 9);
        m2_update.old_state_version = StateVersion(1);
        m2_update.new_state_version = StateVersion(2);

        let result = engine.prepare(
            tx,
            vec![update(&m1, Version::new(1, 0, 1, 0), 8), m2_update],
        );
        assert!(result.is_err());
        engine.abort(tx).unwrap();

        assert_eq!(engine.registry().get(&m1).unwrap().version, Version::new(1, 0, 0, 0));
        assert_eq!(engine.registry().get(&m2).unwrap().version, Version::new(1, 0, 0, 0));

        // no WAL file should remain
        assert!(WriteAheadLog::new(dir.path()).recover().unwrap().is_empty());
    }

    #[test]
    fn rollback_restores_a_prior_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, module_id) = engine_with_module(dir.path(), "sim");
        let checkpoint = engine.registry().get(&module_id).unwrap().as_ref().clone();

        let tx = engine
            .begin_transaction(vec![module_id.clone()], IsolationLevel::default())
            .unwrap();
        engine
            .prepare(tx, vec![update(&module_id, Version::new(2, 0, 0, 0), 3)])
            .unwrap();
        engine.commit(tx).unwrap();
        assert_eq!(engine.registry().get(&module_id).unwrap().version, Version::new(2, 0, 0, 0));

        engine.rollback(&module_id, checkpoint).unwrap();
        assert_eq!(engine.registry().get(&module_id).unwrap().version, Version::new(1, 0, 0, 0));
    }

    #[test]
    fn commit_rolls_back_already_published_participants_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModuleRegistry::new();
        let m1 = ModuleId::new("m1");
        let m2 = ModuleId::new("m2");
        for id in [&m1, &m2] {
            registry.register(
                id.clone(),
                ModuleHandle {
                    version: Version::new(1, 0, 0, 0),
                    fingerprint: Fingerprint([0u8; 32]),
                    artifact_path: "old.bin".into(),
                    exported_symbols: HashSet::new(),
                    state: b"state".to_vec(),
                },
            );
        }
        // patch-level bump is `Compatible`, so `prepare` never checks for a
        // registered transform; `commit` discovers the missing transform
        // for m2 only once m1 has already been published.
        let engine = ReloadEngine::new(dir.path(), registry, MigrationRegistry::new());
        let tx = engine
            .begin_transaction(vec![m1.clone(), m2.clone()], IsolationLevel::default())
            .unwrap();

        let m1_update = update(&m1, Version::new(1, 0, 1, 0), 1);
        let mut m2_update = update(&m2, Version::new(1, 0, 1, 0), 2);
        m2_update.old_state_version = StateVersion(1);
        m2_update.new_state_version = StateVersion(2);

        engine.prepare(tx, vec![m1_update, m2_update]).unwrap();
        assert!(engine.commit(tx).is_err());

        assert_eq!(engine.registry().get(&m1).unwrap().version, Version::new(1, 0, 0, 0));
        assert_eq!(engine.registry().get(&m2).unwrap().version, Version::new(1, 0, 0, 0));
    }

    #[test]
    fn manual_review_conflict_rejects_the_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModuleRegistry::new();
        let m1 = ModuleId::new("m1");
        let m2 = ModuleId::new("m2");
        for id in [&m1, &m2] {
            registry.register(
                id.clone(),
                ModuleHandle {
                    version: Version::new(1, 0, 0, 0),
                    fingerprint: Fingerprint([0u8; 32]),
                    artifact_path: "old.bin".into(),
                    exported_symbols: HashSet::new(),
                    state: Vec::new(),
                },
            );
        }
        let engine = ReloadEngine::new(dir.path(), registry, MigrationRegistry::new());
        let tx = engine
            .begin_transaction(vec![m1.clone(), m2.clone()], IsolationLevel::default())
            .unwrap();

        let mut m1_update = update(&m1, Version::new(1, 0, 1, 0), 1);
        m1_update.old_state_version = StateVersion(1);
        m1_update.new_state_version = StateVersion(1);
        let mut m2_update = update(&m2, Version::new(1, 0, 1, 0), 2);
        m2_update.old_state_version = StateVersion(2);
        m2_update.new_state_version = StateVersion(2);

        let result = engine.prepare(tx, vec![m1_update, m2_update]);
        assert!(matches!(result, Err(ReloadError::ConflictRejected(_))));
        assert!(engine
            .conflict_log()
            .entries()
            .iter()
            .any(|c| matches!(c.outcome, ResolutionOutcome::Rejected(_))));
    }
}
