// SPDX-License-Identifier: Apache-2.0
//! Transactional Reload Engine: atomic module swap with state migration,
//! conflict detection/merge, write-ahead logging, and rollback.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod conflict;
pub mod engine;
pub mod migration;
pub mod platform;
pub mod registry;
pub mod transaction;
pub mod wal;

pub use conflict::{Conflict, ConflictLog, ConflictType, ResolutionOutcome, ResolutionStrategy, Severity};
pub use engine::{ParticipantUpdate, ReloadEngine, ReloadError, TimingViolation};
pub use migration::{MigrationRegistry, StateTransform, StateVersion};
pub use registry::{ModuleHandle, ModuleRegistry};
pub use transaction::{InvalidTransition, IsolationLevel, Phase, Transaction, TxId};
pub use wal::{RecoveredTransaction, WriteAheadLog};
