// SPDX-License-Identifier: Apache-2.0
//! Lock-free module registry (`spec.md` §5: "Module registry:
//! single-writer/multi-reader; writes happen only during commit; reads are
//! lock-free (versioned handles)").
//!
//! Each module's live handle lives behind its own `ArcSwap`, grounded on
//! the `CURRENT_DESCRIPTOR` atomic-promotion pattern used for snapshot
//! publication elsewhere in the pack — generalized here to per-module
//! instances rather than one process-wide global, per the "no global
//! singletons" redesign note.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use hmr_core::{Fingerprint, ModuleId, Version};

/// The immutable, versioned snapshot a reader observes for one module.
/// Readers that load a [`ModuleHandle`] before a publish complete against
/// the old version; readers that load after see the new one
/// (`spec.md` §4.2 "Atomicity and isolation").
///
/// `Serialize`/`Deserialize` back rollback snapshots at
/// `<state_root>/rollback/<module_id>/<checkpoint_id>.snap` (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleHandle {
    /// Version this handle represents.
    pub version: Version,
    /// Fingerprint of the published artifact.
    pub fingerprint: Fingerprint,
    /// On-disk path of the published artifact.
    pub artifact_path: std::path::PathBuf,
    /// Exported symbol names, as of this version.
    pub exported_symbols: HashSet<String>,
    /// Opaque state blob carried across the publish that produced this
    /// handle.
    pub state: Vec<u8>,
}

/// Registry of live module handles, keyed by [`ModuleId`].
///
/// Registration (adding a brand new module) takes the table's internal
/// lock briefly; publishing a new version for an already-registered module
/// never does — it is a single `ArcSwap::store`.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    table: DashMap<ModuleId, ArcSwap<ModuleHandle>>,
}

impl ModuleRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: DashMap::new(),
        }
    }

    /// Register a module's initial handle. Returns `false` without
    /// mutating the registry if `id` is already registered — use
    /// [`ModuleRegistry::publish`] to update an existing module.
    pub fn register(&self, id: ModuleId, handle: ModuleHandle) -> bool {
        if self.table.contains_key(&id) {
            return false;
        }
        self.table.insert(id, ArcSwap::new(Arc::new(handle)));
        true
    }

    /// Remove a module entirely.
    pub fn unregister(&self, id: &ModuleId) -> bool {
        self.table.remove(id).is_some()
    }

    /// Lock-free read of a module's current handle.
    #[must_use]
    pub fn get(&self, id: &ModuleId) -> Option<Guard<Arc<ModuleHandle>>> {
        self.table.get(id).map(|entry| entry.load())
    }

    /// Publish a new handle for an already-registered module. This is the
    /// single linearizable step `spec.md` §4.2 calls "an atomic pointer
    /// swap of the module's handle" — the previous handle is returned so
    /// the caller can retain it as a pre-image.
    ///
    /// Returns `None` if `id` is not registered.
    pub fn publish(&self, id: &ModuleId, handle: ModuleHandle) -> Option<Arc<ModuleHandle>> {
        let entry = self.table.get(id)?;
        Some(entry.swap(Arc::new(handle)))
    }

    /// `true` if `id` is currently registered.
    #[must_use]
    pub fn contains(&self, id: &ModuleId) -> bool {
        self.table.contains_key(id)
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if no modules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(version: Version) -> ModuleHandle {
        ModuleHandle {
            version,
            fingerprint: Fingerprint([1u8; 32]),
            artifact_path: "a.bin".into(),
            exported_symbols: HashSet::new(),
            state: Vec::new(),
        }
    }

    #[test]
    fn publish_swaps_atomically_and_returns_old_handle() {
        let registry = ModuleRegistry::new();
        let id = ModuleId::new("sim");
        registry.register(id.clone(), handle(Version::new(1, 0, 0, 0)));

        let old = registry
            .publish(&id, handle(Version::new(1, 0, 1, 0)))
            .expect("module was registered");
        assert_eq!(old.version, Version::new(1, 0, 0, 0));

        let current = registry.get(&id).expect("module still registered");
        assert_eq!(current.version, Version::new(1, 0, 1, 0));
    }

    #[test]
    fn publish_to_unregistered_module_is_none() {
        let registry = ModuleRegistry::new();
        let id = ModuleId::new("ghost");
        assert!(registry.publish(&id, handle(Version::new(1, 0, 0, 0))).is_none());
    }

    #[test]
    fn register_then_unregister_restores_prior_state() {
        let registry = ModuleRegistry::new();
        let id = ModuleId::new("sim");
        assert!(registry.is_empty());
        registry.register(id.clone(), handle(Version::new(1, 0, 0, 0)));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(&id));
        assert!(registry.is_empty());
    }
}
