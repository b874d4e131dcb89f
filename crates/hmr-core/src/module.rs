// SPDX-License-Identifier: Apache-2.0
//! Hot-reloadable module records (`spec.md` §3 "Module").

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::artifact::Fingerprint;
use crate::version::Version;

/// Stable string identifier for a module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub String);

impl ModuleId {
    /// Wrap an owned string as a module identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::borrow::Borrow<str> for ModuleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// An operation a module declares support for. Capabilities gate which
/// reload/migration machinery the engine may apply to a module — e.g. a
/// module without `StateMigration` can never have a migration transform
/// run against it, and the engine must treat any `MigrationRequired`
/// transition for it as [`crate::error::ReturnCode::VersionMismatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Module can produce/consume an opaque state blob across reloads.
    StateMigration,
    /// Module may participate in multi-module transactions.
    TransactionalSwap,
    /// Module supports being quarantined after a runtime failure.
    Quarantine,
    /// Module may be unregistered while the host is running.
    HotUnregister,
}

/// A binding from an imported symbol name to the module identifier that
/// provides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBinding {
    /// Imported symbol name.
    pub symbol: String,
    /// Module expected to export this symbol.
    pub provider: ModuleId,
}

/// A unit of hot-reloadable code plus its metadata (`spec.md` §3).
///
/// The registry owns this record exclusively; running code only ever holds
/// a versioned handle (see `hmr-reload`'s `ModuleHandle`), never the record
/// itself, per the ownership rule in `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Stable identifier.
    pub id: ModuleId,
    /// Current semantic version and stability flag.
    pub version: Version,
    /// Path to the module's source on disk.
    pub source_path: std::path::PathBuf,
    /// Path to the module's compiled artifact on disk, if built.
    pub artifact_path: Option<std::path::PathBuf>,
    /// Fingerprint of the artifact currently published, if any.
    pub fingerprint: Option<Fingerprint>,
    /// Symbols this module exports.
    pub exported_symbols: HashSet<String>,
    /// Symbols this module imports, with provider bindings.
    pub imports: Vec<ImportBinding>,
    /// Opaque state blob carried across reloads.
    pub state: Vec<u8>,
    /// Operations this module supports.
    pub capabilities: HashSet<Capability>,
}

impl Module {
    /// Construct a freshly-registered module with no artifact built yet and
    /// an empty state blob.
    #[must_use]
    pub fn new(id: ModuleId, version: Version, source_path: std::path::PathBuf) -> Self {
        Self {
            id,
            version,
            source_path,
            artifact_path: None,
            fingerprint: None,
            exported_symbols: HashSet::new(),
            imports: Vec::new(),
            state: Vec::new(),
            capabilities: HashSet::new(),
        }
    }

    /// Returns `true` if this module declares `capability`.
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Owns the canonical set of registered modules, keyed by identifier.
///
/// This is a plain in-memory table; `hmr-reload::registry::ModuleRegistry`
/// wraps one of these with the versioned-handle publication machinery
/// needed for lock-free reads during a running frame.
#[derive(Debug, Default)]
pub struct ModuleTable {
    modules: HashMap<ModuleId, Module>,
}

impl ModuleTable {
    /// Construct an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Register `module`. Returns `false` without mutating the table if a
    /// module with the same identifier already exists.
    pub fn register(&mut self, module: Module) -> bool {
        if self.modules.contains_key(&module.id) {
            return false;
        }
        self.modules.insert(module.id.clone(), module);
        true
    }

    /// Remove a module by identifier, returning it if present.
    pub fn unregister(&mut self, id: &ModuleId) -> Option<Module> {
        self.modules.remove(id)
    }

    /// Look up a module by identifier.
    #[must_use]
    pub fn get(&self, id: &ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    /// Look up a module mutably by identifier.
    pub fn get_mut(&mut self, id: &ModuleId) -> Option<&mut Module> {
        self.modules.get_mut(id)
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if no modules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    fn module(id: &str) -> Module {
        Module::new(ModuleId::new(id), Version::new(1, 0, 0, 0), "src/x".into())
    }

    #[test]
    fn register_then_unregister_restores_prior_state() {
        let mut table = ModuleTable::new();
        assert!(table.is_empty());
        table.register(module("sim"));
        assert_eq!(table.len(), 1);
        let removed = table.unregister(&ModuleId::new("sim"));
        assert!(removed.is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn duplicate_register_is_rejected() {
        let mut table = ModuleTable::new();
        assert!(table.register(module("sim")));
        assert!(!table.register(module("sim")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn capability_gate() {
        let mut m = module("sim");
        assert!(!m.supports(Capability::StateMigration));
        m.capabilities.insert(Capability::StateMigration);
        assert!(m.supports(Capability::StateMigration));
    }
}
