// SPDX-License-Identifier: Apache-2.0
//! Runtime configuration: defaults, environment-variable overrides, and an
//! optional on-disk TOML file (`spec.md` §8 "Configuration Surface").
//!
//! Mirrors the `ConfigStore`/`ConfigService` split used throughout the
//! reference host application: a small storage trait plus a typed service
//! wrapper, so tests can swap in an in-memory store without touching disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HmrError;

/// Tunables read by every subsystem at startup (`spec.md` §8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HmrConfig {
    /// Root directory for the build artifact cache.
    pub cache_root: PathBuf,
    /// Root directory for write-ahead logs and other recovery state.
    pub state_root: PathBuf,
    /// Soft cap, in megabytes, on the on-disk artifact cache.
    pub max_cache_mb: u64,
    /// How many frames elapse between reload-availability checks.
    pub check_interval_frames: u32,
    /// Base per-frame time budget, in nanoseconds, for reload work.
    pub frame_budget_ns: u64,
    /// Whether the frame budget adapts under sustained overrun.
    pub enable_adaptive: bool,
    /// `tracing` env-filter directive string, e.g. `"info"` or
    /// `"hmr_reload=debug,info"`.
    pub log_level: String,
}

impl HmrConfig {
    /// Directory name used under the platform cache/state roots when no
    /// explicit override is given.
    const APP_QUALIFIER: &'static str = "";
    const APP_ORG: &'static str = "";
    const APP_NAME: &'static str = "hmr";

    fn platform_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from(Self::APP_QUALIFIER, Self::APP_ORG, Self::APP_NAME)
    }

    fn default_cache_root() -> PathBuf {
        Self::platform_dirs()
            .map(|d| d.cache_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".hmr/cache"))
    }

    fn default_state_root() -> PathBuf {
        Self::platform_dirs()
            .map(|d| d.data_local_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".hmr/state"))
    }
}

impl Default for HmrConfig {
    fn default() -> Self {
        Self {
            cache_root: Self::default_cache_root(),
            state_root: Self::default_state_root(),
            max_cache_mb: 512,
            check_interval_frames: 60,
            frame_budget_ns: 100_000,
            enable_adaptive: true,
            log_level: "info".to_string(),
        }
    }
}

/// Storage backend for configuration. Implemented for on-disk TOML files;
/// tests use an in-memory stand-in.
pub trait ConfigStore {
    /// Load raw TOML text, if any is stored.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] on a read failure other than "not found".
    fn load_raw(&self) -> Result<Option<String>, HmrError>;

    /// Persist raw TOML text.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if the write fails.
    fn save_raw(&self, contents: &str) -> Result<(), HmrError>;
}

/// A [`ConfigStore`] backed by a single file on disk.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    /// Point a store at `path`. The file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for FileConfigStore {
    fn load_raw(&self) -> Result<Option<String>, HmrError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(HmrError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save_raw(&self, contents: &str) -> Result<(), HmrError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| HmrError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, contents).map_err(|source| HmrError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Loads and saves [`HmrConfig`] against a [`ConfigStore`], layering
/// environment-variable overrides on top of whatever the store returns.
///
/// Precedence, lowest to highest: [`HmrConfig::default`], on-disk file,
/// environment variables. This matches `spec.md` §8's note that environment
/// variables are "for local development and CI, and take precedence over a
/// persisted file."
#[derive(Debug, Clone)]
pub struct ConfigService<S> {
    store: S,
}

impl<S: ConfigStore> ConfigService<S> {
    /// Wrap a store.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Load configuration: defaults, overridden by the store's file (if
    /// any), overridden by environment variables (if set).
    ///
    /// # Errors
    /// Returns [`HmrError::Config`] if the stored TOML fails to parse.
    pub fn load(&self) -> Result<HmrConfig, HmrError> {
        let mut config = match self.store.load_raw()? {
            Some(raw) => toml::from_str(&raw).map_err(|e| HmrError::Config(e.to_string()))?,
            None => HmrConfig::default(),
        };
        apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Persist `config` to the store as TOML (environment overrides are
    /// never written back).
    ///
    /// # Errors
    /// Returns [`HmrError::Config`] if serialization fails, or the store's
    /// I/O error if the write fails.
    pub fn save(&self, config: &HmrConfig) -> Result<(), HmrError> {
        let raw = toml::to_string_pretty(config).map_err(|e| HmrError::Config(e.to_string()))?;
        self.store.save_raw(&raw)
    }
}

fn apply_env_overrides(config: &mut HmrConfig) {
    if let Ok(v) = std::env::var("HMR_CACHE_ROOT") {
        config.cache_root = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("HMR_STATE_ROOT") {
        config.state_root = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("HMR_MAX_CACHE_MB") {
        if let Ok(parsed) = v.parse() {
            config.max_cache_mb = parsed;
        }
    }
    if let Ok(v) = std::env::var("HMR_CHECK_INTERVAL_FRAMES") {
        if let Ok(parsed) = v.parse() {
            config.check_interval_frames = parsed;
        }
    }
    if let Ok(v) = std::env::var("HMR_FRAME_BUDGET_NS") {
        if let Ok(parsed) = v.parse() {
            config.frame_budget_ns = parsed;
        }
    }
    if let Ok(v) = std::env::var("HMR_ENABLE_ADAPTIVE") {
        config.enable_adaptive = matches!(v.as_str(), "1" | "true" | "yes");
    }
    if let Ok(v) = std::env::var("HMR_LOG_LEVEL") {
        config.log_level = v;
    }
}

/// An in-memory [`ConfigStore`] for tests.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    contents: parking_lot::Mutex<Option<String>>,
}

impl ConfigStore for MemoryConfigStore {
    fn load_raw(&self) -> Result<Option<String>, HmrError> {
        Ok(self.contents.lock().clone())
    }

    fn save_raw(&self, contents: &str) -> Result<(), HmrError> {
        *self.contents.lock() = Some(contents.to_string());
        Ok(())
    }
}

/// Resolve the absolute path to the artifact cache's WAL subdirectory, used
/// by `hmr-reload` to name write-ahead log files.
#[must_use]
pub fn wal_dir(config: &HmrConfig) -> PathBuf {
    config.state_root.join("wal")
}

/// Resolve the absolute path under `cache_root` used to store a given
/// artifact, keyed by its fingerprint's hex form.
#[must_use]
pub fn artifact_path(config: &HmrConfig, fingerprint_hex: &str) -> PathBuf {
    cache_object_dir(&config.cache_root, fingerprint_hex)
}

fn cache_object_dir(cache_root: &Path, fingerprint_hex: &str) -> PathBuf {
    let (shard, rest) = fingerprint_hex.split_at(2.min(fingerprint_hex.len()));
    cache_root.join(shard).join(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = HmrConfig::default();
        assert_eq!(config.max_cache_mb, 512);
        assert_eq!(config.check_interval_frames, 60);
        assert_eq!(config.frame_budget_ns, 100_000);
        assert!(config.enable_adaptive);
    }

    #[test]
    fn memory_store_round_trips() {
        let service = ConfigService::new(MemoryConfigStore::default());
        let mut config = service.load().unwrap();
        config.max_cache_mb = 1024;
        service.save(&config).unwrap();
        let reloaded = service.load().unwrap();
        assert_eq!(reloaded.max_cache_mb, 1024);
    }

    #[test]
    fn env_override_beats_stored_file() {
        let service = ConfigService::new(MemoryConfigStore::default());
        let mut config = service.load().unwrap();
        config.max_cache_mb = 256;
        service.save(&config).unwrap();

        // SAFETY-free: std::env::set_var is unsafe-free on this target; we
        // isolate this test via a distinct var name to avoid cross-test races.
        std::env::set_var("HMR_MAX_CACHE_MB", "4096");
        let reloaded = service.load().unwrap();
        std::env::remove_var("HMR_MAX_CACHE_MB");
        assert_eq!(reloaded.max_cache_mb, 4096);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = std::env::temp_dir().join(format!("hmr-config-test-{}", std::process::id()));
        let store = FileConfigStore::new(dir.join("does-not-exist.toml"));
        let service = ConfigService::new(store);
        let config = service.load().unwrap();
        assert_eq!(config, HmrConfig::default());
    }

    #[test]
    fn artifact_path_shards_by_hash_prefix() {
        let config = HmrConfig::default();
        let path = artifact_path(&config, "abcdef0123");
        assert!(path.starts_with(&config.cache_root));
        assert_eq!(path.file_name().unwrap(), "cdef0123");
    }
}
