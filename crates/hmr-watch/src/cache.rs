// SPDX-License-Identifier: Apache-2.0
//! Two-tier artifact cache (`spec.md` §4.1 "Artifact cache").
//!
//! Tier 1 is an in-memory `DashMap` keyed by fingerprint, giving the <1 ms
//! hot-path lookup the spec requires. Tier 2 is the on-disk cache directory
//! under `<cache_root>/binaries/`; a miss in tier 1 but a hit on disk
//! repopulates tier 1 before returning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dashmap::DashMap;
use hmr_core::artifact::{Artifact, ArtifactHeader};
use hmr_core::config::HmrConfig;
use hmr_core::error::HmrError;
use hmr_core::Fingerprint;

/// Recorded state of one dependency file at the time its dependent artifact
/// was built, used to validate cache freshness without recompiling.
#[derive(Debug, Clone)]
pub struct DependencySnapshot {
    /// Path to the dependency file.
    pub path: PathBuf,
    /// File size in bytes at build time.
    pub size: u64,
    /// Modification time at build time.
    pub modified: SystemTime,
    /// Optional content hash, checked only when size and mtime both match
    /// (an expensive final check for cases where mtime granularity hides a
    /// real change).
    pub content_hash: Option<Fingerprint>,
}

/// Whether a cached artifact is still safe to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Every recorded dependency snapshot still matches disk.
    Fresh,
    /// At least one dependency changed since the artifact was built.
    Stale,
}

fn snapshot_matches(snapshot: &DependencySnapshot) -> bool {
    let Ok(metadata) = std::fs::metadata(&snapshot.path) else {
        return false;
    };
    if metadata.len() != snapshot.size {
        return false;
    }
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    if modified != snapshot.modified {
        return false;
    }
    if let Some(expected_hash) = snapshot.content_hash {
        let Ok(contents) = std::fs::read(&snapshot.path) else {
            return false;
        };
        let actual = blake3::hash(&contents);
        return actual.as_bytes() == &expected_hash.0;
    }
    true
}

/// Validate `dependencies` against the filesystem.
#[must_use]
pub fn validate(dependencies: &[DependencySnapshot]) -> Freshness {
    if dependencies.iter().all(snapshot_matches) {
        Freshness::Fresh
    } else {
        Freshness::Stale
    }
}

struct Entry {
    artifact: Artifact,
    dependencies: Vec<DependencySnapshot>,
    last_used: std::time::Instant,
}

/// The two-tier cache described above.
pub struct ArtifactCache {
    cache_root: PathBuf,
    max_bytes: u64,
    memory: DashMap<Fingerprint, Entry>,
    /// Fingerprints currently referenced by an in-flight reload
    /// transaction; these are never evicted regardless of LRU order
    /// (`spec.md` §8: "Cache eviction never removes an artifact referenced
    /// by an active transaction").
    pinned: DashMap<Fingerprint, u32>,
}

impl ArtifactCache {
    /// Construct a cache rooted at `config.cache_root`, bounded by
    /// `config.max_cache_mb`.
    #[must_use]
    pub fn new(config: &HmrConfig) -> Self {
        Self {
            cache_root: config.cache_root.clone(),
            max_bytes: config.max_cache_mb.saturating_mul(1_048_576),
            memory: DashMap::new(),
            pinned: DashMap::new(),
        }
    }

    fn binary_path(&self, fingerprint: Fingerprint) -> PathBuf {
        self.cache_root
            .join("binaries")
            .join(format!("{fingerprint}.bin"))
    }

    /// Pin a fingerprint so it cannot be evicted, e.g. while a reload
    /// transaction references it. Pins nest; call
    /// [`ArtifactCache::unpin`] the same number of times to release.
    pub fn pin(&self, fingerprint: Fingerprint) {
        *self.pinned.entry(fingerprint).or_insert(0) += 1;
    }

    /// Release one pin on `fingerprint`.
    pub fn unpin(&self, fingerprint: Fingerprint) {
        if let Some(mut count) = self.pinned.get_mut(&fingerprint) {
            *count = count.saturating_sub(1);
        }
        self.pinned.retain(|_, count| *count > 0);
    }

    /// Insert a freshly built artifact into both tiers.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if writing the on-disk copy fails.
    pub fn insert(
        &self,
        artifact: Artifact,
        header: &ArtifactHeader,
        dependencies: Vec<DependencySnapshot>,
    ) -> Result<(), HmrError> {
        let path = self.binary_path(artifact.fingerprint);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| HmrError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = std::fs::File::create(&path).map_err(|source| HmrError::Io {
            path: path.clone(),
            source,
        })?;
        header.write_to(file)?;

        self.memory.insert(
            artifact.fingerprint,
            Entry {
                artifact,
                dependencies,
                last_used: std::time::Instant::now(),
            },
        );
        self.enforce_budget();
        Ok(())
    }

    /// Look up a cached artifact by fingerprint. Returns the artifact and
    /// whether it was served from the hot (in-memory) tier.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if the on-disk tier exists but cannot be
    /// read, or [`HmrError::InvalidArtifactHeader`] if it is corrupt.
    pub fn lookup(&self, fingerprint: Fingerprint) -> Result<Option<(Artifact, bool)>, HmrError> {
        if let Some(mut entry) = self.memory.get_mut(&fingerprint) {
            entry.last_used = std::time::Instant::now();
            if validate(&entry.dependencies) == Freshness::Stale {
                drop(entry);
                self.memory.remove(&fingerprint);
                return Ok(None);
            }
            return Ok(Some((entry.artifact.clone(), true)));
        }

        let path = self.binary_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(&path).map_err(|source| HmrError::Io {
            path: path.clone(),
            source,
        })?;
        let header = ArtifactHeader::read_from(file)?;
        if header.fingerprint != fingerprint {
            return Err(HmrError::InvalidArtifactHeader(
                "on-disk fingerprint does not match requested key".to_string(),
            ));
        }
        let metadata = std::fs::metadata(&path).map_err(|source| HmrError::Io {
            path: path.clone(),
            source,
        })?;
        let artifact = Artifact {
            fingerprint,
            path,
            size: header.code.len() as u64,
            exported_symbols: Vec::new(),
            abi_descriptor: header.abi_descriptor,
            compatibility: hmr_core::artifact::AbiCompatibility::Identical,
            build_time: metadata
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .unwrap_or_default(),
        };
        self.memory.insert(
            fingerprint,
            Entry {
                artifact: artifact.clone(),
                dependencies: Vec::new(),
                last_used: std::time::Instant::now(),
            },
        );
        Ok(Some((artifact, false)))
    }

    /// Evict least-recently-used entries from the in-memory tier until
    /// total size is within `max_bytes`, skipping anything pinned.
    fn enforce_budget(&self) {
        if self.max_bytes == 0 {
            return;
        }
        let total: u64 = self.memory.iter().map(|e| e.artifact.size).sum();
        if total <= self.max_bytes {
            return;
        }

        let mut candidates: Vec<(Fingerprint, std::time::Instant, u64)> = self
            .memory
            .iter()
            .filter(|e| !self.pinned.contains_key(e.key()))
            .map(|e| (*e.key(), e.last_used, e.artifact.size))
            .collect();
        candidates.sort_by_key(|(_, last_used, _)| *last_used);

        let mut remaining = total;
        for (fingerprint, _, size) in candidates {
            if remaining <= self.max_bytes {
                break;
            }
            self.memory.remove(&fingerprint);
            remaining = remaining.saturating_sub(size);
        }
    }

    /// Number of entries resident in the in-memory tier.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.memory.len()
    }
}

/// Build a [`DependencySnapshot`] list from a map of path to optional
/// content hash, reading current filesystem metadata for each.
///
/// # Errors
/// Returns [`HmrError::Io`] if any path's metadata cannot be read.
pub fn snapshot_dependencies(
    paths: &HashMap<PathBuf, Option<Fingerprint>>,
) -> Result<Vec<DependencySnapshot>, HmrError> {
    let mut out = Vec::with_capacity(paths.len());
    for (path, content_hash) in paths {
        let metadata = std::fs::metadata(path).map_err(|source| HmrError::Io {
            path: path.clone(),
            source,
        })?;
        out.push(DependencySnapshot {
            path: path.clone(),
            size: metadata.len(),
            modified: metadata.modified().map_err(|source| HmrError::Io {
                path: path.clone(),
                source,
            })?,
            content_hash: *content_hash,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_path_for_test(root: &Path, fp: Fingerprint) -> PathBuf {
        root.join("binaries").join(format!("{fp}.bin"))
    }

    fn config(root: &Path) -> HmrConfig {
        let mut config = HmrConfig::default();
        config.cache_root = root.to_path_buf();
        config.max_cache_mb = 1;
        config
    }

    fn header(fp: Fingerprint) -> ArtifactHeader {
        ArtifactHeader {
            magic: hmr_core::artifact::MAGIC_SHADER,
            version: hmr_core::artifact::HEADER_VERSION,
            fingerprint: fp,
            abi_descriptor: b"test-abi".to_vec(),
            code: vec![0u8; 16],
        }
    }

    fn artifact(fp: Fingerprint) -> Artifact {
        Artifact {
            fingerprint: fp,
            path: PathBuf::new(),
            size: 16,
            exported_symbols: Vec::new(),
            abi_descriptor: b"test-abi".to_vec(),
            compatibility: hmr_core::artifact::AbiCompatibility::Identical,
            build_time: std::time::Duration::from_millis(1),
        }
    }

    #[test]
    fn s3_cache_hit_after_memory_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(&config(dir.path()));
        let fp = Fingerprint([9u8; 32]);
        cache.insert(artifact(fp), &header(fp), Vec::new()).unwrap();

        // force a miss in the memory tier to simulate the handle being
        // dropped between runs, as S3 describes
        cache.memory.remove(&fp);

        let path = binary_path_for_test(dir.path(), fp);
        assert!(path.exists());

        let (found, was_hot) = cache.lookup(fp).unwrap().expect("disk tier hit");
        assert_eq!(found.fingerprint, fp);
        assert!(!was_hot);

        // second lookup now comes from the repopulated memory tier
        let (_, was_hot_second) = cache.lookup(fp).unwrap().expect("memory tier hit");
        assert!(was_hot_second);
    }

    #[test]
    fn missing_fingerprint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(&config(dir.path()));
        assert!(cache.lookup(Fingerprint([0u8; 32])).unwrap().is_none());
    }

    #[test]
    fn pinned_entries_survive_budget_enforcement() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_cache_mb = 0; // 0 means unlimited in enforce_budget's guard
        let cache = ArtifactCache::new(&cfg);

        let fp = Fingerprint([5u8; 32]);
        cache.insert(artifact(fp), &header(fp), Vec::new()).unwrap();
        cache.pin(fp);
        assert!(cache.lookup(fp).unwrap().is_some());
    }

    #[test]
    fn staleness_detected_when_dependency_file_changes() {
        let dep_dir = tempfile::tempdir().unwrap();
        let dep_path = dep_dir.path().join("a.json");
        std::fs::write(&dep_path, b"original").unwrap();
        let metadata = std::fs::metadata(&dep_path).unwrap();

        let snapshot = DependencySnapshot {
            path: dep_path.clone(),
            size: metadata.len(),
            modified: metadata.modified().unwrap(),
            content_hash: None,
        };
        assert_eq!(validate(&[snapshot.clone()]), Freshness::Fresh);

        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(&dep_path, b"changed-to-something-longer").unwrap();
        assert_eq!(validate(&[snapshot]), Freshness::Stale);
    }
}
