// SPDX-License-Identifier: Apache-2.0
//! Write-ahead log for crash recovery (`spec.md` §4.2 "Write-ahead log",
//! §6 "Filesystem layout").
//!
//! One append-only file per transaction at
//! `<state_root>/wal/<timestamp>-<txid>.log`. `prepare` appends a record
//! before any observable mutation; a second record marks the transaction
//! committed. The file is truncated (removed) once the transaction reaches
//! a terminal phase.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use hmr_core::error::HmrError;
use hmr_core::{Fingerprint, ModuleId};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum WalLine {
    Prepare {
        tx_id: u64,
        participants: Vec<String>,
        new_fingerprints: HashMap<String, [u8; 32]>,
    },
    Committed {
        tx_id: u64,
    },
}

/// What recovery found for one on-disk WAL file.
#[derive(Debug, Clone)]
pub struct RecoveredTransaction {
    /// Path to the WAL file this entry was read from.
    pub path: PathBuf,
    /// Transaction identifier recorded in the file.
    pub tx_id: u64,
    /// Participants recorded at `prepare` time.
    pub participants: Vec<ModuleId>,
    /// New fingerprint each participant was being moved to.
    pub new_fingerprints: HashMap<ModuleId, Fingerprint>,
    /// `true` if a `Committed` marker was found — recovery should roll the
    /// transaction forward; `false` means roll it back (no-op, since
    /// publication only happens during `commit`).
    pub committed: bool,
}

/// Append-only write-ahead log rooted at `<state_root>/wal/`.
pub struct WriteAheadLog {
    dir: PathBuf,
}

impl WriteAheadLog {
    /// Construct a log rooted at `state_root`.
    #[must_use]
    pub fn new(state_root: &Path) -> Self {
        Self {
            dir: state_root.join("wal"),
        }
    }

    fn path_for(&self, tx_id: u64, started_at_nanos: u128) -> PathBuf {
        self.dir.join(format!("{started_at_nanos}-{tx_id}.log"))
    }

    /// Append the `prepare` record for a transaction, creating its WAL
    /// file. Must be called, and its write flushed, before the transaction
    /// may enter `commit` (`spec.md` §4.2).
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if the file cannot be created or written.
    pub fn record_prepare(
        &self,
        tx_id: u64,
        started_at_nanos: u128,
        participants: &[ModuleId],
        new_fingerprints: &HashMap<ModuleId, Fingerprint>,
    ) -> Result<PathBuf, HmrError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| HmrError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(tx_id, started_at_nanos);
        let line = WalLine::Prepare {
            tx_id,
            participants: participants.iter().map(|p| p.0.clone()).collect(),
            new_fingerprints: new_fingerprints
                .iter()
                .map(|(id, fp)| (id.0.clone(), fp.0))
                .collect(),
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| HmrError::Io {
                path: path.clone(),
                source,
            })?;
        write_line(&mut file, &line, &path)?;
        file.sync_all().map_err(|source| HmrError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Append the `committed` marker for a transaction's WAL file.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if the write or flush fails.
    pub fn record_commit(&self, path: &Path, tx_id: u64) -> Result<(), HmrError> {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|source| HmrError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        write_line(&mut file, &WalLine::Committed { tx_id }, path)?;
        file.sync_all().map_err(|source| HmrError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Remove a transaction's WAL file once it has reached a terminal
    /// phase.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if removal fails for a reason other than
    /// the file already being gone.
    pub fn truncate(&self, path: &Path) -> Result<(), HmrError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(HmrError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Scan the WAL directory and return every transaction found, with
    /// their commit status, for crash recovery at startup.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if the directory cannot be read.
    pub fn recover(&self) -> Result<Vec<RecoveredTransaction>, HmrError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|source| HmrError::Io {
            path: self.dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| HmrError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }
            if let Some(recovered) = Self::parse_file(&path)? {
                out.push(recovered);
            }
        }
        Ok(out)
    }

    fn parse_file(path: &Path) -> Result<Option<RecoveredTransaction>, HmrError> {
        let file = std::fs::File::open(path).map_err(|source| HmrError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = std::io::BufReader::new(file);

        let mut base: Option<RecoveredTransaction> = None;
        for line in reader.lines() {
            let line = line.map_err(|source| HmrError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: WalLine = serde_json::from_str(&line)
                .map_err(|e| HmrError::Config(format!("corrupt WAL line in {path:?}: {e}")))?;
            match parsed {
                WalLine::Prepare {
                    tx_id,
                    participants,
                    new_fingerprints,
                } => {
                    base = Some(RecoveredTransaction {
                        path: path.to_path_buf(),
                        tx_id,
                        participants: participants.into_iter().map(ModuleId::new).collect(),
                        new_fingerprints: new_fingerprints
                            .into_iter()
                            .map(|(id, bytes)| (ModuleId::new(id), Fingerprint(bytes)))
                            .collect(),
                        committed: false,
                    });
                }
                WalLine::Committed { .. } => {
                    if let Some(entry) = base.as_mut() {
                        entry.committed = true;
                    }
                }
            }
        }
        Ok(base)
    }
}

fn write_line(file: &mut std::fs::File, line: &WalLine, path: &Path) -> Result<(), HmrError> {
    let json = serde_json::to_string(line)
        .map_err(|e| HmrError::Config(format!("failed to serialize WAL record: {e}")))?;
    writeln!(file, "{json}").map_err(|source| HmrError::Io {
        path: path.to_path_buf(),
        source,
    })
}
