// SPDX-License-Identifier: Apache-2.0
//! Filesystem event ingestion and debouncing (`spec.md` §4.1 "Watching
//! contract").
//!
//! Built on `notify`, the same crate the wider pack reaches for whenever a
//! hot-reload feature needs real filesystem events rather than polling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;

use hmr_core::error::HmrError;

/// Kind of change observed for a path, collapsed from `notify`'s richer
/// event taxonomy into the four kinds `spec.md` §4.1 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The path did not exist before and now does.
    Created,
    /// The path's content changed.
    Modified,
    /// The path no longer exists.
    Deleted,
    /// The path was renamed; `path` is the new name.
    Renamed,
}

/// A single, debounced filesystem change.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Path the event concerns.
    pub path: PathBuf,
    /// What kind of change occurred.
    pub kind: ChangeKind,
    /// Monotonic observation time, used only for debounce bookkeeping and
    /// relative ordering — never serialized.
    pub observed_at: Instant,
}

fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

/// Coalesces rapid-fire events for the same path within a debounce window
/// into the single latest event (`spec.md` §4.1: "Events for the same path
/// within a configurable debounce window... MUST coalesce to the latest").
///
/// Per-path ordering is preserved by construction: [`Debouncer::drain_ready`]
/// only ever returns at most one pending event per path, replaced in place
/// by later arrivals, so a path's events are never reordered relative to
/// each other. Cross-path ordering is not guaranteed, matching the contract.
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, WatchEvent>,
}

impl Debouncer {
    /// Construct a debouncer with the given coalescing window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record an incoming event, replacing any still-pending event for the
    /// same path.
    pub fn record(&mut self, event: WatchEvent) {
        self.pending.insert(event.path.clone(), event);
    }

    /// Remove and return every pending event whose debounce window has
    /// elapsed relative to `now`.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<WatchEvent> {
        let window = self.window;
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, e)| now.duration_since(e.observed_at) >= window)
            .map(|(p, _)| p.clone())
            .collect();
        ready
            .into_iter()
            .filter_map(|p| self.pending.remove(&p))
            .collect()
    }

    /// `true` if no event is currently waiting out its debounce window.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Default debounce window (`spec.md` §4.1 default: 50-200 ms, midpoint).
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches a set of root directories and delivers debounced [`WatchEvent`]s
/// on a bounded channel.
pub struct Watcher {
    inner: Option<RecommendedWatcher>,
    receiver: crossbeam_channel::Receiver<WatchEvent>,
    debounce_window: Duration,
}

impl Watcher {
    /// Construct a stopped watcher. Call [`Watcher::start`] to begin
    /// ingesting events.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if the underlying OS watch backend fails to
    /// initialize.
    pub fn new(debounce_window: Duration) -> Result<Self, HmrError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let debouncer = Arc::new(Mutex::new(Debouncer::new(debounce_window)));
        let debouncer_for_flush = Arc::clone(&debouncer);
        let tx_for_flush = tx.clone();

        // notify invokes this closure from its own background thread; we
        // only ever touch `debouncer` through the mutex, never the raw
        // watcher handle, so this stays off the frame-loop's call stack.
        let event_handler = move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if let Some(kind) = classify(&event.kind) {
                    let now = Instant::now();
                    let mut guard = debouncer.lock();
                    for path in event.paths {
                        guard.record(WatchEvent {
                            path,
                            kind,
                            observed_at: now,
                        });
                    }
                }
            }
        };

        let watcher = RecommendedWatcher::new(event_handler, notify::Config::default())
            .map_err(|e| HmrError::Config(e.to_string()))?;

        // A low-priority flush thread periodically drains events whose
        // debounce window has elapsed. This keeps the notify callback
        // itself cheap and non-blocking.
        std::thread::Builder::new()
            .name("hmr-watch-flush".into())
            .spawn(move || loop {
                std::thread::sleep(Duration::from_millis(10));
                let ready = debouncer_for_flush.lock().drain_ready(Instant::now());
                for event in ready {
                    if tx_for_flush.send(event).is_err() {
                        return;
                    }
                }
            })
            .map_err(|source| HmrError::Io {
                path: PathBuf::new(),
                source,
            })?;

        Ok(Self {
            inner: Some(watcher),
            receiver: rx,
            debounce_window,
        })
    }

    /// Begin watching `root`, recursively.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if the path cannot be watched.
    pub fn start_watching(&mut self, root: &Path) -> Result<(), HmrError> {
        if let Some(watcher) = &mut self.inner {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| HmrError::Config(e.to_string()))?;
        }
        Ok(())
    }

    /// Stop watching `root`.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if the path was not being watched.
    pub fn stop_watching(&mut self, root: &Path) -> Result<(), HmrError> {
        if let Some(watcher) = &mut self.inner {
            watcher
                .unwatch(root)
                .map_err(|e| HmrError::Config(e.to_string()))?;
        }
        Ok(())
    }

    /// Receiver side of the debounced event channel.
    #[must_use]
    pub fn events(&self) -> &crossbeam_channel::Receiver<WatchEvent> {
        &self.receiver
    }

    /// The debounce window this watcher was constructed with.
    #[must_use]
    pub const fn debounce_window(&self) -> Duration {
        self.debounce_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debouncer_coalesces_rapid_events_for_same_path() {
        let mut deb = Debouncer::new(Duration::from_millis(50));
        let t0 = Instant::now();
        deb.record(WatchEvent {
            path: "a.json".into(),
            kind: ChangeKind::Modified,
            observed_at: t0,
        });
        deb.record(WatchEvent {
            path: "a.json".into(),
            kind: ChangeKind::Modified,
            observed_at: t0 + Duration::from_millis(10),
        });
        assert!(deb.drain_ready(t0 + Duration::from_millis(20)).is_empty());
        let ready = deb.drain_ready(t0 + Duration::from_millis(65));
        assert_eq!(ready.len(), 1);
        assert!(deb.is_empty());
    }

    #[test]
    fn independent_paths_stay_independent() {
        let mut deb = Debouncer::new(Duration::from_millis(10));
        let t0 = Instant::now();
        deb.record(WatchEvent {
            path: "a".into(),
            kind: ChangeKind::Modified,
            observed_at: t0,
        });
        deb.record(WatchEvent {
            path: "b".into(),
            kind: ChangeKind::Created,
            observed_at: t0,
        });
        let ready = deb.drain_ready(t0 + Duration::from_millis(20));
        assert_eq!(ready.len(), 2);
    }
}
