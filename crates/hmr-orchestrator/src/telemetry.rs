// SPDX-License-Identifier: Apache-2.0
//! Per-agent telemetry samples and circular buffers (`spec.md` §3 "Sample",
//! §4.4 "Collection").

use std::collections::{HashMap, VecDeque};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Default circular-buffer capacity per agent (`spec.md` §4.4).
pub const DEFAULT_CAPACITY: usize = 10_000;

/// A timestamped performance datum tagged by the agent that produced it
/// (`spec.md` §3 "Sample").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Wall-clock time the sample was taken, in nanoseconds since an
    /// arbitrary epoch fixed at process start.
    pub timestamp_ns: u64,
    /// CPU utilization, 0.0-100.0.
    pub cpu_percent: f32,
    /// Resident memory in bytes.
    pub memory_bytes: u64,
    /// Frames per second, if the agent renders frames.
    pub fps: f32,
    /// Operation latency in nanoseconds.
    pub latency_ns: u64,
    /// Throughput in operations per second.
    pub throughput_ops: f64,
}

/// Anything the orchestrator can pull a [`Sample`] from.
pub trait Agent: Send + Sync {
    /// Stable identifier this agent's samples are filed under.
    fn agent_id(&self) -> &str;
    /// Produce a fresh sample reflecting the agent's current state.
    fn sample(&self) -> Sample;
}

/// Fixed-capacity ring buffer; the oldest sample is overwritten once full
/// (`spec.md` §3 "oldest samples are overwritten").
#[derive(Debug)]
pub struct CircularBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> CircularBuffer<T> {
    /// Construct a buffer holding at most `capacity` items.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Push a new item, evicting the oldest if at capacity.
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// The most recently pushed item.
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// The last `n` items, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).collect()
    }

    /// Number of items currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `true` if no items have been pushed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Registry of per-agent sample buffers. Buffer access is mutex-guarded
/// rather than a true lock-free SPSC channel, matching the rest of this
/// workspace's `parking_lot`-based concurrency style; each agent's own
/// mutex is independent so agents never contend with each other.
#[derive(Debug, Default)]
pub struct TelemetryStore {
    buffers: RwLock<HashMap<String, Mutex<CircularBuffer<Sample>>>>,
    capacity: usize,
}

impl TelemetryStore {
    /// Construct an empty store using [`DEFAULT_CAPACITY`] per agent.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Construct an empty store with an explicit per-agent capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Record `sample` for `agent_id`, creating its buffer on first use.
    pub fn record(&self, agent_id: &str, sample: Sample) {
        if let Some(buffer) = self.buffers.read().get(agent_id) {
            buffer.lock().push(sample);
            return;
        }
        let mut buffers = self.buffers.write();
        buffers
            .entry(agent_id.to_string())
            .or_insert_with(|| Mutex::new(CircularBuffer::new(self.capacity)))
            .lock()
            .push(sample);
    }

    /// The most recent sample for `agent_id`, if any have been recorded.
    #[must_use]
    pub fn latest(&self, agent_id: &str) -> Option<Sample> {
        self.buffers.read().get(agent_id).and_then(|b| b.lock().latest().copied())
    }

    /// The last `n` samples for `agent_id`, oldest first.
    #[must_use]
    pub fn recent(&self, agent_id: &str, n: usize) -> Vec<Sample> {
        self.buffers
            .read()
            .get(agent_id)
            .map(|b| b.lock().recent(n).into_iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every agent id currently tracked.
    #[must_use]
    pub fn agent_ids(&self) -> Vec<String> {
        self.buffers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(latency_ns: u64) -> Sample {
        Sample {
            timestamp_ns: 0,
            cpu_percent: 0.0,
            memory_bytes: 0,
            fps: 0.0,
            latency_ns,
            throughput_ops: 0.0,
        }
    }

    #[test]
    fn buffer_overwrites_oldest_once_full() {
        let mut buffer = CircularBuffer::new(2);
        buffer.push(sample(1));
        buffer.push(sample(2));
        buffer.push(sample(3));
        assert_eq!(buffer.len(), 2);
        let recent = buffer.recent(2);
        assert_eq!(recent[0].latency_ns, 2);
        assert_eq!(recent[1].latency_ns, 3);
    }

    #[test]
    fn store_creates_per_agent_buffers_on_first_write() {
        let store = TelemetryStore::with_capacity(4);
        assert!(store.latest("sim").is_none());
        store.record("sim", sample(10));
        store.record("render", sample(20));
        assert_eq!(store.latest("sim").unwrap().latency_ns, 10);
        assert_eq!(store.latest("render").unwrap().latency_ns, 20);
        assert_eq!(store.agent_ids().len(), 2);
    }

    #[test]
    fn recent_caps_at_available_length() {
        let store = TelemetryStore::with_capacity(10);
        store.record("sim", sample(1));
        store.record("sim", sample(2));
        assert_eq!(store.recent("sim", 50).len(), 2);
    }
}
