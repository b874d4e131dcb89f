// SPDX-License-Identifier: Apache-2.0
//! Watch-and-Build Pipeline: filesystem observation, dependency graph
//! maintenance, build scheduling, and artifact caching.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod cache;
pub mod pipeline;
pub mod scheduler;
pub mod watcher;

pub use cache::{ArtifactCache, DependencySnapshot, Freshness};
pub use pipeline::{AssetKind, Pipeline};
pub use scheduler::{
    BuildFailure, BuildOutcome, BuildScheduler, BuildSpec, CoreAffinityHint, JobHandle, JobId,
    JobState, Priority,
};
pub use watcher::{ChangeKind, Debouncer, WatchEvent, Watcher, DEFAULT_DEBOUNCE};
