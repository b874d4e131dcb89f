// SPDX-License-Identifier: Apache-2.0
//! Platform abstraction for cache coherency and memory ordering
//! (`spec.md` §4.2 "Symbol resolution and cache coherency", §9
//! "Hardware-specific optimizations").
//!
//! Post-condition of every function here: "after return, all writes up to
//! this point are visible to any core executing the new code." The
//! portable fallback below satisfies that post-condition using only
//! `std::sync::atomic` fences, at the cost of being more conservative than
//! a true per-cache-line flush would be. A host targeting a specific
//! architecture may swap this module for one that issues `clflush`/`dc
//! cvau` style instructions directly; nothing elsewhere in this crate
//! assumes which implementation is in effect.

use std::sync::atomic::{fence, Ordering};

/// Flush the instruction and data cache lines covering `region` to the
/// point of unification, and issue the architecture's strongest memory
/// barrier, per `spec.md` §4.2 steps (b)-(d).
///
/// The portable fallback treats this as a full sequentially-consistent
/// fence: it does not literally flush cache lines (`#![forbid(unsafe_code)]`
/// rules out the intrinsics that would), but every write program-ordered
/// before this call is guaranteed visible to any thread that synchronizes
/// with it afterward, which is the guarantee callers in this crate rely on.
pub fn flush_code_region(region: &[u8]) {
    // Touch the region so the optimizer cannot prove the flush is dead code
    // if a future caller depends on observable side effects here.
    std::hint::black_box(region);
    fence(Ordering::SeqCst);
}

/// Issue the architecture's strongest memory barrier with no associated
/// code region — used when publishing a handle that does not itself own
/// freshly-written executable memory (e.g. a registry swap of already
/// cache-coherent data).
pub fn full_barrier() {
    fence(Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_and_barrier_do_not_panic_on_empty_region() {
        flush_code_region(&[]);
        full_barrier();
    }
}
