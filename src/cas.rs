// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! CAS generation.
//!
//! CAS values are derived from wall-clock nanoseconds so they stay roughly
//! increasing across restarts, then bumped by one whenever the clock has not
//! moved past the last value handed out. Explicit CAS values received from a
//! producer are fed back through [`CasGenerator::observe`], which keeps every
//! later generated value above anything already seen.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic CAS source shared by every consumer of an engine.
#[derive(Debug, Default)]
pub struct CasGenerator {
    last: AtomicU64,
}

impl CasGenerator {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Generator whose next value is strictly greater than `floor`.
    pub fn starting_after(floor: u64) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    /// Next CAS, strictly greater than every value previously returned or observed.
    pub fn next_cas(&self) -> u64 {
        let now = epoch_nanos();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            // The closure never returns None.
            .unwrap_or_else(|v| v);
        let cas = now.max(prev.saturating_add(1));
        crate::metrics::record_cas_generated();
        cas
    }

    /// Record an externally assigned CAS so generated values never collide with it.
    pub fn observe(&self, cas: u64) {
        self.last.fetch_max(cas, Ordering::AcqRel);
    }

    /// Highest value generated or observed so far.
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

fn epoch_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
