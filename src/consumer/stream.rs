// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-vbucket stream state.
//!
//! A stream exists only while it is open; closing removes it from the
//! consumer's map, so "closed" is simply absence.
//!
//! # Snapshot Windows
//!
//! ```text
//!   open ──→ [marker] ──→ m(5) ──→ m(9) ──→ [marker] ──→ m(10) ──→ close
//!                 └── window 1 ──┘               └── window 2 ─┘
//! ```
//!
//! Inside a window each mutation or deletion must carry a `by_seqno`
//! strictly greater than the previous one. A new marker starts a fresh
//! window. A `by_seqno` of zero means the producer did not send one and is
//! not checked.
//!
//! Markers carry no seqno range, so the check is ordering only: the first
//! event after a marker is accepted whatever its seqno, and gaps between
//! consecutive seqnos are allowed. Only a repeat or a step backwards is a
//! violation.

/// State of one open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    /// Opaque of the open-stream (or first data event for implicit opens).
    pub opaque: u32,
    pub flags: u32,
    /// Opened by a data event rather than an explicit open-stream.
    pub implicit: bool,
    /// Highest `by_seqno` applied on this stream.
    pub last_by_seqno: u64,
    snapshot: Option<SnapshotWindow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct SnapshotWindow {
    last_seen: Option<u64>,
}

impl StreamState {
    pub fn explicit(opaque: u32, flags: u32) -> Self {
        Self {
            opaque,
            flags,
            implicit: false,
            last_by_seqno: 0,
            snapshot: None,
        }
    }

    pub fn implicit(opaque: u32) -> Self {
        Self {
            implicit: true,
            ..Self::explicit(opaque, 0)
        }
    }

    /// Start a new snapshot window.
    pub fn begin_snapshot(&mut self) {
        self.snapshot = Some(SnapshotWindow::default());
    }

    pub fn in_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Check `by_seqno` against the current snapshot window.
    ///
    /// Returns the previous sequence number on regression.
    pub fn check_order(&self, by_seqno: u64) -> std::result::Result<(), u64> {
        match self.snapshot.and_then(|w| w.last_seen) {
            Some(last) if by_seqno != 0 && by_seqno <= last => Err(last),
            _ => Ok(()),
        }
    }

    /// Record an applied event's sequence number.
    pub fn advance(&mut self, by_seqno: u64) {
        if by_seqno == 0 {
            return;
        }
        if let Some(window) = self.snapshot.as_mut() {
            window.last_seen = Some(by_seqno);
        }
        self.last_by_seqno = self.last_by_seqno.max(by_seqno);
    }
}
