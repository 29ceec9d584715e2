// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Decoded replication events.
//!
//! The dispatch layer decodes the wire protocol; this module only defines the
//! typed payloads it hands over. Mutation and deletion carry enough fields
//! that they travel as structs rather than long argument lists.

use crate::item::Vbid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of inbound event, used for metrics labels and handler toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OpenStream,
    CloseStream,
    StreamEnd,
    SnapshotMarker,
    Mutation,
    Deletion,
    Expiration,
    Flush,
    SetVbucketState,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::OpenStream,
        EventKind::CloseStream,
        EventKind::StreamEnd,
        EventKind::SnapshotMarker,
        EventKind::Mutation,
        EventKind::Deletion,
        EventKind::Expiration,
        EventKind::Flush,
        EventKind::SetVbucketState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OpenStream => "open_stream",
            EventKind::CloseStream => "close_stream",
            EventKind::StreamEnd => "stream_end",
            EventKind::SnapshotMarker => "snapshot_marker",
            EventKind::Mutation => "mutation",
            EventKind::Deletion => "deletion",
            EventKind::Expiration => "expiration",
            EventKind::Flush => "flush",
            EventKind::SetVbucketState => "set_vbucket_state",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document mutation from the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    /// Per-request correlation id.
    pub opaque: u32,
    pub key: String,
    pub value: Vec<u8>,
    /// `0` asks for a generated CAS if the write is applied.
    pub cas: u64,
    pub vbucket: Vbid,
    pub flags: u32,
    pub datatype: u8,
    pub by_seqno: u64,
    /// `0` means "not sent"; replaced by the default baseline.
    pub rev_seqno: u64,
    pub expiration: u32,
    /// Carried for protocol completeness; replicas never hold locks.
    pub lock_time: u32,
}

impl MutationEvent {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>, vbucket: Vbid) -> Self {
        Self {
            opaque: 0,
            key: key.into(),
            value: value.into(),
            cas: 0,
            vbucket,
            flags: 0,
            datatype: 0,
            by_seqno: 0,
            rev_seqno: 0,
            expiration: 0,
            lock_time: 0,
        }
    }

    pub fn with_opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn with_rev_seqno(mut self, rev_seqno: u64) -> Self {
        self.rev_seqno = rev_seqno;
        self
    }

    pub fn with_by_seqno(mut self, by_seqno: u64) -> Self {
        self.by_seqno = by_seqno;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_expiration(mut self, expiration: u32) -> Self {
        self.expiration = expiration;
        self
    }
}

/// A deletion (or expiration) from the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionEvent {
    pub opaque: u32,
    pub key: String,
    pub cas: u64,
    pub vbucket: Vbid,
    pub by_seqno: u64,
    pub rev_seqno: u64,
}

impl DeletionEvent {
    pub fn new(key: impl Into<String>, vbucket: Vbid) -> Self {
        Self {
            opaque: 0,
            key: key.into(),
            cas: 0,
            vbucket,
            by_seqno: 0,
            rev_seqno: 0,
        }
    }

    pub fn with_opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn with_rev_seqno(mut self, rev_seqno: u64) -> Self {
        self.rev_seqno = rev_seqno;
        self
    }

    pub fn with_by_seqno(mut self, by_seqno: u64) -> Self {
        self.by_seqno = by_seqno;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_labels_unique() {
        let labels: std::collections::HashSet<_> =
            EventKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(labels.len(), EventKind::ALL.len());
    }

    #[test]
    fn test_event_kind_serde_matches_label() {
        for kind in EventKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let parsed: EventKind = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_mutation_builder() {
        let event = MutationEvent::new("k1", b"v1".to_vec(), Vbid(2))
            .with_opaque(9)
            .with_cas(42)
            .with_rev_seqno(5)
            .with_by_seqno(100)
            .with_flags(0xdead)
            .with_expiration(60);
        assert_eq!(event.key, "k1");
        assert_eq!(event.value, b"v1");
        assert_eq!(event.vbucket, Vbid(2));
        assert_eq!(event.opaque, 9);
        assert_eq!(event.cas, 42);
        assert_eq!(event.rev_seqno, 5);
        assert_eq!(event.by_seqno, 100);
        assert_eq!(event.flags, 0xdead);
        assert_eq!(event.expiration, 60);
        assert_eq!(event.lock_time, 0);
    }

    #[test]
    fn test_deletion_defaults() {
        let event = DeletionEvent::new("k2", Vbid(0));
        assert_eq!(event.cas, 0);
        assert_eq!(event.rev_seqno, 0);
        assert_eq!(event.by_seqno, 0);
    }
}
