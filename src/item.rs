// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Items, item metadata and vbucket identifiers.
//!
//! [`ItemMetadata`] is what conflict resolution looks at: the CAS and the
//! revision sequence number. Flags and expiration ride along untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Revision sequence number substituted when a producer sends `0`.
///
/// Only the relative order of revisions matters, so any value distinct from
/// the "unset" sentinel works.
pub const DEFAULT_REV_SEQNO: u64 = 1;

/// VBucket (partition) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Vbid(pub u16);

impl fmt::Display for Vbid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for Vbid {
    fn from(id: u16) -> Self {
        Vbid(id)
    }
}

/// Metadata used to order conflicting writes across replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemMetadata {
    /// Compare-and-swap token. `0` means "assign a fresh value if applied".
    pub cas: u64,
    /// Per-key revision counter.
    pub rev_seqno: u64,
    pub flags: u32,
    pub expiration: u32,
}

impl ItemMetadata {
    pub fn new(cas: u64, rev_seqno: u64, flags: u32, expiration: u32) -> Self {
        Self {
            cas,
            rev_seqno,
            flags,
            expiration,
        }
    }

    /// Replace an unset revision with [`DEFAULT_REV_SEQNO`].
    pub fn with_default_rev_seqno(mut self) -> Self {
        if self.rev_seqno == 0 {
            self.rev_seqno = DEFAULT_REV_SEQNO;
        }
        self
    }
}

/// A document as handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: String,
    pub vbucket: Vbid,
    pub value: Vec<u8>,
    pub datatype: u8,
    /// Producer-side sequence number of this mutation within its vbucket.
    pub by_seqno: u64,
    pub meta: ItemMetadata,
}

impl Item {
    pub fn new(key: impl Into<String>, vbucket: Vbid, value: Vec<u8>, meta: ItemMetadata) -> Self {
        Self {
            key: key.into(),
            vbucket,
            value,
            datatype: 0,
            by_seqno: 0,
            meta,
        }
    }

    pub fn cas(&self) -> u64 {
        self.meta.cas
    }

    pub fn rev_seqno(&self) -> u64 {
        self.meta.rev_seqno
    }
}

/// Replication role of a vbucket on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VBucketState {
    Active,
    Replica,
    Pending,
    Dead,
}

impl VBucketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VBucketState::Active => "active",
            VBucketState::Replica => "replica",
            VBucketState::Pending => "pending",
            VBucketState::Dead => "dead",
        }
    }

    /// Whether replicated writes may land in a vbucket in this state.
    pub fn accepts_replication(&self) -> bool {
        !matches!(self, VBucketState::Dead)
    }
}

impl fmt::Display for VBucketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VBucketState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(VBucketState::Active),
            "replica" => Ok(VBucketState::Replica),
            "pending" => Ok(VBucketState::Pending),
            "dead" => Ok(VBucketState::Dead),
            other => Err(format!("unknown vbucket state: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rev_seqno_applied_when_unset() {
        let meta = ItemMetadata::new(42, 0, 0, 0).with_default_rev_seqno();
        assert_eq!(meta.rev_seqno, DEFAULT_REV_SEQNO);
        assert_eq!(meta.cas, 42);
    }

    #[test]
    fn test_explicit_rev_seqno_kept() {
        let meta = ItemMetadata::new(1, 9, 0, 0).with_default_rev_seqno();
        assert_eq!(meta.rev_seqno, 9);
    }

    #[test]
    fn test_default_rev_seqno_distinct_from_unset() {
        assert_ne!(DEFAULT_REV_SEQNO, 0);
    }

    #[test]
    fn test_vbid_display() {
        assert_eq!(Vbid(512).to_string(), "512");
        assert_eq!(Vbid::from(7), Vbid(7));
    }

    #[test]
    fn test_item_accessors() {
        let item = Item::new("k", Vbid(1), b"v".to_vec(), ItemMetadata::new(5, 6, 0, 0));
        assert_eq!(item.cas(), 5);
        assert_eq!(item.rev_seqno(), 6);
        assert_eq!(item.datatype, 0);
    }

    #[test]
    fn test_vbucket_state_parse() {
        assert_eq!("active".parse::<VBucketState>().unwrap(), VBucketState::Active);
        assert_eq!("REPLICA".parse::<VBucketState>().unwrap(), VBucketState::Replica);
        assert_eq!("pending".parse::<VBucketState>().unwrap(), VBucketState::Pending);
        assert_eq!("dead".parse::<VBucketState>().unwrap(), VBucketState::Dead);
        assert!("zombie".parse::<VBucketState>().is_err());
    }

    #[test]
    fn test_vbucket_state_accepts_replication() {
        assert!(VBucketState::Replica.accepts_replication());
        assert!(VBucketState::Active.accepts_replication());
        assert!(VBucketState::Pending.accepts_replication());
        assert!(!VBucketState::Dead.accepts_replication());
    }

    #[test]
    fn test_vbucket_state_serde() {
        let json = serde_json::to_string(&VBucketState::Replica).unwrap();
        assert_eq!(json, "\"replica\"");
    }
}
