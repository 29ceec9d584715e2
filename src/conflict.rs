// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Conflict resolution for replicated writes.
//!
//! An incoming write wins only if it is logically newer than what the store
//! already holds for the key:
//!
//! ```text
//! incoming.rev_seqno >  existing.rev_seqno                          → Apply
//! incoming.rev_seqno == existing.rev_seqno && incoming.cas > cas    → Apply
//! otherwise                                                         → Ignore
//! ```
//!
//! Equal on both fields is a replay of a write that was already applied, so
//! replaying a stream any number of times converges on the same state.
//!
//! # Writes without a CAS
//!
//! An incoming CAS of zero means the producer sent none. Such a write only
//! wins on a strictly higher `rev_seqno`; an equal revision is a replay and
//! is ignored. The CAS is assigned after the decision, by
//! [`ConflictResolver::stamp`], so a replay never collects a fresh value that
//! would outrank the stored one.

use crate::cas::CasGenerator;
use crate::item::ItemMetadata;
use std::cmp::Ordering;
use std::sync::Arc;

/// Outcome of comparing incoming metadata with the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Incoming write is newer and must be stored.
    Apply,
    /// Incoming write is older or a duplicate; keep the stored record.
    Ignore,
}

impl Resolution {
    pub fn is_apply(&self) -> bool {
        matches!(self, Resolution::Apply)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Apply => "apply",
            Resolution::Ignore => "ignore",
        }
    }
}

/// Revision-sequence based resolver.
///
/// Stores receive it by value and run it inside their per-key critical
/// section. It optionally carries the CAS generator used to stamp applied
/// writes that arrived without a CAS.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    cas: Option<Arc<CasGenerator>>,
}

impl ConflictResolver {
    /// Resolver that leaves a zero CAS as it is.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that assigns CAS values from `cas` to applied writes that carry none.
    pub fn with_cas_generator(cas: Arc<CasGenerator>) -> Self {
        Self { cas: Some(cas) }
    }

    /// Decide whether `incoming` overwrites `existing`.
    pub fn resolve(&self, existing: &ItemMetadata, incoming: &ItemMetadata) -> Resolution {
        if incoming.cas == 0 {
            return match existing.rev_seqno.cmp(&incoming.rev_seqno) {
                Ordering::Less => Resolution::Apply,
                Ordering::Equal | Ordering::Greater => Resolution::Ignore,
            };
        }
        match compare(existing, incoming) {
            Ordering::Less => Resolution::Apply,
            Ordering::Equal | Ordering::Greater => Resolution::Ignore,
        }
    }

    /// Give `meta` a generated CAS if it has none. Call only once the write is applied.
    pub fn stamp(&self, meta: &mut ItemMetadata) {
        if meta.cas == 0 {
            if let Some(cas) = &self.cas {
                meta.cas = cas.next_cas();
            }
        }
    }

    /// Same as [`resolve`](Self::resolve) but treats a missing record as older than anything.
    pub fn resolve_against(
        &self,
        existing: Option<&ItemMetadata>,
        incoming: &ItemMetadata,
    ) -> Resolution {
        match existing {
            Some(existing) => self.resolve(existing, incoming),
            None => Resolution::Apply,
        }
    }
}

/// Total order on metadata by (rev_seqno, cas).
pub fn compare(a: &ItemMetadata, b: &ItemMetadata) -> Ordering {
    a.rev_seqno
        .cmp(&b.rev_seqno)
        .then_with(|| a.cas.cmp(&b.cas))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(cas: u64, rev_seqno: u64) -> ItemMetadata {
        ItemMetadata::new(cas, rev_seqno, 0, 0)
    }

    #[test]
    fn test_higher_rev_seqno_applies() {
        let r = ConflictResolver::new();
        assert_eq!(r.resolve(&meta(100, 1), &meta(1, 2)), Resolution::Apply);
    }

    #[test]
    fn test_lower_rev_seqno_ignored_even_with_higher_cas() {
        let r = ConflictResolver::new();
        assert_eq!(r.resolve(&meta(1, 5), &meta(1_000, 4)), Resolution::Ignore);
    }

    #[test]
    fn test_equal_rev_seqno_higher_cas_applies() {
        let r = ConflictResolver::new();
        assert_eq!(r.resolve(&meta(10, 3), &meta(11, 3)), Resolution::Apply);
    }

    #[test]
    fn test_equal_rev_seqno_lower_cas_ignored() {
        let r = ConflictResolver::new();
        assert_eq!(r.resolve(&meta(11, 3), &meta(10, 3)), Resolution::Ignore);
    }

    #[test]
    fn test_identical_is_duplicate() {
        let r = ConflictResolver::new();
        assert_eq!(r.resolve(&meta(7, 7), &meta(7, 7)), Resolution::Ignore);
    }

    #[test]
    fn test_flags_and_expiration_do_not_matter() {
        let r = ConflictResolver::new();
        let existing = ItemMetadata::new(7, 7, 1, 1);
        let incoming = ItemMetadata::new(7, 7, 99, 99);
        assert_eq!(r.resolve(&existing, &incoming), Resolution::Ignore);
    }

    #[test]
    fn test_missing_record_applies() {
        let r = ConflictResolver::new();
        assert_eq!(r.resolve_against(None, &meta(1, 1)), Resolution::Apply);
        assert_eq!(
            r.resolve_against(Some(&meta(1, 1)), &meta(1, 1)),
            Resolution::Ignore
        );
    }

    #[test]
    fn test_tie_break_independent_of_arrival_order() {
        let r = ConflictResolver::new();
        let a = meta(10, 4);
        let b = meta(20, 4);
        // b arrives after a: applies
        assert!(r.resolve(&a, &b).is_apply());
        // a arrives after b: ignored
        assert!(!r.resolve(&b, &a).is_apply());
    }

    #[test]
    fn test_zero_cas_equal_revision_is_replay() {
        let r = ConflictResolver::new();
        assert_eq!(r.resolve(&meta(500, 5), &meta(0, 5)), Resolution::Ignore);
        assert_eq!(r.resolve(&meta(500, 5), &meta(0, 6)), Resolution::Apply);
        assert_eq!(r.resolve(&meta(500, 5), &meta(0, 4)), Resolution::Ignore);
    }

    #[test]
    fn test_zero_cas_stays_antisymmetric() {
        let r = ConflictResolver::new();
        let stamped = meta(9, 5);
        let unstamped = meta(0, 5);
        assert!(!r.resolve(&stamped, &unstamped).is_apply());
        assert!(r.resolve(&unstamped, &stamped).is_apply());
    }

    #[test]
    fn test_stamp_only_fills_missing_cas() {
        let r = ConflictResolver::with_cas_generator(Arc::new(CasGenerator::starting_after(41)));
        let mut missing = meta(0, 1);
        r.stamp(&mut missing);
        assert!(missing.cas > 41);

        let mut explicit = meta(7, 1);
        r.stamp(&mut explicit);
        assert_eq!(explicit.cas, 7);

        let mut untouched = meta(0, 1);
        ConflictResolver::new().stamp(&mut untouched);
        assert_eq!(untouched.cas, 0);
    }

    #[test]
    fn test_resolution_labels() {
        assert_eq!(Resolution::Apply.as_str(), "apply");
        assert_eq!(Resolution::Ignore.as_str(), "ignore");
    }
}
