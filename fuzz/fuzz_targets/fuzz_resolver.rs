//! Fuzz target for conflict resolution.
//!
//! Resolution must never panic and must be antisymmetric: of two writes
//! with different (rev_seqno, cas), exactly one wins in either arrival order.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_consumer::conflict::{ConflictResolver, Resolution};
use replica_consumer::item::ItemMetadata;

fuzz_target!(|data: (u64, u64, u64, u64, u32, u32)| {
    let (cas_a, rev_a, cas_b, rev_b, flags, expiration) = data;
    let a = ItemMetadata::new(cas_a, rev_a, flags, expiration);
    let b = ItemMetadata::new(cas_b, rev_b, 0, 0);
    let resolver = ConflictResolver::new();

    let ab = resolver.resolve(&a, &b);
    let ba = resolver.resolve(&b, &a);

    if (rev_a, cas_a) == (rev_b, cas_b) {
        assert_eq!(ab, Resolution::Ignore);
        assert_eq!(ba, Resolution::Ignore);
    } else {
        assert_ne!(ab, ba);
    }

    // A write without CAS never beats a record of the same revision
    let unstamped = ItemMetadata::new(0, rev_a, 0, 0);
    assert_eq!(resolver.resolve(&a, &unstamped), Resolution::Ignore);

    // Defaulting never lowers a revision
    assert!(a.with_default_rev_seqno().rev_seqno >= rev_a);
});
