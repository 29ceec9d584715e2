//! Fuzz target for CAS generation.
//!
//! Feeds arbitrary observed CAS values (including values near u64::MAX)
//! between generations. Generation must never panic and never go backwards.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_consumer::cas::CasGenerator;

fuzz_target!(|observed: Vec<u64>| {
    let gen = CasGenerator::new();
    let mut last = gen.next_cas();

    for cas in observed {
        gen.observe(cas);
        let next = gen.next_cas();
        // Saturates at u64::MAX instead of wrapping
        assert!(next >= last);
        assert!(next >= cas);
        last = next;
    }
});
