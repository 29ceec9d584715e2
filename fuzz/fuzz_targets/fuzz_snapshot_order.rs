//! Fuzz target for snapshot window ordering.
//!
//! Arbitrary marker/seqno sequences must never panic, and every accepted
//! seqno inside a window must exceed the previous one.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_consumer::consumer::StreamState;

fuzz_target!(|ops: Vec<Option<u64>>| {
    let mut stream = StreamState::explicit(0, 0);
    let mut window_last: Option<u64> = None;

    for op in ops {
        match op {
            // None models a snapshot marker
            None => {
                stream.begin_snapshot();
                window_last = None;
            }
            Some(seqno) => match stream.check_order(seqno) {
                Ok(()) => {
                    if let (Some(last), true) = (window_last, stream.in_snapshot() && seqno != 0) {
                        assert!(seqno > last);
                    }
                    stream.advance(seqno);
                    if stream.in_snapshot() && seqno != 0 {
                        window_last = Some(seqno);
                    }
                }
                Err(last) => assert!(seqno <= last),
            },
        }
    }
});
