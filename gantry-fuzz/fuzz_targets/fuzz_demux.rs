#![no_main]

use gantry_core::identity::PeerIdentity;
use gantry_wire::InboundDemux;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First byte picks the split point so partial reads get exercised too.
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = (split as usize).min(rest.len());
    let (head, tail) = rest.split_at(split);

    let mut demux = InboundDemux::new(Some(1 << 16), 64);
    demux.set_envelope(Some(&PeerIdentity::from_static(b"fuzz")));

    let mut delivered = Vec::new();
    if demux.feed(head, |m| delivered.push(m)).is_err() {
        return;
    }
    let _ = demux.feed(tail, |m| delivered.push(m));

    for msg in delivered {
        assert!(msg.len() >= 2, "envelope plus at least one frame");
        assert!(msg.len() <= 65, "frame limit enforced");
        assert_eq!(&msg[0][..], b"fuzz");
    }
});
