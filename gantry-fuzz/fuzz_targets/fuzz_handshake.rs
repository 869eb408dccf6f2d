#![no_main]

use bytes::Bytes;
use gantry_core::socket_type::SocketType;
use gantry_wire::handshake::{accept_ready, parse_command};
use gantry_wire::WireFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = parse_command(data);

    let frame = WireFrame::command(Bytes::copy_from_slice(data));
    if let Ok(ready) = accept_ready(&frame, SocketType::Router) {
        assert!(ready.identity.map_or(true, |id| !id.is_empty()));
    }
});
