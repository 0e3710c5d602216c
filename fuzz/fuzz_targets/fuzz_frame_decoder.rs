//! Fuzz target: `FrameDecoder::feed` + `Packet::decode`
//!
//! Drives arbitrary byte sequences through stream reassembly and the frame
//! codec.  Neither may panic, every emitted frame must fit the size limits,
//! and any frame that decodes must re-encode to the same bytes.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use devbus::Packet;
use devbus::packet::codec::{HEADER_SIZE, MAX_FRAME_SIZE};
use devbus::packet::decoder::FrameDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();

    decoder.feed(data, |frame| {
        assert!(frame.len() >= HEADER_SIZE, "frame shorter than a header");
        assert!(frame.len() <= MAX_FRAME_SIZE, "frame exceeds MAX_FRAME_SIZE");
        if let Ok(pkt) = Packet::decode(frame) {
            assert_eq!(pkt.to_bytes().as_slice(), frame);
        }
    });

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    decoder.feed(data, |_| {});
});
