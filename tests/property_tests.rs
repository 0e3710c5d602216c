//! Property tests for the frame codec, stream reassembly and marshalling.

use devbus::packet::codec::{FLAG_COMMAND, MAX_PAYLOAD_SIZE};
use devbus::packet::decoder::FrameDecoder;
use devbus::spec::marshal::{FieldSpec, Value, pack, unpack};
use devbus::spec::storage::StorageType;
use devbus::{DeviceId, Packet};
use proptest::prelude::*;

fn arb_packet() -> impl Strategy<Value = Packet> {
    (
        any::<u64>(),
        0u8..0x3f,
        any::<u16>(),
        proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_SIZE),
        any::<bool>(),
        any::<u8>(),
    )
        .prop_map(|(device, index, command, payload, is_command, seq)| {
            let device = DeviceId(device);
            let pkt = if is_command {
                Packet::to_device(device, index, command, &payload)
            } else {
                Packet::from_device(device, index, command, &payload)
            };
            pkt.unwrap().with_seq(seq)
        })
}

// ── Codec ─────────────────────────────────────────────────────

proptest! {
    /// Decoding an encoded packet reproduces every header field.
    #[test]
    fn decode_inverts_encode(pkt in arb_packet()) {
        let decoded = Packet::decode(&pkt.to_bytes()).unwrap();
        prop_assert_eq!(decoded.device_id(), pkt.device_id());
        prop_assert_eq!(decoded.service_index(), pkt.service_index());
        prop_assert_eq!(decoded.service_command(), pkt.service_command());
        prop_assert_eq!(decoded.payload(), pkt.payload());
        prop_assert_eq!(decoded.seq(), pkt.seq());
        prop_assert_eq!(decoded.flags() & FLAG_COMMAND, pkt.flags() & FLAG_COMMAND);
        prop_assert_eq!(decoded.crc(), pkt.crc());
    }

    /// Any single flipped bit makes the frame undecodable.
    #[test]
    fn single_bit_flip_rejected(pkt in arb_packet(), bit in any::<prop::sample::Index>()) {
        let mut frame = pkt.to_bytes().to_vec();
        let i = bit.index(frame.len() * 8);
        frame[i / 8] ^= 1 << (i % 8);
        prop_assert!(Packet::decode(&frame).is_err());
    }

    /// Truncated frames never decode and never panic.
    #[test]
    fn truncated_frame_rejected(pkt in arb_packet(), cut in any::<prop::sample::Index>()) {
        let frame = pkt.to_bytes();
        let len = cut.index(frame.len());
        prop_assert!(Packet::decode(&frame[..len]).is_err());
    }
}

// ── Stream reassembly ─────────────────────────────────────────

proptest! {
    /// However a stream of frames is chunked, the same frames come out.
    #[test]
    fn chunking_does_not_change_frames(
        packets in proptest::collection::vec(arb_packet(), 1..6),
        cuts in proptest::collection::vec(1usize..64, 0..20),
    ) {
        let stream: Vec<u8> = packets.iter().flat_map(|p| p.to_bytes().to_vec()).collect();

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        let mut rest = stream.as_slice();
        for cut in cuts {
            let n = cut.min(rest.len());
            let (head, tail) = rest.split_at(n);
            decoder.feed(head, |f| frames.push(f.to_vec()));
            rest = tail;
        }
        decoder.feed(rest, |f| frames.push(f.to_vec()));

        prop_assert_eq!(frames.len(), packets.len());
        for (frame, pkt) in frames.iter().zip(&packets) {
            let expected = pkt.to_bytes();
            prop_assert_eq!(frame.as_slice(), expected.as_slice());
        }
        prop_assert!(!decoder.is_mid_frame());
    }

    /// Arbitrary bytes never panic the decoder or the codec.
    #[test]
    fn garbage_never_panics(data in proptest::collection::vec(any::<u8>(), 0..1024)) {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&data, |f| {
            let _ = Packet::decode(f);
        });
    }
}

// ── Marshalling ───────────────────────────────────────────────

proptest! {
    /// Unsigned fixed point keeps values to within one step.
    #[test]
    fn fixed_point_within_one_step(x in 0.0f64..4_000_000.0) {
        let field = FieldSpec::new("v", StorageType::parse("u22.10").unwrap());
        let fields = [field];
        let bytes = pack(&[Value::Real(x)], &fields).unwrap();
        prop_assert_eq!(bytes.len(), 4);
        let back = unpack(&bytes, &fields).unwrap()[0].as_f64().unwrap();
        prop_assert!((back - x).abs() <= 1.0 / 1024.0, "{} -> {}", x, back);
    }

    /// Integers outside a field's range are refused, not wrapped.
    #[test]
    fn out_of_range_integer_refused(v in 256u64..=u64::from(u32::MAX)) {
        let fields = [FieldSpec::new("v", StorageType::parse("u8").unwrap())];
        prop_assert!(pack(&[Value::UInt(v)], &fields).is_err());
    }

    /// Mixed records survive a trip through their own layout.
    #[test]
    fn record_with_trailing_string(a in any::<i16>(), b in any::<u32>(), s in "[a-z ]{0,40}") {
        let fields = [
            FieldSpec::new("a", StorageType::parse("i16").unwrap()),
            FieldSpec::new("b", StorageType::parse("u32").unwrap()),
            FieldSpec::new("s", StorageType::parse("string").unwrap()),
        ];
        let values = vec![Value::Int(a.into()), Value::UInt(b.into()), Value::Text(s)];
        let bytes = pack(&values, &fields).unwrap();
        prop_assert_eq!(unpack(&bytes, &fields).unwrap(), values);
    }
}
