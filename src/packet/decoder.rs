//! Streaming frame reassembly for stream-oriented transports.
//!
//! A UART or USB CDC link delivers bytes in arbitrary chunks: a single
//! receive callback may hold part of a header, part of a payload, or
//! several frames back to back.  The decoder accumulates bytes and hands
//! out each complete frame (header + payload).  Validation is left to
//! [`Packet::decode`](super::codec::Packet::decode).

use super::codec::{HEADER_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};

/// Offset of the size byte inside the header.
const SIZE_OFFSET: usize = 2;

/// Decoder state machine.
enum DecoderState {
    /// Waiting for header bytes.
    ReadingHeader { collected: usize },
    /// Header received, reading payload.
    ReadingPayload { expected: usize, collected: usize },
}

/// Streaming frame decoder.
pub struct FrameDecoder {
    state: DecoderState,
    buf: [u8; MAX_FRAME_SIZE],
    /// Headers discarded because of an impossible size field.
    resyncs: u32,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingHeader { collected: 0 },
            buf: [0; MAX_FRAME_SIZE],
            resyncs: 0,
        }
    }

    /// Feed bytes into the decoder.
    ///
    /// `on_frame` is called once per complete frame, in arrival order.
    /// Every byte of `data` is consumed.
    pub fn feed(&mut self, data: &[u8], mut on_frame: impl FnMut(&[u8])) {
        let mut offset = 0;

        while offset < data.len() {
            match &mut self.state {
                DecoderState::ReadingHeader { collected } => {
                    let to_copy = (HEADER_SIZE - *collected).min(data.len() - offset);
                    self.buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);
                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == HEADER_SIZE {
                        let expected = self.buf[SIZE_OFFSET] as usize;
                        if expected > MAX_PAYLOAD_SIZE {
                            // Impossible size: drop the header and resync.
                            self.resyncs += 1;
                            self.state = DecoderState::ReadingHeader { collected: 0 };
                            continue;
                        }
                        if expected == 0 {
                            self.state = DecoderState::ReadingHeader { collected: 0 };
                            on_frame(&self.buf[..HEADER_SIZE]);
                            continue;
                        }
                        self.state = DecoderState::ReadingPayload {
                            expected,
                            collected: 0,
                        };
                    }
                }

                DecoderState::ReadingPayload { expected, collected } => {
                    let start = HEADER_SIZE + *collected;
                    let to_copy = (*expected - *collected).min(data.len() - offset);
                    self.buf[start..start + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);
                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == *expected {
                        let len = HEADER_SIZE + *expected;
                        self.state = DecoderState::ReadingHeader { collected: 0 };
                        on_frame(&self.buf[..len]);
                    }
                }
            }
        }
    }

    /// Reset decoder state (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingHeader { collected: 0 };
    }

    /// Number of headers dropped for an out-of-range size.
    pub fn resyncs(&self) -> u32 {
        self.resyncs
    }

    /// Whether a partial frame is buffered.
    pub fn is_mid_frame(&self) -> bool {
        !matches!(self.state, DecoderState::ReadingHeader { collected: 0 })
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::address::DeviceId;
    use crate::packet::codec::Packet;

    fn frame(payload: &[u8]) -> Vec<u8> {
        Packet::from_device(DeviceId(5), 1, 0x1001, payload)
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    fn collect(decoder: &mut FrameDecoder, data: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        decoder.feed(data, |f| out.push(f.to_vec()));
        out
    }

    #[test]
    fn byte_at_a_time() {
        let f = frame(b"abc");
        let mut d = FrameDecoder::new();
        let mut frames = Vec::new();
        for b in &f {
            frames.extend(collect(&mut d, core::slice::from_ref(b)));
        }
        assert_eq!(frames, vec![f]);
        assert!(!d.is_mid_frame());
    }

    #[test]
    fn concatenated_frames_all_delivered() {
        let a = frame(b"one");
        let b = frame(b"");
        let c = frame(b"three");
        let joined: Vec<u8> = [a.clone(), b.clone(), c.clone()].concat();
        let mut d = FrameDecoder::new();
        assert_eq!(collect(&mut d, &joined), vec![a, b, c]);
    }

    #[test]
    fn split_across_callbacks() {
        let f = frame(&[7u8; 40]);
        let mut d = FrameDecoder::new();
        assert!(collect(&mut d, &f[..20]).is_empty());
        assert!(d.is_mid_frame());
        assert_eq!(collect(&mut d, &f[20..]), vec![f]);
    }

    #[test]
    fn impossible_size_resyncs() {
        let mut junk = [0u8; HEADER_SIZE];
        junk[SIZE_OFFSET] = 250;
        let mut d = FrameDecoder::new();
        assert!(collect(&mut d, &junk).is_empty());
        assert_eq!(d.resyncs(), 1);
        let f = frame(b"ok");
        assert_eq!(collect(&mut d, &f), vec![f]);
    }

    #[test]
    fn reset_discards_partial() {
        let f = frame(b"payload");
        let mut d = FrameDecoder::new();
        collect(&mut d, &f[..10]);
        d.reset();
        assert_eq!(collect(&mut d, &f), vec![f]);
    }
}
