//! Packet frame codec.
//!
//! Wire format (little-endian):
//! ```text
//! ┌────────┬──────┬───────┬───────────────┬─────┬───────┬─────────┬───────────┐
//! │ CRC16  │ size │ flags │ device id (8) │ seq │ index │ command │ payload   │
//! │ 2 B    │ 1 B  │ 1 B   │ LE u64        │ 1 B │ 1 B   │ LE u16  │ size B    │
//! └────────┴──────┴───────┴───────────────┴─────┴───────┴─────────┴───────────┘
//! ```
//!
//! The CRC (CRC-16/CCITT-FALSE) covers every byte after itself.  A
//! [`Packet`] keeps its CRC current: every builder that changes a field
//! reseals the packet, so the checksum read from [`Packet::crc`] is always
//! the one that goes on the wire.

use core::fmt;

use crc::{CRC_16_IBM_3740, Crc};

use super::address::DeviceId;

/// Maximum payload bytes carried by one frame.
pub const MAX_PAYLOAD_SIZE: usize = 236;

/// Fixed header size, CRC included.
pub const HEADER_SIZE: usize = 16;

/// Largest encoded frame.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// `device_id` is the destination, not the sender.
pub const FLAG_COMMAND: u8 = 0x01;
/// The receiver must answer with an ack packet.
pub const FLAG_ACK_REQUESTED: u8 = 0x02;
/// The low 32 bits of `device_id` are a service class.
pub const FLAG_MULTICAST: u8 = 0x04;

/// Service index of the control service on every device.
pub const CONTROL_SERVICE_INDEX: u8 = 0x00;
/// Pseudo service index used by ack packets.
pub const ACK_SERVICE_INDEX: u8 = 0x3f;

/// Announce command on the control service.
pub const CMD_ANNOUNCE: u16 = 0x0000;
pub const CMD_GET_REG: u16 = 0x1000;
pub const CMD_SET_REG: u16 = 0x2000;
pub const CMD_EVENT_MASK: u16 = 0x8000;
pub const CMD_TYPE_MASK: u16 = 0xf000;
pub const CMD_REG_MASK: u16 = 0x0fff;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Payload storage, bounded by the frame size.
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD_SIZE>;

/// An encoded frame.
pub type FrameBuf = heapless::Vec<u8, MAX_FRAME_SIZE>;

/// Service command for reading register `reg`.
pub const fn get_register(reg: u16) -> u16 {
    CMD_GET_REG | (reg & CMD_REG_MASK)
}

/// Service command for writing register `reg`.
pub const fn set_register(reg: u16) -> u16 {
    CMD_SET_REG | (reg & CMD_REG_MASK)
}

/// Service command for event `code`, tagged with a 7-bit event counter.
pub const fn event(code: u8, counter: u8) -> u16 {
    CMD_EVENT_MASK | (((counter & 0x7f) as u16) << 8) | code as u16
}

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// Fewer bytes than a header.
    TooShort { len: usize },
    /// Size field disagrees with the buffer length.
    LengthMismatch { declared: usize, actual: usize },
    /// Recomputed checksum differs from the transmitted one.
    ChecksumMismatch { expected: u16, computed: u16 },
    /// Payload larger than [`MAX_PAYLOAD_SIZE`].
    PayloadTooLarge { len: usize },
    /// Output buffer cannot hold the frame.
    BufferTooSmall { needed: usize },
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => write!(f, "frame too short ({len} bytes)"),
            Self::LengthMismatch { declared, actual } => {
                write!(f, "size field says {declared} bytes, frame has {actual}")
            }
            Self::ChecksumMismatch { expected, computed } => {
                write!(f, "crc mismatch (frame {expected:#06x}, computed {computed:#06x})")
            }
            Self::PayloadTooLarge { len } => {
                write!(f, "payload of {len} bytes exceeds {MAX_PAYLOAD_SIZE}")
            }
            Self::BufferTooSmall { needed } => write!(f, "output buffer needs {needed} bytes"),
        }
    }
}

impl std::error::Error for FramingError {}

// ── Command classification ────────────────────────────────────

/// What a packet's service command means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Announce,
    GetRegister(u16),
    SetRegister(u16),
    Event { code: u8, counter: u8 },
    Action(u16),
    /// Carries the CRC of the acknowledged packet.
    Ack(u16),
    Unknown(u16),
}

// ── Packet ────────────────────────────────────────────────────

/// A single framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    crc: u16,
    flags: u8,
    device_id: DeviceId,
    seq: u8,
    service_index: u8,
    command: u16,
    payload: Payload,
    /// Local receive/send time; never on the wire.
    timestamp_ms: u64,
}

impl Packet {
    fn build(
        flags: u8,
        device_id: DeviceId,
        service_index: u8,
        command: u16,
        payload: &[u8],
    ) -> Result<Self, FramingError> {
        let payload = Payload::from_slice(payload)
            .map_err(|_| FramingError::PayloadTooLarge { len: payload.len() })?;
        let mut pkt = Self {
            crc: 0,
            flags,
            device_id,
            seq: 0,
            service_index,
            command,
            payload,
            timestamp_ms: 0,
        };
        pkt.reseal();
        Ok(pkt)
    }

    /// A packet sent *by* `device` (report, event, announce).
    pub fn from_device(
        device: DeviceId,
        service_index: u8,
        command: u16,
        payload: &[u8],
    ) -> Result<Self, FramingError> {
        Self::build(0, device, service_index, command, payload)
    }

    /// A command addressed *to* `device`.
    pub fn to_device(
        device: DeviceId,
        service_index: u8,
        command: u16,
        payload: &[u8],
    ) -> Result<Self, FramingError> {
        Self::build(FLAG_COMMAND, device, service_index, command, payload)
    }

    /// Ack for a packet whose CRC is `acked_crc`, sent by `device`.
    pub fn ack(device: DeviceId, acked_crc: u16) -> Self {
        // Empty payload always fits.
        Self {
            crc: 0,
            flags: 0,
            device_id: device,
            seq: 0,
            service_index: ACK_SERVICE_INDEX,
            command: acked_crc,
            payload: Payload::new(),
            timestamp_ms: 0,
        }
        .resealed()
    }

    pub fn with_seq(mut self, seq: u8) -> Self {
        self.seq = seq;
        self.resealed()
    }

    pub fn with_ack_requested(mut self) -> Self {
        self.flags |= FLAG_ACK_REQUESTED;
        self.resealed()
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    fn resealed(mut self) -> Self {
        self.reseal();
        self
    }

    fn reseal(&mut self) {
        let mut digest = CRC16.digest();
        digest.update(&self.header_tail());
        digest.update(&self.payload);
        self.crc = digest.finalize();
    }

    /// Header bytes after the CRC field.
    fn header_tail(&self) -> [u8; HEADER_SIZE - 2] {
        let mut h = [0u8; HEADER_SIZE - 2];
        h[0] = self.payload.len() as u8;
        h[1] = self.flags;
        h[2..10].copy_from_slice(&self.device_id.to_bytes());
        h[10] = self.seq;
        h[11] = self.service_index;
        h[12..14].copy_from_slice(&self.command.to_le_bytes());
        h
    }

    // ── Encode / decode ───────────────────────────────────────

    /// Write the frame into `out`, returning the number of bytes written.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<usize, FramingError> {
        let total = HEADER_SIZE + self.payload.len();
        if out.len() < total {
            return Err(FramingError::BufferTooSmall { needed: total });
        }
        out[..2].copy_from_slice(&self.crc.to_le_bytes());
        out[2..HEADER_SIZE].copy_from_slice(&self.header_tail());
        out[HEADER_SIZE..total].copy_from_slice(&self.payload);
        Ok(total)
    }

    /// Encode into an owned frame buffer.
    pub fn to_bytes(&self) -> FrameBuf {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        // Payload length is bounded by the type, so the frame always fits.
        let n = self.encode_into(&mut buf).unwrap_or(0);
        FrameBuf::from_slice(&buf[..n]).unwrap_or_default()
    }

    /// Parse and validate one complete frame.
    ///
    /// Nothing is returned unless the length and checksum both check out.
    pub fn decode(frame: &[u8]) -> Result<Self, FramingError> {
        if frame.len() < HEADER_SIZE {
            return Err(FramingError::TooShort { len: frame.len() });
        }
        let size = frame[2] as usize;
        if size > MAX_PAYLOAD_SIZE {
            return Err(FramingError::PayloadTooLarge { len: size });
        }
        if HEADER_SIZE + size != frame.len() {
            return Err(FramingError::LengthMismatch {
                declared: HEADER_SIZE + size,
                actual: frame.len(),
            });
        }

        let expected = u16::from_le_bytes([frame[0], frame[1]]);
        let computed = CRC16.checksum(&frame[2..]);
        if expected != computed {
            return Err(FramingError::ChecksumMismatch { expected, computed });
        }

        let mut id = [0u8; 8];
        id.copy_from_slice(&frame[4..12]);
        let payload = Payload::from_slice(&frame[HEADER_SIZE..])
            .map_err(|_| FramingError::PayloadTooLarge { len: size })?;

        Ok(Self {
            crc: expected,
            flags: frame[3],
            device_id: DeviceId(u64::from_le_bytes(id)),
            seq: frame[12],
            service_index: frame[13],
            command: u16::from_le_bytes([frame[14], frame[15]]),
            payload,
            timestamp_ms: 0,
        })
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn crc(&self) -> u16 {
        self.crc
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }

    pub fn service_index(&self) -> u8 {
        self.service_index
    }

    pub fn service_command(&self) -> u16 {
        self.command
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn is_command(&self) -> bool {
        self.flags & FLAG_COMMAND != 0
    }

    pub fn is_report(&self) -> bool {
        !self.is_command()
    }

    pub fn requires_ack(&self) -> bool {
        self.flags & FLAG_ACK_REQUESTED != 0
    }

    pub fn is_multicast(&self) -> bool {
        self.flags & FLAG_MULTICAST != 0
    }

    pub fn is_announce(&self) -> bool {
        self.kind() == CommandKind::Announce
    }

    /// Classify the service command.
    pub fn kind(&self) -> CommandKind {
        if self.service_index == ACK_SERVICE_INDEX {
            return CommandKind::Ack(self.command);
        }
        if self.service_index == CONTROL_SERVICE_INDEX
            && self.command == CMD_ANNOUNCE
            && self.is_report()
        {
            return CommandKind::Announce;
        }
        if self.command & CMD_EVENT_MASK != 0 {
            return CommandKind::Event {
                code: (self.command & 0xff) as u8,
                counter: ((self.command >> 8) & 0x7f) as u8,
            };
        }
        match self.command & CMD_TYPE_MASK {
            CMD_GET_REG => CommandKind::GetRegister(self.command & CMD_REG_MASK),
            CMD_SET_REG => CommandKind::SetRegister(self.command & CMD_REG_MASK),
            0 => CommandKind::Action(self.command),
            _ => CommandKind::Unknown(self.command),
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.is_command() { "to" } else { "from" };
        write!(
            f,
            "{} {} [{}] cmd={:#06x} seq={} {}B",
            dir,
            self.device_id.short_id(),
            self.service_index,
            self.command,
            self.seq,
            self.payload.len()
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────
