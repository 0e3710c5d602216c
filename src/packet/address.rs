//! Device addressing.
//!
//! Every device carries a 64-bit long identifier on the wire.  For display
//! and filtering a four-character short id (`QK47`) is derived from it by
//! hashing the identifier bytes.

use core::fmt;

use serde::{Deserialize, Serialize};

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Bits of the folded hash that feed the short id.
const SHORT_ID_BITS: u32 = 30;

/// Long unique identifier of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl DeviceId {
    /// Identifier bytes as they appear on the wire.
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Derived short address.
    pub fn short_id(self) -> ShortId {
        ShortId::from_hash(fold_hash(fnv1a(&self.to_bytes()), SHORT_ID_BITS))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Four-character short address, two letters followed by two digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortId([u8; 4]);

impl ShortId {
    fn from_hash(h: u32) -> Self {
        Self([
            b'A' + (h % 26) as u8,
            b'A' + (h / 26 % 26) as u8,
            b'0' + (h / (26 * 26) % 10) as u8,
            b'0' + (h / (26 * 26 * 10) % 10) as u8,
        ])
    }

    pub fn as_str(&self) -> &str {
        // Always ASCII by construction.
        core::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn fnv1a(data: &[u8]) -> u32 {
    data.iter()
        .fold(FNV_OFFSET, |h, &b| (h ^ b as u32).wrapping_mul(FNV_PRIME))
}

fn fold_hash(h: u32, bits: u32) -> u32 {
    (h ^ (h >> bits)) & ((1 << bits) - 1)
}
