//! Storage types for register, event and command fields.
//!
//! Every field in the catalogue declares a type string such as `u16`,
//! `i22.10` or `bytes`.  It is parsed once, at load time, into the closed
//! [`StorageType`] enum; marshalling then dispatches on the variant.
//!
//! | Type string | Variant                         | Wire width |
//! |-------------|---------------------------------|------------|
//! | `u8`..`i64` | `Number { shift: 0 }`           | 1/2/4/8    |
//! | `uX.Y`      | `Number { shift: Y }`, unsigned | (X+Y)/8    |
//! | `iX.Y`      | `Number { shift: Y }`, signed   | (X+Y)/8    |
//! | `bool`      | `Bool`                          | 1          |
//! | `bytes`     | `Bytes` (opaque, rest of packet)| —          |
//! | `string`    | `String` (UTF-8, rest of packet)| —          |

/// Integer wire encodings (little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberFormat {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

impl NumberFormat {
    /// Map a signed storage code (`-1` = i8, `2` = u16, ...) to a format.
    /// Zero and any other width are not codable as numbers.
    pub fn from_storage(storage: i8) -> Option<Self> {
        match storage {
            -1 => Some(Self::I8),
            1 => Some(Self::U8),
            -2 => Some(Self::I16),
            2 => Some(Self::U16),
            -4 => Some(Self::I32),
            4 => Some(Self::U32),
            -8 => Some(Self::I64),
            8 => Some(Self::U64),
            _ => None,
        }
    }

    fn from_bits(bits: u32, signed: bool) -> Option<Self> {
        let width = match bits {
            8 | 16 | 32 | 64 => (bits / 8) as i8,
            _ => return None,
        };
        Self::from_storage(if signed { -width } else { width })
    }

    /// Signed storage code, the inverse of [`NumberFormat::from_storage`].
    pub fn storage(self) -> i8 {
        let w = self.width() as i8;
        if self.is_signed() { -w } else { w }
    }

    pub fn width(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 => 4,
            Self::I64 | Self::U64 => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    pub fn min(self) -> i128 {
        if self.is_signed() {
            -(1i128 << (self.width() * 8 - 1))
        } else {
            0
        }
    }

    pub fn max(self) -> i128 {
        if self.is_signed() {
            (1i128 << (self.width() * 8 - 1)) - 1
        } else {
            (1i128 << (self.width() * 8)) - 1
        }
    }

    /// Read one value from the front of `bytes`.  The caller guarantees
    /// `bytes.len() >= self.width()`.
    pub fn read(self, bytes: &[u8]) -> i128 {
        let mut raw = [0u8; 8];
        let w = self.width();
        raw[..w].copy_from_slice(&bytes[..w]);
        let unsigned = u64::from_le_bytes(raw);
        if self.is_signed() {
            // Sign-extend from the field width.
            let shift = 64 - w * 8;
            (((unsigned << shift) as i64) >> shift) as i128
        } else {
            unsigned as i128
        }
    }

    /// Append `value` to `out`.  The caller guarantees the value is in range.
    pub fn write(self, value: i128, out: &mut Vec<u8>) {
        let bytes = (value as u64).to_le_bytes();
        out.extend_from_slice(&bytes[..self.width()]);
    }
}

/// Storage type of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Integer, or fixed-point when `shift > 0`.
    Number { format: NumberFormat, shift: u8 },
    Bool,
    /// Opaque bytes running to the end of the payload.
    Bytes,
    /// UTF-8 text running to the end of the payload.
    String,
}

impl StorageType {
    /// Parse a catalogue type string.
    pub fn parse(type_name: &str) -> Option<Self> {
        match type_name.trim() {
            "bool" => return Some(Self::Bool),
            "bytes" => return Some(Self::Bytes),
            "string" => return Some(Self::String),
            _ => {}
        }

        let t = type_name.trim();
        let signed = match t.as_bytes().first()? {
            b'u' => false,
            b'i' => true,
            _ => return None,
        };
        let rest = &t[1..];
        let (int_bits, frac_bits) = match rest.split_once('.') {
            Some((i, f)) => (i.parse::<u32>().ok()?, f.parse::<u32>().ok()?),
            None => (rest.parse::<u32>().ok()?, 0),
        };
        let format = NumberFormat::from_bits(int_bits.checked_add(frac_bits)?, signed)?;
        Some(Self::Number {
            format,
            shift: frac_bits as u8,
        })
    }

    /// Signed storage code; `0` for opaque (non-numeric) fields.
    pub fn storage(&self) -> i8 {
        match self {
            Self::Number { format, .. } => format.storage(),
            Self::Bool => 1,
            Self::Bytes | Self::String => 0,
        }
    }

    /// Numeric wire format, if the field has one.
    pub fn number_format(&self) -> Option<NumberFormat> {
        match self {
            Self::Number { format, .. } => Some(*format),
            Self::Bool => Some(NumberFormat::U8),
            Self::Bytes | Self::String => None,
        }
    }

    pub fn is_fixed_point(&self) -> bool {
        matches!(self, Self::Number { shift, .. } if *shift > 0)
    }

    /// Whether the field consumes the remainder of the payload.
    pub fn is_variable_length(&self) -> bool {
        matches!(self, Self::Bytes | Self::String)
    }
}

/// Convert a raw fixed-point integer to a real number.
pub fn scale_value(raw: i128, shift: u8) -> f64 {
    raw as f64 / f64::powi(2.0, shift as i32)
}

/// Convert a real number to the (unrounded) raw fixed-point magnitude.
pub fn unscale_value(value: f64, shift: u8) -> f64 {
    value * f64::powi(2.0, shift as i32)
}
