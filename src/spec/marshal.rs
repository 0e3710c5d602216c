//! Spec-driven payload marshalling.
//!
//! [`pack`] and [`unpack`] walk a packet's field list and encode or decode
//! one [`Value`] per field.  Either the whole payload converts or the call
//! fails with a [`MarshalError`] naming the offending field; partial
//! results are never returned.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::storage::{StorageType, scale_value, unscale_value};

/// One field of a register, event, command or report.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub storage: StorageType,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, storage: StorageType) -> Self {
        Self {
            name: name.into(),
            storage,
        }
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Real(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Text(String),
}

impl Value {
    /// Numeric view, for fields that hold a number of any flavour.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::UInt(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Bytes(_) | Self::Text(_) => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            Self::Bool(b) => Some(*b as u64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// Payload ended inside a field.
    Truncated {
        field: String,
        needed: usize,
        available: usize,
    },
    /// Value cannot be represented by the field's storage type.
    OutOfRange { field: String },
    /// Value variant does not fit the field's storage type.
    TypeMismatch { field: String, expected: &'static str },
    /// Wrong number of values for the field list.
    ArityMismatch { expected: usize, actual: usize },
    /// A string field held invalid UTF-8.
    InvalidUtf8 { field: String },
    /// No packet with this identifier in the service's spec.
    UnknownPacket { identifier: u16 },
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated {
                field,
                needed,
                available,
            } => write!(
                f,
                "field '{field}' truncated: needs {needed} bytes, {available} left"
            ),
            Self::OutOfRange { field } => write!(f, "value out of range for field '{field}'"),
            Self::TypeMismatch { field, expected } => {
                write!(f, "field '{field}' expects {expected}")
            }
            Self::ArityMismatch { expected, actual } => {
                write!(f, "expected {expected} values, got {actual}")
            }
            Self::InvalidUtf8 { field } => write!(f, "field '{field}' is not valid UTF-8"),
            Self::UnknownPacket { identifier } => {
                write!(f, "no packet {identifier:#06x} in service spec")
            }
        }
    }
}

impl std::error::Error for MarshalError {}

// ── Pack ──────────────────────────────────────────────────────

/// Encode `values` according to `fields`.
pub fn pack(values: &[Value], fields: &[FieldSpec]) -> Result<Vec<u8>, MarshalError> {
    if values.len() != fields.len() {
        return Err(MarshalError::ArityMismatch {
            expected: fields.len(),
            actual: values.len(),
        });
    }

    let mut out = Vec::new();
    for (value, field) in values.iter().zip(fields) {
        pack_field(value, field, &mut out)?;
    }
    Ok(out)
}

fn pack_field(value: &Value, field: &FieldSpec, out: &mut Vec<u8>) -> Result<(), MarshalError> {
    let mismatch = |expected| MarshalError::TypeMismatch {
        field: field.name.clone(),
        expected,
    };
    let out_of_range = || MarshalError::OutOfRange {
        field: field.name.clone(),
    };

    match field.storage {
        StorageType::Number { format, shift } => {
            let raw: i128 = if shift > 0 {
                let real = value.as_f64().ok_or_else(|| mismatch("a number"))?;
                let scaled = unscale_value(real, shift).round();
                if !scaled.is_finite() {
                    return Err(out_of_range());
                }
                // Saturating cast; the range check below catches saturation.
                scaled as i128
            } else {
                match value {
                    Value::Int(v) => *v as i128,
                    Value::UInt(v) => *v as i128,
                    Value::Bool(b) => *b as i128,
                    Value::Real(v) if v.fract() == 0.0 && v.is_finite() => *v as i128,
                    _ => return Err(mismatch("an integer")),
                }
            };
            if raw < format.min() || raw > format.max() {
                return Err(out_of_range());
            }
            format.write(raw, out);
        }
        StorageType::Bool => {
            let b = match value {
                Value::Bool(b) => *b,
                Value::Int(0) | Value::UInt(0) => false,
                Value::Int(1) | Value::UInt(1) => true,
                _ => return Err(mismatch("a boolean")),
            };
            out.push(b as u8);
        }
        StorageType::Bytes => {
            out.extend_from_slice(value.as_bytes().ok_or_else(|| mismatch("bytes"))?);
        }
        StorageType::String => {
            out.extend_from_slice(value.as_str().ok_or_else(|| mismatch("a string"))?.as_bytes());
        }
    }
    Ok(())
}

// ── Unpack ────────────────────────────────────────────────────

/// Decode `bytes` according to `fields`.
///
/// Trailing bytes after the last fixed-width field are ignored, so newer
/// devices may append fields without breaking older readers.
pub fn unpack(bytes: &[u8], fields: &[FieldSpec]) -> Result<Vec<Value>, MarshalError> {
    let mut values = Vec::with_capacity(fields.len());
    let mut offset = 0;

    for field in fields {
        let rest = &bytes[offset..];
        match field.storage {
            StorageType::Number { format, shift } => {
                let width = format.width();
                if rest.len() < width {
                    return Err(MarshalError::Truncated {
                        field: field.name.clone(),
                        needed: width,
                        available: rest.len(),
                    });
                }
                let raw = format.read(rest);
                values.push(if shift > 0 {
                    Value::Real(scale_value(raw, shift))
                } else if format.is_signed() {
                    Value::Int(raw as i64)
                } else {
                    Value::UInt(raw as u64)
                });
                offset += width;
            }
            StorageType::Bool => {
                let Some(&b) = rest.first() else {
                    return Err(MarshalError::Truncated {
                        field: field.name.clone(),
                        needed: 1,
                        available: 0,
                    });
                };
                values.push(Value::Bool(b != 0));
                offset += 1;
            }
            StorageType::Bytes => {
                values.push(Value::Bytes(rest.to_vec()));
                offset = bytes.len();
            }
            StorageType::String => {
                let text = core::str::from_utf8(rest).map_err(|_| MarshalError::InvalidUtf8 {
                    field: field.name.clone(),
                })?;
                values.push(Value::Text(text.to_owned()));
                offset = bytes.len();
            }
        }
    }
    Ok(values)
}

// ── Tests ─────────────────────────────────────────────────────
