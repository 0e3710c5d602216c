//! Firmware images, update matching and the flash exchange.
//!
//! ```text
//!   FirmwareBlob (UF2 / manifest + image)
//!        │ update_applicable(device FirmwareInfo, blob)
//!        ▼
//!   FirmwareScanner ──▶ UpdateCandidate list
//!        │
//!        ▼
//!   flash_firmware_blob ── SetSession → PageData × N → Finalize ──▶ FlashLink
//! ```

pub mod exchange;
pub mod scan;
pub mod uf2;

use core::fmt;
use std::path::Path;

use anyhow::Context;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::host::HostError;
use crate::packet::{DeviceId, FramingError};
use crate::spec::marshal::MarshalError;

pub use exchange::{
    CancelToken, FlashLink, FlashOptions, FlashReport, HostLink, flash_firmware_blob,
};
pub use scan::{FirmwareScanner, UpdateCandidate};

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum FlashError {
    /// The blob is not newer firmware for this device's identifier.
    NotApplicable { device: DeviceId },
    UnknownDevice(DeviceId),
    /// The device exposes no bootloader service.
    NoBootloader(DeviceId),
    /// The catalogue has no bootloader spec.
    MissingSpec,
    Marshal(MarshalError),
    Framing(FramingError),
    Host(HostError),
    /// The link failed to deliver the request.
    Link(String),
    /// The bootloader answered with a non-zero status.
    Rejected { command: u16, status: u32 },
    UnexpectedResponse { command: u16 },
    NoResponse,
    Cancelled,
    InvalidImage(&'static str),
    Manifest(String),
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotApplicable { device } => {
                write!(f, "firmware not applicable to {}", device.short_id())
            }
            Self::UnknownDevice(d) => write!(f, "unknown device {}", d.short_id()),
            Self::NoBootloader(d) => write!(f, "{} has no bootloader service", d.short_id()),
            Self::MissingSpec => write!(f, "catalogue lacks the bootloader service"),
            Self::Marshal(e) => write!(f, "{e}"),
            Self::Framing(e) => write!(f, "{e}"),
            Self::Host(e) => write!(f, "{e}"),
            Self::Link(msg) => write!(f, "link: {msg}"),
            Self::Rejected { command, status } => {
                write!(f, "command {command:#04x} rejected with status {status}")
            }
            Self::UnexpectedResponse { command } => {
                write!(f, "unexpected response to command {command:#04x}")
            }
            Self::NoResponse => write!(f, "no response from bootloader"),
            Self::Cancelled => write!(f, "flash cancelled"),
            Self::InvalidImage(why) => write!(f, "invalid image: {why}"),
            Self::Manifest(msg) => write!(f, "bad manifest: {msg}"),
        }
    }
}

impl std::error::Error for FlashError {}

impl From<MarshalError> for FlashError {
    fn from(e: MarshalError) -> Self {
        Self::Marshal(e)
    }
}

impl From<FramingError> for FlashError {
    fn from(e: FramingError) -> Self {
        Self::Framing(e)
    }
}

impl From<HostError> for FlashError {
    fn from(e: HostError) -> Self {
        Self::Host(e)
    }
}

// ── Firmware identity ─────────────────────────────────────────

/// What a device reports about its running firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    pub identifier: u32,
    pub version: String,
    pub name: Option<String>,
}

/// A firmware image ready to flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareBlob {
    pub firmware_identifier: u32,
    pub name: String,
    pub version: String,
    pub image: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    firmware_identifier: u32,
    name: String,
    version: String,
    #[serde(default)]
    sha256: Option<String>,
    /// Image path relative to the manifest, for file loading.
    #[serde(default)]
    image: Option<String>,
}

impl FirmwareBlob {
    /// Parse a UF2 container; its family id is the firmware identifier.
    pub fn from_uf2(data: &[u8], name: &str, version: &str) -> Result<Self, FlashError> {
        let (family, image) = uf2::parse(data)?;
        Ok(Self {
            firmware_identifier: family,
            name: name.to_owned(),
            version: version.to_owned(),
            image,
        })
    }

    /// Raw image described by a JSON manifest.  A manifest `sha256`, when
    /// present, must match the image.
    pub fn from_manifest(json: &str, image: Vec<u8>) -> Result<Self, FlashError> {
        let m: Manifest =
            serde_json::from_str(json).map_err(|e| FlashError::Manifest(e.to_string()))?;
        Self::from_parts(m, image)
    }

    fn from_parts(m: Manifest, image: Vec<u8>) -> Result<Self, FlashError> {
        if image.is_empty() {
            return Err(FlashError::InvalidImage("empty image"));
        }
        let blob = Self {
            firmware_identifier: m.firmware_identifier,
            name: m.name,
            version: m.version,
            image,
        };
        if let Some(expected) = m.sha256 {
            if !expected.eq_ignore_ascii_case(&hex(&blob.sha256())) {
                return Err(FlashError::InvalidImage("sha256 mismatch"));
            }
        }
        Ok(blob)
    }

    /// Load a manifest and the image it names (or `<manifest>.bin`).
    pub fn from_manifest_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let m: Manifest = serde_json::from_str(&json)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        let image_path = match &m.image {
            Some(rel) => path.with_file_name(rel),
            None => path.with_extension("bin"),
        };
        let image = std::fs::read(&image_path)
            .with_context(|| format!("reading image {}", image_path.display()))?;
        debug!("flash: loaded {} ({} bytes)", image_path.display(), image.len());
        Self::from_parts(m, image).with_context(|| format!("validating {}", path.display()))
    }

    pub fn sha256(&self) -> [u8; 32] {
        hmac_sha256::Hash::hash(&self.image)
    }
}

fn hex(bytes: &[u8]) -> String {
    use core::fmt::Write;
    bytes.iter().fold(String::new(), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn parse_version(v: &str) -> Option<semver::Version> {
    let v = v.trim();
    semver::Version::parse(v.strip_prefix('v').unwrap_or(v)).ok()
}

/// Whether `blob` is strictly newer firmware for the device described by
/// `info`.  Versions that do not parse are never newer.
pub fn update_applicable(info: &FirmwareInfo, blob: &FirmwareBlob) -> bool {
    if info.identifier != blob.firmware_identifier {
        return false;
    }
    match (parse_version(&info.version), parse_version(&blob.version)) {
        (Some(current), Some(offered)) => offered > current,
        (None, Some(_)) => true,
        _ => false,
    }
}
