//! Bus engine configuration parameters
//!
//! All tunable timing and sizing parameters for the engine.
//! Values can be loaded from JSON or a postcard blob and must pass
//! [`BusConfig::validate`] before use.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::flash::exchange::MAX_CHUNK_SIZE;

/// Core engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    // --- Identity ---
    /// Long identifier of the local virtual device hosting service servers
    pub self_device_id: u64,

    // --- Topology ---
    /// A device with no packet for this long is evicted (milliseconds)
    pub liveness_window_ms: u64,
    /// Interval between announces of the local virtual device (milliseconds)
    pub announce_interval_ms: u64,
    /// Interval between background register polls per device (milliseconds)
    pub poll_interval_ms: u64,

    // --- Acknowledgements ---
    /// Time to wait for an ack before resending (milliseconds)
    pub ack_timeout_ms: u64,
    /// Resends before an ack is reported as timed out
    pub ack_retries: u8,

    // --- Gesture adapter ---
    /// Press duration after which a press becomes a hold (milliseconds)
    pub click_timeout_ms: u64,
    /// Gap after a click after which the click counter resets (milliseconds)
    pub multi_click_timeout_ms: u64,

    // --- Firmware ---
    /// Bytes of firmware image per PageData chunk
    pub flash_chunk_size: usize,
    /// Time a firmware scan waits for firmware info replies (milliseconds)
    pub scan_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            // Identity
            self_device_id: 0x4a44_5f48_4f53_5401,

            // Topology
            liveness_window_ms: 2000,
            announce_interval_ms: 500,
            poll_interval_ms: 1000,

            // Acknowledgements
            ack_timeout_ms: 100,
            ack_retries: 2,

            // Gesture adapter
            click_timeout_ms: 200,
            multi_click_timeout_ms: 200,

            // Firmware
            flash_chunk_size: 224,
            scan_timeout_ms: 1500,
        }
    }
}

impl BusConfig {
    /// Reject parameter combinations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.announce_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("announce_interval_ms must be > 0"));
        }
        if self.liveness_window_ms <= self.announce_interval_ms {
            return Err(ConfigError::ValidationFailed(
                "liveness_window_ms must exceed announce_interval_ms",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("poll_interval_ms must be > 0"));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("ack_timeout_ms must be > 0"));
        }
        if self.click_timeout_ms == 0 || self.multi_click_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("gesture timeouts must be > 0"));
        }
        if self.flash_chunk_size == 0 || self.flash_chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::ValidationFailed("flash_chunk_size out of range"));
        }
        if self.scan_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("scan_timeout_ms must be > 0"));
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|_| ConfigError::Corrupted)?;
        config.validate()?;
        Ok(config)
    }

    /// Compact binary form for persistence.
    pub fn to_postcard(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::Corrupted)
    }

    /// Decode and validate a blob written by [`BusConfig::to_postcard`].
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
        config.validate()?;
        Ok(config)
    }
}

/// Errors from configuration loading and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
