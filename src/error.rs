//! Unified error types for the bus engine.
//!
//! Each subsystem owns a small error enum with a hand-written `Display`;
//! the top-level [`Error`] wraps them so callers that do not care which
//! layer failed can use a single `Result` alias.

use core::fmt;

pub use crate::app::ports::StorageError;
use crate::bus::ServiceKey;
pub use crate::config::ConfigError;
pub use crate::flash::FlashError;
pub use crate::host::HostError;
pub use crate::roles::RoleError;
pub use crate::packet::codec::FramingError;
pub use crate::spec::CatalogueError;
pub use crate::spec::marshal::MarshalError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible engine operation funnels into this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed or corrupt bytes at the codec boundary.
    Framing(FramingError),
    /// A payload could not be packed or unpacked.
    Marshal(MarshalError),
    /// The service catalogue is invalid.
    Catalogue(CatalogueError),
    /// A virtual service rejected an operation.
    Host(HostError),
    /// A firmware flash attempt failed.
    Flash(FlashError),
    /// A role operation failed.
    Role(RoleError),
    /// Configuration is invalid.
    Config(ConfigError),
    /// No such service on the bus.
    UnknownService(ServiceKey),
    /// Persistent storage failed.
    Storage(StorageError),
    /// The transport refused the outgoing frame.
    Transport(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Framing(e) => write!(f, "framing: {e}"),
            Self::Marshal(e) => write!(f, "marshal: {e}"),
            Self::Catalogue(e) => write!(f, "catalogue: {e}"),
            Self::Host(e) => write!(f, "host: {e}"),
            Self::Flash(e) => write!(f, "flash: {e}"),
            Self::Role(e) => write!(f, "role: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::UnknownService(key) => write!(f, "no service {key}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<FramingError> for Error {
    fn from(e: FramingError) -> Self {
        Self::Framing(e)
    }
}

impl From<MarshalError> for Error {
    fn from(e: MarshalError) -> Self {
        Self::Marshal(e)
    }
}

impl From<CatalogueError> for Error {
    fn from(e: CatalogueError) -> Self {
        Self::Catalogue(e)
    }
}

impl From<HostError> for Error {
    fn from(e: HostError) -> Self {
        Self::Host(e)
    }
}

impl From<FlashError> for Error {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

impl From<RoleError> for Error {
    fn from(e: RoleError) -> Self {
        Self::Role(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Engine-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
