//! Packet layer: addressing, frame codec, stream reassembly and filters.
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌─────────┐   ┌────────────────┐
//! │ Transport │──▶│ FrameDecoder │──▶│ Packet  │──▶│ Bus topology / │
//! │ (bytes)   │   │ (stream)     │   │ ::decode│   │ service hosts  │
//! └───────────┘   └──────────────┘   └─────────┘   └────────────────┘
//!       ▲                                                   │
//!       └──────────────── Packet::to_bytes ◀────────────────┘
//! ```

pub mod address;
pub mod codec;
pub mod decoder;
pub mod filter;
pub mod transport;

pub use address::{DeviceId, ShortId};
pub use codec::{CommandKind, FramingError, Packet};
