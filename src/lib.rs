//! devbus: a host-side engine for a single-wire peripheral bus.
//!
//! The crate decodes and encodes bus frames, keeps a live model of the
//! devices on the bus, binds named roles to services, hosts virtual
//! services of its own and drives firmware updates.  Everything is
//! transport- and clock-agnostic; a caller feeds bytes in through
//! [`BusEngine::receive`] and drives time with [`BusEngine::tick`].
//!
//! ```text
//!  packet ─▶ bus ─▶ roles ─▶ host adapters
//!    ▲        │                   │
//!    │        └── spec registry ──┘
//!    └────────── flash (bootloader exchange)
//! ```

#![deny(unused_must_use)]

pub mod app;
pub mod bus;
pub mod config;
pub mod error;
pub mod flash;
pub mod host;
pub mod packet;
pub mod roles;
pub mod spec;

pub use app::{AppEvent, BusEngine, EventSink, LogEventSink};
pub use config::BusConfig;
pub use error::{Error, Result};
pub use packet::{DeviceId, Packet};
pub use spec::SpecRegistry;
