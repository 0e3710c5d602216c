//! Engine core: one timeline tying codec, topology, roles and hosts
//! together.
//!
//! Everything the engine touches outside itself goes through a port
//! ([`ports`]) or the byte [`Transport`](crate::packet::transport::Transport),
//! so the whole engine runs in tests against a manual clock.

pub mod events;
pub mod log_sink;
pub mod ports;
pub mod service;

pub use events::AppEvent;
pub use log_sink::LogEventSink;
pub use ports::{EventSink, MemoryStorage, StorageError, StoragePort};
pub use service::BusEngine;
