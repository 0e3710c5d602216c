//! Virtual services hosted by the engine.
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!  command ──────▶│ ServiceHost                  │──▶ reports / events
//!  (to self)      │   ServiceServer (registers)  │      (HostContext outbox)
//!                 │   AdapterServer (role, opt.) │
//!  role events ──▶│                              │──▶ timers
//!  source events ▶│                              │      (HostContext::schedule)
//!                 └──────────────────────────────┘
//! ```
//!
//! Hosts never touch the transport or the bus directly.  Everything they
//! produce goes through the [`HostContext`] they are handed, and the engine
//! sends it once the call returns.

pub mod adapter;
pub mod bootloader;
pub mod button;
pub mod gesture;
pub mod server;

use core::any::Any;
use core::fmt;

use crate::bus::timers::{HostId, TimerQueue, TimerTag};
use crate::bus::{ServiceEvent, ServiceKey};
use crate::packet::{DeviceId, FramingError, Packet};
use crate::spec::SpecRegistry;
use crate::spec::marshal::MarshalError;

pub use adapter::AdapterServer;
pub use bootloader::BootloaderServer;
pub use button::ButtonServer;
pub use gesture::ButtonGestureAdapter;
pub use server::ServiceServer;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    UnknownClass(u32),
    UnknownRegister(u16),
    /// Write to a `const` or `ro` register.
    ReadOnly(u16),
    UnknownEvent(u8),
    UnknownCommand(u16),
    Marshal(MarshalError),
    Framing(FramingError),
    /// The adapter is already attached to a role manager.
    AlreadyAttached,
    NotAnAdapter,
    NoSuchHost(HostId),
    /// Every service index is taken.
    TooManyHosts,
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownClass(c) => write!(f, "no spec for service class {c:#010x}"),
            Self::UnknownRegister(r) => write!(f, "unknown register {r:#05x}"),
            Self::ReadOnly(r) => write!(f, "register {r:#05x} is read-only"),
            Self::UnknownEvent(e) => write!(f, "unknown event {e:#04x}"),
            Self::UnknownCommand(c) => write!(f, "unsupported command {c:#06x}"),
            Self::Marshal(e) => write!(f, "{e}"),
            Self::Framing(e) => write!(f, "{e}"),
            Self::AlreadyAttached => write!(f, "adapter already attached to a role manager"),
            Self::NotAnAdapter => write!(f, "host is not an adapter"),
            Self::NoSuchHost(id) => write!(f, "no host with id {id}"),
            Self::TooManyHosts => write!(f, "no free service index"),
        }
    }
}

impl std::error::Error for HostError {}

impl From<MarshalError> for HostError {
    fn from(e: MarshalError) -> Self {
        Self::Marshal(e)
    }
}

impl From<FramingError> for HostError {
    fn from(e: FramingError) -> Self {
        Self::Framing(e)
    }
}

// ── Host context ──────────────────────────────────────────────

/// Everything a host may touch during one call.
pub struct HostContext<'a> {
    pub device: DeviceId,
    pub service_index: u8,
    pub host_id: HostId,
    pub now_ms: u64,
    pub registry: &'a SpecRegistry,
    outbox: &'a mut Vec<Packet>,
    timers: &'a mut TimerQueue,
}

impl<'a> HostContext<'a> {
    pub fn new(
        device: DeviceId,
        service_index: u8,
        host_id: HostId,
        now_ms: u64,
        registry: &'a SpecRegistry,
        outbox: &'a mut Vec<Packet>,
        timers: &'a mut TimerQueue,
    ) -> Self {
        Self {
            device,
            service_index,
            host_id,
            now_ms,
            registry,
            outbox,
            timers,
        }
    }

    /// This host's service on the bus.
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.device, self.service_index)
    }

    /// Queue a packet for transmission.
    pub fn send(&mut self, pkt: Packet) {
        self.outbox.push(pkt.with_timestamp(self.now_ms));
    }

    /// Arm a one-shot timer `delay_ms` from now.
    pub fn schedule(&mut self, delay_ms: u64, tag: TimerTag) {
        self.timers
            .schedule(self.now_ms + delay_ms, self.host_id, tag);
    }
}

// ── Host trait ────────────────────────────────────────────────

/// A process-local responder implementing one service.
pub trait ServiceHost {
    fn server(&self) -> &ServiceServer;
    fn server_mut(&mut self) -> &mut ServiceServer;

    /// Concrete-type access for [`BusEngine::with_host`](crate::app::service::BusEngine::with_host).
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn service_class(&self) -> u32 {
        self.server().service_class()
    }

    /// Handle a command addressed to this service.
    fn handle_command(&mut self, pkt: &Packet, ctx: &mut HostContext<'_>) -> Result<(), HostError> {
        self.server_mut().handle_packet(pkt, ctx).map(|_| ())
    }

    /// A timer armed by this host came due.
    fn on_timer(&mut self, _tag: TimerTag, _ctx: &mut HostContext<'_>) {}

    fn adapter(&self) -> Option<&AdapterServer> {
        None
    }

    fn adapter_mut(&mut self) -> Option<&mut AdapterServer> {
        None
    }

    /// The adapter's source role was bound, rebound or lost.
    fn on_source_bound(&mut self, _source: Option<ServiceKey>, _ctx: &mut HostContext<'_>) {}

    /// An event from the bound source service.
    fn on_source_event(&mut self, _event: &ServiceEvent, _ctx: &mut HostContext<'_>) {}
}

/// Scratch context for unit tests of individual hosts.
#[cfg(test)]
pub(crate) struct TestBench {
    pub registry: SpecRegistry,
    pub outbox: Vec<Packet>,
    pub timers: TimerQueue,
    pub now_ms: u64,
}

#[cfg(test)]
impl TestBench {
    pub fn new() -> Self {
        Self {
            registry: SpecRegistry::builtin().unwrap(),
            outbox: Vec::new(),
            timers: TimerQueue::new(),
            now_ms: 0,
        }
    }

    pub fn ctx(&mut self) -> HostContext<'_> {
        HostContext::new(
            DeviceId(0x5e1f),
            1,
            0,
            self.now_ms,
            &self.registry,
            &mut self.outbox,
            &mut self.timers,
        )
    }

    /// Fire due timers at their due time.
    pub fn run_timers(&mut self, host: &mut dyn ServiceHost, until_ms: u64) {
        while let Some(t) = self.timers.pop_due(until_ms) {
            self.now_ms = t.due_ms;
            let mut ctx = self.ctx();
            host.on_timer(t.tag, &mut ctx);
        }
        self.now_ms = until_ms;
    }

    pub fn take(&mut self) -> Vec<Packet> {
        core::mem::take(&mut self.outbox)
    }
}
