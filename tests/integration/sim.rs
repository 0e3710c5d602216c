//! Simulated bus for integration tests.
//!
//! [`Rig`] wraps an engine on a manual clock with a recording transport;
//! [`Remote`] builds the frames a remote device would put on the wire.

use devbus::app::AppEvent;
use devbus::bus::clock::ManualClock;
use devbus::bus::{Announcement, BusEvent, ServiceEvent};
use devbus::packet::codec::{CMD_ANNOUNCE, event, get_register};
use devbus::packet::transport::RecordingTransport;
use devbus::spec::classes::{CONTROL_REG_FIRMWARE_IDENTIFIER, CONTROL_REG_FIRMWARE_VERSION};
use devbus::{BusConfig, BusEngine, DeviceId, Packet, SpecRegistry};

// ── Remote device ─────────────────────────────────────────────

pub struct Remote {
    pub id: DeviceId,
    pub classes: Vec<u32>,
    pub restart_counter: u8,
    event_counter: u8,
    seq: u8,
}

#[allow(dead_code)]
impl Remote {
    pub fn new(id: u64, classes: &[u32]) -> Self {
        Self {
            id: DeviceId(id),
            classes: classes.to_vec(),
            restart_counter: 1,
            event_counter: 0,
            seq: 0,
        }
    }

    fn next_seq(&mut self) -> u8 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    pub fn announce(&mut self) -> Vec<u8> {
        let ann = Announcement::from_classes(0, self.restart_counter, &self.classes).encode();
        let seq = self.next_seq();
        Packet::from_device(self.id, 0, CMD_ANNOUNCE, &ann)
            .unwrap()
            .with_seq(seq)
            .to_bytes()
            .to_vec()
    }

    pub fn event(&mut self, index: u8, code: u8, payload: &[u8]) -> Vec<u8> {
        let counter = self.event_counter;
        self.event_counter = (self.event_counter + 1) & 0x7f;
        let seq = self.next_seq();
        Packet::from_device(self.id, index, event(code, counter), payload)
            .unwrap()
            .with_seq(seq)
            .to_bytes()
            .to_vec()
    }

    pub fn report(&mut self, index: u8, reg: u16, payload: &[u8]) -> Vec<u8> {
        let seq = self.next_seq();
        Packet::from_device(self.id, index, get_register(reg), payload)
            .unwrap()
            .with_seq(seq)
            .to_bytes()
            .to_vec()
    }

    /// Both control registers that make up the firmware info.
    pub fn firmware_info(&mut self, identifier: u32, version: &str) -> Vec<u8> {
        let mut bytes = self.report(0, CONTROL_REG_FIRMWARE_IDENTIFIER, &identifier.to_le_bytes());
        bytes.extend(self.report(0, CONTROL_REG_FIRMWARE_VERSION, version.as_bytes()));
        bytes
    }
}

// ── Engine rig ────────────────────────────────────────────────

pub struct Rig {
    pub engine: BusEngine<RecordingTransport>,
    pub clock: ManualClock,
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl Rig {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        let clock = ManualClock::new();
        let engine = BusEngine::new(
            config,
            SpecRegistry::builtin().unwrap(),
            RecordingTransport::new(),
            clock.clone(),
        )
        .unwrap();
        Self {
            engine,
            clock,
            events: Vec::new(),
        }
    }

    pub fn registry(&self) -> SpecRegistry {
        self.engine.registry().clone()
    }

    /// Move the clock to `ms` and tick.
    pub fn at(&mut self, ms: u64) -> &mut Self {
        self.clock.set(ms);
        self.engine.tick(&mut self.events);
        self
    }

    /// Move the clock to `ms` and feed `bytes`.
    pub fn feed_at(&mut self, ms: u64, bytes: &[u8]) -> &mut Self {
        self.clock.set(ms);
        self.engine.receive(bytes, &mut self.events);
        self
    }

    pub fn take_events(&mut self) -> Vec<AppEvent> {
        core::mem::take(&mut self.events)
    }

    pub fn bus_events(&self) -> Vec<&BusEvent> {
        self.events
            .iter()
            .filter_map(|e| match e {
                AppEvent::Bus(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    /// Service events of one class, in emission order.
    pub fn service_events(&self, service_class: u32) -> Vec<ServiceEvent> {
        self.events
            .iter()
            .filter_map(|e| match e {
                AppEvent::Bus(BusEvent::Event(se)) if se.service_class == service_class => {
                    Some(se.clone())
                }
                _ => None,
            })
            .collect()
    }
}
