//! Bus topology model.
//!
//! The [`Bus`] is the sole owner of device and service existence.  It
//! consumes decoded packets, applies them to its model and returns the
//! [`BusEvent`]s describing what changed, after the change is committed.
//!
//! ```text
//!              announce                any packet              liveness
//!  (unknown) ───────────▶ Announced ───────────────▶ Active ─────────────▶ evicted
//!                             │                         ▲        window
//!                             └─────────────────────────┘
//! ```
//!
//! Re-announcing an unchanged topology only refreshes `last_seen`; a
//! changed one produces per-service add/remove events followed by a
//! single [`BusEvent::DeviceChanged`].

pub mod clock;
pub mod device;
pub mod events;
pub mod timers;

use log::{debug, info, trace, warn};

use crate::config::BusConfig;
use crate::packet::codec::CONTROL_SERVICE_INDEX;
use crate::packet::{CommandKind, DeviceId, Packet};
use crate::spec::SpecRegistry;
use crate::spec::classes::{
    CONTROL_REG_FIRMWARE_IDENTIFIER, CONTROL_REG_FIRMWARE_VERSION, REG_INSTANCE_NAME, SRV_CONTROL,
};
use crate::spec::marshal::Value;

pub use device::{Device, DeviceState, Service, ServiceKey};
pub use events::{BusEvent, ServiceEvent};

// ── Announce payload ──────────────────────────────────────────

/// Fixed part of an announce payload before the class list.
const ANNOUNCE_HEADER_SIZE: usize = 4;

/// Decoded announce payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub flags: u16,
    pub restart_counter: u8,
    /// `(service index, class)` for every non-control service.
    pub services: Vec<(u8, u32)>,
}

impl Announcement {
    /// Services listed positionally from index 1.
    pub fn from_classes(flags: u16, restart_counter: u8, classes: &[u32]) -> Self {
        Self {
            flags,
            restart_counter,
            services: classes
                .iter()
                .enumerate()
                .map(|(i, &c)| (i as u8 + 1, c))
                .collect(),
        }
    }

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < ANNOUNCE_HEADER_SIZE {
            return None;
        }
        let body = &payload[ANNOUNCE_HEADER_SIZE..];
        if body.len() % 4 != 0 {
            warn!("announce: {} trailing bytes ignored", body.len() % 4);
        }
        let services = body
            .chunks_exact(4)
            .enumerate()
            .map(|(i, c)| (i as u8 + 1, u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect();
        Some(Self {
            flags: u16::from_le_bytes([payload[0], payload[1]]),
            restart_counter: payload[2],
            services,
        })
    }

    /// Wire form.  Services are written in index order.
    pub fn encode(&self) -> Vec<u8> {
        let mut services = self.services.clone();
        services.sort_by_key(|&(i, _)| i);
        let mut out = Vec::with_capacity(ANNOUNCE_HEADER_SIZE + services.len() * 4);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.push(self.restart_counter);
        out.push(0);
        for (_, class) in services {
            out.extend_from_slice(&class.to_le_bytes());
        }
        out
    }
}

// ── Filters ───────────────────────────────────────────────────

/// Device query.  Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    /// Device hosts a service that is an instance of this class.
    pub service_class: Option<u32>,
    pub state: Option<DeviceState>,
    /// Skip the engine's own virtual device.
    pub ignore_self: bool,
    pub firmware_identifier: Option<u32>,
    pub flashing: Option<bool>,
}

/// Service query.  Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ServiceFilter {
    /// Service is an instance of this class (`extends` honoured).
    pub service_class: Option<u32>,
    pub device: Option<DeviceId>,
    pub instance_name: Option<String>,
    pub ignore_self: bool,
}

impl ServiceFilter {
    pub fn class(service_class: u32) -> Self {
        Self {
            service_class: Some(service_class),
            ..Self::default()
        }
    }
}

/// Diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub packets: u32,
    pub unknown_device: u32,
    pub retransmissions: u32,
    pub duplicate_events: u32,
    pub evictions: u32,
}

// ── Bus ───────────────────────────────────────────────────────

pub struct Bus {
    self_id: DeviceId,
    liveness_window_ms: u64,
    registry: SpecRegistry,
    /// In first-announce order.
    devices: Vec<Device>,
    /// Background firmware-info polling enabled.
    safe_boot: bool,
    /// How long an identical `(seq, crc)` counts as a retransmission.
    retransmit_window_ms: u64,
    stats: BusStats,
}

/// Retransmission window when none is configured.
pub const DEFAULT_RETRANSMIT_WINDOW_MS: u64 = 100;

impl Bus {
    pub fn new(self_id: DeviceId, liveness_window_ms: u64, registry: SpecRegistry) -> Self {
        Self {
            self_id,
            liveness_window_ms,
            registry,
            devices: Vec::new(),
            safe_boot: true,
            retransmit_window_ms: DEFAULT_RETRANSMIT_WINDOW_MS,
            stats: BusStats::default(),
        }
    }

    pub fn from_config(config: &BusConfig, registry: SpecRegistry) -> Self {
        Self::new(
            DeviceId(config.self_device_id),
            config.liveness_window_ms,
            registry,
        )
        .with_retransmit_window(config.ack_timeout_ms)
    }

    #[must_use]
    pub fn with_retransmit_window(mut self, window_ms: u64) -> Self {
        self.retransmit_window_ms = window_ms;
        self
    }

    pub fn self_id(&self) -> DeviceId {
        self.self_id
    }

    pub fn registry(&self) -> &SpecRegistry {
        &self.registry
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    pub fn safe_boot(&self) -> bool {
        self.safe_boot
    }

    pub fn set_safe_boot(&mut self, enabled: bool) {
        self.safe_boot = enabled;
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| d.id() == id)
    }

    fn position(&self, id: DeviceId) -> Option<usize> {
        self.devices.iter().position(|d| d.id() == id)
    }

    /// Lookup by friendly name or short id, ignoring case.
    pub fn device_by_name(&self, name: &str) -> Option<&Device> {
        let name = name.trim();
        self.devices.iter().find(|d| {
            d.name().is_some_and(|n| n.eq_ignore_ascii_case(name))
                || d.short_id().as_str().eq_ignore_ascii_case(name)
        })
    }

    pub fn service(&self, key: ServiceKey) -> Option<&Service> {
        self.device(key.device)?.service(key.index)
    }

    pub fn devices(&self, filter: &DeviceFilter) -> Vec<&Device> {
        self.devices
            .iter()
            .filter(|d| !(filter.ignore_self && d.id() == self.self_id))
            .filter(|d| filter.state.is_none_or(|s| d.state() == s))
            .filter(|d| filter.flashing.is_none_or(|f| d.flashing() == f))
            .filter(|d| {
                filter
                    .firmware_identifier
                    .is_none_or(|fw| d.firmware_identifier() == Some(fw))
            })
            .filter(|d| {
                filter.service_class.is_none_or(|required| {
                    d.service_classes()
                        .any(|c| self.registry.is_instance_of(c, required))
                })
            })
            .collect()
    }

    /// Matching services, by device announce order then index.
    pub fn services(&self, filter: &ServiceFilter) -> Vec<&Service> {
        self.devices
            .iter()
            .filter(|d| filter.device.is_none_or(|id| d.id() == id))
            .filter(|d| !(filter.ignore_self && d.id() == self.self_id))
            .flat_map(|d| d.services().iter())
            .filter(|s| {
                filter
                    .service_class
                    .is_none_or(|required| self.registry.is_instance_of(s.service_class(), required))
            })
            .filter(|s| {
                filter
                    .instance_name
                    .as_deref()
                    .is_none_or(|n| s.instance_name() == Some(n))
            })
            .collect()
    }

    // ── Mutations ─────────────────────────────────────────────

    /// Apply one received packet.
    pub fn process_packet(&mut self, pkt: &Packet, now_ms: u64) -> Vec<BusEvent> {
        self.stats.packets += 1;
        trace!("bus: {}", pkt);

        // Commands name their destination, not their sender.
        if pkt.is_command() {
            return Vec::new();
        }

        let id = pkt.device_id();
        match pkt.kind() {
            CommandKind::Announce => {
                let Some(announcement) = Announcement::parse(pkt.payload()) else {
                    warn!("bus: short announce from {}", id.short_id());
                    return Vec::new();
                };
                return self.apply_announce(id, &announcement, now_ms);
            }
            CommandKind::Ack(_) => {
                if let Some(pos) = self.position(id) {
                    self.touch(pos, now_ms);
                }
                return Vec::new();
            }
            _ => {}
        }

        let Some(pos) = self.position(id) else {
            self.stats.unknown_device += 1;
            debug!("bus: packet from unannounced device {}", id.short_id());
            return Vec::new();
        };
        self.touch(pos, now_ms);

        let frame = (pkt.seq(), pkt.crc());
        let repeated = self.devices[pos].last_frame.is_some_and(|(seq, crc, at_ms)| {
            (seq, crc) == frame && now_ms.saturating_sub(at_ms) < self.retransmit_window_ms
        });
        if repeated {
            self.stats.retransmissions += 1;
            debug!("bus: retransmission from {} dropped", id.short_id());
            return Vec::new();
        }
        self.devices[pos].last_frame = Some((frame.0, frame.1, now_ms));

        let index = pkt.service_index();
        let Some(service) = self.devices[pos].service(index) else {
            warn!("bus: {} has no service {}", id.short_id(), index);
            return Vec::new();
        };
        let key = service.key();
        let service_class = service.service_class();

        match pkt.kind() {
            CommandKind::GetRegister(reg) => self.apply_register_report(pos, index, reg, pkt.payload()),
            CommandKind::Event { code, counter } => {
                let Some(service) = self.devices[pos].service_mut(index) else {
                    return Vec::new();
                };
                if service.last_event_counter == Some(counter) {
                    self.stats.duplicate_events += 1;
                    debug!("bus: repeated event {code:#x}/{counter} from {key}");
                    return Vec::new();
                }
                service.last_event_counter = Some(counter);
                vec![BusEvent::Event(ServiceEvent {
                    service: key,
                    service_class,
                    code,
                    counter,
                    payload: pkt.payload().to_vec(),
                    timestamp_ms: now_ms,
                })]
            }
            CommandKind::Action(command) => vec![BusEvent::CommandReport {
                service: key,
                command,
                payload: pkt.payload().to_vec(),
            }],
            CommandKind::SetRegister(_) | CommandKind::Unknown(_) => {
                let command = pkt.service_command();
                warn!("bus: unknown command {command:#06x} from {key}");
                vec![BusEvent::UnknownCommand {
                    service: key,
                    command,
                }]
            }
            CommandKind::Announce | CommandKind::Ack(_) => Vec::new(),
        }
    }

    fn touch(&mut self, pos: usize, now_ms: u64) {
        let dev = &mut self.devices[pos];
        dev.last_seen_ms = now_ms;
        dev.state = DeviceState::Active;
    }

    /// Apply a device's declared service list.
    pub fn apply_announce(
        &mut self,
        id: DeviceId,
        announcement: &Announcement,
        now_ms: u64,
    ) -> Vec<BusEvent> {
        let classes = Self::announced_classes(id, announcement);
        let mut events = Vec::new();

        let Some(pos) = self.position(id) else {
            let mut dev = Device::new(id, now_ms);
            dev.announce_flags = announcement.flags;
            dev.restart_counter = announcement.restart_counter;
            dev.services = classes
                .iter()
                .enumerate()
                .map(|(i, &c)| Service::new(id, i as u8, c))
                .collect();
            info!(
                "bus: {} connected with {} services",
                id.short_id(),
                dev.services.len() - 1
            );
            self.devices.push(dev);
            events.push(BusEvent::DeviceConnected(id));
            return events;
        };

        self.touch(pos, now_ms);
        let dev = &mut self.devices[pos];

        if announcement.restart_counter < dev.restart_counter {
            info!("bus: {} restarted", id.short_id());
            dev.services.iter_mut().for_each(Service::reset_volatile);
            dev.last_frame = None;
            dev.bump();
            events.push(BusEvent::DeviceRestarted(id));
        }
        dev.restart_counter = announcement.restart_counter;
        dev.announce_flags = announcement.flags;

        let mut changed = false;
        let old_len = dev.services.len();
        for i in (0..old_len.max(classes.len())).rev() {
            let new = classes.get(i).copied();
            let old = dev.services.get(i).map(Service::service_class);
            if old == new {
                continue;
            }
            if let Some(old_class) = old {
                events.push(BusEvent::ServiceRemoved {
                    service: ServiceKey::new(id, i as u8),
                    service_class: old_class,
                });
            }
            changed = true;
        }
        if changed {
            let mut services = Vec::with_capacity(classes.len());
            for (i, &class) in classes.iter().enumerate() {
                match dev.services.get(i) {
                    Some(s) if s.service_class() == class => services.push(s.clone()),
                    _ => {
                        events.push(BusEvent::ServiceAdded {
                            service: ServiceKey::new(id, i as u8),
                            service_class: class,
                        });
                        services.push(Service::new(id, i as u8, class));
                    }
                }
            }
            dev.services = services;
            dev.bump();
            info!("bus: {} services changed", id.short_id());
            events.push(BusEvent::DeviceChanged(id));
        }
        events
    }

    /// Positional class list with control at index 0.  Duplicate indices
    /// keep the last class; a gap truncates the list.
    fn announced_classes(id: DeviceId, announcement: &Announcement) -> Vec<u32> {
        let mut slots: Vec<Option<u32>> = vec![Some(SRV_CONTROL)];
        for &(index, class) in &announcement.services {
            if index == CONTROL_SERVICE_INDEX {
                warn!("bus: {} announced a service at index 0", id.short_id());
                continue;
            }
            let i = index as usize;
            if slots.len() <= i {
                slots.resize(i + 1, None);
            }
            if slots[i].is_some() {
                warn!("bus: {} announced index {} twice, last wins", id.short_id(), index);
            }
            slots[i] = Some(class);
        }
        let classes: Vec<u32> = slots.iter().map_while(|s| *s).collect();
        if classes.len() < slots.len() {
            warn!("bus: {} announce has a gap at index {}", id.short_id(), classes.len());
        }
        classes
    }

    fn apply_register_report(
        &mut self,
        pos: usize,
        index: u8,
        reg: u16,
        payload: &[u8],
    ) -> Vec<BusEvent> {
        let registry = &self.registry;
        let dev = &mut self.devices[pos];
        let id = dev.id();
        let mut events = Vec::new();
        let mut device_changed = false;

        let Some(service) = dev.service_mut(index) else {
            return events;
        };
        let key = service.key();
        if service.register(reg) != Some(payload) {
            service.registers.insert(reg, payload.to_vec());
            events.push(BusEvent::RegisterChanged {
                service: key,
                register: reg,
            });
        }
        if reg == REG_INSTANCE_NAME {
            let name = core::str::from_utf8(payload)
                .ok()
                .map(|s| s.trim_end_matches('\0').to_owned())
                .filter(|s| !s.is_empty());
            device_changed |= service.set_instance_name(name);
        }

        if index == CONTROL_SERVICE_INDEX {
            let decoded = registry
                .spec_for_class(SRV_CONTROL)
                .and_then(|spec| spec.register(reg))
                .and_then(|info| info.unpack(payload).ok());
            match (reg, decoded.as_deref()) {
                (CONTROL_REG_FIRMWARE_IDENTIFIER, Some([Value::UInt(fw)])) => {
                    let fw = Some(*fw as u32);
                    if dev.firmware_identifier != fw {
                        dev.firmware_identifier = fw;
                        device_changed = true;
                    }
                }
                (CONTROL_REG_FIRMWARE_VERSION, Some([Value::Text(v)])) => {
                    if dev.firmware_version.as_deref() != Some(v.as_str()) {
                        dev.firmware_version = Some(v.clone());
                        device_changed = true;
                    }
                }
                _ => {}
            }
        }

        if device_changed {
            dev.bump();
            debug!("bus: {} info updated", id.short_id());
            events.push(BusEvent::DeviceChanged(id));
        }
        events
    }

    /// Evict devices silent for longer than the liveness window.
    /// The local virtual device is never evicted.
    pub fn evict_stale(&mut self, now_ms: u64) -> Vec<BusEvent> {
        let window = self.liveness_window_ms;
        let self_id = self.self_id;
        let mut events = Vec::new();
        self.devices.retain(|d| {
            let keep = d.id() == self_id || now_ms.saturating_sub(d.last_seen_ms()) <= window;
            if !keep {
                info!("bus: {} lost", d.short_id());
                events.push(BusEvent::DeviceDisconnected(d.id()));
            }
            keep
        });
        self.stats.evictions += events.len() as u32;
        events
    }

    /// Assign or clear a friendly name.
    pub fn set_device_name(&mut self, id: DeviceId, name: Option<String>) -> Option<BusEvent> {
        let pos = self.position(id)?;
        let dev = &mut self.devices[pos];
        let name = name.map(|n| n.trim().to_owned()).filter(|n| !n.is_empty());
        if dev.name == name {
            return None;
        }
        dev.name.clone_from(&name);
        dev.bump();
        Some(BusEvent::DeviceNameChanged { device: id, name })
    }

    /// Set the flashing flag, returning the previous value.
    pub fn set_flashing(&mut self, id: DeviceId, flashing: bool) -> Option<bool> {
        let pos = self.position(id)?;
        let dev = &mut self.devices[pos];
        let prior = dev.flashing;
        if prior != flashing {
            dev.flashing = flashing;
            dev.bump();
        }
        Some(prior)
    }

    pub fn is_flashing_any(&self) -> bool {
        self.devices.iter().any(Device::flashing)
    }

    /// Devices whose firmware info should be requested now.  Marks them
    /// as polled.
    pub fn poll_candidates(&mut self, now_ms: u64, interval_ms: u64) -> Vec<DeviceId> {
        if !self.safe_boot {
            return Vec::new();
        }
        let self_id = self.self_id;
        self.devices
            .iter_mut()
            .filter(|d| d.id() != self_id && !d.flashing && d.firmware_info().is_none())
            .filter(|d| d.last_poll_ms.is_none_or(|t| now_ms.saturating_sub(t) >= interval_ms))
            .map(|d| {
                d.last_poll_ms = Some(now_ms);
                d.id()
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::codec::{CMD_ANNOUNCE, event, get_register};
    use crate::spec::classes::*;

    const SELF: DeviceId = DeviceId(0xffff);
    const DEV: DeviceId = DeviceId(0x1234_5678);

    fn bus() -> Bus {
        Bus::new(SELF, 2000, SpecRegistry::builtin().unwrap())
    }

    fn announce(id: DeviceId, restart: u8, classes: &[u32]) -> Packet {
        let payload = Announcement::from_classes(0, restart, classes).encode();
        Packet::from_device(id, 0, CMD_ANNOUNCE, &payload).unwrap()
    }

    #[test]
    fn announce_round_trip() {
        let a = Announcement::from_classes(0x0102, 3, &[SRV_BUTTON, SRV_TEMPERATURE]);
        assert_eq!(Announcement::parse(&a.encode()), Some(a));
        assert_eq!(Announcement::parse(&[1, 2]), None);
    }

    #[test]
    fn first_announce_connects() {
        let mut b = bus();
        let ev = b.process_packet(&announce(DEV, 1, &[SRV_BUTTON]), 10);
        assert_eq!(ev, vec![BusEvent::DeviceConnected(DEV)]);
        let dev = b.device(DEV).unwrap();
        assert_eq!(dev.state(), DeviceState::Announced);
        assert_eq!(dev.services().len(), 2);
        assert_eq!(dev.service(1).unwrap().service_class(), SRV_BUTTON);
    }

    #[test]
    fn repeated_announce_is_idempotent() {
        let mut b = bus();
        let pkt = announce(DEV, 1, &[SRV_BUTTON]);
        assert_eq!(b.process_packet(&pkt, 0).len(), 1);
        let change = b.device(DEV).unwrap().change_id();
        assert!(b.process_packet(&pkt, 100).is_empty());
        let dev = b.device(DEV).unwrap();
        assert_eq!(dev.change_id(), change);
        assert_eq!(dev.last_seen_ms(), 100);
        assert_eq!(dev.state(), DeviceState::Active);
    }

    #[test]
    fn changed_announce_diffs_services() {
        let mut b = bus();
        b.process_packet(&announce(DEV, 1, &[SRV_BUTTON, SRV_TEMPERATURE]), 0);
        let ev = b.process_packet(&announce(DEV, 2, &[SRV_BUTTON, SRV_BOOTLOADER]), 10);
        let key = ServiceKey::new(DEV, 2);
        assert_eq!(
            ev,
            vec![
                BusEvent::ServiceRemoved {
                    service: key,
                    service_class: SRV_TEMPERATURE
                },
                BusEvent::ServiceAdded {
                    service: key,
                    service_class: SRV_BOOTLOADER
                },
                BusEvent::DeviceChanged(DEV),
            ]
        );
        assert_eq!(b.device(DEV).unwrap().services().len(), 3);
    }

    #[test]
    fn duplicate_index_last_write_wins() {
        let mut b = bus();
        let ann = Announcement {
            flags: 0,
            restart_counter: 0,
            services: vec![(1, SRV_BUTTON), (1, SRV_TEMPERATURE)],
        };
        b.apply_announce(DEV, &ann, 0);
        let dev = b.device(DEV).unwrap();
        assert_eq!(dev.services().len(), 2);
        assert_eq!(dev.service(1).unwrap().service_class(), SRV_TEMPERATURE);
    }

    #[test]
    fn packets_from_unknown_devices_ignored() {
        let mut b = bus();
        let pkt = Packet::from_device(DEV, 1, event(1, 0), &[]).unwrap();
        assert!(b.process_packet(&pkt, 0).is_empty());
        assert_eq!(b.stats().unknown_device, 1);
    }

    #[test]
    fn repeated_event_counter_dropped() {
        let mut b = bus();
        b.process_packet(&announce(DEV, 1, &[SRV_BUTTON]), 0);
        let down = Packet::from_device(DEV, 1, event(BUTTON_EV_DOWN, 4), &[]).unwrap();
        assert_eq!(b.process_packet(&down, 1).len(), 1);
        let again = down.clone().with_seq(9);
        assert!(b.process_packet(&again, 2).is_empty());
        assert_eq!(b.stats().duplicate_events, 1);

        let next = Packet::from_device(DEV, 1, event(BUTTON_EV_UP, 5), &[0; 4]).unwrap();
        match b.process_packet(&next, 3).as_slice() {
            [BusEvent::Event(ev)] => {
                assert_eq!(ev.code, BUTTON_EV_UP);
                assert_eq!(ev.service_class, SRV_BUTTON);
                assert_eq!(ev.timestamp_ms, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn retransmitted_frame_dropped() {
        let mut b = bus();
        b.process_packet(&announce(DEV, 1, &[SRV_BUTTON]), 0);
        let report =
            Packet::from_device(DEV, 1, get_register(BUTTON_REG_PRESSURE), &[0, 0x80]).unwrap();
        assert_eq!(b.process_packet(&report, 1).len(), 1);
        assert!(b.process_packet(&report, 2).is_empty());
        assert_eq!(b.stats().retransmissions, 1);
    }

    #[test]
    fn identical_report_outside_window_is_fresh() {
        let mut b = bus();
        b.process_packet(&announce(DEV, 1, &[SRV_BUTTON]), 0);
        let report =
            Packet::from_device(DEV, 1, get_register(BUTTON_REG_PRESSURE), &[0, 0x80]).unwrap();
        assert_eq!(b.process_packet(&report, 10).len(), 1);

        // Same value again: nothing changed, but it was not a retransmission.
        let later = 10 + DEFAULT_RETRANSMIT_WINDOW_MS;
        assert!(b.process_packet(&report, later).is_empty());
        assert_eq!(b.stats().retransmissions, 0);

        // A repeat inside the window of that one is still dropped.
        b.process_packet(&report, later + 1);
        assert_eq!(b.stats().retransmissions, 1);
    }

    #[test]
    fn firmware_reports_fill_device_info() {
        let mut b = bus();
        b.process_packet(&announce(DEV, 1, &[]), 0);
        let id = Packet::from_device(
            DEV,
            0,
            get_register(CONTROL_REG_FIRMWARE_IDENTIFIER),
            &0x3010_0001u32.to_le_bytes(),
        )
        .unwrap();
        let ev = b.process_packet(&id, 1);
        assert!(ev.contains(&BusEvent::DeviceChanged(DEV)));
        let ver = Packet::from_device(DEV, 0, get_register(CONTROL_REG_FIRMWARE_VERSION), b"v1.2.3")
            .unwrap();
        b.process_packet(&ver, 2);
        let info = b.device(DEV).unwrap().firmware_info().unwrap();
        assert_eq!(info.identifier, 0x3010_0001);
        assert_eq!(info.version, "v1.2.3");
    }

    #[test]
    fn instance_name_report_names_service() {
        let mut b = bus();
        b.process_packet(&announce(DEV, 1, &[SRV_BUTTON]), 0);
        let name = Packet::from_device(DEV, 1, get_register(REG_INSTANCE_NAME), b"left").unwrap();
        b.process_packet(&name, 1);
        let found = b.services(&ServiceFilter {
            instance_name: Some("left".into()),
            ..ServiceFilter::default()
        });
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key(), ServiceKey::new(DEV, 1));
    }

    #[test]
    fn restart_drops_cached_state() {
        let mut b = bus();
        b.process_packet(&announce(DEV, 5, &[SRV_BUTTON]), 0);
        let down = Packet::from_device(DEV, 1, event(BUTTON_EV_DOWN, 0), &[]).unwrap();
        b.process_packet(&down, 1);
        let ev = b.process_packet(&announce(DEV, 0, &[SRV_BUTTON]), 2);
        assert_eq!(ev, vec![BusEvent::DeviceRestarted(DEV)]);
        // Counter 0 is fresh again after a restart.
        assert_eq!(b.process_packet(&down.with_seq(1), 3).len(), 1);
    }

    #[test]
    fn eviction_after_liveness_window() {
        let mut b = bus();
        b.process_packet(&announce(DEV, 1, &[SRV_BUTTON]), 0);
        b.process_packet(&announce(SELF, 1, &[]), 0);
        assert!(b.evict_stale(2000).is_empty());
        assert_eq!(b.evict_stale(2001), vec![BusEvent::DeviceDisconnected(DEV)]);
        assert!(b.device(DEV).is_none());
        assert!(b.device(SELF).is_some());
    }

    #[test]
    fn service_filter_honours_extends() {
        let mut b = bus();
        b.process_packet(&announce(DEV, 1, &[SRV_TEMPERATURE, SRV_PRESSURE_BUTTON]), 0);
        let other = DeviceId(99);
        b.process_packet(&announce(other, 1, &[SRV_BUTTON]), 1);

        let buttons: Vec<ServiceKey> = b
            .services(&ServiceFilter::class(SRV_BUTTON))
            .iter()
            .map(|s| s.key())
            .collect();
        assert_eq!(buttons, vec![ServiceKey::new(DEV, 2), ServiceKey::new(other, 1)]);

        let sensors = b.devices(&DeviceFilter {
            service_class: Some(SRV_SENSOR),
            ..DeviceFilter::default()
        });
        assert_eq!(sensors.len(), 2);
    }

    #[test]
    fn names_fire_only_on_change() {
        let mut b = bus();
        b.process_packet(&announce(DEV, 1, &[]), 0);
        assert!(b.set_device_name(DEV, Some("hub".into())).is_some());
        assert!(b.set_device_name(DEV, Some(" hub ".into())).is_none());
        assert_eq!(b.device_by_name("HUB").unwrap().id(), DEV);
        let short = DEV.short_id();
        assert_eq!(b.device_by_name(short.as_str()).unwrap().id(), DEV);
        assert!(b.set_device_name(DEV, None).is_some());
    }

    #[test]
    fn polling_skips_flashing_and_known_devices() {
        let mut b = bus();
        b.process_packet(&announce(DEV, 1, &[]), 0);
        let other = DeviceId(77);
        b.process_packet(&announce(other, 1, &[]), 0);
        b.set_flashing(other, true);

        assert_eq!(b.poll_candidates(0, 1000), vec![DEV]);
        assert!(b.poll_candidates(500, 1000).is_empty());
        assert_eq!(b.poll_candidates(1000, 1000), vec![DEV]);

        b.set_safe_boot(false);
        assert!(b.poll_candidates(5000, 1000).is_empty());
    }
}
