//! Devices and the services they host.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::flash::FirmwareInfo;
use crate::packet::{DeviceId, ShortId};

/// Identity of one service instance on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub device: DeviceId,
    pub index: u8,
}

impl ServiceKey {
    pub fn new(device: DeviceId, index: u8) -> Self {
        Self { device, index }
    }
}

impl core::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}[{}]", self.device.short_id(), self.index)
    }
}

/// Device lifecycle.  Evicted devices are removed from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Seen one announce, nothing else yet.
    Announced,
    /// Any later packet has been received.
    Active,
}

/// A service instance as seen on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    device: DeviceId,
    index: u8,
    service_class: u32,
    instance_name: Option<String>,
    /// Counter of the last event delivered, for de-duplication.
    pub(crate) last_event_counter: Option<u8>,
    /// Last reported payload per register.
    pub(crate) registers: BTreeMap<u16, Vec<u8>>,
}

impl Service {
    pub(crate) fn new(device: DeviceId, index: u8, service_class: u32) -> Self {
        Self {
            device,
            index,
            service_class,
            instance_name: None,
            last_event_counter: None,
            registers: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.device, self.index)
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn service_class(&self) -> u32 {
        self.service_class
    }

    pub fn instance_name(&self) -> Option<&str> {
        self.instance_name.as_deref()
    }

    pub(crate) fn set_instance_name(&mut self, name: Option<String>) -> bool {
        if self.instance_name == name {
            return false;
        }
        self.instance_name = name;
        true
    }

    /// Last reported raw value of `reg`.
    pub fn register(&self, reg: u16) -> Option<&[u8]> {
        self.registers.get(&reg).map(Vec::as_slice)
    }

    /// Forget per-boot state after the device restarted.
    pub(crate) fn reset_volatile(&mut self) {
        self.last_event_counter = None;
        self.registers.clear();
    }
}

/// A node on the bus.
#[derive(Debug, Clone)]
pub struct Device {
    id: DeviceId,
    short_id: ShortId,
    pub(crate) state: DeviceState,
    pub(crate) last_seen_ms: u64,
    pub(crate) announce_flags: u16,
    pub(crate) restart_counter: u8,
    pub(crate) services: Vec<Service>,
    pub(crate) firmware_identifier: Option<u32>,
    pub(crate) firmware_version: Option<String>,
    pub(crate) flashing: bool,
    pub(crate) change_id: u64,
    pub(crate) name: Option<String>,
    /// `(seq, crc, received_ms)` of the last non-announce frame.
    pub(crate) last_frame: Option<(u8, u16, u64)>,
    pub(crate) last_poll_ms: Option<u64>,
}

impl Device {
    pub(crate) fn new(id: DeviceId, now_ms: u64) -> Self {
        Self {
            id,
            short_id: id.short_id(),
            state: DeviceState::Announced,
            last_seen_ms: now_ms,
            announce_flags: 0,
            restart_counter: 0,
            services: Vec::new(),
            firmware_identifier: None,
            firmware_version: None,
            flashing: false,
            change_id: 0,
            name: None,
            last_frame: None,
            last_poll_ms: None,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn short_id(&self) -> ShortId {
        self.short_id
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms
    }

    pub fn announce_flags(&self) -> u16 {
        self.announce_flags
    }

    pub fn restart_counter(&self) -> u8 {
        self.restart_counter
    }

    /// Services in index order; index 0 is the control service.
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn service(&self, index: u8) -> Option<&Service> {
        self.services.get(index as usize)
    }

    pub(crate) fn service_mut(&mut self, index: u8) -> Option<&mut Service> {
        self.services.get_mut(index as usize)
    }

    /// Service classes by index, control included.
    pub fn service_classes(&self) -> impl Iterator<Item = u32> + '_ {
        self.services.iter().map(Service::service_class)
    }

    pub fn firmware_identifier(&self) -> Option<u32> {
        self.firmware_identifier
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.firmware_version.as_deref()
    }

    /// Firmware identity, once both identifier and version are known.
    pub fn firmware_info(&self) -> Option<FirmwareInfo> {
        Some(FirmwareInfo {
            identifier: self.firmware_identifier?,
            version: self.firmware_version.clone()?,
            name: self.name.clone(),
        })
    }

    pub fn flashing(&self) -> bool {
        self.flashing
    }

    /// Bumped on every logical change to this device.
    pub fn change_id(&self) -> u64 {
        self.change_id
    }

    pub(crate) fn bump(&mut self) {
        self.change_id += 1;
    }

    /// Friendly name if assigned, short id otherwise.
    pub fn friendly_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.short_id.as_str().to_owned())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
