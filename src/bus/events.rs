//! Notifications produced by the topology model.
//!
//! Each event is returned only after the mutation it describes has been
//! fully applied to the [`Bus`](super::Bus).

use crate::packet::DeviceId;

use super::device::ServiceKey;

/// An event packet from a bus service, after de-duplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub service: ServiceKey,
    pub service_class: u32,
    pub code: u8,
    pub counter: u8,
    pub payload: Vec<u8>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// First announce from a device.
    DeviceConnected(DeviceId),
    /// Liveness window elapsed without a packet.
    DeviceDisconnected(DeviceId),
    /// Announced services, firmware info or flashing state changed.
    DeviceChanged(DeviceId),
    /// Restart counter went backwards; cached state was dropped.
    DeviceRestarted(DeviceId),
    DeviceNameChanged {
        device: DeviceId,
        name: Option<String>,
    },
    ServiceAdded {
        service: ServiceKey,
        service_class: u32,
    },
    ServiceRemoved {
        service: ServiceKey,
        service_class: u32,
    },
    Event(ServiceEvent),
    /// A register report carried a value different from the cached one.
    RegisterChanged {
        service: ServiceKey,
        register: u16,
    },
    /// Report answering a custom command.
    CommandReport {
        service: ServiceKey,
        command: u16,
        payload: Vec<u8>,
    },
    /// Valid frame whose command the engine cannot classify.
    UnknownCommand {
        service: ServiceKey,
        command: u16,
    },
    Acked {
        device: DeviceId,
        crc: u16,
    },
    AckTimeout {
        device: DeviceId,
        crc: u16,
    },
}

impl BusEvent {
    /// Whether the set of devices or services changed.
    pub fn is_topology_change(&self) -> bool {
        matches!(
            self,
            Self::DeviceConnected(_)
                | Self::DeviceDisconnected(_)
                | Self::DeviceChanged(_)
                | Self::ServiceAdded { .. }
                | Self::ServiceRemoved { .. }
        )
    }
}
