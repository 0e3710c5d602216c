//! Outbound engine events.
//!
//! The [`BusEngine`](super::service::BusEngine) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  What happens to them (a
//! console, a UI model, a test assertion) is up to the sink.

use crate::bus::BusEvent;
use crate::bus::timers::HostId;
use crate::flash::UpdateCandidate;
use crate::host::HostError;
use crate::packet::{DeviceId, FramingError};
use crate::roles::RoleEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The engine announced itself for the first time.
    Started(DeviceId),

    /// A topology, event or report notification from the bus model.
    Bus(BusEvent),

    /// A role was bound, rebound or lost.
    Role(RoleEvent),

    /// Bytes that did not form a valid frame.
    FrameDropped(FramingError),

    /// A local service host rejected a command.
    HostFailed { host: HostId, error: HostError },

    /// A firmware scan finished.
    UpdatesAvailable(Vec<UpdateCandidate>),
}

impl From<BusEvent> for AppEvent {
    fn from(e: BusEvent) -> Self {
        Self::Bus(e)
    }
}

impl From<RoleEvent> for AppEvent {
    fn from(e: RoleEvent) -> Self {
        Self::Role(e)
    }
}
