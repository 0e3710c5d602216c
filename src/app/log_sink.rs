//! Log-based event sink.

use log::{debug, info, warn};

use super::events::AppEvent;
use super::ports::EventSink;
use crate::bus::BusEvent;

/// Writes every [`AppEvent`] to the `log` facade, one line each.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started(id) => info!("START | self={}", id.short_id()),
            AppEvent::Bus(BusEvent::Event(e)) => {
                debug!("EVENT | {} code={:#04x} #{}", e.service, e.code, e.counter);
            }
            AppEvent::Bus(BusEvent::AckTimeout { device, crc }) => {
                warn!("ACK   | {} crc={crc:#06x} timed out", device.short_id());
            }
            AppEvent::Bus(e) => info!("BUS   | {e:?}"),
            AppEvent::Role(r) => match r.current {
                Some(key) => info!("ROLE  | {} -> {key}", r.role),
                None => info!("ROLE  | {} unbound", r.role),
            },
            AppEvent::FrameDropped(e) => debug!("FRAME | dropped: {e}"),
            AppEvent::HostFailed { host, error } => warn!("HOST  | #{host}: {error}"),
            AppEvent::UpdatesAvailable(found) => {
                for c in found {
                    info!(
                        "FW    | {} {} -> {}",
                        c.device.short_id(),
                        c.current.version,
                        c.available_version
                    );
                }
            }
        }
    }
}
