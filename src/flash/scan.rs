//! Matching available firmware against what devices run.

use log::{debug, info};

use crate::bus::{Bus, DeviceFilter};
use crate::packet::DeviceId;

use super::{FirmwareBlob, FirmwareInfo, parse_version, update_applicable};

/// A device that could take a newer image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCandidate {
    pub device: DeviceId,
    pub current: FirmwareInfo,
    /// Index of the newest applicable blob in the scanned catalogue.
    pub blob_index: usize,
    pub available_version: String,
}

/// One scan waits for every device to report firmware info, or for the
/// timeout, then yields the candidates.  Scans never overlap and are not
/// started while any device is flashing.
#[derive(Debug)]
pub struct FirmwareScanner {
    timeout_ms: u64,
    started_at: Option<u64>,
}

impl FirmwareScanner {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            started_at: None,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    /// Start a scan; false if one is in flight or a flash is running.
    pub fn begin(&mut self, now_ms: u64, bus: &Bus) -> bool {
        if self.started_at.is_some() || bus.is_flashing_any() {
            return false;
        }
        debug!("scan: started");
        self.started_at = Some(now_ms);
        true
    }

    /// Finish the scan once it can; `None` while still waiting.
    pub fn poll(
        &mut self,
        now_ms: u64,
        bus: &Bus,
        blobs: &[FirmwareBlob],
    ) -> Option<Vec<UpdateCandidate>> {
        let started = self.started_at?;
        let devices = bus.devices(&DeviceFilter {
            ignore_self: true,
            ..DeviceFilter::default()
        });
        let all_known = devices.iter().all(|d| d.firmware_info().is_some());
        if !all_known && now_ms.saturating_sub(started) < self.timeout_ms {
            return None;
        }
        self.started_at = None;

        let found: Vec<UpdateCandidate> = devices
            .iter()
            .filter_map(|d| {
                let info = d.firmware_info()?;
                let (blob_index, blob) = newest_applicable(&info, blobs)?;
                Some(UpdateCandidate {
                    device: d.id(),
                    current: info,
                    blob_index,
                    available_version: blob.version.clone(),
                })
            })
            .collect();
        info!("scan: {} update(s) available", found.len());
        Some(found)
    }
}

fn newest_applicable<'a>(
    info: &FirmwareInfo,
    blobs: &'a [FirmwareBlob],
) -> Option<(usize, &'a FirmwareBlob)> {
    blobs
        .iter()
        .enumerate()
        .filter(|(_, b)| update_applicable(info, b))
        .max_by_key(|(_, b)| parse_version(&b.version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Announcement;
    use crate::packet::Packet;
    use crate::packet::codec::get_register;
    use crate::spec::SpecRegistry;
    use crate::spec::classes::{
        CONTROL_REG_FIRMWARE_IDENTIFIER, CONTROL_REG_FIRMWARE_VERSION, SRV_BOOTLOADER,
    };

    const A: DeviceId = DeviceId(0xa1);
    const B: DeviceId = DeviceId(0xb2);
    const FW: u32 = 0x3f00_0001;

    fn announce(bus: &mut Bus, id: DeviceId) {
        let ann = Announcement::from_classes(0, 1, &[SRV_BOOTLOADER]).encode();
        bus.process_packet(&Packet::from_device(id, 0, 0, &ann).unwrap(), 0);
    }

    fn report_firmware(bus: &mut Bus, id: DeviceId, version: &str) {
        let fw = get_register(CONTROL_REG_FIRMWARE_IDENTIFIER);
        let ver = get_register(CONTROL_REG_FIRMWARE_VERSION);
        bus.process_packet(&Packet::from_device(id, 0, fw, &FW.to_le_bytes()).unwrap(), 1);
        bus.process_packet(&Packet::from_device(id, 0, ver, version.as_bytes()).unwrap(), 1);
    }

    fn blob(version: &str) -> FirmwareBlob {
        FirmwareBlob {
            firmware_identifier: FW,
            name: "sensor-node".into(),
            version: version.into(),
            image: vec![0; 4],
        }
    }

    #[test]
    fn completes_when_all_devices_known() {
        let mut bus = Bus::new(DeviceId(1), 2000, SpecRegistry::builtin().unwrap());
        announce(&mut bus, A);
        announce(&mut bus, B);
        report_firmware(&mut bus, A, "1.0.0");

        let blobs = [blob("1.1.0"), blob("1.2.0"), blob("0.9.0")];
        let mut scan = FirmwareScanner::new(1500);
        assert!(scan.begin(0, &bus));
        assert!(!scan.begin(10, &bus));
        assert_eq!(scan.poll(100, &bus, &blobs), None);

        report_firmware(&mut bus, B, "1.2.0");
        let found = scan.poll(200, &bus, &blobs).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].device, A);
        assert_eq!(found[0].blob_index, 1);
        assert_eq!(found[0].available_version, "1.2.0");
        assert!(!scan.is_scanning());
    }

    #[test]
    fn times_out_with_partial_info() {
        let mut bus = Bus::new(DeviceId(1), 10_000, SpecRegistry::builtin().unwrap());
        announce(&mut bus, A);
        announce(&mut bus, B);
        report_firmware(&mut bus, A, "1.0.0");
        let mut scan = FirmwareScanner::new(1500);
        scan.begin(0, &bus);
        assert_eq!(scan.poll(1499, &bus, &[blob("2.0.0")]), None);
        assert_eq!(scan.poll(1500, &bus, &[blob("2.0.0")]).unwrap().len(), 1);
    }

    #[test]
    fn no_scan_while_flashing() {
        let mut bus = Bus::new(DeviceId(1), 2000, SpecRegistry::builtin().unwrap());
        announce(&mut bus, A);
        bus.set_flashing(A, true);
        let mut scan = FirmwareScanner::new(1500);
        assert!(!scan.begin(0, &bus));
        assert_eq!(scan.poll(5000, &bus, &[]), None);
    }
}
