//! Firmware flashing through the engine against an in-process bootloader.

use futures_lite::future::block_on;

use devbus::flash::{CancelToken, FirmwareBlob, FlashError, HostLink, uf2};
use devbus::host::BootloaderServer;
use devbus::spec::classes::{SRV_BOOTLOADER, SRV_BUTTON};
use devbus::DeviceId;

use crate::sim::{Remote, Rig};

const FAMILY: u32 = 0x5ee2_1e55;

/// Engine that knows one device running `version` of [`FAMILY`].
fn rig_with_device(version: &str, classes: &[u32]) -> (Rig, DeviceId) {
    let mut rig = Rig::new();
    let mut dev = Remote::new(0xf1a5_0001, classes);
    let announce = dev.announce();
    let info = dev.firmware_info(FAMILY, version);
    rig.feed_at(0, &announce);
    rig.feed_at(1, &info);
    rig.take_events();
    (rig, dev.id)
}

fn link(rig: &Rig, device: DeviceId) -> HostLink<BootloaderServer> {
    let registry = rig.registry();
    let boot = BootloaderServer::new(&registry, 1024).unwrap();
    HostLink::new(boot, registry, device, 1)
}

fn uf2_blob(version: &str, len: usize) -> (FirmwareBlob, Vec<u8>) {
    let image: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
    let container = uf2::encode(FAMILY, 0x2000, &image);
    let blob = FirmwareBlob::from_uf2(&container, "sensor-node", version).unwrap();
    (blob, image)
}

#[test]
fn uf2_image_lands_in_bootloader() {
    let (mut rig, device) = rig_with_device("1.0.0", &[SRV_BOOTLOADER]);
    let (blob, image) = uf2_blob("1.0.1", 3000);
    assert_eq!(blob.firmware_identifier, FAMILY);

    let mut link = link(&rig, device);
    let mut progress = Vec::new();
    let report = block_on(rig.engine.flash(
        &mut link,
        &blob,
        &[device],
        &CancelToken::new(),
        |p| progress.push(p),
    ))
    .unwrap();

    assert_eq!(report.flashed, vec![device]);
    assert_eq!(report.bytes, image.len());
    assert_eq!(link.host().image(), Some(image.as_slice()));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(1.0));
    assert!(!rig.engine.bus().device(device).unwrap().flashing());
}

#[test]
fn same_version_not_applicable() {
    let (mut rig, device) = rig_with_device("2.0.0", &[SRV_BOOTLOADER]);
    let (blob, _) = uf2_blob("2.0.0", 100);
    let mut link = link(&rig, device);
    let err = block_on(rig.engine.flash(
        &mut link,
        &blob,
        &[device],
        &CancelToken::new(),
        |_| {},
    ))
    .unwrap_err();
    assert_eq!(err, FlashError::NotApplicable { device });
    assert!(link.host().image().is_none());
}

#[test]
fn device_without_bootloader_rejected() {
    let (mut rig, device) = rig_with_device("1.0.0", &[SRV_BUTTON]);
    let (blob, _) = uf2_blob("1.1.0", 100);
    let mut link = link(&rig, device);
    let err = block_on(rig.engine.flash(
        &mut link,
        &blob,
        &[device],
        &CancelToken::new(),
        |_| {},
    ))
    .unwrap_err();
    assert_eq!(err, FlashError::NoBootloader(device));
}

#[test]
fn cancelled_before_start_leaves_device_idle() {
    let (mut rig, device) = rig_with_device("1.0.0", &[SRV_BOOTLOADER]);
    let (blob, _) = uf2_blob("1.1.0", 2000);
    let mut link = link(&rig, device);
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = block_on(rig.engine.flash(&mut link, &blob, &[device], &cancel, |_| {})).unwrap_err();
    assert_eq!(err, FlashError::Cancelled);
    assert!(!rig.engine.bus().device(device).unwrap().flashing());
    assert!(rig.engine.bus().safe_boot());
}

#[test]
fn reflashing_same_image_uses_new_session() {
    let (mut rig, device) = rig_with_device("1.0.0", &[SRV_BOOTLOADER]);
    let (blob, image) = uf2_blob("1.0.1", 600);
    let mut link = link(&rig, device);

    let flash_once = |rig: &mut Rig, link: &mut HostLink<BootloaderServer>| {
        block_on(rig.engine.flash(link, &blob, &[device], &CancelToken::new(), |_| {})).unwrap()
    };
    let first = flash_once(&mut rig, &mut link);
    let second = flash_once(&mut rig, &mut link);

    assert_ne!(first.session, second.session);
    assert_eq!(link.host().image(), Some(image.as_slice()));
}
