//! Topology tracking, background polling and firmware scans via the engine.

use devbus::app::AppEvent;
use devbus::bus::{BusEvent, DeviceFilter, ServiceFilter, ServiceKey};
use devbus::flash::FirmwareBlob;
use devbus::packet::CommandKind;
use devbus::packet::codec::get_register;
use devbus::spec::classes::{
    CONTROL_REG_FIRMWARE_IDENTIFIER, CONTROL_REG_FIRMWARE_VERSION, SRV_BOOTLOADER, SRV_BUTTON,
    SRV_SENSOR, SRV_TEMPERATURE,
};
use devbus::Packet;

use crate::sim::{Remote, Rig};

const FW_ID: u32 = 0x3f10_0a01;

#[test]
fn repeated_announce_only_refreshes() {
    let mut rig = Rig::new();
    let mut dev = Remote::new(0xd001, &[SRV_BUTTON]);
    let first = dev.announce();
    rig.feed_at(0, &first);
    assert_eq!(
        rig.bus_events(),
        vec![&BusEvent::DeviceConnected(dev.id)]
    );

    rig.take_events();
    let again = dev.announce();
    rig.feed_at(400, &again);
    assert!(rig.bus_events().is_empty());
    assert_eq!(rig.engine.bus().device(dev.id).unwrap().last_seen_ms(), 400);
}

#[test]
fn changed_announce_reports_the_diff() {
    let mut rig = Rig::new();
    let mut dev = Remote::new(0xd002, &[SRV_BUTTON, SRV_TEMPERATURE]);
    let first = dev.announce();
    rig.feed_at(0, &first);
    rig.take_events();

    dev.classes = vec![SRV_BUTTON, SRV_BOOTLOADER];
    let changed = dev.announce();
    rig.feed_at(100, &changed);
    assert_eq!(
        rig.bus_events(),
        vec![
            &BusEvent::ServiceRemoved {
                service: ServiceKey::new(dev.id, 2),
                service_class: SRV_TEMPERATURE,
            },
            &BusEvent::ServiceAdded {
                service: ServiceKey::new(dev.id, 2),
                service_class: SRV_BOOTLOADER,
            },
            &BusEvent::DeviceChanged(dev.id),
        ]
    );
}

#[test]
fn restart_counter_drop_is_a_restart() {
    let mut rig = Rig::new();
    let mut dev = Remote::new(0xd003, &[SRV_BUTTON]);
    dev.restart_counter = 5;
    let first = dev.announce();
    rig.feed_at(0, &first);
    rig.take_events();

    dev.restart_counter = 0;
    let again = dev.announce();
    rig.feed_at(100, &again);
    assert!(rig.bus_events().contains(&&BusEvent::DeviceRestarted(dev.id)));
}

#[test]
fn queries_filter_by_class_and_self() {
    let mut rig = Rig::new();
    rig.at(0);
    let mut a = Remote::new(0xd004, &[SRV_BUTTON, SRV_TEMPERATURE]);
    let mut b = Remote::new(0xd005, &[SRV_TEMPERATURE]);
    let (fa, fb) = (a.announce(), b.announce());
    rig.feed_at(1, &fa);
    rig.feed_at(2, &fb);

    // Temperature extends the sensor class.
    let sensors = rig.engine.services(&ServiceFilter::class(SRV_SENSOR));
    let keys: Vec<ServiceKey> = sensors.iter().map(|s| s.key()).collect();
    assert!(keys.contains(&ServiceKey::new(a.id, 2)));
    assert!(keys.contains(&ServiceKey::new(b.id, 1)));

    let buttons = rig.engine.devices(&DeviceFilter {
        service_class: Some(SRV_BUTTON),
        ..DeviceFilter::default()
    });
    assert_eq!(buttons.len(), 1);
    assert_eq!(buttons[0].id(), a.id);

    let all = rig.engine.devices(&DeviceFilter::default());
    let others = rig.engine.devices(&DeviceFilter {
        ignore_self: true,
        ..DeviceFilter::default()
    });
    assert_eq!(all.len(), 3);
    assert_eq!(others.len(), 2);
}

#[test]
fn devices_without_firmware_info_are_polled() {
    let mut rig = Rig::new();
    let mut dev = Remote::new(0xd006, &[SRV_BUTTON]);
    let announce = dev.announce();
    rig.feed_at(0, &announce);
    rig.engine.transport_mut().take();

    rig.at(10);
    let polls: Vec<CommandKind> = rig
        .engine
        .transport_mut()
        .take()
        .iter()
        .map(|f| Packet::decode(f).unwrap())
        .filter(|p| p.is_command() && p.device_id() == dev.id)
        .map(|p| p.kind())
        .collect();
    assert_eq!(
        polls,
        vec![
            CommandKind::GetRegister(CONTROL_REG_FIRMWARE_IDENTIFIER),
            CommandKind::GetRegister(CONTROL_REG_FIRMWARE_VERSION),
        ]
    );

    // Answered: no more polls, and the device changed.
    let info = dev.firmware_info(FW_ID, "1.0.0");
    rig.feed_at(20, &info);
    assert!(rig.bus_events().contains(&&BusEvent::DeviceChanged(dev.id)));
    rig.engine.transport_mut().take();
    rig.at(1500);
    let late_polls = rig
        .engine
        .transport_mut()
        .take()
        .iter()
        .map(|f| Packet::decode(f).unwrap())
        .filter(|p| {
            p.is_command()
                && p.service_command() == get_register(CONTROL_REG_FIRMWARE_IDENTIFIER)
        })
        .count();
    assert_eq!(late_polls, 0);
}

#[test]
fn firmware_scan_reports_newer_blob() {
    let mut rig = Rig::new();
    let mut old = Remote::new(0xd007, &[SRV_BOOTLOADER]);
    let mut current = Remote::new(0xd008, &[SRV_BOOTLOADER]);
    for dev in [&mut old, &mut current] {
        let announce = dev.announce();
        rig.feed_at(0, &announce);
    }
    let (a, b) = (old.firmware_info(FW_ID, "1.0.0"), current.firmware_info(FW_ID, "1.2.0"));
    rig.feed_at(1, &a);
    rig.feed_at(1, &b);

    rig.engine.set_firmware_catalogue(vec![
        FirmwareBlob {
            firmware_identifier: FW_ID,
            name: "sensor-node".into(),
            version: "1.1.0".into(),
            image: vec![0; 64],
        },
        FirmwareBlob {
            firmware_identifier: FW_ID,
            name: "sensor-node".into(),
            version: "1.2.0".into(),
            image: vec![1; 64],
        },
    ]);
    assert!(rig.engine.scan_firmware());
    assert!(!rig.engine.scan_firmware());
    rig.take_events();
    rig.at(2);

    let found = rig
        .events
        .iter()
        .find_map(|e| match e {
            AppEvent::UpdatesAvailable(found) => Some(found.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].device, old.id);
    assert_eq!(found[0].blob_index, 1);
    assert_eq!(found[0].available_version, "1.2.0");
}

#[test]
fn friendly_names_fire_on_change_only() {
    let mut rig = Rig::new();
    let mut dev = Remote::new(0xd009, &[SRV_BUTTON]);
    let announce = dev.announce();
    rig.feed_at(0, &announce);
    rig.take_events();

    let mut sink = Vec::new();
    rig.engine
        .set_device_name(dev.id, Some("  desk  ".into()), &mut sink);
    rig.engine
        .set_device_name(dev.id, Some("desk".into()), &mut sink);
    assert_eq!(
        sink,
        vec![AppEvent::Bus(BusEvent::DeviceNameChanged {
            device: dev.id,
            name: Some("desk".into()),
        })]
    );
    assert!(rig.engine.bus().device_by_name("DESK").is_some());
}

fn catalogue(version: &str) -> Vec<FirmwareBlob> {
    vec![FirmwareBlob {
        firmware_identifier: FW_ID,
        name: "sensor-node".into(),
        version: version.into(),
        image: vec![0; 64],
    }]
}

fn updates_reported(rig: &Rig) -> Vec<Vec<devbus::flash::UpdateCandidate>> {
    rig.events
        .iter()
        .filter_map(|e| match e {
            AppEvent::UpdatesAvailable(found) => Some(found.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn announce_starts_scan_once() {
    let mut rig = Rig::new();
    rig.engine.set_firmware_catalogue(catalogue("9.0.0"));
    let mut dev = Remote::new(0xd00a, &[SRV_BOOTLOADER]);

    let announce = dev.announce();
    rig.feed_at(0, &announce);
    assert_eq!(rig.engine.firmware_scan_started_ms(), Some(0));

    // Repeated announces while the scan waits for firmware info.
    for at in [100, 200] {
        let again = dev.announce();
        rig.feed_at(at, &again);
        assert_eq!(rig.engine.firmware_scan_started_ms(), Some(0));
    }

    let info = dev.firmware_info(FW_ID, "1.0.0");
    rig.feed_at(250, &info);
    rig.at(300);

    let reported = updates_reported(&rig);
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].len(), 1);
    assert_eq!(reported[0][0].device, dev.id);
    assert_eq!(reported[0][0].available_version, "9.0.0");
    assert_eq!(rig.engine.firmware_scan_started_ms(), None);
}

#[test]
fn announce_without_catalogue_starts_nothing() {
    let mut rig = Rig::new();
    let mut dev = Remote::new(0xd00b, &[SRV_BOOTLOADER]);
    let announce = dev.announce();
    rig.feed_at(0, &announce);
    assert_eq!(rig.engine.firmware_scan_started_ms(), None);
}

#[test]
fn announce_while_flashing_starts_no_scan() {
    let mut rig = Rig::new();
    let mut busy = Remote::new(0xd00c, &[SRV_BOOTLOADER]);
    let announce = busy.announce();
    rig.feed_at(0, &announce);
    rig.engine.set_firmware_catalogue(catalogue("9.0.0"));
    rig.engine.bus_mut().set_flashing(busy.id, true);

    let mut other = Remote::new(0xd00d, &[SRV_BUTTON]);
    let first = other.announce();
    rig.feed_at(10, &first);
    assert_eq!(rig.engine.firmware_scan_started_ms(), None);

    rig.engine.bus_mut().set_flashing(busy.id, false);
    let again = other.announce();
    rig.feed_at(20, &again);
    assert_eq!(rig.engine.firmware_scan_started_ms(), Some(20));
}
