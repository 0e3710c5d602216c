//! Fuzz target: announce payloads applied to the topology model
//!
//! Arbitrary payloads are parsed as announces from two devices in turn.
//! The model must never panic and every device must keep control at
//! service index 0.
//!
//! cargo fuzz run fuzz_announce

#![no_main]

use devbus::bus::{Announcement, Bus};
use devbus::spec::classes::SRV_CONTROL;
use devbus::{DeviceId, SpecRegistry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(registry) = SpecRegistry::builtin() else {
        return;
    };
    let mut bus = Bus::new(DeviceId(1), 2000, registry);

    for (i, chunk) in data.chunks(64).enumerate() {
        let Some(announcement) = Announcement::parse(chunk) else {
            continue;
        };
        let id = DeviceId(2 + (i as u64 % 2));
        bus.apply_announce(id, &announcement, i as u64);
        let dev = bus.device(id).expect("announced device is tracked");
        assert_eq!(dev.services()[0].service_class(), SRV_CONTROL);
    }
});
