//! Gesture adapter bound to a remote button, end to end through the engine.

use devbus::app::AppEvent;
use devbus::bus::ServiceKey;
use devbus::host::ButtonGestureAdapter;
use devbus::spec::classes::{
    BUTTON_EV_DOWN, BUTTON_EV_HOLD, BUTTON_EV_UP, GESTURE_EV_CLICK, GESTURE_EV_CLICK_HOLD,
    GESTURE_EV_DOUBLE_CLICK, GESTURE_EV_HOLD_RELEASE, GESTURE_EV_MULTI_CLICK, SRV_BUTTON,
    SRV_BUTTON_GESTURE,
};

use crate::sim::{Remote, Rig};

/// Engine with one gesture adapter on role "btn", a remote button bound
/// to it, and the event log cleared.
fn bound_rig() -> (Rig, Remote) {
    let mut rig = Rig::new();
    let registry = rig.registry();
    let gesture = ButtonGestureAdapter::from_config(&registry, "btn", rig.engine.config()).unwrap();
    rig.engine.add_adapter(gesture).unwrap();
    rig.at(0);

    let mut button = Remote::new(0xb077_0001, &[SRV_BUTTON]);
    let announce = button.announce();
    rig.feed_at(0, &announce);
    assert!(rig.events.iter().any(|e| matches!(
        e,
        AppEvent::Role(r) if r.role == "btn" && r.current == Some(ServiceKey::new(button.id, 1))
    )));
    rig.take_events();
    (rig, button)
}

fn press(rig: &mut Rig, button: &mut Remote, at: u64) {
    let frame = button.event(1, BUTTON_EV_DOWN, &[]);
    rig.feed_at(at, &frame);
}

fn release(rig: &mut Rig, button: &mut Remote, at: u64, held: u32) {
    let frame = button.event(1, BUTTON_EV_UP, &held.to_le_bytes());
    rig.feed_at(at, &frame);
}

fn gesture_codes(rig: &Rig) -> Vec<u8> {
    rig.service_events(SRV_BUTTON_GESTURE)
        .iter()
        .map(|e| e.code)
        .collect()
}

#[test]
fn short_press_is_a_click() {
    let (mut rig, mut button) = bound_rig();
    press(&mut rig, &mut button, 10);
    release(&mut rig, &mut button, 60, 50);
    assert_eq!(gesture_codes(&rig), vec![GESTURE_EV_CLICK]);

    let ev = &rig.service_events(SRV_BUTTON_GESTURE)[0];
    assert_eq!(ev.service, ServiceKey::new(rig.engine.self_id(), 1));
}

#[test]
fn long_press_holds_at_click_timeout() {
    let (mut rig, mut button) = bound_rig();
    press(&mut rig, &mut button, 10);
    rig.at(250);

    let held = rig.service_events(SRV_BUTTON_GESTURE);
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].code, GESTURE_EV_CLICK_HOLD);
    // Fired at its due time, not at the tick that noticed it.
    assert_eq!(held[0].timestamp_ms, 210);

    // The button's own hold event changes nothing.
    let hold = button.event(1, BUTTON_EV_HOLD, &500u32.to_le_bytes());
    rig.feed_at(510, &hold);
    release(&mut rig, &mut button, 600, 590);
    assert_eq!(
        gesture_codes(&rig),
        vec![GESTURE_EV_CLICK_HOLD, GESTURE_EV_HOLD_RELEASE]
    );
}

#[test]
fn clicks_within_timeout_accumulate() {
    let (mut rig, mut button) = bound_rig();
    press(&mut rig, &mut button, 10);
    release(&mut rig, &mut button, 50, 40);
    press(&mut rig, &mut button, 100);
    release(&mut rig, &mut button, 150, 50);
    press(&mut rig, &mut button, 200);
    release(&mut rig, &mut button, 240, 40);

    let events = rig.service_events(SRV_BUTTON_GESTURE);
    let codes: Vec<u8> = events.iter().map(|e| e.code).collect();
    assert_eq!(
        codes,
        vec![GESTURE_EV_CLICK, GESTURE_EV_DOUBLE_CLICK, GESTURE_EV_MULTI_CLICK]
    );
    assert_eq!(events[2].payload, vec![3]);

    // After the multi-click gap a new click starts over.
    rig.at(600);
    rig.take_events();
    press(&mut rig, &mut button, 700);
    release(&mut rig, &mut button, 740, 40);
    assert_eq!(gesture_codes(&rig), vec![GESTURE_EV_CLICK]);
}

#[test]
fn unbound_button_is_ignored() {
    let (mut rig, mut button) = bound_rig();
    let mut other = Remote::new(0xb077_0002, &[SRV_BUTTON]);
    let announce = other.announce();
    rig.feed_at(5, &announce);

    press(&mut rig, &mut other, 10);
    release(&mut rig, &mut other, 50, 40);
    assert!(gesture_codes(&rig).is_empty());

    press(&mut rig, &mut button, 60);
    release(&mut rig, &mut button, 100, 40);
    assert_eq!(gesture_codes(&rig), vec![GESTURE_EV_CLICK]);
}

#[test]
fn eviction_moves_role_to_next_button() {
    let (mut rig, mut first) = bound_rig();
    press(&mut rig, &mut first, 10);

    // The first button goes silent mid-press.  Its hold still fires at
    // the due time, which precedes the eviction.
    rig.at(2500);
    assert!(rig.events.iter().any(|e| matches!(
        e,
        AppEvent::Role(r) if r.role == "btn" && r.current.is_none()
    )));
    let before = gesture_codes(&rig);
    assert_eq!(before, vec![GESTURE_EV_CLICK_HOLD]);
    rig.take_events();

    let mut second = Remote::new(0xb077_0003, &[SRV_BUTTON]);
    let announce = second.announce();
    rig.feed_at(2600, &announce);
    assert!(rig.events.iter().any(|e| matches!(
        e,
        AppEvent::Role(r) if r.current == Some(ServiceKey::new(second.id, 1))
    )));

    press(&mut rig, &mut second, 2700);
    release(&mut rig, &mut second, 2750, 50);
    assert_eq!(gesture_codes(&rig), vec![GESTURE_EV_CLICK]);
}
