//! Simulated push button.

use core::any::Any;

use log::trace;

use crate::bus::timers::TimerTag;
use crate::spec::SpecRegistry;
use crate::spec::classes::{
    BUTTON_EV_DOWN, BUTTON_EV_HOLD, BUTTON_EV_UP, BUTTON_REG_PRESSURE, SRV_BUTTON,
};
use crate::spec::marshal::Value;

use super::{HostContext, HostError, ServiceHost, ServiceServer};

/// Period of repeated `hold` events while pressed.
pub const HOLD_PERIOD_MS: u64 = 500;

const TIMER_HOLD: u8 = 1;

/// Largest pressure a u0.16 register can carry.
const FULL_PRESSURE: f64 = 1.0 - 1.0 / 65536.0;

pub struct ButtonServer {
    server: ServiceServer,
    pressed_at: Option<u64>,
    press_seq: u32,
}

impl ButtonServer {
    pub fn new(registry: &SpecRegistry) -> Result<Self, HostError> {
        let mut server = ServiceServer::from_registry(registry, SRV_BUTTON)?;
        server.set_register(BUTTON_REG_PRESSURE, &[Value::Real(0.0)])?;
        Ok(Self {
            server,
            pressed_at: None,
            press_seq: 0,
        })
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed_at.is_some()
    }

    /// Press the button.  No-op if already down.
    pub fn press(&mut self, ctx: &mut HostContext<'_>) -> Result<(), HostError> {
        if self.pressed_at.is_some() {
            return Ok(());
        }
        self.pressed_at = Some(ctx.now_ms);
        self.press_seq = self.press_seq.wrapping_add(1);
        self.server
            .set_register(BUTTON_REG_PRESSURE, &[Value::Real(FULL_PRESSURE)])?;
        self.server.send_event(BUTTON_EV_DOWN, &[], ctx)?;
        ctx.schedule(
            HOLD_PERIOD_MS,
            TimerTag {
                kind: TIMER_HOLD,
                seq: self.press_seq,
            },
        );
        Ok(())
    }

    /// Release the button, reporting how long it was held.
    pub fn release(&mut self, ctx: &mut HostContext<'_>) -> Result<(), HostError> {
        let Some(at) = self.pressed_at.take() else {
            return Ok(());
        };
        self.press_seq = self.press_seq.wrapping_add(1);
        self.server
            .set_register(BUTTON_REG_PRESSURE, &[Value::Real(0.0)])?;
        let held = ctx.now_ms.saturating_sub(at);
        self.server
            .send_event(BUTTON_EV_UP, &[Value::UInt(held)], ctx)
    }
}

impl ServiceHost for ButtonServer {
    fn server(&self) -> &ServiceServer {
        &self.server
    }

    fn server_mut(&mut self) -> &mut ServiceServer {
        &mut self.server
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn on_timer(&mut self, tag: TimerTag, ctx: &mut HostContext<'_>) {
        let Some(at) = self.pressed_at else { return };
        if tag.kind != TIMER_HOLD || tag.seq != self.press_seq {
            return;
        }
        let held = ctx.now_ms.saturating_sub(at);
        if let Err(e) = self
            .server
            .send_event(BUTTON_EV_HOLD, &[Value::UInt(held)], ctx)
        {
            trace!("button: hold not sent: {e}");
        }
        ctx.schedule(HOLD_PERIOD_MS, tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TestBench;
    use crate::packet::CommandKind;

    fn codes(bench: &mut TestBench) -> Vec<(u64, u8, Vec<u8>)> {
        bench
            .take()
            .into_iter()
            .filter_map(|p| match p.kind() {
                CommandKind::Event { code, .. } => {
                    Some((p.timestamp_ms(), code, p.payload().to_vec()))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn press_and_release() {
        let mut bench = TestBench::new();
        let mut button = ButtonServer::new(&bench.registry).unwrap();
        button.press(&mut bench.ctx()).unwrap();
        assert!(button.is_pressed());
        assert_eq!(
            button.server().register_bytes(BUTTON_REG_PRESSURE),
            Some(&[0xff, 0xff][..])
        );

        bench.run_timers(&mut button, 120);
        button.release(&mut bench.ctx()).unwrap();
        assert_eq!(
            codes(&mut bench),
            vec![
                (0, BUTTON_EV_DOWN, vec![]),
                (120, BUTTON_EV_UP, 120u32.to_le_bytes().to_vec()),
            ]
        );
        assert_eq!(
            button.server().register_bytes(BUTTON_REG_PRESSURE),
            Some(&[0, 0][..])
        );
    }

    #[test]
    fn hold_repeats_until_release() {
        let mut bench = TestBench::new();
        let mut button = ButtonServer::new(&bench.registry).unwrap();
        button.press(&mut bench.ctx()).unwrap();
        bench.run_timers(&mut button, 1200);
        button.release(&mut bench.ctx()).unwrap();
        bench.run_timers(&mut button, 3000);

        let got: Vec<(u64, u8)> = codes(&mut bench)
            .into_iter()
            .map(|(t, c, _)| (t, c))
            .collect();
        assert_eq!(
            got,
            vec![
                (0, BUTTON_EV_DOWN),
                (500, BUTTON_EV_HOLD),
                (1000, BUTTON_EV_HOLD),
                (1200, BUTTON_EV_UP),
            ]
        );
    }

    #[test]
    fn double_press_is_ignored() {
        let mut bench = TestBench::new();
        let mut button = ButtonServer::new(&bench.registry).unwrap();
        button.press(&mut bench.ctx()).unwrap();
        button.press(&mut bench.ctx()).unwrap();
        button.release(&mut bench.ctx()).unwrap();
        button.release(&mut bench.ctx()).unwrap();
        assert_eq!(codes(&mut bench).len(), 2);
    }
}
