//! Button gesture recognition over a bound button service.
//!
//! ```text
//!            down                         hold timer (seq unchanged)
//!   ┌────┐ ───────▶ ┌────────────┐ ──────────────────────────▶ ┌───────────┐
//!   │ Up │          │ DownClick  │   ClickHold / MultiClickHold │ DownHeld  │
//!   └────┘ ◀─┐      └────────────┘                              └───────────┘
//!     ▲      │ reset     │ up: Click / DoubleClick / MultiClick      │ up:
//!     │      │ timer     ▼                                           │ HoldRelease
//!     │      └──── ┌──────────┐ ──── down ──▶ DownClick              │
//!     │            │ UpClick  │                                      │
//!     │            └──────────┘                                      │
//!     └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Timers are never cancelled.  Each carries the event counter current
//! when it was armed and does nothing if a later source event moved it on.

use core::any::Any;

use log::{debug, trace};

use crate::bus::timers::TimerTag;
use crate::bus::{ServiceEvent, ServiceKey};
use crate::config::BusConfig;
use crate::spec::SpecRegistry;
use crate::spec::classes::{
    BUTTON_EV_DOWN, BUTTON_EV_UP, GESTURE_EV_CLICK, GESTURE_EV_CLICK_HOLD,
    GESTURE_EV_DOUBLE_CLICK, GESTURE_EV_HOLD_RELEASE, GESTURE_EV_MULTI_CLICK,
    GESTURE_EV_MULTI_CLICK_HOLD, GESTURE_REG_CLICK_TIMEOUT, GESTURE_REG_MULTI_CLICK_TIMEOUT,
    SRV_BUTTON, SRV_BUTTON_GESTURE,
};
use crate::spec::marshal::Value;

use super::{AdapterServer, HostContext, HostError, ServiceHost, ServiceServer};

const TIMER_HOLD: u8 = 1;
const TIMER_RESET: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureState {
    Up,
    DownClick,
    UpClick,
    DownHeld,
}

pub struct ButtonGestureAdapter {
    server: ServiceServer,
    adapter: AdapterServer,
    state: GestureState,
    /// Staleness token for armed timers.
    event_counter: u32,
    click_counter: u8,
}

impl ButtonGestureAdapter {
    pub fn new(
        registry: &SpecRegistry,
        role: &str,
        click_timeout_ms: u64,
        multi_click_timeout_ms: u64,
    ) -> Result<Self, HostError> {
        let mut server = ServiceServer::from_registry(registry, SRV_BUTTON_GESTURE)?;
        server.set_register(
            GESTURE_REG_CLICK_TIMEOUT,
            &[Value::UInt(click_timeout_ms)],
        )?;
        server.set_register(
            GESTURE_REG_MULTI_CLICK_TIMEOUT,
            &[Value::UInt(multi_click_timeout_ms)],
        )?;
        Ok(Self {
            server,
            adapter: AdapterServer::new(role, SRV_BUTTON),
            state: GestureState::Up,
            event_counter: 0,
            click_counter: 0,
        })
    }

    pub fn from_config(
        registry: &SpecRegistry,
        role: &str,
        config: &BusConfig,
    ) -> Result<Self, HostError> {
        Self::new(
            registry,
            role,
            config.click_timeout_ms,
            config.multi_click_timeout_ms,
        )
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn click_count(&self) -> u8 {
        self.click_counter
    }

    fn timeout(&self, reg: u16) -> u64 {
        self.server.register_u64(reg).unwrap_or(0)
    }

    fn arm(&self, kind: u8, delay_ms: u64, ctx: &mut HostContext<'_>) {
        ctx.schedule(
            delay_ms,
            TimerTag {
                kind,
                seq: self.event_counter,
            },
        );
    }

    fn emit(&mut self, code: u8, values: &[Value], ctx: &mut HostContext<'_>) {
        if let Err(e) = self.server.send_event(code, values, ctx) {
            debug!("gesture: event {code} not sent: {e}");
        }
    }

    fn reset(&mut self) {
        self.state = GestureState::Up;
        self.click_counter = 0;
        // Invalidate anything still armed.
        self.event_counter = self.event_counter.wrapping_add(1);
    }

    fn on_down(&mut self, ctx: &mut HostContext<'_>) {
        self.event_counter = self.event_counter.wrapping_add(1);
        self.state = GestureState::DownClick;
        self.arm(TIMER_HOLD, self.timeout(GESTURE_REG_CLICK_TIMEOUT), ctx);
    }

    fn on_up(&mut self, ctx: &mut HostContext<'_>) {
        match self.state {
            GestureState::DownClick => {
                self.event_counter = self.event_counter.wrapping_add(1);
                self.click_counter = self.click_counter.saturating_add(1);
                self.state = GestureState::UpClick;
                match self.click_counter {
                    1 => self.emit(GESTURE_EV_CLICK, &[], ctx),
                    2 => self.emit(GESTURE_EV_DOUBLE_CLICK, &[], ctx),
                    n => self.emit(GESTURE_EV_MULTI_CLICK, &[Value::UInt(n.into())], ctx),
                }
                self.arm(
                    TIMER_RESET,
                    self.timeout(GESTURE_REG_MULTI_CLICK_TIMEOUT),
                    ctx,
                );
            }
            GestureState::DownHeld => {
                self.emit(GESTURE_EV_HOLD_RELEASE, &[], ctx);
                self.state = GestureState::Up;
                self.click_counter = 0;
            }
            GestureState::Up | GestureState::UpClick => {
                trace!("gesture: stray up in {:?}", self.state);
            }
        }
    }
}

impl ServiceHost for ButtonGestureAdapter {
    fn server(&self) -> &ServiceServer {
        &self.server
    }

    fn server_mut(&mut self) -> &mut ServiceServer {
        &mut self.server
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn adapter(&self) -> Option<&AdapterServer> {
        Some(&self.adapter)
    }

    fn adapter_mut(&mut self) -> Option<&mut AdapterServer> {
        Some(&mut self.adapter)
    }

    fn on_timer(&mut self, tag: TimerTag, ctx: &mut HostContext<'_>) {
        if tag.seq != self.event_counter {
            trace!("gesture: stale timer {}/{}", tag.kind, tag.seq);
            return;
        }
        match (tag.kind, self.state) {
            (TIMER_HOLD, GestureState::DownClick) => {
                if self.click_counter == 0 {
                    self.emit(GESTURE_EV_CLICK_HOLD, &[], ctx);
                } else {
                    let n = Value::UInt(self.click_counter.into());
                    self.emit(GESTURE_EV_MULTI_CLICK_HOLD, &[n], ctx);
                }
                self.state = GestureState::DownHeld;
            }
            (TIMER_RESET, _) => {
                self.state = GestureState::Up;
                self.click_counter = 0;
            }
            _ => {}
        }
    }

    fn on_source_bound(&mut self, source: Option<ServiceKey>, _ctx: &mut HostContext<'_>) {
        if self.adapter.set_source(source) {
            self.reset();
        }
    }

    fn on_source_event(&mut self, event: &ServiceEvent, ctx: &mut HostContext<'_>) {
        if !self.adapter.is_ready() || !self.adapter.accepts(event) {
            return;
        }
        match event.code {
            BUTTON_EV_DOWN => self.on_down(ctx),
            BUTTON_EV_UP => self.on_up(ctx),
            // The source's own hold event is superseded by ours.
            _ => {}
        }
    }
}
