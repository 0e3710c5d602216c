//! Register table and packet handling shared by every virtual service.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, trace};

use crate::packet::codec::{event, get_register};
use crate::packet::{CommandKind, Packet};
use crate::spec::classes::REG_INSTANCE_NAME;
use crate::spec::marshal::Value;
use crate::spec::{ServiceSpec, SpecRegistry};

use super::{HostContext, HostError};

/// Event counters are 7 bits on the wire.
const EVENT_COUNTER_MASK: u8 = 0x7f;

pub struct ServiceServer {
    spec: Arc<ServiceSpec>,
    /// Packed register values.
    registers: BTreeMap<u16, Vec<u8>>,
    instance_name: Option<String>,
    event_counter: u8,
}

impl ServiceServer {
    pub fn new(spec: Arc<ServiceSpec>) -> Self {
        Self {
            spec,
            registers: BTreeMap::new(),
            instance_name: None,
            event_counter: 0,
        }
    }

    pub fn from_registry(registry: &SpecRegistry, service_class: u32) -> Result<Self, HostError> {
        registry
            .spec_for_class(service_class)
            .map(|spec| Self::new(Arc::clone(spec)))
            .ok_or(HostError::UnknownClass(service_class))
    }

    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn service_class(&self) -> u32 {
        self.spec.class_identifier
    }

    pub fn instance_name(&self) -> Option<&str> {
        self.instance_name.as_deref()
    }

    // ── Local register access ─────────────────────────────────

    /// Store a register value from the host side.  Any register kind may
    /// be written here; only clients are bound by `ro`/`const`.
    pub fn set_register(&mut self, reg: u16, values: &[Value]) -> Result<bool, HostError> {
        let info = self
            .spec
            .register(reg)
            .ok_or(HostError::UnknownRegister(reg))?;
        let bytes = info.pack(values)?;
        Ok(self.store(reg, bytes))
    }

    fn store(&mut self, reg: u16, bytes: Vec<u8>) -> bool {
        if self.registers.get(&reg) == Some(&bytes) {
            return false;
        }
        self.registers.insert(reg, bytes);
        true
    }

    pub fn register_values(&self, reg: u16) -> Result<Vec<Value>, HostError> {
        let info = self
            .spec
            .register(reg)
            .ok_or(HostError::UnknownRegister(reg))?;
        let bytes = self
            .registers
            .get(&reg)
            .ok_or(HostError::UnknownRegister(reg))?;
        Ok(info.unpack(bytes)?)
    }

    pub fn register_bytes(&self, reg: u16) -> Option<&[u8]> {
        self.registers.get(&reg).map(Vec::as_slice)
    }

    /// First field of a numeric register, if set.
    pub fn register_u64(&self, reg: u16) -> Option<u64> {
        self.register_values(reg).ok()?.first()?.as_u64()
    }

    // ── Client packets ────────────────────────────────────────

    /// Answer a register read or write.  Returns the register written, if
    /// any, so the owning host can react.
    pub fn handle_packet(
        &mut self,
        pkt: &Packet,
        ctx: &mut HostContext<'_>,
    ) -> Result<Option<u16>, HostError> {
        match pkt.kind() {
            CommandKind::GetRegister(reg) => {
                self.report_register(reg, ctx)?;
                Ok(None)
            }
            CommandKind::SetRegister(reg) => {
                if reg == REG_INSTANCE_NAME && self.spec.register(reg).is_none() {
                    let name = String::from_utf8_lossy(pkt.payload()).into_owned();
                    self.instance_name = Some(name).filter(|n| !n.is_empty());
                    return Ok(Some(reg));
                }
                let info = self
                    .spec
                    .register(reg)
                    .ok_or(HostError::UnknownRegister(reg))?;
                if !info.kind.is_writable() {
                    return Err(HostError::ReadOnly(reg));
                }
                // Round-trip through the field list so stored bytes are
                // canonical and range-checked.
                let values = info.unpack(pkt.payload())?;
                let bytes = info.pack(&values)?;
                let name = info.name.clone();
                if self.store(reg, bytes) {
                    debug!("{}: {} = {:?}", ctx.key(), name, values);
                }
                Ok(Some(reg))
            }
            _ => Err(HostError::UnknownCommand(pkt.service_command())),
        }
    }

    /// Send the current value of `reg` as a report.
    pub fn report_register(&self, reg: u16, ctx: &mut HostContext<'_>) -> Result<(), HostError> {
        let bytes: &[u8] = match self.registers.get(&reg) {
            Some(b) => b,
            None if reg == REG_INSTANCE_NAME => {
                self.instance_name.as_deref().unwrap_or_default().as_bytes()
            }
            None => return Err(HostError::UnknownRegister(reg)),
        };
        let pkt = Packet::from_device(ctx.device, ctx.service_index, get_register(reg), bytes)?;
        ctx.send(pkt);
        Ok(())
    }

    /// Pack and emit an event.
    pub fn send_event(
        &mut self,
        code: u8,
        values: &[Value],
        ctx: &mut HostContext<'_>,
    ) -> Result<(), HostError> {
        let info = self.spec.event(code).ok_or(HostError::UnknownEvent(code))?;
        let payload = info.pack(values)?;
        let command = event(code, self.event_counter);
        self.event_counter = (self.event_counter + 1) & EVENT_COUNTER_MASK;
        trace!("{}: event {}", ctx.key(), info.name);
        ctx.send(Packet::from_device(ctx.device, ctx.service_index, command, &payload)?);
        Ok(())
    }

    /// Pack and emit the report answering custom command `command`.
    pub fn send_report(
        &self,
        command: u16,
        values: &[Value],
        ctx: &mut HostContext<'_>,
    ) -> Result<(), HostError> {
        let info = self
            .spec
            .report(command)
            .ok_or(HostError::UnknownCommand(command))?;
        let payload = info.pack(values)?;
        ctx.send(Packet::from_device(ctx.device, ctx.service_index, command, &payload)?);
        Ok(())
    }
}
