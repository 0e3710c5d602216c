//! Bus engine: the hexagonal core.
//!
//! [`BusEngine`] owns the topology model, the role manager, the local
//! virtual device and its service hosts.  Every state change happens on
//! the caller's thread inside [`BusEngine::receive`], [`BusEngine::tick`]
//! or one of the command helpers; notifications leave through the
//! [`EventSink`] passed to each call.
//!
//! ```text
//!  Transport bytes ──▶ ┌──────────────────────────┐ ──▶ EventSink
//!                      │        BusEngine          │
//!  Transport::send ◀── │ Bus · Roles · Hosts · Ack │ ──▶ StoragePort
//!                      └──────────────────────────┘
//!                               ▲       │
//!                               └───────┘ own reports loop back
//! ```
//!
//! Packets sent by the local device are transmitted and then fed back
//! into the topology model, so local services appear on the bus exactly
//! like remote ones.  Commands addressed to the local device never touch
//! the transport.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::bus::clock::Clock;
use crate::bus::timers::{HostId, TimerQueue};
use crate::bus::{
    Announcement, Bus, BusEvent, Device, DeviceFilter, Service, ServiceEvent, ServiceFilter,
    ServiceKey,
};
use crate::config::BusConfig;
use crate::error::{Error, HostError, RoleError};
use crate::flash::{
    CancelToken, FirmwareBlob, FirmwareScanner, FlashError, FlashLink, FlashOptions, FlashReport,
    flash_firmware_blob,
};
use crate::host::{HostContext, ServiceHost, ServiceServer};
use crate::packet::codec::{
    CMD_ANNOUNCE, CONTROL_SERVICE_INDEX, MAX_PAYLOAD_SIZE, get_register, set_register,
};
use crate::packet::decoder::FrameDecoder;
use crate::packet::transport::Transport;
use crate::packet::{CommandKind, DeviceId, Packet};
use crate::roles::{Binding, RoleManager};
use crate::spec::classes::{
    CONTROL_CMD_IDENTIFY, CONTROL_CMD_RESET, CONTROL_REG_FIRMWARE_IDENTIFIER,
    CONTROL_REG_FIRMWARE_VERSION, CONTROL_REG_UPTIME, SRV_CONTROL,
};
use crate::spec::marshal::Value;
use crate::spec::{ServiceSpec, SpecRegistry};

use super::events::AppEvent;
use super::ports::{EventSink, StoragePort};

/// Firmware identifier reported by the local virtual device.
pub const FIRMWARE_IDENTIFIER: u32 = 0x3d5e_b0c1;

/// Host id used for the control service's context.
const CONTROL_HOST: HostId = HostId::MAX;

/// Announce payload: a 4-byte header plus one class per host.
const MAX_HOSTS: usize = (MAX_PAYLOAD_SIZE - 4) / 4;

const RESTART_COUNTER_MAX: u8 = 0x0f;

const STORAGE_NAMESPACE: &str = "devbus";
const ROLES_KEY: &str = "roles";

/// A command sent with the ack flag, waiting for its ack.
struct PendingAck {
    device: DeviceId,
    crc: u16,
    packet: Packet,
    deadline_ms: u64,
    retries_left: u8,
}

// ───────────────────────────────────────────────────────────────
// BusEngine
// ───────────────────────────────────────────────────────────────

pub struct BusEngine<T: Transport> {
    config: BusConfig,
    clock: Box<dyn Clock>,
    transport: T,
    bus: Bus,
    roles: RoleManager,
    /// Service 0 of the local device.
    control: ServiceServer,
    /// Host `i` is announced at service index `i + 1`.
    hosts: Vec<Box<dyn ServiceHost>>,
    timers: TimerQueue,
    outbox: Vec<Packet>,
    decoder: FrameDecoder,
    pending_acks: Vec<PendingAck>,
    firmware: Vec<FirmwareBlob>,
    scanner: FirmwareScanner,
    flash_attempts: u32,
    restart_counter: u8,
    next_announce_ms: u64,
    announce_due: bool,
    rebind_pending: bool,
    started: bool,
    created_ms: u64,
    seq: u8,
}

impl<T: Transport> BusEngine<T> {
    /// Build an engine.  Nothing is sent until the first [`tick`](Self::tick).
    pub fn new(
        config: BusConfig,
        registry: SpecRegistry,
        transport: T,
        clock: impl Clock + 'static,
    ) -> Result<Self, Error> {
        config.validate()?;

        let mut control = ServiceServer::from_registry(&registry, SRV_CONTROL)?;
        control.set_register(
            CONTROL_REG_FIRMWARE_IDENTIFIER,
            &[Value::UInt(FIRMWARE_IDENTIFIER.into())],
        )?;
        control.set_register(
            CONTROL_REG_FIRMWARE_VERSION,
            &[Value::Text(env!("CARGO_PKG_VERSION").to_owned())],
        )?;

        let created_ms = clock.now_ms();
        let bus = Bus::from_config(&config, registry);
        info!("engine: self device {}", bus.self_id());

        Ok(Self {
            scanner: FirmwareScanner::new(config.scan_timeout_ms),
            flash_attempts: 0,
            config,
            clock: Box::new(clock),
            transport,
            bus,
            roles: RoleManager::new(),
            control,
            hosts: Vec::new(),
            timers: TimerQueue::new(),
            outbox: Vec::new(),
            decoder: FrameDecoder::new(),
            pending_acks: Vec::new(),
            firmware: Vec::new(),
            restart_counter: 0,
            next_announce_ms: created_ms,
            announce_due: true,
            rebind_pending: false,
            started: false,
            created_ms,
            seq: 0,
        })
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn self_id(&self) -> DeviceId {
        self.bus.self_id()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn registry(&self) -> &SpecRegistry {
        self.bus.registry()
    }

    pub fn roles(&self) -> &RoleManager {
        &self.roles
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn devices(&self, filter: &DeviceFilter) -> Vec<&Device> {
        self.bus.devices(filter)
    }

    pub fn services(&self, filter: &ServiceFilter) -> Vec<&Service> {
        self.bus.services(filter)
    }

    /// Earliest time at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline_ms(&self) -> u64 {
        let mut due = self.next_announce_ms;
        if let Some(t) = self.timers.next_due() {
            due = due.min(t);
        }
        for p in &self.pending_acks {
            due = due.min(p.deadline_ms);
        }
        due
    }

    // ── Hosts ─────────────────────────────────────────────────

    /// Host a service on the local device.  It is announced at the next
    /// tick.
    pub fn add_host(&mut self, host: impl ServiceHost + 'static) -> Result<HostId, HostError> {
        if self.hosts.len() >= MAX_HOSTS {
            return Err(HostError::TooManyHosts);
        }
        let id = self.hosts.len();
        info!(
            "engine: host #{id} {} at index {}",
            self.bus.registry().class_name(host.service_class()),
            id + 1
        );
        self.hosts.push(Box::new(host));
        self.announce_due = true;
        Ok(id)
    }

    /// Host an adapter and declare the role it consumes.  A role of the
    /// same name and class may already exist; the adapter then shares it.
    pub fn add_adapter(&mut self, mut host: impl ServiceHost + 'static) -> Result<HostId, Error> {
        let adapter = host.adapter_mut().ok_or(HostError::NotAnAdapter)?;
        adapter.attach()?;
        let role = adapter.role().to_owned();
        let class = adapter.source_class();

        match self.roles.add_role(&role, class) {
            Ok(()) => {}
            Err(RoleError::DuplicateRole(_))
                if self
                    .roles
                    .role(&role)
                    .is_some_and(|r| r.service_class() == class) => {}
            Err(e) => return Err(e.into()),
        }

        let id = self.add_host(host)?;
        self.rebind_pending = true;
        Ok(id)
    }

    /// Run `f` against host `id` downcast to `H`, then send whatever it
    /// produced.
    pub fn with_host<H: ServiceHost + 'static, R>(
        &mut self,
        id: HostId,
        sink: &mut impl EventSink,
        f: impl FnOnce(&mut H, &mut HostContext<'_>) -> R,
    ) -> Result<R, HostError> {
        let now = self.clock.now_ms();
        self.run_timers(now, sink);
        let result = self
            .call_host(id, now, |host, ctx| {
                host.as_any_mut().downcast_mut::<H>().map(|h| f(h, ctx))
            })
            .flatten()
            .ok_or(HostError::NoSuchHost(id));
        self.flush(now, sink);
        result
    }

    fn call_host<R>(
        &mut self,
        id: HostId,
        now_ms: u64,
        f: impl FnOnce(&mut Box<dyn ServiceHost>, &mut HostContext<'_>) -> R,
    ) -> Option<R> {
        let host = self.hosts.get_mut(id)?;
        let mut ctx = HostContext::new(
            self.bus.self_id(),
            (id + 1) as u8,
            id,
            now_ms,
            self.bus.registry(),
            &mut self.outbox,
            &mut self.timers,
        );
        Some(f(host, &mut ctx))
    }

    // ── Roles ─────────────────────────────────────────────────

    pub fn add_role(&mut self, name: &str, service_class: u32) -> Result<(), RoleError> {
        self.roles.add_role(name, service_class)?;
        self.rebind_pending = true;
        Ok(())
    }

    pub fn set_role_preference(&mut self, name: &str, service: ServiceKey) -> Result<(), RoleError> {
        self.roles.set_preference(name, service)?;
        self.rebind_pending = true;
        Ok(())
    }

    pub fn save_roles(&self, storage: &mut impl StoragePort) -> Result<(), Error> {
        let bytes = self.roles.snapshot()?;
        storage.write(STORAGE_NAMESPACE, ROLES_KEY, &bytes)?;
        debug!("engine: saved {} role bytes", bytes.len());
        Ok(())
    }

    /// Restore role preferences.  Returns `false` when nothing was stored.
    pub fn load_roles(&mut self, storage: &impl StoragePort) -> Result<bool, Error> {
        let Some(bytes) = storage.read(STORAGE_NAMESPACE, ROLES_KEY)? else {
            return Ok(false);
        };
        self.roles.restore(&bytes)?;
        self.rebind_pending = true;
        Ok(true)
    }

    fn rebind(&mut self, now: u64, sink: &mut impl EventSink) {
        self.rebind_pending = false;
        for ev in self.roles.rebind(&self.bus) {
            sink.emit(&AppEvent::Role(ev));
        }

        // Adapters follow their role, including ones added after it bound.
        for id in 0..self.hosts.len() {
            let Some(adapter) = self.hosts[id].adapter() else {
                continue;
            };
            let wanted = match self.roles.bind(adapter.role()) {
                Binding::Bound(key) => Some(key),
                Binding::Unresolved => None,
            };
            if adapter.source() != wanted {
                self.call_host(id, now, |h, ctx| h.on_source_bound(wanted, ctx));
            }
        }
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Feed bytes from the transport.  Frames may span calls.
    pub fn receive(&mut self, bytes: &[u8], sink: &mut impl EventSink) {
        let now = self.clock.now_ms();
        self.run_timers(now, sink);

        let mut frames = Vec::new();
        self.decoder.feed(bytes, |f| frames.push(f.to_vec()));
        for frame in frames {
            match Packet::decode(&frame) {
                Ok(pkt) => self.ingest(pkt.with_timestamp(now), now, sink),
                Err(e) => {
                    debug!("engine: frame dropped: {e}");
                    sink.emit(&AppEvent::FrameDropped(e));
                }
            }
            self.flush(now, sink);
        }
    }

    fn ingest(&mut self, pkt: Packet, now: u64, sink: &mut impl EventSink) {
        if pkt.is_command() {
            if pkt.device_id() == self.bus.self_id() {
                self.route_local(pkt, now, sink);
            }
            return;
        }

        if let CommandKind::Ack(crc) = pkt.kind() {
            let device = pkt.device_id();
            if let Some(pos) = self
                .pending_acks
                .iter()
                .position(|p| p.device == device && p.crc == crc)
            {
                self.pending_acks.remove(pos);
                sink.emit(&AppEvent::Bus(BusEvent::Acked { device, crc }));
            }
        }

        let events = self.bus.process_packet(&pkt, now);
        self.dispatch(events, now, sink);

        // A device showing up may need an update; an in-flight scan keeps
        // its start time.
        if pkt.is_announce() && pkt.device_id() != self.bus.self_id() && !self.firmware.is_empty()
        {
            self.begin_scan(now);
        }
    }

    fn dispatch(&mut self, events: Vec<BusEvent>, now: u64, sink: &mut impl EventSink) {
        let topology = events.iter().any(BusEvent::is_topology_change);
        for ev in events {
            if let BusEvent::Event(se) = &ev {
                self.deliver_source_event(se, now);
            }
            sink.emit(&AppEvent::Bus(ev));
        }
        if topology {
            self.rebind(now, sink);
        }
    }

    fn deliver_source_event(&mut self, event: &ServiceEvent, now: u64) {
        for id in 0..self.hosts.len() {
            if self.hosts[id].adapter().is_some_and(|a| a.accepts(event)) {
                self.call_host(id, now, |h, ctx| h.on_source_event(event, ctx));
            }
        }
    }

    /// A command for the local device.
    fn route_local(&mut self, pkt: Packet, now: u64, sink: &mut impl EventSink) {
        let index = pkt.service_index();
        let (host, result) = if index == CONTROL_SERVICE_INDEX {
            (CONTROL_HOST, self.handle_control(&pkt, now))
        } else {
            let id = HostId::from(index - 1);
            let result = self
                .call_host(id, now, |h, ctx| h.handle_command(&pkt, ctx))
                .unwrap_or(Err(HostError::NoSuchHost(id)));
            (id, result)
        };
        if let Err(error) = result {
            warn!("engine: service {index} rejected {:#06x}: {error}", pkt.service_command());
            sink.emit(&AppEvent::HostFailed { host, error });
        }
        if pkt.requires_ack() {
            let ack = Packet::ack(self.bus.self_id(), pkt.crc());
            self.outbox.push(ack.with_timestamp(now));
        }
    }

    fn handle_control(&mut self, pkt: &Packet, now: u64) -> Result<(), HostError> {
        match pkt.kind() {
            CommandKind::Action(CONTROL_CMD_RESET) => {
                info!("engine: reset requested");
                self.restart_counter = 0;
                self.announce_due = true;
                return Ok(());
            }
            CommandKind::Action(CONTROL_CMD_IDENTIFY) => {
                info!("engine: identify {}", self.bus.self_id().short_id());
                return Ok(());
            }
            CommandKind::GetRegister(CONTROL_REG_UPTIME) => {
                let uptime_us = now.saturating_sub(self.created_ms) * 1000;
                self.control
                    .set_register(CONTROL_REG_UPTIME, &[Value::UInt(uptime_us)])?;
            }
            _ => {}
        }
        let mut ctx = HostContext::new(
            self.bus.self_id(),
            CONTROL_SERVICE_INDEX,
            CONTROL_HOST,
            now,
            self.bus.registry(),
            &mut self.outbox,
            &mut self.timers,
        );
        self.control.handle_packet(pkt, &mut ctx).map(|_| ())
    }

    // ── Periodic work ─────────────────────────────────────────

    /// Fire timers, evict silent devices, announce, poll and retry acks.
    pub fn tick(&mut self, sink: &mut impl EventSink) {
        let now = self.clock.now_ms();
        self.run_timers(now, sink);

        let evicted = self.bus.evict_stale(now);
        self.dispatch(evicted, now, sink);
        if self.rebind_pending {
            self.rebind(now, sink);
        }

        if self.announce_due || now >= self.next_announce_ms {
            self.announce(now, sink);
        }

        for id in self.bus.poll_candidates(now, self.config.poll_interval_ms) {
            self.request_firmware_info(id, now);
        }

        self.expire_acks(now, sink);

        if let Some(found) = self.scanner.poll(now, &self.bus, &self.firmware) {
            info!("engine: firmware scan found {} update(s)", found.len());
            sink.emit(&AppEvent::UpdatesAvailable(found));
        }

        self.flush(now, sink);
    }

    fn run_timers(&mut self, now: u64, sink: &mut impl EventSink) {
        while let Some(t) = self.timers.pop_due(now) {
            self.call_host(t.owner, t.due_ms, |h, ctx| h.on_timer(t.tag, ctx));
            self.flush(t.due_ms, sink);
        }
    }

    fn announce(&mut self, now: u64, sink: &mut impl EventSink) {
        let classes: Vec<u32> = self.hosts.iter().map(|h| h.service_class()).collect();
        let announcement = Announcement::from_classes(0, self.restart_counter, &classes);
        match Packet::from_device(
            self.bus.self_id(),
            CONTROL_SERVICE_INDEX,
            CMD_ANNOUNCE,
            &announcement.encode(),
        ) {
            Ok(pkt) => self.outbox.push(pkt.with_timestamp(now)),
            Err(e) => warn!("engine: announce not built: {e}"),
        }

        self.restart_counter = (self.restart_counter + 1).min(RESTART_COUNTER_MAX);
        self.announce_due = false;
        self.next_announce_ms = now + self.config.announce_interval_ms;

        if !self.started {
            self.started = true;
            info!("engine: started with {} host(s)", self.hosts.len());
            sink.emit(&AppEvent::Started(self.bus.self_id()));
        }
    }

    fn request_firmware_info(&mut self, device: DeviceId, now: u64) {
        for reg in [CONTROL_REG_FIRMWARE_IDENTIFIER, CONTROL_REG_FIRMWARE_VERSION] {
            if let Ok(pkt) = Packet::to_device(device, CONTROL_SERVICE_INDEX, get_register(reg), &[]) {
                self.outbox.push(pkt.with_timestamp(now));
            }
        }
    }

    fn expire_acks(&mut self, now: u64, sink: &mut impl EventSink) {
        let mut i = 0;
        while i < self.pending_acks.len() {
            let pending = &mut self.pending_acks[i];
            if pending.deadline_ms > now {
                i += 1;
                continue;
            }
            if pending.retries_left == 0 {
                let p = self.pending_acks.remove(i);
                warn!("engine: no ack from {} for {:#06x}", p.device.short_id(), p.crc);
                sink.emit(&AppEvent::Bus(BusEvent::AckTimeout {
                    device: p.device,
                    crc: p.crc,
                }));
                continue;
            }
            pending.retries_left -= 1;
            pending.deadline_ms = now + self.config.ack_timeout_ms;
            let frame = pending.packet.to_bytes();
            debug!("engine: resending {:#06x}", pending.crc);
            if let Err(e) = self.transport.send(&frame) {
                warn!("engine: transport send failed: {e:?}");
            }
            i += 1;
        }
    }

    // ── Outbound ──────────────────────────────────────────────

    fn next_seq(&mut self) -> u8 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Send everything queued, including what sending produces.
    fn flush(&mut self, now: u64, sink: &mut impl EventSink) {
        while !self.outbox.is_empty() {
            let batch = core::mem::take(&mut self.outbox);
            for pkt in batch {
                let seq = self.next_seq();
                self.transmit(pkt.with_seq(seq), now, sink);
            }
        }
    }

    fn transmit(&mut self, pkt: Packet, now: u64, sink: &mut impl EventSink) {
        let local = pkt.device_id() == self.bus.self_id();
        if local && pkt.is_command() {
            self.route_local(pkt, now, sink);
            return;
        }
        if let Err(e) = self.transport.send(&pkt.to_bytes()) {
            warn!("engine: transport send failed: {e:?}");
        }
        if local {
            self.ingest(pkt, now, sink);
        }
    }

    fn queue(&mut self, pkt: Packet, sink: &mut impl EventSink) {
        let now = self.clock.now_ms();
        self.outbox.push(pkt.with_timestamp(now));
        self.flush(now, sink);
    }

    fn service_spec(&self, key: ServiceKey) -> Result<Arc<ServiceSpec>, Error> {
        let service = self.bus.service(key).ok_or(Error::UnknownService(key))?;
        let class = service.service_class();
        self.bus
            .registry()
            .spec_for_class(class)
            .cloned()
            .ok_or(Error::Host(HostError::UnknownClass(class)))
    }

    /// Write a register on any service, local or remote.
    pub fn set_register(
        &mut self,
        key: ServiceKey,
        reg: u16,
        values: &[Value],
        sink: &mut impl EventSink,
    ) -> Result<(), Error> {
        let spec = self.service_spec(key)?;
        let info = spec.register(reg).ok_or(HostError::UnknownRegister(reg))?;
        if !info.kind.is_writable() {
            return Err(HostError::ReadOnly(reg).into());
        }
        let payload = info.pack(values)?;
        let pkt = Packet::to_device(key.device, key.index, set_register(reg), &payload)?;
        self.queue(pkt, sink);
        Ok(())
    }

    /// Ask a service to report a register.  The answer arrives as a
    /// [`BusEvent::RegisterChanged`] when the value differs.
    pub fn get_register(
        &mut self,
        key: ServiceKey,
        reg: u16,
        sink: &mut impl EventSink,
    ) -> Result<(), Error> {
        if self.bus.service(key).is_none() {
            return Err(Error::UnknownService(key));
        }
        let pkt = Packet::to_device(key.device, key.index, get_register(reg), &[])?;
        self.queue(pkt, sink);
        Ok(())
    }

    /// Send a custom command with arguments packed per its declaration.
    pub fn send_command(
        &mut self,
        key: ServiceKey,
        command: u16,
        values: &[Value],
        sink: &mut impl EventSink,
    ) -> Result<(), Error> {
        let spec = self.service_spec(key)?;
        let info = spec
            .command(command)
            .ok_or(HostError::UnknownCommand(command))?;
        let payload = info.pack(values)?;
        let pkt = Packet::to_device(key.device, key.index, command, &payload)?;
        self.queue(pkt, sink);
        Ok(())
    }

    /// Send a command with the ack flag set.  Returns the CRC the ack will
    /// carry; the outcome arrives as [`BusEvent::Acked`] or
    /// [`BusEvent::AckTimeout`].
    pub fn send_with_ack(&mut self, pkt: Packet, sink: &mut impl EventSink) -> u16 {
        let now = self.clock.now_ms();
        let seq = self.next_seq();
        let pkt = pkt.with_ack_requested().with_seq(seq).with_timestamp(now);
        let crc = pkt.crc();
        self.pending_acks.push(PendingAck {
            device: pkt.device_id(),
            crc,
            packet: pkt.clone(),
            deadline_ms: now + self.config.ack_timeout_ms,
            retries_left: self.config.ack_retries,
        });
        self.transmit(pkt, now, sink);
        self.flush(now, sink);
        crc
    }

    /// Last reported value of a register, decoded.
    pub fn register_value(&self, key: ServiceKey, reg: u16) -> Option<Vec<Value>> {
        let service = self.bus.service(key)?;
        let bytes = service.register(reg)?;
        let spec = self.bus.registry().spec_for_class(service.service_class())?;
        spec.register(reg)?.unpack(bytes).ok()
    }

    pub fn set_device_name(
        &mut self,
        device: DeviceId,
        name: Option<String>,
        sink: &mut impl EventSink,
    ) {
        if let Some(ev) = self.bus.set_device_name(device, name) {
            sink.emit(&AppEvent::Bus(ev));
        }
    }

    // ── Firmware ──────────────────────────────────────────────

    pub fn set_firmware_catalogue(&mut self, blobs: Vec<FirmwareBlob>) {
        info!("engine: {} firmware blob(s) loaded", blobs.len());
        self.firmware = blobs;
    }

    pub fn firmware_catalogue(&self) -> &[FirmwareBlob] {
        &self.firmware
    }

    /// Start a firmware scan.  Results arrive as
    /// [`AppEvent::UpdatesAvailable`] from a later tick.  Announces from
    /// other devices start one too once a catalogue is loaded.
    pub fn scan_firmware(&mut self) -> bool {
        let now = self.clock.now_ms();
        self.begin_scan(now)
    }

    /// Start time of the scan in flight, if any.
    pub fn firmware_scan_started_ms(&self) -> Option<u64> {
        self.scanner.started_at()
    }

    fn begin_scan(&mut self, now: u64) -> bool {
        if !self.scanner.begin(now, &self.bus) {
            return false;
        }
        let missing: Vec<DeviceId> = self
            .bus
            .devices(&DeviceFilter {
                ignore_self: true,
                ..DeviceFilter::default()
            })
            .into_iter()
            .filter(|d| d.firmware_info().is_none())
            .map(Device::id)
            .collect();
        for id in missing {
            self.request_firmware_info(id, now);
        }
        true
    }

    /// Flash `blob` onto `candidates` over `link`.
    pub async fn flash<L: FlashLink>(
        &mut self,
        link: &mut L,
        blob: &FirmwareBlob,
        candidates: &[DeviceId],
        cancel: &CancelToken,
        on_progress: impl FnMut(f64),
    ) -> Result<FlashReport, FlashError> {
        let options = FlashOptions::from_config(&self.config).with_attempt(self.flash_attempts);
        self.flash_attempts = self.flash_attempts.wrapping_add(1);
        flash_firmware_blob(&mut self.bus, link, blob, candidates, &options, cancel, on_progress)
            .await
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
