//! Chunked flash sequence against a device's bootloader service.
//!
//! ```text
//!   host                                   bootloader
//!    │ ── set_session(session, size) ────────▶ │
//!    │ ◀──────────────── report(session, 0) ── │
//!    │ ── page_data(session, off, chunk) ────▶ │  × ceil(size / chunk)
//!    │ ◀─────────── report(session, off, 0) ── │
//!    │ ── finalize(session, sha256) ─────────▶ │
//!    │ ◀──────────────── report(session, 0) ── │
//! ```
//!
//! While a flash runs, `safe_boot` is off and every candidate is marked
//! `flashing`, which stops background polling and firmware scans.  Both are
//! restored whatever the outcome.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::bus::Bus;
use crate::bus::timers::TimerQueue;
use crate::config::BusConfig;
use crate::host::{HostContext, ServiceHost};
use crate::packet::codec::MAX_PAYLOAD_SIZE;
use crate::packet::{CommandKind, DeviceId, Packet};
use crate::spec::classes::{
    BOOTLOADER_CMD_FINALIZE, BOOTLOADER_CMD_PAGE_DATA, BOOTLOADER_CMD_SET_SESSION,
    BOOTLOADER_STATUS_OK, SRV_BOOTLOADER,
};
use crate::spec::marshal::Value;
use crate::spec::{ServiceSpec, SpecRegistry};

use super::{FirmwareBlob, FlashError, update_applicable};

/// Page data carries session and offset (8 bytes) ahead of the chunk.
pub const MAX_CHUNK_SIZE: usize = MAX_PAYLOAD_SIZE - 8;

// ── Link ──────────────────────────────────────────────────────

/// One request/response round trip with a bootloader.
#[allow(async_fn_in_trait)]
pub trait FlashLink {
    async fn exchange(&mut self, request: Packet) -> Result<Packet, FlashError>;
}

/// Drives an in-process [`ServiceHost`] as the far end of a flash.
pub struct HostLink<H: ServiceHost> {
    host: H,
    registry: SpecRegistry,
    device: DeviceId,
    service_index: u8,
    timers: TimerQueue,
}

impl<H: ServiceHost> HostLink<H> {
    pub fn new(host: H, registry: SpecRegistry, device: DeviceId, service_index: u8) -> Self {
        Self {
            host,
            registry,
            device,
            service_index,
            timers: TimerQueue::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn into_inner(self) -> H {
        self.host
    }
}

impl<H: ServiceHost> FlashLink for HostLink<H> {
    async fn exchange(&mut self, request: Packet) -> Result<Packet, FlashError> {
        if request.device_id() != self.device || request.service_index() != self.service_index {
            return Err(FlashError::NoResponse);
        }
        let mut outbox = Vec::new();
        let mut ctx = HostContext::new(
            self.device,
            self.service_index,
            0,
            0,
            &self.registry,
            &mut outbox,
            &mut self.timers,
        );
        self.host.handle_command(&request, &mut ctx)?;
        outbox.into_iter().next().ok_or(FlashError::NoResponse)
    }
}

// ── Options ───────────────────────────────────────────────────

/// Shared cancellation flag, checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct FlashOptions {
    pub chunk_size: usize,
    /// Session id; derived from the image digest and `attempt` when unset.
    pub session: Option<u32>,
    /// Distinguishes repeated flashes of the same image.
    pub attempt: u32,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self::from_config(&BusConfig::default())
    }
}

impl FlashOptions {
    pub fn from_config(config: &BusConfig) -> Self {
        Self {
            chunk_size: config.flash_chunk_size,
            session: None,
            attempt: 0,
        }
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// The session id a flash of `blob` with these options uses.
    pub fn session_for(&self, blob: &FirmwareBlob) -> u32 {
        self.session.unwrap_or_else(|| {
            let sha = blob.sha256();
            u32::from_le_bytes([sha[0], sha[1], sha[2], sha[3]])
                ^ self.attempt.wrapping_mul(0x9e37_79b9)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashReport {
    pub session: u32,
    pub flashed: Vec<DeviceId>,
    pub bytes: usize,
}

// ── Flash ─────────────────────────────────────────────────────

struct Target {
    device: DeviceId,
    service_index: u8,
    prior_flashing: bool,
}

/// Flash `blob` onto every device in `candidates`, one after another.
///
/// All candidates are checked before anything is sent: each must be known,
/// run older firmware with the blob's identifier and expose a bootloader.
/// `on_progress` receives the overall fraction done in `[0, 1]`.
pub async fn flash_firmware_blob<L: FlashLink>(
    bus: &mut Bus,
    link: &mut L,
    blob: &FirmwareBlob,
    candidates: &[DeviceId],
    options: &FlashOptions,
    cancel: &CancelToken,
    mut on_progress: impl FnMut(f64),
) -> Result<FlashReport, FlashError> {
    if blob.image.is_empty() {
        return Err(FlashError::InvalidImage("empty image"));
    }
    if options.chunk_size == 0 || options.chunk_size > MAX_CHUNK_SIZE {
        return Err(FlashError::InvalidImage("chunk size out of range"));
    }
    if u32::try_from(blob.image.len()).is_err() {
        return Err(FlashError::InvalidImage("image too large"));
    }
    let spec = Arc::clone(
        bus.registry()
            .spec_for_class(SRV_BOOTLOADER)
            .ok_or(FlashError::MissingSpec)?,
    );

    let mut targets = Vec::with_capacity(candidates.len());
    for &id in candidates {
        let dev = bus.device(id).ok_or(FlashError::UnknownDevice(id))?;
        let applicable = dev
            .firmware_info()
            .is_some_and(|info| update_applicable(&info, blob));
        if !applicable {
            return Err(FlashError::NotApplicable { device: id });
        }
        let service_index = dev
            .services()
            .iter()
            .find(|s| s.service_class() == SRV_BOOTLOADER)
            .map(|s| s.index())
            .ok_or(FlashError::NoBootloader(id))?;
        targets.push(Target {
            device: id,
            service_index,
            prior_flashing: dev.flashing(),
        });
    }

    let prior_safe_boot = bus.safe_boot();
    bus.set_safe_boot(false);
    for t in &targets {
        bus.set_flashing(t.device, true);
    }

    let session = options.session_for(blob);
    let total = targets.len() as f64;
    let mut result = Ok(());
    for (i, t) in targets.iter().enumerate() {
        info!("flash: {} {} -> {}", blob.name, blob.version, t.device.short_id());
        let mut progress = |frac: f64| on_progress((i as f64 + frac) / total);
        result = flash_one(link, &spec, t, blob, session, options, cancel, &mut progress).await;
        if let Err(e) = &result {
            warn!("flash: {} failed: {e}", t.device.short_id());
            break;
        }
    }

    for t in &targets {
        bus.set_flashing(t.device, t.prior_flashing);
    }
    bus.set_safe_boot(prior_safe_boot);

    result.map(|()| {
        on_progress(1.0);
        FlashReport {
            session,
            flashed: targets.iter().map(|t| t.device).collect(),
            bytes: blob.image.len() * targets.len(),
        }
    })
}

#[allow(clippy::too_many_arguments)]
async fn flash_one<L: FlashLink>(
    link: &mut L,
    spec: &ServiceSpec,
    target: &Target,
    blob: &FirmwareBlob,
    session: u32,
    options: &FlashOptions,
    cancel: &CancelToken,
    progress: &mut impl FnMut(f64),
) -> Result<(), FlashError> {
    let size = blob.image.len() as u32;
    let call = Caller {
        spec,
        device: target.device,
        service_index: target.service_index,
        session,
    };

    call.run(link, BOOTLOADER_CMD_SET_SESSION, &[Value::UInt(size.into())])
        .await?;

    let mut offset = 0u32;
    for chunk in blob.image.chunks(options.chunk_size) {
        if cancel.is_cancelled() {
            return Err(FlashError::Cancelled);
        }
        let reply = call
            .run(
                link,
                BOOTLOADER_CMD_PAGE_DATA,
                &[Value::UInt(offset.into()), Value::Bytes(chunk.to_vec())],
            )
            .await?;
        if reply.get(1).and_then(Value::as_u64) != Some(u64::from(offset)) {
            return Err(FlashError::UnexpectedResponse {
                command: BOOTLOADER_CMD_PAGE_DATA,
            });
        }
        offset += chunk.len() as u32;
        progress(f64::from(offset) / f64::from(size));
        futures_lite::future::yield_now().await;
    }

    if cancel.is_cancelled() {
        return Err(FlashError::Cancelled);
    }
    call.run(
        link,
        BOOTLOADER_CMD_FINALIZE,
        &[Value::Bytes(blob.sha256().to_vec())],
    )
    .await?;
    Ok(())
}

/// Builds bootloader commands and checks their reports.
struct Caller<'a> {
    spec: &'a ServiceSpec,
    device: DeviceId,
    service_index: u8,
    session: u32,
}

impl Caller<'_> {
    /// Send `command` with the session prepended to `args`; returns the
    /// report fields once its trailing status is ok.
    async fn run<L: FlashLink>(
        &self,
        link: &mut L,
        command: u16,
        args: &[Value],
    ) -> Result<Vec<Value>, FlashError> {
        let request_spec = self
            .spec
            .command(command)
            .ok_or(FlashError::MissingSpec)?;
        let report_spec = self.spec.report(command).ok_or(FlashError::MissingSpec)?;

        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(Value::UInt(self.session.into()));
        values.extend_from_slice(args);
        let payload = request_spec.pack(&values)?;
        let request = Packet::to_device(self.device, self.service_index, command, &payload)?;

        let reply = link.exchange(request).await?;
        let unexpected = FlashError::UnexpectedResponse { command };
        if reply.is_command()
            || reply.device_id() != self.device
            || reply.kind() != CommandKind::Action(command)
        {
            return Err(unexpected);
        }
        let fields = report_spec.unpack(reply.payload())?;
        if fields.first().and_then(Value::as_u64) != Some(u64::from(self.session)) {
            return Err(unexpected);
        }
        let status = fields
            .last()
            .and_then(Value::as_u64)
            .ok_or(unexpected)? as u32;
        if status != BOOTLOADER_STATUS_OK {
            return Err(FlashError::Rejected { command, status });
        }
        Ok(fields)
    }
}
