//! Device side of the firmware flash exchange.
//!
//! ```text
//!   Idle ──set_session──▶ Receiving{session, size, written}
//!                             │  page_data (offset == written)
//!                             ▼
//!                          finalize ──sha ok──▶ Complete
//!                             └──────sha bad──▶ Failed
//! ```
//!
//! Every command is answered with a report carrying a status code; a
//! rejected command leaves the state unchanged.

use core::any::Any;

use log::{info, warn};

use crate::packet::{CommandKind, Packet};
use crate::spec::SpecRegistry;
use crate::spec::classes::{
    BOOTLOADER_CMD_FINALIZE, BOOTLOADER_CMD_PAGE_DATA, BOOTLOADER_CMD_SET_SESSION,
    BOOTLOADER_REG_PAGE_SIZE, BOOTLOADER_STATUS_BAD_SESSION, BOOTLOADER_STATUS_INCOMPLETE,
    BOOTLOADER_STATUS_NON_SEQUENTIAL, BOOTLOADER_STATUS_OK, BOOTLOADER_STATUS_OVERFLOW,
    BOOTLOADER_STATUS_VERIFY_FAILED, SRV_BOOTLOADER,
};
use crate::spec::marshal::Value;

use super::{HostContext, HostError, ServiceHost, ServiceServer};

/// Largest image a session may announce.
pub const MAX_IMAGE_SIZE: u32 = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Receiving {
        session: u32,
        expected_size: u32,
        written: u32,
    },
    Complete {
        session: u32,
    },
    Failed {
        session: u32,
    },
}

pub struct BootloaderServer {
    server: ServiceServer,
    state: SessionState,
    image: Vec<u8>,
}

impl BootloaderServer {
    pub fn new(registry: &SpecRegistry, page_size: u32) -> Result<Self, HostError> {
        let mut server = ServiceServer::from_registry(registry, SRV_BOOTLOADER)?;
        server.set_register(BOOTLOADER_REG_PAGE_SIZE, &[Value::UInt(page_size.into())])?;
        Ok(Self {
            server,
            state: SessionState::Idle,
            image: Vec::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The verified image, once a session completed.
    pub fn image(&self) -> Option<&[u8]> {
        matches!(self.state, SessionState::Complete { .. }).then_some(self.image.as_slice())
    }

    // ── Session operations ────────────────────────────────────

    pub fn set_session(&mut self, session: u32, image_size: u32) -> u32 {
        if image_size > MAX_IMAGE_SIZE {
            return BOOTLOADER_STATUS_OVERFLOW;
        }
        self.image.clear();
        self.image.reserve(image_size as usize);
        self.state = SessionState::Receiving {
            session,
            expected_size: image_size,
            written: 0,
        };
        info!("bootloader: session {session:#010x}, {image_size} bytes");
        BOOTLOADER_STATUS_OK
    }

    pub fn write_page(&mut self, session: u32, offset: u32, data: &[u8]) -> u32 {
        let SessionState::Receiving {
            session: current,
            expected_size,
            written,
        } = &mut self.state
        else {
            return BOOTLOADER_STATUS_BAD_SESSION;
        };
        if *current != session {
            return BOOTLOADER_STATUS_BAD_SESSION;
        }
        if offset != *written {
            return BOOTLOADER_STATUS_NON_SEQUENTIAL;
        }
        let end = u64::from(*written) + data.len() as u64;
        if end > u64::from(*expected_size) {
            return BOOTLOADER_STATUS_OVERFLOW;
        }
        self.image.extend_from_slice(data);
        *written = end as u32;
        BOOTLOADER_STATUS_OK
    }

    pub fn finalize(&mut self, session: u32, sha256: &[u8]) -> u32 {
        let SessionState::Receiving {
            session: current,
            expected_size,
            written,
        } = self.state
        else {
            return BOOTLOADER_STATUS_BAD_SESSION;
        };
        if current != session {
            return BOOTLOADER_STATUS_BAD_SESSION;
        }
        if written != expected_size {
            return BOOTLOADER_STATUS_INCOMPLETE;
        }
        let digest = hmac_sha256::Hash::hash(&self.image);
        if digest.as_slice() != sha256 {
            warn!("bootloader: session {session:#010x} failed verification");
            self.state = SessionState::Failed { session };
            return BOOTLOADER_STATUS_VERIFY_FAILED;
        }
        info!("bootloader: session {session:#010x} complete");
        self.state = SessionState::Complete { session };
        BOOTLOADER_STATUS_OK
    }
}

fn field_u32(values: &[Value], i: usize) -> u32 {
    values
        .get(i)
        .and_then(Value::as_u64)
        .map_or(0, |v| v as u32)
}

impl ServiceHost for BootloaderServer {
    fn server(&self) -> &ServiceServer {
        &self.server
    }

    fn server_mut(&mut self) -> &mut ServiceServer {
        &mut self.server
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn handle_command(&mut self, pkt: &Packet, ctx: &mut HostContext<'_>) -> Result<(), HostError> {
        let CommandKind::Action(cmd) = pkt.kind() else {
            return self.server.handle_packet(pkt, ctx).map(|_| ());
        };
        let values = self
            .server
            .spec()
            .command(cmd)
            .ok_or(HostError::UnknownCommand(cmd))?
            .unpack(pkt.payload())?;
        let session = field_u32(&values, 0);

        let reply = match cmd {
            BOOTLOADER_CMD_SET_SESSION => {
                let status = self.set_session(session, field_u32(&values, 1));
                vec![Value::UInt(session.into()), Value::UInt(status.into())]
            }
            BOOTLOADER_CMD_PAGE_DATA => {
                let offset = field_u32(&values, 1);
                let data = values.get(2).and_then(Value::as_bytes).unwrap_or_default();
                let status = self.write_page(session, offset, data);
                vec![
                    Value::UInt(session.into()),
                    Value::UInt(offset.into()),
                    Value::UInt(status.into()),
                ]
            }
            BOOTLOADER_CMD_FINALIZE => {
                let digest = values.get(1).and_then(Value::as_bytes).unwrap_or_default();
                let status = self.finalize(session, digest);
                vec![Value::UInt(session.into()), Value::UInt(status.into())]
            }
            other => return Err(HostError::UnknownCommand(other)),
        };
        self.server.send_report(cmd, &reply, ctx)
    }
}
