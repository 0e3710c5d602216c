//! Text packet filters for traces and consoles.
//!
//! Space-separated terms, all of which must match:
//!
//! | Term                      | Matches                                   |
//! |---------------------------|-------------------------------------------|
//! | `kind:announce`           | announce packets                          |
//! | `kind:event`              | event packets                             |
//! | `kind:get` / `kind:set`   | register read / write requests            |
//! | `kind:report`             | register reports                          |
//! | `kind:action`             | custom commands and their reports         |
//! | `kind:ack`                | acknowledgements                          |
//! | `kind:command`            | anything addressed to a device            |
//! | `dev:<name>`              | device by short id or friendly name       |
//! | `service:<name>`          | service class by short name (`extends`)   |
//! | `repeated-announce:false` | hides announces identical to the previous |

use core::fmt;
use std::collections::HashMap;

use crate::bus::Bus;

use super::{CommandKind, DeviceId, Packet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    UnknownTerm(String),
    UnknownKind(String),
    BadValue(String),
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTerm(t) => write!(f, "unknown filter term '{t}'"),
            Self::UnknownKind(k) => write!(f, "unknown packet kind '{k}'"),
            Self::BadValue(t) => write!(f, "bad value in '{t}'"),
        }
    }
}

impl std::error::Error for FilterError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Announce,
    Event,
    Get,
    Set,
    Report,
    Action,
    Ack,
    Command,
}

impl Kind {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "announce" => Self::Announce,
            "event" => Self::Event,
            "get" => Self::Get,
            "set" => Self::Set,
            "report" => Self::Report,
            "action" => Self::Action,
            "ack" => Self::Ack,
            "command" => Self::Command,
            _ => return None,
        })
    }

    fn matches(self, pkt: &Packet) -> bool {
        match (self, pkt.kind()) {
            (Self::Announce, CommandKind::Announce)
            | (Self::Event, CommandKind::Event { .. })
            | (Self::Set, CommandKind::SetRegister(_))
            | (Self::Action, CommandKind::Action(_))
            | (Self::Ack, CommandKind::Ack(_)) => true,
            (Self::Get, CommandKind::GetRegister(_)) => pkt.is_command(),
            (Self::Report, CommandKind::GetRegister(_)) => pkt.is_report(),
            (Self::Command, _) => pkt.is_command(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Kind(Kind),
    Device(String),
    Service(String),
    HideRepeatedAnnounce,
}

/// Compiled packet filter.
#[derive(Debug, Clone, Default)]
pub struct PacketFilter {
    terms: Vec<Term>,
    /// Last announce payload per device, for `repeated-announce:false`.
    last_announce: HashMap<DeviceId, Vec<u8>>,
}

impl PacketFilter {
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let mut terms = Vec::new();
        for word in text.split_whitespace() {
            let Some((key, value)) = word.split_once(':') else {
                return Err(FilterError::UnknownTerm(word.to_owned()));
            };
            if value.is_empty() {
                return Err(FilterError::BadValue(word.to_owned()));
            }
            let term = match key {
                "kind" => Term::Kind(
                    Kind::parse(value).ok_or_else(|| FilterError::UnknownKind(value.to_owned()))?,
                ),
                "dev" => Term::Device(value.to_owned()),
                "service" => Term::Service(value.to_owned()),
                "repeated-announce" => match value {
                    "false" => Term::HideRepeatedAnnounce,
                    "true" => continue,
                    _ => return Err(FilterError::BadValue(word.to_owned())),
                },
                _ => return Err(FilterError::UnknownTerm(word.to_owned())),
            };
            terms.push(term);
        }
        Ok(Self {
            terms,
            last_announce: HashMap::new(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Whether `pkt` passes every term.  Announces are remembered even
    /// when another term rejects them.
    pub fn matches(&mut self, pkt: &Packet, bus: &Bus) -> bool {
        let repeated = if pkt.is_announce() {
            let payload = pkt.payload().to_vec();
            self.last_announce
                .insert(pkt.device_id(), payload)
                .is_some_and(|prev| prev == pkt.payload())
        } else {
            false
        };

        self.terms.iter().all(|term| match term {
            Term::Kind(kind) => kind.matches(pkt),
            Term::Device(name) => {
                pkt.device_id().short_id().as_str().eq_ignore_ascii_case(name)
                    || bus
                        .device_by_name(name)
                        .is_some_and(|d| d.id() == pkt.device_id())
            }
            Term::Service(name) => {
                let Some(spec) = bus.registry().spec_for_name(name) else {
                    return false;
                };
                bus.device(pkt.device_id())
                    .and_then(|d| d.service(pkt.service_index()))
                    .is_some_and(|s| {
                        bus.registry()
                            .is_instance_of(s.service_class(), spec.class_identifier)
                    })
            }
            Term::HideRepeatedAnnounce => !repeated,
        })
    }
}
