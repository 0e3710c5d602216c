//! Service specification registry.
//!
//! The catalogue is a JSON document describing every known service class:
//! its registers, events, commands and reports, each with typed fields.
//! It is loaded once, validated, and indexed by class identifier and by
//! lower-cased short name.
//!
//! ```text
//!   services.json ──serde_json──▶ RawService ──validate──▶ ServiceSpec
//!                                                              │
//!                          ┌───────────────────────────────────┤
//!                          ▼                                   ▼
//!                 by_class: u32 → idx              by_name: "button" → idx
//! ```

pub mod classes;
pub mod marshal;
pub mod storage;

use core::fmt;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use log::{debug, info};
use serde::Deserialize;

use marshal::{FieldSpec, MarshalError, Value};
use storage::StorageType;

/// Catalogue compiled into the crate.
pub const BUILTIN_CATALOGUE: &str = include_str!("../../catalogue/services.json");

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogueError {
    /// The document is not valid catalogue JSON.
    Parse(String),
    DuplicateClass(u32),
    DuplicateName(String),
    DuplicatePacket { service: String, packet: String },
    UnknownExtends { service: String, base: String },
    /// `extends` chain loops back to this service.
    ExtendsCycle(String),
    BadFieldType { service: String, field: String, type_name: String },
    /// Declared `storage` disagrees with the field type.
    StorageMismatch { service: String, field: String },
    /// A `bytes`/`string` field is followed by another field.
    OpaqueFieldNotLast { service: String, packet: String },
}

impl fmt::Display for CatalogueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "catalogue parse error: {msg}"),
            Self::DuplicateClass(c) => write!(f, "duplicate class identifier {c:#010x}"),
            Self::DuplicateName(n) => write!(f, "duplicate service name '{n}'"),
            Self::DuplicatePacket { service, packet } => {
                write!(f, "{service}: packet '{packet}' declared twice")
            }
            Self::UnknownExtends { service, base } => {
                write!(f, "{service} extends unknown service '{base}'")
            }
            Self::ExtendsCycle(s) => write!(f, "extends cycle through '{s}'"),
            Self::BadFieldType {
                service,
                field,
                type_name,
            } => write!(f, "{service}.{field}: unknown type '{type_name}'"),
            Self::StorageMismatch { service, field } => {
                write!(f, "{service}.{field}: storage disagrees with type")
            }
            Self::OpaqueFieldNotLast { service, packet } => {
                write!(f, "{service}.{packet}: variable-length field must be last")
            }
        }
    }
}

impl std::error::Error for CatalogueError {}

// ── Spec types ────────────────────────────────────────────────

/// What a packet definition describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    Const,
    Ro,
    Rw,
    Event,
    Command,
    Report,
}

impl PacketKind {
    pub fn is_register(self) -> bool {
        matches!(self, Self::Const | Self::Ro | Self::Rw)
    }

    /// Registers a client may write.
    pub fn is_writable(self) -> bool {
        self == Self::Rw
    }
}

/// One register, event, command or report of a service.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketInfo {
    pub kind: PacketKind,
    pub name: String,
    pub identifier: u16,
    pub fields: Vec<FieldSpec>,
}

impl PacketInfo {
    pub fn pack(&self, values: &[Value]) -> Result<Vec<u8>, MarshalError> {
        marshal::pack(values, &self.fields)
    }

    pub fn unpack(&self, bytes: &[u8]) -> Result<Vec<Value>, MarshalError> {
        marshal::unpack(bytes, &self.fields)
    }
}

/// Immutable description of one service class.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub short_id: String,
    pub name: String,
    pub class_identifier: u32,
    pub extends: Vec<String>,
    pub packets: Vec<PacketInfo>,
}

impl ServiceSpec {
    fn find(&self, pred: impl Fn(&PacketInfo) -> bool) -> Option<&PacketInfo> {
        self.packets.iter().find(|p| pred(p))
    }

    pub fn register(&self, reg: u16) -> Option<&PacketInfo> {
        self.find(|p| p.kind.is_register() && p.identifier == reg)
    }

    pub fn event(&self, code: u8) -> Option<&PacketInfo> {
        self.find(|p| p.kind == PacketKind::Event && p.identifier == code as u16)
    }

    pub fn command(&self, code: u16) -> Option<&PacketInfo> {
        self.find(|p| p.kind == PacketKind::Command && p.identifier == code)
    }

    pub fn report(&self, code: u16) -> Option<&PacketInfo> {
        self.find(|p| p.kind == PacketKind::Report && p.identifier == code)
    }

    pub fn packet_by_name(&self, kind: PacketKind, name: &str) -> Option<&PacketInfo> {
        self.find(|p| p.kind == kind && p.name == name)
    }
}

// ── Catalogue document ────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawService {
    short_id: String,
    name: String,
    class_identifier: u32,
    #[serde(default)]
    extends: Vec<String>,
    #[serde(default)]
    packets: Vec<RawPacket>,
}

#[derive(Deserialize)]
struct RawPacket {
    kind: PacketKind,
    name: String,
    identifier: u16,
    #[serde(default)]
    fields: Vec<RawField>,
}

#[derive(Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    storage: Option<i8>,
}

impl RawService {
    fn into_spec(self) -> Result<ServiceSpec, CatalogueError> {
        let mut packets: Vec<PacketInfo> = Vec::with_capacity(self.packets.len());
        for raw in self.packets {
            if packets
                .iter()
                .any(|p| p.kind == raw.kind && p.identifier == raw.identifier)
            {
                return Err(CatalogueError::DuplicatePacket {
                    service: self.short_id,
                    packet: raw.name,
                });
            }
            let mut fields = Vec::with_capacity(raw.fields.len());
            for f in raw.fields {
                let storage =
                    StorageType::parse(&f.type_name).ok_or_else(|| CatalogueError::BadFieldType {
                        service: self.short_id.clone(),
                        field: f.name.clone(),
                        type_name: f.type_name.clone(),
                    })?;
                if f.storage.is_some_and(|s| s != storage.storage()) {
                    return Err(CatalogueError::StorageMismatch {
                        service: self.short_id,
                        field: f.name,
                    });
                }
                fields.push(FieldSpec::new(f.name, storage));
            }
            let opaque_not_last = fields
                .iter()
                .rev()
                .skip(1)
                .any(|f| f.storage.is_variable_length());
            if opaque_not_last {
                return Err(CatalogueError::OpaqueFieldNotLast {
                    service: self.short_id,
                    packet: raw.name,
                });
            }
            packets.push(PacketInfo {
                kind: raw.kind,
                name: raw.name,
                identifier: raw.identifier,
                fields,
            });
        }

        Ok(ServiceSpec {
            short_id: self.short_id,
            name: self.name,
            class_identifier: self.class_identifier,
            extends: self.extends,
            packets,
        })
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

// ── Registry ──────────────────────────────────────────────────

/// Indexed, validated catalogue.  Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SpecRegistry {
    specs: Vec<Arc<ServiceSpec>>,
    by_class: HashMap<u32, usize>,
    by_name: HashMap<String, usize>,
}

impl SpecRegistry {
    /// The catalogue shipped with the crate.
    pub fn builtin() -> Result<Self, CatalogueError> {
        Self::from_json(BUILTIN_CATALOGUE)
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogueError> {
        let raw: Vec<RawService> =
            serde_json::from_str(json).map_err(|e| CatalogueError::Parse(e.to_string()))?;
        let specs = raw
            .into_iter()
            .map(RawService::into_spec)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_specs(specs)
    }

    /// Load a catalogue file from disk.
    pub fn load_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalogue {}", path.display()))?;
        let registry = Self::from_json(&text)
            .with_context(|| format!("loading catalogue {}", path.display()))?;
        info!("catalogue: {} services from {}", registry.len(), path.display());
        Ok(registry)
    }

    /// Build the indexes and validate `extends` references.
    pub fn from_specs(specs: Vec<ServiceSpec>) -> Result<Self, CatalogueError> {
        let mut registry = Self::default();
        for spec in specs {
            let idx = registry.specs.len();
            if registry.by_class.insert(spec.class_identifier, idx).is_some() {
                return Err(CatalogueError::DuplicateClass(spec.class_identifier));
            }
            if registry.by_name.insert(normalize_name(&spec.short_id), idx).is_some() {
                return Err(CatalogueError::DuplicateName(spec.short_id));
            }
            registry.specs.push(Arc::new(spec));
        }

        for spec in &registry.specs {
            for base in &spec.extends {
                if registry.spec_for_name(base).is_none() {
                    return Err(CatalogueError::UnknownExtends {
                        service: spec.short_id.clone(),
                        base: base.clone(),
                    });
                }
            }
        }
        registry.check_cycles()?;

        debug!("catalogue: indexed {} services", registry.specs.len());
        Ok(registry)
    }

    fn check_cycles(&self) -> Result<(), CatalogueError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(reg: &SpecRegistry, idx: usize, marks: &mut [Mark]) -> Result<(), CatalogueError> {
            match marks[idx] {
                Mark::Done => return Ok(()),
                Mark::Active => {
                    return Err(CatalogueError::ExtendsCycle(reg.specs[idx].short_id.clone()));
                }
                Mark::New => {}
            }
            marks[idx] = Mark::Active;
            for base in &reg.specs[idx].extends {
                if let Some(&b) = reg.by_name.get(&normalize_name(base)) {
                    visit(reg, b, marks)?;
                }
            }
            marks[idx] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::New; self.specs.len()];
        for idx in 0..self.specs.len() {
            visit(self, idx, &mut marks)?;
        }
        Ok(())
    }

    pub fn spec_for_class(&self, class: u32) -> Option<&Arc<ServiceSpec>> {
        self.by_class.get(&class).map(|&i| &self.specs[i])
    }

    /// Lookup by short name, ignoring case and surrounding whitespace.
    pub fn spec_for_name(&self, name: &str) -> Option<&Arc<ServiceSpec>> {
        self.by_name.get(&normalize_name(name)).map(|&i| &self.specs[i])
    }

    /// Whether `class` is `required` or transitively extends it.
    ///
    /// Terminates on cyclic input even though loading rejects cycles.
    pub fn is_instance_of(&self, class: u32, required: u32) -> bool {
        if class == required {
            return true;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![class];
        while let Some(c) = stack.pop() {
            if c == required {
                return true;
            }
            if !visited.insert(c) {
                continue;
            }
            let Some(spec) = self.spec_for_class(c) else {
                continue;
            };
            stack.extend(
                spec.extends
                    .iter()
                    .filter_map(|base| self.spec_for_name(base))
                    .map(|s| s.class_identifier),
            );
        }
        false
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceSpec>> {
        self.specs.iter()
    }

    /// Human label for a class, falling back to hex for unknown classes.
    pub fn class_name(&self, class: u32) -> String {
        self.spec_for_class(class)
            .map_or_else(|| format!("{class:#010x}"), |s| s.short_id.clone())
    }
}

// ── Tests ─────────────────────────────────────────────────────
