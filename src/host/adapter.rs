//! Adapter support: a virtual service fed by events from another service.

use crate::bus::{ServiceEvent, ServiceKey};

use super::HostError;

/// The role-facing half of an adapter.
///
/// Holds the name and class of the source role and the service currently
/// bound to it.  An adapter is attached to the engine's role manager at
/// most once.
#[derive(Debug, Clone)]
pub struct AdapterServer {
    role: String,
    source_class: u32,
    attached: bool,
    source: Option<ServiceKey>,
}

impl AdapterServer {
    pub fn new(role: impl Into<String>, source_class: u32) -> Self {
        Self {
            role: role.into(),
            source_class,
            attached: false,
            source: None,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn source_class(&self) -> u32 {
        self.source_class
    }

    pub fn attach(&mut self) -> Result<(), HostError> {
        if self.attached {
            return Err(HostError::AlreadyAttached);
        }
        self.attached = true;
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn source(&self) -> Option<ServiceKey> {
        self.source
    }

    /// Attached and bound to a live source.
    pub fn is_ready(&self) -> bool {
        self.attached && self.source.is_some()
    }

    /// Record a new binding; true if it changed.
    pub fn set_source(&mut self, source: Option<ServiceKey>) -> bool {
        let changed = self.source != source;
        self.source = source;
        changed
    }

    /// Whether `event` comes from the bound source.
    pub fn accepts(&self, event: &ServiceEvent) -> bool {
        self.source == Some(event.service)
    }
}
