//! Role bindings: stable logical names mapped onto discovered services.
//!
//! A role names the service class it needs.  [`RoleManager::rebind`] runs
//! after every topology change and resolves each role against the bus:
//!
//! 1. a still-present, still-compatible current binding is kept;
//! 2. otherwise a remembered preference, if present and compatible;
//! 3. otherwise the first compatible service in announce order.
//!
//! A service is bound to at most one role.  Roles with no candidate stay
//! unresolved; that is a normal state, not an error.

use core::fmt;
use std::collections::{BTreeMap, HashSet};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::bus::{Bus, ServiceFilter, ServiceKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleError {
    DuplicateRole(String),
    UnknownRole(String),
    /// Snapshot bytes did not decode.
    Corrupted,
}

impl fmt::Display for RoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateRole(r) => write!(f, "role '{r}' already declared"),
            Self::UnknownRole(r) => write!(f, "no role named '{r}'"),
            Self::Corrupted => write!(f, "role snapshot corrupted"),
        }
    }
}

impl std::error::Error for RoleError {}

/// Result of resolving a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Bound(ServiceKey),
    Unresolved,
}

/// Emitted whenever a role's binding changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEvent {
    pub role: String,
    pub previous: Option<ServiceKey>,
    pub current: Option<ServiceKey>,
}

#[derive(Debug, Clone)]
pub struct Role {
    name: String,
    service_class: u32,
    binding: Option<ServiceKey>,
}

impl Role {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_class(&self) -> u32 {
        self.service_class
    }

    pub fn binding(&self) -> Binding {
        self.binding.map_or(Binding::Unresolved, Binding::Bound)
    }
}

#[derive(Serialize, Deserialize)]
struct RoleSnapshot {
    preferences: Vec<(String, ServiceKey)>,
}

#[derive(Debug, Default)]
pub struct RoleManager {
    roles: Vec<Role>,
    preferences: BTreeMap<String, ServiceKey>,
}

impl RoleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a role.  It starts unresolved until the next rebind.
    pub fn add_role(&mut self, name: &str, service_class: u32) -> Result<(), RoleError> {
        if self.role(name).is_some() {
            return Err(RoleError::DuplicateRole(name.to_owned()));
        }
        self.roles.push(Role {
            name: name.to_owned(),
            service_class,
            binding: None,
        });
        Ok(())
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.name == name)
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Current binding of `name`; unknown roles are unresolved.
    pub fn bind(&self, name: &str) -> Binding {
        self.role(name).map_or(Binding::Unresolved, Role::binding)
    }

    /// Role currently bound to `service`.
    pub fn role_for_service(&self, service: ServiceKey) -> Option<&Role> {
        self.roles.iter().find(|r| r.binding == Some(service))
    }

    /// Remember `service` as the preferred target of `name`.  Takes effect
    /// when the role next needs a new binding.
    pub fn set_preference(&mut self, name: &str, service: ServiceKey) -> Result<(), RoleError> {
        if self.role(name).is_none() {
            return Err(RoleError::UnknownRole(name.to_owned()));
        }
        self.preferences.insert(name.to_owned(), service);
        Ok(())
    }

    /// Re-resolve every role against the bus.
    pub fn rebind(&mut self, bus: &Bus) -> Vec<RoleEvent> {
        let registry = bus.registry();
        let compatible = |key: ServiceKey, class: u32| {
            bus.service(key)
                .is_some_and(|s| registry.is_instance_of(s.service_class(), class))
        };

        let previous: Vec<Option<ServiceKey>> = self.roles.iter().map(|r| r.binding).collect();
        let mut claimed = HashSet::new();

        // Keep what still works.
        for role in &mut self.roles {
            match role.binding {
                Some(key) if compatible(key, role.service_class) => {
                    claimed.insert(key);
                }
                Some(_) => role.binding = None,
                None => {}
            }
        }

        for role in self.roles.iter_mut().filter(|r| r.binding.is_none()) {
            let preferred = self
                .preferences
                .get(&role.name)
                .copied()
                .filter(|&k| !claimed.contains(&k) && compatible(k, role.service_class));
            let chosen = preferred.or_else(|| {
                bus.services(&ServiceFilter::class(role.service_class))
                    .iter()
                    .map(|s| s.key())
                    .find(|k| !claimed.contains(k))
            });
            if let Some(key) = chosen {
                claimed.insert(key);
                role.binding = Some(key);
            }
        }

        let mut events = Vec::new();
        for (role, prev) in self.roles.iter().zip(previous) {
            if role.binding == prev {
                continue;
            }
            match role.binding {
                Some(key) => info!("roles: '{}' bound to {}", role.name, key),
                None => warn!("roles: '{}' unresolved", role.name),
            }
            events.push(RoleEvent {
                role: role.name.clone(),
                previous: prev,
                current: role.binding,
            });
        }
        events
    }

    /// Serialise role preferences, current bindings first.
    pub fn snapshot(&self) -> Result<Vec<u8>, RoleError> {
        let mut prefs = self.preferences.clone();
        for role in &self.roles {
            if let Some(key) = role.binding {
                prefs.insert(role.name.clone(), key);
            }
        }
        let snap = RoleSnapshot {
            preferences: prefs.into_iter().collect(),
        };
        postcard::to_allocvec(&snap).map_err(|_| RoleError::Corrupted)
    }

    /// Load preferences written by [`RoleManager::snapshot`].  Existing
    /// bindings are untouched.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<(), RoleError> {
        let snap: RoleSnapshot = postcard::from_bytes(bytes).map_err(|_| RoleError::Corrupted)?;
        self.preferences.extend(snap.preferences);
        Ok(())
    }
}
