//! Controller registry.
//!
//! The registry is the authoritative table of known controllers. Callers may
//! register, rename and re-address controllers; only the hub changes
//! connection state or owns connection handles.

#![allow(missing_docs)]

use std::borrow::Borrow;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::protocol::RuntimeStatus;
use crate::transport::{AttemptId, Connection};

/// Caller-assigned controller identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControllerId(SmolStr);

impl ControllerId {
    #[must_use]
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn as_smol_str(&self) -> &SmolStr {
        &self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Borrow<str> for ControllerId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for ControllerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<SmolStr> for ControllerId {
    fn from(value: SmolStr) -> Self {
        Self(value)
    }
}

/// Per-controller connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of registering a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    Inserted,
    Updated,
    Unchanged,
}

/// A known remote controller.
pub struct Controller {
    id: ControllerId,
    name: SmolStr,
    address: SmolStr,
    state: ConnectionState,
    transitions: u64,
    connected_since_ms: Option<u64>,
    runtime_status: Option<RuntimeStatus>,
    pub(crate) attempt: Option<AttemptId>,
    pub(crate) connection: Option<Box<dyn Connection>>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("attempt", &self.attempt)
            .field("has_connection", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}

impl Controller {
    fn new(id: ControllerId, name: SmolStr, address: SmolStr) -> Self {
        Self {
            id,
            name,
            address,
            state: ConnectionState::Disconnected,
            transitions: 0,
            connected_since_ms: None,
            runtime_status: None,
            attempt: None,
            connection: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ControllerId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub fn address(&self) -> &str {
        self.address.as_str()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Number of state transitions since registration.
    #[must_use]
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    #[must_use]
    pub fn connected_since_ms(&self) -> Option<u64> {
        self.connected_since_ms
    }

    #[must_use]
    pub fn runtime_status(&self) -> Option<&RuntimeStatus> {
        self.runtime_status.as_ref()
    }

    #[must_use]
    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState, now_ms: u64) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.transitions = self.transitions.saturating_add(1);
        self.connected_since_ms = match state {
            ConnectionState::Connected => Some(now_ms),
            _ => None,
        };
    }

    pub(crate) fn set_runtime_status(&mut self, status: RuntimeStatus) {
        self.runtime_status = Some(status);
    }

    /// Drop the attempt and the connection handle without closing it.
    pub(crate) fn take_connection(&mut self) -> Option<Box<dyn Connection>> {
        self.attempt = None;
        self.connection.take()
    }
}

/// Registration-ordered controller table.
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    controllers: IndexMap<ControllerId, Controller>,
}

impl ControllerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a controller, or update name/address in place.
    ///
    /// Connection state and the live handle are preserved on update.
    pub fn add(
        &mut self,
        id: impl Into<ControllerId>,
        name: impl Into<SmolStr>,
        address: impl Into<SmolStr>,
    ) -> RegistryChange {
        let id = id.into();
        let name = name.into();
        let address = address.into();
        if let Some(existing) = self.controllers.get_mut(&id) {
            if existing.name == name && existing.address == address {
                return RegistryChange::Unchanged;
            }
            existing.name = name;
            existing.address = address;
            return RegistryChange::Updated;
        }
        self.controllers
            .insert(id.clone(), Controller::new(id, name, address));
        RegistryChange::Inserted
    }

    /// Whether the controller is connected; false for unknown ids.
    #[must_use]
    pub fn status(&self, id: &str) -> bool {
        self.controllers
            .get(id)
            .is_some_and(Controller::is_connected)
    }

    #[must_use]
    pub fn state(&self, id: &str) -> Option<ConnectionState> {
        self.controllers.get(id).map(Controller::state)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Controller> {
        self.controllers.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Controller> {
        self.controllers.get_mut(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.controllers.contains_key(id)
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Controller> {
        self.controllers.shift_remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Controller> {
        self.controllers.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Ids currently in `state`, in registration order.
    #[must_use]
    pub fn ids_in_state(&self, state: ConnectionState) -> Vec<ControllerId> {
        self.controllers
            .values()
            .filter(|controller| controller.state == state)
            .map(|controller| controller.id.clone())
            .collect()
    }

    /// True when at least one controller is connected.
    #[must_use]
    pub fn any_connected(&self) -> bool {
        self.controllers.values().any(Controller::is_connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_inserts_updates_and_skips_noops() {
        let mut registry = ControllerRegistry::new();
        assert_eq!(
            registry.add("A", "Line 1", "10.0.0.5"),
            RegistryChange::Inserted
        );
        assert_eq!(
            registry.add("A", "Line 1", "10.0.0.5"),
            RegistryChange::Unchanged
        );
        assert_eq!(
            registry.add("A", "Line 1", "10.0.0.6"),
            RegistryChange::Updated
        );
        let controller = registry.get("A").unwrap();
        assert_eq!(controller.address(), "10.0.0.6");
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn update_preserves_connection_state() {
        let mut registry = ControllerRegistry::new();
        registry.add("A", "Line 1", "10.0.0.5");
        registry
            .get_mut("A")
            .unwrap()
            .set_state(ConnectionState::Connected, 10);
        registry.add("A", "Renamed", "10.0.0.5");
        let controller = registry.get("A").unwrap();
        assert_eq!(controller.name(), "Renamed");
        assert!(controller.is_connected());
        assert_eq!(controller.connected_since_ms(), Some(10));
    }

    #[test]
    fn status_is_false_for_unknown_ids() {
        let registry = ControllerRegistry::new();
        assert!(!registry.status("missing"));
        assert_eq!(registry.state("missing"), None);
    }

    #[test]
    fn transitions_count_only_real_changes() {
        let mut registry = ControllerRegistry::new();
        registry.add("A", "A", "host");
        let controller = registry.get_mut("A").unwrap();
        controller.set_state(ConnectionState::Connecting, 0);
        controller.set_state(ConnectionState::Connecting, 0);
        controller.set_state(ConnectionState::Connected, 5);
        controller.set_state(ConnectionState::Disconnected, 9);
        assert_eq!(controller.transitions(), 3);
        assert_eq!(controller.connected_since_ms(), None);
    }

    #[test]
    fn any_connected_folds_over_entries() {
        let mut registry = ControllerRegistry::new();
        registry.add("A", "A", "a");
        registry.add("B", "B", "b");
        assert!(!registry.any_connected());
        registry
            .get_mut("B")
            .unwrap()
            .set_state(ConnectionState::Connected, 0);
        assert!(registry.any_connected());
        assert_eq!(
            registry.ids_in_state(ConnectionState::Disconnected),
            vec![ControllerId::from("A")]
        );
    }
}
