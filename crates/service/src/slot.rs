//! Process-wide service slot
//!
//! The host keeps at most one service alive. Callback registration goes
//! through the slot so callers do not need to hold the service themselves;
//! with the slot empty every registration is a no-op.

use std::sync::{Arc, PoisonError, RwLock};

use lobbynet_net::{LobbyCallbacks, RoomsCallback};

use crate::service::ServiceHandle;

#[derive(Default)]
pub struct ServiceSlot {
    service: RwLock<Option<ServiceHandle>>,
}

impl ServiceSlot {
    pub const fn new() -> Self {
        Self {
            service: RwLock::new(None),
        }
    }

    /// Put `service` in the slot, returning the one it replaces
    pub fn install(&self, service: ServiceHandle) -> Option<ServiceHandle> {
        self.service
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(service)
    }

    pub fn take(&self) -> Option<ServiceHandle> {
        self.service
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn get(&self) -> Option<ServiceHandle> {
        self.service
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_lobby_callback(&self, callbacks: Arc<dyn LobbyCallbacks>) -> bool {
        self.get()
            .is_some_and(|service| service.add_lobby_callback(callbacks))
    }

    pub fn remove_lobby_callback(&self, callbacks: &Arc<dyn LobbyCallbacks>) -> bool {
        self.get()
            .is_some_and(|service| service.remove_lobby_callback(callbacks))
    }

    pub fn add_rooms_callback(&self, callback: Arc<dyn RoomsCallback>) -> bool {
        self.get()
            .is_some_and(|service| service.add_rooms_callback(callback))
    }

    pub fn remove_rooms_callback(&self, callback: &Arc<dyn RoomsCallback>) -> bool {
        self.get()
            .is_some_and(|service| service.remove_rooms_callback(callback))
    }
}

/// Slot used by the host glue
pub static SERVICE: ServiceSlot = ServiceSlot::new();
