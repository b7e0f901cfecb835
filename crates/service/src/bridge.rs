//! Event bridge and callback adapters
//!
//! The peer, lobby client and rooms client report on the peer's runtime
//! threads. Everything here takes the service state lock before touching
//! service state, and silently drops events once the service is gone or
//! torn down.

use std::net::SocketAddr;
use std::sync::Weak;

use lobbynet_core::LOBBY_LOG;
use lobbynet_net::{
    LobbyCallbacks, LobbyResponse, PacketKind, PeerCallback, RoomsCallback, RoomsResponse,
};
use tracing::{debug, error};

use crate::service::ServiceShared;

/// Single sink for peer lifecycle events
pub struct EventBridge {
    service: Weak<ServiceShared>,
}

impl EventBridge {
    pub(crate) fn new(service: Weak<ServiceShared>) -> Self {
        Self { service }
    }
}

impl PeerCallback for EventBridge {
    fn on_packet_received(&self, kind: PacketKind, address: SocketAddr) {
        let Some(service) = self.service.upgrade() else {
            return;
        };
        let mut state = service.lock_state();
        let Some(resources) = state.resources.as_ref() else {
            return;
        };
        if !resources.is_complete() {
            return;
        }

        match kind {
            PacketKind::DisconnectionNotification => debug!(target: LOBBY_LOG, "Disconnected"),
            PacketKind::AlreadyConnected => debug!(target: LOBBY_LOG, "Already connected"),
            PacketKind::ConnectionLost => debug!(target: LOBBY_LOG, "Connection lost"),
            PacketKind::ConnectionAttemptFailed => {
                debug!(target: LOBBY_LOG, "Connection attempt failed")
            }
            PacketKind::NoFreeIncomingConnections => debug!(target: LOBBY_LOG, "Server is full"),
            PacketKind::LobbyServerError => debug!(target: LOBBY_LOG, "Lobby server error"),
            PacketKind::ConnectionRequestAccepted => {
                debug!(target: LOBBY_LOG, %address, "Connection request accepted, set server address");
                resources.lobby_client.set_server_address(address);
                resources.rooms_client.set_server_address(address);
                state.server_address = Some(address);
            }
            other => debug!(target: LOBBY_LOG, "Packet type {}", other.id()),
        }
    }
}

/// Logs lobby results and keeps the logged-in account current
pub struct LobbyLoggingCallbacks {
    service: Weak<ServiceShared>,
}

impl LobbyLoggingCallbacks {
    pub(crate) fn new(service: Weak<ServiceShared>) -> Self {
        Self { service }
    }

    fn set_account(&self, account: &str) {
        let Some(service) = self.service.upgrade() else {
            return;
        };
        let mut state = service.lock_state();
        if state.resources.is_none() {
            return;
        }
        state.logged_account = account.to_string();
    }

    /// Logoff also takes the user out of their room on the server
    fn clear_account(&self) {
        let Some(service) = self.service.upgrade() else {
            return;
        };
        let mut state = service.lock_state();
        let Some(resources) = state.resources.as_ref() else {
            return;
        };
        resources.rooms_client.clear_current_room();
        state.logged_account.clear();
    }
}

impl LobbyCallbacks for LobbyLoggingCallbacks {
    fn on_register_account(&self, response: &LobbyResponse) {
        if response.code.is_success() {
            debug!(target: LOBBY_LOG, account = ?response.account, "Account registered");
        } else {
            error!(target: LOBBY_LOG, account = ?response.account, code = ?response.code, "Account registration failed");
        }
    }

    fn on_login(&self, response: &LobbyResponse) {
        if response.code.is_success() {
            debug!(target: LOBBY_LOG, account = ?response.account, "Logged in");
            self.set_account(response.account.as_deref().unwrap_or_default());
        } else {
            error!(target: LOBBY_LOG, account = ?response.account, code = ?response.code, "Login failed");
        }
    }

    fn on_logoff(&self, response: &LobbyResponse) {
        debug!(target: LOBBY_LOG, code = ?response.code, "Logoff");
        if response.code.is_success() {
            self.clear_account();
        }
    }
}

/// Logs rooms results
#[derive(Default)]
pub struct RoomsLoggingCallback;

impl RoomsLoggingCallback {
    fn log(&self, what: &str, response: &RoomsResponse) {
        let room = response.room.as_ref().map(|r| r.name.as_str());
        if response.code.is_success() {
            debug!(target: LOBBY_LOG, request_id = response.request_id, room = ?room, "{}", what);
        } else {
            error!(target: LOBBY_LOG, request_id = response.request_id, code = ?response.code, "{} failed", what);
        }
    }
}

impl RoomsCallback for RoomsLoggingCallback {
    fn on_create_room(&self, response: &RoomsResponse) {
        self.log("Create room", response);
    }

    fn on_search_rooms(&self, response: &RoomsResponse) {
        debug!(target: LOBBY_LOG, found = response.rooms.len(), "Search rooms");
    }

    fn on_join_room(&self, response: &RoomsResponse) {
        self.log("Join room", response);
    }

    fn on_leave_room(&self, response: &RoomsResponse) {
        self.log("Leave room", response);
    }
}
