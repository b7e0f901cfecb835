//! lobbynet session service
//!
//! Implements the host's session-management contract on top of the lobby
//! server. Creating a session creates a room; the host's own session
//! enumeration is not used.
//!
//! # Usage
//!
//! ```ignore
//! let allocator = Arc::new(TrackingAllocator::new());
//! let ui = HostUiTable::uniform(Arc::new(HeadlessUi::new()));
//! let service = create_custom_net_service(&settings, allocator, &ui)?;
//! service.login("alice", "password1")?;
//! let session = service.create_session(&app_id, "Room-1", None);
//! service.destroy(true);
//! ```

pub mod bridge;
pub mod contract;
pub mod error;
pub mod service;
pub mod session;
pub mod slot;

pub use bridge::{EventBridge, LobbyLoggingCallbacks, RoomsLoggingCallback};
pub use contract::{NetService, NetSession, NetSessionEnum};
pub use error::{Error, Result};
pub use service::{
    create_custom_net_service, NetCustomService, Resource, ServiceHandle, CONNECT_FAILED_MESSAGE,
};
pub use session::CustomNetSession;
pub use slot::{ServiceSlot, SERVICE};
