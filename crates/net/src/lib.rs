//! lobbynet network library
//!
//! Peer transport plus the lobby and rooms protocols layered on it.
//!
//! # Architecture
//!
//! - **Peer**: one endpoint with its own runtime; lifecycle events go to
//!   [`PeerCallback`]s, protocol messages to [`PeerPlugin`]s
//! - **Lobby / Rooms**: client plugins for accounts and rooms
//! - **Server**: lobby server built on the same peer
//! - **Protocol**: length-prefixed JSON messages
//!
//! # Usage
//!
//! ```ignore
//! let peer = NetworkPeer::startup(0, 1)?;
//! let lobby = Arc::new(LobbyClient::new());
//! lobby.set_message_factory(Arc::new(LobbyMessageFactory::new()));
//! peer.attach_plugin(lobby.clone());
//! peer.connect("127.0.0.1", DEFAULT_PORT)?;
//! // once ConnectionRequestAccepted arrives:
//! lobby.set_server_address(server_addr);
//! lobby.login("alice", "password1")?;
//! ```

pub mod error;
mod frame;
mod link;
pub mod lobby;
pub mod peer;
pub mod protocol;
pub mod rooms;
pub mod server;

pub use error::{Error, Result};
pub use lobby::{LobbyCallbacks, LobbyClient, LobbyMessageFactory};
pub use peer::{NetworkPeer, PacketKind, PeerCallback, PeerPlugin, PeerSender};
pub use protocol::{
    LobbyOp, LobbyResponse, Message, ResultCode, RoomDescriptor, RoomsOp, RoomsResponse,
};
pub use rooms::{RoomsCallback, RoomsClient};
pub use server::LobbyServer;

/// Default port for lobby servers
pub const DEFAULT_PORT: u16 = 61111;
