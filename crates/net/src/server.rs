//! Lobby server
//!
//! Accounts and rooms for lobby clients. Runs on its own [`NetworkPeer`];
//! request handling is a peer plugin, so the server speaks exactly the
//! protocol the clients do. State is in memory only.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::lobby::{MIN_ACCOUNT_NAME, MIN_PASSWORD};
use crate::peer::{lock, NetworkPeer, PeerPlugin, PeerSender};
use crate::protocol::{
    LobbyMessage, LobbyRequest, LobbyResponse, Message, ResultCode, RoomDescriptor, RoomsMessage,
    RoomsRequest, RoomsResponse,
};

/// Maximum number of connected peers
pub const MAX_PEERS: usize = 32;

struct Account {
    password_hash: String,
}

struct Room {
    id: Uuid,
    name: String,
    owner: String,
    members: Vec<String>,
    password: Option<String>,
    created_at: DateTime<Utc>,
}

impl Room {
    fn descriptor(&self) -> RoomDescriptor {
        RoomDescriptor {
            id: self.id,
            name: self.name.clone(),
            owner: self.owner.clone(),
            members: self.members.clone(),
            has_password: self.password.is_some(),
            created_at: self.created_at,
        }
    }
}

/// Server state shared across connections
#[derive(Default)]
struct ServerState {
    accounts: HashMap<String, Account>,
    /// Logged-in account per connection
    logins: HashMap<SocketAddr, String>,
    /// Rooms in creation order
    rooms: Vec<Room>,
}

impl ServerState {
    fn is_logged_in(&self, from: SocketAddr, user: &str) -> bool {
        self.logins.get(&from).map(String::as_str) == Some(user)
    }

    fn room_of(&self, user: &str) -> Option<usize> {
        self.rooms
            .iter()
            .position(|r| r.members.iter().any(|m| m == user))
    }

    /// Remove `user` from their room. Empty rooms are closed, ownership moves
    /// to the longest-standing member.
    fn leave_room(&mut self, user: &str) -> Option<RoomDescriptor> {
        let index = self.room_of(user)?;
        let room = &mut self.rooms[index];
        room.members.retain(|m| m != user);

        if room.members.is_empty() {
            let room = self.rooms.remove(index);
            debug!(room = %room.name, "Room closed");
            return Some(room.descriptor());
        }
        if room.owner == user {
            room.owner = room.members[0].clone();
        }
        Some(room.descriptor())
    }
}

fn hash_password(password: &str) -> Option<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .ok()
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Request handler plugin
#[derive(Default)]
struct RequestHandler {
    state: Mutex<ServerState>,
    sender: OnceLock<PeerSender>,
}

impl RequestHandler {
    fn reply(&self, to: SocketAddr, msg: Message) {
        let Some(sender) = self.sender.get() else {
            return;
        };
        if let Err(e) = sender.send(to, msg) {
            debug!(to = %to, error = %e, "Failed to queue reply");
        }
    }

    fn handle_lobby(&self, from: SocketAddr, request: &LobbyRequest) -> (ResultCode, Option<String>) {
        match request {
            LobbyRequest::RegisterAccount { name, password } => {
                if name.len() < MIN_ACCOUNT_NAME || password.len() < MIN_PASSWORD {
                    return (ResultCode::InvalidInput, None);
                }
                if lock(&self.state).accounts.contains_key(name) {
                    return (ResultCode::AccountExists, None);
                }

                let Some(password_hash) = hash_password(password) else {
                    error!(account = %name, "Failed to hash password");
                    return (ResultCode::InvalidInput, None);
                };

                let mut state = lock(&self.state);
                if state.accounts.contains_key(name) {
                    return (ResultCode::AccountExists, None);
                }
                state
                    .accounts
                    .insert(name.clone(), Account { password_hash });
                info!(account = %name, "Account registered");
                (ResultCode::Success, Some(name.clone()))
            }
            LobbyRequest::Login { name, password } => {
                let password_hash = {
                    let state = lock(&self.state);
                    if state.logins.contains_key(&from) || state.logins.values().any(|n| n == name) {
                        return (ResultCode::AlreadyLoggedIn, Some(name.clone()));
                    }
                    match state.accounts.get(name) {
                        Some(account) => account.password_hash.clone(),
                        None => return (ResultCode::UnknownAccount, Some(name.clone())),
                    }
                };

                if !verify_password(password, &password_hash) {
                    return (ResultCode::InvalidPassword, Some(name.clone()));
                }

                let mut state = lock(&self.state);
                if state.logins.values().any(|n| n == name) {
                    return (ResultCode::AlreadyLoggedIn, Some(name.clone()));
                }
                state.logins.insert(from, name.clone());
                info!(account = %name, addr = %from, "Logged in");
                (ResultCode::Success, Some(name.clone()))
            }
            LobbyRequest::Logoff => {
                let mut state = lock(&self.state);
                match state.logins.remove(&from) {
                    Some(name) => {
                        state.leave_room(&name);
                        info!(account = %name, "Logged off");
                        (ResultCode::Success, Some(name))
                    }
                    None => (ResultCode::NotLoggedIn, None),
                }
            }
        }
    }

    fn handle_rooms(
        &self,
        from: SocketAddr,
        request: &RoomsRequest,
    ) -> (ResultCode, Option<RoomDescriptor>, Vec<RoomDescriptor>) {
        let mut state = lock(&self.state);

        match request {
            RoomsRequest::CreateRoom {
                user,
                name,
                password,
            } => {
                if !state.is_logged_in(from, user) {
                    return (ResultCode::NotLoggedIn, None, Vec::new());
                }
                if name.trim().is_empty() {
                    return (ResultCode::InvalidInput, None, Vec::new());
                }
                if state.rooms.iter().any(|r| &r.name == name) {
                    return (ResultCode::RoomExists, None, Vec::new());
                }
                if state.room_of(user).is_some() {
                    return (ResultCode::AlreadyInRoom, None, Vec::new());
                }

                let room = Room {
                    id: Uuid::new_v4(),
                    name: name.clone(),
                    owner: user.clone(),
                    members: vec![user.clone()],
                    password: password.clone(),
                    created_at: Utc::now(),
                };
                let descriptor = room.descriptor();
                state.rooms.push(room);
                info!(room = %name, owner = %user, "Room created");
                (ResultCode::Success, Some(descriptor), Vec::new())
            }
            RoomsRequest::SearchRooms { user } => {
                if !state.is_logged_in(from, user) {
                    return (ResultCode::NotLoggedIn, None, Vec::new());
                }
                let rooms = state.rooms.iter().map(Room::descriptor).collect();
                (ResultCode::Success, None, rooms)
            }
            RoomsRequest::JoinRoom {
                user,
                name,
                password,
            } => {
                if !state.is_logged_in(from, user) {
                    return (ResultCode::NotLoggedIn, None, Vec::new());
                }
                if state.room_of(user).is_some() {
                    return (ResultCode::AlreadyInRoom, None, Vec::new());
                }
                let Some(room) = state.rooms.iter_mut().find(|r| &r.name == name) else {
                    return (ResultCode::RoomNotFound, None, Vec::new());
                };
                if room.password.is_some() && room.password != *password {
                    return (ResultCode::RoomPasswordMismatch, None, Vec::new());
                }
                room.members.push(user.clone());
                info!(room = %name, user = %user, "Joined room");
                (ResultCode::Success, Some(room.descriptor()), Vec::new())
            }
            RoomsRequest::LeaveRoom { user } => {
                if !state.is_logged_in(from, user) {
                    return (ResultCode::NotLoggedIn, None, Vec::new());
                }
                match state.leave_room(user) {
                    Some(room) => (ResultCode::Success, Some(room), Vec::new()),
                    None => (ResultCode::NotInRoom, None, Vec::new()),
                }
            }
        }
    }
}

impl PeerPlugin for RequestHandler {
    fn on_attach(&self, sender: PeerSender) {
        let _ = self.sender.set(sender);
    }

    fn on_message(&self, from: SocketAddr, msg: &Message) -> bool {
        match msg {
            Message::Lobby(LobbyMessage::Request {
                request_id,
                request,
            }) => {
                let (code, account) = self.handle_lobby(from, request);
                let response = LobbyResponse {
                    request_id: *request_id,
                    op: request.op(),
                    code,
                    account,
                };
                self.reply(from, Message::Lobby(LobbyMessage::Response(response)));
                true
            }
            Message::Rooms(RoomsMessage::Request {
                request_id,
                request,
            }) => {
                let (code, room, rooms) = self.handle_rooms(from, request);
                let response = RoomsResponse {
                    request_id: *request_id,
                    op: request.op(),
                    code,
                    room,
                    rooms,
                };
                self.reply(from, Message::Rooms(RoomsMessage::Response(response)));
                true
            }
            _ => false,
        }
    }

    fn on_closed_connection(&self, address: SocketAddr) {
        let mut state = lock(&self.state);
        if let Some(name) = state.logins.remove(&address) {
            state.leave_room(&name);
            info!(account = %name, "Logged off on disconnect");
        }
    }
}

/// Lobby server handle
pub struct LobbyServer {
    peer: NetworkPeer,
    handler: Arc<RequestHandler>,
}

impl LobbyServer {
    /// Start a new server on the given port
    pub fn start(port: u16) -> Result<Self> {
        Self::start_with_capacity(port, MAX_PEERS)
    }

    /// Start a server that accepts at most `max_peers` clients
    pub fn start_with_capacity(port: u16, max_peers: usize) -> Result<Self> {
        let peer = NetworkPeer::startup(port, max_peers)?;
        let handler = Arc::new(RequestHandler::default());
        peer.attach_plugin(handler.clone());

        info!(addr = %peer.local_addr(), "Lobby server started");
        Ok(Self { peer, handler })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.peer.local_addr()
    }

    pub fn port(&self) -> u16 {
        self.peer.local_addr().port()
    }

    pub fn connection_count(&self) -> usize {
        self.peer.connection_count()
    }

    /// Rooms in creation order
    pub fn rooms(&self) -> Vec<RoomDescriptor> {
        lock(&self.handler.state)
            .rooms
            .iter()
            .map(Room::descriptor)
            .collect()
    }

    /// Accounts currently logged in
    pub fn logged_in(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.handler.state)
            .logins
            .values()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn account_count(&self) -> usize {
        lock(&self.handler.state).accounts.len()
    }

    /// Report a server-side error to every connected client
    pub fn broadcast_error(&self, reason: &str) -> usize {
        warn!(reason, "Broadcasting server error");
        self.peer.sender().broadcast(&Message::ServerError {
            reason: reason.to_string(),
        })
    }

    /// Block the calling thread until Ctrl-C
    pub fn run_until_ctrl_c(&self) -> Result<()> {
        match self.peer.block_on(tokio::signal::ctrl_c()) {
            Some(result) => Ok(result?),
            None => Ok(()),
        }
    }

    /// Shutdown the server
    pub fn shutdown(&mut self) {
        self.peer.shutdown();
        info!("Lobby server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::{LobbyCallbacks, LobbyClient, LobbyMessageFactory};
    use crate::peer::tests::{wait_until, Recorder};
    use crate::peer::PacketKind;
    use crate::protocol::{LobbyOp, RoomsOp};
    use crate::rooms::{RoomsCallback, RoomsClient};

    #[derive(Default)]
    struct Results {
        lobby: Mutex<Vec<LobbyResponse>>,
        rooms: Mutex<Vec<RoomsResponse>>,
    }

    impl Results {
        fn lobby_code(&self, op: LobbyOp) -> Option<ResultCode> {
            lock(&self.lobby)
                .iter()
                .rev()
                .find(|r| r.op == op)
                .map(|r| r.code)
        }

        fn rooms_response(&self, op: RoomsOp) -> Option<RoomsResponse> {
            lock(&self.rooms).iter().rev().find(|r| r.op == op).cloned()
        }

        fn clear(&self) {
            lock(&self.lobby).clear();
            lock(&self.rooms).clear();
        }
    }

    impl LobbyCallbacks for Results {
        fn on_register_account(&self, response: &LobbyResponse) {
            lock(&self.lobby).push(response.clone());
        }
        fn on_login(&self, response: &LobbyResponse) {
            lock(&self.lobby).push(response.clone());
        }
        fn on_logoff(&self, response: &LobbyResponse) {
            lock(&self.lobby).push(response.clone());
        }
    }

    impl RoomsCallback for Results {
        fn on_create_room(&self, response: &RoomsResponse) {
            lock(&self.rooms).push(response.clone());
        }
        fn on_search_rooms(&self, response: &RoomsResponse) {
            lock(&self.rooms).push(response.clone());
        }
        fn on_join_room(&self, response: &RoomsResponse) {
            lock(&self.rooms).push(response.clone());
        }
        fn on_leave_room(&self, response: &RoomsResponse) {
            lock(&self.rooms).push(response.clone());
        }
    }

    struct TestClient {
        peer: NetworkPeer,
        lobby: Arc<LobbyClient>,
        rooms: Arc<RoomsClient>,
        results: Arc<Results>,
    }

    impl TestClient {
        fn connect(server: &LobbyServer) -> Self {
            let peer = NetworkPeer::startup(0, 1).unwrap();
            let events = Arc::new(Recorder::default());
            peer.add_callback(events.clone());

            let lobby = Arc::new(LobbyClient::new());
            lobby.set_message_factory(Arc::new(LobbyMessageFactory::new()));
            let rooms = Arc::new(RoomsClient::new());
            let results = Arc::new(Results::default());
            lobby.add_callback_interface(results.clone());
            rooms.add_rooms_callback(results.clone());
            peer.attach_plugin(lobby.clone());
            peer.attach_plugin(rooms.clone());

            peer.connect("127.0.0.1", server.port()).unwrap();
            assert!(wait_until(|| events
                .kinds()
                .contains(&PacketKind::ConnectionRequestAccepted)));
            let server_addr = events
                .address_of(PacketKind::ConnectionRequestAccepted)
                .unwrap();
            lobby.set_server_address(server_addr);
            rooms.set_server_address(server_addr);

            Self {
                peer,
                lobby,
                rooms,
                results,
            }
        }

        fn login(&self, name: &str) {
            self.lobby.register_account(name, "password1").unwrap();
            assert!(wait_until(|| self
                .results
                .lobby_code(LobbyOp::RegisterAccount)
                .is_some()));
            self.lobby.login(name, "password1").unwrap();
            assert!(wait_until(|| self.results.lobby_code(LobbyOp::Login)
                == Some(ResultCode::Success)));
        }
    }

    #[test]
    fn test_server_start() {
        let server = LobbyServer::start(0).unwrap();
        assert!(server.port() > 0);
        assert_eq!(server.connection_count(), 0);
        assert!(server.rooms().is_empty());
    }

    #[test]
    fn test_account_flow() {
        let server = LobbyServer::start(0).unwrap();
        let client = TestClient::connect(&server);

        client.lobby.login("alice", "password1").unwrap();
        assert!(wait_until(|| client.results.lobby_code(LobbyOp::Login)
            == Some(ResultCode::UnknownAccount)));

        client.login("alice");
        assert_eq!(server.logged_in(), vec!["alice".to_string()]);
        assert_eq!(server.account_count(), 1);

        client.results.clear();
        client.lobby.register_account("alice", "password1").unwrap();
        assert!(wait_until(|| client
            .results
            .lobby_code(LobbyOp::RegisterAccount)
            == Some(ResultCode::AccountExists)));

        client.lobby.logoff().unwrap();
        assert!(wait_until(|| client.results.lobby_code(LobbyOp::Logoff)
            == Some(ResultCode::Success)));
        assert!(server.logged_in().is_empty());
        assert_eq!(client.lobby.pending_requests(), 0);
    }

    #[test]
    fn test_wrong_password() {
        let server = LobbyServer::start(0).unwrap();
        let client = TestClient::connect(&server);
        client.login("alice");
        client.lobby.logoff().unwrap();
        assert!(wait_until(|| server.logged_in().is_empty()));

        client.results.clear();
        client.lobby.login("alice", "not-the-password").unwrap();
        assert!(wait_until(|| client.results.lobby_code(LobbyOp::Login)
            == Some(ResultCode::InvalidPassword)));
    }

    #[test]
    fn test_room_lifecycle() {
        let server = LobbyServer::start(0).unwrap();
        let host = TestClient::connect(&server);
        let guest = TestClient::connect(&server);
        host.login("alice");
        guest.login("bob");

        host.rooms.create_room("alice", "Room-1", Some("pw")).unwrap();
        assert!(wait_until(|| host.rooms.current_room().is_some()));
        let room = host.rooms.current_room().unwrap();
        assert_eq!(room.owner, "alice");
        assert!(room.has_password);

        // Name taken
        guest.rooms.create_room("bob", "Room-1", None).unwrap();
        assert!(wait_until(|| guest
            .results
            .rooms_response(RoomsOp::CreateRoom)
            .map(|r| r.code)
            == Some(ResultCode::RoomExists)));

        guest.rooms.join_room("bob", "Room-1", Some("wrong")).unwrap();
        assert!(wait_until(|| guest
            .results
            .rooms_response(RoomsOp::JoinRoom)
            .map(|r| r.code)
            == Some(ResultCode::RoomPasswordMismatch)));

        guest.rooms.join_room("bob", "Room-1", Some("pw")).unwrap();
        assert!(wait_until(|| guest.rooms.current_room().is_some()));
        assert_eq!(server.rooms()[0].members, vec!["alice", "bob"]);

        guest.rooms.search_rooms("bob").unwrap();
        assert!(wait_until(|| guest
            .results
            .rooms_response(RoomsOp::SearchRooms)
            .is_some()));
        let found = guest.results.rooms_response(RoomsOp::SearchRooms).unwrap();
        assert_eq!(found.rooms.len(), 1);

        // Owner leaves, ownership passes on
        host.rooms.leave_room("alice").unwrap();
        assert!(wait_until(|| host.rooms.current_room().is_none()));
        assert_eq!(server.rooms()[0].owner, "bob");

        // Last member gone on disconnect, room closes
        drop(guest);
        assert!(wait_until(|| server.rooms().is_empty()));
        assert!(wait_until(|| server.logged_in() == vec!["alice".to_string()]));
    }

    #[test]
    fn test_rooms_require_login_on_this_connection() {
        let server = LobbyServer::start(0).unwrap();
        let client = TestClient::connect(&server);

        client.rooms.create_room("mallory", "Room-1", None).unwrap();
        assert!(wait_until(|| client
            .results
            .rooms_response(RoomsOp::CreateRoom)
            .map(|r| r.code)
            == Some(ResultCode::NotLoggedIn)));
        assert!(server.rooms().is_empty());
    }

    #[test]
    fn test_broadcast_error_reaches_clients() {
        let server = LobbyServer::start(0).unwrap();
        let client = TestClient::connect(&server);
        let events = Arc::new(Recorder::default());
        client.peer.add_callback(events.clone());

        assert!(wait_until(|| server.connection_count() == 1));
        assert_eq!(server.broadcast_error("maintenance"), 1);
        assert!(wait_until(|| events
            .kinds()
            .contains(&PacketKind::LobbyServerError)));
    }
}
