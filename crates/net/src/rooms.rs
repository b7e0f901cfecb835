//! Rooms client
//!
//! Room creation, search, join and leave, attached to the same peer as the
//! lobby client. Requests are validated locally before they go out; a
//! rejected request never reaches the server and leaves no trace.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::error::{Error, Result};
use crate::link::ServerLink;
use crate::peer::{lock, same_object, PeerPlugin, PeerSender};
use crate::protocol::{Message, RoomDescriptor, RoomsMessage, RoomsOp, RoomsRequest, RoomsResponse};

/// Longest accepted room name
pub const MAX_ROOM_NAME: usize = 64;

/// Observer of rooms results. All methods default to no-ops.
pub trait RoomsCallback: Send + Sync {
    fn on_create_room(&self, _response: &RoomsResponse) {}
    fn on_search_rooms(&self, _response: &RoomsResponse) {}
    fn on_join_room(&self, _response: &RoomsResponse) {}
    fn on_leave_room(&self, _response: &RoomsResponse) {}
}

/// Rooms protocol plugin
pub struct RoomsClient {
    link: ServerLink,
    next_id: AtomicU64,
    callbacks: RwLock<Vec<Arc<dyn RoomsCallback>>>,
    pending: Mutex<HashMap<u64, RoomsOp>>,
    current_room: Mutex<Option<RoomDescriptor>>,
}

impl Default for RoomsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomsClient {
    pub fn new() -> Self {
        Self {
            link: ServerLink::default(),
            next_id: AtomicU64::new(1),
            callbacks: RwLock::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            current_room: Mutex::new(None),
        }
    }

    /// Target subsequent requests at `address`
    pub fn set_server_address(&self, address: SocketAddr) {
        debug!(addr = %address, "Rooms server address set");
        self.link.set_server_address(address);
    }

    pub fn server_address(&self) -> Option<SocketAddr> {
        self.link.server_address()
    }

    pub fn is_attached(&self) -> bool {
        self.link.is_attached()
    }

    pub fn add_rooms_callback(&self, callback: Arc<dyn RoomsCallback>) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Returns false if the callback was not registered
    pub fn remove_rooms_callback(&self, callback: &Arc<dyn RoomsCallback>) -> bool {
        let mut list = self
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = list.len();
        list.retain(|c| !same_object(c, callback));
        list.len() != before
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Room we created or joined, as last confirmed by the server
    pub fn current_room(&self) -> Option<RoomDescriptor> {
        lock(&self.current_room).clone()
    }

    /// Forget the current room. The server drops a user from their room on
    /// logoff without a rooms response.
    pub fn clear_current_room(&self) {
        if let Some(room) = lock(&self.current_room).take() {
            debug!(room = %room.name, "Current room cleared");
        }
    }

    pub fn create_room(&self, user: &str, name: &str, password: Option<&str>) -> Result<u64> {
        let name = validate_room_name(name)?;
        self.execute(RoomsRequest::CreateRoom {
            user: validate_user(user)?,
            name,
            password: password.filter(|p| !p.is_empty()).map(str::to_string),
        })
    }

    pub fn search_rooms(&self, user: &str) -> Result<u64> {
        self.execute(RoomsRequest::SearchRooms {
            user: validate_user(user)?,
        })
    }

    pub fn join_room(&self, user: &str, name: &str, password: Option<&str>) -> Result<u64> {
        let name = validate_room_name(name)?;
        self.execute(RoomsRequest::JoinRoom {
            user: validate_user(user)?,
            name,
            password: password.filter(|p| !p.is_empty()).map(str::to_string),
        })
    }

    pub fn leave_room(&self, user: &str) -> Result<u64> {
        self.execute(RoomsRequest::LeaveRoom {
            user: validate_user(user)?,
        })
    }

    fn execute(&self, request: RoomsRequest) -> Result<u64> {
        let op = request.op();
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let msg = Message::Rooms(RoomsMessage::Request {
            request_id,
            request,
        });

        lock(&self.pending).insert(request_id, op);
        match self.link.send(msg) {
            Ok(to) => {
                debug!(request_id, op = ?op, to = %to, "Rooms request sent");
                Ok(request_id)
            }
            Err(e) => {
                lock(&self.pending).remove(&request_id);
                Err(e)
            }
        }
    }

    fn handle_response(&self, response: &RoomsResponse) {
        lock(&self.pending).remove(&response.request_id);

        if response.code.is_success() {
            match response.op {
                RoomsOp::CreateRoom | RoomsOp::JoinRoom => {
                    *lock(&self.current_room) = response.room.clone();
                }
                RoomsOp::LeaveRoom => {
                    lock(&self.current_room).take();
                }
                RoomsOp::SearchRooms => {}
            }
        }

        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            match response.op {
                RoomsOp::CreateRoom => callback.on_create_room(response),
                RoomsOp::SearchRooms => callback.on_search_rooms(response),
                RoomsOp::JoinRoom => callback.on_join_room(response),
                RoomsOp::LeaveRoom => callback.on_leave_room(response),
            }
        }
    }
}

fn validate_user(user: &str) -> Result<String> {
    let user = user.trim();
    if user.is_empty() {
        return Err(Error::InvalidRequest("Not logged in".into()));
    }
    Ok(user.to_string())
}

fn validate_room_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidRequest("Empty room name".into()));
    }
    if name.chars().count() > MAX_ROOM_NAME {
        return Err(Error::InvalidRequest(format!(
            "Room name longer than {} characters",
            MAX_ROOM_NAME
        )));
    }
    Ok(name.to_string())
}

impl PeerPlugin for RoomsClient {
    fn on_attach(&self, sender: PeerSender) {
        self.link.attach(sender);
    }

    fn on_detach(&self) {
        self.link.detach();
    }

    fn on_message(&self, from: SocketAddr, msg: &Message) -> bool {
        match msg {
            Message::Rooms(RoomsMessage::Response(response)) if self.link.is_server(from) => {
                self.handle_response(response);
                true
            }
            _ => false,
        }
    }

    fn on_closed_connection(&self, address: SocketAddr) {
        if self.link.is_server(address) {
            lock(&self.pending).clear();
            lock(&self.current_room).take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResultCode;
    use chrono::Utc;
    use uuid::Uuid;

    fn room(name: &str) -> RoomDescriptor {
        RoomDescriptor {
            id: Uuid::new_v4(),
            name: name.to_string(),
            owner: "alice".to_string(),
            members: vec!["alice".to_string()],
            has_password: false,
            created_at: Utc::now(),
        }
    }

    fn response(op: RoomsOp, code: ResultCode, room: Option<RoomDescriptor>) -> Message {
        Message::Rooms(RoomsMessage::Response(RoomsResponse {
            request_id: 1,
            op,
            code,
            room,
            rooms: Vec::new(),
        }))
    }

    #[test]
    fn test_local_validation() {
        let client = RoomsClient::new();
        client.set_server_address(SocketAddr::from(([127, 0, 0, 1], 61111)));

        assert!(matches!(
            client.create_room("", "Room-1", None),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            client.create_room("alice", "   ", None),
            Err(Error::InvalidRequest(_))
        ));
        let long_name = "x".repeat(MAX_ROOM_NAME + 1);
        assert!(matches!(
            client.create_room("alice", &long_name, None),
            Err(Error::InvalidRequest(_))
        ));
        // Valid request, but the plugin is not attached to a peer
        assert!(matches!(
            client.create_room("alice", "Room-1", None),
            Err(Error::NotConnected)
        ));
        assert_eq!(client.pending_requests(), 0);
    }

    #[test]
    fn test_no_server_address() {
        let client = RoomsClient::new();
        assert!(matches!(
            client.search_rooms("alice"),
            Err(Error::NoServerAddress)
        ));
    }

    #[test]
    fn test_current_room_tracking() {
        let client = RoomsClient::new();
        let server = SocketAddr::from(([127, 0, 0, 1], 61111));
        client.set_server_address(server);

        assert!(client.on_message(
            server,
            &response(RoomsOp::CreateRoom, ResultCode::RoomExists, None)
        ));
        assert!(client.current_room().is_none());

        client.on_message(
            server,
            &response(RoomsOp::CreateRoom, ResultCode::Success, Some(room("Room-1"))),
        );
        assert_eq!(client.current_room().unwrap().name, "Room-1");

        client.on_message(server, &response(RoomsOp::LeaveRoom, ResultCode::Success, None));
        assert!(client.current_room().is_none());
    }

    #[test]
    fn test_server_loss_clears_room() {
        let client = RoomsClient::new();
        let server = SocketAddr::from(([127, 0, 0, 1], 61111));
        client.set_server_address(server);
        client.on_message(
            server,
            &response(RoomsOp::JoinRoom, ResultCode::Success, Some(room("Room-2"))),
        );

        client.on_closed_connection(SocketAddr::from(([127, 0, 0, 1], 4000)));
        assert!(client.current_room().is_some());

        client.on_closed_connection(server);
        assert!(client.current_room().is_none());
    }

    #[test]
    fn test_clear_current_room() {
        let client = RoomsClient::new();
        let server = SocketAddr::from(([127, 0, 0, 1], 61111));
        client.set_server_address(server);
        client.clear_current_room();
        client.on_message(
            server,
            &response(RoomsOp::CreateRoom, ResultCode::Success, Some(room("Room-1"))),
        );

        client.clear_current_room();
        assert!(client.current_room().is_none());
    }
}
