//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version sent in the connection handshake
pub const PROTOCOL_VERSION: u32 = 1;

/// Outcome of a lobby or rooms request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Success,
    InvalidInput,
    AccountExists,
    UnknownAccount,
    InvalidPassword,
    AlreadyLoggedIn,
    NotLoggedIn,
    RoomExists,
    RoomNotFound,
    RoomPasswordMismatch,
    AlreadyInRoom,
    NotInRoom,
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

/// Lobby request operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LobbyRequest {
    RegisterAccount { name: String, password: String },
    Login { name: String, password: String },
    Logoff,
}

impl LobbyRequest {
    pub fn op(&self) -> LobbyOp {
        match self {
            LobbyRequest::RegisterAccount { .. } => LobbyOp::RegisterAccount,
            LobbyRequest::Login { .. } => LobbyOp::Login,
            LobbyRequest::Logoff => LobbyOp::Logoff,
        }
    }
}

/// Which lobby operation a response belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyOp {
    RegisterAccount,
    Login,
    Logoff,
}

/// Server answer to a lobby request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyResponse {
    pub request_id: u64,
    pub op: LobbyOp,
    pub code: ResultCode,
    pub account: Option<String>,
}

/// Lobby protocol envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LobbyMessage {
    Request { request_id: u64, request: LobbyRequest },
    Response(LobbyResponse),
}

/// Room as advertised by the lobby server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDescriptor {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    pub members: Vec<String>,
    pub has_password: bool,
    pub created_at: DateTime<Utc>,
}

/// Rooms request operations. `user` is the logged-in account name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RoomsRequest {
    CreateRoom {
        user: String,
        name: String,
        password: Option<String>,
    },
    SearchRooms {
        user: String,
    },
    JoinRoom {
        user: String,
        name: String,
        password: Option<String>,
    },
    LeaveRoom {
        user: String,
    },
}

impl RoomsRequest {
    pub fn op(&self) -> RoomsOp {
        match self {
            RoomsRequest::CreateRoom { .. } => RoomsOp::CreateRoom,
            RoomsRequest::SearchRooms { .. } => RoomsOp::SearchRooms,
            RoomsRequest::JoinRoom { .. } => RoomsOp::JoinRoom,
            RoomsRequest::LeaveRoom { .. } => RoomsOp::LeaveRoom,
        }
    }
}

/// Which rooms operation a response belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomsOp {
    CreateRoom,
    SearchRooms,
    JoinRoom,
    LeaveRoom,
}

/// Server answer to a rooms request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomsResponse {
    pub request_id: u64,
    pub op: RoomsOp,
    pub code: ResultCode,
    /// Room created, joined or left
    pub room: Option<RoomDescriptor>,
    /// Search results
    #[serde(default)]
    pub rooms: Vec<RoomDescriptor>,
}

/// Rooms protocol envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoomsMessage {
    Request { request_id: u64, request: RoomsRequest },
    Response(RoomsResponse),
}

/// Network protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// First frame on every outbound connection
    ConnectionRequest { protocol: u32 },

    /// Handshake accepted. Carries the address the remote end sees us as.
    ConnectionAccepted { your_address: SocketAddr },

    /// The remote end already has a connection from us
    AlreadyConnected,

    /// The remote end has no free connection slots
    NoFreeIncomingConnections,

    /// Orderly close
    DisconnectionNotification,

    /// Server-side failure not tied to one request
    ServerError { reason: String },

    Lobby(LobbyMessage),

    Rooms(RoomsMessage),

    /// Ping to keep connection alive
    Ping,

    /// Pong response to ping
    Pong,
}

impl Message {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lobby_request_wire_shape() {
        let msg = Message::Lobby(LobbyMessage::Request {
            request_id: 7,
            request: LobbyRequest::Login {
                name: "alice".to_string(),
                password: "secret".to_string(),
            },
        });

        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "Lobby");
        assert_eq!(json["kind"], "request");
        assert_eq!(json["request"]["op"], "login");

        match Message::from_bytes(&msg.to_bytes().unwrap()).unwrap() {
            Message::Lobby(LobbyMessage::Request { request_id, request }) => {
                assert_eq!(request_id, 7);
                assert_eq!(request.op(), LobbyOp::Login);
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_rooms_response_without_search_results() {
        let json = r#"{"type":"Rooms","kind":"response","request_id":3,"op":"leave_room","code":"not_in_room","room":null}"#;
        match Message::from_bytes(json.as_bytes()).unwrap() {
            Message::Rooms(RoomsMessage::Response(resp)) => {
                assert_eq!(resp.code, ResultCode::NotInRoom);
                assert!(resp.rooms.is_empty());
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_result_code_success() {
        assert!(ResultCode::Success.is_success());
        assert!(!ResultCode::RoomExists.is_success());
    }
}
