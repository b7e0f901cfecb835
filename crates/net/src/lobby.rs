//! Lobby client
//!
//! Account protocol (register, login, logoff) spoken with the lobby server.
//! Attached to a [`crate::NetworkPeer`] as a plugin; results come back on
//! the peer's threads and are fanned out to every registered
//! [`LobbyCallbacks`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::error::{Error, Result};
use crate::link::ServerLink;
use crate::peer::{lock, same_object, PeerPlugin, PeerSender};
use crate::protocol::{LobbyMessage, LobbyOp, LobbyRequest, LobbyResponse, Message};

/// Minimum account name length
pub const MIN_ACCOUNT_NAME: usize = 3;

/// Minimum password length
pub const MIN_PASSWORD: usize = 6;

/// Observer of lobby results. All methods default to no-ops.
pub trait LobbyCallbacks: Send + Sync {
    fn on_register_account(&self, _response: &LobbyResponse) {}
    fn on_login(&self, _response: &LobbyResponse) {}
    fn on_logoff(&self, _response: &LobbyResponse) {}
}

/// Builds lobby request messages, stamping each with a unique request id
#[derive(Debug)]
pub struct LobbyMessageFactory {
    next_id: AtomicU64,
}

impl LobbyMessageFactory {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    pub fn create(&self, request: LobbyRequest) -> (u64, Message) {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        (
            request_id,
            Message::Lobby(LobbyMessage::Request {
                request_id,
                request,
            }),
        )
    }
}

impl Default for LobbyMessageFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Lobby protocol plugin
#[derive(Default)]
pub struct LobbyClient {
    link: ServerLink,
    factory: Mutex<Option<Arc<LobbyMessageFactory>>>,
    callbacks: RwLock<Vec<Arc<dyn LobbyCallbacks>>>,
    pending: Mutex<HashMap<u64, LobbyOp>>,
}

impl LobbyClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_message_factory(&self, factory: Arc<LobbyMessageFactory>) {
        *lock(&self.factory) = Some(factory);
    }

    /// Drop the factory. Requests fail until a new one is set.
    pub fn clear_message_factory(&self) {
        lock(&self.factory).take();
    }

    pub fn has_message_factory(&self) -> bool {
        lock(&self.factory).is_some()
    }

    /// Target subsequent requests at `address`
    pub fn set_server_address(&self, address: SocketAddr) {
        debug!(addr = %address, "Lobby server address set");
        self.link.set_server_address(address);
    }

    pub fn server_address(&self) -> Option<SocketAddr> {
        self.link.server_address()
    }

    pub fn add_callback_interface(&self, callbacks: Arc<dyn LobbyCallbacks>) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callbacks);
    }

    /// Returns false if the callbacks were not registered
    pub fn remove_callback_interface(&self, callbacks: &Arc<dyn LobbyCallbacks>) -> bool {
        let mut list = self
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = list.len();
        list.retain(|c| !same_object(c, callbacks));
        list.len() != before
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Requests sent and not answered yet
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn register_account(&self, name: &str, password: &str) -> Result<u64> {
        if name.trim().len() < MIN_ACCOUNT_NAME {
            return Err(Error::InvalidRequest(format!(
                "Account name must be at least {} characters",
                MIN_ACCOUNT_NAME
            )));
        }
        if password.len() < MIN_PASSWORD {
            return Err(Error::InvalidRequest(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD
            )));
        }
        self.execute(LobbyRequest::RegisterAccount {
            name: name.trim().to_string(),
            password: password.to_string(),
        })
    }

    pub fn login(&self, name: &str, password: &str) -> Result<u64> {
        if name.trim().is_empty() {
            return Err(Error::InvalidRequest("Empty account name".into()));
        }
        self.execute(LobbyRequest::Login {
            name: name.trim().to_string(),
            password: password.to_string(),
        })
    }

    pub fn logoff(&self) -> Result<u64> {
        self.execute(LobbyRequest::Logoff)
    }

    fn execute(&self, request: LobbyRequest) -> Result<u64> {
        let factory = lock(&self.factory)
            .clone()
            .ok_or_else(|| Error::InvalidRequest("No message factory".into()))?;

        let op = request.op();
        let (request_id, msg) = factory.create(request);

        // Registered first: the response may arrive before send returns
        lock(&self.pending).insert(request_id, op);
        match self.link.send(msg) {
            Ok(to) => {
                debug!(request_id, op = ?op, to = %to, "Lobby request sent");
                Ok(request_id)
            }
            Err(e) => {
                lock(&self.pending).remove(&request_id);
                Err(e)
            }
        }
    }

    fn handle_response(&self, response: &LobbyResponse) {
        if lock(&self.pending).remove(&response.request_id).is_none() {
            debug!(request_id = response.request_id, "Response to unknown request");
        }

        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            match response.op {
                LobbyOp::RegisterAccount => callback.on_register_account(response),
                LobbyOp::Login => callback.on_login(response),
                LobbyOp::Logoff => callback.on_logoff(response),
            }
        }
    }
}

impl PeerPlugin for LobbyClient {
    fn on_attach(&self, sender: PeerSender) {
        self.link.attach(sender);
    }

    fn on_detach(&self) {
        self.link.detach();
    }

    fn on_message(&self, from: SocketAddr, msg: &Message) -> bool {
        match msg {
            Message::Lobby(LobbyMessage::Response(response)) if self.link.is_server(from) => {
                self.handle_response(response);
                true
            }
            _ => false,
        }
    }

    fn on_closed_connection(&self, address: SocketAddr) {
        if self.link.is_server(address) {
            lock(&self.pending).clear();
        }
    }
}
