//! Server link shared by the protocol plugins
//!
//! A plugin learns its [`PeerSender`] when attached and the lobby server's
//! address when the connection is accepted. Requests can only go out once
//! both are known.

use std::net::SocketAddr;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::peer::{lock, PeerSender};
use crate::protocol::Message;

#[derive(Default)]
pub(crate) struct ServerLink {
    sender: Mutex<Option<PeerSender>>,
    server_address: Mutex<Option<SocketAddr>>,
}

impl ServerLink {
    pub(crate) fn attach(&self, sender: PeerSender) {
        *lock(&self.sender) = Some(sender);
    }

    pub(crate) fn detach(&self) {
        lock(&self.sender).take();
    }

    pub(crate) fn is_attached(&self) -> bool {
        lock(&self.sender).is_some()
    }

    pub(crate) fn set_server_address(&self, address: SocketAddr) {
        *lock(&self.server_address) = Some(address);
    }

    pub(crate) fn server_address(&self) -> Option<SocketAddr> {
        *lock(&self.server_address)
    }

    pub(crate) fn is_server(&self, address: SocketAddr) -> bool {
        self.server_address() == Some(address)
    }

    /// Queue a message for the server
    pub(crate) fn send(&self, msg: Message) -> Result<SocketAddr> {
        let to = self.server_address().ok_or(Error::NoServerAddress)?;
        let sender = lock(&self.sender).clone().ok_or(Error::NotConnected)?;
        sender.send(to, msg)?;
        Ok(to)
    }
}
