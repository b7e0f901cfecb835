//! Sessions handed to the host
//!
//! A session is a named room plus our role in it. Whether the room exists is
//! the rooms client's business; the session only knows how to ask.

use std::sync::Weak;

use lobbynet_net::RoomDescriptor;

use crate::contract::NetSession;
use crate::service::ServiceShared;

pub struct CustomNetSession {
    name: String,
    host: bool,
    service: Weak<ServiceShared>,
}

impl CustomNetSession {
    pub(crate) fn new(name: &str, host: bool, service: Weak<ServiceShared>) -> Self {
        Self {
            name: name.to_string(),
            host,
            service,
        }
    }

    /// The room behind this session, once the server has confirmed it
    pub fn room(&self) -> Option<RoomDescriptor> {
        let service = self.service.upgrade()?;
        let room = service.current_room()?;
        (room.name == self.name).then_some(room)
    }

    /// False once the service that created the session is destroyed
    pub fn is_service_alive(&self) -> bool {
        self.service
            .upgrade()
            .is_some_and(|service| service.is_usable())
    }
}

impl NetSession for CustomNetSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_host(&self) -> bool {
        self.host
    }
}

impl std::fmt::Debug for CustomNetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomNetSession")
            .field("name", &self.name)
            .field("host", &self.host)
            .finish()
    }
}
