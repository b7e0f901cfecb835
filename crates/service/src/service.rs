//! Net custom service
//!
//! Owns the peer, the lobby and rooms clients and their callback adapters.
//! All of it lives in one [`Resources`] value behind the service state lock:
//! either everything is there or nothing is. Teardown takes the resources out
//! under the lock and releases them after the lock is dropped, so runtime
//! threads blocked on the lock see an empty service instead of a half-freed
//! one.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lobbynet_core::{HostAllocator, HostUiTable, Settings, StorageBlock, LOBBY_LOG};
use lobbynet_net::{
    LobbyCallbacks, LobbyClient, LobbyMessageFactory, NetworkPeer, PeerCallback, PeerPlugin,
    RoomDescriptor, RoomsCallback, RoomsClient,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::bridge::{EventBridge, LobbyLoggingCallbacks, RoomsLoggingCallback};
use crate::contract::{NetService, NetSession, NetSessionEnum};
use crate::error::{Error, Result};
use crate::session::CustomNetSession;

/// The service peer only ever talks to the lobby server
const MAX_PEER_CONNECTIONS: usize = 1;

/// Message shown by the host when the service cannot be set up
pub const CONNECT_FAILED_MESSAGE: &str = "Failed to connect to lobby server";

pub type ServiceHandle = Arc<NetCustomService>;

/// Resources released by teardown, in release order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    CallbackAdapters,
    RoomService,
    MessageFactory,
    LobbyClient,
    PeerEndpoint,
    Account,
}

pub(crate) struct Resources {
    pub(crate) peer: NetworkPeer,
    pub(crate) lobby_client: Arc<LobbyClient>,
    pub(crate) message_factory: Arc<LobbyMessageFactory>,
    pub(crate) logging_callbacks: Arc<dyn LobbyCallbacks>,
    pub(crate) rooms_client: Arc<RoomsClient>,
    pub(crate) rooms_callback: Arc<dyn RoomsCallback>,
}

impl Resources {
    /// Start the peer and wire the protocol clients onto it
    fn acquire(settings: &Settings, shared: &Arc<ServiceShared>) -> Result<Self> {
        let port = settings.lobby.client.port;
        debug!(target: LOBBY_LOG, "Start lobby peer on port {}", port);
        let peer = NetworkPeer::startup(port, MAX_PEER_CONNECTIONS).map_err(|e| {
            error!(target: LOBBY_LOG, "Failed to start lobby client: {}", e);
            e
        })?;

        debug!(target: LOBBY_LOG, "Create lobby client");
        let lobby_client = Arc::new(LobbyClient::new());
        let message_factory = Arc::new(LobbyMessageFactory::new());
        lobby_client.set_message_factory(message_factory.clone());

        let logging_callbacks: Arc<dyn LobbyCallbacks> =
            Arc::new(LobbyLoggingCallbacks::new(Arc::downgrade(shared)));
        lobby_client.add_callback_interface(logging_callbacks.clone());
        peer.attach_plugin(lobby_client.clone());

        debug!(target: LOBBY_LOG, "Create rooms client");
        let rooms_client = Arc::new(RoomsClient::new());
        peer.attach_plugin(rooms_client.clone());
        let rooms_callback: Arc<dyn RoomsCallback> = Arc::new(RoomsLoggingCallback);
        rooms_client.add_rooms_callback(rooms_callback.clone());

        Ok(Self {
            peer,
            lobby_client,
            message_factory,
            logging_callbacks,
            rooms_client,
            rooms_callback,
        })
    }

    /// Peer running and lobby client able to build requests
    pub(crate) fn is_complete(&self) -> bool {
        self.peer.is_running() && self.lobby_client.has_message_factory()
    }

    /// Release everything in dependency order. Must not be called with the
    /// service state lock held.
    fn release(self, bridge: &Arc<dyn PeerCallback>) -> Vec<Resource> {
        let Self {
            mut peer,
            lobby_client,
            message_factory,
            logging_callbacks,
            rooms_client,
            rooms_callback,
        } = self;
        let mut released = Vec::with_capacity(6);

        peer.remove_callback(bridge);
        lobby_client.remove_callback_interface(&logging_callbacks);
        rooms_client.remove_rooms_callback(&rooms_callback);
        drop(logging_callbacks);
        drop(rooms_callback);
        released.push(Resource::CallbackAdapters);

        let rooms_plugin: Arc<dyn PeerPlugin> = rooms_client;
        peer.detach_plugin(&rooms_plugin);
        drop(rooms_plugin);
        released.push(Resource::RoomService);

        lobby_client.clear_message_factory();
        drop(message_factory);
        released.push(Resource::MessageFactory);

        let lobby_plugin: Arc<dyn PeerPlugin> = lobby_client;
        peer.detach_plugin(&lobby_plugin);
        drop(lobby_plugin);
        released.push(Resource::LobbyClient);

        peer.shutdown();
        drop(peer);
        released.push(Resource::PeerEndpoint);

        released
    }
}

#[derive(Default)]
pub(crate) struct ServiceState {
    pub(crate) resources: Option<Resources>,
    pub(crate) logged_account: String,
    pub(crate) server_address: Option<SocketAddr>,
}

/// State shared between the service and its callbacks
#[derive(Default)]
pub(crate) struct ServiceShared {
    state: Mutex<ServiceState>,
}

impl ServiceShared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_usable(&self) -> bool {
        self.lock_state()
            .resources
            .as_ref()
            .is_some_and(Resources::is_complete)
    }

    pub(crate) fn current_room(&self) -> Option<RoomDescriptor> {
        self.lock_state()
            .resources
            .as_ref()
            .and_then(|r| r.rooms_client.current_room())
    }
}

/// Session-management service backed by the lobby server
pub struct NetCustomService {
    shared: Arc<ServiceShared>,
    bridge: Arc<dyn PeerCallback>,
    allocator: Arc<dyn HostAllocator>,
    storage: Mutex<Option<StorageBlock>>,
}

impl NetCustomService {
    /// Start the peer, connect to the configured lobby server and wire up the
    /// clients. On error nothing stays allocated or bound.
    pub fn create(settings: &Settings, allocator: Arc<dyn HostAllocator>) -> Result<ServiceHandle> {
        debug!(target: LOBBY_LOG, "Creating net service");

        let shared = Arc::new(ServiceShared::default());
        let bridge: Arc<dyn PeerCallback> = Arc::new(EventBridge::new(Arc::downgrade(&shared)));
        let resources = Resources::acquire(settings, &shared)?;

        let size = std::mem::size_of::<NetCustomService>();
        let Some(storage) = allocator.allocate(size) else {
            error!(target: LOBBY_LOG, "Host allocator refused {} bytes for the net service", size);
            resources.release(&bridge);
            return Err(Error::Allocation(size));
        };

        // Installed before connecting so the accept event finds the clients
        resources.peer.add_callback(bridge.clone());
        shared.lock_state().resources = Some(resources);

        let service = Arc::new(Self {
            shared,
            bridge,
            allocator,
            storage: Mutex::new(Some(storage)),
        });

        let server = &settings.lobby.server;
        debug!(target: LOBBY_LOG, "Connecting to lobby server {}:{}", server.ip, server.port);
        let connected = service
            .shared
            .lock_state()
            .resources
            .as_ref()
            .map(|r| r.peer.connect(&server.ip, server.port));
        match connected {
            Some(Ok(address)) => {
                debug!(target: LOBBY_LOG, %address, "Connection attempt started");
                Ok(service)
            }
            Some(Err(e)) => {
                error!(target: LOBBY_LOG, "Failed to connect to lobby server: {}", e);
                service.destroy(true);
                Err(e.into())
            }
            None => Err(Error::Destroyed),
        }
    }

    /// Account of the last successful login, empty when logged off
    pub fn logged_account(&self) -> String {
        self.shared.lock_state().logged_account.clone()
    }

    /// Lobby server address, known once the connection was accepted
    pub fn server_address(&self) -> Option<SocketAddr> {
        self.shared.lock_state().server_address
    }

    /// False after teardown
    pub fn is_usable(&self) -> bool {
        self.shared.is_usable()
    }

    pub fn current_room(&self) -> Option<RoomDescriptor> {
        self.shared.current_room()
    }

    /// The peer callback that routes lifecycle events into this service
    pub fn event_bridge(&self) -> Arc<dyn PeerCallback> {
        self.bridge.clone()
    }

    pub fn add_lobby_callback(&self, callbacks: Arc<dyn LobbyCallbacks>) -> bool {
        self.with_resources(|r| r.lobby_client.add_callback_interface(callbacks))
            .is_some()
    }

    pub fn remove_lobby_callback(&self, callbacks: &Arc<dyn LobbyCallbacks>) -> bool {
        self.with_resources(|r| r.lobby_client.remove_callback_interface(callbacks))
            .unwrap_or(false)
    }

    pub fn add_rooms_callback(&self, callback: Arc<dyn RoomsCallback>) -> bool {
        self.with_resources(|r| r.rooms_client.add_rooms_callback(callback))
            .is_some()
    }

    pub fn remove_rooms_callback(&self, callback: &Arc<dyn RoomsCallback>) -> bool {
        self.with_resources(|r| r.rooms_client.remove_rooms_callback(callback))
            .unwrap_or(false)
    }

    pub fn register_account(&self, name: &str, password: &str) -> Result<u64> {
        self.with_resources(|r| r.lobby_client.register_account(name, password))
            .ok_or(Error::Destroyed)?
            .map_err(Error::from)
    }

    pub fn login(&self, name: &str, password: &str) -> Result<u64> {
        self.with_resources(|r| r.lobby_client.login(name, password))
            .ok_or(Error::Destroyed)?
            .map_err(Error::from)
    }

    pub fn logoff(&self) -> Result<u64> {
        self.with_resources(|r| r.lobby_client.logoff())
            .ok_or(Error::Destroyed)?
            .map_err(Error::from)
    }

    pub fn search_rooms(&self) -> Result<u64> {
        let state = self.shared.lock_state();
        let resources = state.resources.as_ref().ok_or(Error::Destroyed)?;
        Ok(resources.rooms_client.search_rooms(&state.logged_account)?)
    }

    pub fn join_room(&self, name: &str, password: Option<&str>) -> Result<u64> {
        let state = self.shared.lock_state();
        let resources = state.resources.as_ref().ok_or(Error::Destroyed)?;
        Ok(resources
            .rooms_client
            .join_room(&state.logged_account, name, password)?)
    }

    pub fn leave_room(&self) -> Result<u64> {
        let state = self.shared.lock_state();
        let resources = state.resources.as_ref().ok_or(Error::Destroyed)?;
        Ok(resources.rooms_client.leave_room(&state.logged_account)?)
    }

    fn with_resources<T>(&self, f: impl FnOnce(&Resources) -> T) -> Option<T> {
        let state = self.shared.lock_state();
        state.resources.as_ref().map(f)
    }

    /// Take the resources out and release them. Returns what was released,
    /// empty if the service was already torn down.
    fn teardown(&self) -> Vec<Resource> {
        let resources = self.shared.lock_state().resources.take();
        let Some(resources) = resources else {
            return Vec::new();
        };

        let mut released = resources.release(&self.bridge);

        let mut state = self.shared.lock_state();
        state.logged_account.clear();
        state.server_address = None;
        released.push(Resource::Account);
        released
    }
}

impl NetService for NetCustomService {
    fn has_sessions(&self) -> bool {
        debug!(target: LOBBY_LOG, "has_sessions called");
        false
    }

    fn get_sessions(
        &self,
        _sessions: &mut Vec<Box<dyn NetSessionEnum>>,
        app_id: &Uuid,
        ip_address: Option<&str>,
        all_sessions: bool,
        require_password: bool,
    ) {
        debug!(
            target: LOBBY_LOG,
            %app_id, ?ip_address, all_sessions, require_password,
            "get_sessions called"
        );
    }

    fn create_session(
        &self,
        _app_id: &Uuid,
        name: &str,
        password: Option<&str>,
    ) -> Option<Box<dyn NetSession>> {
        debug!(target: LOBBY_LOG, "create_session called. Name '{}'", name);

        let state = self.shared.lock_state();
        let Some(resources) = state.resources.as_ref() else {
            warn!(target: LOBBY_LOG, "create_session on a destroyed service");
            return None;
        };

        match resources
            .rooms_client
            .create_room(&state.logged_account, name, password)
        {
            Ok(request_id) => {
                debug!(target: LOBBY_LOG, request_id, "Create room request sent");
                Some(Box::new(CustomNetSession::new(
                    name,
                    true,
                    Arc::downgrade(&self.shared),
                )))
            }
            Err(e) => {
                error!(target: LOBBY_LOG, "Failed to start room creation: {}", e);
                None
            }
        }
    }

    fn join_session(
        &self,
        session: &dyn NetSessionEnum,
        _password: Option<&str>,
    ) -> Option<Box<dyn NetSession>> {
        debug!(target: LOBBY_LOG, "join_session called. Name '{}'", session.name());
        None
    }

    fn destroy(&self, release_memory: bool) -> Option<StorageBlock> {
        let released = self.teardown();
        if released.is_empty() {
            debug!(target: LOBBY_LOG, "Net service already destroyed");
            return None;
        }
        debug!(target: LOBBY_LOG, ?released, "Net service torn down");

        let storage = self
            .storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if !release_memory {
            return storage;
        }
        if let Some(block) = storage {
            debug!(target: LOBBY_LOG, "Net service frees memory");
            self.allocator.free_non_zero(block);
        }
        None
    }
}

impl Drop for NetCustomService {
    fn drop(&mut self) {
        if self.shared.lock_state().resources.is_some() {
            warn!(target: LOBBY_LOG, "Net service dropped without destroy");
            self.destroy(true);
        } else if let Some(block) = self
            .storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            self.allocator.free_non_zero(block);
        }
    }
}

/// Host entry point: build the service, or tell the user why it failed
pub fn create_custom_net_service(
    settings: &Settings,
    allocator: Arc<dyn HostAllocator>,
    ui: &HostUiTable,
) -> Option<ServiceHandle> {
    match NetCustomService::create(settings, allocator) {
        Ok(service) => Some(service),
        Err(e) => {
            error!(target: LOBBY_LOG, "Failed to create net service: {}", e);
            ui.get(settings.host_variant)
                .show_message_box(CONNECT_FAILED_MESSAGE);
            None
        }
    }
}
