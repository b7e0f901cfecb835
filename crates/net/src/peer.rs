//! Peer transport
//!
//! A [`NetworkPeer`] owns one network identity: a listener on a local port,
//! the connections it accepted or initiated, and the tokio runtime that drives
//! them. The owner talks to it synchronously; everything the network produces
//! comes back through two kinds of registrations:
//!
//! - [`PeerCallback`]s see connection lifecycle events ([`PacketKind`]).
//! - [`PeerPlugin`]s see protocol messages and send through a [`PeerSender`].
//!
//! Both are invoked on runtime worker threads. Events of one connection are
//! produced by a single task, so each registration sees them in order.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Message, PROTOCOL_VERSION};

/// Outbound TCP connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Time the remote end has to answer the handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection outgoing queue length
const SEND_QUEUE: usize = 64;

/// How long shutdown waits for connections to flush their goodbyes
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

const WORKER_THREADS: usize = 2;

/// Connection lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Our outbound connection was accepted
    ConnectionRequestAccepted,
    /// Our outbound connection could not be established
    ConnectionAttemptFailed,
    /// The remote end already had a connection from us
    AlreadyConnected,
    /// A remote peer connected to us
    NewIncomingConnection,
    /// The remote end had no free slots
    NoFreeIncomingConnections,
    /// The remote end closed the connection in an orderly way
    DisconnectionNotification,
    /// The connection dropped without notice
    ConnectionLost,
    /// The lobby server reported an error
    LobbyServerError,
}

impl PacketKind {
    /// Numeric id, stable across releases
    pub fn id(self) -> u8 {
        match self {
            PacketKind::ConnectionRequestAccepted => 16,
            PacketKind::ConnectionAttemptFailed => 17,
            PacketKind::AlreadyConnected => 18,
            PacketKind::NewIncomingConnection => 19,
            PacketKind::NoFreeIncomingConnections => 20,
            PacketKind::DisconnectionNotification => 21,
            PacketKind::ConnectionLost => 22,
            PacketKind::LobbyServerError => 128,
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.id())
    }
}

/// Receives connection lifecycle events
pub trait PeerCallback: Send + Sync {
    fn on_packet_received(&self, kind: PacketKind, address: SocketAddr);
}

/// Protocol handler attached to a peer
pub trait PeerPlugin: Send + Sync {
    /// Called once when attached. The sender stays valid for the peer's lifetime.
    fn on_attach(&self, _sender: PeerSender) {}

    /// Called once when detached
    fn on_detach(&self) {}

    /// Handle a message. Returns true if the message was consumed.
    fn on_message(&self, from: SocketAddr, msg: &Message) -> bool;

    /// A connection went away
    fn on_closed_connection(&self, _address: SocketAddr) {}
}

type ConnectionMap = HashMap<SocketAddr, mpsc::Sender<Message>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Compares the objects behind two trait-object handles
pub(crate) fn same_object<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Cloneable handle for queueing messages on a peer's connections
#[derive(Clone)]
pub struct PeerSender {
    connections: Arc<Mutex<ConnectionMap>>,
}

impl PeerSender {
    /// Queue a message for `to`. Never blocks.
    pub fn send(&self, to: SocketAddr, msg: Message) -> Result<()> {
        let tx = lock(&self.connections)
            .get(&to)
            .cloned()
            .ok_or(Error::NotConnected)?;

        tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::Protocol(format!("Send queue to {} is full", to))
            }
            mpsc::error::TrySendError::Closed(_) => Error::NotConnected,
        })
    }

    /// Queue a message on every connection. Returns how many took it.
    pub fn broadcast(&self, msg: &Message) -> usize {
        let senders: Vec<_> = lock(&self.connections).values().cloned().collect();
        senders
            .into_iter()
            .filter(|tx| tx.try_send(msg.clone()).is_ok())
            .count()
    }

    /// Whether a live connection to `address` exists
    pub fn is_connected(&self, address: SocketAddr) -> bool {
        lock(&self.connections).contains_key(&address)
    }
}

/// State shared between the peer handle and its tasks
struct PeerShared {
    callbacks: RwLock<Vec<Arc<dyn PeerCallback>>>,
    plugins: RwLock<Vec<Arc<dyn PeerPlugin>>>,
    connections: Arc<Mutex<ConnectionMap>>,
    max_connections: usize,
    external_address: Mutex<Option<SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerShared {
    fn dispatch(&self, kind: PacketKind, address: SocketAddr) {
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback.on_packet_received(kind, address);
        }
    }

    fn deliver(&self, from: SocketAddr, msg: &Message) {
        let plugins = self
            .plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if !plugins.iter().any(|p| p.on_message(from, msg)) {
            debug!(from = %from, "Unhandled message");
        }
    }

    fn connection_closed(&self, address: SocketAddr) {
        lock(&self.connections).remove(&address);
        let plugins = self
            .plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for plugin in plugins {
            plugin.on_closed_connection(address);
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}

/// One network endpoint
pub struct NetworkPeer {
    runtime: Option<Runtime>,
    shared: Arc<PeerShared>,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl NetworkPeer {
    /// Start listening on `port` (0 picks one), accepting at most
    /// `max_connections` connections in total.
    pub fn startup(port: u16, max_connections: usize) -> Result<Self> {
        if max_connections == 0 {
            return Err(Error::StartupFailed("max_connections must be positive".into()));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("lobbynet-peer")
            .enable_all()
            .build()
            .map_err(|e| Error::StartupFailed(e.to_string()))?;

        let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = runtime
            .block_on(TcpListener::bind(bind_addr))
            .map_err(|e| Error::StartupFailed(format!("bind {}: {}", bind_addr, e)))?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(PeerShared {
            callbacks: RwLock::new(Vec::new()),
            plugins: RwLock::new(Vec::new()),
            connections: Arc::new(Mutex::new(HashMap::new())),
            max_connections,
            external_address: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = runtime.spawn(accept_loop(
            listener,
            shared.clone(),
            shutdown_tx.clone(),
        ));
        shared.track(handle);

        info!(addr = %local_addr, max_connections, "Peer started");

        Ok(Self {
            runtime: Some(runtime),
            shared,
            local_addr,
            shutdown_tx,
        })
    }

    /// Begin connecting to `host:port`. Returns once the attempt is under way;
    /// the outcome arrives as a [`PacketKind`] event.
    pub fn connect(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let runtime = self.runtime.as_ref().ok_or(Error::NotConnected)?;
        let address = resolve(host, port)?;

        if lock(&self.shared.connections).contains_key(&address) {
            return Err(Error::Rejected(format!("Already connected to {}", address)));
        }

        debug!(addr = %address, "Connecting");
        let handle = runtime.spawn(outbound_task(
            address,
            self.shared.clone(),
            self.shutdown_tx.subscribe(),
        ));
        self.shared.track(handle);
        Ok(address)
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Our address as seen by the last remote end that accepted us
    pub fn external_address(&self) -> Option<SocketAddr> {
        *lock(&self.shared.external_address)
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        lock(&self.shared.connections).len()
    }

    /// Sender for queueing messages on this peer's connections
    pub fn sender(&self) -> PeerSender {
        PeerSender {
            connections: self.shared.connections.clone(),
        }
    }

    pub fn add_callback(&self, callback: Arc<dyn PeerCallback>) {
        self.shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Returns false if the callback was not registered
    pub fn remove_callback(&self, callback: &Arc<dyn PeerCallback>) -> bool {
        let mut callbacks = self
            .shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = callbacks.len();
        callbacks.retain(|c| !same_object(c, callback));
        callbacks.len() != before
    }

    pub fn attach_plugin(&self, plugin: Arc<dyn PeerPlugin>) {
        plugin.on_attach(self.sender());
        self.shared
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(plugin);
    }

    /// Returns false if the plugin was not attached
    pub fn detach_plugin(&self, plugin: &Arc<dyn PeerPlugin>) -> bool {
        let removed = {
            let mut plugins = self
                .shared
                .plugins
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let before = plugins.len();
            plugins.retain(|p| !same_object(p, plugin));
            plugins.len() != before
        };
        if removed {
            plugin.on_detach();
        }
        removed
    }

    /// Drive a future on the peer's runtime from a thread outside it
    pub fn block_on<F: Future>(&self, future: F) -> Option<F::Output> {
        self.runtime.as_ref().map(|rt| rt.block_on(future))
    }

    /// Close every connection and stop the runtime. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        info!(addr = %self.local_addr, "Peer shutting down");
        let _ = self.shutdown_tx.send(());
        let tasks = std::mem::take(&mut *lock(&self.shared.tasks));

        if tokio::runtime::Handle::try_current().is_ok() {
            // Blocking inside an async context would panic
            runtime.shutdown_background();
        } else {
            runtime.block_on(async {
                for task in tasks {
                    let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
                }
            });
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        }

        lock(&self.shared.connections).clear();
    }
}

impl Drop for NetworkPeer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if host.is_empty() || port == 0 {
        return Err(Error::InvalidAddress(format!("{}:{}", host, port)));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::InvalidAddress(format!("{}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| Error::InvalidAddress(format!("{}:{}", host, port)))
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    shared: Arc<PeerShared>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        let handle = tokio::spawn(inbound_task(
                            stream,
                            addr,
                            shared.clone(),
                            shutdown_tx.subscribe(),
                        ));
                        shared.track(handle);
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handshake for a connection a remote peer opened to us
async fn inbound_task(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<PeerShared>,
    shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(&mut reader)).await {
        Ok(Ok(Message::ConnectionRequest { protocol })) if protocol == PROTOCOL_VERSION => {}
        Ok(Ok(Message::ConnectionRequest { protocol })) => {
            warn!(addr = %addr, protocol, "Protocol version mismatch");
            return;
        }
        Ok(Ok(_)) => {
            warn!(addr = %addr, "Expected ConnectionRequest");
            return;
        }
        Ok(Err(e)) => {
            debug!(addr = %addr, error = %e, "Handshake failed");
            return;
        }
        Err(_) => {
            debug!(addr = %addr, "Handshake timed out");
            return;
        }
    }

    let (tx, rx) = mpsc::channel(SEND_QUEUE);
    let refusal = {
        let mut connections = lock(&shared.connections);
        if connections.contains_key(&addr) {
            Some(Message::AlreadyConnected)
        } else if connections.len() >= shared.max_connections {
            Some(Message::NoFreeIncomingConnections)
        } else {
            connections.insert(addr, tx.clone());
            None
        }
    };

    if let Some(refusal) = refusal {
        debug!(addr = %addr, "Refusing connection");
        let _ = write_frame(&mut writer, &refusal).await;
        return;
    }

    if let Err(e) = write_frame(
        &mut writer,
        &Message::ConnectionAccepted { your_address: addr },
    )
    .await
    {
        debug!(addr = %addr, error = %e, "Failed to accept connection");
        shared.connection_closed(addr);
        return;
    }

    info!(addr = %addr, "Peer connected");
    shared.dispatch(PacketKind::NewIncomingConnection, addr);
    run_connection(addr, reader, writer, tx, rx, &shared, shutdown_rx).await;
}

/// Connect and handshake with a remote peer
async fn outbound_task(
    addr: SocketAddr,
    shared: Arc<PeerShared>,
    shutdown_rx: broadcast::Receiver<()>,
) {
    let stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(addr = %addr, error = %e, "Connect failed");
            shared.dispatch(PacketKind::ConnectionAttemptFailed, addr);
            return;
        }
        Err(_) => {
            debug!(addr = %addr, "Connect timed out");
            shared.dispatch(PacketKind::ConnectionAttemptFailed, addr);
            return;
        }
    };

    let (mut reader, mut writer) = tokio::io::split(stream);
    let request = Message::ConnectionRequest {
        protocol: PROTOCOL_VERSION,
    };
    if write_frame(&mut writer, &request).await.is_err() {
        shared.dispatch(PacketKind::ConnectionAttemptFailed, addr);
        return;
    }

    let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(&mut reader)).await;
    match reply {
        Ok(Ok(Message::ConnectionAccepted { your_address })) => {
            *lock(&shared.external_address) = Some(your_address);
        }
        Ok(Ok(Message::AlreadyConnected)) => {
            shared.dispatch(PacketKind::AlreadyConnected, addr);
            return;
        }
        Ok(Ok(Message::NoFreeIncomingConnections)) => {
            shared.dispatch(PacketKind::NoFreeIncomingConnections, addr);
            return;
        }
        _ => {
            shared.dispatch(PacketKind::ConnectionAttemptFailed, addr);
            return;
        }
    }

    let (tx, rx) = mpsc::channel(SEND_QUEUE);
    lock(&shared.connections).insert(addr, tx.clone());

    info!(addr = %addr, "Connection accepted");
    shared.dispatch(PacketKind::ConnectionRequestAccepted, addr);
    run_connection(addr, reader, writer, tx, rx, &shared, shutdown_rx).await;
}

/// Read loop for an established connection
async fn run_connection(
    addr: SocketAddr,
    mut reader: ReadHalf<TcpStream>,
    writer: WriteHalf<TcpStream>,
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
    shared: &Arc<PeerShared>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let writer_handle = tokio::spawn(writer_task(writer, rx));

    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(Message::DisconnectionNotification) => {
                        debug!(addr = %addr, "Remote closed connection");
                        shared.dispatch(PacketKind::DisconnectionNotification, addr);
                        break;
                    }
                    Ok(Message::ServerError { reason }) => {
                        warn!(addr = %addr, reason = %reason, "Server error");
                        shared.dispatch(PacketKind::LobbyServerError, addr);
                    }
                    Ok(Message::Ping) => {
                        let _ = tx.try_send(Message::Pong);
                    }
                    Ok(Message::Pong) => {
                        debug!(addr = %addr, "Received pong");
                    }
                    Ok(msg) => {
                        shared.deliver(addr, &msg);
                    }
                    Err(e) => {
                        debug!(addr = %addr, error = %e, "Connection lost");
                        shared.dispatch(PacketKind::ConnectionLost, addr);
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = tx.try_send(Message::DisconnectionNotification);
                break;
            }
        }
    }

    shared.connection_closed(addr);
    drop(tx);
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, writer_handle).await;
    debug!(addr = %addr, "Connection closed");
}

/// Writer task - drains the outgoing queue into the socket
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::{LobbyMessage, LobbyRequest};
    use std::time::Instant;

    #[derive(Default)]
    pub(crate) struct Recorder {
        events: Mutex<Vec<(PacketKind, SocketAddr)>>,
        messages: Mutex<Vec<(SocketAddr, Message)>>,
    }

    impl Recorder {
        pub(crate) fn kinds(&self) -> Vec<PacketKind> {
            lock(&self.events).iter().map(|(k, _)| *k).collect()
        }

        pub(crate) fn address_of(&self, kind: PacketKind) -> Option<SocketAddr> {
            lock(&self.events)
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, a)| *a)
        }

        fn message_count(&self) -> usize {
            lock(&self.messages).len()
        }
    }

    impl PeerCallback for Recorder {
        fn on_packet_received(&self, kind: PacketKind, address: SocketAddr) {
            lock(&self.events).push((kind, address));
        }
    }

    impl PeerPlugin for Recorder {
        fn on_message(&self, from: SocketAddr, msg: &Message) -> bool {
            lock(&self.messages).push((from, msg.clone()));
            true
        }
    }

    pub(crate) fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    fn connected_pair(max_connections: usize) -> (NetworkPeer, Arc<Recorder>, NetworkPeer, Arc<Recorder>) {
        let server = NetworkPeer::startup(0, max_connections).unwrap();
        let server_rec = Arc::new(Recorder::default());
        server.add_callback(server_rec.clone());
        server.attach_plugin(server_rec.clone());

        let client = NetworkPeer::startup(0, 1).unwrap();
        let client_rec = Arc::new(Recorder::default());
        client.add_callback(client_rec.clone());
        client.attach_plugin(client_rec.clone());

        client
            .connect("127.0.0.1", server.local_addr().port())
            .unwrap();
        assert!(wait_until(|| client_rec
            .kinds()
            .contains(&PacketKind::ConnectionRequestAccepted)));

        (server, server_rec, client, client_rec)
    }

    #[test]
    fn test_startup_picks_port() {
        let peer = NetworkPeer::startup(0, 1).unwrap();
        assert!(peer.local_addr().port() > 0);
        assert!(peer.is_running());
        assert_eq!(peer.connection_count(), 0);
    }

    #[test]
    fn test_startup_fails_on_taken_port() {
        let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        assert!(matches!(
            NetworkPeer::startup(port, 1),
            Err(Error::StartupFailed(_))
        ));
    }

    #[test]
    fn test_connect_rejects_bad_address() {
        let peer = NetworkPeer::startup(0, 1).unwrap();
        assert!(matches!(peer.connect("", 61111), Err(Error::InvalidAddress(_))));
        assert!(matches!(
            peer.connect("127.0.0.1", 0),
            Err(Error::InvalidAddress(_))
        ));
        assert_eq!(peer.connection_count(), 0);
    }

    #[test]
    fn test_connection_accepted_reports_server_address() {
        let (server, server_rec, client, client_rec) = connected_pair(4);

        let expected = SocketAddr::from(([127, 0, 0, 1], server.local_addr().port()));
        assert_eq!(
            client_rec.address_of(PacketKind::ConnectionRequestAccepted),
            Some(expected)
        );
        assert!(wait_until(|| server_rec
            .kinds()
            .contains(&PacketKind::NewIncomingConnection)));
        assert!(client.external_address().is_some());
        assert!(client.sender().is_connected(expected));
    }

    #[test]
    fn test_plugin_receives_messages_in_order() {
        let (server, server_rec, client, _client_rec) = connected_pair(4);
        let to = SocketAddr::from(([127, 0, 0, 1], server.local_addr().port()));

        for request_id in 0..10 {
            client
                .sender()
                .send(
                    to,
                    Message::Lobby(LobbyMessage::Request {
                        request_id,
                        request: LobbyRequest::Logoff,
                    }),
                )
                .unwrap();
            // Answered by the transport itself, never reaches plugins
            client.sender().send(to, Message::Ping).unwrap();
        }
        client
            .sender()
            .send(
                to,
                Message::ServerError {
                    reason: "maintenance".to_string(),
                },
            )
            .unwrap();

        assert!(wait_until(|| server_rec.message_count() == 10));
        let ids: Vec<u64> = lock(&server_rec.messages)
            .iter()
            .filter_map(|(_, msg)| match msg {
                Message::Lobby(LobbyMessage::Request { request_id, .. }) => Some(*request_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
        assert!(wait_until(|| server_rec
            .kinds()
            .contains(&PacketKind::LobbyServerError)));
    }

    #[test]
    fn test_no_free_slots() {
        let (server, _server_rec, _client, _client_rec) = connected_pair(1);

        let late = NetworkPeer::startup(0, 1).unwrap();
        let late_rec = Arc::new(Recorder::default());
        late.add_callback(late_rec.clone());
        late.connect("127.0.0.1", server.local_addr().port()).unwrap();

        assert!(wait_until(|| late_rec
            .kinds()
            .contains(&PacketKind::NoFreeIncomingConnections)));
        assert_eq!(late.connection_count(), 0);
    }

    #[test]
    fn test_connection_attempt_failed() {
        let closed_port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let peer = NetworkPeer::startup(0, 1).unwrap();
        let rec = Arc::new(Recorder::default());
        peer.add_callback(rec.clone());
        peer.connect("127.0.0.1", closed_port).unwrap();

        assert!(wait_until(|| rec
            .kinds()
            .contains(&PacketKind::ConnectionAttemptFailed)));
    }

    #[test]
    fn test_shutdown_notifies_remote() {
        let (mut server, _server_rec, client, client_rec) = connected_pair(4);

        server.shutdown();
        assert!(!server.is_running());

        assert!(wait_until(|| {
            let kinds = client_rec.kinds();
            kinds.contains(&PacketKind::DisconnectionNotification)
                || kinds.contains(&PacketKind::ConnectionLost)
        }));
        assert!(wait_until(|| client.connection_count() == 0));

        // Second shutdown is a no-op
        server.shutdown();
    }

    #[test]
    fn test_remove_callback_and_detach_plugin() {
        let peer = NetworkPeer::startup(0, 1).unwrap();
        let rec = Arc::new(Recorder::default());
        let callback: Arc<dyn PeerCallback> = rec.clone();
        let plugin: Arc<dyn PeerPlugin> = rec.clone();

        peer.add_callback(callback.clone());
        peer.attach_plugin(plugin.clone());

        assert!(peer.remove_callback(&callback));
        assert!(!peer.remove_callback(&callback));
        assert!(peer.detach_plugin(&plugin));
        assert!(!peer.detach_plugin(&plugin));
    }
}
