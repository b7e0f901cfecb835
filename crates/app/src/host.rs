//! Demo host session
//!
//! Walks the service through what the game does: create it, log in, create a
//! session, then destroy it with the memory going back to the allocator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use lobbynet_core::{HostAllocator, HostUiTable, Settings};
use lobbynet_net::{LobbyCallbacks, LobbyResponse, ResultCode, RoomsCallback, RoomsResponse};
use lobbynet_service::{create_custom_net_service, NetService, SERVICE};
use tracing::info;
use uuid::Uuid;

use crate::cli::HostArgs;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result codes of answered lobby requests, by request id, and of the last
/// room creation
#[derive(Default)]
struct Replies {
    lobby: Mutex<HashMap<u64, ResultCode>>,
    created: Mutex<Option<ResultCode>>,
}

impl Replies {
    fn lobby(&self, request_id: u64) -> Option<ResultCode> {
        self.lobby
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request_id)
            .copied()
    }

    fn created(&self) -> Option<ResultCode> {
        *self.created.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_lobby(&self, response: &LobbyResponse) {
        self.lobby
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(response.request_id, response.code);
    }

    fn record_created(&self, response: &RoomsResponse) {
        *self.created.lock().unwrap_or_else(PoisonError::into_inner) = Some(response.code);
    }
}

impl LobbyCallbacks for Replies {
    fn on_register_account(&self, response: &LobbyResponse) {
        self.record_lobby(response);
    }

    fn on_login(&self, response: &LobbyResponse) {
        self.record_lobby(response);
    }

    fn on_logoff(&self, response: &LobbyResponse) {
        self.record_lobby(response);
    }
}

impl RoomsCallback for Replies {
    fn on_create_room(&self, response: &RoomsResponse) {
        self.record_created(response);
    }
}

fn poll<T>(timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

pub fn run(
    settings: &Settings,
    allocator: Arc<dyn HostAllocator>,
    ui: &HostUiTable,
    args: &HostArgs,
) -> anyhow::Result<()> {
    let timeout = Duration::from_secs(args.timeout);
    let service = create_custom_net_service(settings, allocator, ui)
        .ok_or_else(|| anyhow!("Could not reach lobby server {}", settings.server_endpoint()))?;
    SERVICE.install(service);

    let result = play(timeout, args);

    if let Some(service) = SERVICE.take() {
        service.destroy(true);
    }
    result
}

fn play(timeout: Duration, args: &HostArgs) -> anyhow::Result<()> {
    let service = SERVICE.get().context("Net service is gone")?;
    let replies = Arc::new(Replies::default());
    SERVICE.add_lobby_callback(replies.clone());
    SERVICE.add_rooms_callback(replies.clone());

    let server = poll(timeout, || service.server_address())
        .context("Lobby server did not accept the connection")?;
    info!(%server, "Connected to lobby server");

    let id = service.register_account(&args.account, &args.password)?;
    match poll(timeout, || replies.lobby(id)) {
        Some(code) if code.is_success() || code == ResultCode::AccountExists => {}
        Some(code) => bail!("Account registration failed: {:?}", code),
        None => bail!("No reply to account registration"),
    }

    let id = service.login(&args.account, &args.password)?;
    match poll(timeout, || replies.lobby(id)) {
        Some(ResultCode::Success) => {}
        Some(code) => bail!("Login failed: {:?}", code),
        None => bail!("No reply to login"),
    }
    poll(timeout, || (!service.logged_account().is_empty()).then_some(()))
        .context("Login was not recorded")?;
    info!(account = %service.logged_account(), "Logged in");

    if service.has_sessions() {
        info!("Host enumeration reports sessions");
    }

    let session = service
        .create_session(&Uuid::new_v4(), &args.room, args.room_password.as_deref())
        .with_context(|| format!("Could not create session '{}'", args.room))?;
    match poll(timeout, || replies.created()) {
        Some(ResultCode::Success) => {}
        Some(code) => bail!("Room '{}' was rejected: {:?}", session.name(), code),
        None => bail!("No reply to creating room '{}'", session.name()),
    }
    let room = service
        .current_room()
        .with_context(|| format!("Server did not confirm room '{}'", session.name()))?;
    info!(room = %room.name, id = %room.id, host = session.is_host(), "Session created");

    service.leave_room()?;
    service.logoff()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobbynet_core::{HeadlessUi, HostUi, TrackingAllocator};
    use lobbynet_net::LobbyServer;
    use lobbynet_service::NetCustomService;

    /// Both session rounds go through the process-wide slot
    static SLOT_USERS: Mutex<()> = Mutex::new(());

    fn args(room: &str) -> HostArgs {
        HostArgs {
            account: "alice".into(),
            password: "password1".into(),
            room: room.into(),
            room_password: None,
            timeout: 10,
        }
    }

    #[test]
    fn test_rejected_room_fails_fast() {
        let _slot = SLOT_USERS.lock().unwrap_or_else(PoisonError::into_inner);
        let server = LobbyServer::start(0).unwrap();
        let mut settings = Settings::default();
        settings.lobby.server.port = server.port();

        let owner =
            NetCustomService::create(&settings, Arc::new(TrackingAllocator::new())).unwrap();
        assert!(poll(Duration::from_secs(10), || owner.server_address()).is_some());
        owner.register_account("bob", "password1").unwrap();
        assert!(poll(Duration::from_secs(10), || (server.account_count() == 1).then_some(())).is_some());
        owner.login("bob", "password1").unwrap();
        assert!(poll(Duration::from_secs(10), || (owner.logged_account() == "bob").then_some(())).is_some());
        assert!(owner.create_session(&Uuid::new_v4(), "Arena", None).is_some());
        assert!(poll(Duration::from_secs(10), || owner.current_room()).is_some());

        let ui: Arc<dyn HostUi> = Arc::new(HeadlessUi::new());
        let started = Instant::now();
        let err = run(
            &settings,
            Arc::new(TrackingAllocator::new()),
            &HostUiTable::uniform(ui),
            &args("Arena"),
        )
        .unwrap_err();

        assert!(err.to_string().contains("RoomExists"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(SERVICE.get().is_none());
        owner.destroy(true);
    }

    #[test]
    fn test_poll_times_out() {
        assert_eq!(poll(Duration::from_millis(50), || None::<()>), None);
        assert_eq!(poll(Duration::from_millis(50), || Some(3)), Some(3));
    }

    #[test]
    fn test_host_session_round() {
        let _slot = SLOT_USERS.lock().unwrap_or_else(PoisonError::into_inner);
        let server = LobbyServer::start(0).unwrap();
        let mut settings = Settings::default();
        settings.lobby.server.port = server.port();
        let allocator = Arc::new(TrackingAllocator::new());
        let ui: Arc<dyn HostUi> = Arc::new(HeadlessUi::new());

        run(&settings, allocator.clone(), &HostUiTable::uniform(ui), &args("Arena")).unwrap();

        assert_eq!(allocator.live_blocks(), 0);
        assert!(SERVICE.get().is_none());
        assert_eq!(server.account_count(), 1);
    }
}
