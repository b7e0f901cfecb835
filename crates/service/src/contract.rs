//! Host session-management contract
//!
//! The shape the host's game loop calls into. Output handles are `Option`s;
//! `None` is what the host sees as a null handle.

use lobbynet_core::StorageBlock;
use uuid::Uuid;

/// A session created or joined through a net service
pub trait NetSession: Send + Sync {
    fn name(&self) -> &str;

    /// True for the session's creator
    fn is_host(&self) -> bool;
}

/// Entry of the host's legacy session enumeration
pub trait NetSessionEnum: Send + Sync {
    fn name(&self) -> &str;
    fn requires_password(&self) -> bool;
}

/// Session-management service as the host sees it
pub trait NetService: Send + Sync {
    /// Whether the legacy enumeration found any sessions
    fn has_sessions(&self) -> bool;

    /// Legacy enumeration: append sessions matching the filter to `sessions`
    fn get_sessions(
        &self,
        sessions: &mut Vec<Box<dyn NetSessionEnum>>,
        app_id: &Uuid,
        ip_address: Option<&str>,
        all_sessions: bool,
        require_password: bool,
    );

    fn create_session(
        &self,
        app_id: &Uuid,
        name: &str,
        password: Option<&str>,
    ) -> Option<Box<dyn NetSession>>;

    fn join_session(
        &self,
        session: &dyn NetSessionEnum,
        password: Option<&str>,
    ) -> Option<Box<dyn NetSession>>;

    /// Tear the service down. With `release_memory` the backing storage goes
    /// back to the host allocator; otherwise it is handed back to the caller.
    fn destroy(&self, release_memory: bool) -> Option<StorageBlock>;
}
