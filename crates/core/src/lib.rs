//! lobbynet core library
//!
//! Settings, logging, host allocator and host variant dispatch shared by the
//! transport and the session service.

pub mod allocator;
pub mod error;
pub mod logging;
pub mod settings;
pub mod variant;

pub use allocator::{HostAllocator, StorageBlock, TrackingAllocator};
pub use error::{Error, Result};
pub use logging::LOBBY_LOG;
pub use settings::{ClientSettings, LobbySettings, ServerSettings, Settings};
pub use variant::{DialogId, HeadlessUi, HostUi, HostUiTable, HostVariant, VariantTable};
