//! Log setup
//!
//! Everything logs through `tracing`. Subsystems log with a fixed target
//! (e.g. [`LOBBY_LOG`]) and each such target gets its own append-only file
//! in the log directory. Debug entries reach the files only in debug mode,
//! errors always do. A stderr layer honours `RUST_LOG` as usual.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::error::{Error, Result};
use crate::settings::Settings;

/// Target of the lobby subsystem, written to `lobby.log`
pub const LOBBY_LOG: &str = "lobby";

/// Subsystems with a dedicated log file
pub const SUBSYSTEMS: &[&str] = &[LOBBY_LOG];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Level recorded in subsystem files
pub fn subsystem_level(debug_mode: bool) -> LevelFilter {
    if debug_mode {
        LevelFilter::DEBUG
    } else {
        LevelFilter::ERROR
    }
}

/// File name for a subsystem target
pub fn log_file_name(target: &str) -> String {
    format!("{target}.log")
}

/// One file layer per subsystem
pub fn subsystem_layers(log_dir: &Path, debug_mode: bool) -> Result<Vec<BoxedLayer>> {
    std::fs::create_dir_all(log_dir)?;
    let level = subsystem_level(debug_mode);

    SUBSYSTEMS
        .iter()
        .map(|target| {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_dir.join(log_file_name(target)))?;

            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
                .with_filter(Targets::new().with_target(*target, level));

            Ok(layer.boxed())
        })
        .collect()
}

/// Install the global subscriber
pub fn init(settings: &Settings) -> Result<()> {
    let log_dir = settings.resolved_log_dir()?;
    let files = subsystem_layers(&log_dir, settings.debug_mode)?;

    tracing_subscriber::registry()
        .with(files)
        .with(fmt::layer().with_filter(EnvFilter::from_default_env()))
        .try_init()
        .map_err(|_| Error::LoggingInitialized)?;

    tracing::info!(log_dir = %log_dir.display(), debug = settings.debug_mode, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_entries(debug_mode: bool) -> String {
        let dir = tempfile::tempdir().unwrap();
        let layers = subsystem_layers(dir.path(), debug_mode).unwrap();
        let subscriber = tracing_subscriber::registry().with(layers);

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(target: LOBBY_LOG, "Get peer instance");
            tracing::error!(target: LOBBY_LOG, "Failed to start lobby client");
            tracing::error!(target: "unrelated", "Not a lobby entry");
        });

        std::fs::read_to_string(dir.path().join("lobby.log")).unwrap()
    }

    #[test]
    fn test_debug_mode_records_debug() {
        let text = write_entries(true);
        assert!(text.contains("Get peer instance"));
        assert!(text.contains("Failed to start lobby client"));
        assert!(!text.contains("Not a lobby entry"));
    }

    #[test]
    fn test_errors_always_recorded() {
        let text = write_entries(false);
        assert!(!text.contains("Get peer instance"));
        assert!(text.contains("Failed to start lobby client"));
    }

    #[test]
    fn test_file_names() {
        assert_eq!(log_file_name(LOBBY_LOG), "lobby.log");
    }
}
