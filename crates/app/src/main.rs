//! lobbynet - lobby server and demo host
//!
//! `serve` runs the lobby server. `host` plays the part of the game: it
//! creates the net service, logs in, creates a session and tears the service
//! down again.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lobbynet_core::{HeadlessUi, HostUi, HostUiTable, Settings, TrackingAllocator};
use lobbynet_net::LobbyServer;

mod cli;
mod host;

use cli::{Cli, Command, ServeArgs};

fn main() {
    let cli = Cli::parse();

    let result = load_settings(&cli).and_then(|settings| {
        lobbynet_core::logging::init(&settings).context("Failed to initialize logging")?;
        match cli.command {
            Command::Serve(args) => serve(&settings, args),
            Command::Host(args) => {
                let ui: Arc<dyn HostUi> = Arc::new(HeadlessUi::new());
                let table = HostUiTable::uniform(ui);
                host::run(&settings, Arc::new(TrackingAllocator::new()), &table, &args)
            }
        }
    });

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };
    Settings::load_or_default(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn serve(settings: &Settings, args: ServeArgs) -> anyhow::Result<()> {
    let port = args.port.unwrap_or(settings.lobby.server.port);
    let mut server = LobbyServer::start(port).context("Failed to start lobby server")?;
    tracing::info!(addr = %server.addr(), "Lobby server running, Ctrl-C to stop");
    server.run_until_ctrl_c()?;
    server.shutdown();
    Ok(())
}
