use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Lobby server and demo host for the lobbynet session service")]
pub struct Cli {
    /// Settings file. Defaults to lobbynet.toml in the config directory.
    #[arg(long = "config", short = 'c', global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a lobby server until Ctrl-C
    #[command(name = "serve", alias = "server")]
    Serve(ServeArgs),
    /// Drive the session service the way the host game loop does
    #[command(name = "host")]
    Host(HostArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen port. Defaults to the configured lobby server port.
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
}

#[derive(Debug, Args)]
pub struct HostArgs {
    #[arg(long, short = 'a')]
    pub account: String,
    #[arg(long)]
    pub password: String,
    /// Room to create once logged in
    #[arg(long, short = 'r', default_value = "Room-1")]
    pub room: String,
    /// Room password
    #[arg(long)]
    pub room_password: Option<String>,
    /// Seconds to wait for each server reply
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}
