//! Error types for lobbynet core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Unknown host variant: {0}")]
    InvalidVariant(String),

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Logging already initialized")]
    LoggingInitialized,
}

pub type Result<T> = std::result::Result<T, Error>;
