//! Service error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] lobbynet_net::Error),

    #[error("Host allocator refused {0} bytes")]
    Allocation(usize),

    #[error("Service already destroyed")]
    Destroyed,
}

pub type Result<T> = std::result::Result<T, Error>;
