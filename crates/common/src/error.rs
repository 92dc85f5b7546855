//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The OS USB stack could not be queried
    #[error("USB error: {0}")]
    Usb(String),

    /// The OS device-metadata database could not be scanned
    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation was requested in a lifecycle state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
