//! Crate-wide error type.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::StorageError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Command failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Invalid IPv4 address: {0:?}")]
    InvalidAddress(String),

    #[error("Invalid subnet {subnet:?} for address {address}")]
    InvalidSubnet { address: String, subnet: String },

    #[error("Missing environment variable: {0}")]
    MissingEnv(String),

    #[error("System error: {0}")]
    Nix(#[from] nix::errno::Errno),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
