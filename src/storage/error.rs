use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::ChainIntegrityError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed {what} in {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Timed out after {after:?} writing {}", path.display())]
    Timeout { path: PathBuf, after: Duration },

    #[error("Chain file {} is unusable: {source}", path.display())]
    CorruptChain {
        path: PathBuf,
        #[source]
        source: ChainIntegrityError,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}
