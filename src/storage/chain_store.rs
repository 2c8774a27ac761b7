use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::{Block, Chain, TransactionRecord};

use super::{files, StorageError};

/// File-backed owner of the in-memory chain.
///
/// The file is a JSON array of blocks including their stored hashes. Loading
/// trusts those hashes; integrity is checked separately with `Chain::verify`.
pub struct ChainStore {
    path: PathBuf,
    persist_timeout: Duration,
    chain: Chain,
}

impl ChainStore {
    /// Load the chain, or create and persist a genesis chain if no file exists.
    pub async fn open(path: impl Into<PathBuf>, persist_timeout: Duration) -> Result<Self, StorageError> {
        let path = path.into();
        match Self::load(&path).await? {
            Some(chain) => {
                info!(path = %path.display(), blocks = chain.len(), "Loaded chain");
                Ok(Self {
                    path,
                    persist_timeout,
                    chain,
                })
            }
            None => {
                let store = Self {
                    path,
                    persist_timeout,
                    chain: Chain::genesis(),
                };
                store.flush().await?;
                info!(path = %store.path.display(), genesis = %store.chain.tip_hash(), "Created genesis chain");
                Ok(store)
            }
        }
    }

    /// Read the chain file without touching any store state.
    pub async fn load(path: &Path) -> Result<Option<Chain>, StorageError> {
        let Some(bytes) = files::read_optional(path).await? else {
            return Ok(None);
        };
        let blocks: Vec<Block> =
            serde_json::from_slice(&bytes).map_err(|source| StorageError::Malformed {
                path: path.to_path_buf(),
                what: "chain",
                source,
            })?;
        Chain::from_blocks(blocks)
            .map(Some)
            .map_err(|source| StorageError::CorruptChain {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Replace the in-memory chain with the file's contents. Unlike the
    /// first open, a missing file is an error: the cache is kept as is.
    pub async fn reload(&mut self) -> Result<(), StorageError> {
        match Self::load(&self.path).await? {
            Some(chain) => {
                debug!(blocks = chain.len(), "Reloaded chain");
                self.chain = chain;
                Ok(())
            }
            None => {
                warn!(path = %self.path.display(), "Chain file missing on reload");
                Err(StorageError::io(
                    &self.path,
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ))
            }
        }
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        let document = self.encode()?;
        files::write_atomic(&self.path, &document, self.persist_timeout).await
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec_pretty(self.chain.blocks()).map_err(|source| StorageError::Serialization {
            what: "chain",
            source,
        })
    }

    pub fn append(&mut self, transactions: Vec<TransactionRecord>) -> &Block {
        self.chain.append(transactions)
    }

    /// Undo appends past `len` that were never committed.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.chain.truncate(len);
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn persist_timeout(&self) -> Duration {
        self.persist_timeout
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}
