use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Account, AccountTable, BalanceError, Identity};

use super::cipher::{self, SecretKey};
use super::{files, StorageError};

/// Balances given to every newly registered account.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartingBalances {
    pub usd: f64,
    pub asset: f64,
}

impl Default for StartingBalances {
    fn default() -> Self {
        Self {
            usd: 1000.0,
            asset: 0.0,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccountError {
    #[error("Account already exists: {0}")]
    AlreadyExists(Identity),

    #[error("Account not found: {0}")]
    NotFound(Identity),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Insufficient funds for {identity}: {shortfall}")]
    InsufficientFunds {
        identity: Identity,
        shortfall: BalanceError,
    },
}

/// Encrypted, file-backed account table with an in-memory cache.
///
/// Mutating methods only touch the cache; [`AccountStore::flush`] (or the
/// service's commit) makes them durable. [`AccountStore::reload`] discards the
/// cache in favour of the file.
pub struct AccountStore {
    path: PathBuf,
    key: SecretKey,
    starting: StartingBalances,
    persist_timeout: Duration,
    table: AccountTable,
}

impl AccountStore {
    /// Open the store, loading the table if the file exists.
    pub async fn open(
        path: impl Into<PathBuf>,
        key: SecretKey,
        starting: StartingBalances,
        persist_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let mut store = Self {
            path: path.into(),
            key,
            starting,
            persist_timeout,
            table: AccountTable::new(),
        };
        store.reload().await?;
        Ok(store)
    }

    pub async fn reload(&mut self) -> Result<(), StorageError> {
        self.table = Self::load(&self.path, &self.key).await?;
        debug!(path = %self.path.display(), accounts = self.table.len(), "Loaded account table");
        Ok(())
    }

    /// Missing or empty file means no accounts yet. A file that cannot be
    /// decrypted or parsed is an error, never an empty table.
    async fn load(path: &Path, key: &SecretKey) -> Result<AccountTable, StorageError> {
        let Some(bytes) = files::read_optional(path).await? else {
            return Ok(AccountTable::new());
        };
        let encoded = String::from_utf8(bytes)
            .map_err(|_| StorageError::Decryption("account file is not base64 text".into()))?;
        if encoded.trim().is_empty() {
            return Ok(AccountTable::new());
        }

        // CBC has no MAC, so a tampered blob can unpad cleanly and only fail here.
        let plaintext = cipher::open(&encoded, key)?;
        serde_json::from_slice(&plaintext).map_err(|e| {
            StorageError::Decryption(format!("decrypted account table is malformed: {}", e))
        })
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        let document = self.encode()?;
        files::write_atomic(&self.path, &document, self.persist_timeout).await?;
        info!(path = %self.path.display(), accounts = self.table.len(), "Saved account table");
        Ok(())
    }

    /// The encrypted on-disk document for the current cache.
    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        let json = serde_json::to_vec(&self.table).map_err(|source| StorageError::Serialization {
            what: "account table",
            source,
        })?;
        Ok(cipher::seal(&json, &self.key)?.into_bytes())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.table.contains_key(identity)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.table.values()
    }

    pub fn register(&mut self, identity: &str, credential: &str) -> Result<&Account, AccountError> {
        if self.table.contains_key(identity) {
            return Err(AccountError::AlreadyExists(identity.to_string()));
        }
        let account = Account::new(
            identity,
            credential,
            self.starting.usd,
            self.starting.asset,
        );
        Ok(self.table.entry(identity.to_string()).or_insert(account))
    }

    /// Unknown identities and wrong passwords are indistinguishable.
    pub fn authenticate(&self, identity: &str, credential: &str) -> Result<Identity, AccountError> {
        match self.table.get(identity) {
            Some(account) if account.credential.matches(credential) => Ok(account.identity.clone()),
            _ => Err(AccountError::InvalidCredentials),
        }
    }

    /// Apply both deltas or neither.
    pub fn adjust_balance(
        &mut self,
        identity: &str,
        usd_delta: f64,
        asset_delta: f64,
    ) -> Result<&Account, AccountError> {
        let account = self
            .table
            .get_mut(identity)
            .ok_or_else(|| AccountError::NotFound(identity.to_string()))?;
        account
            .adjust(usd_delta, asset_delta)
            .map_err(|shortfall| AccountError::InsufficientFunds {
                identity: identity.to_string(),
                shortfall,
            })?;
        Ok(account)
    }

    pub fn get(&self, identity: &str) -> Result<&Account, AccountError> {
        self.table
            .get(identity)
            .ok_or_else(|| AccountError::NotFound(identity.to_string()))
    }

    /// Put back a previously cloned account, undoing uncommitted changes.
    pub(crate) fn restore(&mut self, account: Account) {
        self.table.insert(account.identity.clone(), account);
    }

    /// Drop an account whose registration was never committed.
    pub(crate) fn forget(&mut self, identity: &str) {
        self.table.remove(identity);
    }
}
