use thiserror::Error;

use crate::domain::{BalanceError, ChainIntegrityError, Identity};
use crate::storage::{AccountError, StorageError};

#[derive(Error, Debug)]
pub enum AppError {
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

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid market price: {0}")]
    InvalidPrice(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Chain integrity violated, appends halted: {0}")]
    ChainIntegrity(ChainIntegrityError),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Persistence failed: {0}")]
    Persistence(StorageError),
}

impl AppError {
    /// Expected outcomes of a request, as opposed to failures of the system.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::AlreadyExists(_)
                | AppError::NotFound(_)
                | AppError::InvalidCredentials
                | AppError::InsufficientFunds { .. }
                | AppError::InvalidIdentity(_)
                | AppError::InvalidAmount(_)
                | AppError::InvalidPrice(_)
        )
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Decryption(reason) => AppError::Decryption(reason),
            other => AppError::Persistence(other),
        }
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::AlreadyExists(identity) => AppError::AlreadyExists(identity),
            AccountError::NotFound(identity) => AppError::NotFound(identity),
            AccountError::InvalidCredentials => AppError::InvalidCredentials,
            AccountError::InsufficientFunds {
                identity,
                shortfall: BalanceError::NonFinite,
            } => AppError::InvalidAmount(format!(
                "{} (resulting balance for {} is out of range)",
                BalanceError::NonFinite,
                identity
            )),
            AccountError::InsufficientFunds {
                identity,
                shortfall,
            } => AppError::InsufficientFunds {
                identity,
                shortfall,
            },
        }
    }
}
