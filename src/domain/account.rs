use std::collections::BTreeMap;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Identity;

/// All accounts keyed by identity. Ordered so the serialized table is stable.
pub type AccountTable = BTreeMap<Identity, Account>;

const SALT_LEN: usize = 16;

/// Salted SHA-256 of a password. The plaintext is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    salt: String,
    digest: String,
}

impl Credential {
    pub fn new(password: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        Self {
            salt: hex::encode(salt),
            digest: digest(&salt, password),
        }
    }

    pub fn matches(&self, password: &str) -> bool {
        match hex::decode(&self.salt) {
            Ok(salt) => digest(&salt, password) == self.digest,
            Err(_) => false,
        }
    }
}

fn digest(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub identity: Identity,
    pub credential: Credential,
    pub usd_balance: f64,
    pub asset_balance: f64,
}

impl Account {
    pub fn new(
        identity: impl Into<Identity>,
        password: &str,
        usd_balance: f64,
        asset_balance: f64,
    ) -> Self {
        Self {
            identity: identity.into(),
            credential: Credential::new(password),
            usd_balance,
            asset_balance,
        }
    }

    /// Balances after applying the deltas, or the first side that would go
    /// negative. Results that overflow f64 are rejected like non-finite deltas.
    pub fn projected(&self, usd_delta: f64, asset_delta: f64) -> Result<(f64, f64), BalanceError> {
        if !usd_delta.is_finite() || !asset_delta.is_finite() {
            return Err(BalanceError::NonFinite);
        }
        let usd = self.usd_balance + usd_delta;
        let asset = self.asset_balance + asset_delta;
        if !usd.is_finite() || !asset.is_finite() {
            return Err(BalanceError::NonFinite);
        }
        if usd < 0.0 {
            return Err(BalanceError::InsufficientUsd {
                balance: self.usd_balance,
                required: -usd_delta,
            });
        }
        if asset < 0.0 {
            return Err(BalanceError::InsufficientAsset {
                balance: self.asset_balance,
                required: -asset_delta,
            });
        }
        Ok((usd, asset))
    }

    /// Apply both deltas or neither.
    pub fn adjust(&mut self, usd_delta: f64, asset_delta: f64) -> Result<(), BalanceError> {
        let (usd, asset) = self.projected(usd_delta, asset_delta)?;
        self.usd_balance = usd;
        self.asset_balance = asset;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BalanceError {
    InsufficientUsd { balance: f64, required: f64 },
    InsufficientAsset { balance: f64, required: f64 },
    NonFinite,
}

impl std::fmt::Display for BalanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceError::InsufficientUsd { balance, required } => {
                write!(f, "USD balance {:.2}, required {:.2}", balance, required)
            }
            BalanceError::InsufficientAsset { balance, required } => {
                write!(f, "asset balance {:.8}, required {:.8}", balance, required)
            }
            BalanceError::NonFinite => write!(f, "balance change is not a finite number"),
        }
    }
}

impl std::error::Error for BalanceError {}
