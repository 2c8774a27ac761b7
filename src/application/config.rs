use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::market::PriceRange;
use crate::storage::{SecretKey, StartingBalances, ACCOUNTS_FILE, CHAIN_FILE, MARKET_FILE};

/// Runtime configuration shared by every entry point.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the chain, account and market files
    pub data_dir: PathBuf,
    /// Key for the encrypted account file
    pub secret_key: SecretKey,
    pub starting_balances: StartingBalances,
    pub price_range: PriceRange,
    /// Period of the background price refresh
    pub price_interval: Duration,
    /// Upper bound on each file write
    pub persist_timeout: Duration,
    /// Verify the whole chain when the service opens
    pub verify_on_open: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            secret_key: SecretKey::development(),
            starting_balances: StartingBalances::default(),
            price_range: PriceRange::default(),
            price_interval: Duration::from_secs(10),
            persist_timeout: Duration::from_secs(5),
            verify_on_open: true,
        }
    }
}

impl Config {
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_secret_key(mut self, secret_key: SecretKey) -> Self {
        self.secret_key = secret_key;
        self
    }

    pub fn with_starting_balances(mut self, usd: f64, asset: f64) -> Self {
        self.starting_balances = StartingBalances { usd, asset };
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn chain_path(&self) -> PathBuf {
        self.data_dir.join(CHAIN_FILE)
    }

    pub fn accounts_path(&self) -> PathBuf {
        self.data_dir.join(ACCOUNTS_FILE)
    }

    pub fn market_path(&self) -> PathBuf {
        self.data_dir.join(MARKET_FILE)
    }

    /// Reject settings that would break invariants later on.
    pub fn validate(&self) -> Result<(), String> {
        let StartingBalances { usd, asset } = self.starting_balances;
        if !(usd.is_finite() && usd >= 0.0 && asset.is_finite() && asset >= 0.0) {
            return Err("starting balances must be finite and non-negative".to_string());
        }
        let PriceRange { min, max } = self.price_range;
        if !(min.is_finite() && max.is_finite() && min > 0.0 && min <= max) {
            return Err(format!(
                "price range must satisfy 0 < min <= max (got {} to {})",
                min, max
            ));
        }
        if self.price_interval.is_zero() {
            return Err("price interval must be non-zero".to_string());
        }
        if self.persist_timeout.is_zero() {
            return Err("persist timeout must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.starting_balances.usd, 1000.0);
        assert_eq!(config.starting_balances.asset, 0.0);
        assert_eq!(config.price_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_paths_are_under_data_dir() {
        let config = Config::default().with_data_dir("/tmp/ledger");
        assert_eq!(config.chain_path(), PathBuf::from("/tmp/ledger/blockchain.json"));
        assert_eq!(config.accounts_path(), PathBuf::from("/tmp/ledger/users.dat"));
        assert_eq!(config.market_path(), PathBuf::from("/tmp/ledger/market.json"));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(Config::default()
            .with_starting_balances(-1.0, 0.0)
            .validate()
            .is_err());

        let mut config = Config::default();
        config.price_range = PriceRange {
            min: 70.0,
            max: 30.0,
        };
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.persist_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
