// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::path::Path;

use anyhow::Result;
use tempfile::TempDir;
use tradeledger::application::{Config, LedgerService};

pub const PRICE: f64 = 50.0;

pub fn test_config(dir: &Path) -> Config {
    Config::default().with_data_dir(dir)
}

/// Helper to create a service over a temporary data directory with the
/// market price pinned to `PRICE`
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = open_service(temp_dir.path()).await?;
    Ok((service, temp_dir))
}

/// Open (or reopen) a service over `dir` and pin the price.
pub async fn open_service(dir: &Path) -> Result<LedgerService> {
    let service = LedgerService::open(&test_config(dir)).await?;
    service.price_feed().set_price(PRICE).await?;
    Ok(service)
}

/// Test fixture: registered traders with the default starting balances
pub struct Traders;

impl Traders {
    pub async fn alice(service: &LedgerService) -> Result<()> {
        service.register("alice", "alice-pw").await?;
        Ok(())
    }

    pub async fn alice_and_bob(service: &LedgerService) -> Result<()> {
        Self::alice(service).await?;
        service.register("bob", "bob-pw").await?;
        Ok(())
    }
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}
