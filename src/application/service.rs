use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::domain::{Action, Block, ChainIntegrityError, Identity, TransactionRecord};
use crate::market::PriceFeed;
use crate::storage::{files, AccountStore, ChainStore};

use super::{AppError, Config};

/// Application service providing the ledger's operations.
/// This is the primary interface for any client (CLI, shell, tests).
///
/// Every operation runs under one lock over both the account table and the
/// chain, from reading current state to persisting the result.
pub struct LedgerService {
    state: Mutex<LedgerState>,
    price: PriceFeed,
}

struct LedgerState {
    accounts: AccountStore,
    chain: ChainStore,
    /// Set when verification fails; blocks further appends.
    halted: Option<ChainIntegrityError>,
}

/// Balances of one account
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceEntry {
    pub identity: Identity,
    pub usd: f64,
    pub asset: f64,
}

/// Result of a committed buy or sell
#[derive(Debug, Clone)]
pub struct TradeResult {
    pub record: TransactionRecord,
    pub block: Block,
    pub balance: BalanceEntry,
}

/// A trade recorded on the chain, with its position
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub block_index: u64,
    pub timestamp: f64,
    pub record: TransactionRecord,
}

/// Outcome of a full chain verification
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub block_count: usize,
    pub tip_hash: String,
    pub error: Option<ChainIntegrityError>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }
}

impl LedgerService {
    /// Assemble a service from already opened stores.
    pub fn new(accounts: AccountStore, chain: ChainStore, price: PriceFeed) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                accounts,
                chain,
                halted: None,
            }),
            price,
        }
    }

    /// Open (or initialize) every store under the configured data directory.
    pub async fn open(config: &Config) -> Result<Self, AppError> {
        config.validate().map_err(AppError::InvalidConfig)?;

        tokio::fs::create_dir_all(config.data_dir())
            .await
            .map_err(|e| crate::storage::StorageError::io(config.data_dir(), e))?;

        if config.secret_key.is_development() {
            warn!("Using the built-in development key for the account file; set TRADELEDGER_SECRET_KEY");
        }

        let accounts = AccountStore::open(
            config.accounts_path(),
            config.secret_key.clone(),
            config.starting_balances,
            config.persist_timeout,
        )
        .await?;
        let chain = ChainStore::open(config.chain_path(), config.persist_timeout).await?;
        let price = PriceFeed::open(
            config.market_path(),
            config.price_range,
            config.persist_timeout,
        )
        .await?;

        let service = Self::new(accounts, chain, price);
        if config.verify_on_open {
            // A failed check halts appends but keeps the service usable for inspection
            service.verify_chain().await;
        }
        Ok(service)
    }

    pub fn price_feed(&self) -> &PriceFeed {
        &self.price
    }

    // ========================
    // Account operations
    // ========================

    pub async fn register(&self, identity: &str, credential: &str) -> Result<(), AppError> {
        let identity = validate_identity(identity)?;
        if credential.is_empty() {
            return Err(AppError::InvalidIdentity(
                "password must not be empty".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        state.accounts.register(identity, credential)?;

        if let Err(e) = state.accounts.flush().await {
            state.accounts.forget(identity);
            error!(identity, error = %e, "Registration rolled back");
            return Err(e.into());
        }

        info!(identity, "Registered account");
        Ok(())
    }

    pub async fn authenticate(&self, identity: &str, credential: &str) -> Result<Identity, AppError> {
        let state = self.state.lock().await;
        match state.accounts.authenticate(identity.trim(), credential) {
            Ok(identity) => {
                debug!(identity = %identity, "Authenticated");
                Ok(identity)
            }
            Err(e) => {
                warn!(identity, "Authentication failed");
                Err(e.into())
            }
        }
    }

    pub async fn balance(&self, identity: &str) -> Result<BalanceEntry, AppError> {
        let state = self.state.lock().await;
        Ok(state.balance_of(identity)?)
    }

    /// Off-chain adjustment: no block is recorded.
    pub async fn deposit(&self, identity: &str, amount: f64) -> Result<BalanceEntry, AppError> {
        validate_amount(amount)?;
        self.adjust_off_chain(identity, amount).await
    }

    /// Off-chain adjustment: no block is recorded.
    pub async fn withdraw(&self, identity: &str, amount: f64) -> Result<BalanceEntry, AppError> {
        validate_amount(amount)?;
        self.adjust_off_chain(identity, -amount).await
    }

    async fn adjust_off_chain(&self, identity: &str, usd_delta: f64) -> Result<BalanceEntry, AppError> {
        let mut state = self.state.lock().await;
        let before = state.accounts.get(identity)?.clone();

        if let Err(e) = state.accounts.adjust_balance(identity, usd_delta, 0.0) {
            info!(identity, usd_delta, reason = %e, "Balance adjustment rejected");
            return Err(e.into());
        }

        if let Err(e) = state.accounts.flush().await {
            state.accounts.restore(before);
            error!(identity, usd_delta, error = %e, "Balance adjustment rolled back");
            return Err(e.into());
        }

        info!(identity, usd_delta, "Balance adjusted");
        Ok(state.balance_of(identity)?)
    }

    // ========================
    // Market operations
    // ========================

    /// Spend `usd_amount` on the asset at the current price.
    pub async fn buy(&self, identity: &str, usd_amount: f64) -> Result<TradeResult, AppError> {
        self.trade(identity, Action::Buy, usd_amount).await
    }

    /// Sell `asset_amount` of the asset at the current price.
    pub async fn sell(&self, identity: &str, asset_amount: f64) -> Result<TradeResult, AppError> {
        self.trade(identity, Action::Sell, asset_amount).await
    }

    pub fn market(&self) -> f64 {
        self.price.current_price()
    }

    async fn trade(&self, identity: &str, action: Action, amount: f64) -> Result<TradeResult, AppError> {
        validate_amount(amount)?;

        // Started
        let mut state = self.state.lock().await;
        if let Some(err) = &state.halted {
            return Err(AppError::ChainIntegrity(err.clone()));
        }
        let before = state.accounts.get(identity)?.clone();

        // Validated
        let price = self.price.current_price();
        if !price.is_finite() || price <= 0.0 {
            return Err(AppError::InvalidPrice(price));
        }
        let record = TransactionRecord::new(identity, action, amount, price);
        let (usd_delta, asset_delta) = match action {
            Action::Buy => (-record.usd_value(), record.asset_quantity()),
            Action::Sell => (record.usd_value(), -record.asset_quantity()),
        };

        // Applied
        if let Err(e) = state.accounts.adjust_balance(identity, usd_delta, asset_delta) {
            info!(identity, %action, amount, price, reason = %e, "Trade rejected");
            return Err(e.into());
        }

        // Recorded
        let chain_len = state.chain.len();
        let block = state.chain.append(vec![record.clone()]).clone();

        // Committed
        if let Err(e) = state.commit_trade().await {
            state.chain.truncate(chain_len);
            state.accounts.restore(before);
            error!(identity, %action, amount, error = %e, "Trade rolled back");
            return Err(e);
        }

        info!(
            identity,
            %action,
            amount,
            price,
            block = block.index(),
            hash = %block.hash(),
            "Trade committed"
        );

        Ok(TradeResult {
            record,
            block,
            balance: state.balance_of(identity)?,
        })
    }

    // ========================
    // Chain operations
    // ========================

    pub async fn blocks(&self) -> Vec<Block> {
        self.state.lock().await.chain.chain().blocks().to_vec()
    }

    pub async fn chain_len(&self) -> usize {
        self.state.lock().await.chain.len()
    }

    /// Trades recorded for `identity`, oldest first.
    pub async fn history(&self, identity: &str) -> Result<Vec<HistoryEntry>, AppError> {
        let state = self.state.lock().await;
        state.accounts.get(identity)?;

        Ok(state
            .chain
            .chain()
            .iter()
            .flat_map(|block| {
                block
                    .transactions()
                    .iter()
                    .filter(|record| record.user == identity)
                    .map(|record| HistoryEntry {
                        block_index: block.index(),
                        timestamp: block.timestamp(),
                        record: record.clone(),
                    })
            })
            .collect())
    }

    /// Recompute every hash and link. A failure halts appends until the
    /// chain is repaired and reloaded.
    pub async fn verify_chain(&self) -> IntegrityReport {
        let mut state = self.state.lock().await;
        state.verify()
    }

    /// Whether market operations are currently refused.
    pub async fn is_halted(&self) -> bool {
        self.state.lock().await.halted.is_some()
    }

    /// Discard both caches and read the files again. A halted service
    /// re-verifies and resumes only if the chain is now intact.
    pub async fn reload(&self) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.chain.reload().await?;
        state.accounts.reload().await?;
        let stray_block_gone = matches!(
            &state.halted,
            Some(ChainIntegrityError::UncommittedBlock { index }) if state.chain.len() as u64 <= *index
        );
        if stray_block_gone {
            state.halted = None;
        }
        if state.halted.is_some() {
            state.verify();
        }
        Ok(())
    }
}

impl LedgerState {
    fn balance_of(&self, identity: &str) -> Result<BalanceEntry, AppError> {
        let account = self.accounts.get(identity)?;
        Ok(BalanceEntry {
            identity: account.identity.clone(),
            usd: account.usd_balance,
            asset: account.asset_balance,
        })
    }

    /// Persist the chain and the account table as one unit. Both documents
    /// are staged before either is renamed. If the account rename fails after
    /// the chain file was replaced, the chain file is rewritten without the
    /// new block. The caller rolls back the caches on any error.
    async fn commit_trade(&mut self) -> Result<(), AppError> {
        let chain_doc = self.chain.encode()?;
        let accounts_doc = self.accounts.encode()?;
        let timeout = self.persist_timeout();

        match files::write_pair(
            (self.chain.path(), chain_doc.as_slice()),
            (self.accounts.path(), accounts_doc.as_slice()),
            timeout,
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(failure) => {
                if failure.first_replaced && !self.restore_chain_file().await {
                    let uncommitted = ChainIntegrityError::UncommittedBlock {
                        index: self.chain.chain().tip().index(),
                    };
                    error!(error = %uncommitted, "Appends halted");
                    self.halted = Some(uncommitted);
                }
                Err(failure.source.into())
            }
        }
    }

    /// Rewrite the chain file without its newest block. Returns whether the
    /// file is back in step with the account table.
    async fn restore_chain_file(&mut self) -> bool {
        let committed_len = self.chain.len().saturating_sub(1);
        let mut previous = self.chain.chain().clone();
        previous.truncate(committed_len);
        let restored = match serde_json::to_vec_pretty(previous.blocks()) {
            Ok(doc) => files::write_atomic(self.chain.path(), &doc, self.persist_timeout()).await,
            Err(source) => Err(crate::storage::StorageError::Serialization {
                what: "chain",
                source,
            }),
        };
        match restored {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to restore chain file after partial commit");
                false
            }
        }
    }

    fn persist_timeout(&self) -> std::time::Duration {
        self.chain.persist_timeout()
    }

    fn verify(&mut self) -> IntegrityReport {
        let chain = self.chain.chain();
        // Only a reload that no longer finds the stray block lifts this halt
        let error = chain.verify().err().or_else(|| match &self.halted {
            Some(uncommitted @ ChainIntegrityError::UncommittedBlock { .. }) => {
                Some(uncommitted.clone())
            }
            _ => None,
        });
        match &error {
            Some(err) => {
                error!(error = %err, "Chain verification failed; appends halted");
                self.halted = Some(err.clone());
            }
            None => {
                if self.halted.take().is_some() {
                    info!("Chain verified; appends resumed");
                } else {
                    debug!(blocks = chain.len(), "Chain verified");
                }
            }
        }
        IntegrityReport {
            block_count: self.chain.len(),
            tip_hash: self.chain.chain().tip_hash().to_string(),
            error,
        }
    }
}

fn validate_amount(amount: f64) -> Result<(), AppError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(AppError::InvalidAmount(format!(
            "{} (must be a positive number)",
            amount
        )));
    }
    Ok(())
}

fn validate_identity(identity: &str) -> Result<&str, AppError> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(AppError::InvalidIdentity(
            "user name must not be empty".to_string(),
        ));
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn service_with_trade(dir: &TempDir) -> LedgerService {
        let service = LedgerService::open(&Config::default().with_data_dir(dir.path()))
            .await
            .unwrap();
        service.price_feed().set_price(50.0).await.unwrap();
        service.register("alice", "pw").await.unwrap();
        service.buy("alice", 100.0).await.unwrap();
        service
    }

    /// Leave the chain file one block ahead of the account table, as a failed
    /// restore after a partial commit would.
    async fn strand_block_on_disk(service: &LedgerService) -> u64 {
        let mut state = service.state.lock().await;
        let mut ahead = state.chain.chain().clone();
        let index = ahead
            .append(vec![TransactionRecord::buy("alice", 10.0, 50.0)])
            .index();
        let doc = serde_json::to_vec_pretty(ahead.blocks()).unwrap();
        std::fs::write(state.chain.path(), doc).unwrap();
        state.halted = Some(ChainIntegrityError::UncommittedBlock { index });
        index
    }

    #[tokio::test]
    async fn test_stranded_block_halts_until_file_is_repaired() {
        let dir = TempDir::new().unwrap();
        let service = service_with_trade(&dir).await;
        let committed = std::fs::read(dir.path().join("blockchain.json")).unwrap();
        let index = strand_block_on_disk(&service).await;

        assert!(matches!(
            service.buy("alice", 10.0).await,
            Err(AppError::ChainIntegrity(ChainIntegrityError::UncommittedBlock { .. }))
        ));

        // The in-memory chain is intact, but that does not lift the halt
        let report = service.verify_chain().await;
        assert_eq!(
            report.error,
            Some(ChainIntegrityError::UncommittedBlock { index })
        );
        assert!(service.is_halted().await);

        // Reloading while the stray block is still on disk keeps it halted
        service.reload().await.unwrap();
        assert!(service.is_halted().await);

        std::fs::write(dir.path().join("blockchain.json"), committed).unwrap();
        service.reload().await.unwrap();
        assert!(!service.is_halted().await);
        assert_eq!(service.buy("alice", 10.0).await.unwrap().block.index(), 2);
    }

    #[tokio::test]
    async fn test_reload_with_missing_chain_file_keeps_caches() {
        let dir = TempDir::new().unwrap();
        let service = service_with_trade(&dir).await;
        std::fs::remove_file(dir.path().join("blockchain.json")).unwrap();

        assert!(matches!(
            service.reload().await,
            Err(AppError::Persistence(_))
        ));
        assert_eq!(service.chain_len().await, 2);
        assert_eq!(service.balance("alice").await.unwrap().usd, 900.0);
    }
}
