use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Unique user key in the account table.
pub type Identity = String;

/// Lowercase hex SHA-256 digest.
pub type BlockHash = String;

/// `previous_hash` carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Versioned prefix of the hashed encoding. Changing any part of
/// `canonical_bytes` requires a new tag.
const HASH_DOMAIN: &[u8] = b"tradeledger/block/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Spend USD to acquire the asset
    Buy,
    /// Sell the asset for USD
    Sell,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" => Some(Action::Buy),
            "sell" => Some(Action::Sell),
            _ => None,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Action::Buy => 0x01,
            Action::Sell => 0x02,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A committed market action. For `Buy` the amount is USD spent, for `Sell`
/// it is the quantity of asset sold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub user: Identity,
    pub action: Action,
    pub amount: f64,
    pub price: f64,
}

impl TransactionRecord {
    pub fn new(user: impl Into<Identity>, action: Action, amount: f64, price: f64) -> Self {
        Self {
            user: user.into(),
            action,
            amount,
            price,
        }
    }

    pub fn buy(user: impl Into<Identity>, usd_amount: f64, price: f64) -> Self {
        Self::new(user, Action::Buy, usd_amount, price)
    }

    pub fn sell(user: impl Into<Identity>, asset_amount: f64, price: f64) -> Self {
        Self::new(user, Action::Sell, asset_amount, price)
    }

    /// USD side of the trade.
    pub fn usd_value(&self) -> f64 {
        match self.action {
            Action::Buy => self.amount,
            Action::Sell => self.amount * self.price,
        }
    }

    /// Asset side of the trade.
    pub fn asset_quantity(&self) -> f64 {
        match self.action {
            Action::Buy => self.amount / self.price,
            Action::Sell => self.amount,
        }
    }
}

/// A hash-linked entry of the chain.
///
/// Fields are private: a block is either built through [`Block::new`], which
/// derives the hash, or deserialized from storage, in which case the stored
/// hash is trusted until the chain is verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    index: u64,
    previous_hash: BlockHash,
    transactions: Vec<TransactionRecord>,
    timestamp: f64,
    hash: BlockHash,
}

impl Block {
    pub fn new(
        index: u64,
        previous_hash: impl Into<BlockHash>,
        transactions: Vec<TransactionRecord>,
        timestamp: f64,
    ) -> Self {
        let mut block = Self {
            index,
            previous_hash: previous_hash.into(),
            transactions,
            timestamp: quantize_timestamp(timestamp),
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn genesis(timestamp: f64) -> Self {
        Self::new(0, GENESIS_PREVIOUS_HASH, Vec::new(), timestamp)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn transactions(&self) -> &[TransactionRecord] {
        &self.transactions
    }

    /// Seconds since the Unix epoch, microsecond precision.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(timestamp_micros(self.timestamp))
    }

    /// Recompute the digest from the stored fields.
    pub fn compute_hash(&self) -> BlockHash {
        hex::encode(Sha256::digest(self.canonical_bytes()))
    }

    pub fn has_valid_hash(&self) -> bool {
        self.has_canonical_timestamp() && self.compute_hash() == self.hash
    }

    /// The hash covers whole microseconds, so a stored timestamp carrying
    /// anything finer is not one this block could have been created with.
    pub fn has_canonical_timestamp(&self) -> bool {
        self.timestamp.is_finite()
            && quantize_timestamp(self.timestamp).to_bits() == self.timestamp.to_bits()
    }

    /// Length-prefixed big-endian encoding of everything the hash covers.
    /// Floats are encoded by bit pattern, the timestamp as integer micros.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.transactions.len() * 64);
        buf.extend_from_slice(HASH_DOMAIN);
        buf.extend_from_slice(&self.index.to_be_bytes());
        put_str(&mut buf, &self.previous_hash);
        buf.extend_from_slice(&timestamp_micros(self.timestamp).to_be_bytes());
        buf.extend_from_slice(&(self.transactions.len() as u64).to_be_bytes());
        for tx in &self.transactions {
            put_str(&mut buf, &tx.user);
            buf.push(tx.action.tag());
            buf.extend_from_slice(&tx.amount.to_bits().to_be_bytes());
            buf.extend_from_slice(&tx.price.to_bits().to_be_bytes());
        }
        buf
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u64).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn timestamp_micros(timestamp: f64) -> i64 {
    (timestamp * 1_000_000.0).round() as i64
}

fn quantize_timestamp(timestamp: f64) -> f64 {
    timestamp_micros(timestamp) as f64 / 1_000_000.0
}

/// Current time as seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
