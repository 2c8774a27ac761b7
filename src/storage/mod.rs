mod accounts;
mod chain_store;
pub mod cipher;
mod error;
pub mod files;

pub use accounts::*;
pub use chain_store::*;
pub use cipher::{KeyError, SecretKey};
pub use error::*;

/// File holding the JSON block array.
pub const CHAIN_FILE: &str = "blockchain.json";

/// File holding the encrypted account table.
pub const ACCOUNTS_FILE: &str = "users.dat";

/// File holding the plaintext market price.
pub const MARKET_FILE: &str = "market.json";
