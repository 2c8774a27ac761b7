mod shell;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::application::{Config, LedgerService};
use crate::domain::{format_asset, format_usd, parse_amount};
use crate::market::PriceRange;
use crate::storage::SecretKey;

/// Tradeledger - simulated trading ledger
#[derive(Parser)]
#[command(name = "tradeledger")]
#[command(about = "A single-node trading ledger backed by a hash-linked block chain")]
#[command(version)]
pub struct Cli {
    /// Directory holding blockchain.json, users.dat and market.json
    #[arg(short, long, global = true, env = "TRADELEDGER_DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Account file key as 64 hex characters (a development key is used if unset)
    #[arg(long, global = true, env = "TRADELEDGER_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// USD balance for newly registered accounts
    #[arg(long, global = true, default_value_t = 1000.0)]
    pub starting_usd: f64,

    /// Asset balance for newly registered accounts
    #[arg(long, global = true, default_value_t = 0.0)]
    pub starting_asset: f64,

    /// Seconds between simulated price refreshes
    #[arg(long, global = true, default_value_t = 10)]
    pub price_interval_secs: u64,

    /// Lowest simulated price
    #[arg(long, global = true, default_value_t = 30.0)]
    pub min_price: f64,

    /// Highest simulated price
    #[arg(long, global = true, default_value_t = 70.0)]
    pub max_price: f64,

    /// Upper bound for each file write, in milliseconds
    #[arg(long, global = true, default_value_t = 5000)]
    pub persist_timeout_ms: u64,

    /// Skip chain verification at startup
    #[arg(long, global = true)]
    pub skip_verify: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Login for commands acting on an account
#[derive(Args)]
pub struct Credentials {
    /// User name
    #[arg(short, long)]
    pub user: String,

    /// Password
    #[arg(short, long, env = "TRADELEDGER_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an account with the starting balances
    Register {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Show USD and asset balances
    Balance {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Add USD to an account (not recorded on the chain)
    Deposit {
        /// Amount in USD (e.g., "250" or "99.50")
        amount: String,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Take USD out of an account (not recorded on the chain)
    Withdraw {
        /// Amount in USD
        amount: String,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Buy the asset at the current price
    Buy {
        /// USD to spend
        amount: String,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Sell the asset at the current price
    Sell {
        /// Quantity of asset to sell
        amount: String,

        #[command(flatten)]
        credentials: Credentials,
    },

    /// Show the current market price
    Market,

    /// Draw and save a new market price
    RefreshPrice,

    /// List blocks on the chain
    Chain {
        /// Show only the last N blocks
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Verify every block hash and link
    Verify,

    /// List the trades recorded for an account
    History {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Export the chain to CSV or JSON
    Export {
        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Interactive session with the price refreshing in the background
    Shell,
}

impl Cli {
    /// Build the runtime configuration from the global options.
    pub fn config(&self) -> Result<Config> {
        let secret_key = match &self.secret_key {
            Some(hex_key) => SecretKey::from_hex(hex_key).context("Invalid --secret-key")?,
            None => SecretKey::development(),
        };

        let mut config = Config::default()
            .with_data_dir(&self.data_dir)
            .with_secret_key(secret_key)
            .with_starting_balances(self.starting_usd, self.starting_asset);
        config.price_range = PriceRange {
            min: self.min_price,
            max: self.max_price,
        };
        config.price_interval = Duration::from_secs(self.price_interval_secs);
        config.persist_timeout = Duration::from_millis(self.persist_timeout_ms);
        config.verify_on_open = !self.skip_verify;
        Ok(config)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config()?;
        let service = LedgerService::open(&config)
            .await
            .with_context(|| format!("Failed to open ledger in {}", config.data_dir.display()))?;

        match self.command {
            Commands::Register { credentials } => {
                service
                    .register(&credentials.user, &credentials.password)
                    .await?;
                let balance = service.balance(credentials.user.trim()).await?;
                println!(
                    "Registered {} with {} USD and {} asset",
                    balance.identity,
                    format_usd(balance.usd),
                    format_asset(balance.asset)
                );
            }

            Commands::Balance { credentials } => {
                let user = login(&service, &credentials).await?;
                let balance = service.balance(&user).await?;
                println!("USD balance:   {}", format_usd(balance.usd));
                println!("Asset balance: {}", format_asset(balance.asset));
            }

            Commands::Deposit {
                amount,
                credentials,
            } => {
                let user = login(&service, &credentials).await?;
                let amount = parse_amount(&amount).context("Invalid amount. Use '250' or '99.50'")?;
                let balance = service.deposit(&user, amount).await?;
                println!(
                    "Deposited {} USD (balance: {} USD)",
                    format_usd(amount),
                    format_usd(balance.usd)
                );
            }

            Commands::Withdraw {
                amount,
                credentials,
            } => {
                let user = login(&service, &credentials).await?;
                let amount = parse_amount(&amount).context("Invalid amount. Use '250' or '99.50'")?;
                let balance = service.withdraw(&user, amount).await?;
                println!(
                    "Withdrew {} USD (balance: {} USD)",
                    format_usd(amount),
                    format_usd(balance.usd)
                );
            }

            Commands::Buy {
                amount,
                credentials,
            } => {
                let user = login(&service, &credentials).await?;
                let amount = parse_amount(&amount).context("Invalid USD amount")?;
                let result = service.buy(&user, amount).await?;
                println!(
                    "Bought {} asset for {} USD at {} (block {})",
                    format_asset(result.record.asset_quantity()),
                    format_usd(result.record.usd_value()),
                    format_usd(result.record.price),
                    result.block.index()
                );
            }

            Commands::Sell {
                amount,
                credentials,
            } => {
                let user = login(&service, &credentials).await?;
                let amount = parse_amount(&amount).context("Invalid asset amount")?;
                let result = service.sell(&user, amount).await?;
                println!(
                    "Sold {} asset for {} USD at {} (block {})",
                    format_asset(result.record.asset_quantity()),
                    format_usd(result.record.usd_value()),
                    format_usd(result.record.price),
                    result.block.index()
                );
            }

            Commands::Market => {
                println!("Current price: {} USD", format_usd(service.market()));
            }

            Commands::RefreshPrice => {
                let price = service.price_feed().refresh().await?;
                println!("New price: {} USD", format_usd(price));
            }

            Commands::Chain { limit } => {
                run_chain_command(&service, limit).await;
            }

            Commands::Verify => {
                run_verify_command(&service).await?;
            }

            Commands::History { credentials } => {
                let user = login(&service, &credentials).await?;
                run_history_command(&service, &user).await?;
            }

            Commands::Export { format, output } => {
                run_export_command(&service, &format, output.as_deref()).await?;
            }

            Commands::Shell => {
                let refresher = service.price_feed().spawn_refresher(config.price_interval);
                let result = shell::run(&service).await;
                refresher.shutdown().await;
                result?;
            }
        }

        Ok(())
    }
}

async fn login(service: &LedgerService, credentials: &Credentials) -> Result<String> {
    Ok(service
        .authenticate(&credentials.user, &credentials.password)
        .await?)
}

async fn run_chain_command(service: &LedgerService, limit: Option<usize>) {
    let blocks = service.blocks().await;
    let skip = limit.map_or(0, |n| blocks.len().saturating_sub(n));

    println!(
        "{:>6} {:<20} {:<6} {:<12} {:>12} {:>10} HASH",
        "INDEX", "TIME", "ACTION", "USER", "AMOUNT", "PRICE"
    );
    println!("{}", "-".repeat(90));

    for block in blocks.iter().skip(skip) {
        let time = block
            .datetime()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string());
        let short_hash = &block.hash()[..16.min(block.hash().len())];

        if block.transactions().is_empty() {
            println!(
                "{:>6} {:<20} {:<6} {:<12} {:>12} {:>10} {}",
                block.index(),
                time,
                "-",
                "(genesis)",
                "",
                "",
                short_hash
            );
        }
        for record in block.transactions() {
            println!(
                "{:>6} {:<20} {:<6} {:<12} {:>12} {:>10} {}",
                block.index(),
                time,
                record.action,
                truncate(&record.user, 12),
                format_asset(record.amount),
                format_usd(record.price),
                short_hash
            );
        }
    }
}

async fn run_verify_command(service: &LedgerService) -> Result<()> {
    println!("Verifying chain integrity...\n");

    let report = service.verify_chain().await;
    println!("Blocks:   {}", report.block_count);
    println!("Tip hash: {}", report.tip_hash);
    println!();

    match &report.error {
        None => println!("Chain is intact."),
        Some(err) => {
            println!("Integrity violation: {}", err);
            anyhow::bail!("Chain verification failed; trading is halted until the chain is repaired");
        }
    }
    Ok(())
}

async fn run_history_command(service: &LedgerService, user: &str) -> Result<()> {
    let entries = service.history(user).await?;
    if entries.is_empty() {
        println!("No trades recorded.");
        return Ok(());
    }

    println!(
        "{:>6} {:<20} {:<6} {:>14} {:>10} {:>12}",
        "BLOCK", "TIME", "ACTION", "ASSET", "PRICE", "USD"
    );
    println!("{}", "-".repeat(73));
    for entry in entries {
        let time = chrono::DateTime::from_timestamp_micros((entry.timestamp * 1_000_000.0).round() as i64)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{:>6} {:<20} {:<6} {:>14} {:>10} {:>12}",
            entry.block_index,
            time,
            entry.record.action,
            format_asset(entry.record.asset_quantity()),
            format_usd(entry.record.price),
            format_usd(entry.record.usd_value())
        );
    }
    Ok(())
}

async fn run_export_command(service: &LedgerService, format: &str, output: Option<&str>) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    let exporter = Exporter::new(service);

    // Determine output writer
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match format {
        "csv" => {
            let count = exporter.export_trades_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} trades", count);
            }
        }
        "json" => {
            let snapshot = exporter.export_chain_json(writer).await?;
            if output.is_some() {
                eprintln!("Exported chain: {} blocks", snapshot.block_count);
            }
        }
        _ => {
            anyhow::bail!("Invalid export format '{}'. Valid formats: csv, json", format);
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}
