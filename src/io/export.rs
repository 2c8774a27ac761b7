use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{format_asset, format_usd, Block};

/// Chain snapshot for JSON export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub block_count: usize,
    pub tip_hash: String,
    pub blocks: Vec<Block>,
}

/// Exporter for converting chain data to various formats
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export recorded trades to CSV, one row per transaction record.
    /// Genesis carries no records and produces no row.
    pub async fn export_trades_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let blocks = self.service.blocks().await;
        let mut csv_writer = csv::Writer::from_writer(writer);

        // Write header
        csv_writer.write_record([
            "block_index",
            "timestamp",
            "user",
            "action",
            "amount",
            "price",
            "usd_value",
            "asset_quantity",
            "previous_hash",
            "hash",
        ])?;

        let mut count = 0;
        for block in &blocks {
            let timestamp = block
                .datetime()
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default();
            for record in block.transactions() {
                csv_writer.write_record([
                    block.index().to_string(),
                    timestamp.clone(),
                    record.user.clone(),
                    record.action.to_string(),
                    record.amount.to_string(),
                    record.price.to_string(),
                    format_usd(record.usd_value()),
                    format_asset(record.asset_quantity()),
                    block.previous_hash().to_string(),
                    block.hash().to_string(),
                ])?;
                count += 1;
            }
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export the full chain as a JSON snapshot
    pub async fn export_chain_json<W: Write>(&self, mut writer: W) -> Result<ChainSnapshot> {
        let blocks = self.service.blocks().await;
        let tip_hash = blocks
            .last()
            .map(|b| b.hash().to_string())
            .unwrap_or_default();

        let snapshot = ChainSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            block_count: blocks.len(),
            tip_hash,
            blocks,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
