use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::storage::{files, StorageError};

/// Price used when the market file exists but carries no price.
pub const DEFAULT_PRICE: f64 = 50.0;

/// Bounds of the simulated price, inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

impl Default for PriceRange {
    fn default() -> Self {
        Self {
            min: 30.0,
            max: 70.0,
        }
    }
}

impl PriceRange {
    /// Uniform draw rounded to cents.
    fn draw(&self) -> f64 {
        let raw = rand::thread_rng().gen_range(self.min..=self.max);
        (raw * 100.0).round() / 100.0
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MarketDocument {
    #[serde(default = "default_price")]
    price: f64,
}

fn default_price() -> f64 {
    DEFAULT_PRICE
}

struct Persistence {
    path: PathBuf,
    timeout: Duration,
}

struct Inner {
    price: watch::Sender<f64>,
    range: PriceRange,
    persistence: Option<Persistence>,
}

/// Simulated market price.
///
/// The current value lives in a watch channel: readers take a snapshot with
/// [`PriceFeed::current_price`] and never block the writer. Clones share the
/// same price.
#[derive(Clone)]
pub struct PriceFeed {
    inner: Arc<Inner>,
}

impl PriceFeed {
    /// Load the price from `path`, generating and saving a fresh one if the
    /// file does not exist.
    pub async fn open(
        path: impl Into<PathBuf>,
        range: PriceRange,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let path = path.into();
        let price = match files::read_optional(&path).await? {
            Some(bytes) => {
                let doc: MarketDocument =
                    serde_json::from_slice(&bytes).map_err(|source| StorageError::Malformed {
                        path: path.clone(),
                        what: "market price",
                        source,
                    })?;
                doc.price
            }
            None => {
                let price = range.draw();
                write_price(&path, price, timeout).await?;
                info!(price, "Generated initial market price");
                price
            }
        };

        let (sender, _) = watch::channel(price);
        Ok(Self {
            inner: Arc::new(Inner {
                price: sender,
                range,
                persistence: Some(Persistence { path, timeout }),
            }),
        })
    }

    /// A feed that never touches disk.
    pub fn fixed(price: f64) -> Self {
        let (sender, _) = watch::channel(price);
        Self {
            inner: Arc::new(Inner {
                price: sender,
                range: PriceRange::default(),
                persistence: None,
            }),
        }
    }

    pub fn current_price(&self) -> f64 {
        *self.inner.price.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.inner.price.subscribe()
    }

    pub fn range(&self) -> PriceRange {
        self.inner.range
    }

    /// Draw a new price, persist it, then publish it.
    pub async fn refresh(&self) -> Result<f64, StorageError> {
        let price = self.inner.range.draw();
        self.set_price(price).await?;
        Ok(price)
    }

    /// Persist and publish an explicit price.
    pub async fn set_price(&self, price: f64) -> Result<(), StorageError> {
        if let Some(persistence) = &self.inner.persistence {
            write_price(&persistence.path, price, persistence.timeout).await?;
        }
        self.inner.price.send_replace(price);
        debug!(price, "Published market price");
        Ok(())
    }

    /// Refresh the price every `interval` on a background task until the
    /// returned handle is shut down.
    pub fn spawn_refresher(&self, interval: Duration) -> PriceRefresher {
        let feed = self.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the current price stays
            // in effect for one full interval.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => match feed.refresh().await {
                        Ok(price) => debug!(price, "Refreshed market price"),
                        Err(e) => warn!(error = %e, "Market price refresh failed"),
                    },
                }
            }
            debug!("Price refresher stopped");
        });

        PriceRefresher {
            stop: Some(stop_tx),
            handle,
        }
    }
}

async fn write_price(path: &Path, price: f64, timeout: Duration) -> Result<(), StorageError> {
    let document = serde_json::to_vec(&MarketDocument { price }).map_err(|source| {
        StorageError::Serialization {
            what: "market price",
            source,
        }
    })?;
    files::write_atomic(path, &document, timeout).await
}

/// Handle to the background refresh task.
pub struct PriceRefresher {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl PriceRefresher {
    /// Stop the task and wait for it to finish its current refresh.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            warn!(error = %e, "Price refresher task failed");
        }
    }
}

impl Drop for PriceRefresher {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn read_price(path: &Path) -> f64 {
        let doc: MarketDocument = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        doc.price
    }

    #[tokio::test]
    async fn test_open_generates_price_in_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("market.json");

        let feed = PriceFeed::open(&path, PriceRange::default(), TIMEOUT)
            .await
            .unwrap();

        let price = feed.current_price();
        assert!((30.0..=70.0).contains(&price));
        assert_eq!(read_price(&path), price);
    }

    #[tokio::test]
    async fn test_open_reads_existing_price() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("market.json");
        std::fs::write(&path, r#"{"price": 42.5}"#).unwrap();

        let feed = PriceFeed::open(&path, PriceRange::default(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(feed.current_price(), 42.5);
    }

    #[tokio::test]
    async fn test_missing_price_key_uses_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("market.json");
        std::fs::write(&path, "{}").unwrap();

        let feed = PriceFeed::open(&path, PriceRange::default(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(feed.current_price(), DEFAULT_PRICE);
    }

    #[tokio::test]
    async fn test_refresh_persists_and_publishes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("market.json");
        let range = PriceRange {
            min: 10.0,
            max: 11.0,
        };
        let feed = PriceFeed::open(&path, range, TIMEOUT).await.unwrap();
        let reader = feed.clone();

        let price = feed.refresh().await.unwrap();

        assert!((10.0..=11.0).contains(&price));
        assert_eq!((price * 100.0).round() / 100.0, price);
        assert_eq!(reader.current_price(), price);
        assert_eq!(read_price(&path), price);
    }

    #[tokio::test]
    async fn test_fixed_feed() {
        let feed = PriceFeed::fixed(50.0);
        assert_eq!(feed.current_price(), 50.0);
        feed.set_price(55.0).await.unwrap();
        assert_eq!(feed.current_price(), 55.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_updates_until_shutdown() {
        let feed = PriceFeed::fixed(1000.0);
        let mut updates = feed.subscribe();
        let refresher = feed.spawn_refresher(Duration::from_secs(10));

        updates.changed().await.unwrap();
        let refreshed = *updates.borrow_and_update();
        assert!((30.0..=70.0).contains(&refreshed));

        refresher.shutdown().await;
        let after_shutdown = feed.current_price();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(feed.current_price(), after_shutdown);
    }
}
