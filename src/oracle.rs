//! Reference Price Oracle
//!
//! Provides the reference-asset USD price used to convert transaction fees
//! into an execution cost. Consumers call [`PriceOracle::current_price`],
//! which never blocks and never fails: it returns the last known value.
//!
//! Refresh runs on its own interval task. A failed fetch is logged and the
//! previous price is kept (stale-but-available).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default Pyth Hermes endpoint
pub const DEFAULT_HERMES_ENDPOINT: &str = "https://hermes.pyth.network";

/// Pyth SOL/USD price feed id
pub const SOL_USD_FEED_ID: &str = "0xef0d8b6fda2ceba41da15d4095d1da392a0d2f8ed0c6c7bc0f4cfac8c280b56d";

/// Capability to read the current reference price
pub trait PriceOracle: Send + Sync {
    /// Last known reference-asset price in USD (0.0 before the first fetch)
    fn current_price(&self) -> f64;
}

/// Fixed price, for tests and offline runs
#[derive(Debug, Clone, Copy)]
pub struct StaticPrice(pub f64);

impl PriceOracle for StaticPrice {
    fn current_price(&self) -> f64 {
        self.0
    }
}

/// Where fresh prices come from
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self) -> Result<Decimal>;

    fn name(&self) -> &str;
}

/// Cached price data
#[derive(Default)]
struct PriceCache {
    price: Option<Decimal>,
    last_updated: Option<Instant>,
    consecutive_failures: u32,
}

/// Oracle that serves the last successfully fetched price
pub struct CachedPriceOracle {
    cache: RwLock<PriceCache>,
}

impl CachedPriceOracle {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(PriceCache::default()),
        }
    }

    /// Start with a known price (e.g. configured fallback)
    pub fn with_initial_price(price: Decimal) -> Self {
        Self {
            cache: RwLock::new(PriceCache {
                price: Some(price),
                last_updated: None,
                consecutive_failures: 0,
            }),
        }
    }

    /// Last known price as an exact decimal
    pub fn price(&self) -> Option<Decimal> {
        self.read_cache().price
    }

    /// Time since the last successful refresh
    pub fn age(&self) -> Option<Duration> {
        self.read_cache().last_updated.map(|t| t.elapsed())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.read_cache().consecutive_failures
    }

    /// Fetch once from `source`. Returns true if the cached price changed.
    pub async fn refresh(&self, source: &dyn PriceSource) -> bool {
        match source.fetch_price().await {
            Ok(price) => {
                let mut cache = self.write_cache();
                let changed = cache.price != Some(price);
                cache.price = Some(price);
                cache.last_updated = Some(Instant::now());
                cache.consecutive_failures = 0;
                debug!("{} price updated: ${}", source.name(), price);
                changed
            }
            Err(e) => {
                let mut cache = self.write_cache();
                cache.consecutive_failures += 1;
                warn!(
                    "{} price fetch failed ({} in a row), keeping last price {:?}: {:#}",
                    source.name(),
                    cache.consecutive_failures,
                    cache.price,
                    e
                );
                false
            }
        }
    }

    /// Refresh immediately, then every `every`, until the task is aborted
    pub fn spawn_refresh(self: Arc<Self>, source: Arc<dyn PriceSource>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Price oracle refresh every {:?} from {}", every, source.name());
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.refresh(source.as_ref()).await;
            }
        })
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, PriceCache> {
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, PriceCache> {
        self.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CachedPriceOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceOracle for CachedPriceOracle {
    fn current_price(&self) -> f64 {
        self.price().and_then(|p| p.to_f64()).unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Pyth Hermes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HermesPriceFeed {
    id: String,
    price: HermesPrice,
}

#[derive(Debug, Deserialize)]
struct HermesPrice {
    /// Integer mantissa as a decimal string
    price: String,
    expo: i32,
}

/// Fetches a price feed from a Pyth Hermes endpoint
pub struct PythHermesSource {
    client: reqwest::Client,
    endpoint: String,
    feed_id: String,
}

impl PythHermesSource {
    pub fn new(endpoint: &str, feed_id: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for price oracle")?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            feed_id: feed_id.to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for PythHermesSource {
    async fn fetch_price(&self) -> Result<Decimal> {
        let url = format!("{}/api/latest_price_feeds", self.endpoint);
        let feeds: Vec<HermesPriceFeed> = self
            .client
            .get(&url)
            .query(&[("ids[]", self.feed_id.as_str())])
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()
            .context("Hermes returned an error status")?
            .json()
            .await
            .context("Failed to decode Hermes response")?;

        let wanted = self.feed_id.trim_start_matches("0x");
        let feed = feeds
            .iter()
            .find(|f| f.id.trim_start_matches("0x").eq_ignore_ascii_case(wanted))
            .or_else(|| feeds.first())
            .context("Hermes returned no price feeds")?;

        scale_price(&feed.price.price, feed.price.expo)
    }

    fn name(&self) -> &str {
        "pyth-hermes"
    }
}

/// `mantissa * 10^expo` without going through floating point
fn scale_price(mantissa: &str, expo: i32) -> Result<Decimal> {
    let mantissa: i64 = mantissa
        .parse()
        .with_context(|| format!("Invalid price mantissa: {}", mantissa))?;

    let price = if expo <= 0 {
        let scale = expo.unsigned_abs();
        if scale > 28 {
            bail!("Price exponent out of range: {}", expo);
        }
        Decimal::new(mantissa, scale)
    } else {
        let factor = Decimal::from_i128_with_scale(10i128.pow(expo.unsigned_abs().min(28)), 0);
        Decimal::from(mantissa)
            .checked_mul(factor)
            .context("Price overflow")?
    };

    if price <= Decimal::ZERO {
        bail!("Non-positive price: {}", price);
    }

    Ok(price)
}
