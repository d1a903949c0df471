//! data_source.rs - Remote market data sources
//!
//! The cache talks to the outside world only through [`DataSource`].
//! [`HttpDataSource`] reads a JSON market API; [`MockDataSource`] serves an
//! in-memory market and can be switched into failing or slow modes.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::models::{Location, Order, Position, Region};

/// Trait defining the interface for market data sources
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch all trading locations (without their orders)
    async fn fetch_locations(&self) -> anyhow::Result<Vec<Location>>;

    /// Fetch all open orders
    async fn fetch_orders(&self) -> anyhow::Result<Vec<Order>>;

    /// Fetch all regions
    async fn fetch_regions(&self) -> anyhow::Result<Vec<Region>>;
}

// ============================================================================
// Market API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiLocation {
    location_id: i64,
    name: String,
    region_id: i64,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    position: Option<ApiPosition>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiPosition {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiOrder {
    order_id: i64,
    location_id: i64,
    #[serde(default)]
    location_name: Option<String>,
    item_id: i64,
    #[serde(default)]
    item_name: Option<String>,
    #[serde(default)]
    buy_quantity: i64,
    #[serde(default)]
    sell_quantity: i64,
    /// Quanta
    price: i64,
    #[serde(default)]
    agent_id: i64,
    #[serde(default)]
    agent_name: Option<String>,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRegion {
    region_id: i64,
    name: String,
}

impl From<ApiLocation> for Location {
    fn from(data: ApiLocation) -> Self {
        Location {
            location_id: data.location_id,
            name: data.name,
            region_id: data.region_id,
            region_name: data.region_name.unwrap_or_default(),
            position: data.position.map(|p| Position::new(p.x, p.y, p.z)),
            updated_at: data.updated_at.unwrap_or_else(Utc::now),
            orders: Vec::new(),
        }
    }
}

impl From<ApiOrder> for Order {
    fn from(data: ApiOrder) -> Self {
        Order {
            order_id: data.order_id,
            location_id: data.location_id,
            location_name: data.location_name.unwrap_or_default(),
            item_id: data.item_id,
            item_name: data
                .item_name
                .unwrap_or_else(|| format!("Item #{}", data.item_id)),
            buy_quantity: data.buy_quantity,
            sell_quantity: data.sell_quantity,
            unit_price: data.price,
            agent_id: data.agent_id,
            agent_name: data.agent_name.unwrap_or_default(),
            expires_at: data.expires_at,
            updated_at: data.updated_at.unwrap_or_else(Utc::now),
        }
    }
}

impl From<ApiRegion> for Region {
    fn from(data: ApiRegion) -> Self {
        Region {
            region_id: data.region_id,
            name: data.name,
        }
    }
}

// ============================================================================
// HttpDataSource - Production source backed by a JSON market API
// ============================================================================

/// Reads `{base_url}/locations`, `{base_url}/orders` and `{base_url}/regions`
#[derive(Debug, Clone)]
pub struct HttpDataSource {
    client: Client,
    base_url: String,
}

impl HttpDataSource {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to create HTTP client")?;

        Ok(HttpDataSource {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<Vec<T>> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("Fetching from: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("market API returned status {} for {}", status, url);
        }

        let items: Vec<T> = response
            .json()
            .await
            .with_context(|| format!("failed to parse response from {}", url))?;

        debug!("Fetched {} {} records", items.len(), path);
        Ok(items)
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch_locations(&self) -> anyhow::Result<Vec<Location>> {
        let items: Vec<ApiLocation> = self.get_json("locations").await?;
        Ok(items.into_iter().map(Location::from).collect())
    }

    async fn fetch_orders(&self) -> anyhow::Result<Vec<Order>> {
        let items: Vec<ApiOrder> = self.get_json("orders").await?;
        Ok(items.into_iter().map(Order::from).collect())
    }

    async fn fetch_regions(&self) -> anyhow::Result<Vec<Region>> {
        let items: Vec<ApiRegion> = self.get_json("regions").await?;
        Ok(items.into_iter().map(Region::from).collect())
    }
}

// ============================================================================
// MockDataSource - For testing purposes
// ============================================================================

/// One of the three fetches a refresh performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketFeed {
    Locations,
    Orders,
    Regions,
}

impl MarketFeed {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketFeed::Locations => "locations",
            MarketFeed::Orders => "orders",
            MarketFeed::Regions => "regions",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Debug, Default)]
struct MockMarket {
    locations: Vec<Location>,
    orders: Vec<Order>,
    regions: Vec<Region>,
}

/// In-memory data source for testing and development
#[derive(Debug, Default)]
pub struct MockDataSource {
    market: RwLock<MockMarket>,
    failing: AtomicBool,
    failing_feeds: [AtomicBool; 3],
    delay_ms: AtomicU64,
}

impl MockDataSource {
    pub fn new(locations: Vec<Location>, orders: Vec<Order>, regions: Vec<Region>) -> Self {
        MockDataSource {
            market: RwLock::new(MockMarket {
                locations,
                orders,
                regions,
            }),
            failing: AtomicBool::new(false),
            failing_feeds: Default::default(),
            delay_ms: AtomicU64::new(0),
        }
    }

    /// A small two-region market with a handful of cross-location spreads
    pub fn sample() -> Self {
        let now = Utc::now();
        let forge = Region::new(10000002, "The Forge");
        let domain = Region::new(10000043, "Domain");

        let location = |id: i64, name: &str, region: &Region, position: Option<Position>| Location {
            location_id: id,
            name: name.to_string(),
            region_id: region.region_id,
            region_name: region.name.clone(),
            position,
            updated_at: now,
            orders: Vec::new(),
        };

        let jita = location(60003760, "Jita IV - Moon 4", &forge, Some(Position::new(0.0, 0.0, 0.0)));
        let perimeter = location(60004588, "Perimeter", &forge, Some(Position::new(250_000.0, 0.0, 0.0)));
        let amarr = location(60008494, "Amarr VIII", &domain, Some(Position::new(1_500_000.0, 400_000.0, 0.0)));
        let sarum = location(60008950, "Sarum Prime", &domain, None);

        let order = |id: i64,
                     loc: &Location,
                     item: (i64, &str),
                     buy: i64,
                     sell: i64,
                     price: i64,
                     hours: i64| Order {
            order_id: id,
            location_id: loc.location_id,
            location_name: loc.name.clone(),
            item_id: item.0,
            item_name: item.1.to_string(),
            buy_quantity: buy,
            sell_quantity: sell,
            unit_price: price,
            agent_id: 90000000 + id % 4,
            agent_name: format!("Hauler {}", id % 4),
            expires_at: now + ChronoDuration::hours(hours),
            updated_at: now,
        };

        let tritanium = (34, "Tritanium");
        let plex = (44992, "PLEX");
        let nanite = (28668, "Nanite Repair Paste");

        let orders = vec![
            order(1, &jita, tritanium, 0, 1_000_000, 450, 72),
            order(2, &amarr, tritanium, 600_000, 0, 520, 48),
            order(3, &perimeter, tritanium, 250_000, 0, 470, 5),
            order(4, &jita, plex, 0, 500, 350_000_000, 96),
            order(5, &amarr, plex, 200, 0, 362_000_000, 12),
            order(6, &sarum, plex, 0, 100, 355_000_000, 200),
            order(7, &perimeter, nanite, 0, 20_000, 1_050_000, 30),
            order(8, &amarr, nanite, 15_000, 0, 1_210_000, 2),
            order(9, &jita, nanite, 5_000, 0, 1_000_000, 24),
        ];

        MockDataSource::new(vec![jita, perimeter, amarr, sarum], orders, vec![forge, domain])
    }

    /// Make every fetch fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make a single feed fail while the others keep serving
    pub fn set_failing_on(&self, feed: MarketFeed, failing: bool) {
        self.failing_feeds[feed.index()].store(failing, Ordering::SeqCst);
    }

    /// Delay every fetch by the given duration
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Replace the served market
    pub async fn set_market(&self, locations: Vec<Location>, orders: Vec<Order>, regions: Vec<Region>) {
        let mut market = self.market.write().await;
        *market = MockMarket {
            locations,
            orders,
            regions,
        };
    }

    async fn before_fetch(&self, feed: MarketFeed) -> anyhow::Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) || self.failing_feeds[feed.index()].load(Ordering::SeqCst) {
            anyhow::bail!("mock source refused to serve {}", feed.as_str());
        }
        Ok(())
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    async fn fetch_locations(&self) -> anyhow::Result<Vec<Location>> {
        self.before_fetch(MarketFeed::Locations).await?;
        Ok(self.market.read().await.locations.clone())
    }

    async fn fetch_orders(&self) -> anyhow::Result<Vec<Order>> {
        self.before_fetch(MarketFeed::Orders).await?;
        Ok(self.market.read().await.orders.clone())
    }

    async fn fetch_regions(&self) -> anyhow::Result<Vec<Region>> {
        self.before_fetch(MarketFeed::Regions).await?;
        Ok(self.market.read().await.regions.clone())
    }
}
