//! cache.rs - Market snapshot cache and its refresh lifecycle
//!
//! Readers load the current [`MarketSnapshot`] through an `ArcSwapOption`
//! and never wait on the remote source. The refresh path builds a complete
//! new snapshot off to the side and publishes it with a single pointer swap.
//! A failed refresh leaves the previous snapshot untouched and bumps the
//! consecutive-failure counter.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::CacheConfig;
use crate::data_source::DataSource;
use crate::error::CacheError;
use crate::models::{compute_distance, CacheStatistics, Location, Order, Position, Region};

/// An immutable, internally consistent copy of the market at one point in time
#[derive(Debug)]
pub struct MarketSnapshot {
    version: u64,
    fetched_at: DateTime<Utc>,
    locations: Vec<Location>,
    orders: Vec<Order>,
    regions: Vec<Region>,
    positions: HashMap<i64, Position>,
    location_regions: HashMap<i64, i64>,
    agent_count: usize,
    item_count: usize,
}

impl MarketSnapshot {
    /// Assemble a snapshot. Orders are attached to their owning locations in
    /// order-id order; orders for unknown locations stay in the flat list only.
    pub fn new(
        version: u64,
        fetched_at: DateTime<Utc>,
        mut locations: Vec<Location>,
        mut orders: Vec<Order>,
        regions: Vec<Region>,
    ) -> Self {
        orders.sort_by_key(|o| o.order_id);

        let mut by_location: HashMap<i64, Vec<Order>> = HashMap::new();
        for order in &orders {
            by_location.entry(order.location_id).or_default().push(order.clone());
        }

        for location in &mut locations {
            location.orders = by_location.remove(&location.location_id).unwrap_or_default();
        }

        let positions = locations
            .iter()
            .filter_map(|l| l.position.map(|p| (l.location_id, p)))
            .collect();
        let location_regions = locations
            .iter()
            .map(|l| (l.location_id, l.region_id))
            .collect();

        let agent_count = orders.iter().map(|o| o.agent_id).collect::<HashSet<_>>().len();
        let item_count = orders.iter().map(|o| o.item_id).collect::<HashSet<_>>().len();

        MarketSnapshot {
            version,
            fetched_at,
            locations,
            orders,
            regions,
            positions,
            location_regions,
            agent_count,
            item_count,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn agent_count(&self) -> usize {
        self.agent_count
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    pub fn position_of(&self, location_id: i64) -> Option<&Position> {
        self.positions.get(&location_id)
    }

    pub fn region_of(&self, location_id: i64) -> Option<i64> {
        self.location_regions.get(&location_id).copied()
    }

    /// Distance in meters between two locations; 0 when either position is unknown
    pub fn distance_between(&self, from_location: i64, to_location: i64) -> f64 {
        compute_distance(self.position_of(from_location), self.position_of(to_location))
    }

    /// Check if the snapshot is older than `max_age` at time `now`
    pub fn is_stale_at(&self, now: DateTime<Utc>, max_age: ChronoDuration) -> bool {
        now.signed_duration_since(self.fetched_at) > max_age
    }

    pub fn is_stale(&self, max_age: ChronoDuration) -> bool {
        self.is_stale_at(Utc::now(), max_age)
    }
}

/// Lifecycle state, derived from the cache flags and the current snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Refreshing,
    Fresh,
    Stale,
    Failed,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheState::Empty => "empty",
            CacheState::Refreshing => "refreshing",
            CacheState::Fresh => "fresh",
            CacheState::Stale => "stale",
            CacheState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful refresh
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSummary {
    pub version: u64,
    pub location_count: usize,
    pub order_count: usize,
    pub region_count: usize,
    pub elapsed: Duration,
}

/// Clears the in-progress flag even if the refresh future is dropped midway
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Holds the latest market snapshot and owns its refresh lifecycle
pub struct MarketCache {
    source: Arc<dyn DataSource>,
    snapshot: ArcSwapOption<MarketSnapshot>,
    staleness_threshold: ChronoDuration,
    fetch_timeout: Duration,
    refreshing: AtomicBool,
    last_refresh_failed: AtomicBool,
    source_reachable: AtomicBool,
    consecutive_failures: AtomicU32,
    versions: AtomicU64,
    last_attempt: ArcSwapOption<DateTime<Utc>>,
}

impl MarketCache {
    pub fn new(source: Arc<dyn DataSource>, config: &CacheConfig) -> Self {
        MarketCache {
            source,
            snapshot: ArcSwapOption::empty(),
            staleness_threshold: config.staleness_threshold(),
            fetch_timeout: config.fetch_timeout(),
            refreshing: AtomicBool::new(false),
            last_refresh_failed: AtomicBool::new(false),
            source_reachable: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            versions: AtomicU64::new(0),
            last_attempt: ArcSwapOption::empty(),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_staleness_threshold(mut self, threshold: ChronoDuration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    /// Fetch locations, orders and regions and publish them as a new snapshot.
    ///
    /// The three fetches run concurrently under one timeout and are treated
    /// as a unit: if any of them fails, nothing is published.
    pub async fn refresh(&self) -> Result<RefreshSummary, CacheError> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Refresh skipped: another refresh is in flight");
            return Err(CacheError::AlreadyRefreshing);
        }
        let _guard = RefreshGuard(&self.refreshing);

        let started = Instant::now();
        self.last_attempt.store(Some(Arc::new(Utc::now())));

        let fetch = async {
            tokio::try_join!(
                self.source.fetch_locations(),
                self.source.fetch_orders(),
                self.source.fetch_regions(),
            )
        };

        let fetched = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(e)) => Err(CacheError::Source(e)),
            Err(_) => Err(CacheError::Timeout(self.fetch_timeout)),
        };

        match fetched {
            Ok((locations, orders, regions)) => {
                let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
                let snapshot = MarketSnapshot::new(version, Utc::now(), locations, orders, regions);
                let summary = RefreshSummary {
                    version,
                    location_count: snapshot.locations().len(),
                    order_count: snapshot.orders().len(),
                    region_count: snapshot.regions().len(),
                    elapsed: started.elapsed(),
                };

                self.snapshot.store(Some(Arc::new(snapshot)));
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.last_refresh_failed.store(false, Ordering::SeqCst);
                self.source_reachable.store(true, Ordering::SeqCst);

                info!(
                    "Market snapshot v{} published: {} locations, {} orders, {} regions ({:?})",
                    summary.version,
                    summary.location_count,
                    summary.order_count,
                    summary.region_count,
                    summary.elapsed
                );
                Ok(summary)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                self.last_refresh_failed.store(true, Ordering::SeqCst);
                self.source_reachable.store(false, Ordering::SeqCst);

                warn!(
                    "Market refresh failed ({} consecutive): {}; serving last good snapshot",
                    failures, e
                );
                Err(e)
            }
        }
    }

    /// Spawn the background task that refreshes the cache on a fixed interval.
    /// The first refresh runs immediately.
    pub fn spawn_refresh_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!("Refresh loop started (interval: {:?})", interval);
            loop {
                ticker.tick().await;
                // Failures are already logged and counted inside refresh()
                let _ = cache.refresh().await;
            }
        })
    }

    /// The current snapshot, if any refresh has ever succeeded
    pub fn snapshot(&self) -> Option<Arc<MarketSnapshot>> {
        self.snapshot.load_full()
    }

    pub fn state(&self) -> CacheState {
        if self.refreshing.load(Ordering::SeqCst) {
            return CacheState::Refreshing;
        }
        if self.last_refresh_failed.load(Ordering::SeqCst) {
            return CacheState::Failed;
        }
        match self.snapshot.load_full() {
            None => CacheState::Empty,
            Some(s) if s.is_stale(self.staleness_threshold) => CacheState::Stale,
            Some(_) => CacheState::Fresh,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.snapshot
            .load_full()
            .map(|s| s.is_stale(self.staleness_threshold))
            .unwrap_or(false)
    }

    pub fn get_all_locations(&self) -> Vec<Location> {
        self.snapshot
            .load_full()
            .map(|s| s.locations().to_vec())
            .unwrap_or_default()
    }

    pub fn get_all_orders(&self) -> Vec<Order> {
        self.snapshot
            .load_full()
            .map(|s| s.orders().to_vec())
            .unwrap_or_default()
    }

    pub fn get_all_regions(&self) -> Vec<Region> {
        self.snapshot
            .load_full()
            .map(|s| s.regions().to_vec())
            .unwrap_or_default()
    }

    pub fn compute_distance(&self, from: Option<&Position>, to: Option<&Position>) -> f64 {
        compute_distance(from, to)
    }

    pub fn statistics(&self) -> CacheStatistics {
        let snapshot = self.snapshot.load_full();
        let last_refresh_attempt = self.last_attempt.load_full().map(|t| *t);

        let mut stats = CacheStatistics {
            is_refreshing: self.refreshing.load(Ordering::SeqCst),
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            source_reachable: self.source_reachable.load(Ordering::SeqCst),
            last_refresh_attempt,
            ..CacheStatistics::default()
        };

        if let Some(snapshot) = snapshot {
            stats.location_count = snapshot.locations().len();
            stats.order_count = snapshot.orders().len();
            stats.agent_count = snapshot.agent_count();
            stats.item_count = snapshot.item_count();
            stats.region_count = snapshot.regions().len();
            stats.is_stale = snapshot.is_stale(self.staleness_threshold);
            stats.snapshot_version = snapshot.version();
            stats.snapshot_timestamp = Some(snapshot.fetched_at());
        }

        stats
    }
}

impl fmt::Debug for MarketCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketCache")
            .field("state", &self.state())
            .field("fetch_timeout", &self.fetch_timeout)
            .field("staleness_threshold", &self.staleness_threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::{MarketFeed, MockDataSource};
    use crate::models::fixtures::{self, order, t0};

    fn cache_with(source: Arc<MockDataSource>) -> MarketCache {
        MarketCache::new(source, &CacheConfig::default())
    }

    fn location(id: i64, name: &str, position: Option<Position>) -> Location {
        fixtures::location(id, name, 1, position)
    }

    #[test]
    fn test_fresh_cache_statistics() {
        let cache = cache_with(Arc::new(MockDataSource::sample()));
        let stats = cache.statistics();

        assert_eq!(stats.location_count, 0);
        assert_eq!(stats.order_count, 0);
        assert_eq!(stats.agent_count, 0);
        assert_eq!(stats.item_count, 0);
        assert!(!stats.is_stale);
        assert!(!stats.is_refreshing);
        assert_eq!(stats.consecutive_failures, 0);
        assert!(!stats.source_reachable);
        assert_eq!(cache.state(), CacheState::Empty);
        assert!(cache.get_all_orders().is_empty());
        assert!(cache.get_all_locations().is_empty());
        assert!(cache.get_all_regions().is_empty());
    }

    #[test]
    fn test_snapshot_attaches_orders() {
        let orders = vec![
            order(3, (1, "A"), (34, "Tritanium"), 0, 10, 100),
            order(1, (1, "A"), (35, "Pyerite"), 5, 0, 200),
            order(2, (2, "B"), (34, "Tritanium"), 5, 0, 150),
            order(4, (99, "Unknown"), (34, "Tritanium"), 5, 0, 150),
        ];
        let snapshot = MarketSnapshot::new(
            1,
            t0(),
            vec![location(1, "A", None), location(2, "B", None)],
            orders,
            vec![Region::new(1, "Core")],
        );

        let ids: Vec<i64> = snapshot.locations()[0].orders.iter().map(|o| o.order_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(snapshot.locations()[1].orders.len(), 1);
        assert_eq!(snapshot.orders().len(), 4);
        assert_eq!(snapshot.item_count(), 2);
        assert_eq!(snapshot.region_of(2), Some(1));
        assert_eq!(snapshot.region_of(99), None);
    }

    #[test]
    fn test_snapshot_staleness() {
        let snapshot = MarketSnapshot::new(1, t0(), Vec::new(), Vec::new(), Vec::new());
        let threshold = ChronoDuration::minutes(15);

        assert!(!snapshot.is_stale_at(t0() + ChronoDuration::minutes(10), threshold));
        assert!(snapshot.is_stale_at(t0() + ChronoDuration::minutes(16), threshold));
    }

    #[test]
    fn test_snapshot_distance() {
        let snapshot = MarketSnapshot::new(
            1,
            t0(),
            vec![
                location(1, "A", Some(Position::new(0.0, 0.0, 0.0))),
                location(2, "B", Some(Position::new(0.0, 3_000.0, 4_000.0))),
                location(3, "C", None),
            ],
            Vec::new(),
            Vec::new(),
        );

        assert_eq!(snapshot.distance_between(1, 2), 5_000.0);
        assert_eq!(snapshot.distance_between(1, 3), 0.0);
        assert_eq!(snapshot.distance_between(1, 42), 0.0);
    }

    #[tokio::test]
    async fn test_refresh_publishes_snapshot() {
        let cache = cache_with(Arc::new(MockDataSource::sample()));

        let summary = cache.refresh().await.unwrap();
        assert_eq!(summary.version, 1);
        assert_eq!(summary.location_count, 4);

        let stats = cache.statistics();
        assert_eq!(stats.location_count, 4);
        assert_eq!(stats.order_count, 9);
        assert_eq!(stats.item_count, 3);
        assert_eq!(stats.region_count, 2);
        assert_eq!(stats.snapshot_version, 1);
        assert!(stats.source_reachable);
        assert!(stats.last_refresh_attempt.is_some());
        assert_eq!(cache.state(), CacheState::Fresh);

        let total_attached: usize = cache.get_all_locations().iter().map(|l| l.orders.len()).sum();
        assert_eq!(total_attached, 9);
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_snapshot() {
        let source = Arc::new(MockDataSource::sample());
        let cache = cache_with(source.clone());
        cache.refresh().await.unwrap();

        source.set_failing(true);
        assert!(matches!(cache.refresh().await, Err(CacheError::Source(_))));
        assert!(cache.refresh().await.is_err());

        let stats = cache.statistics();
        assert_eq!(stats.consecutive_failures, 2);
        assert!(!stats.source_reachable);
        assert_eq!(stats.order_count, 9);
        assert_eq!(stats.snapshot_version, 1);
        assert_eq!(cache.state(), CacheState::Failed);

        source.set_failing(false);
        let summary = cache.refresh().await.unwrap();
        assert_eq!(summary.version, 2);
        assert_eq!(cache.statistics().consecutive_failures, 0);
        assert_eq!(cache.state(), CacheState::Fresh);
    }

    #[tokio::test]
    async fn test_partial_failure_publishes_nothing() {
        let source = Arc::new(MockDataSource::sample());
        let cache = cache_with(source.clone());
        cache.refresh().await.unwrap();
        let before = cache.snapshot().unwrap();

        source.set_market(Vec::new(), Vec::new(), Vec::new()).await;
        source.set_failing_on(MarketFeed::Orders, true);
        assert!(matches!(cache.refresh().await, Err(CacheError::Source(_))));

        let after = cache.snapshot().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.version(), 1);
        assert_eq!(cache.get_all_locations().len(), 4);
        assert_eq!(cache.get_all_orders().len(), 9);

        let stats = cache.statistics();
        assert_eq!(stats.consecutive_failures, 1);
        assert!(!stats.source_reachable);
        assert_eq!(cache.state(), CacheState::Failed);
    }

    #[tokio::test]
    async fn test_huge_staleness_threshold_is_clamped() {
        let config = CacheConfig {
            staleness_threshold_secs: i64::MAX,
            ..CacheConfig::default()
        };
        let cache = MarketCache::new(Arc::new(MockDataSource::sample()), &config);
        cache.refresh().await.unwrap();
        assert!(!cache.is_stale());
        assert_eq!(cache.state(), CacheState::Fresh);
    }

    #[tokio::test]
    async fn test_failure_on_empty_cache() {
        let source = Arc::new(MockDataSource::sample());
        source.set_failing(true);
        let cache = cache_with(source);

        assert!(cache.refresh().await.is_err());
        assert_eq!(cache.statistics().consecutive_failures, 1);
        assert!(cache.snapshot().is_none());
        assert!(cache.get_all_orders().is_empty());
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let source = Arc::new(MockDataSource::sample());
        source.set_delay(Duration::from_millis(500));
        let cache = cache_with(source).with_fetch_timeout(Duration::from_millis(50));

        let result = cache.refresh().await;
        assert!(matches!(result, Err(CacheError::Timeout(_))));
        assert_eq!(cache.statistics().consecutive_failures, 1);
        assert!(!cache.statistics().is_refreshing);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readers_do_not_wait_on_refresh() {
        let source = Arc::new(MockDataSource::sample());
        let cache = Arc::new(cache_with(source.clone()));
        cache.refresh().await.unwrap();

        source
            .set_market(Vec::new(), vec![order(1, (1, "A"), (34, "Tritanium"), 1, 0, 10)], Vec::new())
            .await;
        source.set_delay(Duration::from_millis(300));

        let background = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.state(), CacheState::Refreshing);
        assert!(cache.statistics().is_refreshing);
        assert_eq!(cache.get_all_orders().len(), 9);
        assert!(matches!(cache.refresh().await, Err(CacheError::AlreadyRefreshing)));

        background.await.unwrap().unwrap();
        assert_eq!(cache.get_all_orders().len(), 1);
        assert_eq!(cache.statistics().snapshot_version, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reads_are_identical() {
        let cache = Arc::new(cache_with(Arc::new(MockDataSource::sample())));
        cache.refresh().await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let stats = cache.statistics();
                    (stats.location_count, stats.order_count, stats.agent_count, stats.item_count)
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert!(results.iter().all(|r| *r == results[0]));
        assert_eq!(results[0].1, 9);
    }

    #[tokio::test]
    async fn test_stale_state() {
        let cache = cache_with(Arc::new(MockDataSource::sample()))
            .with_staleness_threshold(ChronoDuration::milliseconds(-1));
        cache.refresh().await.unwrap();

        assert!(cache.is_stale());
        assert!(cache.statistics().is_stale);
        assert_eq!(cache.state(), CacheState::Stale);
    }

    #[tokio::test]
    async fn test_refresh_loop_populates_cache() {
        let cache = Arc::new(cache_with(Arc::new(MockDataSource::sample())));
        let handle = cache.spawn_refresh_loop(Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.abort();

        assert!(cache.statistics().snapshot_version >= 2);
        assert_eq!(cache.statistics().order_count, 9);
    }
}
