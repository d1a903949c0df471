//! engine.rs - Cross-location arbitrage detection
//!
//! For every item in the current snapshot, pairs each buy order with each
//! cheaper sell order at a different location. The full sorted list of valid
//! opportunities is computed once per snapshot version and reused by every
//! filtered or paged query against that snapshot.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{MarketCache, MarketSnapshot};
use crate::filter::{OrderFilter, PagedResponse, ProfitFilter};
use crate::models::{MarketAnalysis, Opportunity, Order};

/// Anything that can answer opportunity queries
pub trait OpportunityProvider: Send + Sync {
    /// All opportunities matching the filter, sorted by it, unpaged
    fn find_opportunities(&self, filter: &ProfitFilter) -> Vec<Opportunity>;
}

/// Valid opportunities derived from one snapshot
#[derive(Debug)]
struct AnalysisPass {
    version: u64,
    snapshot_timestamp: DateTime<Utc>,
    analyzed_at: DateTime<Utc>,
    /// Sorted by the default profit ordering
    opportunities: Vec<Opportunity>,
}

#[derive(Debug)]
pub struct OpportunityEngine {
    cache: Arc<MarketCache>,
    last_pass: ArcSwapOption<AnalysisPass>,
}

impl OpportunityEngine {
    pub fn new(cache: Arc<MarketCache>) -> Self {
        OpportunityEngine {
            cache,
            last_pass: ArcSwapOption::empty(),
        }
    }

    pub fn cache(&self) -> &Arc<MarketCache> {
        &self.cache
    }

    /// Pair every buy order with every cheaper sell order of the same item at
    /// another location, keeping only valid opportunities. Orders already
    /// expired when the snapshot was taken are skipped.
    pub fn pair_orders(snapshot: &MarketSnapshot) -> Vec<Opportunity> {
        let mut by_item: BTreeMap<i64, (Vec<&Order>, Vec<&Order>)> = BTreeMap::new();
        let as_of = snapshot.fetched_at();
        for order in snapshot.orders().iter().filter(|o| o.expires_at > as_of) {
            let sides = by_item.entry(order.item_id).or_default();
            if order.is_buy_order() {
                sides.0.push(order);
            } else {
                sides.1.push(order);
            }
        }

        let mut opportunities = Vec::new();

        for (buys, sells) in by_item.values() {
            for buy in buys {
                for sell in sells {
                    if buy.location_id == sell.location_id || buy.unit_price <= sell.unit_price {
                        continue;
                    }

                    let distance = snapshot.distance_between(sell.location_id, buy.location_id);
                    let opportunity = Opportunity::new((*buy).clone(), (*sell).clone(), distance, as_of);
                    if opportunity.is_valid {
                        opportunities.push(opportunity);
                    }
                }
            }
        }

        let default_order = ProfitFilter::default();
        opportunities.sort_by(|a, b| default_order.compare(a, b));
        opportunities
    }

    fn current_pass(&self) -> Option<Arc<AnalysisPass>> {
        let snapshot = self.cache.snapshot()?;

        if let Some(pass) = self.last_pass.load_full() {
            if pass.version == snapshot.version() {
                return Some(pass);
            }
        }

        let started = Instant::now();
        let opportunities = Self::pair_orders(&snapshot);
        debug!(
            "Analyzed snapshot v{}: {} opportunities from {} orders in {:?}",
            snapshot.version(),
            opportunities.len(),
            snapshot.orders().len(),
            started.elapsed()
        );

        let pass = Arc::new(AnalysisPass {
            version: snapshot.version(),
            snapshot_timestamp: snapshot.fetched_at(),
            analyzed_at: Utc::now(),
            opportunities,
        });
        self.last_pass.store(Some(Arc::clone(&pass)));
        Some(pass)
    }

    /// Filter, sort and paginate the opportunities of the current snapshot
    pub fn analyze(&self, filter: &ProfitFilter) -> PagedResponse<Opportunity> {
        self.get_paged_opportunities(filter)
    }

    pub fn get_paged_opportunities(&self, filter: &ProfitFilter) -> PagedResponse<Opportunity> {
        let pass = self.current_pass();
        let timestamp = pass.as_ref().map(|p| p.snapshot_timestamp);
        let items = pass
            .map(|p| Self::select(&p.opportunities, filter, Utc::now()))
            .unwrap_or_default();
        PagedResponse::paginate(items, filter.page, filter.page_size, timestamp)
    }

    /// Matching opportunities whose orders are still open at `now`
    fn select(
        opportunities: &[Opportunity],
        filter: &ProfitFilter,
        now: DateTime<Utc>,
    ) -> Vec<Opportunity> {
        let mut selected: Vec<Opportunity> = opportunities
            .iter()
            .filter(|o| !o.is_expired_at(now) && filter.matches(o))
            .cloned()
            .collect();
        selected.sort_by(|a, b| filter.compare(a, b));
        selected
    }

    /// Totals over every valid, unexpired opportunity in the current snapshot
    pub fn analyze_profit_opportunities(&self) -> MarketAnalysis {
        match self.current_pass() {
            Some(pass) => {
                let now = Utc::now();
                let (count, profit) = pass
                    .opportunities
                    .iter()
                    .filter(|o| !o.is_expired_at(now))
                    .fold((0usize, 0i64), |(n, total), o| {
                        (n + 1, total.saturating_add(o.total_profit))
                    });
                MarketAnalysis {
                    total_opportunities: count,
                    total_potential_profit: profit,
                    analyzed_at: pass.analyzed_at,
                    snapshot_version: pass.version,
                }
            }
            None => MarketAnalysis {
                total_opportunities: 0,
                total_potential_profit: 0,
                analyzed_at: Utc::now(),
                snapshot_version: 0,
            },
        }
    }

    pub fn get_paged_orders(&self, filter: &OrderFilter) -> PagedResponse<Order> {
        let Some(snapshot) = self.cache.snapshot() else {
            return PagedResponse::paginate(Vec::new(), filter.page, filter.page_size, None);
        };

        let mut orders: Vec<Order> = snapshot
            .orders()
            .iter()
            .filter(|o| filter.matches(o, |loc| snapshot.region_of(loc)))
            .cloned()
            .collect();
        orders.sort_by(|a, b| filter.compare(a, b));

        PagedResponse::paginate(orders, filter.page, filter.page_size, Some(snapshot.fetched_at()))
    }
}

impl OpportunityProvider for OpportunityEngine {
    fn find_opportunities(&self, filter: &ProfitFilter) -> Vec<Opportunity> {
        self.current_pass()
            .map(|p| Self::select(&p.opportunities, filter, Utc::now()))
            .unwrap_or_default()
    }
}
