//! optimizer.rs - Budget-constrained route selection
//!
//! Picks at most `max_routes` opportunities whose combined investment fits
//! the budget, maximizing total profit. Small candidate sets are solved
//! exactly; larger ones are filled greedily by profit density (profit per
//! unit of investment). No two selected legs may share an order.

use log::debug;
use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::converters::currency_to_quanta;
use crate::engine::OpportunityProvider;
use crate::filter::ProfitFilter;
use crate::models::{Opportunity, TradingRoute};

/// Candidate counts up to this size are searched exhaustively
pub const EXACT_SEARCH_LIMIT: usize = 16;

pub struct RouteOptimizer<P: OpportunityProvider + ?Sized> {
    provider: Arc<P>,
    chain_legs: bool,
}

impl<P: OpportunityProvider + ?Sized> RouteOptimizer<P> {
    pub fn new(provider: Arc<P>) -> Self {
        RouteOptimizer {
            provider,
            chain_legs: false,
        }
    }

    /// Join legs where one ends at the location the next starts from
    pub fn with_chaining(mut self, enabled: bool) -> Self {
        self.chain_legs = enabled;
        self
    }

    /// Select routes for a budget given in currency. Returns an empty list
    /// when nothing fits.
    pub fn generate_routes(&self, max_routes: usize, budget: Decimal) -> Vec<TradingRoute> {
        let budget = currency_to_quanta(Some(budget));
        if max_routes == 0 || budget <= 0 {
            return Vec::new();
        }

        let candidates = self.candidates(budget);
        if candidates.is_empty() {
            debug!("No opportunity fits a budget of {} quanta", budget);
            return Vec::new();
        }

        let selected = if candidates.len() <= EXACT_SEARCH_LIMIT {
            select_exact(&candidates, max_routes, budget)
        } else {
            select_greedy(&candidates, max_routes, budget)
        };

        let legs: Vec<Opportunity> = selected.into_iter().map(|i| candidates[i].clone()).collect();
        let groups = if self.chain_legs {
            chain(legs)
        } else {
            legs.into_iter().map(|leg| vec![leg]).collect()
        };

        let routes = build_routes(groups);
        debug!(
            "Selected {} routes from {} candidates, using {} of {} quanta",
            routes.len(),
            candidates.len(),
            routes.last().map(|r| r.used_budget).unwrap_or(0),
            budget
        );
        routes
    }

    /// Affordable, distinct opportunities sorted by descending profit density
    fn candidates(&self, budget: i64) -> Vec<Opportunity> {
        let mut seen = HashSet::new();
        let mut candidates: Vec<Opportunity> = self
            .provider
            .find_opportunities(&ProfitFilter::default())
            .into_iter()
            .filter(|o| o.is_valid && o.investment_required > 0 && o.investment_required <= budget)
            .filter(|o| seen.insert(o.key()))
            .collect();

        candidates.sort_by(|a, b| {
            density(b)
                .total_cmp(&density(a))
                .then_with(|| b.total_profit.cmp(&a.total_profit))
                .then_with(|| a.key().cmp(&b.key()))
        });
        candidates
    }
}

fn density(opportunity: &Opportunity) -> f64 {
    opportunity.total_profit as f64 / opportunity.investment_required as f64
}

fn shares_order(chosen: &[usize], candidates: &[Opportunity], next: &Opportunity) -> bool {
    chosen.iter().any(|&i| {
        candidates[i].buy_order.order_id == next.buy_order.order_id
            || candidates[i].sell_order.order_id == next.sell_order.order_id
    })
}

fn select_greedy(candidates: &[Opportunity], max_routes: usize, budget: i64) -> Vec<usize> {
    let mut chosen = Vec::new();
    let mut remaining = budget;

    for (i, candidate) in candidates.iter().enumerate() {
        if chosen.len() == max_routes {
            break;
        }
        if candidate.investment_required > remaining || shares_order(&chosen, candidates, candidate) {
            continue;
        }
        remaining -= candidate.investment_required;
        chosen.push(i);
    }
    chosen
}

struct Search<'a> {
    candidates: &'a [Opportunity],
    max_routes: usize,
    chosen: Vec<usize>,
    best: Vec<usize>,
    best_profit: i64,
    best_investment: i64,
}

impl Search<'_> {
    fn run(&mut self, next: usize, remaining: i64, profit: i64, investment: i64) {
        if profit > self.best_profit
            || (profit == self.best_profit && investment < self.best_investment)
        {
            self.best = self.chosen.clone();
            self.best_profit = profit;
            self.best_investment = investment;
        }
        if self.chosen.len() == self.max_routes {
            return;
        }

        for i in next..self.candidates.len() {
            let candidate = &self.candidates[i];
            if candidate.investment_required > remaining
                || shares_order(&self.chosen, self.candidates, candidate)
            {
                continue;
            }
            self.chosen.push(i);
            self.run(
                i + 1,
                remaining - candidate.investment_required,
                profit.saturating_add(candidate.total_profit),
                investment.saturating_add(candidate.investment_required),
            );
            self.chosen.pop();
        }
    }
}

fn select_exact(candidates: &[Opportunity], max_routes: usize, budget: i64) -> Vec<usize> {
    let mut search = Search {
        candidates,
        max_routes,
        chosen: Vec::new(),
        best: Vec::new(),
        best_profit: 0,
        best_investment: 0,
    };
    search.run(0, budget, 0, 0);
    search.best
}

/// Group legs into multi-stop routes, most profitable legs first. A group
/// grows forward from its last destination and backward from its first origin.
fn chain(mut legs: Vec<Opportunity>) -> Vec<Vec<Opportunity>> {
    legs.sort_by(|a, b| b.total_profit.cmp(&a.total_profit).then_with(|| a.key().cmp(&b.key())));

    let mut used = vec![false; legs.len()];
    let mut groups = Vec::new();

    for start in 0..legs.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let mut group = VecDeque::from([start]);

        loop {
            let tail = group.back().map_or(start, |&i| i);
            let head = group.front().map_or(start, |&i| i);
            let at_end = legs[tail].destination_location_id();
            let at_start = legs[head].origin_location_id();

            if let Some(i) = (0..legs.len()).find(|&i| !used[i] && legs[i].origin_location_id() == at_end) {
                used[i] = true;
                group.push_back(i);
            } else if let Some(i) =
                (0..legs.len()).find(|&i| !used[i] && legs[i].destination_location_id() == at_start)
            {
                used[i] = true;
                group.push_front(i);
            } else {
                break;
            }
        }
        groups.push(group);
    }

    groups
        .into_iter()
        .map(|group| group.into_iter().map(|i| legs[i].clone()).collect())
        .collect()
}

/// Order routes by profit and fill in the rolling budget figure
fn build_routes(groups: Vec<Vec<Opportunity>>) -> Vec<TradingRoute> {
    let mut routes: Vec<TradingRoute> = groups.into_iter().map(|g| TradingRoute::new(g, 0)).collect();
    routes.sort_by(|a, b| {
        b.total_profit
            .cmp(&a.total_profit)
            .then_with(|| a.legs[0].key().cmp(&b.legs[0].key()))
    });

    let mut used = 0;
    routes
        .into_iter()
        .map(|route| {
            let route = TradingRoute::new(route.legs, used);
            used = route.used_budget;
            route
        })
        .collect()
}
