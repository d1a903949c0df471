//! models.rs - Core data structures for the market arbitrage engine
//!
//! Defines locations, orders, opportunities, trading routes and the
//! statistics reported by the snapshot cache.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::converters::{
    format_distance, format_integer, format_number, format_quanta, quanta_to_currency,
    QUANTA_PER_UNIT,
};

/// A point in 3D space, in meters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Position { x, y, z }
    }

    /// Euclidean distance to another position
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Euclidean distance between two optional positions.
/// A missing position on either side yields `0.0` (distance unknown).
pub fn compute_distance(a: Option<&Position>, b: Option<&Position>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => a.distance_to(b),
        _ => 0.0,
    }
}

/// A region grouping several locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Region {
    pub region_id: i64,
    pub name: String,
}

impl Region {
    pub fn new(region_id: i64, name: &str) -> Self {
        Region {
            region_id,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A market order. Exactly one of the two quantities is expected to be
/// non-zero; the buy side wins when both are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub order_id: i64,
    pub location_id: i64,
    pub location_name: String,
    pub item_id: i64,
    pub item_name: String,
    pub buy_quantity: i64,
    pub sell_quantity: i64,
    /// Price per unit in quanta
    pub unit_price: i64,
    pub agent_id: i64,
    pub agent_name: String,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_buy_order(&self) -> bool {
        self.buy_quantity > 0
    }

    /// Quantity on the active side, never negative
    pub fn quantity(&self) -> i64 {
        let quantity = if self.is_buy_order() {
            self.buy_quantity
        } else {
            self.sell_quantity
        };
        quantity.max(0)
    }

    /// Unit price in currency
    pub fn price(&self) -> Decimal {
        quanta_to_currency(Some(self.unit_price))
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} x{} @ {} ({})",
            if self.is_buy_order() { "BUY" } else { "SELL" },
            self.item_name,
            self.quantity(),
            format_quanta(self.unit_price),
            self.location_name
        )
    }
}

/// A trading location hosting orders
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub location_id: i64,
    pub name: String,
    pub region_id: i64,
    pub region_name: String,
    pub position: Option<Position>,
    pub updated_at: DateTime<Utc>,
    pub orders: Vec<Order>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.region_name)
    }
}

/// Risk classification based on time left before the sooner order expires
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    #[serde(rename = "Very Low")]
    VeryLow,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_hours_remaining(hours: f64) -> Self {
        if hours < 1.0 {
            RiskLevel::High
        } else if hours < 6.0 {
            RiskLevel::Medium
        } else if hours < 24.0 {
            RiskLevel::Low
        } else {
            RiskLevel::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::VeryLow => "Very Low",
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A profitable pairing: buy from `sell_order`, deliver to `buy_order`.
///
/// All derived metrics are computed once in [`Opportunity::new`]. Money
/// figures are in quanta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Opportunity {
    pub buy_order: Order,
    pub sell_order: Order,
    /// Distance between the two locations in meters
    pub distance: f64,
    pub profit_per_unit: i64,
    pub max_quantity: i64,
    pub total_profit: i64,
    pub profit_margin: f64,
    pub investment_required: i64,
    pub roi: f64,
    pub profit_per_distance: f64,
    pub efficiency_score: f64,
    pub risk_level: RiskLevel,
    pub is_valid: bool,
}

impl Opportunity {
    /// Pair two orders. `as_of` is the reference time for the risk level.
    pub fn new(buy_order: Order, sell_order: Order, distance: f64, as_of: DateTime<Utc>) -> Self {
        let profit_per_unit = buy_order.unit_price.saturating_sub(sell_order.unit_price);
        let max_quantity = buy_order.quantity().min(sell_order.quantity());
        let total_profit = profit_per_unit.saturating_mul(max_quantity);
        let investment_required = sell_order.unit_price.saturating_mul(max_quantity);

        let profit_margin = Self::profit_margin_for(profit_per_unit, sell_order.unit_price);
        let roi = Self::roi_for(total_profit, investment_required);
        let profit_per_distance = Self::profit_per_distance_for(total_profit, distance);
        let efficiency_score =
            Self::efficiency_score_for(profit_per_distance, max_quantity, distance);

        let expires_at = Self::expiry_of(&buy_order, &sell_order);
        let hours_remaining = (expires_at - as_of).num_seconds() as f64 / 3600.0;
        let risk_level = RiskLevel::from_hours_remaining(hours_remaining);

        let is_valid = Self::is_valid_for(profit_per_unit, max_quantity, total_profit);

        Opportunity {
            buy_order,
            sell_order,
            distance,
            profit_per_unit,
            max_quantity,
            total_profit,
            profit_margin,
            investment_required,
            roi,
            profit_per_distance,
            efficiency_score,
            risk_level,
            is_valid,
        }
    }

    fn expiry_of(buy_order: &Order, sell_order: &Order) -> DateTime<Utc> {
        buy_order.expires_at.min(sell_order.expires_at)
    }

    /// When the first of the two orders lapses
    pub fn expires_at(&self) -> DateTime<Utc> {
        Self::expiry_of(&self.buy_order, &self.sell_order)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    /// Margin in percent of the purchase price; 0 when the price is 0
    pub fn profit_margin_for(profit_per_unit: i64, sell_price: i64) -> f64 {
        if sell_price == 0 {
            return 0.0;
        }
        profit_per_unit as f64 / sell_price as f64 * 100.0
    }

    /// Return on investment in percent; 0 when nothing is invested
    pub fn roi_for(total_profit: i64, investment_required: i64) -> f64 {
        if investment_required == 0 {
            return 0.0;
        }
        total_profit as f64 / investment_required as f64 * 100.0
    }

    pub fn profit_per_distance_for(total_profit: i64, distance: f64) -> f64 {
        if distance <= 0.0 || !distance.is_finite() {
            return 0.0;
        }
        total_profit as f64 / distance
    }

    /// `profit_per_distance * ln(1 + max_quantity)`: rewards short hauls first
    /// and large tradeable volume second. Zero when distance or quantity is zero.
    pub fn efficiency_score_for(profit_per_distance: f64, max_quantity: i64, distance: f64) -> f64 {
        if distance <= 0.0 || max_quantity <= 0 {
            return 0.0;
        }
        profit_per_distance * (max_quantity as f64).ln_1p()
    }

    pub fn is_valid_for(profit_per_unit: i64, max_quantity: i64, total_profit: i64) -> bool {
        profit_per_unit > 0 && max_quantity > 0 && total_profit > 0
    }

    pub fn item_id(&self) -> i64 {
        self.buy_order.item_id
    }

    pub fn item_name(&self) -> &str {
        &self.buy_order.item_name
    }

    /// Where the goods are bought
    pub fn origin_location_id(&self) -> i64 {
        self.sell_order.location_id
    }

    /// Where the goods are sold
    pub fn destination_location_id(&self) -> i64 {
        self.buy_order.location_id
    }

    /// Stable identity of the pairing
    pub fn key(&self) -> (i64, i64) {
        (self.buy_order.order_id, self.sell_order.order_id)
    }

    pub fn total_profit_currency(&self) -> Decimal {
        quanta_to_currency(Some(self.total_profit))
    }

    pub fn investment_currency(&self) -> Decimal {
        quanta_to_currency(Some(self.investment_required))
    }

    /// One-line human readable description
    pub fn summary(&self) -> String {
        format!(
            "{}: buy at {} for {}, sell at {} for {} | {}/unit ({}%) x {} = {} | {} m ({} per m)",
            self.item_name(),
            self.sell_order.location_name,
            format_quanta(self.sell_order.unit_price),
            self.buy_order.location_name,
            format_quanta(self.buy_order.unit_price),
            format_quanta(self.profit_per_unit),
            format_number(self.profit_margin, 1),
            format_integer(self.max_quantity),
            format_quanta(self.total_profit),
            format_integer(self.distance as i64),
            format_number(self.profit_per_distance / QUANTA_PER_UNIT as f64, 2),
        )
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {} ({}, {}, risk {})",
            self.item_name(),
            self.sell_order.location_name,
            self.buy_order.location_name,
            format_quanta(self.total_profit),
            format_distance(self.distance),
            self.risk_level
        )
    }
}

/// An ordered sequence of opportunities traded together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingRoute {
    pub legs: Vec<Opportunity>,
    pub total_investment: i64,
    pub total_profit: i64,
    /// Budget consumed by this route and every route selected before it
    pub used_budget: i64,
}

impl TradingRoute {
    /// Build a route; `budget_used_before` is what earlier routes consumed
    pub fn new(legs: Vec<Opportunity>, budget_used_before: i64) -> Self {
        let total_investment = legs
            .iter()
            .fold(0i64, |acc, l| acc.saturating_add(l.investment_required));
        let total_profit = legs
            .iter()
            .fold(0i64, |acc, l| acc.saturating_add(l.total_profit));
        TradingRoute {
            legs,
            total_investment,
            total_profit,
            used_budget: budget_used_before.saturating_add(total_investment),
        }
    }

    pub fn total_hops(&self) -> usize {
        self.legs.len()
    }

    pub fn total_distance(&self) -> f64 {
        self.legs.iter().map(|l| l.distance).sum()
    }

    /// Format the route as a string (e.g., "Jita -> Amarr -> Dodixie")
    pub fn format_path(&self) -> String {
        if self.legs.is_empty() {
            return String::new();
        }

        let mut path = vec![self.legs[0].sell_order.location_name.clone()];
        for leg in &self.legs {
            path.push(leg.buy_order.location_name.clone());
        }
        path.join(" -> ")
    }
}

/// Point-in-time view of the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStatistics {
    pub location_count: usize,
    pub order_count: usize,
    pub agent_count: usize,
    pub item_count: usize,
    pub region_count: usize,
    pub is_stale: bool,
    pub is_refreshing: bool,
    pub consecutive_failures: u32,
    pub source_reachable: bool,
    /// 0 until the first successful refresh
    pub snapshot_version: u64,
    pub snapshot_timestamp: Option<DateTime<Utc>>,
    pub last_refresh_attempt: Option<DateTime<Utc>>,
}

/// Aggregate result of an unfiltered analysis pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketAnalysis {
    pub total_opportunities: usize,
    /// Sum of `total_profit` over all valid opportunities, in quanta
    pub total_potential_profit: i64,
    pub analyzed_at: DateTime<Utc>,
    pub snapshot_version: u64,
}

impl MarketAnalysis {
    pub fn total_potential_profit_currency(&self) -> Decimal {
        quanta_to_currency(Some(self.total_potential_profit))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    const JITA: (i64, &str) = (1, "Jita");
    const AMARR: (i64, &str) = (2, "Amarr");
    const TRITANIUM: (i64, &str) = (34, "Tritanium");

    #[test]
    fn test_order_side_and_quantity() {
        let buy = order(1, JITA, TRITANIUM, 100, 0, 2000);
        assert!(buy.is_buy_order());
        assert_eq!(buy.quantity(), 100);

        let sell = order(2, JITA, TRITANIUM, 0, 80, 1500);
        assert!(!sell.is_buy_order());
        assert_eq!(sell.quantity(), 80);

        let both = order(3, JITA, TRITANIUM, 5, 7, 1500);
        assert!(both.is_buy_order());
        assert_eq!(both.quantity(), 5);

        let negative = order(4, JITA, TRITANIUM, 0, -3, 1500);
        assert_eq!(negative.quantity(), 0);
        assert_eq!(negative.price(), dec!(15.00));
    }

    #[test]
    fn test_opportunity_metrics() {
        let buy = order(1, AMARR, TRITANIUM, 100, 0, 2000);
        let sell = order(2, JITA, TRITANIUM, 0, 80, 1500);
        let opp = Opportunity::new(buy, sell, 1_000_000.0, t0());

        assert_eq!(opp.profit_per_unit, 500);
        assert_eq!(opp.max_quantity, 80);
        assert_eq!(opp.total_profit, 40_000);
        assert!((opp.profit_margin - 33.33).abs() < 0.01);
        assert!((opp.profit_per_distance - 0.04).abs() < 1e-9);
        assert_eq!(opp.investment_required, 120_000);
        assert!((opp.roi - 33.33).abs() < 0.01);
        assert!(opp.is_valid);
        assert_eq!(opp.origin_location_id(), 1);
        assert_eq!(opp.destination_location_id(), 2);
    }

    #[test]
    fn test_roi_and_investment_guards() {
        assert!((Opportunity::roi_for(40_000, 120_000) - 33.33).abs() < 0.01);
        assert_eq!(Opportunity::roi_for(40_000, 0), 0.0);
        assert_eq!(Opportunity::profit_margin_for(500, 0), 0.0);
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(RiskLevel::from_hours_remaining(0.5), RiskLevel::High);
        assert_eq!(RiskLevel::from_hours_remaining(3.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_hours_remaining(12.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_hours_remaining(48.0), RiskLevel::VeryLow);
        assert_eq!(RiskLevel::VeryLow.to_string(), "Very Low");
    }

    #[test]
    fn test_risk_uses_sooner_expiration() {
        let mut buy = order(1, AMARR, TRITANIUM, 100, 0, 2000);
        let sell = order(2, JITA, TRITANIUM, 0, 80, 1500);
        buy.expires_at = t0() + Duration::minutes(30);
        let opp = Opportunity::new(buy, sell, 10.0, t0());
        assert_eq!(opp.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_validity() {
        assert!(Opportunity::is_valid_for(500, 80, 40_000));
        assert!(!Opportunity::is_valid_for(-100, 80, -8_000));

        let buy = order(1, AMARR, TRITANIUM, 100, 0, 1400);
        let sell = order(2, JITA, TRITANIUM, 0, 80, 1500);
        assert!(!Opportunity::new(buy, sell, 10.0, t0()).is_valid);
    }

    #[test]
    fn test_zero_guards() {
        assert_eq!(Opportunity::profit_per_distance_for(40_000, 0.0), 0.0);
        assert_eq!(Opportunity::efficiency_score_for(0.04, 80, 0.0), 0.0);
        assert_eq!(Opportunity::efficiency_score_for(0.04, 0, 1_000.0), 0.0);

        let buy = order(1, AMARR, TRITANIUM, 100, 0, 2000);
        let sell = order(2, JITA, TRITANIUM, 0, 80, 1500);
        let same_spot = Opportunity::new(buy.clone(), sell.clone(), 0.0, t0());
        assert_eq!(same_spot.profit_per_distance, 0.0);
        assert_eq!(same_spot.efficiency_score, 0.0);

        let empty_sell = order(3, JITA, TRITANIUM, 0, 0, 1500);
        let no_quantity = Opportunity::new(buy, empty_sell, 1_000.0, t0());
        assert_eq!(no_quantity.efficiency_score, 0.0);
        assert!(!no_quantity.is_valid);
    }

    #[test]
    fn test_efficiency_prefers_quantity() {
        let small = Opportunity::efficiency_score_for(0.04, 10, 1_000.0);
        let large = Opportunity::efficiency_score_for(0.04, 1_000, 1_000.0);
        assert!(large > small);
        assert!(small > 0.0);
    }

    #[test]
    fn test_summary() {
        let buy = order(1, AMARR, TRITANIUM, 100, 0, 200_000);
        let sell = order(2, JITA, TRITANIUM, 0, 80, 150_000);
        let opp = Opportunity::new(buy, sell, 1_000_000.0, t0());

        assert_eq!(
            opp.summary(),
            "Tritanium: buy at Jita for 1,500.00, sell at Amarr for 2,000.00 | \
             500.00/unit (33.3%) x 80 = 40,000.00 | 1,000,000 m (0.04 per m)"
        );
    }

    #[test]
    fn test_route_aggregates() {
        let a = Opportunity::new(
            order(1, AMARR, TRITANIUM, 100, 0, 2000),
            order(2, JITA, TRITANIUM, 0, 80, 1500),
            1_000.0,
            t0(),
        );
        let b = Opportunity::new(
            order(3, (3, "Dodixie"), TRITANIUM, 10, 0, 1800),
            order(4, AMARR, TRITANIUM, 0, 10, 1600),
            2_000.0,
            t0(),
        );
        let route = TradingRoute::new(vec![a, b], 5_000);

        assert_eq!(route.total_investment, 120_000 + 16_000);
        assert_eq!(route.total_profit, 40_000 + 2_000);
        assert_eq!(route.used_budget, 5_000 + 136_000);
        assert_eq!(route.total_hops(), 2);
        assert_eq!(route.format_path(), "Jita -> Amarr -> Dodixie");
    }

    #[test]
    fn test_route_totals_saturate() {
        let leg = |buy_id: i64, sell_id: i64| {
            Opportunity::new(
                order(buy_id, AMARR, TRITANIUM, 1, 0, 5_000_000_000_000_000_000),
                order(sell_id, JITA, TRITANIUM, 0, 1, 1),
                1_000.0,
                t0(),
            )
        };
        let route = TradingRoute::new(vec![leg(1, 2), leg(3, 4)], i64::MAX - 1);

        assert_eq!(route.total_profit, i64::MAX);
        assert_eq!(route.total_investment, 2);
        assert_eq!(route.used_budget, i64::MAX);
    }

    #[test]
    fn test_expiry_is_earliest_order() {
        let buy = order(1, AMARR, TRITANIUM, 100, 0, 2000);
        let mut sell = order(2, JITA, TRITANIUM, 0, 80, 1500);
        sell.expires_at = t0() + Duration::hours(2);
        let opp = Opportunity::new(buy, sell, 1_000.0, t0());

        assert_eq!(opp.expires_at(), t0() + Duration::hours(2));
        assert!(!opp.is_expired_at(t0()));
        assert!(opp.is_expired_at(t0() + Duration::hours(2)));
    }

    #[test]
    fn test_compute_distance() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(3.0, 4.0, 12.0);
        assert_eq!(compute_distance(Some(&a), Some(&b)), 13.0);
        assert_eq!(compute_distance(Some(&a), None), 0.0);
        assert_eq!(compute_distance(None, None), 0.0);
    }
}
