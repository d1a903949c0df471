//! filter.rs - Filter, sort and pagination requests and the paged envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::models::{Opportunity, Order, RiskLevel};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Apply the direction to an ascending comparison
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// Clamp a requested page number and size to sane bounds
pub fn clamp_paging(page: usize, page_size: usize) -> (usize, usize) {
    (page.max(1), page_size.clamp(1, MAX_PAGE_SIZE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSortKey {
    UnitPrice,
    Quantity,
    ExpiresAt,
    ItemName,
    LocationName,
}

impl fmt::Display for OrderSortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Order query: every criterion is optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderFilter {
    pub item_id: Option<i64>,
    pub location_id: Option<i64>,
    pub region_id: Option<i64>,
    pub is_buy_order: Option<bool>,
    /// Quanta
    pub min_price: Option<i64>,
    /// Quanta
    pub max_price: Option<i64>,
    pub page: usize,
    pub page_size: usize,
    pub sort_by: OrderSortKey,
    pub sort_direction: SortDirection,
}

impl Default for OrderFilter {
    fn default() -> Self {
        OrderFilter {
            item_id: None,
            location_id: None,
            region_id: None,
            is_buy_order: None,
            min_price: None,
            max_price: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: OrderSortKey::UnitPrice,
            sort_direction: SortDirection::Ascending,
        }
    }
}

impl OrderFilter {
    /// `region_of` resolves an order's location to its region
    pub fn matches(&self, order: &Order, region_of: impl Fn(i64) -> Option<i64>) -> bool {
        if self.item_id.is_some_and(|id| order.item_id != id) {
            return false;
        }
        if self.location_id.is_some_and(|id| order.location_id != id) {
            return false;
        }
        if self.is_buy_order.is_some_and(|buy| order.is_buy_order() != buy) {
            return false;
        }
        if self.min_price.is_some_and(|min| order.unit_price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| order.unit_price > max) {
            return false;
        }
        if let Some(region_id) = self.region_id {
            if region_of(order.location_id) != Some(region_id) {
                return false;
            }
        }
        true
    }

    /// Ties are broken by order id so results are deterministic
    pub fn compare(&self, a: &Order, b: &Order) -> Ordering {
        let ordering = match self.sort_by {
            OrderSortKey::UnitPrice => a.unit_price.cmp(&b.unit_price),
            OrderSortKey::Quantity => a.quantity().cmp(&b.quantity()),
            OrderSortKey::ExpiresAt => a.expires_at.cmp(&b.expires_at),
            OrderSortKey::ItemName => a.item_name.cmp(&b.item_name),
            OrderSortKey::LocationName => a.location_name.cmp(&b.location_name),
        };
        self.sort_direction
            .apply(ordering)
            .then_with(|| a.order_id.cmp(&b.order_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfitSortKey {
    TotalProfit,
    ProfitMargin,
    ProfitPerDistance,
    Roi,
    EfficiencyScore,
    Distance,
}

impl fmt::Display for ProfitSortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opportunity query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfitFilter {
    pub item_id: Option<i64>,
    /// Percent
    pub min_margin: Option<f64>,
    /// Minimum total profit in quanta
    pub min_profit: Option<i64>,
    /// Highest acceptable risk
    pub max_risk: Option<RiskLevel>,
    /// Opportunities touching any of these locations are dropped
    pub excluded_location_ids: Vec<i64>,
    pub page: usize,
    pub page_size: usize,
    pub sort_by: ProfitSortKey,
    pub sort_direction: SortDirection,
}

impl Default for ProfitFilter {
    fn default() -> Self {
        ProfitFilter {
            item_id: None,
            min_margin: None,
            min_profit: None,
            max_risk: None,
            excluded_location_ids: Vec::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: ProfitSortKey::TotalProfit,
            sort_direction: SortDirection::Descending,
        }
    }
}

impl ProfitFilter {
    pub fn matches(&self, opportunity: &Opportunity) -> bool {
        if self.item_id.is_some_and(|id| opportunity.item_id() != id) {
            return false;
        }
        if self.min_margin.is_some_and(|m| opportunity.profit_margin < m) {
            return false;
        }
        if self.min_profit.is_some_and(|p| opportunity.total_profit < p) {
            return false;
        }
        if self.max_risk.is_some_and(|r| opportunity.risk_level > r) {
            return false;
        }
        !self.excluded_location_ids.iter().any(|id| {
            *id == opportunity.origin_location_id() || *id == opportunity.destination_location_id()
        })
    }

    /// Ties are broken by (buy order id, sell order id)
    pub fn compare(&self, a: &Opportunity, b: &Opportunity) -> Ordering {
        let ordering = match self.sort_by {
            ProfitSortKey::TotalProfit => a.total_profit.cmp(&b.total_profit),
            ProfitSortKey::ProfitMargin => a.profit_margin.total_cmp(&b.profit_margin),
            ProfitSortKey::ProfitPerDistance => a.profit_per_distance.total_cmp(&b.profit_per_distance),
            ProfitSortKey::Roi => a.roi.total_cmp(&b.roi),
            ProfitSortKey::EfficiencyScore => a.efficiency_score.total_cmp(&b.efficiency_score),
            ProfitSortKey::Distance => a.distance.total_cmp(&b.distance),
        };
        self.sort_direction
            .apply(ordering)
            .then_with(|| a.key().cmp(&b.key()))
    }
}

/// One page of results plus the paging envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResponse<T> {
    pub data: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total_count: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
    pub snapshot_timestamp: Option<DateTime<Utc>>,
}

impl<T> PagedResponse<T> {
    /// Cut one page out of an already sorted list. Page and size are clamped.
    pub fn paginate(
        items: Vec<T>,
        page: usize,
        page_size: usize,
        snapshot_timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        let (page, page_size) = clamp_paging(page, page_size);
        let total_count = items.len();
        let total_pages = total_count.div_ceil(page_size);

        let data = items
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        PagedResponse {
            data,
            page,
            page_size,
            total_count,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
            snapshot_timestamp,
        }
    }
}
