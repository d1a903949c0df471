//! Market Arbitrage Engine
//!
//! Serves buy/sell orders from many trading locations out of an in-memory
//! snapshot cache, finds cross-location arbitrage opportunities in it, and
//! picks budget-constrained trading routes.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 DataSource Trait                     │
//! │  - fetch_locations() / fetch_orders()                │
//! │  - fetch_regions()                                   │
//! └──────────┬──────────────────────────────┬───────────┘
//!            │                              │
//!            ▼                              ▼
//! ┌─────────────────┐           ┌─────────────────┐
//! │ HttpDataSource  │           │ MockDataSource  │
//! │  (Production)   │           │  (Testing)      │
//! └────────┬────────┘           └─────────────────┘
//!          │  refresh loop (atomic snapshot swap)
//!          ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                   MarketCache                        │
//! │  - snapshot() / statistics() / get_all_*()           │
//! └────────────────────────┬────────────────────────────┘
//!                          ▼
//! ┌─────────────────────────────────────────────────────┐
//! │               OpportunityEngine                      │
//! │  - find_opportunities() / get_paged_*()              │
//! └────────────────────────┬────────────────────────────┘
//!                          ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                 RouteOptimizer                       │
//! │  - generate_routes(max_routes, budget)               │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod converters;
pub mod data_source;
pub mod engine;
pub mod error;
pub mod filter;
pub mod models;
pub mod optimizer;

// Re-export commonly used types
pub use cache::{CacheState, MarketCache, MarketSnapshot, RefreshSummary};
pub use config::MarketConfig;
pub use data_source::{DataSource, HttpDataSource, MarketFeed, MockDataSource};
pub use engine::{OpportunityEngine, OpportunityProvider};
pub use error::CacheError;
pub use filter::{
    OrderFilter, OrderSortKey, PagedResponse, ProfitFilter, ProfitSortKey, SortDirection,
};
pub use models::{
    compute_distance,
    CacheStatistics,
    Location,
    MarketAnalysis,
    Opportunity,
    Order,
    Position,
    Region,
    RiskLevel,
    TradingRoute,
};
pub use optimizer::RouteOptimizer;

/// Version of the arbitrage engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the package
pub const NAME: &str = env!("CARGO_PKG_NAME");
