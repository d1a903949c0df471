//! main.rs - Entry point for the market arbitrage scanner
//!
//! Loads configuration, keeps the market cache refreshed in the background
//! and periodically reports cache health, the best opportunities and a set
//! of budget-constrained routes.

use log::{error, info, warn};
use market_arbitrage::config::SourceKind;
use market_arbitrage::converters::{format_distance, format_number, format_quanta};
use market_arbitrage::{
    DataSource, HttpDataSource, MarketCache, MarketConfig, MockDataSource, OpportunityEngine,
    OpportunityProvider, ProfitFilter, RouteOptimizer, NAME, VERSION,
};
use std::path::Path;
use std::sync::Arc;

/// Config file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "market.toml";

/// Number of opportunities shown per report
const TOP_OPPORTUNITIES: usize = 15;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    println!();
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║     Market Arbitrage Scanner v{:<27}║", VERSION);
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    info!("Starting {} v{}", NAME, VERSION);

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = if Path::new(&config_path).exists() {
        MarketConfig::load(&config_path)?
    } else {
        warn!("Config file {} not found, using defaults", config_path);
        MarketConfig::default()
    };

    let source: Arc<dyn DataSource> = match config.source.kind {
        SourceKind::Http => {
            info!("✓ Data source: {}", config.source.base_url);
            Arc::new(HttpDataSource::new(
                &config.source.base_url,
                config.source.request_timeout(),
            )?)
        }
        SourceKind::Mock => {
            info!("✓ Data source: in-memory sample market");
            Arc::new(MockDataSource::sample())
        }
    };

    let cache = Arc::new(MarketCache::new(source, &config.cache));
    let engine = Arc::new(OpportunityEngine::new(Arc::clone(&cache)));
    let optimizer = RouteOptimizer::new(Arc::clone(&engine)).with_chaining(config.routes.chain_legs);

    let interval = config.cache.refresh_interval();
    let refresher = cache.spawn_refresh_loop(interval);

    let mut ticker = tokio::time::interval(interval);
    let mut report_count: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down after {} reports", report_count);
                refresher.abort();
                return Ok(());
            }
        }
        report_count += 1;

        let stats = cache.statistics();
        info!(
            "📡 Report #{}: cache {} | v{} | {} locations, {} orders, {} items, {} agents | failures: {} | source reachable: {}",
            report_count,
            cache.state(),
            stats.snapshot_version,
            stats.location_count,
            stats.order_count,
            stats.item_count,
            stats.agent_count,
            stats.consecutive_failures,
            stats.source_reachable
        );

        if stats.snapshot_version == 0 {
            error!("✗ No market snapshot available yet");
            continue;
        }
        if stats.is_stale {
            warn!("Serving a stale snapshot (taken {:?})", stats.snapshot_timestamp);
        }

        let analysis = engine.analyze_profit_opportunities();
        info!(
            "🎯 {} opportunities, total potential profit {}",
            analysis.total_opportunities,
            format_quanta(analysis.total_potential_profit)
        );

        display_opportunities(engine.as_ref());
        display_routes(&optimizer, config.routes.max_routes, config.routes.budget);
    }
}

/// Display the most profitable opportunities
fn display_opportunities(engine: &OpportunityEngine) {
    let top = engine.find_opportunities(&ProfitFilter::default());
    if top.is_empty() {
        warn!("No opportunities found!");
        return;
    }

    println!();
    println!("┌──────────────────────┬──────────────────────┬──────────────────────┬────────────────┬─────────┬──────────┬──────────┐");
    println!("│ Item                 │ Buy at               │ Sell at              │ Total profit   │ Margin  │ Distance │ Risk     │");
    println!("├──────────────────────┼──────────────────────┼──────────────────────┼────────────────┼─────────┼──────────┼──────────┤");

    for opp in top.iter().take(TOP_OPPORTUNITIES) {
        println!(
            "│ {:20.20} │ {:20.20} │ {:20.20} │ {:>14} │ {:>6}% │ {:>8} │ {:8} │",
            opp.item_name(),
            opp.sell_order.location_name,
            opp.buy_order.location_name,
            format_quanta(opp.total_profit),
            format_number(opp.profit_margin, 1),
            format_distance(opp.distance),
            opp.risk_level.as_str()
        );
    }

    println!("└──────────────────────┴──────────────────────┴──────────────────────┴────────────────┴─────────┴──────────┴──────────┘");
    println!();
}

/// Display routes selected for the configured budget
fn display_routes<P: OpportunityProvider + ?Sized>(
    optimizer: &RouteOptimizer<P>,
    max_routes: usize,
    budget: rust_decimal::Decimal,
) {
    let routes = optimizer.generate_routes(max_routes, budget);
    if routes.is_empty() {
        info!("No route fits a budget of {}", budget);
        return;
    }

    info!("🚚 {} routes for a budget of {}:", routes.len(), budget);
    for (i, route) in routes.iter().enumerate() {
        info!(
            "   {}. {} | invest {} → profit {} | budget used {}",
            i + 1,
            route.format_path(),
            format_quanta(route.total_investment),
            format_quanta(route.total_profit),
            format_quanta(route.used_budget)
        );
    }
}
