// ─────────────────────────────────────────────────────────────────────────────
// mm-core: per-asset market-making strategy runner
// ─────────────────────────────────────────────────────────────────────────────
mod cli;
mod error;
mod rounding;
mod config;
mod estimators;
mod quote_engine;
mod inventory;
mod risk_supervisor;
mod dynamic_sizer;
mod auto_tuner;
mod metrics;
mod exchange_adapter;
mod exchange_adapter_impl;
mod order_manager;
mod meta_supervisor;
mod hot_reload;
mod strategy_loop;

// Teacher modules still load-bearing: `exchange`/`signing` back the REST +
// EIP-712 plumbing `exchange_adapter_impl.rs` reuses, `ingestor` is the
// shared L2/trade feed every per-asset task reads from.
mod exchange;
mod signing;
mod ingestor;

use clap::Parser;
use cli::{Cli, ExitCode};
use config::AssetConfig;
use exchange_adapter::ExchangeAdapter;
use exchange_adapter_impl::{HyperliquidAdapter, SimAdapter};
use hot_reload::publish_atomic;
use ingestor::MarketDataBuffer;
use meta_supervisor::{AssetPerformance, MetaSupervisor};
use risk_supervisor::RiskState;
use std::collections::HashMap;
use std::process::ExitCode as ProcessExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use strategy_loop::{AdaptiveStrategy, StrategyLoop};

const TICK_PERIOD_MS: u64 = 1_000;
const MAX_HOLD_MS: u64 = 6 * 3_600 * 1_000;
/// Consecutive circuit-broken ticks before an asset is considered
/// permanently halted for this session (spec.md §6 exit code 4).
const HALT_TICKS_BEFORE_GIVING_UP: u32 = 60;
const DEFAULT_FALLBACK_COINS: &[&str] = &["BTC", "ETH", "SOL", "HYPE"];
/// MetaSupervisor reallocation cadence (spec.md §4.9, §6 "daily").
const META_SUPERVISOR_INTERVAL_MS: u64 = 24 * 3_600 * 1_000;
/// Floor below which the allocator will not shrink an asset's base capital.
const MIN_ASSET_CAPITAL_USD: f64 = 50.0;
/// Metadata (tick size / size decimals) refresh cadence (spec.md §6).
const METADATA_REFRESH_EVERY_N_TICKS: u64 = 3_600;

/// Per-asset `(performance, current base capital)`, refreshed every tick by
/// each asset's task and read once a day by the MetaSupervisor background
/// task (spec.md §6 "background tasks ... MetaSupervisor (daily)").
type SharedPerformance = Arc<Mutex<HashMap<String, (AssetPerformance, f64)>>>;

#[tokio::main]
async fn main() -> ProcessExitCode {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    if let Err(code) = cli.validate() {
        return ProcessExitCode::from(code as u8);
    }

    log::info!("mm-core starting (testnet={})", cli.is_testnet());

    let account_address = std::env::var("HL_ADDRESS").ok();
    let private_key = std::env::var("HL_PRIVATE_KEY").ok();
    let live = account_address.is_some() && private_key.is_some();

    let book = Arc::new(Mutex::new(MarketDataBuffer::new()));

    let symbols: Vec<String> = if let Some(symbol) = &cli.symbol {
        vec![symbol.clone()]
    } else {
        log::info!("fetching Hyperliquid universe for --all");
        match ingestor::fetch_universe_and_ctx(book.clone()).await {
            Ok(coins) if !coins.is_empty() => coins,
            _ => {
                log::warn!("universe fetch failed; falling back to default coin list");
                DEFAULT_FALLBACK_COINS.iter().map(|s| s.to_string()).collect()
            }
        }
    };

    {
        let c = symbols.clone();
        let b = book.clone();
        let stall = ingestor::new_stall_panic_flag();
        let user = account_address.clone();
        tokio::spawn(async move {
            if let Err(e) = ingestor::connect_and_listen(c, b, stall, false, user).await {
                log::error!("L2 ingestor crashed: {e}");
            }
        });
    }

    let capital_per_asset = cli.capital / symbols.len().max(1) as f64;
    let halted = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::with_capacity(symbols.len());
    let performance: SharedPerformance = Arc::new(Mutex::new(HashMap::new()));

    {
        let performance = performance.clone();
        let allocations_path = cli.allocations_path.clone();
        let total_portfolio = cli.capital;
        tokio::spawn(async move {
            let supervisor = MetaSupervisor::new(MIN_ASSET_CAPITAL_USD);
            loop {
                tokio::time::sleep(tokio::time::Duration::from_millis(META_SUPERVISOR_INTERVAL_MS)).await;
                let (perf, prior_capital): (HashMap<String, AssetPerformance>, HashMap<String, f64>) = {
                    let snapshot = performance.lock().unwrap();
                    (
                        snapshot.iter().map(|(k, (p, _))| (k.clone(), *p)).collect(),
                        snapshot.iter().map(|(k, (_, c))| (k.clone(), *c)).collect(),
                    )
                };
                if perf.is_empty() {
                    continue;
                }
                let state = supervisor.run(&perf, &prior_capital, total_portfolio);
                if let Err(e) = publish_atomic(&allocations_path, &state) {
                    log::error!("MetaSupervisor: failed to publish allocations snapshot: {e}");
                } else {
                    log::info!("MetaSupervisor: published daily allocations to {allocations_path}");
                }
            }
        });
    }

    for symbol in &symbols {
        let mut adapter: Box<dyn ExchangeAdapter> = if live {
            let mut hl = HyperliquidAdapter::new(
                account_address.clone().unwrap(),
                private_key.clone().unwrap(),
                book.clone(),
                cli.is_testnet(),
            );
            if let Err(e) = hl.init().await {
                log::error!("HyperliquidAdapter init failed: {e}");
                return ProcessExitCode::from(ExitCode::Misconfiguration as u8);
            }
            Box::new(hl)
        } else {
            log::warn!("{symbol}: HL_ADDRESS/HL_PRIVATE_KEY not set; running against the in-memory simulator");
            let mut sim = SimAdapter::new(symbol_seed(symbol));
            sim.seed_symbol(symbol, 100.0, 8.0, 3);
            Box::new(sim)
        };

        let size_decimals = match adapter.metadata(symbol).await {
            Ok(meta) => meta.size_decimals,
            Err(e) => {
                log::error!("{symbol}: metadata lookup failed: {e}");
                return ProcessExitCode::from(ExitCode::Misconfiguration as u8);
            }
        };

        let asset_config = AssetConfig {
            fee_aware: cli.fee_aware,
            compound: cli.compound,
            ..AssetConfig::new(symbol.clone(), capital_per_asset, size_decimals)
        };
        if let Err(e) = asset_config.validate() {
            log::error!("{symbol}: invalid asset config: {e}");
            return ProcessExitCode::from(ExitCode::Misconfiguration as u8);
        }

        let strategy = StrategyLoop::with_flags(
            asset_config,
            &cli.live_params_path,
            &cli.allocations_path,
            cli.toxicity,
            cli.auto_tune,
        );
        let mut adaptive = AdaptiveStrategy::new(strategy, MAX_HOLD_MS);

        let halted = halted.clone();
        let total = symbols.len();
        let symbol = symbol.clone();
        let performance = performance.clone();
        handles.push(tokio::spawn(async move {
            let mut consecutive_halts = 0u32;
            let mut tick_idx = 0u64;
            loop {
                tokio::time::sleep(tokio::time::Duration::from_millis(TICK_PERIOD_MS)).await;
                tick_idx += 1;
                // Background metadata refresh (spec.md §6 "~1h"): the venue
                // can revise tick size / size decimals without a restart.
                // AssetConfig is immutable and already baked into the live
                // order book, so a drift here is logged, not hot-applied —
                // applying it would require re-deriving VenueGranularity
                // mid-flight, which this pass doesn't attempt.
                if tick_idx % METADATA_REFRESH_EVERY_N_TICKS == 0 {
                    match adapter.metadata(&symbol).await {
                        Ok(meta) if meta.size_decimals != size_decimals => {
                            log::warn!(
                                "{symbol}: venue size_decimals drifted from {size_decimals} to {}; restart to pick up the change",
                                meta.size_decimals
                            );
                        }
                        Ok(_) => {}
                        Err(e) => log::warn!("{symbol}: periodic metadata refresh failed: {e}"),
                    }
                }
                let now_ms = chrono::Utc::now().timestamp_millis() as u64;
                match adaptive.tick(adapter.as_mut(), now_ms).await {
                    Ok(()) => {
                        if adaptive.inner().risk_state() == RiskState::CircuitBreak {
                            consecutive_halts += 1;
                        } else {
                            consecutive_halts = 0;
                        }
                        performance.lock().unwrap().insert(
                            symbol.clone(),
                            (
                                adaptive.inner().performance_snapshot(),
                                adaptive.inner().asset_config().capital_usd,
                            ),
                        );
                    }
                    Err(e) => {
                        log::error!("{symbol}: adapter error: {e}");
                        return Err(ExitCode::UnrecoverableVenueError);
                    }
                }
                if consecutive_halts >= HALT_TICKS_BEFORE_GIVING_UP {
                    log::error!("{symbol}: risk-halted for {consecutive_halts} consecutive ticks, giving up");
                    halted.fetch_add(1, Ordering::SeqCst);
                    if halted.load(Ordering::SeqCst) >= total {
                        return Err(ExitCode::RiskHalted);
                    }
                    return Ok(());
                }
            }
        }));
    }

    for handle in handles {
        if let Ok(Err(code)) = handle.await {
            return ProcessExitCode::from(code as u8);
        }
    }

    ProcessExitCode::from(ExitCode::Normal as u8)
}

fn symbol_seed(symbol: &str) -> u64 {
    symbol.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
}
