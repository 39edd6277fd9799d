//! Per-asset cooperative coordinator tying estimators, QuoteEngine,
//! Inventory, RiskSupervisor, DynamicSizer, OrderManager, AutoTuner, and
//! hot-reload into one task (spec.md §4.8).
//!
//! Grounded in the teacher's `main.rs` 100ms quoting loop (read market
//! data, recompute grid, reconcile, sleep) generalized from a single
//! free-running `tokio::main` body into an owned, steppable `tick()` so
//! each asset's task is this struct driven by one spawn per asset.

use crate::auto_tuner::{AutoTuner, WindowMetrics};
use crate::config::AssetConfig;
use crate::dynamic_sizer::{DynamicSizer, SizerInputs, VolRegime};
use crate::estimators::{BookImbalance, DirectionalSignal, FillSide, ToxicityDetector, Volatility};
use crate::exchange_adapter::{AdapterError, AdapterResult, ExchangeAdapter};
use crate::hot_reload::{allocations_poller, live_params_poller, LiveParamsSnapshot, SnapshotPoller};
use crate::inventory::{Inventory, Side};
use crate::meta_supervisor::{AllocatorState, AssetPerformance};
use crate::metrics::{self, DayAccumulator, Metrics};
use crate::order_manager::OrderManager;
use crate::quote_engine::{QuoteEngine, QuoteInputs};
use crate::risk_supervisor::{RiskInputs, RiskSupervisor};
use crate::rounding::VenueGranularity;
use chrono::Utc;
use log::info;

const HOT_RELOAD_EVERY_N_TICKS: u64 = 3_600; // spec.md §4.8: "every N ticks (~ hourly)" at a 1s tick period
const AUTO_TUNE_WINDOW_MS: u64 = 4 * 3_600 * 1_000;
const DEPTH: usize = 10;
/// Per-call budget for venue I/O (spec.md §6): the teacher's adapter has no
/// explicit timeouts, so a stalled TCP connection would hang a tick forever.
const ADAPTER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Bounds one adapter (or `OrderManager`, which itself calls the adapter)
/// operation to [`ADAPTER_TIMEOUT`], surfacing an expiry as a transient
/// error the StrategyLoop/caller can retry next tick.
async fn with_timeout<T>(fut: impl std::future::Future<Output = AdapterResult<T>>) -> AdapterResult<T> {
    match tokio::time::timeout(ADAPTER_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Transient {
            kind: "adapter call exceeded timeout".to_string(),
        }),
    }
}

/// Owns every per-asset component exclusively (spec.md §3 Ownership).
pub struct StrategyLoop {
    symbol: String,
    asset_config: AssetConfig,
    granularity: VenueGranularity,

    volatility: Volatility,
    imbalance: BookImbalance,
    signal: DirectionalSignal,
    toxicity: ToxicityDetector,

    inventory: Inventory,
    risk: RiskSupervisor,
    sizer: DynamicSizer,
    tuner: AutoTuner,
    metrics: Metrics,
    day_acc: Option<DayAccumulator>,
    order_manager: OrderManager,

    live_params_poller: SnapshotPoller<LiveParamsSnapshot>,
    allocations_poller: SnapshotPoller<AllocatorState>,

    tick_count: u64,
    last_auto_tune_ms: u64,
    api_errors_last_60s: u32,

    /// CLI `--toxicity`: when off, the detector still runs (so its metrics
    /// keep getting logged) but its reading is not fed into the quote, so
    /// the always-on τ>0.8 gate in `QuoteEngine` never trips from it.
    toxicity_enabled: bool,
    /// CLI `--auto-tune`: when off, step 9 is skipped entirely.
    auto_tune_enabled: bool,
}

impl StrategyLoop {
    pub fn new(asset_config: AssetConfig, live_params_path: &str, allocations_path: &str) -> Self {
        Self::with_flags(asset_config, live_params_path, allocations_path, true, true)
    }

    pub fn with_flags(
        asset_config: AssetConfig,
        live_params_path: &str,
        allocations_path: &str,
        toxicity_enabled: bool,
        auto_tune_enabled: bool,
    ) -> Self {
        let granularity = VenueGranularity {
            size_decimals: asset_config.size_decimals,
        };
        let quote_params = asset_config.quote_params;
        let risk_limits = asset_config.risk_limits;
        Self {
            symbol: asset_config.symbol.clone(),
            order_manager: OrderManager::new(asset_config.symbol.clone(), 1.0, 20),
            sizer: DynamicSizer::new(quote_params.order_size_usd * 0.25, quote_params.order_size_usd * 1.5),
            tuner: AutoTuner::new(quote_params),
            metrics: Metrics::new(30),
            day_acc: None,
            asset_config,
            granularity,
            volatility: Volatility::new(20.0),
            imbalance: BookImbalance::new(5, 20.0),
            signal: DirectionalSignal::new(1e-5, 1.0, 14, 3),
            toxicity: ToxicityDetector::new(300_000, 10.0),
            inventory: Inventory::new(),
            risk: RiskSupervisor::new(risk_limits),
            live_params_poller: live_params_poller(live_params_path),
            allocations_poller: allocations_poller(allocations_path),
            tick_count: 0,
            last_auto_tune_ms: 0,
            api_errors_last_60s: 0,
            toxicity_enabled,
            auto_tune_enabled,
        }
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn asset_config(&self) -> &AssetConfig {
        &self.asset_config
    }

    pub fn risk_state(&self) -> crate::risk_supervisor::RiskState {
        self.risk.state()
    }

    /// Snapshot fed to the daily `MetaSupervisor` allocation run.
    pub fn performance_snapshot(&self) -> AssetPerformance {
        AssetPerformance {
            sharpe: self.metrics.sharpe(),
            total_return: self.metrics.total_return(),
            max_drawdown: self.metrics.max_drawdown(),
            profitable_day_ratio: self.metrics.profitable_day_ratio(),
        }
    }

    /// Runs one 1s tick of the loop: the ten steps of spec.md §4.8.
    pub async fn tick(&mut self, adapter: &mut dyn ExchangeAdapter, now_ms: u64) -> AdapterResult<()> {
        self.tick_count += 1;

        if self.day_acc.is_none() {
            self.day_acc = Some(DayAccumulator::start(
                now_ms,
                self.inventory.realised_pnl,
                self.inventory.total_fees,
                self.inventory.buy_fill_count,
                self.inventory.sell_fill_count,
            ));
        }

        // 1. Read mid, book top-N, recent trades.
        let mid = with_timeout(adapter.mid_price(&self.symbol)).await?;
        let (bids, asks) = with_timeout(adapter.order_book(&self.symbol, DEPTH)).await?;

        // 2. Update estimators.
        let vol_bps = self.volatility.update(mid);
        let book_imbalance = self.imbalance.update(&bids, &asks);
        let signal = self.signal.update(mid);
        let atr = (vol_bps / 1e4 * mid).max(1e-9);
        let tau = self.toxicity.tick(now_ms, mid, atr);

        // 3. Hot-reload check.
        self.maybe_hot_reload();

        // 4. Compute quote.
        let market_spread_bps = match (bids.first(), asks.first()) {
            (Some((bid_px, _)), Some((ask_px, _))) if mid > 0.0 => Some((ask_px - bid_px) / mid * 1e4),
            _ => None,
        };
        let quote_inputs = QuoteInputs {
            mid,
            volatility_bps: vol_bps,
            net_position: self.inventory.net_position,
            max_position: self.asset_config.risk_limits.max_position_usd / mid.max(1e-9),
            signal,
            toxicity: if self.toxicity_enabled { tau } else { 0.0 },
            market_spread_bps,
            book_imbalance,
        };
        let mut quote = QuoteEngine::quote(
            &self.asset_config.quote_params,
            self.asset_config.maker_fee_bps,
            self.asset_config.fee_aware,
            &quote_inputs,
        );

        // 5. RiskSupervisor gate.
        let net_position_usd = self.inventory.net_position * mid;
        let risk_mask = self.risk.evaluate(&RiskInputs {
            now: Utc::now(),
            rolling_daily_net_pnl: self.inventory.net_pnl(),
            capital_usd: self.asset_config.capital_usd,
            api_errors_last_60s: self.api_errors_last_60s,
            net_position_usd,
        });
        quote.suppress_bid |= risk_mask.suppress_bid;
        quote.suppress_ask |= risk_mask.suppress_ask;

        if risk_mask.cancel_all_and_halt {
            with_timeout(adapter.cancel_all(&self.symbol)).await?;
            info!("{}: circuit break — cancelled all orders, sleeping until recovery", self.symbol);
            return Ok(());
        }

        if !quote.suppress_bid && !quote.suppress_ask && mid > 0.0 {
            let quoted_spread_bps = (quote.levels[0].ask_price - quote.levels[0].bid_price) / mid * 1e4;
            if let Some(acc) = self.day_acc.as_mut() {
                acc.sample_tick(self.inventory.net_position, quoted_spread_bps, tau);
            }
        }

        // 6. DynamicSizer rescales order_size_usd before reconciliation.
        let size_multiplier = self.sizer.size(
            self.asset_config.quote_params.order_size_usd,
            &SizerInputs {
                vol_regime: classify_vol_regime(vol_bps),
                fill_rate: self.metrics.fill_rate(),
                target_fill_rate: 0.25,
                inventory_utilisation: quote_inputs.net_position.abs() / quote_inputs.max_position.max(1e-9),
                toxicity_ema: tau,
                drawdown_7d: self.metrics.max_drawdown(),
                drawdown_threshold: 0.15,
            },
        ) / self.asset_config.quote_params.order_size_usd;
        for level in quote.levels.iter_mut() {
            level.bid_size *= size_multiplier;
            level.ask_size *= size_multiplier;
        }

        // 7. Submit reconciliation.
        let intents = self.order_manager.reconcile(&quote, mid, self.granularity);
        with_timeout(self.order_manager.submit(adapter, intents, now_ms)).await?;

        // 8. Pull fills, update Inventory and Metrics.
        let open_orders = with_timeout(adapter.open_orders(&self.symbol)).await?;
        let fills = self.order_manager.diff_fills(&open_orders, true, now_ms);
        for fill in &fills {
            let side = if fill.side_is_buy { Side::Buy } else { Side::Sell };
            self.inventory.record_fill(side, fill.price, fill.size, fill.fee, fill.timestamp_ms);
            self.toxicity.record_fill(
                if fill.side_is_buy { FillSide::Buy } else { FillSide::Sell },
                fill.price,
                fill.timestamp_ms,
            );
            if let Some(acc) = self.day_acc.as_mut() {
                acc.sample_fill(mid, fill.price, fill.side_is_buy);
            }
        }
        self.metrics.record_quote_attempt(!fills.is_empty());
        let equity = self.asset_config.capital_usd + self.inventory.mark_to_market(mid) + self.inventory.net_pnl();
        self.metrics.record_equity_point(equity);

        // Flush the elapsed day's DailyBucket to CSV and feed its return
        // into the rolling Sharpe/profitable-day-ratio window (spec.md §6).
        if let Some(acc) = self.day_acc {
            if acc.day_elapsed(now_ms) {
                let (bucket, next_acc) = acc.flush(
                    now_ms,
                    self.inventory.realised_pnl,
                    self.inventory.total_fees,
                    self.inventory.buy_fill_count,
                    self.inventory.sell_fill_count,
                    self.metrics.max_drawdown(),
                );
                let pct_return = bucket.net_pnl / self.asset_config.capital_usd.max(1.0);
                self.metrics.record_daily_return(pct_return);

                let path = format!("data/metrics/{}.csv", self.symbol);
                if let Err(err) = metrics::append_daily_bucket(&path, &bucket) {
                    metrics::log_append_failure(std::path::Path::new(&path), &err);
                }
                self.day_acc = Some(next_acc);
            }
        }

        // CLI `--compound`: base_capital is the floor set by the allocator;
        // reinvested PnL may grow the active capital above it, but losses
        // never shrink it below that floor (spec.md §4.9 capital rule).
        if self.asset_config.compound && equity > self.asset_config.capital_usd {
            self.asset_config = AssetConfig { capital_usd: equity, ..self.asset_config.clone() };
        }

        // 9. Hand metrics to AutoTuner every 4h.
        if self.auto_tune_enabled && now_ms.saturating_sub(self.last_auto_tune_ms) >= AUTO_TUNE_WINDOW_MS {
            self.last_auto_tune_ms = now_ms;
            let window_metrics = WindowMetrics {
                sharpe: self.metrics.sharpe(),
                fill_rate: self.metrics.fill_rate(),
                profitable_day_ratio: self.metrics.profitable_day_ratio(),
                inventory_utilisation: quote_inputs.net_position.abs() / quote_inputs.max_position.max(1e-9),
            };
            if let Some(next_params) = self.tuner.observe(now_ms, &self.asset_config.quote_params, window_metrics) {
                self.asset_config = self.asset_config.with_quote_params(next_params);
                info!("{}: auto-tuner swapped in new QuoteParams", self.symbol);
            }
        }

        // 10. Arm dead-man switch if due.
        with_timeout(self.order_manager.maybe_arm_dead_mans_switch(adapter, now_ms)).await?;

        Ok(())
    }

    fn maybe_hot_reload(&mut self) {
        if self.tick_count % HOT_RELOAD_EVERY_N_TICKS != 0 {
            return;
        }
        if let Ok(Some(snapshot)) = self.live_params_poller.poll() {
            if let Some(params) = snapshot.get(&self.symbol) {
                self.asset_config = self.asset_config.with_quote_params(*params);
                info!("{}: hot-reloaded QuoteParams from live_params snapshot", self.symbol);
            }
        }
        if let Ok(Some(state)) = self.allocations_poller.poll() {
            if let Some(allocation) = state.allocations.get(&self.symbol) {
                self.asset_config = AssetConfig {
                    capital_usd: allocation.base_capital,
                    ..self.asset_config.clone()
                };
                info!("{}: hot-reloaded base_capital from allocator snapshot", self.symbol);
            }
        }
    }
}

fn classify_vol_regime(vol_bps: f64) -> VolRegime {
    if vol_bps < 5.0 {
        VolRegime::Low
    } else if vol_bps < 25.0 {
        VolRegime::Medium
    } else {
        VolRegime::High
    }
}

/// Adds a volatility-regime classifier bucketing σ into {low, medium,
/// high} (adjusting base_spread/num_levels per bucket) and an
/// inventory-decay rule biasing quotes toward flattening after a position
/// has been held past `max_hold_ms` with no round-trip (spec.md §4.8
/// "Variant: AdaptiveStrategy").
pub struct AdaptiveStrategy {
    inner: StrategyLoop,
    max_hold_ms: u64,
    position_opened_at_ms: Option<u64>,
}

impl AdaptiveStrategy {
    pub fn new(inner: StrategyLoop, max_hold_ms: u64) -> Self {
        Self {
            inner,
            max_hold_ms,
            position_opened_at_ms: None,
        }
    }

    pub async fn tick(&mut self, adapter: &mut dyn ExchangeAdapter, now_ms: u64) -> AdapterResult<()> {
        let was_flat = self.inner.inventory.net_position == 0.0;

        // Regime-adjust base_spread/num_levels before the inner tick runs.
        let regime = classify_vol_regime(self.inner.volatility.value_bps());
        let (spread_bump, level_bump): (f64, i64) = match regime {
            VolRegime::Low => (0.0, 1),
            VolRegime::Medium => (0.0, 0),
            VolRegime::High => (self.inner.asset_config.quote_params.base_spread_bps * 0.25, -1),
        };
        if spread_bump != 0.0 || level_bump != 0 {
            if let Ok(adjusted) = self.inner.asset_config.quote_params.replace(|p| {
                p.base_spread_bps += spread_bump;
                let next_levels = (p.num_levels as i64 + level_bump).max(1) as u32;
                p.num_levels = next_levels;
            }) {
                self.inner.asset_config = self.inner.asset_config.with_quote_params(adjusted);
            }
        }

        self.inner.tick(adapter, now_ms).await?;

        if was_flat && self.inner.inventory.net_position != 0.0 {
            self.position_opened_at_ms = Some(now_ms);
        } else if self.inner.inventory.net_position == 0.0 {
            self.position_opened_at_ms = None;
        } else if let Some(opened_at) = self.position_opened_at_ms {
            if now_ms.saturating_sub(opened_at) > self.max_hold_ms {
                // Linearly bias toward flattening: widen the side that would
                // grow the position and leave the flattening side untouched.
                // Concretely, this nudges bias_strength toward the sign that
                // opposes the held position for one tick.
                let bias_sign = -self.inner.inventory.net_position.signum();
                if let Ok(adjusted) = self.inner.asset_config.quote_params.replace(|p| {
                    p.bias_strength = bias_sign * p.bias_strength.abs().max(0.05);
                }) {
                    self.inner.asset_config = self.inner.asset_config.with_quote_params(adjusted);
                }
            }
        }

        Ok(())
    }

    pub fn inner(&self) -> &StrategyLoop {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vol_regime_buckets_match_sizer_thresholds() {
        assert_eq!(classify_vol_regime(1.0), VolRegime::Low);
        assert_eq!(classify_vol_regime(10.0), VolRegime::Medium);
        assert_eq!(classify_vol_regime(50.0), VolRegime::High);
    }
}
