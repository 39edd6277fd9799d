//! Per-asset rolling performance metrics and CSV persistence (spec.md §3, §6).
//!
//! Grounded in the teacher's `monitor::PerformanceMonitor` (a bounded
//! `VecDeque` of trade outcomes turned into a derived metrics snapshot)
//! and `ingestor::harvest_tick_to_csv` for the daily-file-append shape;
//! this uses the `csv` crate's `Writer` directly rather than hand-rolled
//! `writeln!`, since the bucket schema here has more columns.

use crate::error::CoreResult;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;

/// One persisted daily row (spec.md §6 persisted-state schema).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DailyBucket {
    pub day_bucket_start: i64, // unix seconds, UTC midnight
    pub gross_pnl: f64,
    pub fees: f64,
    pub net_pnl: f64,
    pub fills_buy: u64,
    pub fills_sell: u64,
    pub max_drawdown: f64,
    pub inventory_avg: f64,
    pub inventory_max: f64,
    pub quoted_spread_bps: f64,
    pub captured_spread_bps: f64,
    pub toxicity_ema: f64,
}

/// Rolling in-memory metrics for one asset (spec.md §3 `Metrics`).
/// Sharpe is computed over daily-return buckets, as specified.
#[derive(Debug, Clone)]
pub struct Metrics {
    window: usize,
    daily_returns: VecDeque<f64>,
    fills_attempted: u64,
    fills_completed: u64,
    equity_curve: VecDeque<f64>,
}

impl Metrics {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            daily_returns: VecDeque::with_capacity(window),
            fills_attempted: 0,
            fills_completed: 0,
            equity_curve: VecDeque::with_capacity(window),
        }
    }

    pub fn record_daily_return(&mut self, pct_return: f64) {
        if self.daily_returns.len() >= self.window {
            self.daily_returns.pop_front();
        }
        self.daily_returns.push_back(pct_return);
    }

    pub fn record_equity_point(&mut self, equity: f64) {
        if self.equity_curve.len() >= self.window {
            self.equity_curve.pop_front();
        }
        self.equity_curve.push_back(equity);
    }

    pub fn record_quote_attempt(&mut self, filled: bool) {
        self.fills_attempted += 1;
        if filled {
            self.fills_completed += 1;
        }
    }

    /// Daily-return Sharpe: mean / stddev of the rolling daily-return
    /// window, unannualised. Zero with fewer than two observations.
    pub fn sharpe(&self) -> f64 {
        if self.daily_returns.len() < 2 {
            return 0.0;
        }
        let n = self.daily_returns.len() as f64;
        let mean = self.daily_returns.iter().sum::<f64>() / n;
        let variance = self.daily_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        let stddev = variance.sqrt();
        if stddev > 0.0 {
            mean / stddev
        } else {
            0.0
        }
    }

    pub fn fill_rate(&self) -> f64 {
        if self.fills_attempted == 0 {
            0.0
        } else {
            self.fills_completed as f64 / self.fills_attempted as f64
        }
    }

    pub fn profitable_day_ratio(&self) -> f64 {
        if self.daily_returns.is_empty() {
            return 0.0;
        }
        let profitable = self.daily_returns.iter().filter(|r| **r > 0.0).count();
        profitable as f64 / self.daily_returns.len() as f64
    }

    /// Cumulative return across the rolling equity curve window, as a
    /// fraction of the window's starting equity. Zero with fewer than two
    /// points or a non-positive starting equity. Feeds `MetaSupervisor`'s
    /// daily allocation score.
    pub fn total_return(&self) -> f64 {
        match (self.equity_curve.front(), self.equity_curve.back()) {
            (Some(&first), Some(&last)) if first > 0.0 => (last - first) / first,
            _ => 0.0,
        }
    }

    /// Max peak-to-trough drawdown across the rolling equity curve,
    /// expressed as a positive fraction of the peak.
    pub fn max_drawdown(&self) -> f64 {
        let mut peak = f64::MIN;
        let mut worst = 0.0;
        for &equity in &self.equity_curve {
            peak = peak.max(equity);
            if peak > 0.0 {
                let drawdown = (peak - equity) / peak;
                worst = worst.max(drawdown);
            }
        }
        worst
    }
}

/// Appends one [`DailyBucket`] row to the per-asset CSV file, writing a
/// header if the file does not yet exist.
pub fn append_daily_bucket<P: AsRef<Path>>(path: P, bucket: &DailyBucket) -> CoreResult<()> {
    let path = path.as_ref();
    let write_header = !path.exists();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

    if write_header {
        writer.write_record([
            "day_bucket_start",
            "gross_pnl",
            "fees",
            "net_pnl",
            "fills_buy",
            "fills_sell",
            "max_drawdown",
            "inventory_avg",
            "inventory_max",
            "quoted_spread_bps",
            "captured_spread_bps",
            "toxicity_ema",
        ])?;
    }

    writer.serialize(bucket)?;
    writer.flush().map_err(crate::error::CoreError::Io)?;

    info!("appended daily metrics bucket to {:?}", path);
    Ok(())
}

pub fn log_append_failure(path: &Path, err: &crate::error::CoreError) {
    error!("failed to append daily metrics bucket to {:?}: {}", path, err);
}

/// Accumulates per-tick and per-fill samples across one UTC day, flushed
/// into a [`DailyBucket`] once `now_ms` crosses into the next day (spec.md
/// §6 "Persisted state"). Grounded in the teacher's `RiskSupervisor`
/// UTC-day-boundary reset idiom, generalized from a reset trigger into a
/// running aggregator.
#[derive(Debug, Clone, Copy)]
pub struct DayAccumulator {
    day_start_ms: u64,
    start_realised_pnl: f64,
    start_fees: f64,
    start_buy_fills: u64,
    start_sell_fills: u64,
    inventory_sum: f64,
    inventory_max: f64,
    inventory_samples: u64,
    quoted_spread_sum: f64,
    quoted_spread_samples: u64,
    captured_spread_sum: f64,
    captured_spread_samples: u64,
    toxicity_ema_last: f64,
}

fn day_boundary_ms(now_ms: u64) -> u64 {
    (now_ms / 86_400_000) * 86_400_000
}

impl DayAccumulator {
    pub fn start(now_ms: u64, realised_pnl: f64, fees: f64, buy_fills: u64, sell_fills: u64) -> Self {
        Self {
            day_start_ms: day_boundary_ms(now_ms),
            start_realised_pnl: realised_pnl,
            start_fees: fees,
            start_buy_fills: buy_fills,
            start_sell_fills: sell_fills,
            inventory_sum: 0.0,
            inventory_max: 0.0,
            inventory_samples: 0,
            quoted_spread_sum: 0.0,
            quoted_spread_samples: 0,
            captured_spread_sum: 0.0,
            captured_spread_samples: 0,
            toxicity_ema_last: 0.0,
        }
    }

    /// Samples one tick's net position, quoted spread, and toxicity reading.
    pub fn sample_tick(&mut self, net_position: f64, quoted_spread_bps: f64, toxicity_ema: f64) {
        self.inventory_sum += net_position.abs();
        self.inventory_max = self.inventory_max.max(net_position.abs());
        self.inventory_samples += 1;
        self.quoted_spread_sum += quoted_spread_bps;
        self.quoted_spread_samples += 1;
        self.toxicity_ema_last = toxicity_ema;
    }

    /// Samples the spread captured by one fill relative to `mid` at fill time.
    pub fn sample_fill(&mut self, mid: f64, fill_price: f64, side_is_buy: bool) {
        if mid <= 0.0 {
            return;
        }
        let captured_bps = if side_is_buy {
            (mid - fill_price) / mid * 1e4
        } else {
            (fill_price - mid) / mid * 1e4
        };
        self.captured_spread_sum += captured_bps;
        self.captured_spread_samples += 1;
    }

    /// True once `now_ms` falls on a later UTC day than this accumulator's start.
    pub fn day_elapsed(&self, now_ms: u64) -> bool {
        day_boundary_ms(now_ms) != self.day_start_ms
    }

    /// Builds the bucket for the elapsed day and returns a fresh
    /// accumulator seeded from the day-end cumulative totals.
    pub fn flush(
        &self,
        now_ms: u64,
        realised_pnl: f64,
        fees: f64,
        buy_fills: u64,
        sell_fills: u64,
        max_drawdown: f64,
    ) -> (DailyBucket, DayAccumulator) {
        let gross_pnl = realised_pnl - self.start_realised_pnl;
        let day_fees = fees - self.start_fees;
        let bucket = DailyBucket {
            day_bucket_start: (self.day_start_ms / 1000) as i64,
            gross_pnl,
            fees: day_fees,
            net_pnl: gross_pnl - day_fees,
            fills_buy: buy_fills - self.start_buy_fills,
            fills_sell: sell_fills - self.start_sell_fills,
            max_drawdown,
            inventory_avg: if self.inventory_samples > 0 {
                self.inventory_sum / self.inventory_samples as f64
            } else {
                0.0
            },
            inventory_max: self.inventory_max,
            quoted_spread_bps: if self.quoted_spread_samples > 0 {
                self.quoted_spread_sum / self.quoted_spread_samples as f64
            } else {
                0.0
            },
            captured_spread_bps: if self.captured_spread_samples > 0 {
                self.captured_spread_sum / self.captured_spread_samples as f64
            } else {
                0.0
            },
            toxicity_ema: self.toxicity_ema_last,
        };
        let next = DayAccumulator::start(now_ms, realised_pnl, fees, buy_fills, sell_fills);
        (bucket, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_metrics_are_all_zero() {
        let m = Metrics::new(100);
        assert_eq!(m.sharpe(), 0.0);
        assert_eq!(m.fill_rate(), 0.0);
        assert_eq!(m.profitable_day_ratio(), 0.0);
        assert_eq!(m.max_drawdown(), 0.0);
    }

    #[test]
    fn fill_rate_tracks_attempts_vs_completions() {
        let mut m = Metrics::new(100);
        m.record_quote_attempt(true);
        m.record_quote_attempt(true);
        m.record_quote_attempt(false);
        m.record_quote_attempt(false);
        assert_eq!(m.fill_rate(), 0.5);
    }

    #[test]
    fn rolling_window_drops_oldest() {
        let mut m = Metrics::new(3);
        m.record_daily_return(1.0);
        m.record_daily_return(1.0);
        m.record_daily_return(1.0);
        m.record_daily_return(-1.0);
        assert_eq!(m.daily_returns.len(), 3);
        // Only the most recent three (1.0, 1.0, -1.0) remain.
        assert!((m.profitable_day_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_measures_peak_to_trough() {
        let mut m = Metrics::new(10);
        for equity in [100.0, 120.0, 90.0, 110.0] {
            m.record_equity_point(equity);
        }
        // Peak 120 -> trough 90 = 25% drawdown.
        assert!((m.max_drawdown() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn sharpe_is_zero_for_flat_returns() {
        let mut m = Metrics::new(10);
        m.record_daily_return(0.01);
        m.record_daily_return(0.01);
        assert_eq!(m.sharpe(), 0.0);
    }

    #[test]
    fn day_accumulator_flushes_deltas_not_totals() {
        let acc = DayAccumulator::start(0, 10.0, 1.0, 2, 1);
        let mut acc = acc;
        acc.sample_tick(3.0, 5.0, 0.1);
        acc.sample_tick(5.0, 7.0, 0.2);
        acc.sample_fill(100.0, 99.5, true);

        let one_day_ms = 86_400_000;
        assert!(!acc.day_elapsed(one_day_ms - 1));
        assert!(acc.day_elapsed(one_day_ms));

        let (bucket, next) = acc.flush(one_day_ms, 16.0, 1.5, 5, 3, 0.1);
        assert!((bucket.gross_pnl - 6.0).abs() < 1e-9); // 16.0 - 10.0
        assert!((bucket.fees - 0.5).abs() < 1e-9); // 1.5 - 1.0
        assert_eq!(bucket.fills_buy, 3); // 5 - 2
        assert_eq!(bucket.fills_sell, 2); // 3 - 1
        assert!((bucket.inventory_avg - 4.0).abs() < 1e-9);
        assert!((bucket.inventory_max - 5.0).abs() < 1e-9);
        assert!((bucket.quoted_spread_bps - 6.0).abs() < 1e-9);
        assert!((bucket.captured_spread_bps - 50.0).abs() < 1e-9);
        assert!(!next.day_elapsed(one_day_ms));
    }
}
