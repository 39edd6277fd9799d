//! Rolling-window parameter auto-tuner (spec.md §4.7).
//!
//! Grounded in the teacher's `risk::RiskManager` rolling-window bookkeeping
//! (`trade_history`/`daily_pnl_history` deques trimmed on a cadence) and
//! `market_maker::RegimeGovernor`'s bounded-adjustment idiom, generalized
//! into a fixed-bound, hysteresis-guarded mutator over `QuoteParams`.

use crate::config::QuoteParams;
use std::collections::VecDeque;
use std::time::Duration;

/// Snapshot of rolling performance over the current 4h window
/// (spec.md §4.7).
#[derive(Debug, Clone, Copy)]
pub struct WindowMetrics {
    pub sharpe: f64,
    pub fill_rate: f64,
    pub profitable_day_ratio: f64,
    pub inventory_utilisation: f64,
}

const WINDOW: Duration = Duration::from_secs(4 * 3600);
const SPREAD_WIDEN_CAP_BPS: f64 = 2.0;
const DRIFT_GUARD_FRACTION: f64 = 0.70;

#[derive(Debug, Clone, Copy)]
struct TimestampedWindow {
    at_ms: u64,
    metrics: WindowMetrics,
}

/// Applies at most one adjustment per window, with hysteresis (two
/// sustained breaches required for the inventory-utilisation rule) and a
/// drift guard that resets any parameter that has wandered too far from
/// its configured default.
#[derive(Debug, Clone)]
pub struct AutoTuner {
    default_params: QuoteParams,
    history: VecDeque<TimestampedWindow>,
    consecutive_negative_sharpe: u32,
    consecutive_high_utilisation: u32,
}

impl AutoTuner {
    pub fn new(default_params: QuoteParams) -> Self {
        Self {
            default_params,
            history: VecDeque::new(),
            consecutive_negative_sharpe: 0,
            consecutive_high_utilisation: 0,
        }
    }

    /// Feeds one window's metrics and returns an adjusted `QuoteParams` if
    /// a rule fired this window, else `None`.
    pub fn observe(&mut self, now_ms: u64, current: &QuoteParams, metrics: WindowMetrics) -> Option<QuoteParams> {
        self.trim_old_windows(now_ms);
        self.history.push_back(TimestampedWindow { at_ms: now_ms, metrics });

        let mut next = *current;
        let mut changed = false;

        if metrics.sharpe < 0.0 {
            self.consecutive_negative_sharpe += 1;
            let bump = (10.0_f64).min(SPREAD_WIDEN_CAP_BPS * 10.0 * self.consecutive_negative_sharpe as f64);
            let widened = current.base_spread_bps * (1.0 + bump / 100.0);
            next.base_spread_bps = widened.min(current.max_spread_bps);
            changed = true;
        } else {
            self.consecutive_negative_sharpe = 0;
        }

        if metrics.fill_rate < 0.15 {
            let tightened = next.base_spread_bps * 0.90;
            next.base_spread_bps = tightened.max(current.min_spread_bps);
            changed = true;
        }

        if metrics.inventory_utilisation > 0.70 {
            self.consecutive_high_utilisation += 1;
            if self.consecutive_high_utilisation >= 2 {
                next.inventory_skew_factor = (next.inventory_skew_factor + 0.05).min(1.0);
                changed = true;
            }
        } else {
            self.consecutive_high_utilisation = 0;
        }

        if !changed {
            return None;
        }

        next = self.apply_drift_guard(next);
        current.replace(|p| *p = next).ok()
    }

    /// Resets any parameter that has drifted more than
    /// [`DRIFT_GUARD_FRACTION`] away from its configured default.
    fn apply_drift_guard(&self, mut params: QuoteParams) -> QuoteParams {
        let drifted = |value: f64, default: f64| -> bool {
            if default == 0.0 {
                return false;
            }
            ((value - default) / default).abs() > DRIFT_GUARD_FRACTION
        };

        if drifted(params.base_spread_bps, self.default_params.base_spread_bps) {
            params.base_spread_bps = self.default_params.base_spread_bps;
        }
        if drifted(params.inventory_skew_factor, self.default_params.inventory_skew_factor) {
            params.inventory_skew_factor = self.default_params.inventory_skew_factor;
        }
        params
    }

    fn trim_old_windows(&mut self, now_ms: u64) {
        let window_ms = WINDOW.as_millis() as u64;
        while let Some(front) = self.history.front() {
            if now_ms.saturating_sub(front.at_ms) > window_ms * 6 {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(sharpe: f64, fill_rate: f64, utilisation: f64) -> WindowMetrics {
        WindowMetrics {
            sharpe,
            fill_rate,
            profitable_day_ratio: 0.5,
            inventory_utilisation: utilisation,
        }
    }

    #[test]
    fn healthy_window_does_not_adjust() {
        let params = QuoteParams::default();
        let mut tuner = AutoTuner::new(params);
        let result = tuner.observe(0, &params, metrics(1.0, 0.5, 0.2));
        assert!(result.is_none());
    }

    #[test]
    fn negative_sharpe_widens_base_spread() {
        let params = QuoteParams::default();
        let mut tuner = AutoTuner::new(params);
        let result = tuner.observe(0, &params, metrics(-0.5, 0.5, 0.2)).unwrap();
        assert!(result.base_spread_bps > params.base_spread_bps);
    }

    #[test]
    fn low_fill_rate_tightens_base_spread_floored_at_min() {
        let params = QuoteParams::default();
        let mut tuner = AutoTuner::new(params);
        let result = tuner.observe(0, &params, metrics(1.0, 0.05, 0.2)).unwrap();
        assert!(result.base_spread_bps < params.base_spread_bps);
        assert!(result.base_spread_bps >= params.min_spread_bps);
    }

    #[test]
    fn sustained_high_utilisation_requires_two_windows() {
        let params = QuoteParams::default();
        let mut tuner = AutoTuner::new(params);
        let first = tuner.observe(0, &params, metrics(1.0, 0.5, 0.8));
        assert!(first.is_none());

        let four_hours_ms = 4 * 3600 * 1000;
        let second = tuner.observe(four_hours_ms, &params, metrics(1.0, 0.5, 0.8)).unwrap();
        assert!(second.inventory_skew_factor > params.inventory_skew_factor);
    }

    #[test]
    fn drift_guard_resets_param_past_seventy_percent_from_default() {
        let default_params = QuoteParams::default();
        let mut tuner = AutoTuner::new(default_params);
        // A param already drifted far from default; the tuner's own
        // adjustment this window would push it further, so the guard
        // should snap it back to default instead.
        let drifted = QuoteParams {
            base_spread_bps: default_params.base_spread_bps * 2.0,
            ..default_params
        };
        let result = tuner.observe(0, &drifted, metrics(-1.0, 0.5, 0.2)).unwrap();
        assert_eq!(result.base_spread_bps, default_params.base_spread_bps);
    }
}
