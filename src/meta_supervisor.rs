//! Daily capital/risk-multiplier allocator across per-asset instances
//! (spec.md §4.9).
//!
//! No direct teacher analogue (the teacher bot runs a single coin's
//! screener-driven selection, not a cross-asset allocator); grounded in
//! the teacher's `publisher::MmStatusPublisher` snapshot-broadcast idiom
//! (an immutable struct republished on a slow cadence) generalized into
//! an atomically-replaced `AllocatorState`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-asset risk multipliers applied to size, spread, and max_position
/// (spec.md §4.9 zones).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskMultipliers {
    pub size: f64,
    pub spread: f64,
    pub max_position: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Reward,
    Hold,
    Punish,
    Pause,
}

impl Zone {
    fn from_score(score: f64) -> Self {
        if score > 0.7 {
            Zone::Reward
        } else if score >= 0.30 {
            Zone::Hold
        } else if score >= 0.10 {
            Zone::Punish
        } else {
            Zone::Pause
        }
    }

    fn multipliers(self) -> RiskMultipliers {
        match self {
            Zone::Reward => RiskMultipliers { size: 1.10, spread: 0.90, max_position: 1.10 },
            Zone::Hold => RiskMultipliers { size: 1.0, spread: 1.0, max_position: 1.0 },
            Zone::Punish => RiskMultipliers { size: 0.70, spread: 1.30, max_position: 0.70 },
            Zone::Pause => RiskMultipliers { size: 0.40, spread: 1.50, max_position: 0.40 },
        }
    }
}

/// Raw per-asset daily metrics feeding the score (spec.md §4.9).
#[derive(Debug, Clone, Copy)]
pub struct AssetPerformance {
    pub sharpe: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub profitable_day_ratio: f64,
}

/// Fixed absolute thresholds mapping raw metrics into `[0,1]` norms
/// (spec.md §4.9: "not ranks").
const SHARPE_NORM_CEIL: f64 = 3.0;
const RETURN_NORM_CEIL: f64 = 0.50; // 50% cumulative return saturates the norm
const DRAWDOWN_NORM_CEIL: f64 = 0.30; // 30% drawdown saturates the norm

fn norm(value: f64, ceil: f64) -> f64 {
    (value / ceil).clamp(0.0, 1.0)
}

fn score(perf: &AssetPerformance) -> f64 {
    let sharpe_norm = norm(perf.sharpe.max(0.0), SHARPE_NORM_CEIL);
    let return_norm = norm(perf.total_return.max(0.0), RETURN_NORM_CEIL);
    let drawdown_norm = norm(perf.max_drawdown.max(0.0), DRAWDOWN_NORM_CEIL);
    let consistency = perf.profitable_day_ratio.clamp(0.0, 1.0);

    0.40 * sharpe_norm + 0.30 * return_norm + 0.20 * (1.0 - drawdown_norm) + 0.10 * consistency
}

/// Per-asset allocator output (spec.md §3 `AllocatorState`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetAllocation {
    pub base_capital: f64,
    pub risk_multipliers: RiskMultipliers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorState {
    pub allocations: HashMap<String, AssetAllocation>,
}

const DAILY_MOVE_CAP_FRACTION: f64 = 0.05;
const MEAN_REVERSION_FRACTION: f64 = 0.01;
const MAX_ASSET_SHARE: f64 = 0.35;

/// Runs once per day. Computes scores, zones, risk multipliers, and a
/// softmax-weighted capital target per asset, rate-limited to ±5%/day and
/// mean-reverted 1%/day toward equal weight (spec.md §4.9).
pub struct MetaSupervisor {
    min_capital: f64,
}

impl MetaSupervisor {
    pub fn new(min_capital: f64) -> Self {
        Self { min_capital }
    }

    /// `prior_base_capital` must contain one entry per key in `performance`.
    pub fn run(
        &self,
        performance: &HashMap<String, AssetPerformance>,
        prior_base_capital: &HashMap<String, f64>,
        total_portfolio: f64,
    ) -> AllocatorState {
        let scores: HashMap<String, f64> = performance.iter().map(|(k, v)| (k.clone(), score(v))).collect();

        let n = scores.len().max(1) as f64;
        let equal_weight_capital = total_portfolio / n;

        // Softmax over scores for the capital target.
        let max_score = scores.values().cloned().fold(f64::MIN, f64::max);
        let exps: HashMap<String, f64> = scores.iter().map(|(k, s)| (k.clone(), (s - max_score).exp())).collect();
        let sum_exp: f64 = exps.values().sum();

        let mut allocations = HashMap::new();
        for (symbol, raw_score) in &scores {
            let softmax_weight = if sum_exp > 0.0 { exps[symbol] / sum_exp } else { 1.0 / n };
            let uncapped_target = softmax_weight * total_portfolio;
            let capped_target = uncapped_target.min(MAX_ASSET_SHARE * total_portfolio);

            let prior = *prior_base_capital.get(symbol).unwrap_or(&equal_weight_capital);
            let max_daily_move = DAILY_MOVE_CAP_FRACTION * prior;
            let toward_target = (capped_target - prior).clamp(-max_daily_move, max_daily_move);
            let toward_equal_weight = MEAN_REVERSION_FRACTION * (equal_weight_capital - prior);

            let next_base = (prior + toward_target + toward_equal_weight).max(self.min_capital);

            let zone = Zone::from_score(*raw_score);
            allocations.insert(
                symbol.clone(),
                AssetAllocation {
                    base_capital: next_base,
                    risk_multipliers: zone.multipliers(),
                },
            );
        }

        AllocatorState { allocations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perf(sharpe: f64, ret: f64, dd: f64, consistency: f64) -> AssetPerformance {
        AssetPerformance {
            sharpe,
            total_return: ret,
            max_drawdown: dd,
            profitable_day_ratio: consistency,
        }
    }

    #[test]
    fn zone_boundaries_match_spec_thresholds() {
        assert_eq!(Zone::from_score(0.85), Zone::Reward);
        assert_eq!(Zone::from_score(0.55), Zone::Hold);
        assert_eq!(Zone::from_score(0.25), Zone::Punish);
        assert_eq!(Zone::from_score(0.05), Zone::Pause);
    }

    #[test]
    fn reward_zone_multipliers_match_spec() {
        let m = Zone::Reward.multipliers();
        assert_eq!(m, RiskMultipliers { size: 1.10, spread: 0.90, max_position: 1.10 });
    }

    #[test]
    fn pause_zone_multipliers_match_spec() {
        let m = Zone::Pause.multipliers();
        assert_eq!(m, RiskMultipliers { size: 0.40, spread: 1.50, max_position: 0.40 });
    }

    #[test]
    fn four_asset_allocation_moves_at_most_five_percent_per_day() {
        // Scenario 6: four assets, scores {0.85, 0.55, 0.25, 0.05}.
        let mut performance = HashMap::new();
        performance.insert("A".to_string(), perf(3.0, 0.5, 0.0, 1.0)); // -> near 0.85-ish
        performance.insert("B".to_string(), perf(1.0, 0.2, 0.1, 0.6));
        performance.insert("C".to_string(), perf(0.3, 0.05, 0.2, 0.3));
        performance.insert("D".to_string(), perf(0.0, 0.0, 0.29, 0.0));

        let total = 10_000.0;
        let equal = total / 4.0;
        let mut prior = HashMap::new();
        for k in ["A", "B", "C", "D"] {
            prior.insert(k.to_string(), equal);
        }

        let supervisor = MetaSupervisor::new(100.0);
        let state = supervisor.run(&performance, &prior, total);

        for (symbol, alloc) in &state.allocations {
            let prior_cap = prior[symbol];
            let delta_fraction = (alloc.base_capital - prior_cap).abs() / prior_cap;
            assert!(delta_fraction <= DAILY_MOVE_CAP_FRACTION + MEAN_REVERSION_FRACTION + 1e-9);
        }
    }

    #[test]
    fn base_capital_never_drops_below_min_capital() {
        let mut performance = HashMap::new();
        performance.insert("A".to_string(), perf(0.0, 0.0, 0.3, 0.0));
        let mut prior = HashMap::new();
        prior.insert("A".to_string(), 150.0);

        let supervisor = MetaSupervisor::new(100.0);
        let state = supervisor.run(&performance, &prior, 150.0);
        assert!(state.allocations["A"].base_capital >= 100.0);
    }

    #[test]
    fn score_weights_components_per_spec_formula() {
        // All norms saturate to 1.0, drawdown 0 -> score should be exactly 1.0.
        let perfect = perf(SHARPE_NORM_CEIL, RETURN_NORM_CEIL, 0.0, 1.0);
        assert!((score(&perfect) - 1.0).abs() < 1e-9);
    }
}
