//! Avellaneda–Stoikov-style multi-level quote pricer (spec.md §4.1).
//!
//! Grounded in the teacher's `market_maker::compute_quote_grid` (grid
//! laddering, inventory skew, per-level size split, suppression shape)
//! and `RegimeGovernor` (the piecewise spread multiplier idiom), combined
//! with `other_examples/.../avellaneda_stoikov.rs`'s `optimal_half_spread`
//! for the half-spread clamp/compose structure.

use crate::config::QuoteParams;
use crate::estimators::Signal;

/// One price/size rung of a [`Quote`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuoteLevel {
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
}

/// A full multi-level quote for one asset, one tick (spec.md §3 `Quote`).
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub levels: Vec<QuoteLevel>,
    pub suppress_bid: bool,
    pub suppress_ask: bool,
}

impl Quote {
    fn suppressed(num_levels: u32) -> Self {
        Quote {
            levels: vec![
                QuoteLevel {
                    bid_price: 0.0,
                    bid_size: 0.0,
                    ask_price: 0.0,
                    ask_size: 0.0,
                };
                num_levels.max(1) as usize
            ],
            suppress_bid: true,
            suppress_ask: true,
        }
    }
}

/// Inputs the engine composes into a [`Quote`] (spec.md §4.1).
#[derive(Debug, Clone, Copy)]
pub struct QuoteInputs {
    pub mid: f64,
    pub volatility_bps: f64,
    pub net_position: f64,
    pub max_position: f64,
    pub signal: Signal,
    pub toxicity: f64,
    /// Best ask − best bid, in bps. `None` if the book is one-sided/empty.
    pub market_spread_bps: Option<f64>,
    /// EMA of top-of-book size imbalance, in `[-1, 1]`. Positive means
    /// bid-heavy (spec.md §4.1).
    pub book_imbalance: f64,
}

fn toxicity_multiplier(tau: f64) -> f64 {
    if tau > 0.6 {
        1.5
    } else if tau > 0.4 {
        1.25
    } else if tau > 0.0 && tau < 0.2 {
        0.9
    } else {
        1.0
    }
}

/// Linear ramp from 1.0 to 1.6 as `fraction` moves from 0.6 to 1.0,
/// clamped outside that range (spec.md §4.1).
fn skew_ramp(fraction: f64) -> f64 {
    if fraction <= 0.6 {
        1.0
    } else if fraction >= 1.0 {
        1.6
    } else {
        1.0 + (fraction - 0.6) / (1.0 - 0.6) * 0.6
    }
}

/// Per-level notional weights. `[0.40, 0.35, 0.25]` for `num_levels == 3`
/// (the literal source split); otherwise harmonic weights `1/(i+1)`
/// normalised to sum to 1 — this normalisation is this implementation's
/// documented resolution of an unspecified source behaviour.
fn level_weights(num_levels: u32) -> Vec<f64> {
    if num_levels == 3 {
        return vec![0.40, 0.35, 0.25];
    }
    let raw: Vec<f64> = (0..num_levels).map(|i| 1.0 / (i as f64 + 1.0)).collect();
    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / sum).collect()
}

/// Pure composer of estimator outputs + [`QuoteParams`] into a [`Quote`].
/// Never fails (spec.md §4.1).
pub struct QuoteEngine;

impl QuoteEngine {
    pub fn quote(params: &QuoteParams, maker_fee_bps: f64, fee_aware: bool, inputs: &QuoteInputs) -> Quote {
        if inputs.toxicity > 0.8 {
            return Quote::suppressed(params.num_levels);
        }

        if fee_aware {
            if let Some(market_spread_bps) = inputs.market_spread_bps {
                if market_spread_bps < 2.0 * maker_fee_bps {
                    return Quote::suppressed(params.num_levels);
                }
            }
        }

        let half_spread_bps = {
            let raw = (params.base_spread_bps + params.vol_multiplier * inputs.volatility_bps)
                .max(params.min_spread_bps);
            (raw * toxicity_multiplier(inputs.toxicity)).clamp(params.min_spread_bps, params.max_spread_bps)
        };
        let half_spread_price = half_spread_bps / 1e4 * inputs.mid;

        let fraction = if inputs.max_position > 0.0 {
            inputs.net_position.abs() / inputs.max_position
        } else {
            0.0
        };
        let inventory_skew = inputs.net_position.signum()
            * fraction.min(1.0)
            * params.inventory_skew_factor
            * inputs.volatility_bps
            * skew_ramp(fraction)
            / 1e4
            * inputs.mid;

        // Book imbalance nudges the same directional term the trade-flow
        // signal drives: a bid-heavy book (positive imbalance) shifts quotes
        // up, same as a bullish signal. Zero imbalance leaves the
        // signal-only shift unchanged.
        let directional_shift =
            (inputs.signal.as_i32() as f64 + inputs.book_imbalance) * params.bias_strength * half_spread_price;

        let level_spacing_price = params.level_spacing_bps / 1e4 * inputs.mid;
        let weights = level_weights(params.num_levels);

        let levels = (0..params.num_levels)
            .map(|i| {
                let offset = i as f64 * level_spacing_price;
                let bid_price = inputs.mid - half_spread_price - offset - inventory_skew + directional_shift;
                let ask_price = inputs.mid + half_spread_price + offset - inventory_skew + directional_shift;
                let level_notional = params.order_size_usd * weights[i as usize];
                let size = if inputs.mid > 0.0 { level_notional / inputs.mid } else { 0.0 };
                QuoteLevel {
                    bid_price,
                    bid_size: size,
                    ask_price,
                    ask_size: size,
                }
            })
            .collect();

        let mut quote = Quote {
            levels,
            suppress_bid: false,
            suppress_ask: false,
        };

        if inputs.net_position > 0.6 * inputs.max_position {
            quote.suppress_bid = true;
        } else if inputs.net_position < -0.6 * inputs.max_position {
            quote.suppress_ask = true;
        }

        quote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> QuoteParams {
        QuoteParams {
            base_spread_bps: 2.0,
            vol_multiplier: 1.5,
            inventory_skew_factor: 0.3,
            order_size_usd: 150.0,
            num_levels: 2,
            level_spacing_bps: 1.0,
            bias_strength: 0.0,
            min_spread_bps: 1.0,
            max_spread_bps: 50.0,
        }
    }

    fn base_inputs() -> QuoteInputs {
        QuoteInputs {
            mid: 100.0,
            volatility_bps: 10.0,
            net_position: 0.0,
            max_position: 500.0,
            signal: Signal::Flat,
            toxicity: 0.0,
            market_spread_bps: None,
            book_imbalance: 0.0,
        }
    }

    #[test]
    fn baseline_quote_matches_scenario_one() {
        let quote = QuoteEngine::quote(&base_params(), 1.5, false, &base_inputs());
        assert!(!quote.suppress_bid && !quote.suppress_ask);

        assert!((quote.levels[0].bid_price - 99.83).abs() < 1e-9);
        assert!((quote.levels[0].ask_price - 100.17).abs() < 1e-9);
        assert!((quote.levels[1].bid_price - 99.82).abs() < 1e-9);
        assert!((quote.levels[1].ask_price - 100.18).abs() < 1e-9);
    }

    #[test]
    fn skew_on_long_inventory_matches_scenario_two() {
        let mut inputs = base_inputs();
        // max_position is in contracts (max_position_usd / mid), as the
        // strategy loop computes it: 500 usd @ mid 100 => 5 contracts.
        inputs.max_position = 5.0;
        // 60% of max_position => 3 contracts of long inventory.
        inputs.net_position = 0.6 * inputs.max_position;

        let quote = QuoteEngine::quote(&base_params(), 1.5, false, &inputs);
        assert!((quote.levels[0].bid_price - 99.8120).abs() < 1e-6);
        assert!((quote.levels[0].ask_price - 100.1520).abs() < 1e-6);
    }

    #[test]
    fn high_toxicity_suppresses_both_sides() {
        let mut inputs = base_inputs();
        inputs.toxicity = 0.85;
        let quote = QuoteEngine::quote(&base_params(), 1.5, false, &inputs);
        assert!(quote.suppress_bid && quote.suppress_ask);
    }

    #[test]
    fn fee_aware_gate_suppresses_when_market_spread_too_tight() {
        let mut inputs = base_inputs();
        inputs.market_spread_bps = Some(2.0); // < 2 * 1.5 maker_fee_bps
        let quote = QuoteEngine::quote(&base_params(), 1.5, true, &inputs);
        assert!(quote.suppress_bid && quote.suppress_ask);
    }

    #[test]
    fn fee_aware_gate_does_not_apply_when_flag_off() {
        let mut inputs = base_inputs();
        inputs.market_spread_bps = Some(2.0);
        let quote = QuoteEngine::quote(&base_params(), 1.5, false, &inputs);
        assert!(!quote.suppress_bid && !quote.suppress_ask);
    }

    #[test]
    fn one_sided_guard_suppresses_bid_above_threshold() {
        let mut inputs = base_inputs();
        inputs.max_position = 5.0;
        inputs.net_position = 0.7 * inputs.max_position;
        let quote = QuoteEngine::quote(&base_params(), 1.5, false, &inputs);
        assert!(quote.suppress_bid);
        assert!(!quote.suppress_ask);
    }

    #[test]
    fn one_sided_guard_suppresses_ask_for_short_inventory() {
        let mut inputs = base_inputs();
        inputs.max_position = 5.0;
        inputs.net_position = -0.7 * inputs.max_position;
        let quote = QuoteEngine::quote(&base_params(), 1.5, false, &inputs);
        assert!(quote.suppress_ask);
        assert!(!quote.suppress_bid);
    }

    #[test]
    fn bid_always_below_ask_at_every_level() {
        let mut inputs = base_inputs();
        inputs.volatility_bps = 40.0;
        inputs.net_position = 0.3 * inputs.max_position / inputs.mid;
        let quote = QuoteEngine::quote(&base_params(), 1.5, false, &inputs);
        for level in &quote.levels {
            assert!(level.bid_price < level.ask_price);
        }
    }

    #[test]
    fn harmonic_weights_normalise_to_one_for_non_three_levels() {
        let w = level_weights(4);
        let sum: f64 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        // Strictly decreasing.
        assert!(w[0] > w[1] && w[1] > w[2] && w[2] > w[3]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn params() -> QuoteParams {
        QuoteParams {
            base_spread_bps: 2.0,
            vol_multiplier: 1.5,
            inventory_skew_factor: 0.3,
            order_size_usd: 150.0,
            num_levels: 3,
            level_spacing_bps: 1.0,
            bias_strength: 0.0,
            min_spread_bps: 1.0,
            max_spread_bps: 50.0,
        }
    }

    proptest! {
        // Below the toxicity suppression gate, the quote always straddles
        // the mid: every level's bid sits below its ask (spec.md §8).
        #[test]
        fn bid_is_always_below_ask(
            volatility_bps in 0.0f64..100.0,
            net_position_frac in -1.5f64..1.5,
            toxicity in 0.0f64..0.79,
            mid in 1.0f64..100_000.0,
        ) {
            let max_position = 500.0;
            let inputs = QuoteInputs {
                mid,
                volatility_bps,
                net_position: net_position_frac * max_position,
                max_position,
                signal: Signal::Flat,
                toxicity,
                market_spread_bps: None,
                book_imbalance: 0.0,
            };
            let quote = QuoteEngine::quote(&params(), 1.5, false, &inputs);
            for level in &quote.levels {
                prop_assert!(level.bid_price < level.ask_price);
            }
        }

        // The half-spread never drifts outside [min_spread_bps, max_spread_bps]
        // regardless of how extreme volatility_bps gets (spec.md §4.1 clamp).
        #[test]
        fn half_spread_stays_within_configured_bounds(volatility_bps in 0.0f64..10_000.0) {
            let p = params();
            let inputs = QuoteInputs {
                mid: 100.0,
                volatility_bps,
                net_position: 0.0,
                max_position: 500.0,
                signal: Signal::Flat,
                toxicity: 0.0,
                market_spread_bps: None,
                book_imbalance: 0.0,
            };
            let quote = QuoteEngine::quote(&p, 1.5, false, &inputs);
            let half_spread_bps = (quote.levels[0].ask_price - quote.levels[0].bid_price) / 2.0 / inputs.mid * 1e4;
            prop_assert!(half_spread_bps >= p.min_spread_bps - 1e-6);
            prop_assert!(half_spread_bps <= p.max_spread_bps + 1e-6);
        }
    }
}
