//! Post-fill adverse-selection ("toxicity") detector (spec.md §4.2).
//!
//! Grounded in the teacher's `market_maker::QueuePositionEstimator`, which
//! already tracks per-key `(price, is_bid, placed_at_ms)` state and
//! accumulates trade-driven signal against it. This generalizes that
//! shape from "did this fill happen" into "was this fill adverse",
//! dividing the post-fill price move by ATR and EMA-smoothing per side.

use crate::estimators::volatility::ema_alpha;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
struct PendingFill {
    side: FillSide,
    price: f64,
    placed_at_ms: u64,
}

/// Tracks recent fills and scores adverse excursion against ATR, with a
/// per-side EMA. The global toxicity `τ` is the max of the two EMAs.
#[derive(Debug, Clone)]
pub struct ToxicityDetector {
    window_ms: u64,
    half_life_fills: f64,
    pending: VecDeque<PendingFill>,
    buy_ema: f64,
    sell_ema: f64,
    buy_initialized: bool,
    sell_initialized: bool,
}

impl ToxicityDetector {
    pub fn new(window_ms: u64, half_life_fills: f64) -> Self {
        Self {
            window_ms,
            half_life_fills: half_life_fills.max(1.0),
            pending: VecDeque::new(),
            buy_ema: 0.0,
            sell_ema: 0.0,
            buy_initialized: false,
            sell_initialized: false,
        }
    }

    pub fn record_fill(&mut self, side: FillSide, price: f64, placed_at_ms: u64) {
        self.pending.push_back(PendingFill { side, price, placed_at_ms });
    }

    /// Re-scores all fills younger than `window_ms` against `mid_now` and
    /// `atr`, EMA-smooths per side, drops fills that have aged out, and
    /// returns the global toxicity `τ = max(buy_ema, sell_ema)`.
    pub fn tick(&mut self, now_ms: u64, mid_now: f64, atr: f64) -> f64 {
        while let Some(front) = self.pending.front() {
            if now_ms.saturating_sub(front.placed_at_ms) > self.window_ms {
                self.pending.pop_front();
            } else {
                break;
            }
        }

        if atr <= 0.0 {
            return self.buy_ema.max(self.sell_ema);
        }

        for fill in self.pending.iter() {
            if now_ms.saturating_sub(fill.placed_at_ms) > self.window_ms {
                continue;
            }
            let signed = match fill.side {
                FillSide::Buy => (mid_now - fill.price) * -1.0,
                FillSide::Sell => (mid_now - fill.price) * 1.0,
            };
            let score = (signed / atr).clamp(0.0, 1.0);
            let a = ema_alpha(self.half_life_fills);
            match fill.side {
                FillSide::Buy => {
                    self.buy_ema = if self.buy_initialized {
                        a * score + (1.0 - a) * self.buy_ema
                    } else {
                        score
                    };
                    self.buy_initialized = true;
                }
                FillSide::Sell => {
                    self.sell_ema = if self.sell_initialized {
                        a * score + (1.0 - a) * self.sell_ema
                    } else {
                        score
                    };
                    self.sell_initialized = true;
                }
            }
        }

        self.buy_ema.max(self.sell_ema)
    }

    pub fn value(&self) -> f64 {
        self.buy_ema.max(self.sell_ema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_fills_means_zero_toxicity() {
        let mut tox = ToxicityDetector::new(60_000, 3.0);
        assert_eq!(tox.tick(1_000, 100.0, 1.0), 0.0);
    }

    #[test]
    fn adverse_move_after_buy_raises_toxicity() {
        let mut tox = ToxicityDetector::new(60_000, 1.0);
        tox.record_fill(FillSide::Buy, 100.0, 0);
        // Price drops after we bought: adverse for a buy fill.
        let tau = tox.tick(1_000, 99.0, 1.0);
        assert!(tau > 0.0);
    }

    #[test]
    fn favorable_move_after_buy_scores_zero() {
        let mut tox = ToxicityDetector::new(60_000, 1.0);
        tox.record_fill(FillSide::Buy, 100.0, 0);
        let tau = tox.tick(1_000, 101.0, 1.0);
        assert_eq!(tau, 0.0);
    }

    #[test]
    fn fills_age_out_of_window() {
        let mut tox = ToxicityDetector::new(1_000, 1.0);
        tox.record_fill(FillSide::Buy, 100.0, 0);
        let _ = tox.tick(500, 99.0, 1.0);
        assert!(tox.value() > 0.0);
        // Advance well past the window; the fill should be dropped and no
        // longer contribute to future scoring.
        let _ = tox.tick(10_000, 99.0, 1.0);
        assert_eq!(tox.pending.len(), 0);
    }
}
