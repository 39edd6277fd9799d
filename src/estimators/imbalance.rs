//! EMA of order-book imbalance over N top levels (spec.md §4.2).
//!
//! Grounded in the teacher's `ingestor::L2BookSnapshot`/`L2Level` shape
//! (bids/asks as `(price, size)` pairs already parsed off the wire).

use crate::estimators::volatility::ema_alpha;

/// Smoothed order-book imbalance, bounded to `[-1, 1]`.
/// `+1` means bids dominate, `-1` means asks dominate.
#[derive(Debug, Clone)]
pub struct BookImbalance {
    depth: usize,
    half_life_ticks: f64,
    ema: f64,
    initialized: bool,
}

impl BookImbalance {
    pub fn new(depth: usize, half_life_ticks: f64) -> Self {
        Self {
            depth: depth.max(1),
            half_life_ticks: half_life_ticks.max(1.0),
            ema: 0.0,
            initialized: false,
        }
    }

    /// Feeds a new book snapshot. `bids`/`asks` are `(price, size)` pairs,
    /// best-first; only the top `depth` levels of each side are summed.
    pub fn update(&mut self, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> f64 {
        let bid_sum: f64 = bids.iter().take(self.depth).map(|(_, s)| s).sum();
        let ask_sum: f64 = asks.iter().take(self.depth).map(|(_, s)| s).sum();
        let total = bid_sum + ask_sum;
        let raw = if total > 0.0 {
            ((bid_sum - ask_sum) / total).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let a = ema_alpha(self.half_life_ticks);
        self.ema = if self.initialized {
            a * raw + (1.0 - a) * self.ema
        } else {
            raw
        };
        self.initialized = true;
        self.ema
    }

    pub fn value(&self) -> f64 {
        self.ema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_book_is_zero() {
        let mut imb = BookImbalance::new(3, 5.0);
        let v = imb.update(&[(99.0, 10.0)], &[(101.0, 10.0)]);
        assert_eq!(v, 0.0);
    }

    #[test]
    fn bid_heavy_book_is_positive_and_bounded() {
        let mut imb = BookImbalance::new(3, 1.0);
        for _ in 0..10 {
            imb.update(&[(99.0, 100.0)], &[(101.0, 1.0)]);
        }
        assert!(imb.value() > 0.9);
        assert!(imb.value() <= 1.0);
    }

    #[test]
    fn empty_book_does_not_panic() {
        let mut imb = BookImbalance::new(3, 5.0);
        assert_eq!(imb.update(&[], &[]), 0.0);
    }
}
