//! EMA of absolute log-returns over a configurable half-life (spec.md §4.2).
//!
//! Grounded in the teacher's `MarketDataBuffer::realtime_vol_bps`, which
//! computes a rolling stddev-over-mean across a fixed 5-minute window.
//! This generalizes that into a proper half-life EMA so the estimator is
//! O(1) per update instead of re-scanning a `VecDeque` every tick.

/// EMA smoothing coefficient for a given half-life, in ticks.
pub(crate) fn ema_alpha(half_life_ticks: f64) -> f64 {
    1.0 - 0.5f64.powf(1.0 / half_life_ticks.max(1.0))
}

/// Exponential moving average of absolute log-returns, expressed in bps.
#[derive(Debug, Clone)]
pub struct Volatility {
    half_life_ticks: f64,
    last_price: Option<f64>,
    ema_bps: f64,
    initialized: bool,
}

impl Volatility {
    /// `half_life_ticks` is the number of ticks after which the weight of
    /// a past observation halves.
    pub fn new(half_life_ticks: f64) -> Self {
        Self {
            half_life_ticks: half_life_ticks.max(1.0),
            last_price: None,
            ema_bps: 0.0,
            initialized: false,
        }
    }

    fn alpha(&self) -> f64 {
        ema_alpha(self.half_life_ticks)
    }

    /// Feeds a new mid-price observation, updating the EMA in place.
    pub fn update(&mut self, mid: f64) -> f64 {
        if mid <= 0.0 {
            return self.ema_bps;
        }
        if let Some(prev) = self.last_price {
            if prev > 0.0 {
                let log_ret = (mid / prev).ln();
                let abs_bps = log_ret.abs() * 10_000.0;
                let a = self.alpha();
                self.ema_bps = if self.initialized {
                    a * abs_bps + (1.0 - a) * self.ema_bps
                } else {
                    abs_bps
                };
                self.initialized = true;
            }
        }
        self.last_price = Some(mid);
        self.ema_bps
    }

    /// Current volatility estimate in bps. Zero until at least two
    /// observations have been fed.
    pub fn value_bps(&self) -> f64 {
        self.ema_bps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_price_series_has_zero_volatility() {
        let mut vol = Volatility::new(10.0);
        for _ in 0..20 {
            vol.update(100.0);
        }
        assert_eq!(vol.value_bps(), 0.0);
    }

    #[test]
    fn jump_raises_volatility_then_decays() {
        let mut vol = Volatility::new(5.0);
        vol.update(100.0);
        let after_jump = vol.update(101.0);
        assert!(after_jump > 0.0);

        for _ in 0..50 {
            vol.update(100.5 + (vol.value_bps() * 0.0)); // keep price stable
        }
        // After many flat ticks the EMA should have decayed substantially.
        assert!(vol.value_bps() < after_jump);
    }

    #[test]
    fn ignores_non_positive_prices() {
        let mut vol = Volatility::new(10.0);
        vol.update(100.0);
        let before = vol.update(0.0);
        assert_eq!(before, vol.value_bps());
    }
}
