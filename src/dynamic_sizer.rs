//! Online order-size scaling (spec.md §4.6).
//!
//! Grounded in the teacher's `market_maker::RegimeGovernor`, which already
//! multiplies a base spread by bounded regime factors; this reuses that
//! "multiply bounded factors together" shape but applies it to size
//! instead of spread, with five independently documented factors.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolRegime {
    Low,
    Medium,
    High,
}

/// Rolling inputs the sizer reads each tick (spec.md §4.6).
#[derive(Debug, Clone, Copy)]
pub struct SizerInputs {
    pub vol_regime: VolRegime,
    pub fill_rate: f64,
    pub target_fill_rate: f64,
    pub inventory_utilisation: f64,
    pub toxicity_ema: f64,
    pub drawdown_7d: f64,
    pub drawdown_threshold: f64,
}

const FACTOR_MIN: f64 = 0.25;
const FACTOR_MAX: f64 = 1.5;

/// Scales `order_size_usd` by a product of bounded regime factors, then
/// clamps to `[min_order_usd, max_order_usd]`.
pub struct DynamicSizer {
    min_order_usd: f64,
    max_order_usd: f64,
}

impl DynamicSizer {
    pub fn new(min_order_usd: f64, max_order_usd: f64) -> Self {
        Self {
            min_order_usd,
            max_order_usd,
        }
    }

    pub fn size(&self, base_order_size_usd: f64, inputs: &SizerInputs) -> f64 {
        let vol_factor = match inputs.vol_regime {
            VolRegime::Low => 1.2,
            VolRegime::Medium => 1.0,
            VolRegime::High => 0.7,
        };

        let fill_factor = if inputs.fill_rate < inputs.target_fill_rate {
            1.2
        } else {
            0.8
        };

        let inventory_factor = if inputs.inventory_utilisation >= 0.7 { 0.5 } else { 1.0 };
        let toxicity_factor = if inputs.toxicity_ema > 0.5 { 0.7 } else { 1.0 };
        let drawdown_factor = if inputs.drawdown_7d > inputs.drawdown_threshold { 0.4 } else { 1.0 };

        let combined = (vol_factor * fill_factor * inventory_factor * toxicity_factor * drawdown_factor)
            .clamp(FACTOR_MIN, FACTOR_MAX);

        (base_order_size_usd * combined).clamp(self.min_order_usd, self.max_order_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calm_inputs() -> SizerInputs {
        SizerInputs {
            vol_regime: VolRegime::Medium,
            fill_rate: 0.25,
            target_fill_rate: 0.25,
            inventory_utilisation: 0.1,
            toxicity_ema: 0.1,
            drawdown_7d: 0.01,
            drawdown_threshold: 0.1,
        }
    }

    #[test]
    fn calm_regime_at_target_fill_rate_applies_only_the_fill_factor() {
        let sizer = DynamicSizer::new(10.0, 1_000.0);
        let size = sizer.size(150.0, &calm_inputs());
        assert!((size - 150.0 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn low_vol_and_underfilled_scales_up() {
        let sizer = DynamicSizer::new(10.0, 1_000.0);
        let mut inputs = calm_inputs();
        inputs.vol_regime = VolRegime::Low;
        inputs.fill_rate = 0.05;
        let size = sizer.size(150.0, &inputs);
        assert!(size > 150.0);
    }

    #[test]
    fn high_inventory_utilisation_scales_down() {
        let sizer = DynamicSizer::new(10.0, 1_000.0);
        let mut inputs = calm_inputs();
        inputs.inventory_utilisation = 0.9;
        let size = sizer.size(150.0, &inputs);
        assert!(size < 150.0);
    }

    #[test]
    fn high_toxicity_scales_down() {
        let sizer = DynamicSizer::new(10.0, 1_000.0);
        let mut inputs = calm_inputs();
        inputs.toxicity_ema = 0.9;
        let size = sizer.size(150.0, &inputs);
        assert!(size < 150.0);
    }

    #[test]
    fn drawdown_breach_scales_down_hard() {
        let sizer = DynamicSizer::new(10.0, 1_000.0);
        let mut inputs = calm_inputs();
        inputs.drawdown_7d = 0.5;
        let size = sizer.size(150.0, &inputs);
        assert!(size < 150.0 * 0.5);
    }

    #[test]
    fn result_clamps_to_configured_bounds() {
        let sizer = DynamicSizer::new(50.0, 200.0);
        let mut inputs = calm_inputs();
        inputs.vol_regime = VolRegime::Low;
        inputs.fill_rate = 0.0;
        let size = sizer.size(150.0, &inputs);
        assert!(size <= 200.0);

        let mut starved = calm_inputs();
        starved.drawdown_7d = 0.9;
        starved.toxicity_ema = 0.9;
        starved.inventory_utilisation = 0.95;
        let size = sizer.size(150.0, &starved);
        assert!(size >= 50.0);
    }
}
