//! Per-asset configuration types (spec.md §3).
//!
//! Grounded in the teacher's `market_maker::MmAssetConfig`, generalized
//! from a flat screener-published struct into the full
//! `AssetConfig { QuoteParams, RiskLimits, capital, compound }` shape.
//! Per spec.md §9 ("Replacing dynamic configuration"), these are immutable
//! values with a `replace` operation rather than mutable fields — AutoTuner
//! and hot-reload both build a fresh `QuoteParams` rather than patching one.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Quoting parameters for one asset. Immutable; mutated only by producing
/// a new value via [`QuoteParams::replace`] (hot-reload) or the AutoTuner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuoteParams {
    pub base_spread_bps: f64,
    pub vol_multiplier: f64,
    pub inventory_skew_factor: f64,
    pub order_size_usd: f64,
    pub num_levels: u32,
    pub level_spacing_bps: f64,
    pub bias_strength: f64,
    pub min_spread_bps: f64,
    pub max_spread_bps: f64,
}

impl QuoteParams {
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.min_spread_bps <= self.base_spread_bps && self.base_spread_bps <= self.max_spread_bps)
        {
            return Err(CoreError::InvalidQuoteParams(format!(
                "min ({}) <= base ({}) <= max ({}) violated",
                self.min_spread_bps, self.base_spread_bps, self.max_spread_bps
            )));
        }
        if self.num_levels < 1 {
            return Err(CoreError::InvalidQuoteParams(
                "num_levels must be >= 1".to_string(),
            ));
        }
        if self.order_size_usd <= 0.0 {
            return Err(CoreError::InvalidQuoteParams(
                "order_size_usd must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns a new value with `f` applied, re-validating before accepting.
    /// This is the single mutation seam: AutoTuner and hot-reload both
    /// call this instead of mutating fields in place.
    pub fn replace(&self, f: impl FnOnce(&mut QuoteParams)) -> CoreResult<QuoteParams> {
        let mut next = *self;
        f(&mut next);
        next.validate()?;
        Ok(next)
    }
}

impl Default for QuoteParams {
    fn default() -> Self {
        Self {
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
}

/// Risk gating limits for one asset (spec.md §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_position_usd: f64,
    pub max_daily_loss: f64,
    pub max_open_orders: u32,
    pub cooldown_seconds: i64,
    pub api_error_threshold: u32,
}

impl RiskLimits {
    pub fn validate(&self) -> CoreResult<()> {
        let fields = [
            ("max_position_usd", self.max_position_usd),
            ("max_daily_loss", self.max_daily_loss),
            ("cooldown_seconds", self.cooldown_seconds as f64),
            ("api_error_threshold", self.api_error_threshold as f64),
            ("max_open_orders", self.max_open_orders as f64),
        ];
        for (name, value) in fields {
            if value <= 0.0 {
                return Err(CoreError::InvalidRiskLimits(format!(
                    "{name} must be > 0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_usd: 500.0,
            max_daily_loss: 0.05,
            max_open_orders: 10,
            cooldown_seconds: 300,
            api_error_threshold: 10,
        }
    }
}

/// Maker fee in basis points. Positive = cost (spec.md §9 fee sign
/// convention fix).
pub const DEFAULT_MAKER_FEE_BPS: f64 = 1.5;

/// Immutable per-asset configuration bundle (spec.md §3). Replaced
/// atomically on hot-reload / reoptimiser runs; never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub symbol: String,
    pub quote_params: QuoteParams,
    pub risk_limits: RiskLimits,
    pub capital_usd: f64,
    pub compound: bool,
    pub maker_fee_bps: f64,
    pub fee_aware: bool,
    pub size_decimals: u32,
}

impl AssetConfig {
    pub fn new(symbol: impl Into<String>, capital_usd: f64, size_decimals: u32) -> Self {
        Self {
            symbol: symbol.into(),
            quote_params: QuoteParams::default(),
            risk_limits: RiskLimits::default(),
            capital_usd,
            compound: false,
            maker_fee_bps: DEFAULT_MAKER_FEE_BPS,
            fee_aware: true,
            size_decimals,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.quote_params.validate()?;
        self.risk_limits.validate()?;
        if self.capital_usd <= 0.0 {
            return Err(CoreError::InvalidQuoteParams(
                "capital_usd must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Produces a new config with `quote_params` replaced, as hot-reload
    /// and the AutoTuner do — the asset's identity fields are carried
    /// over untouched.
    pub fn with_quote_params(&self, quote_params: QuoteParams) -> AssetConfig {
        AssetConfig {
            quote_params,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_quote_params_validate() {
        assert!(QuoteParams::default().validate().is_ok());
    }

    #[test]
    fn invalid_spread_ordering_rejected() {
        let bad = QuoteParams {
            min_spread_bps: 5.0,
            base_spread_bps: 1.0,
            max_spread_bps: 10.0,
            ..QuoteParams::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn replace_produces_new_validated_value() {
        let params = QuoteParams::default();
        let next = params
            .replace(|p| p.base_spread_bps += 1.0)
            .expect("valid replace");
        assert_eq!(next.base_spread_bps, params.base_spread_bps + 1.0);
        assert_eq!(params.base_spread_bps, QuoteParams::default().base_spread_bps);
    }

    #[test]
    fn replace_rejects_invalid_result() {
        let params = QuoteParams::default();
        let err = params.replace(|p| p.num_levels = 0);
        assert!(err.is_err());
    }
}
