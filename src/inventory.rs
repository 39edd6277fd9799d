//! Inventory/PnL accountant (spec.md §4.3).
//!
//! Grounded in the teacher's `exchange::Position::calc_pnl` (signed
//! direction × size pricing) and `execution::InternalInventory` (a
//! per-coin signed net position updated on fills), generalized into
//! FIFO-weighted average entry price, realized PnL, and a fee ledger
//! with the spec's fixed sign convention: positive fee = cost.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    fn signed(self, size: f64) -> f64 {
        match self {
            Side::Buy => size,
            Side::Sell => -size,
        }
    }
}

/// Emitted by [`Inventory::record_fill`] (spec.md §3 `FillEvent`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FillEvent {
    pub side_is_buy: bool,
    pub price: f64,
    pub size: f64,
    pub fee: f64,
    pub timestamp_ms: u64,
}

/// Net position, FIFO average entry, realized PnL, and fee ledger for one
/// asset (spec.md §3 `Inventory`).
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub net_position: f64,
    pub avg_entry_price: f64,
    pub realised_pnl: f64,
    /// Positive = cumulative cost, negative = net rebate (spec.md §9).
    pub total_fees: f64,
    pub cumulative_volume: f64,
    pub buy_fill_count: u64,
    pub sell_fill_count: u64,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a fill, updating net position, FIFO-weighted average entry,
    /// realized PnL (on reducing fills), and the fee ledger. Returns the
    /// emitted [`FillEvent`].
    pub fn record_fill(&mut self, side: Side, price: f64, size: f64, fee: f64, timestamp_ms: u64) -> FillEvent {
        debug_assert!(size > 0.0, "fill size must be > 0");

        let signed_size = side.signed(size);
        let same_direction = self.net_position == 0.0 || self.net_position.signum() == signed_size.signum();

        if same_direction {
            // Opening or adding to a position: FIFO-weighted average entry.
            let new_position = self.net_position + signed_size;
            let prior_notional = self.avg_entry_price * self.net_position.abs();
            let added_notional = price * size;
            self.avg_entry_price = if new_position.abs() > 0.0 {
                (prior_notional + added_notional) / new_position.abs()
            } else {
                0.0
            };
            self.net_position = new_position;
        } else {
            // Reducing (or flipping) a position: realize PnL on the
            // portion that offsets the existing position.
            let closing_size = size.min(self.net_position.abs());
            let pnl_per_unit = match self.net_position > 0.0 {
                true => price - self.avg_entry_price,  // was long, now selling
                false => self.avg_entry_price - price, // was short, now buying
            };
            self.realised_pnl += pnl_per_unit * closing_size;

            let remainder = size - closing_size;
            self.net_position += signed_size;

            if remainder > 0.0 {
                // Position flips sign: the remainder opens a fresh position
                // at this fill's price.
                self.avg_entry_price = price;
            } else if self.net_position.abs() < 1e-12 {
                self.avg_entry_price = 0.0;
            }
        }

        if self.net_position.abs() < 1e-12 {
            self.net_position = 0.0;
            self.avg_entry_price = 0.0;
        }

        self.total_fees += fee;
        self.cumulative_volume += size;
        match side {
            Side::Buy => self.buy_fill_count += 1,
            Side::Sell => self.sell_fill_count += 1,
        }

        FillEvent {
            side_is_buy: side == Side::Buy,
            price,
            size,
            fee,
            timestamp_ms,
        }
    }

    /// `(mid - avg_entry_price) * net_position`, sign-aware. Exactly zero
    /// when flat (spec.md §4.3 invariant).
    pub fn mark_to_market(&self, mid: f64) -> f64 {
        if self.net_position == 0.0 {
            0.0
        } else {
            (mid - self.avg_entry_price) * self.net_position
        }
    }

    /// `realised_pnl - total_fees` (spec.md §4.3; positive fee = cost).
    pub fn net_pnl(&self) -> f64 {
        self.realised_pnl - self.total_fees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_inventory_has_zero_mtm() {
        let inv = Inventory::new();
        assert_eq!(inv.mark_to_market(100.0), 0.0);
        assert_eq!(inv.avg_entry_price, 0.0);
    }

    #[test]
    fn opening_buy_sets_avg_entry() {
        let mut inv = Inventory::new();
        inv.record_fill(Side::Buy, 100.0, 2.0, 0.1, 1);
        assert_eq!(inv.net_position, 2.0);
        assert_eq!(inv.avg_entry_price, 100.0);
    }

    #[test]
    fn adding_to_position_weights_average_entry() {
        let mut inv = Inventory::new();
        inv.record_fill(Side::Buy, 100.0, 1.0, 0.0, 1);
        inv.record_fill(Side::Buy, 110.0, 1.0, 0.0, 2);
        assert_eq!(inv.net_position, 2.0);
        assert!((inv.avg_entry_price - 105.0).abs() < 1e-9);
    }

    #[test]
    fn round_trip_flattens_to_zero_exactly() {
        let mut inv = Inventory::new();
        inv.record_fill(Side::Buy, 100.0, 1.0, 0.05, 1);
        inv.record_fill(Side::Sell, 101.0, 1.0, 0.05, 2);

        assert_eq!(inv.net_position, 0.0);
        assert_eq!(inv.mark_to_market(150.0), 0.0);
        assert!((inv.realised_pnl - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fee_convention_round_trip_at_flat_price() {
        let mut inv = Inventory::new();
        inv.record_fill(Side::Buy, 100.0, 1.0, 0.02, 1);
        inv.record_fill(Side::Sell, 100.0, 1.0, 0.02, 2);
        assert_eq!(inv.realised_pnl, 0.0);
        assert!((inv.net_pnl() - (-0.04)).abs() < 1e-9);
    }

    #[test]
    fn flip_from_long_to_short_resets_avg_entry_to_new_fill() {
        let mut inv = Inventory::new();
        inv.record_fill(Side::Buy, 100.0, 1.0, 0.0, 1);
        inv.record_fill(Side::Sell, 110.0, 3.0, 0.0, 2);
        assert_eq!(inv.net_position, -2.0);
        assert_eq!(inv.avg_entry_price, 110.0);
        assert!((inv.realised_pnl - 10.0).abs() < 1e-9);
    }
}
