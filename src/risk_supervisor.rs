//! Position/loss/error-budget gating state machine (spec.md §4.4).
//!
//! Grounded in the teacher's `risk::RiskManager` (consecutive-loss and
//! daily-drawdown circuit breakers, `can_trade`/`update_trade_result`
//! shape), generalized from a boolean gate into the three-state
//! `SAFE` / `POSITION_LIMIT` / `CIRCUIT_BREAK` machine with explicit
//! per-side masking and a UTC-day/cooldown-aware recovery rule.

use crate::config::RiskLimits;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskState {
    Safe,
    /// Position at or beyond the limit; the overloaded side is masked.
    PositionLimit,
    CircuitBreak,
}

/// Inputs evaluated once per tick (spec.md §4.4).
#[derive(Debug, Clone, Copy)]
pub struct RiskInputs {
    pub now: DateTime<Utc>,
    pub rolling_daily_net_pnl: f64,
    pub capital_usd: f64,
    pub api_errors_last_60s: u32,
    pub net_position_usd: f64,
}

/// Which side(s) a `RiskState` masks this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideMask {
    pub suppress_bid: bool,
    pub suppress_ask: bool,
    /// `CIRCUIT_BREAK` additionally requires a full cancel-all and sleep.
    pub cancel_all_and_halt: bool,
}

#[derive(Debug, Clone)]
pub struct RiskSupervisor {
    limits: RiskLimits,
    state: RiskState,
    circuit_break_until: Option<DateTime<Utc>>,
}

impl RiskSupervisor {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            state: RiskState::Safe,
            circuit_break_until: None,
        }
    }

    pub fn state(&self) -> RiskState {
        self.state
    }

    /// Evaluates the transition rules for this tick and returns the
    /// resulting [`SideMask`]. `CIRCUIT_BREAK` is monotone: it cannot
    /// return to `SAFE` before `circuit_break_until` (spec.md §8 invariant).
    pub fn evaluate(&mut self, inputs: &RiskInputs) -> SideMask {
        if self.state == RiskState::CircuitBreak {
            if let Some(until) = self.circuit_break_until {
                if inputs.now < until {
                    return Self::circuit_break_mask();
                }
            }
        }

        let daily_loss_limit = self.limits.max_daily_loss * inputs.capital_usd;
        if inputs.rolling_daily_net_pnl <= -daily_loss_limit {
            self.state = RiskState::CircuitBreak;
            self.circuit_break_until = Some(next_utc_day_boundary(inputs.now));
            return Self::circuit_break_mask();
        }

        if inputs.api_errors_last_60s >= self.limits.api_error_threshold {
            self.state = RiskState::CircuitBreak;
            self.circuit_break_until =
                Some(inputs.now + chrono::Duration::seconds(self.limits.cooldown_seconds));
            return Self::circuit_break_mask();
        }

        if inputs.net_position_usd.abs() >= self.limits.max_position_usd {
            self.state = RiskState::PositionLimit;
            return SideMask {
                suppress_bid: inputs.net_position_usd > 0.0,
                suppress_ask: inputs.net_position_usd < 0.0,
                cancel_all_and_halt: false,
            };
        }

        self.state = RiskState::Safe;
        SideMask {
            suppress_bid: false,
            suppress_ask: false,
            cancel_all_and_halt: false,
        }
    }

    fn circuit_break_mask() -> SideMask {
        SideMask {
            suppress_bid: true,
            suppress_ask: true,
            cancel_all_and_halt: true,
        }
    }
}

fn next_utc_day_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = (now + chrono::Duration::days(1)).date_naive();
    tomorrow.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_position_usd: 500.0,
            max_daily_loss: 0.05,
            max_open_orders: 10,
            cooldown_seconds: 300,
            api_error_threshold: 10,
        }
    }

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, h, m, 0).unwrap()
    }

    #[test]
    fn safe_state_when_all_clear() {
        let mut rs = RiskSupervisor::new(limits());
        let mask = rs.evaluate(&RiskInputs {
            now: ts(10, 0),
            rolling_daily_net_pnl: 0.0,
            capital_usd: 10_000.0,
            api_errors_last_60s: 0,
            net_position_usd: 100.0,
        });
        assert_eq!(rs.state(), RiskState::Safe);
        assert!(!mask.suppress_bid && !mask.suppress_ask && !mask.cancel_all_and_halt);
    }

    #[test]
    fn circuit_break_on_daily_loss_matches_scenario_four() {
        let mut rs = RiskSupervisor::new(limits());
        let mask = rs.evaluate(&RiskInputs {
            now: ts(14, 0),
            rolling_daily_net_pnl: -510.0, // 5.1% of $10,000
            capital_usd: 10_000.0,
            api_errors_last_60s: 0,
            net_position_usd: 0.0,
        });
        assert_eq!(rs.state(), RiskState::CircuitBreak);
        assert!(mask.cancel_all_and_halt);
    }

    #[test]
    fn circuit_break_persists_until_day_boundary() {
        let mut rs = RiskSupervisor::new(limits());
        rs.evaluate(&RiskInputs {
            now: ts(14, 0),
            rolling_daily_net_pnl: -1_000.0,
            capital_usd: 10_000.0,
            api_errors_last_60s: 0,
            net_position_usd: 0.0,
        });
        assert_eq!(rs.state(), RiskState::CircuitBreak);

        // Still before the UTC day boundary: cannot recover to SAFE even
        // though inputs now look clean.
        let mask = rs.evaluate(&RiskInputs {
            now: ts(23, 59),
            rolling_daily_net_pnl: 0.0,
            capital_usd: 10_000.0,
            api_errors_last_60s: 0,
            net_position_usd: 0.0,
        });
        assert_eq!(rs.state(), RiskState::CircuitBreak);
        assert!(mask.cancel_all_and_halt);
    }

    #[test]
    fn position_limit_masks_overloaded_side_only() {
        let mut rs = RiskSupervisor::new(limits());
        let mask = rs.evaluate(&RiskInputs {
            now: ts(10, 0),
            rolling_daily_net_pnl: 0.0,
            capital_usd: 10_000.0,
            api_errors_last_60s: 0,
            net_position_usd: 600.0,
        });
        assert_eq!(rs.state(), RiskState::PositionLimit);
        assert!(mask.suppress_bid);
        assert!(!mask.suppress_ask);
    }

    #[test]
    fn api_error_burst_triggers_cooldown_circuit_break() {
        let mut rs = RiskSupervisor::new(limits());
        let mask = rs.evaluate(&RiskInputs {
            now: ts(10, 0),
            rolling_daily_net_pnl: 0.0,
            capital_usd: 10_000.0,
            api_errors_last_60s: 10,
            net_position_usd: 0.0,
        });
        assert_eq!(rs.state(), RiskState::CircuitBreak);
        assert!(mask.cancel_all_and_halt);
    }
}
