//! Network error surface and venue rounding/wire helpers shared with
//! `exchange_adapter_impl.rs`. The teacher's `ExchangeClient` trait and its
//! `SimExchange`/`LiveExchange` implementors lived here too; both are
//! superseded by `exchange_adapter::ExchangeAdapter` and its
//! `HyperliquidAdapter`/`SimAdapter` implementors (see DESIGN.md) and were
//! removed in the final trimming pass. What's left is what those new
//! implementors still import.

#[derive(Debug, Clone)]
pub enum OrderError {
    InsufficientFunds(String),
    MaxPositionsReached,
    InvalidOrder(String),
    NetworkError(String),
    RateLimited,
}

impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderError::InsufficientFunds(s) => write!(f, "Insufficient Funds: {}", s),
            OrderError::MaxPositionsReached => write!(f, "Max Positions Reached"),
            OrderError::InvalidOrder(s) => write!(f, "Invalid Order: {}", s),
            OrderError::NetworkError(s) => write!(f, "Network Error: {}", s),
            OrderError::RateLimited => write!(f, "Rate Limited (429)"),
        }
    }
}

impl std::error::Error for OrderError {}

pub fn round_to_5_sig_figs(val: f64) -> f64 {
    if val == 0.0 {
        return 0.0;
    }
    let d = 5 - 1 - (val.abs().log10().floor() as i32);
    let d = d.clamp(0, 10);
    let factor = 10_f64.powi(d);
    (val * factor).round() / factor
}

pub fn round_f64(val: f64, decimals: usize) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    (val * factor).round() / factor
}

/// Matches the Python SDK's `float_to_wire` function:
/// ```python
/// def float_to_wire(x: float) -> str:
///     rounded = f"{x:.8f}"
///     normalized = Decimal(rounded).normalize()
///     return f"{normalized:f}"
/// ```
/// Round to 8 decimals, then strip trailing zeros.
pub fn float_to_wire(x: f64) -> String {
    let rounded = format!("{:.8}", x);
    if rounded.contains('.') {
        let trimmed = rounded.trim_end_matches('0');
        let trimmed = trimmed.trim_end_matches('.');
        trimmed.to_string()
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_to_wire_strips_trailing_zeros() {
        assert_eq!(float_to_wire(100.0), "100");
        assert_eq!(float_to_wire(1.23000000), "1.23");
    }

    #[test]
    fn round_to_5_sig_figs_matches_venue_rounding() {
        assert_eq!(round_to_5_sig_figs(12345.678), 12346.0);
        assert_eq!(round_to_5_sig_figs(0.000123456), 0.00012346);
    }
}
