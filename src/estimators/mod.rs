//! Market-data estimators (spec.md §4.2): pure functions over streaming
//! inputs with internal EMA/Kalman state. Grounded in the teacher's
//! `ingestor::MarketDataBuffer::realtime_vol_bps` (rolling stddev-over-mean)
//! and `market_maker::QueuePositionEstimator` (per-key EMA-style tracking),
//! generalized into the four estimators spec.md names.

mod imbalance;
mod signal;
mod toxicity;
mod volatility;

pub use imbalance::BookImbalance;
pub use signal::{DirectionalSignal, Signal};
pub use toxicity::{FillSide, ToxicityDetector};
pub use volatility::Volatility;
