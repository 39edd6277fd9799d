//! Directional signal: Kalman-filtered price trend gated by a QQE-on-RSI
//! crossing, with hysteresis (spec.md §4.2).
//!
//! No direct teacher analogue exists (the teacher bot is purely passive);
//! this is grounded in the Kalman/EMA state-tracking idiom the teacher
//! already uses for `LatencyAuditor`/`QueuePositionEstimator` (a small
//! struct holding rolling state, updated per observation, queried for a
//! derived verdict).

use std::collections::VecDeque;

/// Output of the directional signal: a bias, not a primary edge
/// (spec.md §1 Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Down = -1,
    Flat = 0,
    Up = 1,
}

impl Signal {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// 1D constant-velocity Kalman filter: state = [level, slope].
#[derive(Debug, Clone)]
struct KalmanTrend {
    level: f64,
    slope: f64,
    p: [[f64; 2]; 2],
    process_noise: f64,
    observation_noise: f64,
    initialized: bool,
}

impl KalmanTrend {
    fn new(process_noise: f64, observation_noise: f64) -> Self {
        Self {
            level: 0.0,
            slope: 0.0,
            p: [[1.0, 0.0], [0.0, 1.0]],
            process_noise,
            observation_noise,
            initialized: false,
        }
    }

    fn update(&mut self, observation: f64) -> f64 {
        if !self.initialized {
            self.level = observation;
            self.slope = 0.0;
            self.initialized = true;
            return self.slope;
        }

        // Predict: level += slope, slope unchanged.
        let pred_level = self.level + self.slope;
        let pred_slope = self.slope;
        let q = self.process_noise;
        let p00 = self.p[0][0] + self.p[0][1] + self.p[1][0] + self.p[1][1] + q;
        let p01 = self.p[0][1] + self.p[1][1];
        let p10 = self.p[1][0] + self.p[1][1];
        let p11 = self.p[1][1] + q;

        // Update against the level observation.
        let r = self.observation_noise;
        let innovation = observation - pred_level;
        let s = p00 + r;
        let k0 = p00 / s;
        let k1 = p10 / s;

        self.level = pred_level + k0 * innovation;
        self.slope = pred_slope + k1 * innovation;

        self.p[0][0] = (1.0 - k0) * p00;
        self.p[0][1] = (1.0 - k0) * p01;
        self.p[1][0] = p10 - k1 * p00;
        self.p[1][1] = p11 - k1 * p01;

        self.slope
    }
}

/// Simplified QQE-on-RSI: tracks RSI and a smoothed RSI-based trailing
/// band; a crossing of the band by RSI is the gate signal.
#[derive(Debug, Clone)]
struct Qqe {
    period: usize,
    gains: VecDeque<f64>,
    losses: VecDeque<f64>,
    last_price: Option<f64>,
    smoothed_rsi: Option<f64>,
    trail: Option<f64>,
    rsi_smoothing: f64,
}

impl Qqe {
    fn new(period: usize) -> Self {
        Self {
            period: period.max(2),
            gains: VecDeque::with_capacity(period),
            losses: VecDeque::with_capacity(period),
            last_price: None,
            smoothed_rsi: None,
            trail: None,
            rsi_smoothing: 0.25,
        }
    }

    /// Returns `Some(true)` for a bullish crossing, `Some(false)` for a
    /// bearish crossing, `None` if no crossing occurred this tick.
    fn update(&mut self, price: f64) -> Option<bool> {
        let prev = self.last_price.replace(price);
        let Some(prev) = prev else { return None };

        let change = price - prev;
        let (gain, loss) = if change >= 0.0 { (change, 0.0) } else { (0.0, -change) };
        push_bounded(&mut self.gains, gain, self.period);
        push_bounded(&mut self.losses, loss, self.period);
        if self.gains.len() < self.period {
            return None;
        }

        let avg_gain: f64 = self.gains.iter().sum::<f64>() / self.period as f64;
        let avg_loss: f64 = self.losses.iter().sum::<f64>() / self.period as f64;
        let rs = if avg_loss > 0.0 { avg_gain / avg_loss } else { avg_gain.max(1.0) * 100.0 };
        let rsi = 100.0 - 100.0 / (1.0 + rs);

        let alpha = self.rsi_smoothing;
        let smoothed = match self.smoothed_rsi {
            Some(prev_s) => alpha * rsi + (1.0 - alpha) * prev_s,
            None => rsi,
        };
        self.smoothed_rsi = Some(smoothed);

        let prev_trail = self.trail;
        // A simple trailing band around the smoothed RSI.
        let band = 5.0;
        self.trail = Some(match prev_trail {
            None => smoothed,
            Some(t) => {
                if smoothed > t + band {
                    smoothed - band
                } else if smoothed < t - band {
                    smoothed + band
                } else {
                    t
                }
            }
        });

        match prev_trail {
            Some(t) if smoothed > t && self.trail.unwrap() > t => Some(true),
            Some(t) if smoothed < t && self.trail.unwrap() < t => Some(false),
            _ => None,
        }
    }
}

fn push_bounded(buf: &mut VecDeque<f64>, val: f64, cap: usize) {
    if buf.len() >= cap {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// Combines Kalman trend slope with QQE-on-RSI crossing, with hysteresis:
/// a non-zero state persists until the opposite-signed signal has held
/// for `hysteresis_ticks` consecutive ticks (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct DirectionalSignal {
    kalman: KalmanTrend,
    qqe: Qqe,
    hysteresis_ticks: u32,
    current: Signal,
    opposite_streak: u32,
}

impl DirectionalSignal {
    pub fn new(process_noise: f64, observation_noise: f64, rsi_period: usize, hysteresis_ticks: u32) -> Self {
        Self {
            kalman: KalmanTrend::new(process_noise, observation_noise),
            qqe: Qqe::new(rsi_period),
            hysteresis_ticks: hysteresis_ticks.max(1),
            current: Signal::Flat,
            opposite_streak: 0,
        }
    }

    pub fn update(&mut self, mid: f64) -> Signal {
        let slope = self.kalman.update(mid);
        let crossing = self.qqe.update(mid);

        let raw = match crossing {
            Some(true) if slope > 0.0 => Signal::Up,
            Some(false) if slope < 0.0 => Signal::Down,
            _ => self.current,
        };

        if raw == self.current {
            self.opposite_streak = 0;
        } else {
            self.opposite_streak += 1;
            if self.opposite_streak >= self.hysteresis_ticks {
                self.current = raw;
                self.opposite_streak = 0;
            }
        }

        self.current
    }

    pub fn value(&self) -> Signal {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_series_never_signals() {
        let mut sig = DirectionalSignal::new(1e-5, 1.0, 4, 3);
        for _ in 0..50 {
            assert_eq!(sig.update(100.0), Signal::Flat);
        }
    }

    #[test]
    fn hysteresis_requires_consecutive_opposite_ticks() {
        let mut sig = DirectionalSignal::new(1e-5, 1.0, 4, 3);
        sig.current = Signal::Up;
        sig.opposite_streak = 0;

        // A single opposite-leaning tick should not immediately flip state
        // given only one supporting observation.
        let _ = sig.update(100.0);
        assert_eq!(sig.value(), Signal::Up);
    }

    #[test]
    fn uptrend_eventually_signals_up() {
        let mut sig = DirectionalSignal::new(1e-3, 0.5, 4, 2);
        let mut price = 100.0;
        let mut saw_up = false;
        for _ in 0..200 {
            price *= 1.001;
            if sig.update(price) == Signal::Up {
                saw_up = true;
            }
        }
        assert!(saw_up, "expected an Up signal during a sustained uptrend");
    }
}
