//! Moving-average and oscillator calculations shared by the detectors.

use crate::market_data::Bar;

/// Exponential moving average over a full series, seeded with the first value.
/// Returns one smoothed value per input value.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut current = values[0];
    out.push(current);

    for &value in &values[1..] {
        current = alpha * value + (1.0 - alpha) * current;
        out.push(current);
    }

    out
}

/// MACD histogram (MACD line minus its signal line), the zero-centered
/// oscillator the divergence detector scans. Returns an empty series when the
/// input is shorter than the slow period - callers treat that as insufficient
/// history, not an error.
pub fn macd_histogram(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<f64> {
    if closes.len() < slow {
        return Vec::new();
    }

    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);

    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&macd_line, signal);

    macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect()
}

/// Rolling channel over the trailing `period` bars: (highest high, lowest low).
/// Uses whatever is available when the series is shorter than the period.
pub fn donchian_channel(bars: &[Bar], period: usize) -> Option<(f64, f64)> {
    if bars.is_empty() {
        return None;
    }

    let start = bars.len().saturating_sub(period);
    let recent = &bars[start..];

    let high = recent.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = recent.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    Some((high, low))
}

/// Incrementally updated EMA for tick-by-tick consumers.
#[derive(Debug, Clone)]
pub struct EmaState {
    alpha: f64,
    value: Option<f64>,
    samples: usize,
    period: usize,
}

impl EmaState {
    pub fn new(period: usize) -> Self {
        Self {
            alpha: 2.0 / (period as f64 + 1.0),
            value: None,
            samples: 0,
            period,
        }
    }

    pub fn update(&mut self, value: f64) -> f64 {
        let next = match self.value {
            Some(current) => self.alpha * value + (1.0 - self.alpha) * current,
            None => value,
        };
        self.value = Some(next);
        self.samples += 1;
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Warmed up once it has absorbed a full period of samples.
    pub fn is_warm(&self) -> bool {
        self.samples >= self.period
    }
}
