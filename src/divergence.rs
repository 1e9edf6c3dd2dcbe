//! Momentum/price divergence detection over a bar series and its oscillator.
//!
//! Implements the three-step scan: find an oscillator extremum on the wrong
//! side of the zero line (A), wait for the oscillator to cross back through
//! zero (B), then look for price to push past A's extreme while the oscillator
//! refuses to confirm (C). Price and momentum disagreeing at C is the signal.

use crate::market_data::Bar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceKind {
    Bullish,
    Bearish,
}

/// One of the three chronological anchors of a divergence chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorPoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub oscillator: f64,
}

/// Completed divergence chain. Anchors are strictly time-ordered a < b < c.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DivergenceSignal {
    pub kind: DivergenceKind,
    pub a: AnchorPoint,
    pub b: AnchorPoint,
    pub c: AnchorPoint,
    pub price_change_pct: f64,
    pub oscillator_change: f64,
    pub strength: f64,
}

#[derive(Debug, Clone)]
pub struct DivergenceDetector {
    /// Trailing window over which A must be the oscillator extremum
    pub lookback: usize,
    /// Maximum bars after A to find the zero-line cross B
    pub zero_cross_horizon: usize,
    /// Maximum bars after B to find the confirming extreme C
    pub confirm_horizon: usize,
    /// Minimum relative margin by which price at C must exceed price at A
    pub price_margin: f64,
    /// Minimum relative margin by which the oscillator at C must fall short of A
    pub oscillator_margin: f64,
    /// Bars at the end of the series excluded from starting new chains
    pub tail_buffer: usize,
}

impl Default for DivergenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DivergenceDetector {
    pub fn new() -> Self {
        Self {
            lookback: 100,
            zero_cross_horizon: 150,
            confirm_horizon: 150,
            price_margin: 0.02,      // price must undercut/overshoot A by 2%
            oscillator_margin: 0.10, // oscillator must hold back 10% from A
            tail_buffer: 20,
        }
    }

    pub fn with_settings(
        lookback: usize,
        zero_cross_horizon: usize,
        confirm_horizon: usize,
        price_margin: f64,
        oscillator_margin: f64,
        tail_buffer: usize,
    ) -> Self {
        Self {
            lookback,
            zero_cross_horizon,
            confirm_horizon,
            price_margin,
            oscillator_margin,
            tail_buffer,
        }
    }

    /// Minimum series length for a scan to be able to produce anything.
    pub fn min_series_len(&self) -> usize {
        self.lookback + self.tail_buffer
    }

    /// Scan a bar series and its aligned oscillator for divergence chains.
    /// Malformed input (length mismatch, too short) yields an empty result,
    /// never an error.
    pub fn scan(&self, bars: &[Bar], oscillator: &[f64]) -> Vec<DivergenceSignal> {
        if bars.len() != oscillator.len() || bars.len() < self.min_series_len() {
            return Vec::new();
        }

        let mut signals = self.scan_directional(bars, oscillator, DivergenceKind::Bullish);
        signals.extend(self.scan_directional(bars, oscillator, DivergenceKind::Bearish));
        signals.sort_by_key(|s| s.c.timestamp);
        signals
    }

    /// One directional pass. The bullish case reads literally; the bearish
    /// case runs the same chain with extremum, zero-cross direction, and
    /// price side flipped.
    fn scan_directional(
        &self,
        bars: &[Bar],
        oscillator: &[f64],
        kind: DivergenceKind,
    ) -> Vec<DivergenceSignal> {
        let n = bars.len();
        let mut signals = Vec::new();

        let mut i = self.lookback;
        while i < n - self.tail_buffer {
            if !self.is_anchor_extremum(oscillator, i, kind) {
                i += 1;
                continue;
            }

            let a_osc = oscillator[i];
            let a_price = match kind {
                DivergenceKind::Bullish => bars[i].low,
                DivergenceKind::Bearish => bars[i].high,
            };

            let Some(b_idx) = self.find_zero_cross(oscillator, i, kind) else {
                i += 1;
                continue;
            };

            let Some(c_idx) = self.find_confirmation(bars, oscillator, b_idx, a_price, a_osc, kind)
            else {
                i += 1;
                continue;
            };

            let c_price = match kind {
                DivergenceKind::Bullish => bars[c_idx].low,
                DivergenceKind::Bearish => bars[c_idx].high,
            };
            let price_change_pct = (c_price - a_price) / a_price * 100.0;
            let oscillator_change = match kind {
                DivergenceKind::Bullish => oscillator[c_idx] - a_osc,
                DivergenceKind::Bearish => a_osc - oscillator[c_idx],
            };
            let strength = if price_change_pct != 0.0 {
                (oscillator_change / price_change_pct * 100.0).abs()
            } else {
                0.0
            };

            signals.push(DivergenceSignal {
                kind,
                a: AnchorPoint {
                    timestamp: bars[i].timestamp,
                    price: a_price,
                    oscillator: a_osc,
                },
                b: AnchorPoint {
                    timestamp: bars[b_idx].timestamp,
                    price: bars[b_idx].close,
                    oscillator: oscillator[b_idx],
                },
                c: AnchorPoint {
                    timestamp: bars[c_idx].timestamp,
                    price: c_price,
                    oscillator: oscillator[c_idx],
                },
                price_change_pct,
                oscillator_change,
                strength,
            });

            // A matched chain consumes its bars: restart the extremum search
            // past C so overlapping chains are not re-detected.
            i = c_idx + 1;
        }

        signals
    }

    /// A is the trailing-window extremum of the oscillator, on the side of the
    /// zero line the chain starts from.
    fn is_anchor_extremum(&self, oscillator: &[f64], i: usize, kind: DivergenceKind) -> bool {
        let window = &oscillator[i - self.lookback..=i];
        let value = oscillator[i];
        match kind {
            DivergenceKind::Bullish => {
                value < 0.0 && window.iter().all(|&v| v >= value)
            }
            DivergenceKind::Bearish => {
                value > 0.0 && window.iter().all(|&v| v <= value)
            }
        }
    }

    /// First index after A where the oscillator crosses the zero line away
    /// from A's side, within the bounded horizon.
    fn find_zero_cross(&self, oscillator: &[f64], a_idx: usize, kind: DivergenceKind) -> Option<usize> {
        let n = oscillator.len();
        let end = (a_idx + 1 + self.zero_cross_horizon).min(n);
        for j in a_idx + 1..end {
            let crossed = match kind {
                DivergenceKind::Bullish => oscillator[j] > 0.0 && oscillator[j - 1] <= 0.0,
                DivergenceKind::Bearish => oscillator[j] < 0.0 && oscillator[j - 1] >= 0.0,
            };
            if crossed {
                return Some(j);
            }
        }
        None
    }

    /// First index after B where price pushes beyond A's extreme by the price
    /// margin while the oscillator stays short of A's value by the oscillator
    /// margin, within the bounded horizon.
    fn find_confirmation(
        &self,
        bars: &[Bar],
        oscillator: &[f64],
        b_idx: usize,
        a_price: f64,
        a_osc: f64,
        kind: DivergenceKind,
    ) -> Option<usize> {
        let n = bars.len();
        let end = (b_idx + 1 + self.confirm_horizon).min(n);
        for k in b_idx + 1..end {
            let confirmed = match kind {
                DivergenceKind::Bullish => {
                    bars[k].low < a_price * (1.0 - self.price_margin)
                        && oscillator[k] > a_osc * (1.0 + self.oscillator_margin)
                }
                DivergenceKind::Bearish => {
                    bars[k].high > a_price * (1.0 + self.price_margin)
                        && oscillator[k] < a_osc * (1.0 - self.oscillator_margin)
                }
            };
            if confirmed {
                return Some(k);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bars_with_prices(prices: &[f64]) -> Vec<Bar> {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Bar {
                timestamp: base + Duration::minutes(i as i64 * 15),
                open: p,
                high: p + 0.2,
                low: p - 0.2,
                close: p,
                volume: 1000.0,
                open_interest: 50000.0,
            })
            .collect()
    }

    /// Small-window detector so test series stay readable.
    fn test_detector() -> DivergenceDetector {
        DivergenceDetector::with_settings(10, 30, 30, 0.02, 0.10, 3)
    }

    /// Plant a bullish divergence: oscillator trough A below zero, zero-line
    /// cross B, then price undercutting A's low while the oscillator holds a
    /// much shallower trough.
    fn planted_bullish() -> (Vec<Bar>, Vec<f64>) {
        let mut prices = vec![100.0; 12];
        let mut osc = vec![0.0; 12];

        // A at index 12: deep oscillator trough, price low 100
        prices.push(100.2);
        osc.push(-2.0);

        // recovery, B crossing zero at index 16
        prices.extend_from_slice(&[101.0, 102.0, 103.0, 104.0]);
        osc.extend_from_slice(&[-1.0, -0.4, -0.1, 0.3]);

        // drift down to a 3% lower low with a shallow oscillator trough (C)
        prices.extend_from_slice(&[102.0, 100.0, 98.5, 96.5, 97.0, 97.5]);
        osc.extend_from_slice(&[0.1, -0.1, -0.2, -0.3, -0.2, -0.1]);

        // tail buffer padding
        prices.extend_from_slice(&[97.5, 97.5, 97.5, 97.5]);
        osc.extend_from_slice(&[-0.05, 0.0, 0.05, 0.05]);

        (bars_with_prices(&prices), osc)
    }

    #[test]
    fn test_planted_bullish_divergence_found_once() {
        let (bars, osc) = planted_bullish();
        let signals = test_detector().scan(&bars, &osc);

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.kind, DivergenceKind::Bullish);
        assert!(signal.a.timestamp < signal.b.timestamp);
        assert!(signal.b.timestamp < signal.c.timestamp);
        // Price made a lower low, oscillator did not
        assert!(signal.c.price < signal.a.price * 0.98);
        assert!(signal.c.oscillator > signal.a.oscillator);
        assert!(signal.strength > 0.0);
    }

    #[test]
    fn test_planted_bearish_divergence_found_once() {
        // Mirror the bullish plant around 100
        let (bars, osc) = planted_bullish();
        let mirrored_prices: Vec<f64> = bars.iter().map(|b| 200.0 - b.close).collect();
        let mirrored_osc: Vec<f64> = osc.iter().map(|v| -v).collect();
        let bars = bars_with_prices(&mirrored_prices);

        let signals = test_detector().scan(&bars, &mirrored_osc);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, DivergenceKind::Bearish);
        assert!(signals[0].c.price > signals[0].a.price * 1.02);
    }

    #[test]
    fn test_no_zero_cross_yields_empty() {
        // Oscillator stays negative the whole time: no B, no signal
        let prices: Vec<f64> = (0..40).map(|i| 100.0 - i as f64 * 0.5).collect();
        let osc: Vec<f64> = (0..40).map(|i| -0.5 - (i % 7) as f64 * 0.1).collect();
        let bars = bars_with_prices(&prices);

        assert!(test_detector().scan(&bars, &osc).is_empty());
    }

    #[test]
    fn test_monotonic_oscillator_yields_empty() {
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 0.2).collect();
        let osc: Vec<f64> = (0..40).map(|i| 0.1 + i as f64 * 0.05).collect();
        let bars = bars_with_prices(&prices);

        assert!(test_detector().scan(&bars, &osc).is_empty());
    }

    #[test]
    fn test_short_series_yields_empty_not_error() {
        let (bars, osc) = planted_bullish();
        let detector = DivergenceDetector::new(); // requires 120 bars
        assert!(detector.scan(&bars, &osc).is_empty());
    }

    #[test]
    fn test_mismatched_lengths_yield_empty() {
        let (bars, mut osc) = planted_bullish();
        osc.pop();
        assert!(test_detector().scan(&bars, &osc).is_empty());
    }

    #[test]
    fn test_price_margin_not_met_yields_empty() {
        // Lower low of only ~1%: under the 2% margin
        let (bars, osc) = planted_bullish();
        let prices: Vec<f64> = bars
            .iter()
            .map(|b| if b.close < 100.0 { 99.4 } else { b.close })
            .collect();
        let bars = bars_with_prices(&prices);

        assert!(test_detector().scan(&bars, &osc).is_empty());
    }

    #[test]
    fn test_strength_guards_zero_price_change() {
        let detector = test_detector();
        // Degenerate: a_price equals c_price exactly would mean 0% change;
        // the margin check already excludes it, so just assert the planted
        // case computes the documented ratio.
        let (bars, osc) = planted_bullish();
        let signal = &detector.scan(&bars, &osc)[0];
        let expected =
            (signal.oscillator_change / signal.price_change_pct * 100.0).abs();
        assert!((signal.strength - expected).abs() < 1e-9);
    }
}
