//! Triple moving-average trend regime tracking.
//!
//! Three EMAs (fast/mid/slow) classify every bar into one of three regimes:
//! fast > mid > slow is an uptrend, the reverse ordering a downtrend, anything
//! else consolidation. A transition fires on the bar where the ordering flips;
//! consumers gate on `is_stable` before acting - a single-bar flip is noise.

use crate::indicators::EmaState;
use crate::market_data::Bar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeState {
    Uptrend,
    Downtrend,
    Consolidation,
}

impl fmt::Display for RegimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegimeState::Uptrend => "UPTREND",
            RegimeState::Downtrend => "DOWNTREND",
            RegimeState::Consolidation => "CONSOLIDATION",
        };
        write!(f, "{}", name)
    }
}

/// Emitted on the bar where the regime changes. Old and new state are captured
/// in the same evaluation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeTransition {
    pub from: RegimeState,
    pub to: RegimeState,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    /// Advisory 0-100 composite, never used to gate the transition itself
    pub strength: f64,
}

/// Point-in-time view of the tracker.
#[derive(Debug, Clone)]
pub struct RegimeSnapshot {
    pub state: RegimeState,
    pub state_start: Option<DateTime<Utc>>,
    pub start_price: Option<f64>,
    pub duration: usize,
    pub is_stable: bool,
    pub strength: f64,
}

#[derive(Debug, Clone)]
pub struct RegimeTracker {
    fast: EmaState,
    mid: EmaState,
    slow: EmaState,
    state: RegimeState,
    state_start: Option<DateTime<Utc>>,
    start_price: Option<f64>,
    duration: usize,
    state_history: VecDeque<RegimeState>,
    fast_history: VecDeque<f64>,
    last_close: f64,
    min_state_duration: usize,
    stability_period: usize,
}

/// Bars of fast-EMA history used for the slope term of the strength score.
const SLOPE_WINDOW: usize = 5;
const STATE_HISTORY_CAP: usize = 50;

impl RegimeTracker {
    pub fn new(
        fast_period: usize,
        mid_period: usize,
        slow_period: usize,
        min_state_duration: usize,
        stability_period: usize,
    ) -> Self {
        Self {
            fast: EmaState::new(fast_period),
            mid: EmaState::new(mid_period),
            slow: EmaState::new(slow_period),
            state: RegimeState::Consolidation,
            state_start: None,
            start_price: None,
            duration: 0,
            state_history: VecDeque::with_capacity(STATE_HISTORY_CAP),
            fast_history: VecDeque::with_capacity(SLOPE_WINDOW + 1),
            last_close: 0.0,
            min_state_duration,
            stability_period,
        }
    }

    /// Advance the tracker by one bar. Returns the state after this bar and,
    /// when the ordering flipped, the transition event.
    pub fn evaluate(&mut self, bar: &Bar) -> (RegimeState, Option<RegimeTransition>) {
        let fast = self.fast.update(bar.close);
        self.mid.update(bar.close);
        self.slow.update(bar.close);
        self.last_close = bar.close;

        self.fast_history.push_back(fast);
        if self.fast_history.len() > SLOPE_WINDOW + 1 {
            self.fast_history.pop_front();
        }

        let new_state = self.classify();

        let transition = if new_state != self.state {
            let event = RegimeTransition {
                from: self.state,
                to: new_state,
                timestamp: bar.timestamp,
                price: bar.close,
                strength: self.strength_score(),
            };
            self.state = new_state;
            self.state_start = Some(bar.timestamp);
            self.start_price = Some(bar.close);
            self.duration = 0;
            Some(event)
        } else {
            self.duration += 1;
            None
        };

        self.state_history.push_back(self.state);
        if self.state_history.len() > STATE_HISTORY_CAP {
            self.state_history.pop_front();
        }

        (self.state, transition)
    }

    /// Moving-average ordering classification. Insufficient warm-up defaults
    /// to consolidation.
    fn classify(&self) -> RegimeState {
        if !self.slow.is_warm() {
            return RegimeState::Consolidation;
        }

        let (Some(fast), Some(mid), Some(slow)) =
            (self.fast.value(), self.mid.value(), self.slow.value())
        else {
            return RegimeState::Consolidation;
        };

        if fast > mid && mid > slow {
            RegimeState::Uptrend
        } else if fast < mid && mid < slow {
            RegimeState::Downtrend
        } else {
            RegimeState::Consolidation
        }
    }

    /// Stable only when the last `stability_period` states all equal the
    /// current one and the state has been held for the minimum duration.
    pub fn is_stable(&self) -> bool {
        if self.state_history.len() < self.stability_period {
            return false;
        }
        if self.duration < self.min_state_duration {
            return false;
        }
        self.state_history
            .iter()
            .rev()
            .take(self.stability_period)
            .all(|&s| s == self.state)
    }

    pub fn state(&self) -> RegimeState {
        self.state
    }

    pub fn snapshot(&self) -> RegimeSnapshot {
        RegimeSnapshot {
            state: self.state,
            state_start: self.state_start,
            start_price: self.start_price,
            duration: self.duration,
            is_stable: self.is_stable(),
            strength: self.strength_score(),
        }
    }

    /// Advisory trend-strength composite on a 0-100 scale: persistence of the
    /// current state, moving-average spread, and short-horizon fast-EMA slope.
    pub fn strength_score(&self) -> f64 {
        let mut strength: f64 = 50.0;

        // Persistence: up to +15 for a long-held state
        strength += (self.duration as f64 * 1.5).min(15.0);

        // Spread: widely separated averages mark a strong trend, up to +-10
        if let (Some(fast), Some(mid), Some(slow)) =
            (self.fast.value(), self.mid.value(), self.slow.value())
        {
            if self.last_close > 0.0 {
                let spreads = [
                    (fast - mid).abs(),
                    (mid - slow).abs(),
                    (fast - slow).abs(),
                ];
                let max_spread = spreads.iter().fold(0.0f64, |a, &b| a.max(b)) / self.last_close;
                strength += (max_spread / 0.03 * 20.0).min(20.0) - 10.0;
            }
        }

        // Slope: fast EMA movement over the short horizon, up to +10
        if self.fast_history.len() > SLOPE_WINDOW && self.last_close > 0.0 {
            let newest = self.fast_history.back().unwrap();
            let oldest = self.fast_history.front().unwrap();
            let slope = (newest - oldest) / SLOPE_WINDOW as f64 / self.last_close;
            strength += (slope.abs() * 1000.0).min(10.0);
        }

        strength.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bar(i: usize, close: f64) -> Bar {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        Bar {
            timestamp: base + Duration::minutes(i as i64 * 15),
            open: close,
            high: close + 0.2,
            low: close - 0.2,
            close,
            volume: 1000.0,
            open_interest: 50000.0,
        }
    }

    fn tracker() -> RegimeTracker {
        RegimeTracker::new(3, 5, 8, 2, 3)
    }

    /// Long ramp up, long ramp down, then another ramp up: forces the tracker
    /// through all three states repeatedly.
    fn wavy_closes() -> Vec<f64> {
        let mut closes = Vec::new();
        for i in 0..30 {
            closes.push(100.0 + i as f64); // rally
        }
        for i in 0..40 {
            closes.push(129.0 - i as f64); // selloff
        }
        for i in 0..30 {
            closes.push(90.0 + i as f64); // recovery
        }
        closes
    }

    #[test]
    fn test_warm_up_defaults_to_consolidation() {
        let mut t = tracker();
        for i in 0..7 {
            let (state, transition) = t.evaluate(&bar(i, 100.0 + i as f64));
            assert_eq!(state, RegimeState::Consolidation);
            assert!(transition.is_none());
        }
    }

    #[test]
    fn test_sustained_rally_classified_uptrend() {
        let mut t = tracker();
        for i in 0..25 {
            t.evaluate(&bar(i, 100.0 + i as f64));
        }
        assert_eq!(t.state(), RegimeState::Uptrend);

        let mut t = tracker();
        for i in 0..25 {
            t.evaluate(&bar(i, 200.0 - i as f64));
        }
        assert_eq!(t.state(), RegimeState::Downtrend);
    }

    #[test]
    fn test_transition_count_matches_state_changes() {
        let mut t = tracker();
        let mut prev = t.state();
        let mut observed_changes = 0;
        let mut emitted = 0;

        for (i, close) in wavy_closes().into_iter().enumerate() {
            let (state, transition) = t.evaluate(&bar(i, close));

            if state != prev {
                observed_changes += 1;
                let event = transition.as_ref().expect("state change without event");
                assert_eq!(event.from, prev);
                assert_eq!(event.to, state);
            } else {
                assert!(transition.is_none());
            }
            if transition.is_some() {
                emitted += 1;
            }
            prev = state;
        }

        assert_eq!(emitted, observed_changes);
        // The wave passes through uptrend and downtrend at least once each
        assert!(observed_changes >= 2);
    }

    #[test]
    fn test_transition_records_old_and_new_state_atomically() {
        let mut t = tracker();
        let mut events = Vec::new();
        for (i, close) in wavy_closes().into_iter().enumerate() {
            if let (_, Some(event)) = t.evaluate(&bar(i, close)) {
                events.push(event);
            }
        }

        // Consecutive events chain: each starts where the previous ended
        for pair in events.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
        for event in &events {
            assert_ne!(event.from, event.to);
        }
    }

    #[test]
    fn test_never_stable_below_min_hold() {
        let mut t = tracker();
        for (i, close) in wavy_closes().into_iter().enumerate() {
            t.evaluate(&bar(i, close));
            let snapshot = t.snapshot();
            if snapshot.duration < 2 {
                assert!(!snapshot.is_stable);
            }
        }
    }

    #[test]
    fn test_stable_after_sustained_state() {
        let mut t = tracker();
        for i in 0..25 {
            t.evaluate(&bar(i, 100.0 + i as f64));
        }
        let snapshot = t.snapshot();
        assert_eq!(snapshot.state, RegimeState::Uptrend);
        assert!(snapshot.is_stable);
        assert!(snapshot.duration >= 2);
    }

    #[test]
    fn test_duration_resets_on_transition() {
        let mut t = tracker();
        let mut last_transition_snapshot = None;
        for (i, close) in wavy_closes().into_iter().enumerate() {
            let (_, transition) = t.evaluate(&bar(i, close));
            if transition.is_some() {
                last_transition_snapshot = Some(t.snapshot());
            }
        }
        let snap = last_transition_snapshot.expect("expected at least one transition");
        assert_eq!(snap.duration, 0);
        assert!(snap.state_start.is_some());
        assert!(snap.start_price.is_some());
    }

    #[test]
    fn test_strength_score_bounded() {
        let mut t = tracker();
        for (i, close) in wavy_closes().into_iter().enumerate() {
            t.evaluate(&bar(i, close));
            let s = t.strength_score();
            assert!((0.0..=100.0).contains(&s));
        }
    }
}
