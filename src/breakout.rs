//! Channel breakout monitoring.
//!
//! A registered signal captures the rolling channel as it existed at
//! registration time and waits for price to cross it. Each pending entry
//! resolves to exactly one terminal state - Triggered when price crosses the
//! captured boundary in the signal's direction, Expired when the watch window
//! runs out - and is removed from the active set in the same pass. The active
//! set is flushed to disk after every mutation so a restart resumes
//! monitoring without duplicate registration or lost expiry timing.

use crate::persistence;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BreakoutStatus {
    Pending,
    Triggered,
    Expired,
}

/// A directional signal waiting for channel confirmation. `channel_high` and
/// `channel_low` are captured once at registration and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingBreakoutSignal {
    pub symbol: String,
    pub symbol_name: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub channel_high: f64,
    pub channel_low: f64,
    pub registration_time: DateTime<Utc>,
    pub status: BreakoutStatus,
    pub triggered_time: Option<DateTime<Utc>>,
    pub trigger_price: Option<f64>,
}

impl PendingBreakoutSignal {
    pub fn new(
        symbol: String,
        symbol_name: String,
        direction: Direction,
        entry_price: f64,
        channel_high: f64,
        channel_low: f64,
        registration_time: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol,
            symbol_name,
            direction,
            entry_price,
            channel_high,
            channel_low,
            registration_time,
            status: BreakoutStatus::Pending,
            triggered_time: None,
            trigger_price: None,
        }
    }
}

pub struct BreakoutMonitor {
    active: HashMap<String, Vec<PendingBreakoutSignal>>,
    expiry_window: Duration,
    store_path: PathBuf,
}

impl BreakoutMonitor {
    /// Load the persisted active set; a missing store starts empty.
    pub fn load(store_path: PathBuf, expiry_window: Duration) -> Self {
        let active: HashMap<String, Vec<PendingBreakoutSignal>> =
            persistence::load_json_or_default(&store_path);

        let pending: usize = active.values().map(|v| v.len()).sum();
        if pending > 0 {
            info!("Resuming {} pending breakout signals from {}", pending, store_path.display());
        }

        Self {
            active,
            expiry_window,
            store_path,
        }
    }

    /// Register a new pending signal and flush the active set.
    pub fn register(&mut self, signal: PendingBreakoutSignal) -> Result<()> {
        info!(
            "Registered breakout watch: {} {:?} channel {:.2}/{:.2}",
            signal.symbol, signal.direction, signal.channel_high, signal.channel_low
        );
        self.active
            .entry(signal.symbol.clone())
            .or_default()
            .push(signal);
        self.flush()
    }

    /// Evaluate every pending entry for one symbol against the latest price.
    /// Entries that reach a terminal state are removed from the active set in
    /// the same pass and returned; the set is flushed when anything changed.
    pub fn evaluate(
        &mut self,
        symbol: &str,
        current_price: f64,
        current_time: DateTime<Utc>,
    ) -> Result<Vec<PendingBreakoutSignal>> {
        let expiry_window = self.expiry_window;
        let Some(signals) = self.active.get_mut(symbol) else {
            return Ok(Vec::new());
        };

        let mut terminal = Vec::new();
        signals.retain_mut(|signal| {
            // Expiry is checked first: a stale watch never triggers
            if current_time - signal.registration_time > expiry_window {
                signal.status = BreakoutStatus::Expired;
                terminal.push(signal.clone());
                return false;
            }

            let broke_out = match signal.direction {
                Direction::Long => current_price > signal.channel_high,
                Direction::Short => current_price < signal.channel_low,
            };

            if broke_out {
                signal.status = BreakoutStatus::Triggered;
                signal.triggered_time = Some(current_time);
                signal.trigger_price = Some(current_price);
                terminal.push(signal.clone());
                return false;
            }

            true
        });

        if signals.is_empty() {
            self.active.remove(symbol);
        }

        if !terminal.is_empty() {
            for signal in &terminal {
                match signal.status {
                    BreakoutStatus::Triggered => info!(
                        "Breakout triggered: {} {:?} at {:.2}",
                        signal.symbol, signal.direction, current_price
                    ),
                    BreakoutStatus::Expired => debug!(
                        "Breakout watch expired: {} {:?}",
                        signal.symbol, signal.direction
                    ),
                    BreakoutStatus::Pending => {}
                }
            }
            self.flush()?;
        }

        Ok(terminal)
    }

    /// Drop entries past the expiry window without price evaluation. Used on
    /// the slower maintenance cadence for symbols with no fresh quote.
    pub fn purge_expired(&mut self, current_time: DateTime<Utc>) -> Result<usize> {
        let expiry_window = self.expiry_window;
        let mut expired = 0;
        for signals in self.active.values_mut() {
            let before = signals.len();
            signals.retain(|s| current_time - s.registration_time <= expiry_window);
            expired += before - signals.len();
        }
        self.active.retain(|_, signals| !signals.is_empty());

        if expired > 0 {
            info!("Purged {} expired breakout signals", expired);
            self.flush()?;
        }
        Ok(expired)
    }

    pub fn pending_count(&self) -> usize {
        self.active.values().map(|v| v.len()).sum()
    }

    /// Symbols that currently have pending entries to evaluate.
    pub fn watched_symbols(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    pub fn flush(&self) -> Result<()> {
        persistence::write_json_atomic(&self.store_path, &self.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn long_signal() -> PendingBreakoutSignal {
        PendingBreakoutSignal::new(
            "FG2605".to_string(),
            "Flat Glass".to_string(),
            Direction::Long,
            99.5,
            100.0,
            95.0,
            t0(),
        )
    }

    fn monitor(dir: &tempfile::TempDir) -> BreakoutMonitor {
        BreakoutMonitor::load(dir.path().join("active_signals.json"), Duration::hours(1))
    }

    #[test]
    fn test_long_trigger_above_channel_high() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(&dir);
        m.register(long_signal()).unwrap();

        let terminal = m
            .evaluate("FG2605", 101.0, t0() + Duration::minutes(10))
            .unwrap();

        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].status, BreakoutStatus::Triggered);
        assert_eq!(terminal[0].trigger_price, Some(101.0));
        assert!(terminal[0].triggered_time.is_some());
        assert_eq!(m.pending_count(), 0);
    }

    #[test]
    fn test_no_trigger_inside_channel() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(&dir);
        m.register(long_signal()).unwrap();

        let terminal = m
            .evaluate("FG2605", 99.0, t0() + Duration::minutes(10))
            .unwrap();

        assert!(terminal.is_empty());
        assert_eq!(m.pending_count(), 1);
    }

    #[test]
    fn test_expiry_without_breakout() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(&dir);
        m.register(long_signal()).unwrap();

        let terminal = m
            .evaluate("FG2605", 99.0, t0() + Duration::minutes(90))
            .unwrap();

        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].status, BreakoutStatus::Expired);
        assert_eq!(terminal[0].trigger_price, None);
        assert_eq!(m.pending_count(), 0);
    }

    #[test]
    fn test_expired_entry_never_triggers_even_past_channel() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(&dir);
        m.register(long_signal()).unwrap();

        // Price is past the channel, but the watch is stale
        let terminal = m
            .evaluate("FG2605", 105.0, t0() + Duration::hours(2))
            .unwrap();

        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].status, BreakoutStatus::Expired);
    }

    #[test]
    fn test_short_trigger_below_channel_low() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(&dir);
        let mut signal = long_signal();
        signal.direction = Direction::Short;
        m.register(signal).unwrap();

        // Above channel_low: still pending
        let terminal = m
            .evaluate("FG2605", 96.0, t0() + Duration::minutes(5))
            .unwrap();
        assert!(terminal.is_empty());

        let terminal = m
            .evaluate("FG2605", 94.5, t0() + Duration::minutes(10))
            .unwrap();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].status, BreakoutStatus::Triggered);
        assert_eq!(terminal[0].trigger_price, Some(94.5));
    }

    #[test]
    fn test_state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut m = monitor(&dir);
            m.register(long_signal()).unwrap();
        }

        let mut reloaded = monitor(&dir);
        assert_eq!(reloaded.pending_count(), 1);
        assert_eq!(reloaded.watched_symbols(), vec!["FG2605".to_string()]);

        // The reloaded watch still triggers against its original channel
        let terminal = reloaded
            .evaluate("FG2605", 101.0, t0() + Duration::minutes(30))
            .unwrap();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].status, BreakoutStatus::Triggered);
    }

    #[test]
    fn test_purge_expired_only_touches_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = monitor(&dir);
        m.register(long_signal()).unwrap();

        let mut late = long_signal();
        late.registration_time = t0() + Duration::minutes(50);
        m.register(late).unwrap();

        let purged = m.purge_expired(t0() + Duration::minutes(75)).unwrap();
        assert_eq!(purged, 1);
        assert_eq!(m.pending_count(), 1);
    }
}
