//! Persisted signal identity registry: decides which candidates have never
//! been seen, selects at most one per scan pass for dispatch, and remembers
//! everything else so it is never dispatched later.

use crate::persistence;
use crate::signal::SignalEvent;
use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;

pub struct SignalRegistry {
    /// Canonical ids per symbol, in insertion order (oldest first)
    history: HashMap<String, Vec<String>>,
    per_symbol_capacity: usize,
    store_path: PathBuf,
}

impl SignalRegistry {
    /// Load persisted history; a missing store starts empty.
    pub fn load(store_path: PathBuf, per_symbol_capacity: usize) -> Self {
        let history: HashMap<String, Vec<String>> = persistence::load_json_or_default(&store_path);

        if !history.is_empty() {
            let total: usize = history.values().map(|v| v.len()).sum();
            info!(
                "Loaded signal history: {} ids across {} symbols",
                total,
                history.len()
            );
        }

        Self {
            history,
            per_symbol_capacity,
            store_path,
        }
    }

    /// A candidate is new iff its canonical id has never been recorded AND its
    /// timestamp is strictly after the newest timestamp already recorded for
    /// that symbol. Replays of older signals are never "new" again even after
    /// capacity eviction dropped their ids.
    pub fn is_new(&self, candidate: &SignalEvent) -> bool {
        let id = candidate.canonical_id();
        let Some(ids) = self.history.get(candidate.symbol()) else {
            // Unknown symbol: new, though first-run policy blocks dispatch
            return true;
        };

        if ids.iter().any(|known| known == &id) {
            return false;
        }

        match self.latest_recorded_timestamp(candidate.symbol()) {
            Some(latest) => candidate.timestamp() > latest,
            None => true,
        }
    }

    /// Mark a candidate as seen, evicting the oldest ids beyond the per-symbol
    /// capacity. Eviction is insertion-order FIFO, independent of whether an
    /// id was ever dispatched.
    pub fn record(&mut self, candidate: &SignalEvent) {
        let id = candidate.canonical_id();
        let ids = self.history.entry(candidate.symbol().to_string()).or_default();
        if ids.iter().any(|known| known == &id) {
            return;
        }
        ids.push(id);

        if ids.len() > self.per_symbol_capacity {
            let excess = ids.len() - self.per_symbol_capacity;
            ids.drain(0..excess);
        }
    }

    /// Process one instrument's scan-pass candidates: record every new one,
    /// flush the history, and return the single candidate to dispatch - the
    /// most recent new one - or `None`.
    ///
    /// A symbol with no prior history key has its signals recorded but nothing
    /// dispatched on that first pass, so a fresh deployment does not replay a
    /// backlog of historical signals as notifications.
    pub fn select_for_dispatch(&mut self, candidates: &[SignalEvent]) -> Result<Option<SignalEvent>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let first_run: Vec<String> = candidates
            .iter()
            .map(|c| c.symbol().to_string())
            .filter(|s| !self.history.contains_key(s))
            .collect();

        let mut fresh: Vec<&SignalEvent> =
            candidates.iter().filter(|c| self.is_new(c)).collect();
        if fresh.is_empty() {
            debug!("No new signals among {} candidates", candidates.len());
            return Ok(None);
        }

        fresh.sort_by_key(|c| c.timestamp());
        for candidate in &fresh {
            self.record(candidate);
        }
        self.flush()?;

        let Some(latest) = fresh.last() else {
            return Ok(None);
        };
        if first_run.iter().any(|s| s == latest.symbol()) {
            info!(
                "First scan for {}: recorded {} signals without dispatch",
                latest.symbol(),
                fresh.len()
            );
            return Ok(None);
        }

        Ok(Some((*latest).clone()))
    }

    /// Newest timestamp recoverable from the symbol's recorded ids. Records
    /// whose timestamp token does not parse are skipped with a warning.
    fn latest_recorded_timestamp(&self, symbol: &str) -> Option<DateTime<Utc>> {
        let ids = self.history.get(symbol)?;
        ids.iter()
            .filter_map(|id| match parse_id_timestamp(id) {
                Some(ts) => Some(ts),
                None => {
                    warn!("Skipping malformed signal id in history: {}", id);
                    None
                }
            })
            .max()
    }

    pub fn recorded_count(&self, symbol: &str) -> usize {
        self.history.get(symbol).map(|v| v.len()).unwrap_or(0)
    }

    /// Recorded ids for a symbol in insertion order, oldest first.
    pub fn recorded_ids(&self, symbol: &str) -> Vec<String> {
        self.history.get(symbol).cloned().unwrap_or_default()
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.history.contains_key(symbol)
    }

    pub fn flush(&self) -> Result<()> {
        persistence::write_json_atomic(&self.store_path, &self.history)
    }
}

/// The timestamp token is the final `_`-separated segment of a canonical id.
fn parse_id_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let token = id.rsplit('_').next()?;
    // Minute-resolution token; pad to seconds for parsing
    let padded = format!("{}00", token);
    NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}
