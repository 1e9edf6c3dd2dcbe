use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single OHLCV bar with futures open interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub open_interest: f64,
}

/// External market data collaborator. Implementations fetch bar history for a
/// single instrument; the result may be empty, unordered, or contain gaps -
/// callers sort ascending and tolerate missing intervals.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_bars(
        &self,
        symbol: &str,
        period_minutes: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>>;
}

/// Rolling bounded window of bars for one instrument.
///
/// Bars are kept in ascending timestamp order; duplicates (same timestamp) are
/// replaced by the newer copy, and bars beyond the lookback horizon are evicted
/// from the front.
#[derive(Debug, Clone)]
pub struct BarWindow {
    pub symbol: String,
    bars: Vec<Bar>,
    max_bars: usize,
}

impl BarWindow {
    pub fn new(symbol: String, max_bars: usize) -> Self {
        Self {
            symbol,
            bars: Vec::new(),
            max_bars,
        }
    }

    /// Merge a fetched batch into the window. Returns the bars that were not
    /// previously present, in ascending order, so callers can feed incremental
    /// consumers (the regime tracker) exactly once per bar.
    pub fn extend(&mut self, incoming: Vec<Bar>) -> Vec<Bar> {
        let mut fresh = Vec::new();

        for bar in incoming {
            match self
                .bars
                .binary_search_by_key(&bar.timestamp, |b| b.timestamp)
            {
                Ok(pos) => {
                    // Same timestamp refetched: keep the newer copy, it may
                    // carry a corrected close on a still-forming bar.
                    self.bars[pos] = bar;
                }
                Err(pos) => {
                    self.bars.insert(pos, bar.clone());
                    fresh.push(bar);
                }
            }
        }

        // Trim to max size if needed
        if self.bars.len() > self.max_bars {
            let excess = self.bars.len() - self.max_bars;
            self.bars.drain(0..excess);
        }

        fresh.sort_by_key(|b| b.timestamp);
        fresh
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }
}
