//! Per-cycle orchestration: fetch bars for every configured instrument, run
//! the detectors, funnel candidates through the dedup registry, and dispatch
//! at most one new signal per instrument per pass.

use crate::breakout::{BreakoutMonitor, BreakoutStatus, Direction, PendingBreakoutSignal};
use crate::config::{InstrumentConfig, ScannerConfig};
use crate::divergence::DivergenceDetector;
use crate::indicators::{donchian_channel, macd_histogram};
use crate::market_data::{Bar, BarWindow, MarketDataProvider};
use crate::notify::Notifier;
use crate::regime::{RegimeState, RegimeTracker, RegimeTransition};
use crate::registry::SignalRegistry;
use crate::signal::SignalEvent;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Why an instrument produced nothing this cycle. None of these terminate the
/// scan loop; persistence failures are retried on the next pass.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no bars returned for {0}")]
    DataUnavailable(String),
    #[error("fetch failed for {symbol}: {cause}")]
    Fetch {
        symbol: String,
        cause: anyhow::Error,
    },
    #[error("state persistence failed for {symbol}: {cause}")]
    Persistence {
        symbol: String,
        cause: anyhow::Error,
    },
}

/// Aggregated counts for one scan pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub analyzed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub candidates: usize,
    pub dispatched: usize,
}

/// Per-instrument rolling state kept across cycles.
struct InstrumentState {
    window: BarWindow,
    tracker: RegimeTracker,
    /// Last regime transition awaiting stability confirmation
    pending_transition: Option<RegimeTransition>,
}

pub struct Scanner {
    config: ScannerConfig,
    provider: Arc<dyn MarketDataProvider>,
    notifier: Arc<dyn Notifier>,
    detector: DivergenceDetector,
    instruments: HashMap<String, InstrumentState>,
    monitor: BreakoutMonitor,
    registry: SignalRegistry,
}

impl Scanner {
    pub fn new(
        config: ScannerConfig,
        provider: Arc<dyn MarketDataProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let detector = DivergenceDetector::with_settings(
            config.detector_config.lookback,
            config.detector_config.zero_cross_horizon,
            config.detector_config.confirm_horizon,
            config.detector_config.price_margin,
            config.detector_config.oscillator_margin,
            config.detector_config.tail_buffer,
        );
        let monitor = BreakoutMonitor::load(
            PathBuf::from(&config.breakout_config.state_file),
            Duration::minutes(config.breakout_config.expiry_minutes),
        );
        let registry = SignalRegistry::load(
            PathBuf::from(&config.registry_config.history_file),
            config.registry_config.per_symbol_capacity,
        );

        Self {
            config,
            provider,
            notifier,
            detector,
            instruments: HashMap::new(),
            monitor,
            registry,
        }
    }

    /// One sequential scan pass over every configured instrument. Bar fetches
    /// fan out through a bounded worker pool; all detector and registry work
    /// happens on this task as results are folded in.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleSummary {
        let scan = &self.config.scan_config;
        let start =
            now - Duration::minutes(scan.bar_period_minutes as i64 * scan.max_bars as i64);
        let period = scan.bar_period_minutes;

        let timeout = std::time::Duration::from_secs(scan.fetch_timeout_secs);
        let fetches: Vec<(InstrumentConfig, Result<Vec<Bar>>)> =
            stream::iter(self.config.instruments.clone().into_iter().enumerate())
                .map(|(idx, instrument)| {
                    let provider = Arc::clone(&self.provider);
                    let delay_ms = if idx == 0 {
                        0
                    } else {
                        jitter_ms(scan.min_call_jitter_ms, scan.max_call_jitter_ms)
                    };
                    async move {
                        if delay_ms > 0 {
                            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                        }
                        let result = match tokio::time::timeout(
                            timeout,
                            provider.get_bars(&instrument.symbol, period, start, now),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(anyhow!(
                                "fetch timed out after {}s",
                                timeout.as_secs()
                            )),
                        };
                        (instrument, result)
                    }
                })
                .buffer_unordered(scan.fetch_concurrency.max(1))
                .collect()
                .await;

        let mut summary = CycleSummary::default();
        for (instrument, fetch) in fetches {
            match self.process_instrument(&instrument, fetch, now).await {
                Ok((candidates, dispatched)) => {
                    summary.analyzed += 1;
                    summary.candidates += candidates;
                    if dispatched {
                        summary.dispatched += 1;
                    }
                }
                Err(ScanError::DataUnavailable(symbol)) => {
                    debug!("{}: no data this cycle, skipping", symbol);
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!("{}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Scan cycle: {} analyzed, {} skipped, {} failed, {} candidates, {} dispatched",
            summary.analyzed, summary.skipped, summary.failed, summary.candidates, summary.dispatched
        );
        summary
    }

    async fn process_instrument(
        &mut self,
        instrument: &InstrumentConfig,
        fetch: Result<Vec<Bar>>,
        now: DateTime<Utc>,
    ) -> Result<(usize, bool), ScanError> {
        let symbol = instrument.symbol.clone();
        let bars = fetch.map_err(|cause| ScanError::Fetch {
            symbol: symbol.clone(),
            cause,
        })?;
        if bars.is_empty() {
            return Err(ScanError::DataUnavailable(symbol));
        }

        let mut state = self
            .instruments
            .remove(&symbol)
            .unwrap_or_else(|| self.new_instrument_state(&symbol));

        let result = self.analyze(instrument, &mut state, bars, now).await;
        self.instruments.insert(symbol, state);
        result
    }

    async fn analyze(
        &mut self,
        instrument: &InstrumentConfig,
        state: &mut InstrumentState,
        bars: Vec<Bar>,
        now: DateTime<Utc>,
    ) -> Result<(usize, bool), ScanError> {
        let symbol = &instrument.symbol;
        let name = instrument.display_name();
        let fresh = state.window.extend(bars);

        let mut candidates: Vec<SignalEvent> = Vec::new();

        // Divergence scan over the whole window. A short window produces an
        // empty oscillator or an empty scan; both mean "nothing yet".
        let detector_cfg = &self.config.detector_config;
        let closes = state.window.closes();
        let oscillator = macd_histogram(
            &closes,
            detector_cfg.macd_fast,
            detector_cfg.macd_slow,
            detector_cfg.macd_signal,
        );
        for divergence in self.detector.scan(state.window.bars(), &oscillator) {
            candidates.push(SignalEvent::from_divergence(symbol, name, divergence));
        }

        // Regime tracking consumes each bar exactly once
        for bar in &fresh {
            let (_, transition) = state.tracker.evaluate(bar);
            if let Some(transition) = transition {
                debug!(
                    "{}: regime flip {} -> {}",
                    symbol, transition.from, transition.to
                );
                state.pending_transition = Some(transition);
            }
        }

        // A flip only becomes a candidate once the tracker confirms stability
        if let Some(pending) = &state.pending_transition {
            let snapshot = state.tracker.snapshot();
            if snapshot.is_stable && snapshot.state == pending.to {
                candidates.push(SignalEvent::from_regime_transition(
                    symbol,
                    name,
                    pending.clone(),
                ));
                state.pending_transition = None;
            }
        }

        let candidate_count = candidates.len();
        let dispatched = self
            .registry
            .select_for_dispatch(&candidates)
            .map_err(|cause| ScanError::Persistence {
                symbol: symbol.clone(),
                cause,
            })?;

        let Some(event) = dispatched else {
            return Ok((candidate_count, false));
        };

        if let Err(e) = self.notifier.send(&event).await {
            // At-most-once: the signal stays recorded even when the send fails
            error!("Dispatch failed for {}: {}", event.canonical_id(), e);
        }

        // A dispatched transition into a directional regime arms a breakout
        // watch on the channel as it stands right now
        if let SignalEvent::RegimeTransition { transition, .. } = &event {
            self.arm_breakout_watch(instrument, state, transition, now)?;
        }

        Ok((candidate_count, true))
    }

    fn arm_breakout_watch(
        &mut self,
        instrument: &InstrumentConfig,
        state: &InstrumentState,
        transition: &RegimeTransition,
        now: DateTime<Utc>,
    ) -> Result<(), ScanError> {
        let direction = match transition.to {
            RegimeState::Uptrend => Direction::Long,
            RegimeState::Downtrend => Direction::Short,
            RegimeState::Consolidation => return Ok(()),
        };

        let Some((channel_high, channel_low)) = donchian_channel(
            state.window.bars(),
            self.config.breakout_config.channel_period,
        ) else {
            return Ok(());
        };
        let entry_price = state
            .window
            .latest()
            .map(|b| b.close)
            .unwrap_or(transition.price);

        let signal = PendingBreakoutSignal::new(
            instrument.symbol.clone(),
            instrument.display_name().to_string(),
            direction,
            entry_price,
            channel_high,
            channel_low,
            now,
        );
        self.monitor
            .register(signal)
            .map_err(|cause| ScanError::Persistence {
                symbol: instrument.symbol.clone(),
                cause,
            })
    }

    /// Faster-cadence pass over every symbol with pending breakout watches.
    /// Returns the number of dispatched trigger notifications.
    pub async fn run_breakout_checks(&mut self, now: DateTime<Utc>) -> usize {
        if let Err(e) = self.monitor.purge_expired(now) {
            error!("Failed to persist breakout state after purge: {}", e);
        }

        let symbols = self.monitor.watched_symbols();
        if symbols.is_empty() {
            return 0;
        }
        debug!("Checking {} symbols for channel breakouts", symbols.len());

        let scan = self.config.scan_config.clone();
        let mut dispatched = 0;

        for (idx, symbol) in symbols.into_iter().enumerate() {
            if idx > 0 {
                let delay = jitter_ms(scan.min_call_jitter_ms, scan.max_call_jitter_ms);
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            let Some(price) = self.fetch_latest_price(&symbol, now).await else {
                debug!("{}: no quote for breakout check", symbol);
                continue;
            };

            let outcomes = match self.monitor.evaluate(&symbol, price, now) {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    error!("Failed to persist breakout state for {}: {}", symbol, e);
                    continue;
                }
            };

            for outcome in outcomes {
                if outcome.status != BreakoutStatus::Triggered {
                    continue;
                }
                let name = outcome.symbol_name.clone();
                let event = SignalEvent::from_breakout(&name, outcome);
                match self.registry.select_for_dispatch(std::slice::from_ref(&event)) {
                    Ok(Some(event)) => {
                        if let Err(e) = self.notifier.send(&event).await {
                            error!("Dispatch failed for {}: {}", event.canonical_id(), e);
                        }
                        dispatched += 1;
                    }
                    Ok(None) => {
                        debug!("Breakout {} already seen, not dispatched", event.canonical_id());
                    }
                    Err(e) => {
                        error!("Failed to persist history for {}: {}", symbol, e);
                    }
                }
            }
        }

        dispatched
    }

    /// Most recent close for a symbol. Errors and empty results both mean
    /// "no signal this cycle", never a crash.
    async fn fetch_latest_price(&self, symbol: &str, now: DateTime<Utc>) -> Option<f64> {
        let period = self.config.scan_config.bar_period_minutes;
        let start = now - Duration::minutes(period as i64 * 3);
        let timeout = std::time::Duration::from_secs(self.config.scan_config.fetch_timeout_secs);

        let fetched =
            tokio::time::timeout(timeout, self.provider.get_bars(symbol, period, start, now))
                .await;
        match fetched {
            Ok(Ok(bars)) => bars.iter().max_by_key(|b| b.timestamp).map(|b| b.close),
            Ok(Err(e)) => {
                warn!("Quote fetch failed for {}: {}", symbol, e);
                None
            }
            Err(_) => {
                warn!("Quote fetch timed out for {}", symbol);
                None
            }
        }
    }

    /// Flush both persisted stores; called before shutdown so a restart
    /// resumes from the state of the completed pass.
    pub fn flush_state(&self) -> Result<()> {
        self.registry.flush()?;
        self.monitor.flush()?;
        Ok(())
    }

    pub fn pending_breakout_count(&self) -> usize {
        self.monitor.pending_count()
    }

    fn new_instrument_state(&self, symbol: &str) -> InstrumentState {
        let regime_cfg = &self.config.regime_config;
        InstrumentState {
            window: BarWindow::new(symbol.to_string(), self.config.scan_config.max_bars),
            tracker: RegimeTracker::new(
                regime_cfg.fast_ma_period,
                regime_cfg.mid_ma_period,
                regime_cfg.slow_ma_period,
                regime_cfg.min_state_duration,
                regime_cfg.stability_period,
            ),
            pending_transition: None,
        }
    }
}

fn jitter_ms(min: u64, max: u64) -> u64 {
    if max <= min {
        min
    } else {
        rand::thread_rng().gen_range(min..=max)
    }
}
