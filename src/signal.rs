//! Unified signal event type shared by the detectors, the dedup registry, and
//! the notification path.

use crate::breakout::{Direction, PendingBreakoutSignal};
use crate::divergence::{DivergenceKind, DivergenceSignal};
use crate::regime::RegimeTransition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the scanner can notify about, as a tagged variant so the
/// formatter and registry match exhaustively instead of poking at maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SignalEvent {
    BullishDivergence {
        symbol: String,
        symbol_name: String,
        divergence: DivergenceSignal,
    },
    BearishDivergence {
        symbol: String,
        symbol_name: String,
        divergence: DivergenceSignal,
    },
    BreakoutLong {
        symbol: String,
        symbol_name: String,
        breakout: PendingBreakoutSignal,
    },
    BreakoutShort {
        symbol: String,
        symbol_name: String,
        breakout: PendingBreakoutSignal,
    },
    RegimeTransition {
        symbol: String,
        symbol_name: String,
        transition: RegimeTransition,
    },
}

impl SignalEvent {
    pub fn from_divergence(symbol: &str, symbol_name: &str, divergence: DivergenceSignal) -> Self {
        match divergence.kind {
            DivergenceKind::Bullish => SignalEvent::BullishDivergence {
                symbol: symbol.to_string(),
                symbol_name: symbol_name.to_string(),
                divergence,
            },
            DivergenceKind::Bearish => SignalEvent::BearishDivergence {
                symbol: symbol.to_string(),
                symbol_name: symbol_name.to_string(),
                divergence,
            },
        }
    }

    pub fn from_breakout(symbol_name: &str, breakout: PendingBreakoutSignal) -> Self {
        let symbol = breakout.symbol.clone();
        match breakout.direction {
            Direction::Long => SignalEvent::BreakoutLong {
                symbol,
                symbol_name: symbol_name.to_string(),
                breakout,
            },
            Direction::Short => SignalEvent::BreakoutShort {
                symbol,
                symbol_name: symbol_name.to_string(),
                breakout,
            },
        }
    }

    pub fn from_regime_transition(
        symbol: &str,
        symbol_name: &str,
        transition: RegimeTransition,
    ) -> Self {
        SignalEvent::RegimeTransition {
            symbol: symbol.to_string(),
            symbol_name: symbol_name.to_string(),
            transition,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            SignalEvent::BullishDivergence { symbol, .. }
            | SignalEvent::BearishDivergence { symbol, .. }
            | SignalEvent::BreakoutLong { symbol, .. }
            | SignalEvent::BreakoutShort { symbol, .. }
            | SignalEvent::RegimeTransition { symbol, .. } => symbol,
        }
    }

    pub fn symbol_name(&self) -> &str {
        match self {
            SignalEvent::BullishDivergence { symbol_name, .. }
            | SignalEvent::BearishDivergence { symbol_name, .. }
            | SignalEvent::BreakoutLong { symbol_name, .. }
            | SignalEvent::BreakoutShort { symbol_name, .. }
            | SignalEvent::RegimeTransition { symbol_name, .. } => symbol_name,
        }
    }

    /// The moment the signal completed: divergence confirmation bar, breakout
    /// trigger time, or the transition bar.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SignalEvent::BullishDivergence { divergence, .. }
            | SignalEvent::BearishDivergence { divergence, .. } => divergence.c.timestamp,
            SignalEvent::BreakoutLong { breakout, .. }
            | SignalEvent::BreakoutShort { breakout, .. } => breakout
                .triggered_time
                .unwrap_or(breakout.registration_time),
            SignalEvent::RegimeTransition { transition, .. } => transition.timestamp,
        }
    }

    pub fn signal_tag(&self) -> &'static str {
        match self {
            SignalEvent::BullishDivergence { .. } => "bullish-divergence",
            SignalEvent::BearishDivergence { .. } => "bearish-divergence",
            SignalEvent::BreakoutLong { .. } => "breakout-long",
            SignalEvent::BreakoutShort { .. } => "breakout-short",
            SignalEvent::RegimeTransition { .. } => "regime-transition",
        }
    }

    /// Deterministic identity: symbol, signal type, and the signal timestamp
    /// truncated to the series resolution (minutes). The timestamp token is
    /// last so it can be parsed back out of persisted history.
    pub fn canonical_id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.symbol(),
            self.signal_tag(),
            self.timestamp().format("%Y%m%d%H%M")
        )
    }

    /// Compact human-readable summary for the notification payload.
    pub fn notification_text(&self) -> String {
        match self {
            SignalEvent::BullishDivergence {
                symbol,
                symbol_name,
                divergence,
            } => format!(
                "Bullish divergence on {} ({}): price {:.2} undercut {:.2} ({:+.2}%) while oscillator held {:.4} vs {:.4}, strength {:.1}",
                symbol_name,
                symbol,
                divergence.c.price,
                divergence.a.price,
                divergence.price_change_pct,
                divergence.c.oscillator,
                divergence.a.oscillator,
                divergence.strength,
            ),
            SignalEvent::BearishDivergence {
                symbol,
                symbol_name,
                divergence,
            } => format!(
                "Bearish divergence on {} ({}): price {:.2} overshot {:.2} ({:+.2}%) while oscillator faded {:.4} vs {:.4}, strength {:.1}",
                symbol_name,
                symbol,
                divergence.c.price,
                divergence.a.price,
                divergence.price_change_pct,
                divergence.c.oscillator,
                divergence.a.oscillator,
                divergence.strength,
            ),
            SignalEvent::BreakoutLong {
                symbol,
                symbol_name,
                breakout,
            } => format!(
                "Long breakout on {} ({}): price {:.2} cleared channel high {:.2} (entry {:.2})",
                symbol_name,
                symbol,
                breakout.trigger_price.unwrap_or(breakout.entry_price),
                breakout.channel_high,
                breakout.entry_price,
            ),
            SignalEvent::BreakoutShort {
                symbol,
                symbol_name,
                breakout,
            } => format!(
                "Short breakout on {} ({}): price {:.2} broke channel low {:.2} (entry {:.2})",
                symbol_name,
                symbol,
                breakout.trigger_price.unwrap_or(breakout.entry_price),
                breakout.channel_low,
                breakout.entry_price,
            ),
            SignalEvent::RegimeTransition {
                symbol,
                symbol_name,
                transition,
            } => format!(
                "Regime change on {} ({}): {} -> {} at {:.2}, strength {:.0}",
                symbol_name,
                symbol,
                transition.from,
                transition.to,
                transition.price,
                transition.strength,
            ),
        }
    }
}
