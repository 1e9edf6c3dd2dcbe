use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub instruments: Vec<InstrumentConfig>,
    pub scan_config: ScanConfig,
    pub detector_config: DetectorConfig,
    pub regime_config: RegimeConfig,
    pub breakout_config: BreakoutConfig,
    pub registry_config: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl InstrumentConfig {
    /// Display name for notifications, falling back to the symbol itself.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.symbol)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub bar_period_minutes: u32,
    pub max_bars: usize,
    pub scan_interval_minutes: u64,
    pub breakout_interval_minutes: u64,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_min_call_jitter_ms")]
    pub min_call_jitter_ms: u64,
    #[serde(default = "default_max_call_jitter_ms")]
    pub max_call_jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,
    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,
    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    #[serde(default = "default_zero_cross_horizon")]
    pub zero_cross_horizon: usize,
    #[serde(default = "default_confirm_horizon")]
    pub confirm_horizon: usize,
    #[serde(default = "default_price_margin")]
    pub price_margin: f64,
    #[serde(default = "default_oscillator_margin")]
    pub oscillator_margin: f64,
    #[serde(default = "default_tail_buffer")]
    pub tail_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    #[serde(default = "default_fast_ma_period")]
    pub fast_ma_period: usize,
    #[serde(default = "default_mid_ma_period")]
    pub mid_ma_period: usize,
    #[serde(default = "default_slow_ma_period")]
    pub slow_ma_period: usize,
    #[serde(default = "default_min_state_duration")]
    pub min_state_duration: usize,
    #[serde(default = "default_stability_period")]
    pub stability_period: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutConfig {
    #[serde(default = "default_channel_period")]
    pub channel_period: usize,
    #[serde(default = "default_expiry_minutes")]
    pub expiry_minutes: i64,
    #[serde(default = "default_breakout_state_file")]
    pub state_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_history_file")]
    pub history_file: String,
    #[serde(default = "default_per_symbol_capacity")]
    pub per_symbol_capacity: usize,
}

fn default_fetch_concurrency() -> usize {
    4
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_min_call_jitter_ms() -> u64 {
    1000
}
fn default_max_call_jitter_ms() -> u64 {
    5000
}

fn default_macd_fast() -> usize {
    12
}
fn default_macd_slow() -> usize {
    26
}
fn default_macd_signal() -> usize {
    9
}
fn default_lookback() -> usize {
    100 // trailing bars over which an anchor must be the oscillator extremum
}
fn default_zero_cross_horizon() -> usize {
    150
}
fn default_confirm_horizon() -> usize {
    150
}
fn default_price_margin() -> f64 {
    0.02 // 2% beyond the anchor extreme
}
fn default_oscillator_margin() -> f64 {
    0.10 // oscillator must hold back 10% from the anchor value
}
fn default_tail_buffer() -> usize {
    20
}

fn default_fast_ma_period() -> usize {
    10
}
fn default_mid_ma_period() -> usize {
    20
}
fn default_slow_ma_period() -> usize {
    40
}
fn default_min_state_duration() -> usize {
    2
}
fn default_stability_period() -> usize {
    3
}

fn default_channel_period() -> usize {
    20
}
fn default_expiry_minutes() -> i64 {
    60 // breakout watches go stale after an hour
}
fn default_breakout_state_file() -> String {
    "active_signals.json".to_string()
}

fn default_history_file() -> String {
    "signal_history.json".to_string()
}
fn default_per_symbol_capacity() -> usize {
    50
}

impl ScannerConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_file("scanner_config.json")
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let config_str = fs::read_to_string(path).unwrap_or_else(|_| Self::default_config_json());
        let config: ScannerConfig = serde_json::from_str(&config_str)?;
        Ok(config)
    }

    fn default_config_json() -> String {
        serde_json::to_string_pretty(&Self::default()).unwrap()
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            instruments: vec![
                InstrumentConfig {
                    symbol: "FG2605".to_string(),
                    name: Some("Flat Glass".to_string()),
                },
                InstrumentConfig {
                    symbol: "RB2510".to_string(),
                    name: Some("Rebar".to_string()),
                },
                InstrumentConfig {
                    symbol: "TA2509".to_string(),
                    name: Some("PTA".to_string()),
                },
            ],
            scan_config: ScanConfig {
                bar_period_minutes: 15,
                max_bars: 500,
                scan_interval_minutes: 3,
                breakout_interval_minutes: 1,
                fetch_concurrency: default_fetch_concurrency(),
                fetch_timeout_secs: default_fetch_timeout_secs(),
                min_call_jitter_ms: default_min_call_jitter_ms(),
                max_call_jitter_ms: default_max_call_jitter_ms(),
            },
            detector_config: DetectorConfig {
                macd_fast: default_macd_fast(),
                macd_slow: default_macd_slow(),
                macd_signal: default_macd_signal(),
                lookback: default_lookback(),
                zero_cross_horizon: default_zero_cross_horizon(),
                confirm_horizon: default_confirm_horizon(),
                price_margin: default_price_margin(),
                oscillator_margin: default_oscillator_margin(),
                tail_buffer: default_tail_buffer(),
            },
            regime_config: RegimeConfig {
                fast_ma_period: default_fast_ma_period(),
                mid_ma_period: default_mid_ma_period(),
                slow_ma_period: default_slow_ma_period(),
                min_state_duration: default_min_state_duration(),
                stability_period: default_stability_period(),
            },
            breakout_config: BreakoutConfig {
                channel_period: default_channel_period(),
                expiry_minutes: default_expiry_minutes(),
                state_file: default_breakout_state_file(),
            },
            registry_config: RegistryConfig {
                history_file: default_history_file(),
                per_symbol_capacity: default_per_symbol_capacity(),
            },
        }
    }
}
