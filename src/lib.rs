pub mod breakout;
pub mod config;
pub mod divergence;
pub mod indicators;
pub mod market_data;
pub mod notify;
pub mod persistence;
pub mod regime;
pub mod registry;
pub mod scanner;
pub mod signal;
