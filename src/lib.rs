//! Safe-entry market watcher.
//!
//! This crate watches perpetual-futures market conditions and says when it is
//! a good moment to enter with resting maker orders. Each tick it:
//! scores spread, mark/oracle deviation, funding, liquidity and depth into one
//! 0-100 number; runs a per-(instrument, side) debounce / hysteresis /
//! cooldown state machine over that score; rate-limits what comes out; and
//! attaches maker-safe limit prices with fill probabilities from a logistic
//! model that is calibrated online from realized fills.

pub mod alert;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod fill;
pub mod metrics;
pub mod notify;
pub mod persist;
pub mod pricing;
pub mod scoring;
pub mod types;
pub mod watcher;

pub use crate::config::{load_config, ConfigFile, WatchConfig, WatcherSettings};
pub use crate::error::{ConfigError, WatchError};
pub use crate::watcher::{Lifecycle, Watcher, WatcherStatus};
