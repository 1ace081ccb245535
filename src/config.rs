use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::alert::{RateLimitConfig, Thresholds, WatchKey};
use crate::error::ConfigError;
use crate::scoring::ScoringConfig;
use crate::types::{FundingKind, Instrument, SideFilter};

/// Hard floor for the evaluation cadence.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WatchConfig {
    pub instruments: Vec<Instrument>,
    #[serde(default)]
    pub side: SideFilter,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f64,
    #[serde(default = "default_debounce_count")]
    pub debounce_count: u32,
    #[serde(default = "default_cooldown_sec")]
    pub cooldown_sec: u64,
    #[serde(default)]
    pub funding_kind: FundingKind,
    #[serde(default = "default_offset_bps")]
    pub open_offset_bps: f64,
    #[serde(default = "default_offset_bps")]
    pub close_offset_bps: f64,
    /// Notional of the suggested orders; feeds the depth-to-size ratio.
    #[serde(default = "default_order_notional")]
    pub order_notional: f64,
    /// Publish this probability instead of the model's.
    #[serde(default)]
    pub fill_prob_override: Option<f64>,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

const fn default_poll_interval_ms() -> u64 {
    5_000
}

const fn default_threshold() -> f64 {
    80.0
}

const fn default_hysteresis() -> f64 {
    5.0
}

const fn default_debounce_count() -> u32 {
    3
}

const fn default_cooldown_sec() -> u64 {
    300
}

const fn default_offset_bps() -> f64 {
    2.0
}

const fn default_order_notional() -> f64 {
    1_000.0
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            side: SideFilter::default(),
            poll_interval_ms: default_poll_interval_ms(),
            threshold: default_threshold(),
            hysteresis: default_hysteresis(),
            debounce_count: default_debounce_count(),
            cooldown_sec: default_cooldown_sec(),
            funding_kind: FundingKind::default(),
            open_offset_bps: default_offset_bps(),
            close_offset_bps: default_offset_bps(),
            order_notional: default_order_notional(),
            fill_prob_override: None,
            scoring: ScoringConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl WatchConfig {
    pub fn sample() -> Self {
        Self {
            instruments: vec![Instrument::new("BTC"), Instrument::new("ETH")],
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.is_empty() {
            return Err(ConfigError::Validation(
                "at least one instrument must be watched".into(),
            ));
        }
        let mut seen = BTreeSet::new();
        for instrument in &self.instruments {
            if instrument.as_str().trim().is_empty() {
                return Err(ConfigError::Validation("instrument symbol is empty".into()));
            }
            if !seen.insert(instrument) {
                return Err(ConfigError::Validation(format!(
                    "instrument {instrument} listed twice"
                )));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll interval must be greater than zero".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.threshold) {
            return Err(ConfigError::Validation(format!(
                "threshold must be within [0, 100], got {}",
                self.threshold
            )));
        }
        if !(self.hysteresis >= 0.0 && self.hysteresis <= self.threshold) {
            return Err(ConfigError::Validation(format!(
                "hysteresis must be within [0, threshold], got {}",
                self.hysteresis
            )));
        }
        if self.debounce_count == 0 {
            return Err(ConfigError::Validation(
                "debounce count must be greater than zero".into(),
            ));
        }
        for (name, offset) in [
            ("open-offset-bps", self.open_offset_bps),
            ("close-offset-bps", self.close_offset_bps),
        ] {
            if !(offset.is_finite() && offset >= 0.0) {
                return Err(ConfigError::Validation(format!(
                    "{name} must be finite and nonnegative, got {offset}"
                )));
            }
        }
        if !(self.order_notional.is_finite() && self.order_notional > 0.0) {
            return Err(ConfigError::Validation(format!(
                "order notional must be positive, got {}",
                self.order_notional
            )));
        }
        if let Some(p) = self.fill_prob_override {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Validation(format!(
                    "fill probability override must be within [0, 1], got {p}"
                )));
            }
        }
        self.scoring.validate()?;
        self.rate_limit.validate()
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            threshold: self.threshold,
            hysteresis: self.hysteresis,
            debounce_count: self.debounce_count,
            cooldown: Duration::from_secs(self.cooldown_sec),
        }
    }

    /// Configured cadence, never faster than `floor`.
    pub fn poll_interval(&self, floor: Duration) -> Duration {
        Duration::from_millis(self.poll_interval_ms).max(floor)
    }

    /// Every (instrument, side) pair this config evaluates.
    pub fn watch_keys(&self) -> Vec<WatchKey> {
        self.instruments
            .iter()
            .flat_map(|i| {
                self.side
                    .sides()
                    .iter()
                    .map(move |side| WatchKey::new(i.clone(), *side))
            })
            .collect()
    }

    pub fn watches(&self, key: &WatchKey) -> bool {
        self.side.admits(key.side) && self.instruments.contains(&key.instrument)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NotifyConfig {
    /// Emit alerts as structured log events.
    #[serde(default = "default_log_alerts")]
    pub log: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

const fn default_log_alerts() -> bool {
    true
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            log: default_log_alerts(),
            webhook_url: None,
        }
    }
}

/// On-disk config file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigFile {
    pub watch: WatchConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl ConfigFile {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.watch.validate()?;
        if let Some(url) = &self.notify.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Validation(format!(
                    "webhook url must be http(s), got {url}"
                )));
            }
        }
        Ok(())
    }

    pub fn sample() -> Self {
        Self {
            watch: WatchConfig::sample(),
            notify: NotifyConfig {
                log: true,
                webhook_url: None,
            },
        }
    }
}

pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ConfigFile =
        toml::from_str(&contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Process-level knobs that are not part of the hot-swappable watch config.
#[derive(Clone, Debug, PartialEq)]
pub struct WatcherSettings {
    pub min_poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub stop_grace: Duration,
    pub state_path: Option<PathBuf>,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            min_poll_interval: MIN_POLL_INTERVAL,
            fetch_timeout: Duration::from_secs(3),
            stop_grace: Duration::from_secs(5),
            state_path: None,
        }
    }
}

impl WatcherSettings {
    /// Raise the poll floor to `MIN_POLL_INTERVAL` if set below it.
    pub fn clamped(mut self) -> Self {
        if self.min_poll_interval < MIN_POLL_INTERVAL {
            tracing::warn!(
                requested = ?self.min_poll_interval,
                floor = ?MIN_POLL_INTERVAL,
                "minimum poll interval raised to the enforced floor"
            );
            self.min_poll_interval = MIN_POLL_INTERVAL;
        }
        self
    }
}
