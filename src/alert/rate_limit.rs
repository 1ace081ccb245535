use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;

use super::state_machine::WatchKey;
use crate::error::ConfigError;

/// Whether a cooldown-suppressed candidate still uses global send budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CooldownBudgetPolicy {
    #[default]
    Exempt,
    Consume,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateLimitConfig {
    /// Messages allowed per rolling window across all keys.
    pub max_per_window: usize,
    pub window_sec: u64,
    /// Minimum spacing between any two outbound messages.
    pub min_spacing_sec: u64,
    pub cooldown_budget: CooldownBudgetPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 10,
            window_sec: 3_600,
            min_spacing_sec: 15,
            cooldown_budget: CooldownBudgetPolicy::Exempt,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_sec)
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_secs(self.min_spacing_sec)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_per_window == 0 {
            return Err(ConfigError::Validation("rate-limit max-per-window must be at least 1".into()));
        }
        if self.window_sec == 0 {
            return Err(ConfigError::Validation("rate-limit window-sec must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    GlobalCap,
    SpamGuard,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DropReason::GlobalCap => "global-cap",
            DropReason::SpamGuard => "spam-guard",
        })
    }
}

/// Inspectable copy of the limiter's bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub window: Vec<DateTime<Utc>>,
    pub last_send: Option<DateTime<Utc>>,
    pub per_key_last_send: Vec<(WatchKey, DateTime<Utc>)>,
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

#[derive(Clone, Debug, Default)]
pub struct RateLimiter {
    window: VecDeque<DateTime<Utc>>,
    last_send: Option<DateTime<Utc>>,
    per_key: BTreeMap<WatchKey, DateTime<Utc>>,
}

impl RateLimiter {
    fn expire(&mut self, now: DateTime<Utc>, cfg: &RateLimitConfig) {
        let window = cfg.window();
        while let Some(front) = self.window.front() {
            if elapsed(*front, now) >= window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// May a message go out at `now`? Does not consume budget.
    pub fn check(&mut self, now: DateTime<Utc>, cfg: &RateLimitConfig) -> Result<(), DropReason> {
        self.expire(now, cfg);
        if let Some(last) = self.last_send {
            if elapsed(last, now) < cfg.min_spacing() {
                return Err(DropReason::SpamGuard);
            }
        }
        if self.window.len() >= cfg.max_per_window {
            return Err(DropReason::GlobalCap);
        }
        Ok(())
    }

    /// Record a message that actually went out.
    pub fn record_send(&mut self, key: &WatchKey, now: DateTime<Utc>) {
        self.window.push_back(now);
        self.last_send = Some(now);
        self.per_key.insert(key.clone(), now);
    }

    /// Charge a cooldown-suppressed candidate against the window when the
    /// policy says so. Returns whether budget was consumed.
    pub fn charge_suppressed(&mut self, now: DateTime<Utc>, cfg: &RateLimitConfig) -> bool {
        if cfg.cooldown_budget != CooldownBudgetPolicy::Consume {
            return false;
        }
        self.expire(now, cfg);
        if self.window.len() >= cfg.max_per_window {
            return false;
        }
        self.window.push_back(now);
        true
    }

    pub fn in_window(&self) -> usize {
        self.window.len()
    }

    pub fn last_send_for(&self, key: &WatchKey) -> Option<DateTime<Utc>> {
        self.per_key.get(key).copied()
    }

    pub fn retain_keys(&mut self, keep: impl Fn(&WatchKey) -> bool) {
        self.per_key.retain(|k, _| keep(k));
    }

    pub fn state(&self) -> RateLimitState {
        RateLimitState {
            window: self.window.iter().copied().collect(),
            last_send: self.last_send,
            per_key_last_send: self.per_key.iter().map(|(k, t)| (k.clone(), *t)).collect(),
        }
    }
}
