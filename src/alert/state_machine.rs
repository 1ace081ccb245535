//! Per-(instrument, side) debounce / hysteresis / cooldown state.
//!
//! ```text
//! Cool -> Arming (1..debounce-1 passes) -> Armed -> fire -> Cooldown
//!   ^                                                         |
//!   +---------- score < threshold - hysteresis ---------------+
//! ```
//!
//! A candidate is produced only on a qualifying snapshot for an armed key
//! whose cooldown has elapsed. The cooldown is measured from the last fire and
//! survives disarming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::types::{Instrument, WatchSide};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WatchKey {
    pub instrument: Instrument,
    pub side: WatchSide,
}

impl WatchKey {
    pub fn new(instrument: Instrument, side: WatchSide) -> Self {
        Self { instrument, side }
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instrument, self.side)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Cool,
    Arming,
    Armed,
    Cooldown,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyState {
    pub phase: Phase,
    pub consecutive_passes: u32,
    pub armed: bool,
    pub last_alert_ts: Option<DateTime<Utc>>,
    pub last_score: Option<f64>,
}

impl KeyState {
    pub fn cooldown_remaining(&self, now: DateTime<Utc>, cooldown: Duration) -> Duration {
        let Some(last) = self.last_alert_ts else {
            return Duration::ZERO;
        };
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        cooldown.saturating_sub(elapsed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub threshold: f64,
    pub hysteresis: f64,
    pub debounce_count: u32,
    pub cooldown: Duration,
}

/// What one snapshot did to a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Transition {
    /// Below the hysteresis floor; counter reset.
    Reset,
    /// Inside the hysteresis band; counter unchanged.
    Held,
    Arming { passes: u32 },
    /// Armed and out of cooldown: dispatch, then call `record_fire`.
    Candidate,
    /// Armed but still cooling down.
    CooldownSuppressed { remaining: Duration },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AlertStateMachine {
    states: BTreeMap<WatchKey, KeyState>,
}

impl AlertStateMachine {
    pub fn from_states(states: impl IntoIterator<Item = (WatchKey, KeyState)>) -> Self {
        Self {
            states: states.into_iter().collect(),
        }
    }

    pub fn observe(&mut self, key: &WatchKey, score: f64, now: DateTime<Utc>, t: &Thresholds) -> Transition {
        let debounce = t.debounce_count.max(1);
        let state = self.states.entry(key.clone()).or_default();
        state.last_score = Some(score);

        if !(score >= t.threshold - t.hysteresis) {
            state.consecutive_passes = 0;
            state.armed = false;
            state.phase = Phase::Cool;
            return Transition::Reset;
        }
        if score < t.threshold {
            if state.phase == Phase::Cooldown && state.cooldown_remaining(now, t.cooldown).is_zero() {
                state.phase = if state.armed { Phase::Armed } else { Phase::Cool };
            }
            return Transition::Held;
        }

        state.consecutive_passes = (state.consecutive_passes + 1).min(debounce);
        if state.consecutive_passes < debounce {
            state.phase = Phase::Arming;
            return Transition::Arming {
                passes: state.consecutive_passes,
            };
        }
        state.armed = true;
        let remaining = state.cooldown_remaining(now, t.cooldown);
        if remaining.is_zero() {
            state.phase = Phase::Armed;
            Transition::Candidate
        } else {
            state.phase = Phase::Cooldown;
            Transition::CooldownSuppressed { remaining }
        }
    }

    /// Mark a successful dispatch for `key`.
    pub fn record_fire(&mut self, key: &WatchKey, now: DateTime<Utc>) {
        let state = self.states.entry(key.clone()).or_default();
        state.last_alert_ts = Some(now);
        state.phase = Phase::Cooldown;
    }

    pub fn get(&self, key: &WatchKey) -> Option<&KeyState> {
        self.states.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WatchKey, &KeyState)> {
        self.states.iter()
    }

    pub fn snapshot(&self) -> Vec<(WatchKey, KeyState)> {
        self.states.iter().map(|(k, s)| (k.clone(), s.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop keys the current watch list no longer covers. Returns how many went.
    pub fn prune(&mut self, keep: impl Fn(&WatchKey) -> bool) -> usize {
        let before = self.states.len();
        self.states.retain(|k, _| keep(k));
        before - self.states.len()
    }
}
