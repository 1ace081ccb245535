use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::scoring::Reason;
use crate::types::{Instrument, WatchSide};

/// Order leg of a suggested round trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    Open,
    Close,
}

impl Leg {
    pub const BOTH: [Leg; 2] = [Leg::Open, Leg::Close];

    pub fn as_str(self) -> &'static str {
        match self {
            Leg::Open => "open",
            Leg::Close => "close",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillOutcome {
    Filled,
    Missed,
}

impl FillOutcome {
    pub fn as_target(self) -> f64 {
        match self {
            FillOutcome::Filled => 1.0,
            FillOutcome::Missed => 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LegQuote {
    pub limit_price: f64,
    pub fill_probability: f64,
}

/// A safe-entry alert ready to be dispatched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertDecision {
    /// Stable id; also the trade id fill feedback refers to.
    pub id: String,
    pub instrument: Instrument,
    pub side: WatchSide,
    pub score: f64,
    pub reasons: Vec<Reason>,
    pub open: LegQuote,
    pub close: LegQuote,
    pub ts: DateTime<Utc>,
}

impl AlertDecision {
    pub fn leg(&self, leg: Leg) -> &LegQuote {
        match leg {
            Leg::Open => &self.open,
            Leg::Close => &self.close,
        }
    }
}

pub fn alert_id(instrument: &Instrument, side: WatchSide, ts: DateTime<Utc>) -> String {
    let seed = format!("{}|{}|{}", instrument.0, side.as_str(), ts.timestamp_millis());
    let digest = blake3::hash(seed.as_bytes());
    digest.to_hex()[..16].to_string()
}

/// Alerts kept for status and restart, newest last.
pub const RECENT_ALERTS: usize = 50;

/// Bounded history of dispatched alerts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecentAlerts {
    alerts: VecDeque<AlertDecision>,
    cap: usize,
}

impl RecentAlerts {
    pub fn new(cap: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(cap.min(RECENT_ALERTS)),
            cap: cap.max(1),
        }
    }

    pub fn from_alerts(alerts: impl IntoIterator<Item = AlertDecision>, cap: usize) -> Self {
        let mut recent = Self::new(cap);
        for alert in alerts {
            recent.push(alert);
        }
        recent
    }

    pub fn push(&mut self, alert: AlertDecision) {
        if self.alerts.len() == self.cap {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn to_vec(&self) -> Vec<AlertDecision> {
        self.alerts.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn alert_id_is_deterministic_per_key_and_time() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let btc = Instrument::new("BTC");
        let a = alert_id(&btc, WatchSide::Long, ts);
        assert_eq!(a, alert_id(&btc, WatchSide::Long, ts));
        assert_eq!(a.len(), 16);
        assert_ne!(a, alert_id(&btc, WatchSide::Short, ts));
    }

    fn decision(n: i64) -> AlertDecision {
        let ts = Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap();
        let btc = Instrument::new("BTC");
        AlertDecision {
            id: alert_id(&btc, WatchSide::Long, ts),
            instrument: btc,
            side: WatchSide::Long,
            score: 90.0,
            reasons: Vec::new(),
            open: LegQuote {
                limit_price: 99.9,
                fill_probability: 0.6,
            },
            close: LegQuote {
                limit_price: 100.1,
                fill_probability: 0.5,
            },
            ts,
        }
    }

    #[test]
    fn recent_alerts_keep_the_newest() {
        let recent = RecentAlerts::from_alerts((0..5).map(decision), 3);
        assert_eq!(recent.len(), 3);
        let kept: Vec<i64> = recent.to_vec().iter().map(|a| a.ts.timestamp() - 1_700_000_000).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }
}
