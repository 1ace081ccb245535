//! Safe-entry scoring: raw market metrics → component scores → one weighted
//! score with an explanation of what is holding it back.

pub mod aggregate;
pub mod normalize;

pub use aggregate::{aggregate, Aggregate, PassLevels, ScoreWeights, DEFAULT_PASS_LEVEL};
pub use normalize::{normalize, Band, ScoreBands};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ConfigError, WatchError};
use crate::types::{FundingKind, MarketSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    Spread,
    MarkDeviation,
    OracleDeviation,
    Funding,
    Liquidity,
    Depth,
}

impl Component {
    /// Declaration order; also the tie-break order for reasons.
    pub const ALL: [Component; 6] = [
        Component::Spread,
        Component::MarkDeviation,
        Component::OracleDeviation,
        Component::Funding,
        Component::Liquidity,
        Component::Depth,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Component::Spread => "spread",
            Component::MarkDeviation => "mark-deviation",
            Component::OracleDeviation => "oracle-deviation",
            Component::Funding => "funding",
            Component::Liquidity => "liquidity",
            Component::Depth => "depth",
        }
    }

    pub fn higher_is_better(self) -> bool {
        matches!(self, Component::Liquidity | Component::Depth)
    }

    fn complaint(self) -> &'static str {
        match self {
            Component::Spread => "spread high",
            Component::MarkDeviation => "mark deviation high",
            Component::OracleDeviation => "oracle deviation high",
            Component::Funding => "funding high",
            Component::Liquidity => "liquidity low",
            Component::Depth => "depth low",
        }
    }

    fn format_value(self, v: f64) -> String {
        match self {
            Component::Spread | Component::MarkDeviation | Component::OracleDeviation => {
                format!("{v:.2} bps")
            }
            Component::Funding => format!("{v:.6}/h"),
            Component::Liquidity | Component::Depth => format!("${v:.0}"),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component name → score in [0, 100].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreComponents(BTreeMap<Component, f64>);

impl ScoreComponents {
    pub fn get(&self, component: Component) -> Option<f64> {
        self.0.get(&component).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Component, f64)> + '_ {
        self.0.iter().map(|(c, s)| (*c, *s))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Component, f64)> for ScoreComponents {
    fn from_iter<I: IntoIterator<Item = (Component, f64)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(c, s)| (c, if s.is_finite() { s.clamp(0.0, 100.0) } else { 0.0 }))
                .collect(),
        )
    }
}

/// A component dragging the aggregate down.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    pub component: Component,
    pub score: f64,
    /// Raw metric value, when known.
    pub value: Option<f64>,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(v) => write!(
                f,
                "{} ({}, score {:.1})",
                self.component.complaint(),
                self.component.format_value(v),
                self.score
            ),
            None => write!(f, "{} (score {:.1})", self.component.complaint(), self.score),
        }
    }
}

/// Everything the scorer needs besides the snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScoringConfig {
    pub bands: ScoreBands,
    pub weights: ScoreWeights,
    pub pass_levels: PassLevels,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bands.validate()?;
        self.weights.validate()?;
        self.pass_levels.validate()
    }
}

/// Metrics derived from one snapshot, in the units the bands use.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawMetrics {
    pub spread_bps: f64,
    pub mark_dev_bps: f64,
    pub oracle_dev_bps: f64,
    /// |funding| per hour.
    pub funding_abs: f64,
    pub liquidity: f64,
    pub depth: f64,
}

impl RawMetrics {
    pub fn from_snapshot(snap: &MarketSnapshot, funding_kind: FundingKind) -> Result<Self, WatchError> {
        if !(snap.best_bid > 0.0 && snap.best_ask > 0.0) {
            return Err(WatchError::invalid_snapshot(
                &snap.instrument,
                format!("non-positive touch (bid={}, ask={})", snap.best_bid, snap.best_ask),
            ));
        }
        if snap.best_ask < snap.best_bid {
            return Err(WatchError::invalid_snapshot(
                &snap.instrument,
                format!("crossed book (bid={}, ask={})", snap.best_bid, snap.best_ask),
            ));
        }
        if !(snap.mid > 0.0) {
            return Err(WatchError::invalid_snapshot(
                &snap.instrument,
                format!("non-positive mid {}", snap.mid),
            ));
        }
        let touch_mid = (snap.best_bid + snap.best_ask) / 2.0;
        Ok(Self {
            spread_bps: (snap.best_ask - snap.best_bid) / touch_mid * 10_000.0,
            mark_dev_bps: (snap.mark - snap.mid).abs() / snap.mid * 10_000.0,
            oracle_dev_bps: (snap.oracle - snap.mid).abs() / snap.mid * 10_000.0,
            funding_abs: funding_kind.to_hourly(snap.funding_rate).abs(),
            liquidity: snap.volume_24h,
            depth: snap.depth,
        })
    }

    pub fn value(&self, component: Component) -> f64 {
        match component {
            Component::Spread => self.spread_bps,
            Component::MarkDeviation => self.mark_dev_bps,
            Component::OracleDeviation => self.oracle_dev_bps,
            Component::Funding => self.funding_abs,
            Component::Liquidity => self.liquidity,
            Component::Depth => self.depth,
        }
    }

    pub fn component_scores(&self, bands: &ScoreBands) -> Result<ScoreComponents, ConfigError> {
        Component::ALL
            .into_iter()
            .map(|c| Ok((c, bands.band(c).score(c, self.value(c))?)))
            .collect::<Result<Vec<_>, ConfigError>>()
            .map(ScoreComponents::from_iter)
    }
}

/// Full scoring result for one snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub metrics: RawMetrics,
    pub components: ScoreComponents,
    pub score: f64,
    pub reasons: Vec<Reason>,
}

pub fn score_metrics(metrics: RawMetrics, cfg: &ScoringConfig) -> Result<ScoreReport, ConfigError> {
    let components = metrics.component_scores(&cfg.bands)?;
    let Aggregate { score, reasons } = aggregate(&components, &cfg.weights, &cfg.pass_levels)?;
    let reasons = reasons
        .into_iter()
        .map(|r| Reason {
            value: Some(metrics.value(r.component)),
            ..r
        })
        .collect();
    Ok(ScoreReport {
        metrics,
        components,
        score,
        reasons,
    })
}

pub fn score_snapshot(
    snap: &MarketSnapshot,
    funding_kind: FundingKind,
    cfg: &ScoringConfig,
) -> Result<ScoreReport, WatchError> {
    let metrics = RawMetrics::from_snapshot(snap, funding_kind)?;
    Ok(score_metrics(metrics, cfg)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Instrument;
    use chrono::Utc;

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            instrument: Instrument::new("BTC"),
            best_bid: 99.99,
            best_ask: 100.01,
            mid: 100.0,
            mark: 100.03,
            oracle: 100.0,
            funding_rate: 1e-5,
            volume_24h: 1e7,
            depth: 20_000.0,
            sentiment: None,
            ts: Utc::now(),
        }
    }

    #[test]
    fn derives_metrics_in_bps() {
        let m = RawMetrics::from_snapshot(&snapshot(), FundingKind::Hourly).unwrap();
        assert!((m.spread_bps - 2.0).abs() < 1e-6);
        assert!((m.mark_dev_bps - 3.0).abs() < 1e-6);
        assert_eq!(m.oracle_dev_bps, 0.0);
    }

    #[test]
    fn eight_hour_funding_is_scaled_to_hourly() {
        let mut snap = snapshot();
        snap.funding_rate = -8e-5;
        let m = RawMetrics::from_snapshot(&snap, FundingKind::EightHour).unwrap();
        assert!((m.funding_abs - 1e-5).abs() < 1e-15);
    }

    #[test]
    fn rejects_broken_touch() {
        let mut snap = snapshot();
        snap.best_bid = 0.0;
        assert!(matches!(
            RawMetrics::from_snapshot(&snap, FundingKind::Hourly),
            Err(WatchError::InvalidSnapshot { .. })
        ));
        let mut snap = snapshot();
        snap.best_ask = 99.0;
        assert!(RawMetrics::from_snapshot(&snap, FundingKind::Hourly).is_err());
    }

    #[test]
    fn reasons_carry_raw_values() {
        let mut snap = snapshot();
        snap.best_bid = 99.95;
        snap.best_ask = 100.05;
        let report = score_snapshot(&snap, FundingKind::Hourly, &ScoringConfig::default()).unwrap();
        let spread = &report.reasons[0];
        assert_eq!(spread.component, Component::Spread);
        assert_eq!(spread.to_string(), "spread high (10.00 bps, score 0.0)");
    }
}
