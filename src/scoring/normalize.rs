use serde::{Deserialize, Serialize};

use super::Component;
use crate::error::ConfigError;

/// Map a raw metric onto [0, 100]: `bad` scores 0, `good` scores 100, linear
/// in between and clamped outside. The band's ordering decides direction, so
/// lower-is-better metrics carry `bad > good`.
pub fn normalize(metric: Component, value: f64, bad: f64, good: f64) -> Result<f64, ConfigError> {
    if !bad.is_finite() || !good.is_finite() {
        return Err(ConfigError::Validation(format!(
            "{metric} band must be finite (bad={bad}, good={good})"
        )));
    }
    if bad == good {
        return Err(ConfigError::Validation(format!(
            "{metric} band is degenerate: bad == good == {bad}"
        )));
    }
    if !value.is_finite() {
        return Ok(0.0);
    }
    let t = (value - bad) / (good - bad);
    Ok((t * 100.0).clamp(0.0, 100.0))
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub bad: f64,
    pub good: f64,
}

impl Band {
    pub const fn new(bad: f64, good: f64) -> Self {
        Self { bad, good }
    }

    pub fn score(&self, metric: Component, value: f64) -> Result<f64, ConfigError> {
        normalize(metric, value, self.bad, self.good)
    }

    pub fn validate(&self, metric: Component) -> Result<(), ConfigError> {
        // Evaluate once so degenerate/non-finite bands surface the same error.
        self.score(metric, self.good)?;
        let rising = self.good > self.bad;
        if rising != metric.higher_is_better() {
            let expected = if metric.higher_is_better() {
                "good > bad"
            } else {
                "bad > good"
            };
            return Err(ConfigError::Validation(format!(
                "{metric} band points the wrong way (bad={}, good={}); expected {expected}",
                self.bad, self.good
            )));
        }
        Ok(())
    }
}

/// Bad/good interpolation bands for every component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScoreBands {
    /// Spread in bps.
    pub spread: Band,
    /// |mark - mid| in bps.
    pub mark_deviation: Band,
    /// |oracle - mid| in bps.
    pub oracle_deviation: Band,
    /// |funding| per hour.
    pub funding: Band,
    /// 24h notional volume.
    pub liquidity: Band,
    /// Sampled book depth (notional).
    pub depth: Band,
}

impl Default for ScoreBands {
    fn default() -> Self {
        Self {
            spread: Band::new(10.0, 1.0),
            mark_deviation: Band::new(20.0, 2.0),
            oracle_deviation: Band::new(30.0, 5.0),
            funding: Band::new(1e-4, 1e-5),
            liquidity: Band::new(1e5, 1e7),
            depth: Band::new(1e3, 1e4),
        }
    }
}

impl ScoreBands {
    pub fn band(&self, component: Component) -> Band {
        match component {
            Component::Spread => self.spread,
            Component::MarkDeviation => self.mark_deviation,
            Component::OracleDeviation => self.oracle_deviation,
            Component::Funding => self.funding,
            Component::Liquidity => self.liquidity,
            Component::Depth => self.depth,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for component in Component::ALL {
            self.band(component).validate(component)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_map_to_zero_and_hundred() {
        for c in Component::ALL {
            let band = ScoreBands::default().band(c);
            assert_eq!(band.score(c, band.bad).unwrap(), 0.0, "{c} at bad");
            assert_eq!(band.score(c, band.good).unwrap(), 100.0, "{c} at good");
        }
    }

    #[test]
    fn clamps_outside_the_band() {
        let spread = Band::new(10.0, 1.0);
        assert_eq!(spread.score(Component::Spread, 0.2).unwrap(), 100.0);
        assert_eq!(spread.score(Component::Spread, 250.0).unwrap(), 0.0);

        let depth = Band::new(1_000.0, 10_000.0);
        assert_eq!(depth.score(Component::Depth, 50_000.0).unwrap(), 100.0);
        assert_eq!(depth.score(Component::Depth, 10.0).unwrap(), 0.0);
    }

    #[test]
    fn monotonic_in_the_metric_direction() {
        let spread = Band::new(10.0, 1.0);
        let mut prev = f64::INFINITY;
        for v in 0..=12 {
            let s = spread.score(Component::Spread, v as f64).unwrap();
            assert!(s <= prev);
            prev = s;
        }

        let liq = Band::new(1e5, 1e7);
        let mut prev = f64::NEG_INFINITY;
        for v in [0.0, 1e5, 5e5, 1e6, 5e6, 1e7, 2e7] {
            let s = liq.score(Component::Liquidity, v).unwrap();
            assert!(s >= prev);
            prev = s;
        }
    }

    #[test]
    fn degenerate_band_is_a_config_error() {
        let err = normalize(Component::Spread, 1.0, 5.0, 5.0).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn reversed_band_fails_validation() {
        let err = Band::new(1e7, 1e5).validate(Component::Liquidity).unwrap_err();
        assert!(err.to_string().contains("wrong way"));
        assert!(ScoreBands::default().validate().is_ok());
    }

    #[test]
    fn non_finite_value_scores_zero() {
        assert_eq!(normalize(Component::Funding, f64::NAN, 1e-4, 1e-5).unwrap(), 0.0);
    }
}
