use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Component, Reason, ScoreComponents};
use crate::error::ConfigError;

pub const DEFAULT_PASS_LEVEL: f64 = 80.0;

/// Relative importance of each component. Any nonnegative values; they are
/// renormalized to sum to one over the components being aggregated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreWeights(pub BTreeMap<Component, f64>);

impl Default for ScoreWeights {
    fn default() -> Self {
        Self(BTreeMap::from([
            (Component::Spread, 0.25),
            (Component::MarkDeviation, 0.20),
            (Component::OracleDeviation, 0.20),
            (Component::Funding, 0.15),
            (Component::Liquidity, 0.10),
            (Component::Depth, 0.10),
        ]))
    }
}

impl ScoreWeights {
    pub fn equal() -> Self {
        Self(Component::ALL.iter().map(|c| (*c, 1.0)).collect())
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self(self.0.iter().map(|(c, w)| (*c, w * factor)).collect())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (component, w) in &self.0 {
            if !w.is_finite() || *w < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "weight for {component} must be finite and nonnegative, got {w}"
                )));
            }
        }
        if self.0.values().sum::<f64>() <= 0.0 {
            return Err(ConfigError::Validation("score weights sum to zero".into()));
        }
        Ok(())
    }

    /// Weights restricted to `present` components, summing to one.
    pub fn normalized_over(
        &self,
        present: impl Iterator<Item = Component>,
    ) -> Result<BTreeMap<Component, f64>, ConfigError> {
        self.validate()?;
        let picked: BTreeMap<Component, f64> = present
            .map(|c| (c, self.0.get(&c).copied().unwrap_or(0.0)))
            .collect();
        let total: f64 = picked.values().sum();
        if total <= 0.0 {
            return Err(ConfigError::Validation(
                "no positive weight on any scored component".into(),
            ));
        }
        Ok(picked.into_iter().map(|(c, w)| (c, w / total)).collect())
    }
}

/// Per-component level below which a component is reported as degraded.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassLevels(pub BTreeMap<Component, f64>);

impl PassLevels {
    pub fn level(&self, component: Component) -> f64 {
        self.0.get(&component).copied().unwrap_or(DEFAULT_PASS_LEVEL)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (component, level) in &self.0 {
            if !(0.0..=100.0).contains(level) {
                return Err(ConfigError::Validation(format!(
                    "pass level for {component} must be within [0, 100], got {level}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Aggregate {
    pub score: f64,
    /// Degraded components, worst first.
    pub reasons: Vec<Reason>,
}

pub fn aggregate(
    components: &ScoreComponents,
    weights: &ScoreWeights,
    pass_levels: &PassLevels,
) -> Result<Aggregate, ConfigError> {
    let normalized = weights.normalized_over(components.iter().map(|(c, _)| c))?;
    let score: f64 = components
        .iter()
        .map(|(c, s)| normalized.get(&c).copied().unwrap_or(0.0) * s)
        .sum();

    let mut reasons: Vec<Reason> = components
        .iter()
        .filter(|(c, s)| *s < pass_levels.level(*c))
        .map(|(component, score)| Reason {
            component,
            score,
            value: None,
        })
        .collect();
    // Stable sort keeps declaration order among equal scores.
    reasons.sort_by(|a, b| a.score.total_cmp(&b.score));

    Ok(Aggregate {
        score: score.clamp(0.0, 100.0),
        reasons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components(scores: [f64; 6]) -> ScoreComponents {
        ScoreComponents::from_iter(Component::ALL.into_iter().zip(scores))
    }

    #[test]
    fn invariant_under_uniform_weight_scaling() {
        let comps = components([90.0, 85.0, 80.0, 75.0, 70.0, 65.0]);
        let w = ScoreWeights::default();
        let base = aggregate(&comps, &w, &PassLevels::default()).unwrap().score;
        for factor in [0.001, 0.5, 3.0, 1_000.0] {
            let scaled = aggregate(&comps, &w.scaled(factor), &PassLevels::default())
                .unwrap()
                .score;
            assert!((scaled - base).abs() < 1e-9, "factor {factor}: {scaled} vs {base}");
        }
    }

    #[test]
    fn weighted_average_of_components() {
        let comps = components([100.0, 100.0, 100.0, 100.0, 0.0, 0.0]);
        let agg = aggregate(&comps, &ScoreWeights::default(), &PassLevels::default()).unwrap();
        assert!((agg.score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn reasons_are_worst_first_with_declaration_tiebreak() {
        let comps = components([50.0, 95.0, 20.0, 50.0, 85.0, 20.0]);
        let agg = aggregate(&comps, &ScoreWeights::equal(), &PassLevels::default()).unwrap();
        let order: Vec<Component> = agg.reasons.iter().map(|r| r.component).collect();
        assert_eq!(
            order,
            vec![
                Component::OracleDeviation,
                Component::Depth,
                Component::Spread,
                Component::Funding,
            ]
        );
    }

    #[test]
    fn per_component_pass_levels() {
        let comps = components([85.0; 6]);
        let levels = PassLevels(BTreeMap::from([(Component::Depth, 90.0)]));
        let agg = aggregate(&comps, &ScoreWeights::equal(), &levels).unwrap();
        assert_eq!(agg.reasons.len(), 1);
        assert_eq!(agg.reasons[0].component, Component::Depth);
    }

    #[test]
    fn rejects_negative_and_all_zero_weights() {
        let comps = components([50.0; 6]);
        let mut w = ScoreWeights::equal();
        w.0.insert(Component::Funding, -1.0);
        assert!(aggregate(&comps, &w, &PassLevels::default()).is_err());

        let zero = ScoreWeights::equal().scaled(0.0);
        assert!(aggregate(&comps, &zero, &PassLevels::default()).is_err());
    }
}
