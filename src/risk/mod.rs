//! Quantitative risk engine.
//!
//! `assess` builds an equal-weighted basket return series from the assets
//! that have enough history, estimates VaR four ways and CVaR two ways on
//! it, and rolls VaR, CVaR, volatility, correlation and liquidity into one
//! overall score. Each raw component is scaled onto `[0, 1]` by a risk
//! parameter from [`ModelState`]; the learning loop tunes those scales.

pub mod liquidity;
pub mod position_sizer;
pub mod stats;
pub mod var;

use std::collections::BTreeMap;

use metrics::increment_counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::RiskConfig;
use crate::market_data::{CorrelationMatrix, MarketContext};
use crate::metrics::RISK_ASSESSMENTS;
use crate::state::ModelState;
use crate::utils::clamp01;
use crate::utils::error::{Error, Result};

pub use liquidity::liquidity_score;
pub use position_sizer::{kelly_fraction, KellySizer};
pub use var::{CvarEstimates, Simulation, VarEstimates};

/// Component weights for the overall score.
pub const COMPONENT_WEIGHTS: [(&str, f64); 5] = [
    ("var", 0.3),
    ("cvar", 0.2),
    ("volatility", 0.2),
    ("correlation", 0.2),
    ("liquidity", 0.1),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_risk: f64,
    pub var: VarEstimates,
    pub cvar: CvarEstimates,
    pub volatility: f64,
    pub correlation: CorrelationMatrix,
    pub liquidity: f64,
    /// Scaled component scalars that entered the overall score.
    pub components: BTreeMap<String, f64>,
    pub recommendations: Vec<String>,
    pub insufficient_data: bool,
    /// Assets with fewer than two usable return points.
    #[serde(default)]
    pub insufficient_assets: Vec<String>,
    pub confidence_level: f64,
}

impl RiskAssessment {
    pub fn max_pairwise_correlation(&self) -> Option<f64> {
        self.correlation.max_off_diagonal()
    }
}

/// Overall risk from whichever components are available, weights renormalised.
pub fn combine(components: &BTreeMap<String, f64>) -> f64 {
    let (sum, weight) = COMPONENT_WEIGHTS
        .iter()
        .filter_map(|(name, w)| components.get(*name).map(|v| (clamp01(*v) * w, *w)))
        .fold((0.0, 0.0), |(s, tw), (x, w)| (s + x, tw + w));
    if weight > 0.0 {
        clamp01(sum / weight)
    } else {
        0.0
    }
}

/// Ordered recommendations for an overall risk level.
pub fn recommendations(overall: f64) -> Vec<String> {
    let lines: &[&str] = if overall > 0.8 {
        &["High risk: reduce position size", "High risk: tighten stop-loss levels"]
    } else if overall >= 0.6 {
        &["Moderate risk: diversify across uncorrelated assets"]
    } else if overall >= 0.4 {
        &["Standard risk: follow standard procedure"]
    } else {
        &["Low risk: proceed as proposed"]
    };
    lines.iter().map(|s| s.to_string()).collect()
}

pub struct RiskEngine {
    cfg: RiskConfig,
}

impl RiskEngine {
    pub fn new(cfg: RiskConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.cfg
    }

    fn simulation(&self) -> Simulation {
        Simulation {
            paths: self.cfg.monte_carlo_paths,
            chunks: self.cfg.parallel_chunks,
            seed: self.cfg.monte_carlo_seed,
        }
    }

    /// Assess a basket. `horizon_days` is recorded but returns are not
    /// horizon-scaled; the series' own periodicity is used as given.
    #[instrument(skip(self, market, state), fields(assets = assets.len()))]
    pub fn assess(
        &self,
        assets: &[String],
        size_pct: f64,
        horizon_days: u32,
        market: &MarketContext,
        state: &ModelState,
    ) -> Result<RiskAssessment> {
        if assets.is_empty() {
            return Err(Error::ValidationError("risk assessment needs at least one asset".into()));
        }
        if !size_pct.is_finite() || !(0.0..=1.0).contains(&size_pct) {
            return Err(Error::ValidationError(format!("size_pct {} outside [0, 1]", size_pct)));
        }
        let c = self.cfg.confidence_level;
        stats::z_score(c)?;

        // Usable history per asset.
        let mut series: Vec<(&String, Vec<f64>)> = Vec::new();
        let mut insufficient = Vec::new();
        for a in assets {
            let returns: Vec<f64> = market
                .asset(a)
                .map(|s| s.returns.iter().copied().filter(|r| r.is_finite()).collect())
                .unwrap_or_default();
            if returns.len() < 2 {
                insufficient.push(a.clone());
            } else {
                series.push((a, returns));
            }
        }
        if !insufficient.is_empty() {
            warn!(?insufficient, "insufficient return history");
        }

        let mut components = BTreeMap::new();

        let basket = basket_returns(&series);
        let (var, cvar) = if basket.len() >= 2 {
            let (var, cvar) = var::estimate(&basket, c, &self.simulation())?;
            components.insert(
                "var".to_string(),
                clamp01(state.risk_parameter("var_scale") * var.historical.abs()),
            );
            components.insert(
                "cvar".to_string(),
                clamp01(state.risk_parameter("cvar_scale") * cvar.historical.abs()),
            );
            (var, cvar)
        } else {
            (VarEstimates::default(), CvarEstimates::default())
        };

        let vols: Vec<f64> = assets
            .iter()
            .filter_map(|a| {
                let snap = market.asset(a);
                snap.and_then(|s| s.volatility).filter(|v| v.is_finite() && *v >= 0.0).or_else(|| {
                    series.iter().find(|(name, _)| *name == a).map(|(_, r)| stats::std_dev(r))
                })
            })
            .collect();
        let volatility = crate::utils::mean(&vols).unwrap_or(0.0);
        if !vols.is_empty() {
            components.insert(
                "volatility".to_string(),
                clamp01(state.risk_parameter("volatility_scale") * volatility),
            );
        }

        let correlation = self.correlation(assets, &series, market);
        let usable_pairs = series.len() >= 2
            || (assets.len() >= 2 && market.correlation.as_ref().is_some_and(|m| m.covers(assets)));
        if usable_pairs {
            if let Some(mean_abs) = correlation.mean_abs_off_diagonal() {
                components.insert(
                    "correlation".to_string(),
                    clamp01(state.risk_parameter("correlation_scale") * mean_abs),
                );
            }
        }

        let liquidity = liquidity_score(assets, size_pct, &self.cfg);
        components.insert(
            "liquidity".to_string(),
            clamp01(state.risk_parameter("liquidity_scale") * (1.0 - liquidity)),
        );

        let overall_risk = combine(&components);
        let mut recs = recommendations(overall_risk);
        if !insufficient.is_empty() {
            recs.push(format!(
                "Insufficient return history for {}; VaR/CVaR/volatility exclude them",
                insufficient.join(", ")
            ));
        }

        increment_counter!(RISK_ASSESSMENTS);
        debug!(overall_risk, horizon_days, "risk assessed");

        Ok(RiskAssessment {
            overall_risk,
            var,
            cvar,
            volatility,
            correlation,
            liquidity,
            components,
            recommendations: recs,
            insufficient_data: !insufficient.is_empty(),
            insufficient_assets: insufficient,
            confidence_level: c,
        })
    }

    /// Supplied matrix when it covers the basket, otherwise Pearson over the
    /// available series (0 off-diagonal for assets without history).
    fn correlation(
        &self,
        assets: &[String],
        series: &[(&String, Vec<f64>)],
        market: &MarketContext,
    ) -> CorrelationMatrix {
        if let Some(m) = market.correlation.as_ref().and_then(|m| m.subset(assets)) {
            return m;
        }
        let lookup = |a: &String| series.iter().find(|(n, _)| *n == a).map(|(_, r)| r.as_slice());
        let values = assets
            .iter()
            .map(|a| {
                assets
                    .iter()
                    .map(|b| {
                        if a == b {
                            1.0
                        } else {
                            match (lookup(a), lookup(b)) {
                                | (Some(x), Some(y)) => stats::pearson(x, y),
                                | _ => 0.0,
                            }
                        }
                    })
                    .collect()
            })
            .collect();
        CorrelationMatrix { assets: assets.to_vec(), values }
    }
}

/// Equal-weighted basket over the common (most recent) window.
fn basket_returns(series: &[(&String, Vec<f64>)]) -> Vec<f64> {
    let Some(n) = series.iter().map(|(_, r)| r.len()).min() else {
        return Vec::new();
    };
    let k = series.len() as f64;
    (0..n)
        .map(|t| series.iter().map(|(_, r)| r[r.len() - n + t]).sum::<f64>() / k)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::market_data::AssetSnapshot;

    fn engine() -> RiskEngine {
        let mut cfg = Config::default().risk;
        cfg.monte_carlo_seed = Some(11);
        cfg.monte_carlo_paths = 2_000;
        RiskEngine::new(cfg)
    }

    fn series(seed: u64, n: usize, scale: f64) -> Vec<f64> {
        // Deterministic wiggle, no RNG needed.
        (0..n).map(|i| (((i as u64 * 7919 + seed) % 97) as f64 / 97.0 - 0.5) * scale).collect()
    }

    fn names(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn combine_renormalises_over_available_components() {
        let mut c = BTreeMap::new();
        c.insert("var".to_string(), 1.0);
        c.insert("liquidity".to_string(), 0.0);
        assert!((combine(&c) - 0.75).abs() < 1e-12);
        assert_eq!(combine(&BTreeMap::new()), 0.0);
    }

    #[test]
    fn recommendation_bands() {
        assert!(recommendations(0.85)[0].starts_with("High risk"));
        assert!(recommendations(0.7)[0].starts_with("Moderate"));
        assert!(recommendations(0.5)[0].starts_with("Standard"));
        assert!(recommendations(0.1)[0].starts_with("Low risk"));
    }

    #[test]
    fn assess_two_asset_basket() {
        let market = MarketContext::default()
            .with_asset("BTC", AssetSnapshot::new(60_000.0, series(1, 120, 0.06)))
            .with_asset("ETH", AssetSnapshot::new(3_000.0, series(5, 120, 0.08)));
        let a = engine()
            .assess(&names(&["BTC", "ETH"]), 0.05, 30, &market, &ModelState::new("default"))
            .unwrap();
        assert!((0.0..=1.0).contains(&a.overall_risk));
        assert!(!a.insufficient_data);
        assert!(a.cvar.historical <= a.var.historical);
        assert_eq!(a.correlation.values[0][0], 1.0);
        assert_eq!(a.components.len(), 5);
        assert!((a.liquidity - 0.81).abs() < 1e-12);
    }

    #[test]
    fn short_history_is_flagged_and_excluded() {
        let market = MarketContext::default()
            .with_asset("BTC", AssetSnapshot::new(60_000.0, vec![0.01]))
            .with_asset("NEWCOIN", AssetSnapshot::new(1.0, vec![]));
        let a = engine()
            .assess(&names(&["BTC", "NEWCOIN"]), 0.05, 30, &market, &ModelState::new("default"))
            .unwrap();
        assert!(a.insufficient_data);
        assert_eq!(a.insufficient_assets, names(&["BTC", "NEWCOIN"]));
        assert_eq!(a.var, VarEstimates::default());
        assert_eq!(a.volatility, 0.0);
        assert!(!a.components.contains_key("var"));
        assert!(!a.components.contains_key("correlation"));
        // Only liquidity remains: 1 − 0.9·0.7 = 0.37.
        assert!((a.overall_risk - 0.37).abs() < 1e-12);
    }

    #[test]
    fn zero_liquidity_is_not_negative() {
        let mut cfg = Config::default().risk;
        cfg.minor_asset_factor = 0.0;
        let a = RiskEngine::new(cfg)
            .assess(
                &names(&["X"]),
                0.5,
                7,
                &MarketContext::default(),
                &ModelState::new("default"),
            )
            .unwrap();
        assert_eq!(a.liquidity, 0.0);
        assert!((0.0..=1.0).contains(&a.overall_risk));
    }

    #[test]
    fn supplied_correlation_matrix_is_used() {
        let market = MarketContext {
            assets: BTreeMap::new(),
            correlation: Some(CorrelationMatrix {
                assets: names(&["A", "B"]),
                values: vec![vec![1.0, 0.9], vec![0.9, 1.0]],
            }),
        };
        let a = engine()
            .assess(&names(&["A", "B"]), 0.05, 30, &market, &ModelState::new("default"))
            .unwrap();
        assert_eq!(a.max_pairwise_correlation(), Some(0.9));
        assert_eq!(a.components.get("correlation"), Some(&0.9));
    }

    #[test]
    fn rejects_bad_input() {
        let m = MarketContext::default();
        let s = ModelState::new("default");
        assert!(engine().assess(&[], 0.05, 30, &m, &s).is_err());
        assert!(engine().assess(&names(&["A"]), 1.5, 30, &m, &s).is_err());
    }
}
