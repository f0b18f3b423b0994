//! Basket liquidity estimate.

use crate::config::RiskConfig;

/// Starts at 1.0; each major asset multiplies by the major factor, each
/// other asset by the minor factor, and an oversized position by the
/// large-position factor. Never negative.
pub fn liquidity_score(assets: &[String], size_pct: f64, cfg: &RiskConfig) -> f64 {
    let mut score = 1.0;
    for asset in assets {
        let major = cfg.major_assets.iter().any(|m| m.eq_ignore_ascii_case(asset));
        score *= if major { cfg.major_asset_factor } else { cfg.minor_asset_factor };
    }
    if size_pct > cfg.large_position_threshold {
        score *= cfg.large_position_factor;
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn assets(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn factors_compound() {
        let cfg = Config::default().risk;
        assert!((liquidity_score(&assets(&["BTC"]), 0.05, &cfg) - 0.9).abs() < 1e-12);
        assert!((liquidity_score(&assets(&["btc", "PEPE"]), 0.05, &cfg) - 0.63).abs() < 1e-12);
        assert!((liquidity_score(&assets(&["BTC"]), 0.15, &cfg) - 0.72).abs() < 1e-12);
    }

    #[test]
    fn never_negative() {
        let mut cfg = Config::default().risk;
        cfg.minor_asset_factor = -0.5;
        assert_eq!(liquidity_score(&assets(&["X"]), 0.05, &cfg), 0.0);
        cfg.minor_asset_factor = 0.0;
        assert_eq!(liquidity_score(&assets(&["X", "Y"]), 0.5, &cfg), 0.0);
    }
}
