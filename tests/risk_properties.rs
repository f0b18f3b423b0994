//! Properties of the VaR family, the risk combination and sizing.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, StudentT};
use rstest::rstest;
use tradeloop::config::Config;
use tradeloop::market_data::{AssetSnapshot, MarketContext};
use tradeloop::risk::{liquidity_score, var, KellySizer, RiskEngine, Simulation};
use tradeloop::state::ModelState;

fn normal_returns(seed: u64, n: usize, sd: f64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let d = Normal::new(0.0005, sd).unwrap();
    (0..n).map(|_| d.sample(&mut rng)).collect()
}

fn fat_tailed_returns(seed: u64, n: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let d = StudentT::new(3.0).unwrap();
    (0..n).map(|_| d.sample(&mut rng) * 0.01).collect()
}

#[rstest]
#[case(0.90)]
#[case(0.95)]
#[case(0.99)]
fn historical_cvar_is_never_above_var(#[case] c: f64) {
    for seed in 0..20 {
        let r = fat_tailed_returns(seed, 250);
        assert!(var::historical_cvar(&r, c) <= var::historical_var(&r, c));
    }
}

#[test]
fn monte_carlo_is_reproducible_with_a_seed() {
    let r = normal_returns(1, 200, 0.02);
    let sim = Simulation { paths: 5_000, chunks: 4, seed: Some(99) };
    assert_eq!(var::monte_carlo_var(&r, 0.95, &sim), var::monte_carlo_var(&r, 0.95, &sim));
    assert_eq!(var::monte_carlo_cvar(&r, 0.95, &sim), var::monte_carlo_cvar(&r, 0.95, &sim));
}

#[test]
fn overall_risk_stays_in_unit_interval() {
    let mut cfg = Config::default().risk;
    cfg.monte_carlo_seed = Some(7);
    cfg.monte_carlo_paths = 1_000;
    let engine = RiskEngine::new(cfg);

    let mut aggressive = ModelState::new("default");
    for v in aggressive.risk_parameters.values_mut() {
        *v *= 50.0;
    }

    for (seed, sd) in [(1, 0.001), (2, 0.02), (3, 0.2), (4, 1.5)] {
        let market = MarketContext::default()
            .with_asset("BTC", AssetSnapshot::new(100.0, normal_returns(seed, 120, sd)))
            .with_asset("DOGE", AssetSnapshot::new(0.1, normal_returns(seed + 100, 60, sd * 2.0)));
        let assets = vec!["BTC".to_string(), "DOGE".to_string()];
        for state in [ModelState::new("default"), aggressive.clone()] {
            let a = engine.assess(&assets, 0.2, 14, &market, &state).unwrap();
            assert!((0.0..=1.0).contains(&a.overall_risk), "{}", a.overall_risk);
            assert!(a.components.values().all(|c| (0.0..=1.0).contains(c)));
        }
    }
}

#[test]
fn assets_without_history_are_flagged() {
    let engine = RiskEngine::new(Config::default().risk);
    let market = MarketContext::default()
        .with_asset("BTC", AssetSnapshot::new(100.0, normal_returns(5, 100, 0.02)))
        .with_asset("NEW", AssetSnapshot::new(1.0, vec![0.01]));
    let a = engine
        .assess(&["BTC".to_string(), "NEW".to_string()], 0.05, 7, &market, &ModelState::new("default"))
        .unwrap();
    assert!(a.insufficient_data);
    assert_eq!(a.insufficient_assets, vec!["NEW".to_string()]);
}

#[test]
fn liquidity_never_negative() {
    let cfg = Config::default().risk;
    let many: Vec<String> = (0..200).map(|i| format!("TOKEN{}", i)).collect();
    for size in [0.0, 0.05, 0.5, 1.0] {
        let l = liquidity_score(&many, size, &cfg);
        assert!((0.0..=1.0).contains(&l));
    }
}

#[rstest]
#[case(0.6, 0.15, 0.08)]
#[case(0.6, 0.0, 0.08)]
#[case(0.1, 0.02, 0.5)]
#[case(0.99, 5.0, 0.0)]
fn kelly_size_is_banded(#[case] p: f64, #[case] win: f64, #[case] loss: f64) {
    let s = KellySizer::new(p, win, loss, 0.01, 0.10).size_pct();
    assert!((0.01..=0.10).contains(&s));
}
