//! Benchmarks for risk and scoring hot paths

#![feature(test)]

#[cfg(test)]
mod tests {
    extern crate test;
    use chrono::Utc;
    use test::Bencher;
    use tradeloop::config::Config;
    use tradeloop::market_data::{AssetSnapshot, MarketContext};
    use tradeloop::risk::{var, RiskEngine, Simulation};
    use tradeloop::scoring::ScoringEngine;
    use tradeloop::signal::{RawScores, Signal};
    use tradeloop::state::ModelState;

    // Deterministic return series with a mild cycle.
    fn returns(n: usize, phase: f64) -> Vec<f64> {
        (0..n).map(|i| ((i as f64 * 0.37 + phase).sin() * 0.02)).collect()
    }

    #[bench]
    fn bench_monte_carlo_var(b: &mut Bencher) {
        let r = returns(500, 0.0);
        let sim = Simulation { paths: 10_000, chunks: 8, seed: Some(1) };
        b.iter(|| var::monte_carlo_var(&r, 0.95, &sim));
    }

    #[bench]
    fn bench_historical_var(b: &mut Bencher) {
        let r = returns(2_000, 0.5);
        b.iter(|| var::historical_var(&r, 0.99));
    }

    #[bench]
    fn bench_assess_three_assets(b: &mut Bencher) {
        let mut cfg = Config::default().risk;
        cfg.monte_carlo_seed = Some(3);
        let engine = RiskEngine::new(cfg);
        let market = MarketContext::default()
            .with_asset("BTC", AssetSnapshot::new(60_000.0, returns(250, 0.0)))
            .with_asset("ETH", AssetSnapshot::new(3_000.0, returns(250, 1.0)))
            .with_asset("SOL", AssetSnapshot::new(150.0, returns(250, 2.0)));
        let assets = vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()];
        let state = ModelState::new("default");
        b.iter(|| engine.assess(&assets, 0.05, 7, &market, &state).unwrap());
    }

    #[bench]
    fn bench_score_batch(b: &mut Bencher) {
        let engine = ScoringEngine::heuristic(Config::default().scoring);
        let state = ModelState::new("default");
        let signals: Vec<Signal> = (0..100)
            .map(|i| {
                Signal::new("BTC", format!("headline {}", i), "wire", Utc::now()).with_raw(RawScores {
                    sentiment: Some(0.3),
                    relevance: Some(0.7),
                    novelty: Some(0.5),
                    credibility: Some(0.6),
                })
            })
            .collect();
        let rt = tokio::runtime::Runtime::new().unwrap();
        b.iter(|| rt.block_on(engine.score_batch(&signals, &state)));
    }
}
