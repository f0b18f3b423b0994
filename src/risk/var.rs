//! Value-at-Risk and Conditional VaR estimators.
//!
//! All estimators work on periodic returns and report the lower-tail
//! quantile as a return (negative means loss). A return series must carry
//! at least two finite points; callers screen shorter series out first.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::stats::{excess_kurtosis, lower_tail_index, mean, skewness, sorted, std_dev, z_score};
use crate::utils::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VarEstimates {
    pub historical: f64,
    pub parametric: f64,
    pub monte_carlo: f64,
    pub cornish_fisher: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CvarEstimates {
    pub historical: f64,
    pub monte_carlo: f64,
}

/// Monte Carlo sampling parameters.
#[derive(Debug, Clone, Copy)]
pub struct Simulation {
    pub paths: usize,
    pub chunks: usize,
    /// Fixed seed for reproducible runs; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Simulation {
    /// Same settings, seeded for an independent stream.
    pub fn fork(&self, salt: u64) -> Self {
        Self { seed: self.seed.map(|s| s.wrapping_add(salt)), ..*self }
    }
}

/// c-quantile of the sorted historical returns.
pub fn historical_var(returns: &[f64], confidence: f64) -> f64 {
    let s = sorted(returns);
    if s.is_empty() {
        return 0.0;
    }
    s[lower_tail_index(s.len(), confidence)]
}

/// Gaussian VaR: `mean + z·σ`.
pub fn parametric_var(returns: &[f64], confidence: f64) -> Result<f64> {
    Ok(mean(returns) + z_score(confidence)? * std_dev(returns))
}

/// Cornish–Fisher adjusted VaR:
/// `mean + (z + (z² − 1)·kurtosis/24 + z·skewness/6)·σ`.
pub fn cornish_fisher_var(returns: &[f64], confidence: f64) -> Result<f64> {
    let z = z_score(confidence)?;
    let adj = z + (z * z - 1.0) * excess_kurtosis(returns) / 24.0 + z * skewness(returns) / 6.0;
    Ok(mean(returns) + adj * std_dev(returns))
}

/// Normal draws scaled by the series' mean and σ, produced in parallel
/// chunks and returned sorted ascending.
pub fn monte_carlo_sample(returns: &[f64], sim: &Simulation) -> Vec<f64> {
    let (mu, sigma) = (mean(returns), std_dev(returns));
    let paths = sim.paths.max(1);
    let chunks = sim.chunks.clamp(1, paths);
    let per_chunk = (paths + chunks - 1) / chunks;

    let mut out: Vec<f64> = (0..chunks)
        .into_par_iter()
        .flat_map_iter(|i| {
            let n = per_chunk.min(paths.saturating_sub(i * per_chunk));
            let mut rng = match sim.seed {
                | Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(i as u64)),
                | None => StdRng::from_entropy(),
            };
            box_muller(&mut rng, n).into_iter().map(move |z| mu + sigma * z)
        })
        .collect();
    out.sort_by(f64::total_cmp);
    out
}

/// `n` standard normal variates via the Box–Muller transform.
fn box_muller<R: Rng>(rng: &mut R, n: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(n + 1);
    while out.len() < n {
        // (0, 1] keeps ln finite.
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = rng.gen();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f64::consts::PI * u2;
        out.push(r * theta.cos());
        out.push(r * theta.sin());
    }
    out.truncate(n);
    out
}

pub fn monte_carlo_var(returns: &[f64], confidence: f64, sim: &Simulation) -> f64 {
    let sample = monte_carlo_sample(returns, sim);
    sample[lower_tail_index(sample.len(), confidence)]
}

/// Mean of the returns at or below the historical VaR cutoff.
pub fn historical_cvar(returns: &[f64], confidence: f64) -> f64 {
    tail_mean(&sorted(returns), confidence)
}

/// Same as [`historical_cvar`] over a fresh simulated sample.
pub fn monte_carlo_cvar(returns: &[f64], confidence: f64, sim: &Simulation) -> f64 {
    tail_mean(&monte_carlo_sample(returns, sim), confidence)
}

fn tail_mean(ascending: &[f64], confidence: f64) -> f64 {
    if ascending.is_empty() {
        return 0.0;
    }
    let cutoff = ascending[lower_tail_index(ascending.len(), confidence)];
    let tail: Vec<f64> = ascending.iter().copied().take_while(|r| *r <= cutoff).collect();
    mean(&tail)
}

/// All four VaR estimates and both CVaR estimates for one series.
pub fn estimate(
    returns: &[f64],
    confidence: f64,
    sim: &Simulation,
) -> Result<(VarEstimates, CvarEstimates)> {
    let var = VarEstimates {
        historical: historical_var(returns, confidence),
        parametric: parametric_var(returns, confidence)?,
        monte_carlo: monte_carlo_var(returns, confidence, sim),
        cornish_fisher: cornish_fisher_var(returns, confidence)?,
    };
    let cvar = CvarEstimates {
        historical: historical_cvar(returns, confidence),
        monte_carlo: monte_carlo_cvar(returns, confidence, &sim.fork(0x9E37_79B9)),
    };
    Ok((var, cvar))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn seeded(seed: u64) -> Simulation {
        Simulation { paths: 10_000, chunks: 8, seed: Some(seed) }
    }

    fn gaussian_returns(n: usize, mu: f64, sigma: f64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(7);
        let dist = Normal::new(mu, sigma).unwrap();
        (0..n).map(|_| dist.sample(&mut rng)).collect()
    }

    #[test]
    fn historical_var_picks_lower_tail() {
        let returns: Vec<f64> = (1..=100).map(|i| i as f64 / 1000.0 - 0.05).collect();
        // Sorted index 5 of 100.
        assert!((historical_var(&returns, 0.95) - (6.0 / 1000.0 - 0.05)).abs() < 1e-12);
    }

    #[test]
    fn cvar_never_exceeds_var() {
        let returns = gaussian_returns(250, 0.0005, 0.02);
        for c in [0.9, 0.95, 0.99] {
            assert!(historical_cvar(&returns, c) <= historical_var(&returns, c));
        }
    }

    #[test]
    fn seeded_monte_carlo_is_reproducible() {
        let returns = gaussian_returns(100, 0.0, 0.02);
        let a = monte_carlo_var(&returns, 0.95, &seeded(42));
        let b = monte_carlo_var(&returns, 0.95, &seeded(42));
        assert_eq!(a.to_bits(), b.to_bits());
        assert_eq!(monte_carlo_sample(&returns, &seeded(1)).len(), 10_000);
    }

    #[test]
    fn estimators_agree_on_gaussian_data() {
        let returns = gaussian_returns(2_000, 0.0, 0.02);
        let (var, cvar) = estimate(&returns, 0.95, &seeded(3)).unwrap();
        let expected = -1.645 * 0.02;
        for v in [var.historical, var.parametric, var.monte_carlo, var.cornish_fisher] {
            assert!((v - expected).abs() < 0.004, "{} vs {}", v, expected);
        }
        assert!(cvar.historical <= var.historical);
        assert!(cvar.monte_carlo < 0.0);
    }

    #[test]
    fn cornish_fisher_applies_kurtosis_term() {
        // Symmetric two-point series: no skew, excess kurtosis −2.
        let returns = [-0.01, 0.01, -0.01, 0.01];
        assert_eq!(skewness(&returns), 0.0);
        let z = z_score(0.95).unwrap();
        let k = excess_kurtosis(&returns);
        let expected = mean(&returns) + (z + (z * z - 1.0) * k / 24.0) * std_dev(&returns);
        assert!((cornish_fisher_var(&returns, 0.95).unwrap() - expected).abs() < 1e-12);
    }
}
