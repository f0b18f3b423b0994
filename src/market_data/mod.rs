//! Market context supplied with each pipeline run.
//!
//! How the numbers are fetched is outside this crate; callers hand in a
//! snapshot per asset and, optionally, a precomputed correlation matrix.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-asset market snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub price: f64,
    /// Historical periodic returns, oldest first.
    #[serde(default)]
    pub returns: Vec<f64>,
    #[serde(default)]
    pub volatility: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
}

impl AssetSnapshot {
    pub fn new(price: f64, returns: Vec<f64>) -> Self {
        Self { price, returns, ..Default::default() }
    }
}

/// Square matrix indexed by `assets`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub assets: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    /// Identity over `assets`.
    pub fn identity(assets: Vec<String>) -> Self {
        let n = assets.len();
        let values = (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        Self { assets, values }
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.assets.iter().position(|x| x == a)?;
        let j = self.assets.iter().position(|x| x == b)?;
        self.values.get(i).and_then(|row| row.get(j)).copied()
    }

    /// Does this matrix carry a well-formed entry for every pair of `assets`?
    pub fn covers(&self, assets: &[String]) -> bool {
        self.values.len() == self.assets.len()
            && self.values.iter().all(|r| r.len() == self.assets.len())
            && assets.iter().all(|a| self.assets.contains(a))
    }

    /// Restrict to `assets`, in that order.
    pub fn subset(&self, assets: &[String]) -> Option<Self> {
        let mut values = Vec::with_capacity(assets.len());
        for a in assets {
            let mut row = Vec::with_capacity(assets.len());
            for b in assets {
                row.push(self.get(a, b)?);
            }
            values.push(row);
        }
        Some(Self { assets: assets.to_vec(), values })
    }

    fn off_diagonal(&self) -> impl Iterator<Item = f64> + '_ {
        self.values
            .iter()
            .enumerate()
            .flat_map(|(i, row)| row.iter().enumerate().filter(move |(j, _)| *j != i))
            .map(|(_, v)| *v)
    }

    /// Mean absolute pairwise correlation; `None` with fewer than two assets.
    pub fn mean_abs_off_diagonal(&self) -> Option<f64> {
        let vals: Vec<f64> = self.off_diagonal().map(f64::abs).collect();
        crate::utils::mean(&vals)
    }

    pub fn max_off_diagonal(&self) -> Option<f64> {
        self.off_diagonal().reduce(f64::max)
    }
}

/// Everything the risk engine knows about the market for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    #[serde(default)]
    pub assets: BTreeMap<String, AssetSnapshot>,
    #[serde(default)]
    pub correlation: Option<CorrelationMatrix>,
}

impl MarketContext {
    pub fn with_asset(mut self, symbol: &str, snapshot: AssetSnapshot) -> Self {
        self.assets.insert(symbol.to_string(), snapshot);
        self
    }

    pub fn asset(&self, symbol: &str) -> Option<&AssetSnapshot> {
        self.assets.get(symbol)
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.assets.get(symbol).map(|a| a.price).filter(|p| p.is_finite() && *p > 0.0)
    }
}
