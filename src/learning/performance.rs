//! Realized performance of a single trade.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Outcome;
use crate::config::LearningConfig;
use crate::proposal::Proposal;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub return_pct: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    /// 1 for a profitable trade, else 0.
    pub win_rate: f64,
    pub overall_score: f64,
}

/// Mean `(exit − entry) / entry` over assets priced on both sides. Falls back
/// to the first and last points of the price history, then to 0.
pub fn return_pct(
    entry: &BTreeMap<String, f64>,
    exit: &BTreeMap<String, f64>,
    history: &[f64],
) -> f64 {
    let per_asset: Vec<f64> = entry
        .iter()
        .filter(|(_, e)| e.is_finite() && **e > 0.0)
        .filter_map(|(a, e)| exit.get(a).map(|x| (x - e) / e))
        .collect();
    if let Some(m) = crate::utils::mean(&per_asset) {
        return m;
    }
    match (history.first(), history.last()) {
        | (Some(first), Some(last)) if history.len() >= 2 && *first > 0.0 => (last - first) / first,
        | _ => 0.0,
    }
}

/// Largest peak-to-trough fractional decline.
pub fn max_drawdown(history: &[f64]) -> f64 {
    let mut peak = match history.first() {
        | Some(p) => *p,
        | None => return 0.0,
    };
    let mut worst: f64 = 0.0;
    for &price in history {
        if price > peak {
            peak = price;
        }
        if peak > 0.0 {
            worst = worst.max((peak - price) / peak);
        }
    }
    worst
}

/// Annualised Sharpe; 0 when volatility is 0.
pub fn sharpe_ratio(return_pct: f64, volatility: f64, cfg: &LearningConfig) -> f64 {
    let annual_vol = volatility * cfg.days_in_year.sqrt();
    if annual_vol <= 0.0 || !annual_vol.is_finite() {
        return 0.0;
    }
    (return_pct * cfg.days_in_year - cfg.risk_free_rate) / annual_vol
}

/// `0.4·return + 0.3·sharpe + 0.2·(1 − drawdown) + 0.1·win_rate`.
pub fn overall_score(return_pct: f64, sharpe: f64, drawdown: f64, win_rate: f64) -> f64 {
    0.4 * return_pct + 0.3 * sharpe + 0.2 * (1.0 - drawdown) + 0.1 * win_rate
}

/// Realized volatility from the outcome, else the configured default.
pub fn realized_volatility(outcome: &Outcome, cfg: &LearningConfig) -> f64 {
    outcome
        .realized_volatility
        .filter(|v| *v > 0.0)
        .unwrap_or(cfg.default_realized_volatility)
}

pub fn compute(proposal: &Proposal, outcome: &Outcome, cfg: &LearningConfig) -> Performance {
    let ret = return_pct(&proposal.entry_prices, &outcome.exit_prices, &outcome.price_history);
    let sharpe = sharpe_ratio(ret, realized_volatility(outcome, cfg), cfg);
    let dd = max_drawdown(&outcome.price_history);
    let win = if ret > 0.0 { 1.0 } else { 0.0 };
    Performance {
        return_pct: ret,
        sharpe_ratio: sharpe,
        max_drawdown: dd,
        win_rate: win,
        overall_score: overall_score(ret, sharpe, dd, win),
    }
}
