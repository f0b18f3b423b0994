//! Investment proposals.

mod synthesizer;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};

pub use synthesizer::{ProposalSynthesizer, SignalSummary, Synthesis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    #[default]
    Proposed,
    Decided,
}

/// A signal that contributed to a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRef {
    pub signal_id: String,
    pub source: String,
    pub asset: String,
    pub fused_score: f64,
    #[serde(default)]
    pub price: Option<f64>,
}

fn default_horizon() -> u32 {
    30
}

fn default_liquidity() -> f64 {
    1.0
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// A sized, risk-bounded candidate action. Read-only after synthesis apart
/// from the status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    #[serde(default)]
    pub thesis: String,
    #[serde(default)]
    pub explanation: String,
    pub assets: Vec<String>,
    #[serde(default)]
    pub timeframe: String,
    pub size_pct: f64,
    #[serde(default = "default_horizon")]
    pub horizon_days: u32,
    #[serde(default)]
    pub entry_prices: BTreeMap<String, f64>,
    /// Fractional distance below entry, as a positive magnitude.
    #[serde(default)]
    pub stop_loss: f64,
    /// Fractional distance above entry, as a positive magnitude.
    #[serde(default)]
    pub take_profit: f64,
    #[serde(default)]
    pub invalidation_conditions: Vec<String>,
    pub risk_score: f64,
    #[serde(default = "default_liquidity")]
    pub liquidity_score: f64,
    #[serde(default)]
    pub expected_return: f64,
    #[serde(default)]
    pub sharpe_ratio: f64,
    #[serde(default)]
    pub signals: Vec<SignalRef>,
    #[serde(default)]
    pub status: ProposalStatus,
    #[serde(default = "now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "now")]
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    /// Bare proposal with neutral numbers; callers fill in the rest.
    pub fn skeleton(id: impl Into<String>, assets: Vec<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            thesis: String::new(),
            explanation: String::new(),
            assets,
            timeframe: String::new(),
            size_pct: 0.0,
            horizon_days: default_horizon(),
            entry_prices: BTreeMap::new(),
            stop_loss: 0.0,
            take_profit: 0.0,
            invalidation_conditions: Vec::new(),
            risk_score: 0.0,
            liquidity_score: default_liquidity(),
            expected_return: 0.0,
            sharpe_ratio: 0.0,
            signals: Vec::new(),
            status: ProposalStatus::Proposed,
            created_at: at,
            updated_at: at,
        }
    }

    /// Boundary checks for proposals supplied by callers.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::ValidationError("proposal id is empty".into()));
        }
        if self.assets.is_empty() {
            return Err(Error::ValidationError(format!("proposal {} has no assets", self.id)));
        }
        for (name, v) in [
            ("size_pct", self.size_pct),
            ("risk_score", self.risk_score),
            ("liquidity_score", self.liquidity_score),
        ] {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(Error::ValidationError(format!(
                    "proposal {} has {} {} outside [0, 1]",
                    self.id, name, v
                )));
            }
        }
        Ok(())
    }

    /// Transition `proposed → decided`. Deciding twice is an error.
    pub fn mark_decided(&mut self, at: DateTime<Utc>) -> Result<()> {
        match self.status {
            | ProposalStatus::Proposed => {
                self.status = ProposalStatus::Decided;
                self.updated_at = at;
                Ok(())
            }
            | ProposalStatus::Decided => Err(Error::ValidationError(format!(
                "proposal {} is already decided",
                self.id
            ))),
        }
    }
}
