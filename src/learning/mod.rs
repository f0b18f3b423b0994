//! Outcome evaluation and the learning loop.

mod evaluator;
pub mod performance;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};

pub use evaluator::LearningLoop;
pub use performance::Performance;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Realized result of a proposal once its horizon has elapsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default = "new_id")]
    pub id: String,
    pub proposal_id: String,
    /// Exit price per asset.
    pub exit_prices: BTreeMap<String, f64>,
    /// Realized price path of the position, oldest first.
    #[serde(default)]
    pub price_history: Vec<f64>,
    #[serde(default)]
    pub realized_volatility: Option<f64>,
    #[serde(default = "now")]
    pub observed_at: DateTime<Utc>,
}

impl Outcome {
    pub fn validate(&self) -> Result<()> {
        if self.proposal_id.trim().is_empty() {
            return Err(Error::ValidationError("outcome has no proposal_id".into()));
        }
        if self.exit_prices.is_empty() && self.price_history.len() < 2 {
            return Err(Error::ValidationError(format!(
                "outcome {} carries neither exit prices nor a price history",
                self.id
            )));
        }
        for (asset, p) in &self.exit_prices {
            if !p.is_finite() || *p <= 0.0 {
                return Err(Error::ValidationError(format!(
                    "outcome {} has invalid exit price {} for {}",
                    self.id, p, asset
                )));
            }
        }
        if let Some(v) = self.realized_volatility {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::ValidationError(format!(
                    "outcome {} has invalid realized volatility {}",
                    self.id, v
                )));
            }
        }
        Ok(())
    }
}

/// Grading of the decision that led to an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionQuality {
    pub accuracy: String,
    pub risk_management: String,
    pub timing: String,
    pub position_sizing: String,
    pub overall_quality: String,
    /// In `[0, 1]`.
    pub score: f64,
}

impl DecisionQuality {
    /// Neutral grade used when no assessment could be generated.
    pub fn neutral() -> Self {
        Self {
            accuracy: "Unable to assess".into(),
            risk_management: "Unable to assess".into(),
            timing: "Unable to assess".into(),
            position_sizing: "Unable to assess".into(),
            overall_quality: "Neutral".into(),
            score: 0.7,
        }
    }
}

/// Append-only evaluation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub proposal_id: String,
    pub outcome_id: String,
    pub performance: Performance,
    pub decision_quality: DecisionQuality,
    pub insights: Vec<String>,
    /// Model-state version produced by this evaluation's update.
    pub model_state_version: u64,
    pub created_at: DateTime<Utc>,
}

/// Insight strings used when none could be generated.
pub fn generic_insights() -> Vec<String> {
    [
        "Monitor signal quality trends",
        "Review risk management parameters",
        "Analyze decision rule effectiveness",
        "Update model weights based on performance",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
