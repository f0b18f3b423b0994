//! Rule-based decision engine.

mod engine;
pub mod rules;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use engine::{decide, decision_id};
pub use rules::{default_rules, Comparison, Condition, DecisionRule, Field, RuleAction};

/// Ambient facts a rule may read, plus the evaluation clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    /// Timestamp stamped on the resulting decision.
    pub as_of: DateTime<Utc>,
    #[serde(default)]
    pub portfolio_concentration: Option<f64>,
    #[serde(default)]
    pub extra: BTreeMap<String, f64>,
}

impl DecisionContext {
    pub fn at(as_of: DateTime<Utc>) -> Self {
        Self { as_of, portfolio_concentration: None, extra: BTreeMap::new() }
    }

    pub fn with_concentration(mut self, c: f64) -> Self {
        self.portfolio_concentration = Some(c);
        self
    }
}

/// Resolved action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Approve,
    Reject,
    ReduceSize,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            | Action::Approve => "approve",
            | Action::Reject => "reject",
            | Action::ReduceSize => "reduce_size",
        }
    }
}

/// One rule's evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub rule_id: String,
    pub rule_name: String,
    pub matched: bool,
    /// The rule's action, or `skip` if its predicate failed.
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub proposal_id: String,
    pub action: Action,
    pub confidence: f64,
    pub size_adjustment: f64,
    pub rationale: String,
    pub trace: Vec<TraceEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Decision {
    /// Did `rule_id` match when this decision was made?
    pub fn rule_matched(&self, rule_id: &str) -> Option<bool> {
        self.trace
            .iter()
            .find(|t| t.rule_id == rule_id && t.error.is_none())
            .map(|t| t.matched)
    }
}
