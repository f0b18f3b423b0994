//! Decision rules as data.
//!
//! A rule's condition is a small predicate tree over named proposal and
//! context fields, evaluated by [`Condition::evaluate`]. Missing context
//! fields are errors, so a rule that cannot be evaluated is visible in the
//! decision trace instead of silently passing or failing.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::DecisionContext;
use crate::proposal::Proposal;
use crate::utils::error::{Error, Result};

/// What a matched rule asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Approve,
    Reject,
    ReduceSize,
    Diversify,
    Skip,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            | RuleAction::Approve => "approve",
            | RuleAction::Reject => "reject",
            | RuleAction::ReduceSize => "reduce_size",
            | RuleAction::Diversify => "diversify",
            | RuleAction::Skip => "skip",
        };
        f.write_str(s)
    }
}

/// A numeric field a predicate can read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    RiskScore,
    SizePct,
    LiquidityScore,
    ExpectedReturn,
    SharpeRatio,
    HorizonDays,
    AssetCount,
    PortfolioConcentration,
    /// A caller-supplied value from [`DecisionContext::extra`].
    Context(String),
}

impl Field {
    /// Read the field. Context values the caller did not supply resolve to
    /// `None`; a non-finite value is an error.
    pub fn resolve(&self, proposal: &Proposal, ctx: &DecisionContext) -> Result<Option<f64>> {
        let value = match self {
            | Field::RiskScore => proposal.risk_score,
            | Field::SizePct => proposal.size_pct,
            | Field::LiquidityScore => proposal.liquidity_score,
            | Field::ExpectedReturn => proposal.expected_return,
            | Field::SharpeRatio => proposal.sharpe_ratio,
            | Field::HorizonDays => proposal.horizon_days as f64,
            | Field::AssetCount => proposal.assets.len() as f64,
            | Field::PortfolioConcentration => match ctx.portfolio_concentration {
                | Some(v) => v,
                | None => return Ok(None),
            },
            | Field::Context(name) => match ctx.extra.get(name) {
                | Some(v) => *v,
                | None => return Ok(None),
            },
        };
        if !value.is_finite() {
            return Err(Error::RuleError(format!("field {} is not finite", self)));
        }
        Ok(Some(value))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            | Field::RiskScore => f.write_str("risk_score"),
            | Field::SizePct => f.write_str("size_pct"),
            | Field::LiquidityScore => f.write_str("liquidity_score"),
            | Field::ExpectedReturn => f.write_str("expected_return"),
            | Field::SharpeRatio => f.write_str("sharpe_ratio"),
            | Field::HorizonDays => f.write_str("horizon_days"),
            | Field::AssetCount => f.write_str("asset_count"),
            | Field::PortfolioConcentration => f.write_str("portfolio_concentration"),
            | Field::Context(name) => write!(f, "context.{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            | Comparison::Gt => lhs > rhs,
            | Comparison::Gte => lhs >= rhs,
            | Comparison::Lt => lhs < rhs,
            | Comparison::Lte => lhs <= rhs,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            | Comparison::Gt => ">",
            | Comparison::Gte => ">=",
            | Comparison::Lt => "<",
            | Comparison::Lte => "<=",
        }
    }
}

/// Predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Compare { field: Field, op: Comparison, value: f64 },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
    Always,
}

impl Condition {
    pub fn compare(field: Field, op: Comparison, value: f64) -> Self {
        Condition::Compare { field, op, value }
    }

    /// Evaluate against a proposal and context. A comparison against an
    /// absent context value is false. `All`/`Any` evaluate every child so an
    /// unreadable field always surfaces as an error.
    pub fn evaluate(&self, proposal: &Proposal, ctx: &DecisionContext) -> Result<bool> {
        match self {
            | Condition::Compare { field, op, value } => {
                Ok(field.resolve(proposal, ctx)?.map_or(false, |v| op.apply(v, *value)))
            }
            | Condition::All { conditions } => {
                let mut all = true;
                for c in conditions {
                    all &= c.evaluate(proposal, ctx)?;
                }
                Ok(all)
            }
            | Condition::Any { conditions } => {
                let mut any = false;
                for c in conditions {
                    any |= c.evaluate(proposal, ctx)?;
                }
                Ok(any)
            }
            | Condition::Not { condition } => Ok(!condition.evaluate(proposal, ctx)?),
            | Condition::Always => Ok(true),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, cs: &[Condition], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, c) in cs.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", sep)?;
        }
        write!(f, "{}", c)?;
    }
    f.write_str(")")
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            | Condition::Compare { field, op, value } => {
                write!(f, "{} {} {}", field, op.symbol(), value)
            }
            | Condition::All { conditions } => join(f, conditions, "and"),
            | Condition::Any { conditions } => join(f, conditions, "or"),
            | Condition::Not { condition } => write!(f, "not {}", condition),
            | Condition::Always => f.write_str("always"),
        }
    }
}

fn default_effectiveness() -> f64 {
    0.5
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub condition: Condition,
    pub action: RuleAction,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_active")]
    pub active: bool,
    /// In `[0, 1]`, smoothed by the learning loop.
    #[serde(default = "default_effectiveness")]
    pub effectiveness: f64,
}

impl DecisionRule {
    pub fn new(id: &str, name: &str, condition: Condition, action: RuleAction, priority: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: format!("{} when {}", action, condition),
            condition,
            action,
            priority,
            active: true,
            effectiveness: default_effectiveness(),
        }
    }
}

/// Rule set used when no persisted rules exist.
pub fn default_rules() -> Vec<DecisionRule> {
    vec![
        DecisionRule::new(
            "high_risk_reject",
            "High risk rejection",
            Condition::compare(Field::RiskScore, Comparison::Gt, 0.8),
            RuleAction::Reject,
            1,
        ),
        DecisionRule::new(
            "large_position_reduce",
            "Large position reduction",
            Condition::compare(Field::SizePct, Comparison::Gt, 0.1),
            RuleAction::ReduceSize,
            2,
        ),
        DecisionRule::new(
            "concentration_diversify",
            "Portfolio concentration",
            Condition::compare(Field::PortfolioConcentration, Comparison::Gt, 0.5),
            RuleAction::Diversify,
            3,
        ),
        DecisionRule::new(
            "low_liquidity_reject",
            "Low liquidity rejection",
            Condition::compare(Field::LiquidityScore, Comparison::Lt, 0.5),
            RuleAction::Reject,
            4,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::Proposal;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn proposal() -> Proposal {
        let mut p = Proposal::skeleton("p1", vec!["BTC".into()], Utc::now());
        p.risk_score = 0.5;
        p.size_pct = 0.05;
        p.liquidity_score = 0.9;
        p
    }

    #[test]
    fn compare_reads_proposal_fields() {
        let ctx = DecisionContext::at(Utc::now());
        let c = Condition::compare(Field::RiskScore, Comparison::Gt, 0.4);
        assert!(c.evaluate(&proposal(), &ctx).unwrap());
        let c = Condition::compare(Field::SizePct, Comparison::Gt, 0.1);
        assert!(!c.evaluate(&proposal(), &ctx).unwrap());
    }

    #[test]
    fn absent_context_value_does_not_match() {
        let ctx = DecisionContext::at(Utc::now());
        let c = Condition::compare(Field::PortfolioConcentration, Comparison::Gt, 0.5);
        assert_matches!(c.evaluate(&proposal(), &ctx), Ok(false));

        let c = Condition::compare(Field::Context("vix".into()), Comparison::Lte, 30.0);
        assert_matches!(c.evaluate(&proposal(), &ctx), Ok(false));
    }

    #[test]
    fn non_finite_field_is_an_error() {
        let mut p = proposal();
        p.risk_score = f64::NAN;
        let c = Condition::compare(Field::RiskScore, Comparison::Gt, 0.8);
        assert_matches!(c.evaluate(&p, &DecisionContext::at(Utc::now())), Err(Error::RuleError(_)));
    }

    #[test]
    fn combinators() {
        let mut ctx = DecisionContext::at(Utc::now());
        ctx.extra.insert("vix".into(), 35.0);
        let c = Condition::All {
            conditions: vec![
                Condition::compare(Field::Context("vix".into()), Comparison::Gte, 30.0),
                Condition::Not {
                    condition: Box::new(Condition::compare(
                        Field::AssetCount,
                        Comparison::Gt,
                        1.0,
                    )),
                },
            ],
        };
        assert!(c.evaluate(&proposal(), &ctx).unwrap());
        assert_eq!(c.to_string(), "(context.vix >= 30 and not asset_count > 1)");
    }

    #[test]
    fn rules_serialize_as_tagged_predicates() {
        let rule = &default_rules()[0];
        let v = serde_json::to_value(rule).unwrap();
        assert_eq!(v["condition"]["kind"], "compare");
        assert_eq!(v["condition"]["field"], "risk_score");
        assert_eq!(v["action"], "reject");
        let back: DecisionRule = serde_json::from_value(v).unwrap();
        assert_eq!(&back, rule);
    }
}
