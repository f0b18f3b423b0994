//! Rule evaluation and action resolution.
//!
//! [`decide`] is a pure function of (proposal, rules, context, config):
//! no clock reads, no randomness. The decision id is a digest of the
//! inputs that shaped it and the timestamps come from `context.as_of`.

use sha2::{Digest, Sha256};

use super::rules::{DecisionRule, RuleAction};
use super::{Action, Decision, DecisionContext, TraceEntry};
use crate::config::DecisionConfig;
use crate::proposal::Proposal;

/// Evaluate every active rule and resolve one action.
pub fn decide(
    proposal: &Proposal,
    rules: &[DecisionRule],
    ctx: &DecisionContext,
    cfg: &DecisionConfig,
) -> Decision {
    let mut active: Vec<&DecisionRule> = rules.iter().filter(|r| r.active).collect();
    active.sort_by_key(|r| r.priority);

    let trace: Vec<TraceEntry> = active
        .iter()
        .map(|rule| match rule.condition.evaluate(proposal, ctx) {
            | Ok(matched) => TraceEntry {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                matched,
                action: rule.action,
                error: None,
            },
            | Err(e) => TraceEntry {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                matched: false,
                action: RuleAction::Skip,
                error: Some(e.to_string()),
            },
        })
        .collect();

    let fired = |a: RuleAction| trace.iter().any(|t| t.matched && t.action == a);

    let (action, confidence, size_adjustment) = if fired(RuleAction::Reject) {
        (Action::Reject, cfg.reject_confidence, 1.0)
    } else {
        let reduce = fired(RuleAction::ReduceSize);
        let diversify = fired(RuleAction::Diversify);
        let mut adj = 1.0;
        if reduce {
            adj *= cfg.reduce_size_factor;
        }
        if diversify {
            adj *= cfg.diversify_factor;
        }
        // Diversify alone only scales the size; the action stays approve.
        let action = if reduce { Action::ReduceSize } else { Action::Approve };
        (action, cfg.max_confidence.min(rule_confidence(&trace)), adj)
    };

    Decision {
        id: decision_id(proposal, ctx, &trace),
        proposal_id: proposal.id.clone(),
        action,
        confidence,
        size_adjustment,
        rationale: rationale(proposal, action, size_adjustment, &trace),
        trace,
        created_at: ctx.as_of,
        updated_at: ctx.as_of,
    }
}

/// Fraction of evaluated rules whose predicate matched; 0.5 with no rules.
fn rule_confidence(trace: &[TraceEntry]) -> f64 {
    if trace.is_empty() {
        return 0.5;
    }
    trace.iter().filter(|t| t.matched).count() as f64 / trace.len() as f64
}

/// Stable id for a decision: digest of proposal id, clock, and trace.
pub fn decision_id(proposal: &Proposal, ctx: &DecisionContext, trace: &[TraceEntry]) -> String {
    let mut h = Sha256::new();
    h.update(proposal.id.as_bytes());
    h.update(ctx.as_of.to_rfc3339().as_bytes());
    for t in trace {
        h.update(t.rule_id.as_bytes());
        h.update([t.matched as u8]);
    }
    let digest = hex::encode(h.finalize());
    format!("dec-{}", &digest[..16])
}

fn rationale(
    proposal: &Proposal,
    action: Action,
    size_adjustment: f64,
    trace: &[TraceEntry],
) -> String {
    let matched: Vec<&str> =
        trace.iter().filter(|t| t.matched).map(|t| t.rule_name.as_str()).collect();
    let skipped: Vec<&str> =
        trace.iter().filter(|t| t.error.is_some()).map(|t| t.rule_name.as_str()).collect();

    let mut out = format!(
        "Summary: {} proposal {} ({} assets, size {:.2}%).\n",
        action.as_str(),
        proposal.id,
        proposal.assets.len(),
        proposal.size_pct * 100.0
    );
    out.push_str(&format!(
        "Rule evaluation: {} of {} rules matched{}.\n",
        matched.len(),
        trace.len(),
        if matched.is_empty() { String::new() } else { format!(" ({})", matched.join(", ")) }
    ));
    if !skipped.is_empty() {
        out.push_str(&format!("Skipped: {}.\n", skipped.join(", ")));
    }
    out.push_str(&format!(
        "Risk: score {:.2}, liquidity {:.2}.\n",
        proposal.risk_score, proposal.liquidity_score
    ));
    let rec = match action {
        | Action::Reject => "do not enter".to_string(),
        | Action::Approve if size_adjustment >= 1.0 => "enter at proposed size".to_string(),
        | Action::Approve | Action::ReduceSize => {
            format!("enter at {:.0}% of proposed size", size_adjustment * 100.0)
        }
    };
    out.push_str(&format!("Recommendation: {}.", rec));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::decision::rules::{default_rules, Comparison, Condition, Field};
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn ctx() -> DecisionContext {
        DecisionContext::at(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
    }

    fn proposal(risk: f64, size: f64, liquidity: f64) -> Proposal {
        let mut p = Proposal::skeleton("p-1", vec!["BTC".into()], ctx().as_of);
        p.risk_score = risk;
        p.size_pct = size;
        p.liquidity_score = liquidity;
        p
    }

    fn cfg() -> DecisionConfig {
        Config::default().decision
    }

    #[test]
    fn reject_beats_reduce_size() {
        let d = decide(&proposal(0.95, 0.15, 0.9), &default_rules(), &ctx(), &cfg());
        assert_eq!(d.action, Action::Reject);
        assert_eq!(d.confidence, 0.9);
        assert_eq!(d.size_adjustment, 1.0);
    }

    #[test]
    fn reduce_and_diversify_compound() {
        let c = ctx().with_concentration(0.7);
        let d = decide(&proposal(0.6, 0.12, 0.9), &default_rules(), &c, &cfg());
        assert_eq!(d.action, Action::ReduceSize);
        assert!((d.size_adjustment - 0.4).abs() < 1e-12);
        // 2 of 4 rules matched.
        assert_eq!(d.confidence, 0.5);
    }

    #[rstest]
    #[case(0.3, 0.05, Some(0.2), Action::Approve, 1.0)]
    #[case(0.3, 0.05, Some(0.9), Action::Approve, 0.8)]
    #[case(0.3, 0.20, Some(0.2), Action::ReduceSize, 0.5)]
    #[case(0.3, 0.20, Some(0.9), Action::ReduceSize, 0.4)]
    fn resolution_table(
        #[case] risk: f64,
        #[case] size: f64,
        #[case] concentration: Option<f64>,
        #[case] action: Action,
        #[case] adj: f64,
    ) {
        let mut c = ctx();
        c.portfolio_concentration = concentration;
        let d = decide(&proposal(risk, size, 0.9), &default_rules(), &c, &cfg());
        assert_eq!(d.action, action);
        assert!((d.size_adjustment - adj).abs() < 1e-12);
        assert!(d.confidence <= 0.8);
    }

    #[test]
    fn low_liquidity_rejects() {
        let d = decide(&proposal(0.2, 0.05, 0.3), &default_rules(), &ctx(), &cfg());
        assert_eq!(d.action, Action::Reject);
    }

    #[test]
    fn unreadable_rule_is_skipped_not_fatal() {
        let d = decide(&proposal(f64::NAN, 0.05, 0.9), &default_rules(), &ctx(), &cfg());
        let entry = d.trace.iter().find(|t| t.rule_id == "high_risk_reject").unwrap();
        assert_eq!(entry.action, RuleAction::Skip);
        assert!(entry.error.is_some());
        assert_eq!(d.trace.len(), 4);
        assert_eq!(d.action, Action::Approve);
        assert_eq!(d.rule_matched("high_risk_reject"), None);
        assert!(d.rationale.contains("Skipped:"));
    }

    #[test]
    fn absent_concentration_is_an_ordinary_miss() {
        let d = decide(&proposal(0.2, 0.05, 0.9), &default_rules(), &ctx(), &cfg());
        assert!(d.trace.iter().all(|t| t.error.is_none()));
        assert_eq!(d.rule_matched("concentration_diversify"), Some(false));
        assert_eq!(d.action, Action::Approve);
        assert_eq!(d.size_adjustment, 1.0);
    }

    #[test]
    fn empty_rule_set_gives_half_confidence() {
        let d = decide(&proposal(0.2, 0.05, 0.9), &[], &ctx(), &cfg());
        assert_eq!(d.action, Action::Approve);
        assert_eq!(d.confidence, 0.5);
    }

    #[test]
    fn inactive_rules_are_ignored() {
        let mut rules = default_rules();
        rules[0].active = false;
        let d = decide(&proposal(0.95, 0.05, 0.9), &rules, &ctx(), &cfg());
        assert_ne!(d.action, Action::Reject);
        assert_eq!(d.trace.len(), 3);
    }

    #[test]
    fn identical_inputs_give_identical_decisions() {
        let mut rules = default_rules();
        rules.push(DecisionRule::new(
            "vix_guard",
            "Volatility guard",
            Condition::compare(Field::Context("vix".into()), Comparison::Gt, 40.0),
            RuleAction::ReduceSize,
            5,
        ));
        let mut c = ctx().with_concentration(0.6);
        c.extra.insert("vix".into(), 45.0);
        let p = proposal(0.5, 0.08, 0.9);
        let a = decide(&p, &rules, &c, &cfg());
        let b = decide(&p, &rules, &c, &cfg());
        assert_eq!(a, b);
        assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
        assert!(a.id.starts_with("dec-"));
        assert_eq!(a.created_at, c.as_of);
    }
}
