//! Rule-resolution scenarios against the default rule set.

use chrono::{TimeZone, Utc};
use rstest::rstest;
use tradeloop::config::Config;
use tradeloop::decision::{
    decide, default_rules, Action, Comparison, Condition, DecisionContext, DecisionRule, Field,
    RuleAction,
};
use tradeloop::proposal::Proposal;

fn proposal(size: f64, risk: f64, liquidity: f64) -> Proposal {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut p = Proposal::skeleton("p-scenario", vec!["BTC".into()], at);
    p.size_pct = size;
    p.risk_score = risk;
    p.liquidity_score = liquidity;
    p
}

fn ctx(concentration: f64) -> DecisionContext {
    DecisionContext::at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap())
        .with_concentration(concentration)
}

#[test]
fn reduce_and_diversify_compound() {
    let d = decide(&proposal(0.12, 0.6, 0.9), &default_rules(), &ctx(0.7), &Config::default().decision);
    assert_eq!(d.action, Action::ReduceSize);
    assert!((d.size_adjustment - 0.4).abs() < 1e-12);
    assert_eq!(d.rule_matched("large_position_reduce"), Some(true));
    assert_eq!(d.rule_matched("concentration_diversify"), Some(true));
}

#[test]
fn reject_beats_reduce_size() {
    let d = decide(&proposal(0.15, 0.95, 0.9), &default_rules(), &ctx(0.1), &Config::default().decision);
    assert_eq!(d.action, Action::Reject);
    assert_eq!(d.size_adjustment, 1.0);
    assert!((d.confidence - 0.9).abs() < 1e-12);
}

#[rstest]
#[case(0.05, 0.3, 0.9, 0.1, Action::Approve)]
#[case(0.05, 0.3, 0.4, 0.1, Action::Reject)]
#[case(0.05, 0.3, 0.9, 0.6, Action::Approve)]
#[case(0.15, 0.3, 0.9, 0.1, Action::ReduceSize)]
fn default_rule_outcomes(
    #[case] size: f64,
    #[case] risk: f64,
    #[case] liquidity: f64,
    #[case] concentration: f64,
    #[case] expected: Action,
) {
    let d = decide(
        &proposal(size, risk, liquidity),
        &default_rules(),
        &ctx(concentration),
        &Config::default().decision,
    );
    assert_eq!(d.action, expected);
}

#[test]
fn identical_inputs_give_identical_decisions() {
    let cfg = Config::default().decision;
    let a = decide(&proposal(0.12, 0.6, 0.9), &default_rules(), &ctx(0.7), &cfg);
    let b = decide(&proposal(0.12, 0.6, 0.9), &default_rules(), &ctx(0.7), &cfg);
    assert_eq!(a, b);
    assert!(a.id.starts_with("dec-"));
}

#[test]
fn missing_context_field_does_not_fire() {
    let mut rules = default_rules();
    rules.push(DecisionRule::new(
        "drawdown_guard",
        "Drawdown guard",
        Condition::compare(Field::Context("drawdown".into()), Comparison::Gt, 0.2),
        RuleAction::Reject,
        0,
    ));
    let d = decide(&proposal(0.05, 0.3, 0.9), &rules, &ctx(0.1), &Config::default().decision);
    assert_eq!(d.action, Action::Approve);
    let entry = d.trace.iter().find(|t| t.rule_id == "drawdown_guard").unwrap();
    assert!(!entry.matched);
    assert!(entry.error.is_none());
    assert_eq!(entry.action, RuleAction::Reject);
}

#[test]
fn non_finite_field_is_skipped_not_fatal() {
    let d = decide(&proposal(0.05, f64::NAN, 0.9), &default_rules(), &ctx(0.1), &Config::default().decision);
    let entry = d.trace.iter().find(|t| t.rule_id == "high_risk_reject").unwrap();
    assert_eq!(entry.action, RuleAction::Skip);
    assert!(entry.error.is_some());
    assert_eq!(d.action, Action::Approve);
    // Skipped rules still count toward the total: 0 of 4 matched.
    assert_eq!(d.confidence, 0.0);
}

#[test]
fn diversify_alone_approves_at_reduced_size() {
    let d = decide(&proposal(0.05, 0.3, 0.9), &default_rules(), &ctx(0.9), &Config::default().decision);
    assert_eq!(d.action, Action::Approve);
    assert!((d.size_adjustment - 0.8).abs() < 1e-12);
    assert!(d.rationale.contains("80% of proposed size"));
}

#[test]
fn no_rules_means_neutral_approval() {
    let d = decide(&proposal(0.05, 0.3, 0.9), &[], &ctx(0.1), &Config::default().decision);
    assert_eq!(d.action, Action::Approve);
    assert_eq!(d.confidence, 0.5);
}
