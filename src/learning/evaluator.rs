//! The learning loop: evaluate an outcome, then blend what it teaches into
//! the persisted model state.

use std::sync::Arc;

use chrono::Utc;
use metrics::increment_counter;
use tracing::{info, instrument, warn};

use super::performance::{self, Performance};
use super::{generic_insights, DecisionQuality, Evaluation, Outcome};
use crate::config::LearningConfig;
use crate::decision::{Decision, DecisionContext};
use crate::llm::{generate_or, TextGenerator};
use crate::metrics::EVALUATIONS;
use crate::persistence::{get_record, keys, KeyValueStore};
use crate::proposal::Proposal;
use crate::state::{ModelState, ModelStateRepository};
use crate::utils::clamp01;
use crate::utils::error::{Error, Result};

pub struct LearningLoop {
    cfg: LearningConfig,
    store: Arc<dyn KeyValueStore>,
    states: ModelStateRepository,
    generator: Arc<dyn TextGenerator>,
}

impl LearningLoop {
    pub fn new(
        cfg: LearningConfig,
        store: Arc<dyn KeyValueStore>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let states = ModelStateRepository::new(store.clone(), cfg.max_write_attempts);
        Self { cfg, store, states, generator }
    }

    /// Evaluate `outcome` against `proposal`, update model state, and store
    /// the evaluation. Each outcome is evaluated once; a repeat is rejected
    /// before anything is learned. Model-state and store failures fail the
    /// call; text generation failures fall back.
    #[instrument(skip_all, fields(proposal_id = %proposal.id, outcome_id = %outcome.id))]
    pub async fn evaluate(&self, proposal: &Proposal, outcome: &Outcome) -> Result<Evaluation> {
        outcome.validate()?;
        if outcome.proposal_id != proposal.id {
            return Err(Error::ValidationError(format!(
                "outcome {} belongs to proposal {}, not {}",
                outcome.id, outcome.proposal_id, proposal.id
            )));
        }

        let key = keys::evaluation(&proposal.id, &outcome.id);
        if self.store.get(&key).await?.is_some() {
            return Err(already_evaluated(outcome));
        }

        let perf = performance::compute(proposal, outcome, &self.cfg);
        let decision: Option<Decision> =
            get_record(self.store.as_ref(), &keys::decision(&proposal.id)).await?;

        let quality = generate_or(
            self.generator.as_ref(),
            &quality_prompt(proposal, outcome, &perf),
            "decision_quality",
            DecisionQuality::neutral(),
        )
        .await;
        let quality = DecisionQuality { score: clamp01(quality.score), ..quality };

        let mut insights: Vec<String> = generate_or(
            self.generator.as_ref(),
            &insight_prompt(proposal, outcome, &perf),
            "insights",
            generic_insights(),
        )
        .await;
        if insights.is_empty() {
            insights = generic_insights();
        }

        let state = self
            .states
            .update(&self.cfg.state_key, |s| {
                self.apply(s, proposal, outcome, &perf, decision.as_ref())
            })
            .await?;

        let evaluation = Evaluation {
            id: uuid::Uuid::new_v4().to_string(),
            proposal_id: proposal.id.clone(),
            outcome_id: outcome.id.clone(),
            performance: perf,
            decision_quality: quality,
            insights,
            model_state_version: state.version,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&evaluation)?;
        if !self.store.compare_and_swap(&key, None, &value).await? {
            warn!("evaluation written concurrently for the same outcome");
            return Err(already_evaluated(outcome));
        }

        increment_counter!(EVALUATIONS);
        info!(
            return_pct = perf.return_pct,
            overall = perf.overall_score,
            state_version = state.version,
            "outcome evaluated"
        );
        Ok(evaluation)
    }

    /// Blend one outcome into `state`. Re-applied from scratch on every CAS retry.
    pub fn apply(
        &self,
        state: &mut ModelState,
        proposal: &Proposal,
        outcome: &Outcome,
        perf: &Performance,
        decision: Option<&Decision>,
    ) {
        self.update_signal_weights(state, proposal, outcome);
        self.update_risk_parameters(state, proposal, outcome, perf);
        self.update_rule_effectiveness(state, proposal, outcome, perf, decision);
    }

    /// Each contributing signal's fused score × its realized return nudges
    /// its source's weight up or down.
    fn update_signal_weights(&self, state: &mut ModelState, proposal: &Proposal, outcome: &Outcome) {
        for sig in &proposal.signals {
            let asset = sig.asset.trim().to_uppercase();
            let entry = sig.price.or_else(|| proposal.entry_prices.get(&asset).copied());
            let exit = outcome.exit_prices.get(&asset).copied();
            let (entry, exit) = match (entry, exit) {
                | (Some(e), Some(x)) if e > 0.0 => (e, x),
                | _ => continue,
            };
            let signal_perf = sig.fused_score * (exit - entry) / entry;
            let factor = if signal_perf > self.cfg.performance_band {
                self.cfg.weight_boost
            } else if signal_perf < -self.cfg.performance_band {
                self.cfg.weight_decay
            } else {
                continue;
            };
            *state.signal_weights.entry(sig.source.clone()).or_insert(1.0) *= factor;
        }
    }

    /// Scale every risk parameter by realized vs. predicted risk.
    fn update_risk_parameters(
        &self,
        state: &mut ModelState,
        proposal: &Proposal,
        outcome: &Outcome,
        perf: &Performance,
    ) {
        let vol = performance::realized_volatility(outcome, &self.cfg);
        let actual = perf.return_pct.abs() / vol;
        let ratio = actual / proposal.risk_score;
        let adj = if ratio.is_nan() {
            1.0
        } else {
            ratio.clamp(self.cfg.risk_adjustment_min, self.cfg.risk_adjustment_max)
        };
        for (name, default) in crate::state::DEFAULT_RISK_PARAMETERS {
            state.risk_parameters.entry(name.to_string()).or_insert(default);
        }
        for v in state.risk_parameters.values_mut() {
            *v *= adj;
        }
    }

    /// EMA of whether each rule's match agreed with profitability.
    fn update_rule_effectiveness(
        &self,
        state: &mut ModelState,
        proposal: &Proposal,
        outcome: &Outcome,
        perf: &Performance,
        decision: Option<&Decision>,
    ) {
        if state.rules.is_empty() {
            state.rules = state.active_rules();
        }
        let profitable = perf.return_pct > 0.0;
        let ctx = DecisionContext::at(outcome.observed_at);
        let alpha = self.cfg.effectiveness_smoothing;

        for rule in state.rules.iter_mut().filter(|r| r.active) {
            let matched = match decision.and_then(|d| d.rule_matched(&rule.id)) {
                | Some(m) => m,
                | None => match rule.condition.evaluate(proposal, &ctx) {
                    | Ok(m) => m,
                    | Err(e) => {
                        warn!(rule = %rule.id, error = %e, "rule not re-evaluable; effectiveness kept");
                        continue;
                    }
                },
            };
            let agreement = if matched == profitable { 1.0 } else { 0.0 };
            rule.effectiveness = clamp01(alpha * rule.effectiveness + (1.0 - alpha) * agreement);
        }
    }

    pub fn states(&self) -> &ModelStateRepository {
        &self.states
    }
}

fn already_evaluated(outcome: &Outcome) -> Error {
    Error::ValidationError(format!(
        "outcome {} for proposal {} is already evaluated",
        outcome.id, outcome.proposal_id
    ))
}

fn quality_prompt(proposal: &Proposal, outcome: &Outcome, perf: &Performance) -> String {
    format!(
        "Assess the quality of an investment decision.\n\nProposal: {} (assets {}, size {:.4}, \
         risk {:.3}, horizon {} days)\nOutcome: exit prices {:?}\nPerformance: return {:.4}, \
         sharpe {:.3}, max drawdown {:.4}\n\nReturn a JSON object with:\n{{\n  \
         \"accuracy\": \"string\",\n  \"risk_management\": \"string\",\n  \"timing\": \"string\",\n  \
         \"position_sizing\": \"string\",\n  \"overall_quality\": \"string\",\n  \
         \"score\": number between 0 and 1\n}}",
        proposal.id,
        proposal.assets.join(", "),
        proposal.size_pct,
        proposal.risk_score,
        proposal.horizon_days,
        outcome.exit_prices,
        perf.return_pct,
        perf.sharpe_ratio,
        perf.max_drawdown,
    )
}

fn insight_prompt(proposal: &Proposal, outcome: &Outcome, perf: &Performance) -> String {
    format!(
        "Generate insights from an investment outcome.\n\nProposal thesis: {}\nExit prices: {:?}\n\
         Performance: return {:.4}, overall score {:.3}\n\nGenerate actionable insights for signal \
         quality, risk management, decision rules and model performance. Return a JSON array of \
         insight strings.",
        proposal.thesis, outcome.exit_prices, perf.return_pct, perf.overall_score,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use crate::config::Config;
    use crate::decision::{decide, default_rules};
    use crate::llm::{DisabledTextGenerator, MockTextGenerator};
    use crate::persistence::{put_record, MemoryStore};
    use crate::proposal::SignalRef;

    fn proposal() -> Proposal {
        let mut p = Proposal::skeleton("p-1", vec!["BTC".into()], Utc::now());
        p.risk_score = 0.5;
        p.size_pct = 0.05;
        p.liquidity_score = 0.9;
        p.entry_prices.insert("BTC".into(), 100.0);
        p.signals = vec![
            SignalRef {
                signal_id: "s1".into(),
                source: "news".into(),
                asset: "BTC".into(),
                fused_score: 0.9,
                price: Some(100.0),
            },
            SignalRef {
                signal_id: "s2".into(),
                source: "social".into(),
                asset: "BTC".into(),
                fused_score: 0.2,
                price: Some(100.0),
            },
        ];
        p
    }

    fn outcome(exit: f64) -> Outcome {
        Outcome {
            id: "o-1".into(),
            proposal_id: "p-1".into(),
            exit_prices: [("BTC".to_string(), exit)].into_iter().collect(),
            price_history: vec![100.0, exit],
            realized_volatility: Some(0.2),
            observed_at: Utc::now(),
        }
    }

    fn learning(store: Arc<MemoryStore>) -> LearningLoop {
        LearningLoop::new(Config::default().learning, store, Arc::new(DisabledTextGenerator))
    }

    #[tokio::test]
    async fn profitable_outcome_boosts_strong_source_only() {
        let store = Arc::new(MemoryStore::new());
        let l = learning(store.clone());
        let e = l.evaluate(&proposal(), &outcome(120.0)).await.unwrap();

        assert_eq!(e.performance.win_rate, 1.0);
        assert_eq!(e.decision_quality.score, 0.7);
        assert_eq!(e.insights, generic_insights());
        assert_eq!(e.model_state_version, 1);

        let s = l.states().load("default").await.unwrap();
        // news: 0.9 × 0.2 = 0.18 > 0.1; social: 0.2 × 0.2 = 0.04 inside the band.
        assert!((s.source_weight("news") - 1.1).abs() < 1e-12);
        assert_eq!(s.source_weight("social"), 1.0);

        assert!(store.get("evaluations/p-1/o-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn risk_parameters_scale_by_clamped_ratio() {
        let l = learning(Arc::new(MemoryStore::new()));
        // actual = 0.02 / 0.2 = 0.1, predicted 0.5 → 0.2, clamped to 0.5.
        l.evaluate(&proposal(), &outcome(102.0)).await.unwrap();
        let s = l.states().load("default").await.unwrap();
        assert!((s.risk_parameter("var_scale") - 2.5).abs() < 1e-12);
        assert!((s.risk_parameter("liquidity_scale") - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn rule_effectiveness_uses_recorded_trace() {
        let store = Arc::new(MemoryStore::new());
        let mut p = proposal();
        p.size_pct = 0.15;
        let cfg = Config::default();
        let ctx = DecisionContext::at(Utc::now()).with_concentration(0.2);
        let d = decide(&p, &default_rules(), &ctx, &cfg.decision);
        put_record(store.as_ref(), &keys::decision(&p.id), &d).await.unwrap();

        let l = learning(store);
        l.evaluate(&p, &outcome(90.0)).await.unwrap();
        let s = l.states().load("default").await.unwrap();
        let eff: BTreeMap<_, _> = s.rules.iter().map(|r| (r.id.as_str(), r.effectiveness)).collect();
        // Loss: rules that did not match agreed (1.0); the size rule matched and disagreed (0.0).
        assert!((eff["high_risk_reject"] - 0.55).abs() < 1e-12);
        assert!((eff["large_position_reduce"] - 0.45).abs() < 1e-12);
        assert!((eff["concentration_diversify"] - 0.55).abs() < 1e-12);
        assert!((eff["low_liquidity_reject"] - 0.55).abs() < 1e-12);
    }

    #[tokio::test]
    async fn generated_quality_and_insights_are_used() {
        let mut gen = MockTextGenerator::new();
        gen.expect_generate().returning(|prompt| {
            if prompt.starts_with("Assess") {
                Ok(r#"{"accuracy":"good","risk_management":"tight","timing":"early",
                       "position_sizing":"fine","overall_quality":"high","score":0.9}"#
                    .to_string())
            } else {
                Ok(r#"["Lean on news flow"]"#.to_string())
            }
        });
        let l = LearningLoop::new(
            Config::default().learning,
            Arc::new(MemoryStore::new()),
            Arc::new(gen),
        );
        let e = l.evaluate(&proposal(), &outcome(110.0)).await.unwrap();
        assert_eq!(e.decision_quality.score, 0.9);
        assert_eq!(e.insights, vec!["Lean on news flow".to_string()]);
    }

    #[tokio::test]
    async fn mismatched_outcome_is_rejected() {
        let l = learning(Arc::new(MemoryStore::new()));
        let mut o = outcome(110.0);
        o.proposal_id = "other".into();
        assert!(matches!(l.evaluate(&proposal(), &o).await, Err(Error::ValidationError(_))));
    }

    #[tokio::test]
    async fn repeated_outcome_learns_once() {
        let l = learning(Arc::new(MemoryStore::new()));
        let first = l.evaluate(&proposal(), &outcome(120.0)).await.unwrap();
        let again = l.evaluate(&proposal(), &outcome(120.0)).await;
        assert!(matches!(again, Err(Error::ValidationError(_))));

        let s = l.states().load("default").await.unwrap();
        assert_eq!(s.version, first.model_state_version);
        assert!((s.source_weight("news") - 1.1).abs() < 1e-12);
    }
}
