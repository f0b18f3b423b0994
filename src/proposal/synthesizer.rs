//! Proposal synthesis: consensus over the strongest fused signals, Kelly
//! sizing, risk-derived stop/target levels and invalidation triggers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use metrics::increment_counter;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{Proposal, ProposalStatus, SignalRef};
use crate::config::ProposalConfig;
use crate::llm::{generate_or, TextGenerator};
use crate::market_data::MarketContext;
use crate::metrics::PROPOSALS;
use crate::risk::{KellySizer, RiskAssessment, RiskEngine};
use crate::scoring::{Dimension, ScoredSignal};
use crate::state::ModelState;
use crate::utils::error::{Error, Result};

const STOP_LOSS_VAR_MULTIPLE: f64 = 0.8;
const TAKE_PROFIT_VAR_MULTIPLE: f64 = 1.2;
const BASE_RETURN: f64 = 0.1;

/// Aggregate view over the selected signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub consensus: f64,
    pub confidence: f64,
    pub diversity: f64,
    pub avg_novelty: f64,
    pub count: usize,
}

/// A proposal together with the assessment it was sized against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synthesis {
    pub proposal: Proposal,
    pub risk: RiskAssessment,
    pub summary: SignalSummary,
}

#[derive(Debug, Clone, Deserialize)]
struct Thesis {
    main_thesis: String,
    #[serde(default)]
    explanation: String,
}

pub struct ProposalSynthesizer {
    cfg: ProposalConfig,
    risk: Arc<RiskEngine>,
    generator: Arc<dyn TextGenerator>,
}

impl ProposalSynthesizer {
    pub fn new(cfg: ProposalConfig, risk: Arc<RiskEngine>, generator: Arc<dyn TextGenerator>) -> Self {
        Self { cfg, risk, generator }
    }

    /// Strongest `top_signals` by fused score, then confidence, then input order.
    pub fn select_top<'a>(&self, scored: &'a [ScoredSignal]) -> Vec<&'a ScoredSignal> {
        let mut ranked: Vec<(usize, &ScoredSignal)> = scored.iter().enumerate().collect();
        ranked.sort_by(|(ia, a), (ib, b)| {
            b.fused
                .score
                .total_cmp(&a.fused.score)
                .then_with(|| b.fused.confidence.total_cmp(&a.fused.confidence))
                .then_with(|| ia.cmp(ib))
        });
        ranked.into_iter().take(self.cfg.top_signals.max(1)).map(|(_, s)| s).collect()
    }

    pub fn summarize(top: &[&ScoredSignal]) -> SignalSummary {
        let n = top.len().max(1) as f64;
        let sources: BTreeSet<&str> = top.iter().map(|s| s.signal.source.as_str()).collect();
        SignalSummary {
            consensus: top.iter().map(|s| s.fused.score).sum::<f64>() / n,
            confidence: top.iter().map(|s| s.fused.confidence).sum::<f64>() / n,
            diversity: sources.len() as f64 / n,
            // A dropped novelty scorer counts as 0.
            avg_novelty: top
                .iter()
                .map(|s| s.normalized(Dimension::Novelty).unwrap_or(0.0))
                .sum::<f64>()
                / n,
            count: top.len(),
        }
    }

    /// 7 days for very novel flow, 30 for moderately novel, else 90.
    pub fn horizon_days(avg_novelty: f64) -> u32 {
        if avg_novelty > 0.8 {
            7
        } else if avg_novelty > 0.5 {
            30
        } else {
            90
        }
    }

    /// Textual triggers for the thresholds this assessment already breaches.
    pub fn invalidation_conditions(risk: &RiskAssessment) -> Vec<String> {
        let mut out = Vec::new();
        if risk.overall_risk > 0.8 {
            out.push("Risk score exceeds 0.8".to_string());
        }
        if risk.volatility > 0.3 {
            out.push("Volatility exceeds 30%".to_string());
        }
        if risk.max_pairwise_correlation().is_some_and(|c| c > 0.8) {
            out.push("Correlation exceeds 80%".to_string());
        }
        out
    }

    #[instrument(skip_all, fields(signals = scored.len(), timeframe = %timeframe))]
    pub async fn synthesize(
        &self,
        scored: &[ScoredSignal],
        assets: &[String],
        timeframe: &str,
        market: &MarketContext,
        state: &ModelState,
    ) -> Result<Synthesis> {
        if scored.is_empty() {
            return Err(Error::ValidationError("no scored signals to synthesize from".into()));
        }
        let top = self.select_top(scored);
        let assets: Vec<String> = if assets.is_empty() {
            let mut seen = BTreeSet::new();
            top.iter()
                .map(|s| s.signal.asset.trim().to_uppercase())
                .filter(|a| seen.insert(a.clone()))
                .collect()
        } else {
            assets.to_vec()
        };

        let summary = Self::summarize(&top);
        let size_pct = KellySizer::from_config(&self.cfg).size_pct();
        let horizon_days = Self::horizon_days(summary.avg_novelty);

        let risk = self.risk.assess(&assets, size_pct, horizon_days, market, state)?;

        let var_mag = risk.var.historical.abs();
        let expected_return = summary.consensus * summary.confidence * BASE_RETURN;
        let vol = if risk.volatility > 0.0 { risk.volatility } else { self.cfg.default_volatility };
        let sharpe_ratio = (expected_return - self.cfg.risk_free_rate) / vol;

        let thesis = generate_or(
            self.generator.as_ref(),
            &self.thesis_prompt(&assets, timeframe, &summary, &risk),
            "thesis",
            fallback_thesis(&assets, timeframe, &summary),
        )
        .await;

        let now = Utc::now();
        let proposal = Proposal {
            id: uuid::Uuid::new_v4().to_string(),
            thesis: thesis.main_thesis,
            explanation: thesis.explanation,
            entry_prices: entry_prices(&assets, &top, market),
            assets,
            timeframe: timeframe.to_string(),
            size_pct,
            horizon_days,
            stop_loss: STOP_LOSS_VAR_MULTIPLE * var_mag,
            take_profit: TAKE_PROFIT_VAR_MULTIPLE * var_mag,
            invalidation_conditions: Self::invalidation_conditions(&risk),
            risk_score: risk.overall_risk,
            liquidity_score: risk.liquidity,
            expected_return,
            sharpe_ratio,
            signals: top
                .iter()
                .map(|s| SignalRef {
                    signal_id: s.signal.id.clone(),
                    source: s.signal.source.clone(),
                    asset: s.signal.asset.clone(),
                    fused_score: s.fused.score,
                    price: s.signal.price,
                })
                .collect(),
            status: ProposalStatus::Proposed,
            created_at: now,
            updated_at: now,
        };

        increment_counter!(PROPOSALS);
        info!(
            proposal_id = %proposal.id,
            size_pct,
            horizon_days,
            risk = risk.overall_risk,
            "proposal synthesized"
        );
        Ok(Synthesis { proposal, risk, summary })
    }

    fn thesis_prompt(
        &self,
        assets: &[String],
        timeframe: &str,
        summary: &SignalSummary,
        risk: &RiskAssessment,
    ) -> String {
        format!(
            "Based on the following signals and market data, create an investment thesis.\n\n\
             Assets: {}\nTimeframe: {}\nSignal consensus: {:.3} (confidence {:.3}, diversity {:.3}, \
             {} signals)\nOverall risk: {:.3}, volatility {:.4}, historical VaR {:.4}\n\n\
             Return a JSON object with:\n{{\n  \"main_thesis\": \"string\",\n  \
             \"supporting_factors\": [\"string\"],\n  \"risk_factors\": [\"string\"],\n  \
             \"timeframe\": \"string\",\n  \"expected_performance\": \"string\",\n  \
             \"explanation\": \"string\"\n}}",
            assets.join(", "),
            timeframe,
            summary.consensus,
            summary.confidence,
            summary.diversity,
            summary.count,
            risk.overall_risk,
            risk.volatility,
            risk.var.historical,
        )
    }
}

fn fallback_thesis(assets: &[String], timeframe: &str, summary: &SignalSummary) -> Thesis {
    Thesis {
        main_thesis: format!(
            "Signal consensus of {:.2} across {} signals supports a position in {} over {}.",
            summary.consensus,
            summary.count,
            assets.join(", "),
            if timeframe.is_empty() { "the proposed horizon" } else { timeframe }
        ),
        explanation: format!(
            "Generated from aggregate signal statistics (confidence {:.2}, source diversity {:.2}).",
            summary.confidence, summary.diversity
        ),
    }
}

/// Market price when known, else the mean reference price from the signals.
fn entry_prices(
    assets: &[String],
    top: &[&ScoredSignal],
    market: &MarketContext,
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for a in assets {
        let price = market.price(a).or_else(|| {
            let prices: Vec<f64> = top
                .iter()
                .filter(|s| s.signal.asset.eq_ignore_ascii_case(a))
                .filter_map(|s| s.signal.price)
                .collect();
            crate::utils::mean(&prices)
        });
        if let Some(p) = price {
            out.insert(a.clone(), p);
        }
    }
    out
}
