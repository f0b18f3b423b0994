//! Transport-independent pipeline operations and their response envelope.
//!
//! [`Pipeline`] wires the stage engines to the stores and the text
//! generator. Each operation reads model state once, runs its stage and
//! persists what the stage produced. [`Response`] is the JSON envelope the
//! CLI prints for every call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::increment_counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::decision::{decide, Decision, DecisionContext};
use crate::learning::{Evaluation, LearningLoop, Outcome};
use crate::llm::{DisabledTextGenerator, HttpTextGenerator, TextGenerator};
use crate::market_data::MarketContext;
use crate::metrics::DECISIONS;
use crate::persistence::{keys, put_record, BlobStore, KeyValueStore, MemoryStore, TimedStore};
use crate::proposal::{Proposal, ProposalSynthesizer, Synthesis};
use crate::risk::{RiskAssessment, RiskEngine};
use crate::scoring::{ItemFailure, ScoredSignal, ScoringEngine};
use crate::signal::Signal;
use crate::state::{ModelState, ModelStateRepository};
use crate::utils::error::{Error, Result};

/// Failure payload of a [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        Self { code: e.code().to_string(), message: e.to_string() }
    }
}

/// Response envelope. Batch operations also report their per-item error count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> Response<T> {
    pub fn success(data: T) -> Self {
        Self { ok: true, data: Some(data), errors: None, error: None }
    }

    pub fn failure(err: &Error) -> Self {
        Self { ok: false, data: None, errors: None, error: Some(err.into()) }
    }
}

impl<T> From<Result<T>> for Response<T> {
    fn from(res: Result<T>) -> Self {
        match res {
            | Ok(v) => Self::success(v),
            | Err(e) => Self::failure(&e),
        }
    }
}

impl Response<ScoreReport> {
    /// Batch envelope: `ok` with the number of signals that failed.
    pub fn batch(res: Result<ScoreReport>) -> Self {
        match res {
            | Ok(report) => Self {
                ok: true,
                errors: Some(report.failures.len()),
                data: Some(report),
                error: None,
            },
            | Err(e) => Self::failure(&e),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub signals: Vec<Signal>,
}

/// Scored batch plus the signals that could not be scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreReport {
    pub batch_id: String,
    pub scored_signals: Vec<ScoredSignal>,
    pub failures: Vec<ItemFailure>,
    /// Whether the raw batch reached the blob store.
    pub archived: bool,
    pub duration_ms: u64,
}

fn default_horizon() -> u32 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRequest {
    pub assets: Vec<String>,
    pub size_pct: f64,
    #[serde(default = "default_horizon")]
    pub horizon_days: u32,
    #[serde(default)]
    pub market: MarketContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeRequest {
    pub scored_signals: Vec<ScoredSignal>,
    #[serde(default)]
    pub assets: Vec<String>,
    pub timeframe: String,
    #[serde(default)]
    pub market: MarketContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideRequest {
    pub proposal: Proposal,
    #[serde(default)]
    pub context: Option<DecisionContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub proposal: Proposal,
    pub outcome: Outcome,
}

pub struct Pipeline {
    cfg: Config,
    store: Arc<dyn KeyValueStore>,
    blobs: Arc<dyn BlobStore>,
    states: ModelStateRepository,
    scoring: ScoringEngine,
    risk: Arc<RiskEngine>,
    synthesizer: ProposalSynthesizer,
    learning: LearningLoop,
}

impl Pipeline {
    pub fn new(
        cfg: Config,
        store: Arc<dyn KeyValueStore>,
        blobs: Arc<dyn BlobStore>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let risk = Arc::new(RiskEngine::new(cfg.risk.clone()));
        Self {
            states: ModelStateRepository::new(store.clone(), cfg.learning.max_write_attempts),
            scoring: ScoringEngine::from_config(cfg.scoring.clone(), generator.clone()),
            synthesizer: ProposalSynthesizer::new(cfg.proposal.clone(), risk.clone(), generator.clone()),
            learning: LearningLoop::new(cfg.learning.clone(), store.clone(), generator),
            risk,
            store,
            blobs,
            cfg,
        }
    }

    /// Pipeline over one store that serves both records and blobs, with
    /// every store call bounded by `storage.timeout_ms`.
    pub fn with_store<S>(cfg: Config, store: S) -> Result<Self>
    where
        S: KeyValueStore + BlobStore + Clone + 'static,
    {
        let timed = TimedStore::new(store, Duration::from_millis(cfg.storage.timeout_ms));
        let generator: Arc<dyn TextGenerator> = if cfg.llm.enabled {
            Arc::new(HttpTextGenerator::new(cfg.llm.clone())?)
        } else {
            Arc::new(DisabledTextGenerator)
        };
        Ok(Self::new(cfg, Arc::new(timed.clone()), Arc::new(timed), generator))
    }

    /// In-process pipeline with no text generation.
    pub fn in_memory(cfg: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(cfg, store.clone(), store, Arc::new(DisabledTextGenerator))
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Model state snapshot for one run.
    pub async fn state(&self) -> Result<ModelState> {
        self.states.load(&self.cfg.learning.state_key).await
    }

    /// Score a batch. Per-signal failures are reported, not fatal; an empty
    /// batch or a failed record write fails the call.
    #[instrument(skip_all, fields(signals = signals.len()))]
    pub async fn score_signals(&self, signals: Vec<Signal>) -> Result<ScoreReport> {
        if signals.is_empty() {
            return Err(Error::ValidationError("no signals to score".into()));
        }
        let start = Instant::now();
        let state = self.state().await?;
        let outcome = self.scoring.score_batch(&signals, &state).await;

        let records = outcome
            .scored
            .iter()
            .map(|s| Ok((keys::signal(&s.signal.id), serde_json::to_value(s)?)))
            .collect::<Result<Vec<_>>>()?;
        if !records.is_empty() {
            self.store.batch_put(&records).await?;
        }

        let batch_id = uuid::Uuid::new_v4().to_string();
        let duration_ms = start.elapsed().as_millis() as u64;
        let archived = if self.cfg.scoring.archive_batches {
            match self.archive(&batch_id, &outcome.scored, outcome.errors, duration_ms).await {
                | Ok(()) => true,
                | Err(e) => {
                    warn!(batch_id = %batch_id, error = %e, "batch archival failed");
                    false
                }
            }
        } else {
            false
        };

        info!(
            scored = outcome.scored.len(),
            errors = outcome.errors,
            archived,
            duration_ms,
            "signal batch scored"
        );
        Ok(ScoreReport {
            batch_id,
            scored_signals: outcome.scored,
            failures: outcome.failures,
            archived,
            duration_ms,
        })
    }

    async fn archive(
        &self,
        batch_id: &str,
        scored: &[ScoredSignal],
        errors: usize,
        duration_ms: u64,
    ) -> Result<()> {
        let now = Utc::now();
        let body = json!({
            "batch_id": batch_id,
            "created_at": now,
            "metadata": {
                "processed": scored.len(),
                "errors": errors,
                "duration_ms": duration_ms,
            },
            "scored_signals": scored,
        });
        let bytes = serde_json::to_vec(&body)?;
        self.blobs.put_blob(&keys::feature_batch(now, batch_id), bytes).await
    }

    /// Risk assessment on the blocking pool; Monte Carlo is CPU-bound.
    #[instrument(skip_all, fields(assets = req.assets.len()))]
    pub async fn assess_risk(&self, req: RiskRequest) -> Result<RiskAssessment> {
        let state = self.state().await?;
        let risk = self.risk.clone();
        tokio::task::spawn_blocking(move || {
            risk.assess(&req.assets, req.size_pct, req.horizon_days, &req.market, &state)
        })
        .await?
    }

    /// Synthesize and persist a proposal.
    #[instrument(skip_all, fields(timeframe = %req.timeframe))]
    pub async fn synthesize_proposal(&self, req: ProposeRequest) -> Result<Synthesis> {
        let state = self.state().await?;
        let synthesis = self
            .synthesizer
            .synthesize(&req.scored_signals, &req.assets, &req.timeframe, &req.market, &state)
            .await?;
        put_record(self.store.as_ref(), &keys::proposal(&synthesis.proposal.id), &synthesis.proposal)
            .await?;
        Ok(synthesis)
    }

    /// Decide on a proposal. The decision record is created exactly once per
    /// proposal; the decided proposal is written after it.
    #[instrument(skip_all, fields(proposal_id = %proposal.id))]
    pub async fn decide(&self, mut proposal: Proposal, ctx: DecisionContext) -> Result<Decision> {
        proposal.validate()?;
        let key = keys::decision(&proposal.id);
        if self.store.get(&key).await?.is_some() {
            return Err(already_decided(&proposal.id));
        }
        let state = self.state().await?;
        let decision = decide(&proposal, &state.active_rules(), &ctx, &self.cfg.decision);
        proposal.mark_decided(decision.created_at)?;

        let value = serde_json::to_value(&decision)?;
        if !self.store.compare_and_swap(&key, None, &value).await? {
            warn!("decision written concurrently for the same proposal");
            return Err(already_decided(&proposal.id));
        }
        put_record(self.store.as_ref(), &keys::proposal(&proposal.id), &proposal).await?;

        increment_counter!(DECISIONS, "action" => decision.action.as_str());
        info!(
            decision_id = %decision.id,
            action = decision.action.as_str(),
            confidence = decision.confidence,
            "proposal decided"
        );
        Ok(decision)
    }

    #[instrument(skip_all, fields(proposal_id = %proposal.id, outcome_id = %outcome.id))]
    pub async fn evaluate_outcome(&self, proposal: &Proposal, outcome: &Outcome) -> Result<Evaluation> {
        self.learning.evaluate(proposal, outcome).await
    }
}

fn already_decided(proposal_id: &str) -> Error {
    Error::ValidationError(format!("proposal {} already has a decision", proposal_id))
}
