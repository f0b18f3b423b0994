//! Per-signal fan-out over the dimension scorers and per-batch task group.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use metrics::increment_counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::fusion::{apply_trust, fuse};
use super::models::{DimensionScorer, HeuristicScorer, LlmScorer};
use super::ScoredSignal;
use crate::config::{ScoringConfig, ScoringMode};
use crate::llm::TextGenerator;
use crate::metrics::{DIMENSION_FAILURES, SIGNALS_FAILED, SIGNALS_SCORED};
use crate::signal::{extract_features, Signal};
use crate::state::ModelState;
use crate::utils::error::{Error, Result};

/// A signal that could not be scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub signal_id: String,
    pub code: String,
    pub message: String,
}

/// Result of scoring a batch. `scored` keeps input order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub scored: Vec<ScoredSignal>,
    pub errors: usize,
    pub failures: Vec<ItemFailure>,
}

pub struct ScoringEngine {
    scorers: Vec<Arc<dyn DimensionScorer>>,
    cfg: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(cfg: ScoringConfig, scorers: Vec<Arc<dyn DimensionScorer>>) -> Self {
        Self { scorers, cfg }
    }

    /// Pick scorers for the configured mode.
    pub fn from_config(cfg: ScoringConfig, generator: Arc<dyn TextGenerator>) -> Self {
        let scorers = match cfg.mode {
            | ScoringMode::Heuristic => HeuristicScorer::all(),
            | ScoringMode::Llm => LlmScorer::all(generator),
        };
        Self::new(cfg, scorers)
    }

    pub fn heuristic(cfg: ScoringConfig) -> Self {
        Self::new(cfg, HeuristicScorer::all())
    }

    /// Score one signal. Fails only if feature extraction fails or every
    /// dimension scorer fails.
    #[instrument(skip_all, fields(signal_id = %signal.id, source = %signal.source))]
    pub async fn score(&self, signal: &Signal, state: &ModelState) -> Result<ScoredSignal> {
        let features = extract_features(signal)?;

        let futs = self.scorers.iter().map(|s| {
            let features = &features;
            async move { (s.dimension(), s.score(features).await) }
        });
        let results = join_all(futs).await;

        let mut scores = BTreeMap::new();
        let mut dropped = 0usize;
        for (dim, res) in results {
            match res {
                | Ok(r) => {
                    scores.insert(dim, r);
                }
                | Err(e) => {
                    dropped += 1;
                    increment_counter!(DIMENSION_FAILURES, "dimension" => dim.as_str());
                    debug!(dimension = %dim, error = %e, "dimension scorer failed");
                }
            }
        }
        if scores.is_empty() {
            return Err(Error::DataError(format!(
                "all {} dimension scorers failed",
                self.scorers.len()
            )));
        }

        let mut fused = fuse(&scores, &self.cfg.dimension_weights)?;
        apply_trust(&mut fused, state.source_weight(&signal.source));

        Ok(ScoredSignal {
            signal: signal.clone(),
            scores,
            fused,
            scored_at: Utc::now(),
            dropped_dimensions: dropped,
        })
    }

    /// Score a batch with at most `max_concurrent_signals` in flight. A failed
    /// signal is counted and reported; it never aborts its siblings.
    #[instrument(skip_all, fields(batch = signals.len()))]
    pub async fn score_batch(&self, signals: &[Signal], state: &ModelState) -> BatchOutcome {
        let limit = self.cfg.max_concurrent_signals.max(1);
        let results: Vec<(usize, Result<ScoredSignal>)> = stream::iter(signals.iter().enumerate())
            .map(|(i, s)| async move { (i, self.score(s, state).await) })
            .buffered(limit)
            .collect()
            .await;

        let mut out = BatchOutcome::default();
        for (i, res) in results {
            match res {
                | Ok(scored) => {
                    increment_counter!(SIGNALS_SCORED);
                    out.scored.push(scored);
                }
                | Err(e) => {
                    increment_counter!(SIGNALS_FAILED, "code" => e.code());
                    warn!(signal_id = %signals[i].id, error = %e, "signal failed");
                    out.errors += 1;
                    out.failures.push(ItemFailure {
                        signal_id: signals[i].id.clone(),
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::MockTextGenerator;
    use crate::scoring::Dimension;
    use crate::signal::RawScores;

    fn signal(i: usize) -> Signal {
        Signal::new("ETH", format!("ETH update {}", i), "news", Utc::now()).with_raw(RawScores {
            sentiment: Some(0.4),
            relevance: Some(0.8),
            novelty: Some(0.6),
            credibility: Some(0.7),
        })
    }

    #[tokio::test]
    async fn batch_isolates_failing_signals() {
        let engine = ScoringEngine::heuristic(Config::default().scoring);
        let state = ModelState::new("default");
        let mut batch: Vec<Signal> = (0..20).map(signal).collect();
        batch[3].content.clear();
        batch[11].asset.clear();

        let out = engine.score_batch(&batch, &state).await;
        assert_eq!(out.errors, 2);
        assert_eq!(out.scored.len(), 18);
        assert_eq!(out.failures[0].signal_id, batch[3].id);
        assert_eq!(out.failures[0].code, "invalid_request");
        // Input order survives.
        assert_eq!(out.scored[3].signal.id, batch[4].id);
    }

    #[tokio::test]
    async fn failed_dimension_is_dropped_not_zeroed() {
        let mut gen = MockTextGenerator::new();
        gen.expect_generate().returning(|prompt| {
            if prompt.contains("virality") {
                Err(Error::Timeout(10))
            } else {
                Ok(r#"{"score": 0.6, "confidence": 0.8}"#.to_string())
            }
        });
        let mut cfg = Config::default().scoring;
        cfg.mode = ScoringMode::Llm;
        let engine = ScoringEngine::from_config(cfg, Arc::new(gen));

        let scored = engine.score(&signal(0), &ModelState::new("default")).await.unwrap();
        assert_eq!(scored.dropped_dimensions, 1);
        assert!(!scored.scores.contains_key(&Dimension::Virality));
        assert_eq!(scored.scores.len(), 4);
    }

    #[tokio::test]
    async fn all_dimensions_failing_fails_the_signal() {
        let mut gen = MockTextGenerator::new();
        gen.expect_generate().returning(|_| Err(Error::TextGenerationError("down".into())));
        let mut cfg = Config::default().scoring;
        cfg.mode = ScoringMode::Llm;
        let engine = ScoringEngine::from_config(cfg, Arc::new(gen));
        assert!(engine.score(&signal(0), &ModelState::new("default")).await.is_err());
    }

    #[tokio::test]
    async fn source_trust_moves_score_away_from_neutral() {
        let engine = ScoringEngine::heuristic(Config::default().scoring);
        let base = engine.score(&signal(0), &ModelState::new("default")).await.unwrap();

        let mut trusted = ModelState::new("default");
        trusted.signal_weights.insert("news".into(), 1.5);
        let boosted = engine.score(&signal(0), &trusted).await.unwrap();

        let d0 = base.fused.score - 0.5;
        let d1 = boosted.fused.score - 0.5;
        assert!((d1 - 1.5 * d0).abs() < 1e-9);
    }
}
