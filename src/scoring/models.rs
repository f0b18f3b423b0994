//! Dimension scorers.
//!
//! Two families: [`HeuristicScorer`] derives scores from the raw heuristics
//! the ingestion adapter attached, and [`LlmScorer`] asks the text-generation
//! collaborator for a structured judgement. Both take the shared
//! [`FeatureVector`] and nothing else.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Attribution, Dimension, Factor, ScoreResult};
use crate::llm::{parse_json_reply, TextGenerator};
use crate::signal::FeatureVector;
use crate::utils::clamp01;
use crate::utils::error::{Error, Result};

/// One independently invokable model.
#[async_trait]
pub trait DimensionScorer: Send + Sync {
    fn dimension(&self) -> Dimension;
    async fn score(&self, features: &FeatureVector) -> Result<ScoreResult>;
}

fn ranked(mut factors: Vec<Factor>) -> Vec<Factor> {
    factors.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));
    factors
}

fn validated(dim: Dimension, result: ScoreResult) -> Result<ScoreResult> {
    let (lo, hi) = dim.range();
    if !result.score.is_finite() || result.score < lo || result.score > hi {
        return Err(Error::DataError(format!(
            "{} score {} outside [{}, {}]",
            dim, result.score, lo, hi
        )));
    }
    if !result.confidence.is_finite() || !(0.0..=1.0).contains(&result.confidence) {
        return Err(Error::DataError(format!(
            "{} confidence {} outside [0, 1]",
            dim, result.confidence
        )));
    }
    Ok(result)
}

/// Scores from the raw adapter heuristics; no external calls.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicScorer {
    dimension: Dimension,
}

impl HeuristicScorer {
    pub fn new(dimension: Dimension) -> Self {
        Self { dimension }
    }

    /// One scorer per dimension.
    pub fn all() -> Vec<Arc<dyn DimensionScorer>> {
        Dimension::ALL
            .iter()
            .map(|d| Arc::new(HeuristicScorer::new(*d)) as Arc<dyn DimensionScorer>)
            .collect()
    }

    fn compute(&self, f: &FeatureVector) -> (f64, f64, Vec<Factor>) {
        match self.dimension {
            | Dimension::Sentiment => {
                let s = f.sentiment;
                let factors = vec![
                    Factor::new("market_sentiment", s),
                    Factor::new("tone", s.abs()),
                ];
                (s, clamp01(0.5 + 0.4 * s.abs()), factors)
            }
            | Dimension::Relevance => {
                let mention =
                    if f.content.to_uppercase().contains(&f.asset) { 1.0 } else { 0.0 };
                let score = clamp01(0.8 * f.relevance + 0.2 * mention);
                let factors = vec![
                    Factor::new("investment_relevance", f.relevance),
                    Factor::new("direct_mention", mention),
                ];
                (score, 0.6, factors)
            }
            | Dimension::Novelty => {
                (f.novelty, 0.5, vec![Factor::new("uniqueness", f.novelty)])
            }
            | Dimension::Credibility => {
                (f.credibility, 0.6, vec![Factor::new("source_reliability", f.credibility)])
            }
            | Dimension::Virality => {
                let engagement = (f.entity_count as f64 / 5.0).min(1.0);
                let shareability = (f.content_length as f64 / 280.0).min(1.0);
                let score = clamp01(0.5 * engagement + 0.5 * shareability);
                let factors = vec![
                    Factor::new("engagement_potential", engagement),
                    Factor::new("shareability", shareability),
                ];
                (score, 0.4, factors)
            }
        }
    }
}

#[async_trait]
impl DimensionScorer for HeuristicScorer {
    fn dimension(&self) -> Dimension {
        self.dimension
    }

    async fn score(&self, features: &FeatureVector) -> Result<ScoreResult> {
        let (score, confidence, factors) = self.compute(features);
        validated(
            self.dimension,
            ScoreResult {
                score,
                confidence,
                attribution: Attribution {
                    top_factors: ranked(factors),
                    explanation: format!("{} heuristic from adapter-supplied features", self.dimension),
                    confidence,
                },
                method: format!("{}_heuristic", self.dimension),
            },
        )
    }
}

#[derive(Debug, Deserialize)]
struct ModelReply {
    score: f64,
    confidence: f64,
    #[serde(default)]
    attribution: BTreeMap<String, f64>,
}

/// Scores via the text-generation collaborator.
pub struct LlmScorer {
    dimension: Dimension,
    generator: Arc<dyn TextGenerator>,
}

impl LlmScorer {
    pub fn new(dimension: Dimension, generator: Arc<dyn TextGenerator>) -> Self {
        Self { dimension, generator }
    }

    pub fn all(generator: Arc<dyn TextGenerator>) -> Vec<Arc<dyn DimensionScorer>> {
        Dimension::ALL
            .iter()
            .map(|d| Arc::new(LlmScorer::new(*d, generator.clone())) as Arc<dyn DimensionScorer>)
            .collect()
    }

    fn prompt(&self, f: &FeatureVector) -> String {
        let (lo, hi) = self.dimension.range();
        let factors = self
            .dimension
            .factors()
            .iter()
            .map(|n| format!("    \"{}\": number", n))
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            "Analyze the {dim} of the following text about {asset} and return a {dim} score \
             between {lo} and {hi}.\n\nText: \"{content}\"\nSource: {source}\n\n\
             Return a JSON object with:\n{{\n  \"score\": number between {lo} and {hi},\n  \
             \"confidence\": number between 0 and 1,\n  \"attribution\": {{\n{factors}\n  }}\n}}",
            dim = self.dimension,
            asset = f.asset,
            content = f.content,
            source = f.source,
            lo = lo,
            hi = hi,
            factors = factors,
        )
    }
}

#[async_trait]
impl DimensionScorer for LlmScorer {
    fn dimension(&self) -> Dimension {
        self.dimension
    }

    async fn score(&self, features: &FeatureVector) -> Result<ScoreResult> {
        let reply = self.generator.generate(&self.prompt(features)).await?;
        let parsed: ModelReply = parse_json_reply(&reply)?;
        let factors = parsed
            .attribution
            .into_iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| Factor::new(k, v))
            .collect();
        validated(
            self.dimension,
            ScoreResult {
                score: parsed.score,
                confidence: parsed.confidence,
                attribution: Attribution {
                    top_factors: ranked(factors),
                    explanation: format!(
                        "{} analysis based on {}",
                        self.dimension,
                        self.dimension.factors().join(", ")
                    ),
                    confidence: parsed.confidence,
                },
                method: format!("{}_model", self.dimension),
            },
        )
    }
}
