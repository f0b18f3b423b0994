//! Scoring engine: five independent dimension scores per signal, fused into
//! one trust-weighted score.

mod engine;
pub mod fusion;
pub mod models;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signal::Signal;

pub use engine::{BatchOutcome, ItemFailure, ScoringEngine};
pub use fusion::fuse;
pub use models::{DimensionScorer, HeuristicScorer, LlmScorer};

/// A scoring dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Sentiment,
    Relevance,
    Novelty,
    Credibility,
    Virality,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Sentiment,
        Dimension::Relevance,
        Dimension::Novelty,
        Dimension::Credibility,
        Dimension::Virality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            | Dimension::Sentiment => "sentiment",
            | Dimension::Relevance => "relevance",
            | Dimension::Novelty => "novelty",
            | Dimension::Credibility => "credibility",
            | Dimension::Virality => "virality",
        }
    }

    /// Declared score range.
    pub fn range(&self) -> (f64, f64) {
        match self {
            | Dimension::Sentiment => (-1.0, 1.0),
            | _ => (0.0, 1.0),
        }
    }

    /// Map a score from this dimension's range onto `[0, 1]`.
    pub fn normalize(&self, score: f64) -> f64 {
        let (lo, hi) = self.range();
        crate::utils::clamp01((score - lo) / (hi - lo))
    }

    /// Attribution factors a model reports for this dimension.
    pub fn factors(&self) -> &'static [&'static str] {
        match self {
            | Dimension::Sentiment => &["tone", "emotion", "market_sentiment"],
            | Dimension::Relevance => {
                &["direct_mention", "market_context", "investment_relevance", "time_sensitivity"]
            }
            | Dimension::Novelty => {
                &["uniqueness", "breaking_news", "market_impact", "surprise_factor"]
            }
            | Dimension::Credibility => &[
                "source_reliability",
                "information_accuracy",
                "author_expertise",
                "factual_consistency",
            ],
            | Dimension::Virality => {
                &["shareability", "engagement_potential", "controversy_level", "meme_potential"]
            }
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Positive,
    Negative,
    Neutral,
}

impl Direction {
    pub fn of(value: f64) -> Self {
        if value > 0.0 {
            Direction::Positive
        } else if value < 0.0 {
            Direction::Negative
        } else {
            Direction::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub factor: String,
    pub contribution: f64,
    pub direction: Direction,
}

impl Factor {
    pub fn new(factor: impl Into<String>, contribution: f64) -> Self {
        Self { factor: factor.into(), contribution, direction: Direction::of(contribution) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    /// Ranked by contribution, largest first.
    pub top_factors: Vec<Factor>,
    pub explanation: String,
    pub confidence: f64,
}

/// Output of one model (or of fusion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub confidence: f64,
    pub attribution: Attribution,
    pub method: String,
}

/// Fusion output; same shape as a single model result.
pub type FusedScore = ScoreResult;

/// A signal together with its per-dimension and fused scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSignal {
    pub signal: Signal,
    pub scores: BTreeMap<Dimension, ScoreResult>,
    pub fused: FusedScore,
    pub scored_at: DateTime<Utc>,
    /// Dimensions whose scorer failed and were left out of fusion.
    #[serde(default)]
    pub dropped_dimensions: usize,
}

impl ScoredSignal {
    /// A dimension score normalised onto `[0, 1]`, if that scorer succeeded.
    pub fn normalized(&self, dim: Dimension) -> Option<f64> {
        self.scores.get(&dim).map(|r| dim.normalize(r.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_normalizes_from_signed_range() {
        assert_eq!(Dimension::Sentiment.normalize(-1.0), 0.0);
        assert_eq!(Dimension::Sentiment.normalize(0.0), 0.5);
        assert_eq!(Dimension::Sentiment.normalize(1.0), 1.0);
        assert_eq!(Dimension::Novelty.normalize(0.3), 0.3);
    }

    #[test]
    fn dimension_map_keys_serialize_as_names() {
        let mut m = BTreeMap::new();
        m.insert(Dimension::Virality, 1);
        assert_eq!(serde_json::to_string(&m).unwrap(), r#"{"virality":1}"#);
    }
}
