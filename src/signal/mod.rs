//! Signal records and the shared feature-extraction step.
//!
//! Signals arrive already extracted by upstream ingestion adapters. Every
//! dimension scorer works off the same [`FeatureVector`], so validation
//! happens once here and a malformed signal fails before any scorer runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::{Error, Result};

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_language() -> String {
    "en".to_string()
}

/// Heuristic scores attached by the ingestion adapter, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawScores {
    /// In `[-1, 1]`.
    #[serde(default)]
    pub sentiment: Option<f64>,
    #[serde(default)]
    pub relevance: Option<f64>,
    #[serde(default)]
    pub novelty: Option<f64>,
    #[serde(default)]
    pub credibility: Option<f64>,
}

/// One timestamped, sourced observation about an asset. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(default = "new_id")]
    pub id: String,
    pub asset: String,
    pub content: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub raw: RawScores,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
    /// Reference price of the asset when the signal was observed.
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Signal {
    pub fn new(
        asset: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            asset: asset.into(),
            content: content.into(),
            source: source.into(),
            timestamp,
            raw: RawScores::default(),
            entities: Vec::new(),
            language: default_language(),
            price: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_raw(mut self, raw: RawScores) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = entities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }
}

/// Normalised inputs shared by all dimension scorers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub asset: String,
    pub content: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub language: String,
    /// `[-1, 1]`, 0 when the adapter supplied none.
    pub sentiment: f64,
    pub relevance: f64,
    pub novelty: f64,
    pub credibility: f64,
    pub entity_count: usize,
    pub content_length: usize,
}

fn checked(name: &str, value: Option<f64>, lo: f64, hi: f64, default: f64) -> Result<f64> {
    match value {
        | None => Ok(default),
        | Some(v) if !v.is_finite() => {
            Err(Error::ValidationError(format!("raw {} score is not finite", name)))
        }
        | Some(v) if v < lo || v > hi => Err(Error::ValidationError(format!(
            "raw {} score {} outside [{}, {}]",
            name, v, lo, hi
        ))),
        | Some(v) => Ok(v),
    }
}

/// Validate a signal and build its feature vector.
pub fn extract_features(signal: &Signal) -> Result<FeatureVector> {
    if signal.asset.trim().is_empty() {
        return Err(Error::ValidationError(format!("signal {} has no asset", signal.id)));
    }
    if signal.content.trim().is_empty() {
        return Err(Error::ValidationError(format!("signal {} has empty content", signal.id)));
    }
    if signal.source.trim().is_empty() {
        return Err(Error::ValidationError(format!("signal {} has no source", signal.id)));
    }
    if let Some(p) = signal.price {
        if !p.is_finite() || p <= 0.0 {
            return Err(Error::ValidationError(format!(
                "signal {} has invalid price {}",
                signal.id, p
            )));
        }
    }

    Ok(FeatureVector {
        asset: signal.asset.trim().to_uppercase(),
        content: signal.content.clone(),
        source: signal.source.clone(),
        timestamp: signal.timestamp,
        language: signal.language.clone(),
        sentiment: checked("sentiment", signal.raw.sentiment, -1.0, 1.0, 0.0)?,
        relevance: checked("relevance", signal.raw.relevance, 0.0, 1.0, 0.5)?,
        novelty: checked("novelty", signal.raw.novelty, 0.0, 1.0, 0.5)?,
        credibility: checked("credibility", signal.raw.credibility, 0.0, 1.0, 0.5)?,
        entity_count: signal.entities.len(),
        content_length: signal.content.chars().count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sample() -> Signal {
        Signal::new("btc", "ETF inflows keep climbing", "news", Utc::now())
    }

    #[test]
    fn missing_raw_scores_take_neutral_defaults() {
        let f = extract_features(&sample()).unwrap();
        assert_eq!(f.asset, "BTC");
        assert_eq!(f.sentiment, 0.0);
        assert_eq!(f.relevance, 0.5);
        assert_eq!(f.content_length, "ETF inflows keep climbing".len());
    }

    #[test]
    fn empty_content_is_rejected() {
        let mut s = sample();
        s.content = "   ".into();
        assert_matches!(extract_features(&s), Err(Error::ValidationError(_)));
    }

    #[test]
    fn out_of_range_raw_score_is_rejected() {
        let s = sample().with_raw(RawScores { sentiment: Some(1.5), ..Default::default() });
        assert_matches!(extract_features(&s), Err(Error::ValidationError(_)));

        let s = sample().with_raw(RawScores { novelty: Some(f64::NAN), ..Default::default() });
        assert_matches!(extract_features(&s), Err(Error::ValidationError(_)));
    }

    #[test]
    fn deserializes_with_defaults() {
        let s: Signal = serde_json::from_str(
            r#"{"asset":"ETH","content":"upgrade shipped","source":"x","timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(s.language, "en");
        assert!(!s.id.is_empty());
        assert!(s.entities.is_empty());
    }
}
