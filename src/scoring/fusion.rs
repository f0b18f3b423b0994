//! Ensemble fusion of per-dimension scores.
//!
//! Four sub-results are computed over the surviving dimensions (raw scores
//! as each model reported them, weights renormalised to sum to 1) and
//! combined with fixed weights:
//!
//! | sub-result           | weight |
//! |----------------------|--------|
//! | weighted average     | 0.3    |
//! | confidence-weighted  | 0.3    |
//! | Bayesian posterior   | 0.2    |
//! | meta                 | 0.2    |

use std::collections::{BTreeMap, HashMap};

use super::{Attribution, Dimension, Direction, Factor, FusedScore, ScoreResult};
use crate::utils::clamp01;
use crate::utils::error::{Error, Result};

const METHOD_WEIGHTS: [f64; 4] = [0.3, 0.3, 0.2, 0.2];
const PRIOR: f64 = 0.5;
const TOP_FACTORS: usize = 5;

/// Fuse the surviving dimension results. `weights` is keyed by dimension name;
/// a dimension missing from it gets an equal share.
pub fn fuse(
    scores: &BTreeMap<Dimension, ScoreResult>,
    weights: &BTreeMap<String, f64>,
) -> Result<FusedScore> {
    if scores.is_empty() {
        return Err(Error::DataError("nothing to fuse".into()));
    }

    let equal = 1.0 / scores.len() as f64;
    let raw: Vec<(f64, f64, f64)> = scores
        .iter()
        .map(|(dim, r)| {
            let w = weights.get(dim.as_str()).copied().unwrap_or(equal).max(0.0);
            (r.score, clamp01(r.confidence), w)
        })
        .collect();
    let total_w: f64 = raw.iter().map(|(_, _, w)| w).sum();
    let parts: Vec<(f64, f64, f64)> = raw
        .into_iter()
        .map(|(s, c, w)| (s, c, if total_w > 0.0 { w / total_w } else { equal }))
        .collect();

    let weighted: f64 = parts.iter().map(|(s, _, w)| s * w).sum();

    let wc: f64 = parts.iter().map(|(_, c, w)| c * w).sum();
    let confidence_weighted = if wc > 0.0 {
        parts.iter().map(|(s, c, w)| s * c * w).sum::<f64>() / wc
    } else {
        weighted
    };

    // Evidence must be a probability; a negative sentiment counts as none.
    let likelihood: f64 = parts.iter().map(|(s, _, w)| clamp01(*s).powf(*w)).product();
    let denom = likelihood * PRIOR + (1.0 - likelihood) * (1.0 - PRIOR);
    let bayesian = if denom > 0.0 { likelihood * PRIOR / denom } else { PRIOR };

    // Not renormalised by confidence: low-confidence inputs pull toward 0.
    let meta: f64 = parts.iter().map(|(s, c, w)| s * c * w).sum();

    let subs = [weighted, confidence_weighted, bayesian, meta];
    let total: f64 = METHOD_WEIGHTS.iter().sum();
    let score = clamp01(subs.iter().zip(METHOD_WEIGHTS).map(|(s, w)| s * w).sum::<f64>() / total);

    let confidence =
        clamp01(scores.values().map(|r| r.confidence).sum::<f64>() / scores.len() as f64);

    Ok(ScoreResult {
        score,
        confidence,
        attribution: Attribution {
            top_factors: top_factors(scores.values()),
            explanation: format!("Ensemble fusion based on {} models", scores.len()),
            confidence,
        },
        method: "ensemble_fusion".to_string(),
    })
}

/// Sum contributions per factor name across models and keep the largest five.
fn top_factors<'a>(results: impl Iterator<Item = &'a ScoreResult>) -> Vec<Factor> {
    let mut order: Vec<String> = Vec::new();
    let mut sums: HashMap<String, f64> = HashMap::new();
    for f in results.flat_map(|r| r.attribution.top_factors.iter()) {
        if !sums.contains_key(&f.factor) {
            order.push(f.factor.clone());
        }
        *sums.entry(f.factor.clone()).or_insert(0.0) += f.contribution;
    }
    let mut out: Vec<Factor> = order
        .into_iter()
        .map(|name| {
            let contribution = sums[&name];
            Factor { factor: name, contribution, direction: Direction::of(contribution) }
        })
        .collect();
    // Stable sort keeps first-seen order among ties.
    out.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));
    out.truncate(TOP_FACTORS);
    out
}

/// Scale a fused score around neutral by a source trust weight.
pub fn apply_trust(fused: &mut FusedScore, trust: f64) {
    if (trust - 1.0).abs() < f64::EPSILON {
        return;
    }
    fused.score = clamp01(0.5 + (fused.score - 0.5) * trust.max(0.0));
}
