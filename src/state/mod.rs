//! Versioned model state shared across pipeline runs.
//!
//! A run reads one [`ModelState`] snapshot up front and passes it by value
//! (or reference) through every stage. Only the learning loop writes it
//! back, through [`ModelStateRepository::update`], which applies a blend
//! function under an optimistic compare-and-swap on the stored record.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::increment_counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::decision::rules::{default_rules, DecisionRule};
use crate::metrics::STATE_WRITE_RETRIES;
use crate::persistence::{keys, KeyValueStore};
use crate::utils::error::{Error, Result};

/// Risk-parameter names and their starting values. Each scales one raw risk
/// component onto `[0, 1]` before the overall combination.
pub const DEFAULT_RISK_PARAMETERS: [(&str, f64); 5] = [
    ("var_scale", 5.0),
    ("cvar_scale", 4.0),
    ("volatility_scale", 1.0),
    ("correlation_scale", 1.0),
    ("liquidity_scale", 1.0),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub key: String,
    /// Bumped on every accepted write; 0 means never persisted.
    pub version: u64,
    /// Trust weight per signal source; absent means 1.0.
    #[serde(default)]
    pub signal_weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub risk_parameters: BTreeMap<String, f64>,
    /// Rule set with per-rule effectiveness.
    #[serde(default)]
    pub rules: Vec<DecisionRule>,
    pub updated_at: DateTime<Utc>,
}

impl ModelState {
    /// Fresh state with default risk parameters and rules.
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            version: 0,
            signal_weights: BTreeMap::new(),
            risk_parameters: DEFAULT_RISK_PARAMETERS
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            rules: default_rules(),
            updated_at: Utc::now(),
        }
    }

    pub fn source_weight(&self, source: &str) -> f64 {
        self.signal_weights.get(source).copied().unwrap_or(1.0)
    }

    /// A risk parameter, falling back to its default.
    pub fn risk_parameter(&self, name: &str) -> f64 {
        self.risk_parameters.get(name).copied().unwrap_or_else(|| {
            DEFAULT_RISK_PARAMETERS
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| *v)
                .unwrap_or(1.0)
        })
    }

    /// Rules to evaluate: the persisted set, or the defaults when none are stored.
    pub fn active_rules(&self) -> Vec<DecisionRule> {
        if self.rules.is_empty() {
            default_rules()
        } else {
            self.rules.clone()
        }
    }
}

/// Load and CAS-write [`ModelState`] records.
#[derive(Clone)]
pub struct ModelStateRepository {
    store: Arc<dyn KeyValueStore>,
    max_attempts: u32,
}

impl ModelStateRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, max_attempts: u32) -> Self {
        Self { store, max_attempts: max_attempts.max(1) }
    }

    /// Stored state, or a fresh default if none exists. Store errors propagate.
    pub async fn load(&self, key: &str) -> Result<ModelState> {
        Ok(self.load_raw(key).await?.1)
    }

    async fn load_raw(&self, key: &str) -> Result<(Option<serde_json::Value>, ModelState)> {
        let raw = self.store.get(&keys::model_state(key)).await?;
        let state = match &raw {
            | Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
                Error::PersistenceError(format!("corrupt model state '{}': {}", key, e))
            })?,
            | None => ModelState::new(key),
        };
        Ok((raw, state))
    }

    /// Read-modify-write with optimistic concurrency. `blend` is re-applied
    /// to a fresh read after every lost race; after `max_attempts` losses the
    /// call fails with [`Error::StateConflict`].
    pub async fn update<F>(&self, key: &str, mut blend: F) -> Result<ModelState>
    where
        F: FnMut(&mut ModelState) + Send,
    {
        let record_key = keys::model_state(key);
        let mut last_version = 0;
        for attempt in 1..=self.max_attempts {
            let (raw, mut state) = self.load_raw(key).await?;
            let expected = state.version;
            last_version = expected;

            blend(&mut state);
            state.key = key.to_string();
            state.version = expected + 1;
            state.updated_at = Utc::now();

            let new = serde_json::to_value(&state)?;
            if self.store.compare_and_swap(&record_key, raw.as_ref(), &new).await? {
                debug!(key, version = state.version, attempt, "model state written");
                return Ok(state);
            }
            increment_counter!(STATE_WRITE_RETRIES);
            warn!(key, attempt, "model state changed underneath us, retrying");
        }

        let found = self.load(key).await.map(|s| s.version).unwrap_or(last_version);
        Err(Error::StateConflict { key: key.to_string(), expected: last_version, found })
    }
}
