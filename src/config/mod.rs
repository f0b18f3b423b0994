//! Configuration module for the decision pipeline

use crate::utils::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration file version
    pub version: String,

    /// Signal scoring configuration
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Risk engine configuration
    #[serde(default)]
    pub risk: RiskConfig,

    /// Proposal synthesis configuration
    #[serde(default)]
    pub proposal: ProposalConfig,

    /// Decision engine configuration
    #[serde(default)]
    pub decision: DecisionConfig,

    /// Learning loop configuration
    #[serde(default)]
    pub learning: LearningConfig,

    /// Text-generation collaborator
    #[serde(default)]
    pub llm: LlmConfig,

    /// Table/blob store location
    #[serde(default)]
    pub storage: StorageConfig,
}

/// How dimension scores are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Ask the text-generation collaborator for every dimension.
    Llm,
    /// Derive dimension scores from the signal's raw heuristics.
    Heuristic,
}

/// Signal scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub mode: ScoringMode,

    /// Fusion weight per dimension (renormalised over surviving dimensions)
    pub dimension_weights: BTreeMap<String, f64>,

    /// Maximum number of signals scored concurrently within one batch
    #[serde(default = "default_max_concurrent_signals")]
    pub max_concurrent_signals: usize,

    /// Archive each scored batch to the blob store
    #[serde(default = "default_true")]
    pub archive_batches: bool,
}

/// Risk engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// VaR/CVaR confidence level, e.g. 0.95
    pub confidence_level: f64,

    /// Number of Monte Carlo paths per simulation
    pub monte_carlo_paths: usize,

    /// Fixed seed for reproducible Monte Carlo runs (random when unset)
    #[serde(default)]
    pub monte_carlo_seed: Option<u64>,

    /// Number of independent chunks the simulation is split into
    #[serde(default = "default_parallel_chunks")]
    pub parallel_chunks: usize,

    /// Symbols treated as highly liquid
    pub major_assets: Vec<String>,

    /// Liquidity multiplier applied per major asset
    pub major_asset_factor: f64,

    /// Liquidity multiplier applied per minor asset
    pub minor_asset_factor: f64,

    /// Position size (fraction of equity) above which liquidity is penalised
    pub large_position_threshold: f64,

    /// Liquidity multiplier for positions above the threshold
    pub large_position_factor: f64,
}

/// Proposal synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalConfig {
    /// Number of top-ranked signals used for consensus
    pub top_signals: usize,

    /// Kelly inputs: historical win rate, average win and average loss (fractions)
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,

    /// Kelly output bounds
    pub min_size_pct: f64,
    pub max_size_pct: f64,

    /// Annual risk-free rate used for the ex-ante Sharpe estimate
    pub risk_free_rate: f64,

    /// Volatility assumed when the risk assessment has none
    pub default_volatility: f64,
}

/// Decision engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Confidence reported for rejections
    pub reject_confidence: f64,

    /// Upper bound on confidence for non-reject outcomes
    pub max_confidence: f64,

    /// Size multiplier applied when a reduce_size rule matches
    pub reduce_size_factor: f64,

    /// Additional multiplier applied when a diversify rule matches
    pub diversify_factor: f64,
}

/// Learning loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Model-state key read at the start and written at the end of a cycle
    pub state_key: String,

    /// Annual risk-free rate for realized Sharpe
    pub risk_free_rate: f64,

    /// Annualisation factor (days per year)
    pub days_in_year: f64,

    /// Realized volatility assumed when the outcome carries none
    pub default_realized_volatility: f64,

    /// Signal performance band outside of which source weights move
    pub performance_band: f64,
    pub weight_boost: f64,
    pub weight_decay: f64,

    /// Bounds on the risk-parameter adjustment ratio
    pub risk_adjustment_min: f64,
    pub risk_adjustment_max: f64,

    /// Smoothing factor kept from the previous rule effectiveness
    pub effectiveness_smoothing: f64,

    /// Optimistic write attempts before giving up on a contended state key
    pub max_write_attempts: u32,
}

/// Text-generation collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// When false every prompt fails fast and callers use their fallbacks
    pub enabled: bool,

    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,

    /// API key (usually supplied through the environment)
    #[serde(default)]
    pub api_key: Option<String>,

    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,

    /// Timeout for a single generation in seconds
    pub timeout_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the embedded database (user data dir when unset)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Timeout for a single store call in milliseconds
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            scoring: ScoringConfig::default(),
            risk: RiskConfig::default(),
            proposal: ProposalConfig::default(),
            decision: DecisionConfig::default(),
            learning: LearningConfig::default(),
            llm: LlmConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let dimension_weights = [
            ("sentiment", 0.25),
            ("relevance", 0.25),
            ("novelty", 0.2),
            ("credibility", 0.2),
            ("virality", 0.1),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            mode: ScoringMode::Heuristic,
            dimension_weights,
            max_concurrent_signals: default_max_concurrent_signals(),
            archive_batches: true,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            monte_carlo_paths: 10_000,
            monte_carlo_seed: None,
            parallel_chunks: default_parallel_chunks(),
            major_assets: ["BTC", "ETH", "AAPL", "GOOGL", "MSFT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            major_asset_factor: 0.9,
            minor_asset_factor: 0.7,
            large_position_threshold: 0.1,
            large_position_factor: 0.8,
        }
    }
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            top_signals: 10,
            win_rate: 0.6,
            avg_win: 0.15,
            avg_loss: 0.08,
            min_size_pct: 0.01,
            max_size_pct: 0.10,
            risk_free_rate: 0.02,
            default_volatility: 0.2,
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            reject_confidence: 0.9,
            max_confidence: 0.8,
            reduce_size_factor: 0.5,
            diversify_factor: 0.8,
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            state_key: "default".to_string(),
            risk_free_rate: 0.02,
            days_in_year: 365.0,
            default_realized_volatility: 0.2,
            performance_band: 0.1,
            weight_boost: 1.1,
            weight_decay: 0.9,
            risk_adjustment_min: 0.5,
            risk_adjustment_max: 2.0,
            effectiveness_smoothing: 0.9,
            max_write_attempts: 5,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            timeout_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: None, timeout_ms: 5_000 }
    }
}

// --------- Helper default functions for serde ---------
fn default_max_concurrent_signals() -> usize {
    16
}
fn default_parallel_chunks() -> usize {
    8
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Serialize default config to TOML string
    pub fn default_toml() -> Result<String> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {:?}: {}", path.as_ref(), e))
        })?;
        let mut cfg: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;
        cfg.merge_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Save the configuration to a file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }
        std::fs::write(path, content).map_err(|e| {
            Error::ConfigError(format!("Failed to write config file {:?}: {}", path, e))
        })?;
        Ok(())
    }

    /// Validate the configuration for reasonable values
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::ConfigError("Config version must be set (e.g., '0.1.0')".into()));
        }
        if self.scoring.dimension_weights.values().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::ConfigError("dimension weights must be finite and >= 0".into()));
        }
        if self.scoring.dimension_weights.values().sum::<f64>() <= 0.0 {
            return Err(Error::ConfigError("dimension weights must not all be zero".into()));
        }
        if self.scoring.max_concurrent_signals == 0 {
            return Err(Error::ConfigError("max_concurrent_signals must be > 0".into()));
        }
        let c = self.risk.confidence_level;
        if !(c > 0.5 && c < 1.0) {
            return Err(Error::ConfigError(format!(
                "risk.confidence_level must be in (0.5, 1.0), got {}",
                c
            )));
        }
        if self.risk.monte_carlo_paths < 100 {
            return Err(Error::ConfigError("risk.monte_carlo_paths must be >= 100".into()));
        }
        if self.risk.parallel_chunks == 0 {
            return Err(Error::ConfigError("risk.parallel_chunks must be > 0".into()));
        }
        if self.proposal.top_signals == 0 {
            return Err(Error::ConfigError("proposal.top_signals must be > 0".into()));
        }
        if self.proposal.min_size_pct > self.proposal.max_size_pct {
            return Err(Error::ConfigError("proposal.min_size_pct exceeds max_size_pct".into()));
        }
        if !(0.0..=1.0).contains(&self.learning.effectiveness_smoothing) {
            return Err(Error::ConfigError(
                "learning.effectiveness_smoothing must be within [0, 1]".into(),
            ));
        }
        if self.learning.risk_adjustment_min > self.learning.risk_adjustment_max {
            return Err(Error::ConfigError("risk adjustment bounds are inverted".into()));
        }
        if self.learning.max_write_attempts == 0 {
            return Err(Error::ConfigError("learning.max_write_attempts must be > 0".into()));
        }
        if self.llm.enabled && self.llm.endpoint.trim().is_empty() {
            return Err(Error::ConfigError("llm.endpoint must be set when llm is enabled".into()));
        }
        if self.llm.timeout_secs == 0 || self.storage.timeout_ms == 0 {
            return Err(Error::ConfigError("timeouts must be > 0".into()));
        }
        Ok(())
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        // Try to load from current directory
        if std::path::Path::new("tradeloop.toml").exists() {
            return Self::from_file("tradeloop.toml");
        }

        // Try to load from user config directory
        if let Some(mut path) = dirs::config_dir() {
            path.push("tradeloop");
            path.push("config.toml");
            if path.exists() {
                return Self::from_file(path);
            }
        }

        // Return default config if no config file found
        let mut config = Self::default();
        config.merge_env()?;
        Ok(config)
    }

    /// Merge environment variables into the configuration
    pub fn merge_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = env::var("TRADELOOP_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
            self.llm.enabled = true;
        }

        if let Ok(api_key) = env::var("TRADELOOP_LLM_API_KEY") {
            self.llm.api_key = Some(api_key);
        }

        if let Ok(model) = env::var("TRADELOOP_LLM_MODEL") {
            self.llm.model = model;
        }

        if let Ok(dir) = env::var("TRADELOOP_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }

        if let Ok(seed) = env::var("TRADELOOP_MC_SEED") {
            let seed = seed
                .parse::<u64>()
                .map_err(|e| Error::ConfigError(format!("TRADELOOP_MC_SEED: {}", e)))?;
            self.risk.monte_carlo_seed = Some(seed);
        }

        Ok(())
    }

    /// Resolve the embedded database directory.
    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(|| {
            let mut p = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
            p.push("tradeloop");
            p
        })
    }
}
