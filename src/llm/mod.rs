//! Text-generation collaborator.
//!
//! Thesis prose, decision-quality grading, insights and (in `llm` scoring
//! mode) the per-dimension model scores all come from an external
//! chat-completion service. Every call is bounded by a timeout, and callers
//! treat a timeout exactly like any other failure: they substitute their
//! fixed fallback.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{histogram, increment_counter};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::metrics::{TEXT_GENERATION_FALLBACKS, TEXT_GENERATION_MS};
use crate::utils::error::{Error, Result};

/// A service that turns a prompt into text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt`. Errors and timeouts are both `Err`.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct HttpTextGenerator {
    client: reqwest::Client,
    cfg: LlmConfig,
}

impl HttpTextGenerator {
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self { client, cfg })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.cfg.model,
            "temperature": self.cfg.temperature,
            "max_tokens": self.cfg.max_tokens,
            "messages": [
                { "role": "system", "content": "You are a helpful assistant that outputs JSON." },
                { "role": "user", "content": prompt },
            ],
        });

        let mut req = self.client.post(&self.cfg.endpoint).json(&body);
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::TextGenerationError(format!("http {}: {}", status, text)));
        }

        let v: Value = resp.json().await?;
        v.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::TextGenerationError("response carried no content".into()))
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let start = Instant::now();
        let limit = Duration::from_secs(self.cfg.timeout_secs);
        let out = with_timeout(limit, self.request(prompt)).await;
        histogram!(TEXT_GENERATION_MS, start.elapsed().as_millis() as f64);
        if let Err(e) = &out {
            warn!(model = %self.cfg.model, error = %e, "text generation failed");
        }
        out
    }
}

/// Always fails. Used when no text-generation service is configured so
/// every caller takes its fallback path.
#[derive(Debug, Clone, Default)]
pub struct DisabledTextGenerator;

#[async_trait]
impl TextGenerator for DisabledTextGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(Error::TextGenerationError("text generation is disabled".into()))
    }
}

/// Run `fut`, turning an elapsed deadline into [`Error::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        | Ok(res) => res,
        | Err(_) => Err(Error::Timeout(limit.as_millis() as u64)),
    }
}

/// Parse a JSON reply, tolerating a surrounding markdown code fence.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let trimmed = reply.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    serde_json::from_str(body)
        .map_err(|e| Error::TextGenerationError(format!("unparseable reply: {}", e)))
}

/// Generate and parse a structured reply, or return `fallback` on any failure.
pub async fn generate_or<T, G>(generator: &G, prompt: &str, what: &str, fallback: T) -> T
where
    T: DeserializeOwned,
    G: TextGenerator + ?Sized,
{
    match generator.generate(prompt).await.and_then(|r| parse_json_reply::<T>(&r)) {
        | Ok(v) => v,
        | Err(e) => {
            debug!(what, error = %e, "using fallback");
            increment_counter!(TEXT_GENERATION_FALLBACKS, "kind" => what.to_string());
            fallback
        }
    }
}
