//! Closed-enumeration configuration for every component. Unlike the
//! dynamically-typed config bags this replaces, every knob is a typed
//! struct field; unknown keys simply don't exist.

use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

/// Well-known embedding providers. All of them speak the same
/// OpenAI-compatible `/embeddings` wire protocol; the preset only supplies a
/// documented default `api_base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    OpenAi,
    GoogleGemini,
    DashScope,
    Zhipu,
    OpenRouter,
    SiliconFlow,
    Voyage,
    Ollama,
}

impl EmbeddingProvider {
    pub fn default_api_base(self) -> &'static str {
        match self {
            EmbeddingProvider::OpenAi => "https://api.openai.com/v1",
            EmbeddingProvider::GoogleGemini => {
                "https://generativelanguage.googleapis.com/v1beta/openai"
            }
            EmbeddingProvider::DashScope => {
                "https://dashscope.aliyuncs.com/compatible-mode/v1"
            }
            EmbeddingProvider::Zhipu => "https://open.bigmodel.cn/api/paas/v4",
            EmbeddingProvider::OpenRouter => "https://openrouter.ai/api/v1",
            EmbeddingProvider::SiliconFlow => "https://api.siliconflow.cn/v1",
            EmbeddingProvider::Voyage => "https://api.voyageai.com/v1",
            EmbeddingProvider::Ollama => "http://localhost:11434/v1",
        }
    }
}

/// Model name prefixes known to accept a `dimensions` field in the request
/// body. Anything else relies on the provider's native output dimension.
fn supports_configurable_dimensions(model: &str) -> bool {
    model.starts_with("text-embedding-3") || model.starts_with("voyage-3")
}

/// Round-tripped through `PreferenceStore` under `embedding_config_json` so
/// a restarted process can report which config produced the current index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: Option<u32>,
    pub max_batch_size: usize,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub rpm: u32,
    pub tpm: u32,
    pub cost_per_million_tokens: f64,
    /// Applied as a literal prefix to query text for models trained
    /// asymmetrically (query vs. document instructions differ). Left unset
    /// for symmetric models.
    pub query_instruction_prefix: Option<String>,
}

impl EmbeddingConfig {
    pub fn new(api_base: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: None,
            model: model.into(),
            dimensions: None,
            max_batch_size: 100,
            timeout_ms: 30_000,
            max_retries: 3,
            rpm: 60,
            tpm: 150_000,
            cost_per_million_tokens: 0.02,
            query_instruction_prefix: None,
        }
    }

    pub fn for_provider(provider: EmbeddingProvider, model: impl Into<String>) -> Self {
        Self::new(provider.default_api_base(), model)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn sends_dimensions(&self) -> bool {
        self.dimensions.is_some() && supports_configurable_dimensions(&self.model)
    }

    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.api_base.trim().is_empty() {
            return Err(EmbeddingError::config("api_base is required"));
        }
        if self.model.trim().is_empty() {
            return Err(EmbeddingError::config("model is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Size of the worker pool; each worker owns one PDF-extractor handle.
    pub concurrency: usize,
    /// Cooperative yield every N processed items, to keep an embedding host
    /// process responsive.
    pub yield_every_items: usize,
    pub yield_duration_ms: u64,
    /// Persist `index_progress` to the preference store every N batches.
    pub progress_persist_every_batches: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            yield_every_items: 10,
            yield_duration_ms: 10,
            progress_persist_every_batches: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub top_k: usize,
    pub min_score: f32,
    pub language: String,
    /// `top_k` is multiplied by this before the store scan, since several
    /// chunks can belong to one item. Left configurable per the spec's
    /// open question about the optimal factor.
    pub overfetch_factor: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.1,
            language: "all".to_string(),
            overfetch_factor: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_model() {
        let cfg = EmbeddingConfig::new("https://api.openai.com/v1", "");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_minimal_config() {
        let cfg = EmbeddingConfig::new("https://api.openai.com/v1", "text-embedding-3-small");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn dimensions_only_sent_for_known_families() {
        let cfg = EmbeddingConfig::new("https://api.openai.com/v1", "text-embedding-ada-002")
            .with_dimensions(1536);
        assert!(!cfg.sends_dimensions());

        let cfg = EmbeddingConfig::new("https://api.openai.com/v1", "text-embedding-3-small")
            .with_dimensions(512);
        assert!(cfg.sends_dimensions());
    }
}
