//! Batched HTTP embedding client: retries, rate-limit gating, usage
//! accounting, typed error classification.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::chunker::{self, Language};
use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, EmbeddingErrorKind};
use crate::preferences::{PreferenceStore, PREF_API_USAGE_COUNTERS, PREF_EMBEDDING_CONFIG};

use super::rate_limiter::RateLimiter;
use super::usage::UsageCounters;

/// One input to `embed_batch`: a caller-chosen id, the text, and an optional
/// language hint (skips auto-detection when the caller already knows it).
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: String,
    pub text: String,
    pub language_hint: Option<Language>,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            language_hint: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    pub language: Language,
    pub dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct EmbeddingClient {
    http: reqwest::Client,
    config: EmbeddingConfig,
    limiter: RateLimiter,
    usage: Arc<Mutex<UsageCounters>>,
    prefs: tokio::sync::RwLock<Option<Arc<dyn PreferenceStore>>>,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EmbeddingError::new(EmbeddingErrorKind::Config, e.to_string()))?;
        let limiter = RateLimiter::new(config.rpm, config.tpm);
        Ok(Self {
            http,
            config,
            limiter,
            usage: Arc::new(Mutex::new(UsageCounters::default())),
            prefs: tokio::sync::RwLock::new(None),
        })
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub async fn usage_snapshot(&self) -> UsageCounters {
        self.usage.lock().await.clone()
    }

    pub async fn reset_usage(&self, cumulative: bool) {
        let mut usage = self.usage.lock().await;
        if cumulative {
            usage.reset_all();
        } else {
            usage.reset_session();
        }
    }

    /// Wires a `PreferenceStore` into the client: restores cumulative usage
    /// counters left behind by an earlier process (session counters reset,
    /// per the always-fresh-per-process contract), persists the active
    /// embedding config under `embedding_config_json`, and enables saving
    /// cumulative counters after every successful batch from here on.
    pub async fn attach_preferences(&self, prefs: Arc<dyn PreferenceStore>) {
        if let Some(json) = prefs.get(PREF_API_USAGE_COUNTERS).await {
            match serde_json::from_str::<UsageCounters>(&json) {
                Ok(mut restored) => {
                    restored.reset_session();
                    *self.usage.lock().await = restored;
                }
                Err(e) => warn!("discarding unreadable persisted usage counters: {e}"),
            }
        }
        match serde_json::to_string(&self.config) {
            Ok(json) => prefs.set(PREF_EMBEDDING_CONFIG, &json).await,
            Err(e) => warn!("failed to serialize embedding config: {e}"),
        }
        *self.prefs.write().await = Some(prefs);
    }

    async fn persist_usage(&self, usage: &UsageCounters) {
        let Some(prefs) = self.prefs.read().await.clone() else {
            return;
        };
        match serde_json::to_string(usage) {
            Ok(json) => prefs.set(PREF_API_USAGE_COUNTERS, &json).await,
            Err(e) => warn!("failed to serialize usage counters: {e}"),
        }
    }

    pub async fn embed_one(
        &self,
        text: &str,
        language_hint: Option<Language>,
    ) -> Result<EmbeddingResult, EmbeddingError> {
        let item = BatchItem {
            id: "__single__".to_string(),
            text: text.to_string(),
            language_hint,
        };
        let mut results = self.embed_batch(&[item]).await?;
        results
            .remove("__single__")
            .ok_or_else(|| EmbeddingError::new(EmbeddingErrorKind::Unknown, "no embedding returned"))
    }

    /// Embeds a single search query. Unlike `embed_one`, applies
    /// `query_instruction_prefix` when configured: some models are trained
    /// asymmetrically and expect an instruction prefix on the query side
    /// only, never on the documents being searched.
    pub async fn embed_query(
        &self,
        text: &str,
        language_hint: Option<Language>,
    ) -> Result<EmbeddingResult, EmbeddingError> {
        let language_hint = Some(language_hint.unwrap_or_else(|| chunker::detect_language(text)));
        let effective_text = match &self.config.query_instruction_prefix {
            Some(prefix) => format!("{prefix}{text}"),
            None => text.to_string(),
        };
        let item = BatchItem {
            id: "__query__".to_string(),
            text: effective_text,
            language_hint,
        };
        let mut results = self.embed_group(&[item]).await?;
        results
            .remove("__query__")
            .ok_or_else(|| EmbeddingError::new(EmbeddingErrorKind::Unknown, "no embedding returned"))
    }

    /// Partitions `items` into groups of `max_batch_size`, issuing one HTTP
    /// call per group and preserving caller-supplied ordering by sorting the
    /// response on `index` before zipping with input ids.
    pub async fn embed_batch(
        &self,
        items: &[BatchItem],
    ) -> Result<HashMap<String, EmbeddingResult>, EmbeddingError> {
        let mut out = HashMap::with_capacity(items.len());
        for group in items.chunks(self.config.max_batch_size.max(1)) {
            let group_results = self.embed_group(group).await?;
            out.extend(group_results);
        }
        Ok(out)
    }

    /// Embeds `group` verbatim, with no instruction prefix applied; callers
    /// that need the query-side prefix build it into `item.text` themselves
    /// (see `embed_query`), since documents must never receive it.
    async fn embed_group(
        &self,
        group: &[BatchItem],
    ) -> Result<HashMap<String, EmbeddingResult>, EmbeddingError> {
        let texts: Vec<String> = group.iter().map(|item| item.text.clone()).collect();
        let estimated_tokens: u64 = texts.iter().map(|t| chunker::estimate_tokens(t) as u64).sum();

        self.limiter.acquire(estimated_tokens).await;

        let vectors = self.post_with_retry(&texts).await?;
        if vectors.len() != group.len() {
            return Err(EmbeddingError::new(
                EmbeddingErrorKind::Unknown,
                format!(
                    "provider returned {} embeddings for {} inputs",
                    vectors.len(),
                    group.len()
                ),
            ));
        }

        let usage_snapshot = {
            let mut usage = self.usage.lock().await;
            usage.record_batch(
                group.len() as u64,
                estimated_tokens,
                self.config.cost_per_million_tokens,
            );
            usage.current_rpm = self.limiter.current_rpm().await;
            usage.current_tpm = self.limiter.current_tpm().await;
            usage.clone()
        };
        self.persist_usage(&usage_snapshot).await;

        let mut out = HashMap::with_capacity(group.len());
        for (item, vector) in group.iter().zip(vectors.into_iter()) {
            let dimensions = vector.len();
            let language = item
                .language_hint
                .unwrap_or_else(|| chunker::detect_language(&item.text));
            out.insert(
                item.id.clone(),
                EmbeddingResult {
                    vector,
                    language,
                    dimensions,
                },
            );
        }
        Ok(out)
    }

    async fn post_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut last_error = None;
        for attempt in 0..self.config.max_retries.max(1) {
            match self.post_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) => {
                    if err.kind == EmbeddingErrorKind::RateLimit {
                        let mut usage = self.usage.lock().await;
                        usage.record_rate_limit_hit();
                        drop(usage);
                        self.limiter.force_backoff().await;
                    }
                    let retryable = err.retryable();
                    warn!(attempt, retryable, "embedding request failed: {}", err.message);
                    last_error = Some(err);
                    if !retryable || attempt + 1 >= self.config.max_retries {
                        break;
                    }
                    let delay = Duration::from_secs(2u64.saturating_pow(attempt));
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| EmbeddingError::new(EmbeddingErrorKind::Unknown, "no attempts made")))
    }

    async fn post_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));
        let dimensions = if self.config.sends_dimensions() {
            self.config.dimensions
        } else {
            None
        };
        let body = EmbeddingsRequest {
            model: &self.config.model,
            input: texts,
            dimensions,
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &body_text));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::new(EmbeddingErrorKind::InvalidRequest, e.to_string()))?;

        let mut sorted = parsed.data;
        sorted.sort_by_key(|d| d.index);
        debug!(count = sorted.len(), "received embeddings batch");
        Ok(sorted.into_iter().map(|d| d.embedding).collect())
    }

    /// Deterministic hash-derived pseudo-embedding for exercising downstream
    /// code paths when no provider is configured. Explicitly a diagnostic
    /// shim: callers must never persist its output to the vector store.
    pub fn fallback_hash_embedding(text: &str, dimensions: usize) -> Vec<f32> {
        let digest = xxhash_rust::xxh3::xxh3_128(text.as_bytes());
        let mut state = digest;
        (0..dimensions)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                ((state >> 64) as i64 as f64 / i64::MAX as f64) as f32
            })
            .collect()
    }
}

fn classify_transport_error(err: reqwest::Error) -> EmbeddingError {
    let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
        EmbeddingErrorKind::Network
    } else {
        EmbeddingErrorKind::Unknown
    };
    EmbeddingError::new(kind, err.to_string())
}

fn classify_http_error(status: reqwest::StatusCode, body: &str) -> EmbeddingError {
    let parsed: Option<ProviderErrorBody> = serde_json::from_str(body).ok();
    let provider_message = parsed
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.to_string());

    let kind = match status.as_u16() {
        429 => EmbeddingErrorKind::RateLimit,
        401 | 403 => EmbeddingErrorKind::Auth,
        400 => EmbeddingErrorKind::InvalidRequest,
        500..=599 => EmbeddingErrorKind::Server,
        _ => EmbeddingErrorKind::Unknown,
    };
    EmbeddingError::new(kind, format!("http {status}: {provider_message}"))
}
