//! Resumable, cancellable indexing pipeline: walks the library, chunks and
//! embeds changed items, and commits vectors to the store in fixed-size
//! batches, pausing on embedding-provider failure instead of aborting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunker::{self, ChunkerConfig};
use crate::config::PipelineConfig;
use crate::embedding::client::{BatchItem, EmbeddingClient};
use crate::error::{EmbeddingError, EmbeddingErrorKind, PipelineError};
use crate::host::{ItemMetadata, LibraryHost};
use crate::preferences::{PreferenceStore, PREF_INDEX_PROGRESS};
use crate::store::{VectorRecordInput, VectorStore};

const PDF_EXTRACT_TIMEOUT_MS: u64 = 30_000;
const PAUSE_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Idle,
    Indexing,
    Paused,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexProgress {
    pub total: usize,
    pub processed: usize,
    pub current_item: Option<String>,
    pub status: IndexStatus,
    pub start_time: Option<i64>,
    pub estimated_remaining_ms: Option<f64>,
    pub error: Option<String>,
    pub error_type: Option<EmbeddingErrorKind>,
    pub error_retryable: Option<bool>,
    pub failed_count: usize,
}

impl Default for IndexProgress {
    fn default() -> Self {
        Self {
            total: 0,
            processed: 0,
            current_item: None,
            status: IndexStatus::Idle,
            start_time: None,
            estimated_remaining_ms: None,
            error: None,
            error_type: None,
            error_retryable: None,
            failed_count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailedItemInfo {
    pub error_type: EmbeddingErrorKind,
    pub user_message: String,
    pub timestamp_ms: i64,
}

/// What a `build_index` call operates over: either an explicit item-key
/// list (used as-is, never filtered by index status) or, when `None`, every
/// regular item the host knows about minus the ones already indexed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildIndexOptions {
    pub item_keys: Option<Vec<String>>,
    pub rebuild: bool,
}

/// What gets written to the preference store on pause, so a later process
/// can rebuild `IndexProgress` and the run's original item selection without
/// re-deriving either from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedProgress {
    status: IndexStatus,
    total: usize,
    processed: usize,
    start_time: Option<i64>,
    failed_count: usize,
    item_keys: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
struct RestoredRun {
    options: BuildIndexOptions,
    total: usize,
    processed: usize,
    failed_count: usize,
}

struct PipelineState {
    status: IndexStatus,
    paused: bool,
    aborted: bool,
    progress: IndexProgress,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            status: IndexStatus::Idle,
            paused: false,
            aborted: false,
            progress: IndexProgress::default(),
        }
    }
}

enum ItemOutcome {
    Indexed { chunk_count: usize },
    Skipped,
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Walks the host's library, re-embedding items whose content or attachment
/// timestamps changed, and commits chunk vectors to the store in batches of
/// `PipelineConfig::concurrency` items. Every collaborator is injected, so
/// the same pipeline runs against a test double host and a real one.
#[derive(Clone)]
pub struct IndexingPipeline {
    store: Arc<VectorStore>,
    embedder: Arc<EmbeddingClient>,
    host: Arc<dyn LibraryHost>,
    prefs: Arc<dyn PreferenceStore>,
    chunker_config: ChunkerConfig,
    config: PipelineConfig,
    state: Arc<tokio::sync::Mutex<PipelineState>>,
    failed_items: Arc<tokio::sync::Mutex<HashMap<String, FailedItemInfo>>>,
    restored_run: Arc<tokio::sync::Mutex<Option<RestoredRun>>>,
}

impl IndexingPipeline {
    /// Constructs the pipeline and, if the preference store holds progress
    /// left behind by an `indexing` or `paused` run, restores it as
    /// `Paused` rather than starting clean. The caller decides whether to
    /// call `resume()` or start a fresh `build_index`.
    pub async fn new(
        store: Arc<VectorStore>,
        embedder: Arc<EmbeddingClient>,
        host: Arc<dyn LibraryHost>,
        prefs: Arc<dyn PreferenceStore>,
        chunker_config: ChunkerConfig,
        config: PipelineConfig,
    ) -> Self {
        embedder.attach_preferences(prefs.clone()).await;
        let pipeline = Self {
            store,
            embedder,
            host,
            prefs,
            chunker_config,
            config,
            state: Arc::new(tokio::sync::Mutex::new(PipelineState::default())),
            failed_items: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            restored_run: Arc::new(tokio::sync::Mutex::new(None)),
        };
        pipeline.restore_persisted_progress().await;
        pipeline
    }

    async fn restore_persisted_progress(&self) {
        let Some(json) = self.prefs.get(PREF_INDEX_PROGRESS).await else {
            return;
        };
        let persisted: PersistedProgress = match serde_json::from_str(&json) {
            Ok(p) => p,
            Err(e) => {
                warn!("discarding unreadable persisted index progress: {e}");
                return;
            }
        };
        if !matches!(persisted.status, IndexStatus::Indexing | IndexStatus::Paused) {
            return;
        }

        info!(
            processed = persisted.processed,
            total = persisted.total,
            "restoring paused indexing run from persisted progress"
        );
        {
            let mut state = self.state.lock().await;
            state.status = IndexStatus::Paused;
            state.paused = true;
            state.progress = IndexProgress {
                total: persisted.total,
                processed: persisted.processed,
                current_item: None,
                status: IndexStatus::Paused,
                start_time: persisted.start_time,
                estimated_remaining_ms: None,
                error: None,
                error_type: None,
                error_retryable: None,
                failed_count: persisted.failed_count,
            };
        }
        *self.restored_run.lock().await = Some(RestoredRun {
            options: BuildIndexOptions {
                item_keys: persisted.item_keys,
                rebuild: false,
            },
            total: persisted.total,
            processed: persisted.processed,
            failed_count: persisted.failed_count,
        });
    }

    pub async fn progress(&self) -> IndexProgress {
        self.state.lock().await.progress.clone()
    }

    pub async fn failed_items(&self) -> HashMap<String, FailedItemInfo> {
        self.failed_items.lock().await.clone()
    }

    pub async fn pause(&self) {
        let mut state = self.state.lock().await;
        state.paused = true;
        if state.status == IndexStatus::Indexing {
            state.status = IndexStatus::Paused;
            state.progress.status = IndexStatus::Paused;
        }
    }

    pub async fn abort(&self) {
        let mut state = self.state.lock().await;
        state.aborted = true;
        state.paused = false;
    }

    /// Resumes a paused run. If indexing is live (paused mid-call inside
    /// `build_index`), this just clears the pause flag and returns the
    /// current snapshot; the live call keeps driving itself to completion.
    /// If the pipeline was restored from persisted progress after a
    /// restart, this drives a fresh run over the same item selection to
    /// completion and returns the final progress.
    pub async fn resume(&self) -> Result<IndexProgress, PipelineError> {
        let restored = self.restored_run.lock().await.take();
        {
            let mut state = self.state.lock().await;
            state.paused = false;
        }

        let Some(restored) = restored else {
            return Ok(self.progress().await);
        };

        let items = self.select_items(&restored.options).await?;
        {
            let mut state = self.state.lock().await;
            state.aborted = false;
            state.status = IndexStatus::Indexing;
            state.progress.status = IndexStatus::Indexing;
            state.progress.total = restored.total;
            state.progress.processed = restored.processed;
            state.progress.failed_count = restored.failed_count;
            state.progress.start_time.get_or_insert_with(now_millis);
            state.progress.error = None;
            state.progress.error_type = None;
            state.progress.error_retryable = None;
        }
        let on_progress: Arc<dyn Fn(IndexProgress) + Send + Sync> = Arc::new(|_| {});
        self.run_items(&items, &on_progress, &restored.options).await
    }

    /// Runs indexing over `options.item_keys` (or every unindexed regular
    /// item when `None`) to completion, pause, or abort. `on_progress` is
    /// called after every processed item and on every status transition.
    pub async fn build_index(
        &self,
        options: BuildIndexOptions,
        on_progress: impl Fn(IndexProgress) + Send + Sync + 'static,
    ) -> Result<IndexProgress, PipelineError> {
        let on_progress: Arc<dyn Fn(IndexProgress) + Send + Sync> = Arc::new(on_progress);
        let items = self.select_items(&options).await?;

        if options.rebuild {
            self.store.clear()?;
        }

        {
            let mut state = self.state.lock().await;
            state.aborted = false;
            state.paused = false;
            state.status = IndexStatus::Indexing;
            state.progress = IndexProgress {
                total: items.len(),
                processed: 0,
                current_item: None,
                status: IndexStatus::Indexing,
                start_time: Some(now_millis()),
                estimated_remaining_ms: None,
                error: None,
                error_type: None,
                error_retryable: None,
                failed_count: self.failed_items.lock().await.len(),
            };
        }
        on_progress(self.progress().await);

        self.run_items(&items, &on_progress, &options).await
    }

    async fn select_items(&self, options: &BuildIndexOptions) -> Result<Vec<String>, PipelineError> {
        if let Some(keys) = &options.item_keys {
            return Ok(keys.clone());
        }
        let candidates = self.host.list_regular_items().await?;
        if options.rebuild {
            return Ok(candidates);
        }
        let indexed = self.store.get_indexed_items()?;
        Ok(candidates.into_iter().filter(|k| !indexed.contains(k)).collect())
    }

    /// The shared batch loop used by both a fresh `build_index` call and a
    /// post-restart `resume`. Processes `items` in batches of
    /// `config.concurrency`, checking the pause/abort gate at each batch
    /// boundary and transitioning to `Paused` whenever a batch surfaces an
    /// embedding-provider error.
    async fn run_items(
        &self,
        items: &[String],
        on_progress: &Arc<dyn Fn(IndexProgress) + Send + Sync>,
        options: &BuildIndexOptions,
    ) -> Result<IndexProgress, PipelineError> {
        let concurrency = self.config.concurrency.max(1);

        for (batch_index, batch) in items.chunks(concurrency).enumerate() {
            self.wait_if_paused().await;
            if self.is_aborted().await {
                return Ok(self.finalize(IndexStatus::Aborted).await);
            }

            let mut set = tokio::task::JoinSet::new();
            for item_key in batch {
                let pipeline = self.clone();
                let item_key = item_key.clone();
                set.spawn(async move {
                    let result = pipeline.process_item(&item_key).await;
                    (item_key, result)
                });
            }

            let mut embedding_failure = None;
            while let Some(joined) = set.join_next().await {
                let (item_key, result) = joined.map_err(|_| PipelineError::Cancelled)?;
                match result {
                    Ok(ItemOutcome::Indexed { chunk_count }) => {
                        self.increment_processed(&item_key, on_progress).await;
                        info!(item_key, chunk_count, "indexed item");
                    }
                    Ok(ItemOutcome::Skipped) => {
                        self.increment_processed(&item_key, on_progress).await;
                    }
                    Err(PipelineError::Embedding(e)) => {
                        self.record_failed_item(&item_key, &e).await;
                        warn!(item_key, error = %e.message, "embedding failed for item");
                        embedding_failure = Some(e);
                    }
                    Err(other) => {
                        warn!(item_key, error = %other, "non-embedding error processing item, skipping");
                        self.increment_processed(&item_key, on_progress).await;
                    }
                }
            }

            if (batch_index + 1) % self.config.progress_persist_every_batches == 0 {
                self.persist_progress(options).await;
            }

            if let Some(error) = embedding_failure {
                self.transition_to_paused(&error).await;
                self.persist_progress(options).await;
                on_progress(self.progress().await);

                self.wait_if_paused().await;
                if self.is_aborted().await {
                    return Ok(self.finalize(IndexStatus::Aborted).await);
                }

                let mut state = self.state.lock().await;
                state.status = IndexStatus::Indexing;
                state.progress.status = IndexStatus::Indexing;
                state.progress.error = None;
                state.progress.error_type = None;
                state.progress.error_retryable = None;
            }

            if (batch_index + 1) % self.config.yield_every_items.max(1) == 0 {
                tokio::time::sleep(Duration::from_millis(self.config.yield_duration_ms)).await;
            }
        }

        Ok(self.finalize(IndexStatus::Completed).await)
    }

    async fn wait_if_paused(&self) {
        loop {
            let paused = self.state.lock().await.paused;
            if !paused {
                return;
            }
            tokio::time::sleep(Duration::from_millis(PAUSE_POLL_INTERVAL_MS)).await;
        }
    }

    async fn is_aborted(&self) -> bool {
        self.state.lock().await.aborted
    }

    async fn transition_to_paused(&self, error: &EmbeddingError) {
        let mut state = self.state.lock().await;
        state.status = IndexStatus::Paused;
        state.paused = true;
        state.progress.status = IndexStatus::Paused;
        state.progress.error = Some(error.user_message.clone());
        state.progress.error_type = Some(error.kind);
        state.progress.error_retryable = Some(error.retryable());
    }

    async fn record_failed_item(&self, item_key: &str, error: &EmbeddingError) {
        let failed_count = {
            let mut failed = self.failed_items.lock().await;
            failed.insert(
                item_key.to_string(),
                FailedItemInfo {
                    error_type: error.kind,
                    user_message: error.user_message.clone(),
                    timestamp_ms: now_millis(),
                },
            );
            failed.len()
        };
        self.state.lock().await.progress.failed_count = failed_count;
    }

    async fn increment_processed(&self, item_key: &str, on_progress: &Arc<dyn Fn(IndexProgress) + Send + Sync>) {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.progress.processed += 1;
            state.progress.current_item = Some(item_key.to_string());
            if let Some(start) = state.progress.start_time {
                if state.progress.processed > 0 {
                    let elapsed_ms = (now_millis() - start).max(0) as f64;
                    let rate = elapsed_ms / state.progress.processed as f64;
                    let remaining = state.progress.total.saturating_sub(state.progress.processed);
                    state.progress.estimated_remaining_ms = Some(rate * remaining as f64);
                }
            }
            state.progress.clone()
        };
        on_progress(snapshot);
    }

    async fn persist_progress(&self, options: &BuildIndexOptions) {
        let persisted = {
            let state = self.state.lock().await;
            PersistedProgress {
                status: state.progress.status,
                total: state.progress.total,
                processed: state.progress.processed,
                start_time: state.progress.start_time,
                failed_count: state.progress.failed_count,
                item_keys: options.item_keys.clone(),
            }
        };
        match serde_json::to_string(&persisted) {
            Ok(json) => self.prefs.set(PREF_INDEX_PROGRESS, &json).await,
            Err(e) => warn!("failed to serialize index progress: {e}"),
        }
    }

    async fn finalize(&self, status: IndexStatus) -> IndexProgress {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.status = status;
            state.progress.status = status;
            state.progress.current_item = None;
            state.progress.clone()
        };
        self.prefs.remove(PREF_INDEX_PROGRESS).await;
        snapshot
    }

    /// The per-item procedure: skip on unchanged timestamps, skip on
    /// unchanged content hash, otherwise extract, chunk, embed, and commit
    /// atomically (delete the item's old vectors, insert the new ones,
    /// update its index status) in that order.
    async fn process_item(&self, item_key: &str) -> Result<ItemOutcome, PipelineError> {
        let metadata = self.host.get_item_metadata(item_key).await?;

        let mut attachment_modified = 0i64;
        for attachment_key in &metadata.attachment_keys {
            let modified = self.host.get_attachment_modified(attachment_key).await?;
            attachment_modified = attachment_modified.max(modified);
        }
        let item_modified = metadata.date_modified;

        if !self
            .store
            .needs_reindex_by_timestamp(item_key, item_modified, attachment_modified)?
        {
            return Ok(ItemOutcome::Skipped);
        }

        if let Some(cached) = self.store.get_cached_content(item_key)? {
            if !self.store.needs_reindex_by_hash(item_key, &cached.content_hash)? {
                self.store.touch_index_status(item_key, item_modified, attachment_modified)?;
                return Ok(ItemOutcome::Skipped);
            }
        }

        let content = self.extract_content(item_key, &metadata).await;
        if content.trim().is_empty() {
            return Ok(ItemOutcome::Skipped);
        }

        let content_hash = format!("{:032x}", xxhash_rust::xxh3::xxh3_128(content.as_bytes()));
        self.store.update_content_cache(item_key, &content, &content_hash)?;

        if !self.store.needs_reindex_by_hash(item_key, &content_hash)? {
            self.store.touch_index_status(item_key, item_modified, attachment_modified)?;
            return Ok(ItemOutcome::Skipped);
        }

        let chunks = chunker::chunk(&content, &self.chunker_config);
        if chunks.is_empty() {
            return Ok(ItemOutcome::Skipped);
        }

        let batch_items: Vec<BatchItem> = chunks
            .iter()
            .enumerate()
            .map(|(i, text)| BatchItem::new(i.to_string(), text.clone()))
            .collect();
        let embeddings = self.embedder.embed_batch(&batch_items).await?;

        let mut records = Vec::with_capacity(chunks.len());
        for (i, text) in chunks.iter().enumerate() {
            let result = embeddings
                .get(&i.to_string())
                .ok_or_else(|| EmbeddingError::new(EmbeddingErrorKind::Unknown, "missing embedding for chunk"))?;
            records.push(VectorRecordInput {
                item_key: item_key.to_string(),
                chunk_id: i as i64,
                vector_f32: result.vector.clone(),
                language: result.language,
                chunk_text: text.clone(),
            });
        }

        self.store.delete_item_vectors(item_key, false)?;
        self.store.insert_many(&records)?;
        self.store
            .update_index_status(item_key, records.len(), &content_hash, item_modified, attachment_modified)?;

        Ok(ItemOutcome::Indexed {
            chunk_count: records.len(),
        })
    }

    /// Joins title, abstract, notes, annotations, and PDF text from every
    /// attachment with blank-line separators. A failed attachment extraction
    /// is logged and skipped rather than failing the whole item: partial
    /// content is still worth indexing.
    async fn extract_content(&self, item_key: &str, metadata: &ItemMetadata) -> String {
        let notes = match self.host.get_notes_and_annotations(item_key).await {
            Ok(n) => n,
            Err(e) => {
                warn!(item_key, error = %e, "failed to load notes and annotations");
                Default::default()
            }
        };

        let mut parts = Vec::new();
        if let Some(title) = &notes.title {
            parts.push(title.clone());
        } else if !metadata.title.is_empty() {
            parts.push(metadata.title.clone());
        }
        if let Some(abstract_text) = &notes.abstract_text {
            parts.push(abstract_text.clone());
        }

        for attachment_key in &metadata.attachment_keys {
            match self
                .host
                .extract_pdf_text(attachment_key, PDF_EXTRACT_TIMEOUT_MS)
                .await
            {
                Ok(text) if !text.trim().is_empty() => parts.push(text),
                Ok(_) => {}
                Err(e) => warn!(item_key, attachment_key, error = %e, "pdf extraction failed, continuing without it"),
            }
        }

        parts.extend(notes.notes);
        parts.extend(notes.annotations);
        parts.join("\n\n")
    }
}
