//! Query-time coordinator: embeds the query, over-fetches chunk hits from
//! the store, aggregates them per item, and hydrates metadata through the
//! host.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chunker::Language;
use crate::config::SearchConfig;
use crate::embedding::client::EmbeddingClient;
use crate::error::PipelineError;
use crate::host::{ItemMetadata, LibraryHost};
use crate::store::{StoreSearchOptions, VectorStore};

#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk_id: i64,
    pub score: f32,
    pub chunk_text: String,
    pub language: Language,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub item_key: String,
    pub item_score: f32,
    pub chunks: Vec<ChunkHit>,
    pub metadata: ItemMetadata,
}

/// Overrides for one `search` call; any field left `None` falls back to the
/// coordinator's `SearchConfig` default.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
    pub language: Option<String>,
    pub item_keys: Option<Vec<String>>,
}

const CHUNKS_KEPT_PER_ITEM: usize = 3;

pub struct SearchCoordinator {
    store: Arc<VectorStore>,
    embedder: Arc<EmbeddingClient>,
    host: Arc<dyn LibraryHost>,
    config: SearchConfig,
}

impl SearchCoordinator {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<EmbeddingClient>,
        host: Arc<dyn LibraryHost>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            host,
            config,
        }
    }

    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchResult>, PipelineError> {
        let top_k = options.top_k.unwrap_or(self.config.top_k);
        let min_score = options.min_score.unwrap_or(self.config.min_score);
        let requested_language = options.language.unwrap_or_else(|| self.config.language.clone());

        let embedding = self.embedder.embed_query(query, None).await?;

        let effective_language = if requested_language == "all" {
            Some(embedding.language.as_str().to_string())
        } else {
            Some(requested_language)
        };

        let store_opts = StoreSearchOptions {
            top_k: top_k.saturating_mul(self.config.overfetch_factor.max(1)),
            language: effective_language,
            item_keys: options.item_keys,
            min_score,
        };
        let hits = self.store.search(&embedding.vector, &store_opts)?;

        let mut by_item: HashMap<String, Vec<ChunkHit>> = HashMap::new();
        for hit in hits {
            by_item.entry(hit.item_key.clone()).or_default().push(ChunkHit {
                chunk_id: hit.chunk_id,
                score: hit.score,
                chunk_text: hit.chunk_text,
                language: hit.language,
            });
        }

        let mut aggregated: Vec<(String, f32, Vec<ChunkHit>)> = Vec::with_capacity(by_item.len());
        for (item_key, mut chunks) in by_item {
            chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            chunks.truncate(CHUNKS_KEPT_PER_ITEM);
            let item_score = chunks.first().map(|c| c.score).unwrap_or(0.0);
            aggregated.push((item_key, item_score, chunks));
        }
        aggregated.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        aggregated.truncate(top_k);

        let mut results = Vec::with_capacity(aggregated.len());
        for (item_key, item_score, chunks) in aggregated {
            let metadata = self.host.get_item_metadata(&item_key).await?;
            results.push(SearchResult {
                item_key,
                item_score,
                chunks,
                metadata,
            });
        }
        Ok(results)
    }
}
