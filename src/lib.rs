pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod host;
pub mod math;
pub mod pipeline;
pub mod preferences;
pub mod search;
pub mod store;

pub use config::{EmbeddingConfig, EmbeddingProvider, PipelineConfig, SearchConfig};
pub use embedding::{BatchItem, EmbeddingClient, EmbeddingResult, UsageCounters};
pub use error::{EmbeddingError, EmbeddingErrorKind, HostError, PipelineError, StoreError};
pub use host::{ItemMetadata, LibraryHost, NotesAndAnnotations};
pub use pipeline::{BuildIndexOptions, FailedItemInfo, IndexingPipeline, IndexProgress, IndexStatus};
pub use preferences::{InMemoryPreferenceStore, PreferenceStore};
pub use search::{ChunkHit, SearchCoordinator, SearchOptions, SearchResult};
pub use store::{CachedContent, SearchHit, StoreSearchOptions, StoreStats, VectorRecordInput, VectorStore};
