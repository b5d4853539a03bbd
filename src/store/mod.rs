pub mod schema;
pub mod vector_store;

pub use vector_store::{
    CachedContent, MigrationProgress, SearchHit, StoreSearchOptions, StoreStats, VectorRecordInput,
    VectorStore,
};
