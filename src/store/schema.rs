//! Embedded SQLite schema for the vector store.

pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_key TEXT NOT NULL,
    chunk_id INTEGER NOT NULL,
    vector_f32 BLOB NOT NULL,
    vector_i8 BLOB,
    scale REAL,
    norm REAL NOT NULL,
    language TEXT NOT NULL,
    chunk_text TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE(item_key, chunk_id)
);

CREATE INDEX IF NOT EXISTS idx_embeddings_item_key ON embeddings(item_key);
CREATE INDEX IF NOT EXISTS idx_embeddings_language ON embeddings(language);

CREATE TABLE IF NOT EXISTS index_status (
    item_key TEXT PRIMARY KEY,
    indexed_at INTEGER NOT NULL,
    version INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    item_modified INTEGER NOT NULL,
    attachment_modified INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS content_cache (
    item_key TEXT PRIMARY KEY,
    full_content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    cached_at INTEGER NOT NULL
);
";

pub const CURRENT_SCHEMA_VERSION: i64 = 1;
