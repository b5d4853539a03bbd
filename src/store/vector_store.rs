//! Embedded SQL vector store: per-chunk vectors with Int8 quantization
//! alongside Float32 originals, a streaming top-K scanner, change detection,
//! and a content cache.
//!
//! Grounded on the rusqlite usage pattern of a chunk-vector persistence
//! layer: a single `Connection` behind a lock, a multi-statement
//! `execute_batch` schema, transactional upserts, and small numeric
//! conversion helpers that turn overflow into a typed error instead of a
//! panic.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use moka::sync::Cache;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::chunker::Language;
use crate::error::StoreError;
use crate::math::{cosine_f32, cosine_i8, quantize};

use super::schema::SCHEMA_SQL;

const STREAM_BATCH_SIZE: i64 = 50_000;
const MIGRATION_BATCH_SIZE: i64 = 100;
const INT8_FAST_PATH_THRESHOLD: f64 = 0.9;
const VECTOR_CACHE_CAPACITY: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct VectorRecordInput {
    pub item_key: String,
    pub chunk_id: i64,
    pub vector_f32: Vec<f32>,
    pub language: Language,
    pub chunk_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub item_key: String,
    pub chunk_id: i64,
    pub score: f32,
    pub chunk_text: String,
    pub language: Language,
}

#[derive(Debug, Clone, Default)]
pub struct StoreSearchOptions {
    pub top_k: usize,
    pub language: Option<String>,
    pub item_keys: Option<Vec<String>>,
    pub min_score: f32,
}

impl StoreSearchOptions {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            language: None,
            item_keys: None,
            min_score: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedContent {
    pub full_content: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_vectors: u64,
    pub total_items: u64,
    pub zh_vectors: u64,
    pub en_vectors: u64,
    pub cached_content_items: u64,
    pub cached_content_bytes: u64,
    pub stored_dimensions: Option<u32>,
    pub int8_migration_ratio: f64,
    pub db_size_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct MigrationProgress {
    pub migrated: u64,
    pub total: u64,
}

fn encode_f32_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn decode_f32_blob(blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Encoding(format!(
            "vector_f32 blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn encode_i8_blob(vector: &[i8]) -> Vec<u8> {
    vector.iter().map(|&v| v as u8).collect()
}

fn decode_i8_blob(blob: &[u8]) -> Vec<i8> {
    blob.iter().map(|&b| b as i8).collect()
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn cache_key(item_key: &str, chunk_id: i64) -> String {
    format!("{item_key}_{chunk_id}")
}

struct HeapEntry {
    score: f32,
    hit: SearchHit,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.partial_cmp(&other.score).unwrap_or(Ordering::Equal)
    }
}

pub struct VectorStore {
    conn: Mutex<Connection>,
    vector_cache: Cache<String, Arc<Vec<f32>>>,
}

impl VectorStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let store = Self {
            conn: Mutex::new(conn),
            vector_cache: Cache::new(VECTOR_CACHE_CAPACITY),
        };
        store.self_test_round_trip()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        let store = Self {
            conn: Mutex::new(conn),
            vector_cache: Cache::new(VECTOR_CACHE_CAPACITY),
        };
        store.self_test_round_trip()?;
        Ok(store)
    }

    /// Encode/decode round trip on a known vector, run once at open. Catches
    /// a broken SQLite binding or build before it silently corrupts data.
    fn self_test_round_trip(&self) -> Result<(), StoreError> {
        let original: Vec<f32> = vec![0.0, -1.0, 0.5, 127.0, -127.0, 3.14159];
        let f32_blob = encode_f32_blob(&original);
        let decoded_f32 = decode_f32_blob(&f32_blob)?;
        if decoded_f32 != original {
            return Err(StoreError::Encoding(
                "vector_f32 blob round trip mismatch at store open".to_string(),
            ));
        }

        let (quantized, _scale, _norm) = quantize(&original);
        let i8_blob = encode_i8_blob(&quantized);
        let decoded_i8 = decode_i8_blob(&i8_blob);
        if decoded_i8 != quantized {
            return Err(StoreError::Encoding(
                "vector_i8 blob round trip mismatch at store open".to_string(),
            ));
        }
        Ok(())
    }

    /// Inserts (or replaces) a batch of chunk vectors in a single transaction.
    pub fn insert_many(&self, records: &[VectorRecordInput]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().expect("vector store mutex poisoned");
        let tx = conn.transaction()?;
        let now = now_millis();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO embeddings
                    (item_key, chunk_id, vector_f32, vector_i8, scale, norm, language, chunk_text, dimensions, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(item_key, chunk_id) DO UPDATE SET
                    vector_f32 = excluded.vector_f32,
                    vector_i8 = excluded.vector_i8,
                    scale = excluded.scale,
                    norm = excluded.norm,
                    language = excluded.language,
                    chunk_text = excluded.chunk_text,
                    dimensions = excluded.dimensions,
                    created_at = excluded.created_at",
            )?;
            for record in records {
                let (quantized, scale, norm) = quantize(&record.vector_f32);
                let dimensions = record.vector_f32.len() as i64;
                stmt.execute(params![
                    record.item_key,
                    record.chunk_id,
                    encode_f32_blob(&record.vector_f32),
                    encode_i8_blob(&quantized),
                    scale,
                    norm,
                    record.language.as_str(),
                    record.chunk_text,
                    dimensions,
                    now,
                ])?;
                self.vector_cache.insert(
                    cache_key(&record.item_key, record.chunk_id),
                    Arc::new(record.vector_f32.clone()),
                );
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn stored_dimensions(conn: &Connection) -> Result<Option<i64>, StoreError> {
        Ok(conn
            .query_row("SELECT dimensions FROM embeddings LIMIT 1", [], |row| row.get(0))
            .optional()?)
    }

    fn build_filter(
        language: Option<&str>,
        item_keys: Option<&[String]>,
    ) -> (String, Vec<rusqlite::types::Value>) {
        let mut clauses = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(lang) = language {
            if lang != "all" {
                clauses.push("language = ?".to_string());
                values.push(lang.to_string().into());
            }
        }
        if let Some(keys) = item_keys {
            if !keys.is_empty() {
                let placeholders = vec!["?"; keys.len()].join(", ");
                clauses.push(format!("item_key IN ({placeholders})"));
                for k in keys {
                    values.push(k.clone().into());
                }
            }
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }

    /// Streaming top-K cosine search. Reads rows in large batches so peak
    /// memory is bounded by batch size, not corpus size.
    pub fn search(&self, query: &[f32], opts: &StoreSearchOptions) -> Result<Vec<SearchHit>, StoreError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");

        let stored_dim = match Self::stored_dimensions(&conn)? {
            Some(d) => d as usize,
            None => return Ok(Vec::new()),
        };
        if stored_dim != query.len() {
            warn!(
                query_dim = query.len(),
                stored_dim, "search aborted: dimension mismatch"
            );
            return Ok(Vec::new());
        }

        let (where_clause, filter_values) =
            Self::build_filter(opts.language.as_deref(), opts.item_keys.as_deref());

        let quantized_count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM embeddings WHERE vector_i8 IS NOT NULL{}",
                if where_clause.is_empty() { String::new() } else { where_clause.replacen(" WHERE", " AND", 1) }),
            params_from_iter(filter_values.iter()),
            |row| row.get(0),
        )?;
        let total_count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM embeddings{where_clause}"),
            params_from_iter(filter_values.iter()),
            |row| row.get(0),
        )?;
        if total_count == 0 {
            return Ok(Vec::new());
        }
        let use_int8 = (quantized_count as f64) / (total_count as f64) >= INT8_FAST_PATH_THRESHOLD;

        let (query_i8, _query_scale, query_norm) = quantize(query);
        let q_hat: Vec<f32> = if query_norm > 0.0 {
            query.iter().map(|v| v / query_norm).collect()
        } else {
            query.to_vec()
        };

        let mut heap: BinaryHeap<std::cmp::Reverse<HeapEntry>> = BinaryHeap::new();
        let mut offset: i64 = 0;

        loop {
            let sql = format!(
                "SELECT item_key, chunk_id, vector_f32, vector_i8, language, chunk_text, dimensions
                 FROM embeddings{where_clause}
                 ORDER BY item_key, chunk_id
                 LIMIT {STREAM_BATCH_SIZE} OFFSET {offset}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(filter_values.iter()))?;

            let mut rows_in_batch = 0i64;
            while let Some(row) = rows.next()? {
                rows_in_batch += 1;
                let item_key: String = row.get(0)?;
                let chunk_id: i64 = row.get(1)?;
                let f32_blob: Vec<u8> = row.get(2)?;
                let i8_blob: Option<Vec<u8>> = row.get(3)?;
                let language: String = row.get(4)?;
                let chunk_text: String = row.get(5)?;
                let dimensions: i64 = row.get(6)?;

                let score = if use_int8 {
                    if let Some(i8_blob) = &i8_blob {
                        if dimensions as usize == query.len() {
                            let stored_i8 = decode_i8_blob(i8_blob);
                            if stored_i8.len() == query_i8.len() {
                                cosine_i8(&query_i8, &stored_i8)
                            } else {
                                let stored = decode_f32_blob(&f32_blob)?;
                                cosine_f32(&q_hat, &stored)
                            }
                        } else {
                            continue;
                        }
                    } else {
                        let stored = decode_f32_blob(&f32_blob)?;
                        cosine_f32(&q_hat, &stored)
                    }
                } else {
                    let stored = decode_f32_blob(&f32_blob)?;
                    cosine_f32(&q_hat, &stored)
                };

                if score < opts.min_score {
                    continue;
                }

                let language = if language == "zh" { Language::Zh } else { Language::En };
                let hit = SearchHit {
                    item_key,
                    chunk_id,
                    score,
                    chunk_text,
                    language,
                };
                heap.push(std::cmp::Reverse(HeapEntry { score, hit }));
                if heap.len() > opts.top_k.max(1) {
                    heap.pop();
                }
            }
            if rows_in_batch < STREAM_BATCH_SIZE {
                break;
            }
            offset += STREAM_BATCH_SIZE;
        }

        let mut results: Vec<SearchHit> = heap.into_iter().map(|std::cmp::Reverse(e)| e.hit).collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results.truncate(opts.top_k);
        Ok(results)
    }

    /// Reuses the first stored chunk vector of `item_key` as the query,
    /// excluding the source item from the result.
    pub fn find_similar(&self, item_key: &str, k: usize) -> Result<Vec<SearchHit>, StoreError> {
        if let Some(cached) = self.vector_cache.get(&cache_key(item_key, 0)) {
            let opts = StoreSearchOptions::new(k + 1);
            let hits = self.search(&cached, &opts)?;
            return Ok(hits.into_iter().filter(|h| h.item_key != item_key).take(k).collect());
        }

        let seed_vector = {
            let conn = self.conn.lock().expect("vector store mutex poisoned");
            let blob: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT vector_f32 FROM embeddings WHERE item_key = ?1 ORDER BY chunk_id LIMIT 1",
                    params![item_key],
                    |row| row.get(0),
                )
                .optional()?;
            match blob {
                Some(b) => decode_f32_blob(&b)?,
                None => return Ok(Vec::new()),
            }
        };
        self.vector_cache
            .insert(cache_key(item_key, 0), Arc::new(seed_vector.clone()));

        let opts = StoreSearchOptions::new(k + 1);
        let hits = self.search(&seed_vector, &opts)?;
        Ok(hits.into_iter().filter(|h| h.item_key != item_key).take(k).collect())
    }

    pub fn needs_reindex_by_timestamp(
        &self,
        item_key: &str,
        item_modified: i64,
        attachment_modified: i64,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT item_modified, attachment_modified FROM index_status WHERE item_key = ?1",
                params![item_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(match row {
            Some((im, am)) => !(im == item_modified && am == attachment_modified),
            None => true,
        })
    }

    pub fn needs_reindex_by_hash(&self, item_key: &str, content_hash: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        let stored: Option<String> = conn
            .query_row(
                "SELECT content_hash FROM index_status WHERE item_key = ?1",
                params![item_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match stored {
            Some(hash) => hash != content_hash,
            None => true,
        })
    }

    pub fn get_cached_content(&self, item_key: &str) -> Result<Option<CachedContent>, StoreError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        Ok(conn
            .query_row(
                "SELECT full_content, content_hash FROM content_cache WHERE item_key = ?1",
                params![item_key],
                |row| {
                    Ok(CachedContent {
                        full_content: row.get(0)?,
                        content_hash: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn update_content_cache(
        &self,
        item_key: &str,
        full_content: &str,
        content_hash: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        conn.execute(
            "INSERT INTO content_cache (item_key, full_content, content_hash, cached_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(item_key) DO UPDATE SET
                full_content = excluded.full_content,
                content_hash = excluded.content_hash,
                cached_at = excluded.cached_at",
            params![item_key, full_content, content_hash, now_millis()],
        )?;
        Ok(())
    }

    pub fn update_index_status(
        &self,
        item_key: &str,
        chunk_count: usize,
        content_hash: &str,
        item_modified: i64,
        attachment_modified: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        conn.execute(
            "INSERT INTO index_status
                (item_key, indexed_at, version, chunk_count, content_hash, item_modified, attachment_modified)
             VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)
             ON CONFLICT(item_key) DO UPDATE SET
                indexed_at = excluded.indexed_at,
                version = index_status.version + 1,
                chunk_count = excluded.chunk_count,
                content_hash = excluded.content_hash,
                item_modified = excluded.item_modified,
                attachment_modified = excluded.attachment_modified",
            params![
                item_key,
                now_millis(),
                chunk_count as i64,
                content_hash,
                item_modified,
                attachment_modified
            ],
        )?;
        Ok(())
    }

    /// Refreshes only the timestamp columns, used when content is unchanged.
    pub fn touch_index_status(
        &self,
        item_key: &str,
        item_modified: i64,
        attachment_modified: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        conn.execute(
            "UPDATE index_status SET item_modified = ?2, attachment_modified = ?3, indexed_at = ?4
             WHERE item_key = ?1",
            params![item_key, item_modified, attachment_modified, now_millis()],
        )?;
        Ok(())
    }

    pub fn delete_item_vectors(&self, item_key: &str, delete_content_cache: bool) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().expect("vector store mutex poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM embeddings WHERE item_key = ?1", params![item_key])?;
        tx.execute("DELETE FROM index_status WHERE item_key = ?1", params![item_key])?;
        if delete_content_cache {
            tx.execute("DELETE FROM content_cache WHERE item_key = ?1", params![item_key])?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_indexed_items(&self) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        let mut stmt = conn.prepare("SELECT item_key FROM index_status")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut set = HashSet::new();
        for row in rows {
            set.insert(row?);
        }
        Ok(set)
    }

    /// Removes all vectors and index state but preserves `content_cache`.
    pub fn clear(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        conn.execute("DELETE FROM embeddings", [])?;
        conn.execute("DELETE FROM index_status", [])?;
        conn.execute_batch("VACUUM;")?;
        self.vector_cache.invalidate_all();
        Ok(())
    }

    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.clear()?;
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        conn.execute("DELETE FROM content_cache", [])?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        let total_vectors: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0))?;
        let total_items: i64 =
            conn.query_row("SELECT COUNT(DISTINCT item_key) FROM embeddings", [], |r| r.get(0))?;
        let zh_vectors: i64 = conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE language = 'zh'",
            [],
            |r| r.get(0),
        )?;
        let en_vectors: i64 = conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE language = 'en'",
            [],
            |r| r.get(0),
        )?;
        let cached_content_items: i64 = conn.query_row("SELECT COUNT(*) FROM content_cache", [], |r| r.get(0))?;
        let cached_content_bytes: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(full_content)), 0) FROM content_cache",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);
        let stored_dimensions = Self::stored_dimensions(&conn)?;
        let quantized_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM embeddings WHERE vector_i8 IS NOT NULL", [], |r| r.get(0))?;
        let int8_migration_ratio = if total_vectors > 0 {
            quantized_count as f64 / total_vectors as f64
        } else {
            0.0
        };
        let db_size_bytes: i64 = conn
            .query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);

        Ok(StoreStats {
            total_vectors: total_vectors as u64,
            total_items: total_items as u64,
            zh_vectors: zh_vectors as u64,
            en_vectors: en_vectors as u64,
            cached_content_items: cached_content_items as u64,
            cached_content_bytes: cached_content_bytes as u64,
            stored_dimensions: stored_dimensions.map(|d| d as u32),
            int8_migration_ratio,
            db_size_bytes: db_size_bytes as u64,
        })
    }

    /// Backfills `vector_i8`/`scale`/`norm` for rows written before
    /// quantization existed. Runs outside one long transaction so it never
    /// blocks concurrent readers for long; power-loss safety holds because
    /// Int8 is a redundant derivative of Float32.
    pub fn migrate_to_int8(
        &self,
        mut on_progress: impl FnMut(MigrationProgress),
    ) -> Result<(), StoreError> {
        let total: i64 = {
            let conn = self.conn.lock().expect("vector store mutex poisoned");
            conn.query_row("SELECT COUNT(*) FROM embeddings WHERE vector_i8 IS NULL", [], |r| r.get(0))?
        };
        let mut migrated: u64 = 0;

        loop {
            let batch: Vec<(i64, Vec<u8>)> = {
                let conn = self.conn.lock().expect("vector store mutex poisoned");
                let mut stmt = conn.prepare(
                    "SELECT id, vector_f32 FROM embeddings WHERE vector_i8 IS NULL LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![MIGRATION_BATCH_SIZE], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            if batch.is_empty() {
                break;
            }

            let conn = self.conn.lock().expect("vector store mutex poisoned");
            for (id, blob) in &batch {
                let vector = decode_f32_blob(blob)?;
                let (quantized, scale, norm) = quantize(&vector);
                conn.execute(
                    "UPDATE embeddings SET vector_i8 = ?1, scale = ?2, norm = ?3 WHERE id = ?4",
                    params![encode_i8_blob(&quantized), scale, norm, id],
                )?;
            }
            migrated += batch.len() as u64;
            on_progress(MigrationProgress {
                migrated,
                total: total as u64,
            });
        }

        self.verify_migration()?;
        info!(migrated, "int8 migration complete");
        Ok(())
    }

    fn verify_migration(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT vector_f32, vector_i8 FROM embeddings WHERE vector_i8 IS NOT NULL LIMIT 20",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        for row in rows {
            let (f32_blob, i8_blob) = row?;
            let vector = decode_f32_blob(&f32_blob)?;
            let (quantized, _scale, _norm) = quantize(&vector);
            let stored = decode_i8_blob(&i8_blob);
            if stored != quantized {
                return Err(StoreError::Encoding(
                    "int8 migration verification failed: byte mismatch".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(item_key: &str, chunk_id: i64, vector: Vec<f32>) -> VectorRecordInput {
        VectorRecordInput {
            item_key: item_key.to_string(),
            chunk_id,
            vector_f32: vector,
            language: Language::En,
            chunk_text: format!("chunk {chunk_id} of {item_key}"),
        }
    }

    #[test]
    fn insert_then_search_top1_is_self() {
        let store = VectorStore::open_in_memory().unwrap();
        let vector = vec![1.0, 2.0, 3.0, 4.0];
        store.insert_many(&[sample_record("item-a", 0, vector.clone())]).unwrap();

        let hits = store.search(&vector, &StoreSearchOptions::new(1)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_key, "item-a");
        assert!(hits[0].score >= 0.999);
    }

    #[test]
    fn delete_item_vectors_removes_all_rows() {
        let store = VectorStore::open_in_memory().unwrap();
        store
            .insert_many(&[sample_record("item-a", 0, vec![1.0, 0.0, 0.0, 0.0])])
            .unwrap();
        store.update_index_status("item-a", 0, "hash", 1, 1).unwrap();

        store.delete_item_vectors("item-a", false).unwrap();

        let hits = store
            .search(&[1.0, 0.0, 0.0, 0.0], &StoreSearchOptions::new(10))
            .unwrap();
        assert!(hits.is_empty());
        assert!(store.get_indexed_items().unwrap().is_empty());
    }

    #[test]
    fn clear_preserves_content_cache() {
        let store = VectorStore::open_in_memory().unwrap();
        store
            .insert_many(&[sample_record("item-a", 0, vec![1.0, 0.0, 0.0, 0.0])])
            .unwrap();
        store.update_content_cache("item-a", "full text", "hash").unwrap();

        store.clear().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_vectors, 0);
        assert_eq!(stats.cached_content_items, 1);
    }

    #[test]
    fn clear_all_also_drops_content_cache() {
        let store = VectorStore::open_in_memory().unwrap();
        store.update_content_cache("item-a", "full text", "hash").unwrap();
        store.clear_all().unwrap();
        assert_eq!(store.stats().unwrap().cached_content_items, 0);
    }

    #[test]
    fn search_on_empty_store_returns_empty() {
        let store = VectorStore::open_in_memory().unwrap();
        let hits = store.search(&[1.0, 2.0], &StoreSearchOptions::new(10)).unwrap();
        assert!(hits.is_empty());
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_vectors, 0);
    }

    #[test]
    fn dimension_mismatch_returns_empty() {
        let store = VectorStore::open_in_memory().unwrap();
        store
            .insert_many(&[sample_record("item-a", 0, vec![1.0, 0.0, 0.0, 0.0])])
            .unwrap();
        let hits = store.search(&[1.0, 0.0], &StoreSearchOptions::new(10)).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn needs_reindex_by_timestamp_true_when_unseen() {
        let store = VectorStore::open_in_memory().unwrap();
        assert!(store.needs_reindex_by_timestamp("item-a", 1, 1).unwrap());
    }

    #[test]
    fn needs_reindex_by_timestamp_false_when_unchanged() {
        let store = VectorStore::open_in_memory().unwrap();
        store.update_index_status("item-a", 1, "hash", 5, 7).unwrap();
        assert!(!store.needs_reindex_by_timestamp("item-a", 5, 7).unwrap());
        assert!(store.needs_reindex_by_timestamp("item-a", 6, 7).unwrap());
    }

    #[test]
    fn migrate_to_int8_is_a_noop_on_already_quantized_store() {
        let store = VectorStore::open_in_memory().unwrap();
        store
            .insert_many(&[sample_record("item-a", 0, vec![1.0, 2.0, 3.0, 4.0])])
            .unwrap();
        let mut calls = 0;
        store.migrate_to_int8(|_| calls += 1).unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn find_similar_excludes_source_item() {
        let store = VectorStore::open_in_memory().unwrap();
        store
            .insert_many(&[
                sample_record("item-a", 0, vec![1.0, 0.0, 0.0, 0.0]),
                sample_record("item-b", 0, vec![0.9, 0.1, 0.0, 0.0]),
            ])
            .unwrap();
        let hits = store.find_similar("item-a", 5).unwrap();
        assert!(hits.iter().all(|h| h.item_key != "item-a"));
        assert_eq!(hits[0].item_key, "item-b");
    }
}
