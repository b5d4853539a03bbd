//! Shared fixtures for the end-to-end tests: a fake embedding HTTP endpoint
//! (no mocking crate, just a minimal hand-rolled HTTP/1.1 responder over
//! `tokio::net`) and a fake `LibraryHost`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use refshelf_index::{HostError, ItemMetadata, LibraryHost, NotesAndAnnotations};

#[derive(Clone)]
pub enum ScriptedResponse {
    Embeddings { dimensions: usize },
    Status { code: u16, body: String },
}

/// A minimal embeddings-compatible HTTP server: one scripted response per
/// request, cycling the last entry once the script is exhausted.
pub struct FakeEmbeddingServer {
    pub base_url: String,
    handle: JoinHandle<()>,
    request_count: Arc<AtomicUsize>,
}

impl FakeEmbeddingServer {
    pub async fn start(script: Vec<ScriptedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake server");
        let port = listener.local_addr().unwrap().port();
        let script = Arc::new(script);
        let cursor = Arc::new(AtomicUsize::new(0));
        let request_count = cursor.clone();

        let handle = tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(s) => s,
                    Err(_) => break,
                };
                let script = script.clone();
                let cursor = cursor.clone();
                tokio::spawn(handle_connection(socket, script, cursor));
            }
        });

        Self {
            base_url: format!("http://127.0.0.1:{port}/v1"),
            handle,
            request_count,
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }
}

impl Drop for FakeEmbeddingServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    mut socket: tokio::net::TcpStream,
    script: Arc<Vec<ScriptedResponse>>,
    cursor: Arc<AtomicUsize>,
) {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        data.extend_from_slice(&buf[..n]);
        let Some(header_end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&data[..header_end]).to_string();
        let content_length = headers
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.trim().eq_ignore_ascii_case("content-length").then(|| value.trim().parse().ok())?
            })
            .unwrap_or(0);
        let body_start = header_end + 4;
        if data.len() < body_start + content_length {
            continue;
        }
        let body = String::from_utf8_lossy(&data[body_start..body_start + content_length]).to_string();
        let idx = cursor.fetch_add(1, Ordering::SeqCst);
        let scripted = script.get(idx).cloned().unwrap_or_else(|| script.last().cloned().unwrap());
        let response = build_response(&scripted, &body);
        let _ = socket.write_all(response.as_bytes()).await;
        return;
    }
}

fn extract_inputs(body: &str) -> Vec<String> {
    let parsed: serde_json::Value = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    parsed["input"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Deterministic bag-of-words fixture embedding: each (lightly stemmed)
/// word increments a hash-derived bucket, so documents and queries sharing
/// content words land close in cosine space without a real model.
pub fn fixture_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];
    for word in text.split_whitespace() {
        let mut lower: String = word.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase();
        if lower.len() > 3 && lower.ends_with('s') {
            lower.pop();
        }
        if lower.is_empty() {
            continue;
        }
        let bucket = (xxhash_rust::xxh3::xxh3_64(lower.as_bytes()) as usize) % dimensions;
        vector[bucket] += 1.0;
    }
    vector
}

fn build_response(scripted: &ScriptedResponse, body: &str) -> String {
    match scripted {
        ScriptedResponse::Embeddings { dimensions } => {
            let inputs = extract_inputs(body);
            let data: Vec<serde_json::Value> = inputs
                .iter()
                .enumerate()
                .map(|(i, text)| serde_json::json!({"index": i, "embedding": fixture_embedding(text, *dimensions)}))
                .collect();
            let payload = serde_json::json!({"data": data}).to_string();
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                payload.len(),
                payload
            )
        }
        ScriptedResponse::Status { code, body } => format!(
            "HTTP/1.1 {code} Error\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        ),
    }
}

struct FakeItem {
    metadata: ItemMetadata,
    notes: NotesAndAnnotations,
}

/// A fake reference-manager host: items carry their full extractable text in
/// `abstract_text` so the pipeline never needs a real PDF worker.
pub struct FakeLibraryHost {
    items: Mutex<HashMap<String, FakeItem>>,
    order: Mutex<Vec<String>>,
}

impl FakeLibraryHost {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
        }
    }

    pub fn with_item(self, key: &str, title: &str, content: &str, modified: i64) -> Self {
        self.add_item(key, title, content, modified);
        self
    }

    pub fn add_item(&self, key: &str, title: &str, content: &str, modified: i64) {
        let mut items = self.items.lock().unwrap();
        items.insert(
            key.to_string(),
            FakeItem {
                metadata: ItemMetadata {
                    title: title.to_string(),
                    creators: vec!["A. Researcher".to_string()],
                    year: Some(2024),
                    item_type: "journalArticle".to_string(),
                    date_modified: modified,
                    attachment_keys: vec![],
                },
                notes: NotesAndAnnotations {
                    title: Some(title.to_string()),
                    abstract_text: Some(content.to_string()),
                    notes: vec![],
                    annotations: vec![],
                },
            },
        );
        self.order.lock().unwrap().push(key.to_string());
    }

    pub fn touch(&self, key: &str, modified: i64) {
        if let Some(item) = self.items.lock().unwrap().get_mut(key) {
            item.metadata.date_modified = modified;
        }
    }
}

impl Default for FakeLibraryHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LibraryHost for FakeLibraryHost {
    async fn list_regular_items(&self) -> Result<Vec<String>, HostError> {
        Ok(self.order.lock().unwrap().clone())
    }

    async fn get_item_metadata(&self, key: &str) -> Result<ItemMetadata, HostError> {
        self.items
            .lock()
            .unwrap()
            .get(key)
            .map(|item| item.metadata.clone())
            .ok_or_else(|| HostError::Metadata {
                item_key: key.to_string(),
                message: "no such item".to_string(),
            })
    }

    async fn get_attachment_modified(&self, _key: &str) -> Result<i64, HostError> {
        Ok(0)
    }

    async fn extract_pdf_text(&self, _file_path: &str, _timeout_ms: u64) -> Result<String, HostError> {
        Ok(String::new())
    }

    async fn get_notes_and_annotations(&self, key: &str) -> Result<NotesAndAnnotations, HostError> {
        self.items
            .lock()
            .unwrap()
            .get(key)
            .map(|item| item.notes.clone())
            .ok_or_else(|| HostError::Metadata {
                item_key: key.to_string(),
                message: "no such item".to_string(),
            })
    }
}
