//! Trait contracts for the reference-manager host. The core never reaches
//! for a global; every collaborator is injected as `Arc<dyn Trait>` at
//! construction time.

use async_trait::async_trait;

use crate::error::HostError;

#[derive(Debug, Clone, Default)]
pub struct ItemMetadata {
    pub title: String,
    pub creators: Vec<String>,
    pub year: Option<i32>,
    pub item_type: String,
    pub date_modified: i64,
    pub attachment_keys: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NotesAndAnnotations {
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub notes: Vec<String>,
    pub annotations: Vec<String>,
}

/// The reference-manager host application: item metadata, attachments, and
/// PDF-text extraction. Out of scope for this crate, but its contract lives
/// here so the pipeline and search coordinator can depend on a trait object
/// instead of a concrete host implementation.
#[async_trait]
pub trait LibraryHost: Send + Sync {
    async fn list_regular_items(&self) -> Result<Vec<String>, HostError>;

    async fn get_item_metadata(&self, key: &str) -> Result<ItemMetadata, HostError>;

    async fn get_attachment_modified(&self, key: &str) -> Result<i64, HostError>;

    /// Delegates to an external PDF worker; failable and expected to be
    /// rate-limited by the pool that owns it.
    async fn extract_pdf_text(&self, file_path: &str, timeout_ms: u64) -> Result<String, HostError>;

    async fn get_notes_and_annotations(&self, key: &str) -> Result<NotesAndAnnotations, HostError>;
}
