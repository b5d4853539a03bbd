//! Typed error hierarchy shared by every component.
//!
//! Nothing in this crate returns `anyhow::Error` or `Box<dyn Error>` across a
//! public boundary: callers need the structured `kind`/`retryable` fields to
//! decide whether to retry, auto-pause, or surface a fatal condition.

use thiserror::Error;

/// Classification of an embedding-provider failure, per the error table in
/// the embedding client design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingErrorKind {
    Network,
    RateLimit,
    Auth,
    InvalidRequest,
    Server,
    Config,
    Unknown,
}

impl EmbeddingErrorKind {
    /// Whether the pipeline should offer to resume after this kind of failure.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            EmbeddingErrorKind::Network
                | EmbeddingErrorKind::RateLimit
                | EmbeddingErrorKind::Server
                | EmbeddingErrorKind::Unknown
        )
    }
}

/// A classified embedding-provider error: `{type, retryable, message, user_message}`.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[error("{message}")]
pub struct EmbeddingError {
    pub kind: EmbeddingErrorKind,
    pub message: String,
    pub user_message: String,
}

impl EmbeddingError {
    pub fn new(kind: EmbeddingErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let user_message = match kind {
            EmbeddingErrorKind::Network => {
                "Could not reach the embedding provider. Check your network connection."
            }
            EmbeddingErrorKind::RateLimit => {
                "The embedding provider is rate-limiting requests. Indexing will pause briefly."
            }
            EmbeddingErrorKind::Auth => {
                "The embedding provider rejected the API key. Check your configuration."
            }
            EmbeddingErrorKind::InvalidRequest => {
                "The embedding request was malformed."
            }
            EmbeddingErrorKind::Server => "The embedding provider returned a server error.",
            EmbeddingErrorKind::Config => "Embedding configuration is missing a required field.",
            EmbeddingErrorKind::Unknown => "An unexpected embedding error occurred.",
        }
        .to_string();
        Self {
            kind,
            message,
            user_message,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(EmbeddingErrorKind::Config, message)
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

/// Errors raised by the SQLite-backed vector store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("query has {query_dim} dimensions but the store holds {store_dim}-dimensional vectors")]
    DimensionMismatch { query_dim: usize, store_dim: usize },

    #[error("vector encoding error: {0}")]
    Encoding(String),

    #[error("blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors surfaced by external host-provided collaborators.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host extraction failed for {item_key}: {message}")]
    Extraction { item_key: String, message: String },

    #[error("host metadata lookup failed for {item_key}: {message}")]
    Metadata { item_key: String, message: String },
}

/// Errors raised while running the indexing pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("indexing was aborted")]
    Cancelled,
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
