pub mod client;
pub mod rate_limiter;
pub mod usage;

pub use client::{BatchItem, EmbeddingClient, EmbeddingResult};
pub use usage::UsageCounters;
