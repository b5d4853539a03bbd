//! Persisted process-wide state: index progress, usage counters, and the
//! active embedding config, each round-tripped through the host's
//! preference store under a fixed JSON key.

use async_trait::async_trait;

/// A key/value preference store owned by the embedding host, injected as
/// `Arc<dyn PreferenceStore>`. No default implementation ships here: every
/// host persists preferences differently (a settings file, a database row,
/// an OS-level preference API).
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str);
    async fn remove(&self, key: &str);
}

pub const PREF_INDEX_PROGRESS: &str = "index_progress_json";
pub const PREF_API_USAGE_COUNTERS: &str = "api_usage_counters_json";
pub const PREF_EMBEDDING_CONFIG: &str = "embedding_config_json";

/// In-memory preference store, useful for tests and for hosts that don't
/// need cross-process persistence.
pub struct InMemoryPreferenceStore {
    values: tokio::sync::RwLock<std::collections::HashMap<String, String>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self {
            values: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryPreferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.values.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) {
        self.values.write().await.insert(key.to_string(), value.to_string());
    }

    async fn remove(&self, key: &str) {
        self.values.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryPreferenceStore::new();
        assert_eq!(store.get(PREF_INDEX_PROGRESS).await, None);
        store.set(PREF_INDEX_PROGRESS, "{}").await;
        assert_eq!(store.get(PREF_INDEX_PROGRESS).await, Some("{}".to_string()));
        store.remove(PREF_INDEX_PROGRESS).await;
        assert_eq!(store.get(PREF_INDEX_PROGRESS).await, None);
    }
}
