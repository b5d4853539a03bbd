//! Process-wide usage accounting for the embedding client.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageCounters {
    pub total_tokens: u64,
    pub total_requests: u64,
    pub total_texts: u64,
    pub estimated_cost_usd: f64,
    pub session_tokens: u64,
    pub session_requests: u64,
    pub current_rpm: u32,
    pub current_tpm: u32,
    pub rate_limit_hits: u64,
}

impl UsageCounters {
    /// Records one successful batch call.
    pub fn record_batch(&mut self, texts: u64, tokens: u64, cost_per_million_tokens: f64) {
        self.total_requests += 1;
        self.total_texts += texts;
        self.total_tokens += tokens;
        self.estimated_cost_usd += (tokens as f64) * cost_per_million_tokens / 1e6;
        self.session_requests += 1;
        self.session_tokens += tokens;
    }

    pub fn record_rate_limit_hit(&mut self) {
        self.rate_limit_hits += 1;
    }

    /// Resets only the per-process session counters; cumulative fields
    /// survive.
    pub fn reset_session(&mut self) {
        self.session_tokens = 0;
        self.session_requests = 0;
    }

    /// Resets everything, including persisted cumulative fields.
    pub fn reset_all(&mut self) {
        *self = UsageCounters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_batch_accumulates_monotonically() {
        let mut counters = UsageCounters::default();
        counters.record_batch(10, 100, 0.02);
        counters.record_batch(5, 50, 0.02);
        assert_eq!(counters.total_requests, 2);
        assert_eq!(counters.total_texts, 15);
        assert_eq!(counters.total_tokens, 150);
        assert!(counters.estimated_cost_usd > 0.0);
    }

    #[test]
    fn reset_session_preserves_cumulative() {
        let mut counters = UsageCounters::default();
        counters.record_batch(10, 100, 0.02);
        counters.reset_session();
        assert_eq!(counters.session_tokens, 0);
        assert_eq!(counters.total_tokens, 100);
    }
}
