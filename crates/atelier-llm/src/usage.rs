use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub calls: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageSnapshot {
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub total_calls: u64,
    pub by_model: HashMap<String, ModelUsage>,
}

/// Cumulative token/cost/call totals per model for the life of the client.
#[derive(Default)]
pub struct UsageTracker {
    inner: Mutex<UsageSnapshot>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, model: &str, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        let mut usage = self.inner.lock().await;
        usage.total_tokens += input_tokens + output_tokens;
        usage.total_cost_usd += cost_usd;
        usage.total_calls += 1;

        let entry = usage.by_model.entry(model.to_string()).or_default();
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.cost_usd += cost_usd;
        entry.calls += 1;
    }

    pub async fn snapshot(&self) -> UsageSnapshot {
        self.inner.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_accumulates_per_model() {
        let tracker = UsageTracker::new();
        tracker.record("sonnet", 100, 50, 0.001).await;
        tracker.record("sonnet", 200, 100, 0.002).await;
        tracker.record("haiku", 10, 5, 0.0001).await;

        let snap = tracker.snapshot().await;
        assert_eq!(snap.total_calls, 3);
        assert_eq!(snap.total_tokens, 465);
        assert!((snap.total_cost_usd - 0.0031).abs() < 1e-9);
        assert_eq!(snap.by_model["sonnet"].calls, 2);
        assert_eq!(snap.by_model["sonnet"].input_tokens, 300);
        assert_eq!(snap.by_model["haiku"].output_tokens, 5);
    }
}
