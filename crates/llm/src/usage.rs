use dashmap::DashMap;
use std::collections::BTreeMap;

/// Successful-request counter per provider id.
///
/// Only grows until an operator explicitly resets it.
#[derive(Debug, Default)]
pub struct UsageCounter {
    counts: DashMap<String, u64>,
}

impl UsageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, provider_id: &str) -> u64 {
        let mut count = self.counts.entry(provider_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn get(&self, provider_id: &str) -> u64 {
        self.counts.get(provider_id).map(|c| *c).unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn reset(&self) {
        self.counts.clear();
    }

    pub fn reset_provider(&self, provider_id: &str) {
        self.counts.remove(provider_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counts_and_resets() {
        let counter = UsageCounter::new();
        assert_eq!(counter.get("p1"), 0);
        counter.increment("p1");
        counter.increment("p1");
        counter.increment("p2");
        assert_eq!(counter.get("p1"), 2);

        counter.reset_provider("p1");
        assert_eq!(counter.snapshot(), BTreeMap::from([("p2".to_string(), 1)]));

        counter.reset();
        assert!(counter.snapshot().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let counter = Arc::new(UsageCounter::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    counter.increment("shared");
                }
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked");
        }
        assert_eq!(counter.get("shared"), 2000);
    }
}
