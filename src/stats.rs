use crate::constants::STAT_KEY_PREFIX;
use crate::error::Result;
use crate::store::Store;

/// Named integer counters (`processed`, `failed`, plus per-worker variants).
/// A counter that was never incremented reads as zero.
#[derive(Clone)]
pub struct Stats {
    store: Store,
}

impl Stats {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn stat_key(name: &str) -> String {
        format!("{STAT_KEY_PREFIX}{name}")
    }

    pub async fn get(&self, name: &str) -> Result<i64> {
        let raw = self.store.get(&Self::stat_key(name)).await?;
        Ok(raw.and_then(|value| value.parse().ok()).unwrap_or(0))
    }

    pub async fn incr(&self, name: &str, by: i64) -> Result<i64> {
        self.store.incr_by(&Self::stat_key(name), by).await
    }

    pub async fn decr(&self, name: &str, by: i64) -> Result<i64> {
        self.store.decr_by(&Self::stat_key(name), by).await
    }

    pub async fn clear(&self, name: &str) -> Result<()> {
        self.store.del(&Self::stat_key(name)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_counter_reads_zero() {
        let stats = Stats::new(Store::in_memory("test"));
        assert_eq!(stats.get("processed").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn incr_decr_clear() {
        let stats = Stats::new(Store::in_memory("test"));
        assert_eq!(stats.incr("processed", 1).await.unwrap(), 1);
        assert_eq!(stats.incr("processed", 4).await.unwrap(), 5);
        assert_eq!(stats.decr("processed", 2).await.unwrap(), 3);
        assert_eq!(stats.get("processed").await.unwrap(), 3);
        stats.clear("processed").await.unwrap();
        assert_eq!(stats.get("processed").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn counters_are_independent() {
        let stats = Stats::new(Store::in_memory("test"));
        stats.incr("processed", 2).await.unwrap();
        stats.incr("failed", 1).await.unwrap();
        assert_eq!(stats.get("processed").await.unwrap(), 2);
        assert_eq!(stats.get("failed").await.unwrap(), 1);
    }
}
