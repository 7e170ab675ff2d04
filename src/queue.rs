use serde_json::Value;
use tracing::debug;

use crate::constants::{QUEUES_KEY, QUEUE_KEY_PREFIX};
use crate::error::Result;
use crate::store::Store;

/// Named FIFO queues plus the registry set that tracks which queues exist.
/// Pushing to a queue registers it as a side effect; registration survives
/// the queue draining to empty, so `queues()` keeps listing it until it is
/// explicitly removed.
#[derive(Clone)]
pub struct QueueRegistry {
    store: Store,
}

impl QueueRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn queue_key(queue: &str) -> String {
        format!("{QUEUE_KEY_PREFIX}{queue}")
    }

    /// Append a raw payload to the tail of `queue`, registering the queue
    /// first so a concurrent reader never sees a populated-but-unregistered
    /// queue.
    pub async fn push(&self, queue: &str, payload: &Value) -> Result<()> {
        let serialized = serde_json::to_string(payload)?;
        self.store.sadd(QUEUES_KEY, queue).await?;
        self.store.rpush(&Self::queue_key(queue), &serialized).await?;
        debug!(queue, "pushed payload");
        Ok(())
    }

    /// Pop the head of `queue`. `Ok(None)` means the queue is empty; a
    /// payload that no longer parses as JSON is an error, and the entry is
    /// consumed either way.
    pub async fn pop(&self, queue: &str) -> Result<Option<Value>> {
        let raw = self.store.lpop(&Self::queue_key(queue)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn size(&self, queue: &str) -> Result<i64> {
        self.store.llen(&Self::queue_key(queue)).await
    }

    /// Every registered queue name, sorted for deterministic iteration.
    pub async fn queues(&self) -> Result<Vec<String>> {
        let mut queues = self.store.smembers(QUEUES_KEY).await?;
        queues.sort();
        Ok(queues)
    }

    /// Drop a queue and its pending payloads, and unregister it.
    pub async fn remove(&self, queue: &str) -> Result<()> {
        self.store.del(&Self::queue_key(queue)).await?;
        self.store.srem(QUEUES_KEY, queue).await?;
        debug!(queue, "removed queue");
        Ok(())
    }
}
