use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::constants::{FAILED_LIST_KEY, FAILURE_KEY_PREFIX};
use crate::error::Result;
use crate::job::Job;
use crate::store::Store;

/// What gets persisted when a job raises: the payload as enqueued, the error
/// text, and which worker/queue it died on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failed_at: String,
    pub payload: crate::job::Payload,
    pub error: String,
    pub worker: String,
    pub queue: String,
}

impl FailureRecord {
    pub fn from_job(job: &Job, error: &str, worker: &str) -> Self {
        Self {
            failed_at: Utc::now().to_rfc3339(),
            payload: job.payload.clone(),
            error: error.to_string(),
            worker: worker.to_string(),
            queue: job.queue.clone(),
        }
    }
}

/// Where failed jobs go. Pluggable so alternates (alerting, an external
/// tracker) can replace the store-backed default without the worker engine
/// noticing.
#[async_trait]
pub trait FailureBackend: Send + Sync {
    async fn record(&self, failure: FailureRecord) -> Result<()>;

    /// Look up a failure by the job's token. `Ok(None)` if that job never
    /// failed or its record was cleared.
    async fn find(&self, job_id: &str) -> Result<Option<FailureRecord>>;

    /// Total failures recorded.
    async fn count(&self) -> Result<i64>;
}

/// Default backend: one record per failed job at `failure:<id>`, plus a list
/// of failed ids preserving failure order.
#[derive(Clone)]
pub struct StoreFailureBackend {
    store: Store,
}

impl StoreFailureBackend {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn failure_key(job_id: &str) -> String {
        format!("{FAILURE_KEY_PREFIX}{job_id}")
    }
}

#[async_trait]
impl FailureBackend for StoreFailureBackend {
    async fn record(&self, failure: FailureRecord) -> Result<()> {
        let job_id = failure.payload.id.clone();
        let serialized = serde_json::to_string(&failure)?;
        self.store.set(&Self::failure_key(&job_id), &serialized).await?;
        self.store.rpush(FAILED_LIST_KEY, &job_id).await?;
        Ok(())
    }

    async fn find(&self, job_id: &str) -> Result<Option<FailureRecord>> {
        match self.store.get(&Self::failure_key(job_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn count(&self) -> Result<i64> {
        self.store.llen(FAILED_LIST_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Payload;
    use serde_json::json;

    fn sample_job() -> Job {
        Job::new(
            "jobs".to_string(),
            Payload::new("EchoJob".to_string(), json!({"x": 1})),
        )
    }

    #[tokio::test]
    async fn record_then_find_by_job_id() {
        let backend = StoreFailureBackend::new(Store::in_memory("test"));
        let job = sample_job();
        backend
            .record(FailureRecord::from_job(&job, "boom", "host:1:jobs"))
            .await
            .unwrap();

        let found = backend.find(job.token()).await.unwrap().unwrap();
        assert_eq!(found.error, "boom");
        assert_eq!(found.worker, "host:1:jobs");
        assert_eq!(found.queue, "jobs");
        assert_eq!(found.payload.handler, "EchoJob");
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn find_unknown_is_none() {
        let backend = StoreFailureBackend::new(Store::in_memory("test"));
        assert!(backend.find("never-failed").await.unwrap().is_none());
        assert_eq!(backend.count().await.unwrap(), 0);
    }
}
