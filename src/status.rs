use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Store;

/// Lifecycle of a tracked job. WAITING and RUNNING are transient; COMPLETE
/// and FAILED are terminal and put the record on a TTL clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Waiting,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "WAITING",
            JobStatus::Running => "RUNNING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusRecord {
    status: JobStatus,
    /// Last transition time, RFC 3339.
    updated: String,
}

/// Persisted status records, keyed by tracking token. Tracking is opt-in at
/// enqueue time; `update` on an untracked token is a silent no-op so callers
/// never need to branch on the tracking flag.
#[derive(Clone)]
pub struct StatusTracker {
    store: Store,
    ttl_seconds: i64,
}

impl StatusTracker {
    pub fn new(store: Store, ttl_seconds: i64) -> Self {
        Self { store, ttl_seconds }
    }

    fn record(status: JobStatus) -> Result<String> {
        let record = StatusRecord {
            status,
            updated: Utc::now().to_rfc3339(),
        };
        Ok(serde_json::to_string(&record)?)
    }

    /// Start tracking: write a WAITING record for `token`.
    pub async fn create(&self, token: &str) -> Result<()> {
        let payload = Self::record(JobStatus::Waiting)?;
        self.store.set(token, &payload).await?;
        Ok(())
    }

    /// Transition a tracked token. Untracked tokens are left alone. Terminal
    /// states start the record's expiry clock.
    pub async fn update(&self, token: &str, status: JobStatus) -> Result<()> {
        if !self.is_tracked(token).await? {
            return Ok(());
        }
        let payload = Self::record(status)?;
        if status.is_terminal() && self.ttl_seconds > 0 {
            self.store
                .set_ex(token, &payload, self.ttl_seconds as u64)
                .await?;
        } else {
            self.store.set(token, &payload).await?;
        }
        Ok(())
    }

    /// `Ok(None)` means untracked, expired, or stopped.
    pub async fn get(&self, token: &str) -> Result<Option<JobStatus>> {
        let raw = match self.store.get(token).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let record: StatusRecord = serde_json::from_str(&raw)?;
        Ok(Some(record.status))
    }

    /// Delete the record immediately, regardless of state.
    pub async fn stop(&self, token: &str) -> Result<()> {
        self.store.del(token).await?;
        Ok(())
    }

    pub async fn is_tracked(&self, token: &str) -> Result<bool> {
        self.store.exists(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> StatusTracker {
        StatusTracker::new(Store::in_memory("test"), 3600)
    }

    #[tokio::test]
    async fn create_then_read_reports_waiting() {
        let statuses = tracker();
        statuses.create("token-1").await.unwrap();
        assert!(statuses.is_tracked("token-1").await.unwrap());
        assert_eq!(
            statuses.get("token-1").await.unwrap(),
            Some(JobStatus::Waiting)
        );
    }

    #[tokio::test]
    async fn update_walks_the_lifecycle() {
        let statuses = tracker();
        statuses.create("token-1").await.unwrap();
        statuses.update("token-1", JobStatus::Running).await.unwrap();
        assert_eq!(
            statuses.get("token-1").await.unwrap(),
            Some(JobStatus::Running)
        );
        statuses
            .update("token-1", JobStatus::Complete)
            .await
            .unwrap();
        assert_eq!(
            statuses.get("token-1").await.unwrap(),
            Some(JobStatus::Complete)
        );
    }

    #[tokio::test]
    async fn update_on_untracked_token_is_a_noop() {
        let statuses = tracker();
        statuses
            .update("never-created", JobStatus::Running)
            .await
            .unwrap();
        assert_eq!(statuses.get("never-created").await.unwrap(), None);
        assert!(!statuses.is_tracked("never-created").await.unwrap());
    }

    #[tokio::test]
    async fn stop_deletes_immediately() {
        let statuses = tracker();
        statuses.create("token-1").await.unwrap();
        statuses.stop("token-1").await.unwrap();
        assert_eq!(statuses.get("token-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn status_serializes_as_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Waiting).unwrap(),
            "\"WAITING\""
        );
        assert_eq!(
            serde_json::from_str::<JobStatus>("\"FAILED\"").unwrap(),
            JobStatus::Failed
        );
        assert!(JobStatus::Complete.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
