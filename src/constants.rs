//! Persisted key layout, relative to the configured namespace.

pub const QUEUES_KEY: &str = "queues";
pub const QUEUE_KEY_PREFIX: &str = "queue:";
pub const WORKERS_KEY: &str = "workers";
pub const WORKER_KEY_PREFIX: &str = "worker:";
pub const WORKER_STARTED_SUFFIX: &str = ":started";
pub const STAT_KEY_PREFIX: &str = "stat:";
pub const PAUSED_WORKERS_KEY: &str = "paused";
pub const SCHEDULER_KEY: &str = "scheduler";
pub const FAILED_LIST_KEY: &str = "failed";
pub const FAILURE_KEY_PREFIX: &str = "failure:";

pub const DEFAULT_NAMESPACE: &str = "rjq";
pub const DEFAULT_REDIS_DSN: &str = "redis://localhost:6379/0";
pub const DEFAULT_QUEUE_NAME: &str = "default";
pub const DEFAULT_POLL_INTERVAL_SECONDS: f64 = 5.0;
pub const DEFAULT_STATUS_TTL_SECONDS: i64 = 60 * 60 * 24;
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS: f64 = 10.0;

/// Wildcard queue name: expands to every registered queue at poll time.
pub const WILDCARD_QUEUE: &str = "*";
