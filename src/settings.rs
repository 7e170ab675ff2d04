use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_NAMESPACE, DEFAULT_POLL_INTERVAL_SECONDS, DEFAULT_QUEUE_NAME, DEFAULT_REDIS_DSN,
    DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS, DEFAULT_STATUS_TTL_SECONDS,
};

/// Worker log verbosity. NONE silences everything, NORMAL suppresses only
/// debug, VERBOSE lets debug through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    None,
    #[default]
    Normal,
    Verbose,
}

impl LogLevel {
    pub fn env_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Normal => "info",
            LogLevel::Verbose => "debug",
        }
    }
}

/// How a reserved job gets executed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum ExecutionStrategy {
    /// Run `perform` inside the worker process. Used for tests and
    /// single-job runs.
    #[default]
    Inline,
    /// Spawn a child process per reserved job and block on its exit;
    /// non-zero exit is a job failure. The payload is written to the
    /// child's stdin as JSON.
    Subprocess { cmd: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Settings {
    pub redis_dsn: String,
    pub namespace: String,
    /// Queues polled in this exact order; `*` expands to all registered
    /// queues.
    pub queues: Vec<String>,
    pub poll_interval_seconds: f64,
    pub status_ttl_seconds: i64,
    /// Ceiling on how long a graceful stop waits for the in-flight job
    /// before aborting it.
    pub shutdown_grace_period_seconds: f64,
    pub log_level: LogLevel,
    pub execution: ExecutionStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_dsn: DEFAULT_REDIS_DSN.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            queues: vec![DEFAULT_QUEUE_NAME.to_string()],
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            status_ttl_seconds: DEFAULT_STATUS_TTL_SECONDS,
            shutdown_grace_period_seconds: DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS,
            log_level: LogLevel::default(),
            execution: ExecutionStrategy::default(),
        }
    }
}
