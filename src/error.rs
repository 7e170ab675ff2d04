use thiserror::Error;

/// Error surface of the job-queue engine.
///
/// Store-level failures propagate the backing store's own error; connection
/// failures are fatal and carry no retry machinery. Handler errors are always
/// caught at the worker boundary so one bad job cannot take down the poll
/// loop.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to connect to the backing store: {0}")]
    Connection(String),

    #[error("store operation failed: {0}")]
    Store(#[from] redis::RedisError),

    #[error("invalid job arguments: {0}")]
    Argument(String),

    #[error("unknown job handler '{0}'")]
    UnknownHandler(String),

    #[error("job execution failed: {0}")]
    JobExecution(String),

    #[error("malformed job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid worker id '{0}'")]
    WorkerId(String),

    #[error("{0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors raised by a job handler rather than the engine.
    pub fn is_job_failure(&self) -> bool {
        matches!(self, Error::JobExecution(_) | Error::UnknownHandler(_))
    }
}
