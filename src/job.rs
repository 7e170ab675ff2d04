use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{EnqueueEvent, EventBus, HookAction};
use crate::handler::HandlerRegistry;
use crate::queue::QueueRegistry;
use crate::status::StatusTracker;
use crate::store::Store;

/// The serialized form that lives in a queue list: handler name, argument
/// structure, and the tracking token. The token doubles as the job id and is
/// always assigned, whether or not the producer opted into status tracking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    pub handler: String,
    pub args: Value,
    pub id: String,
}

impl Payload {
    pub fn new(handler: String, args: Value) -> Self {
        Self {
            handler,
            args,
            id: Uuid::new_v4().to_string(),
        }
    }
}

/// A reserved job: the payload plus where it came from and, once a worker
/// picks it up, who holds it.
#[derive(Debug, Clone)]
pub struct Job {
    pub queue: String,
    pub payload: Payload,
    pub worker: Option<String>,
}

impl Job {
    pub fn new(queue: String, payload: Payload) -> Self {
        Self {
            queue,
            payload,
            worker: None,
        }
    }

    pub fn token(&self) -> &str {
        &self.payload.id
    }
}

/// Outcome of a perform that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformOutcome {
    Performed,
    /// A before-perform listener vetoed execution. Not a failure: no stats,
    /// no failure record, no status transition.
    Skipped,
}

/// Arguments must be a JSON-style structure. Scalars and strings at the top
/// level are rejected before anything is written.
fn validate_args(args: &Value) -> Result<()> {
    match args {
        Value::Null | Value::Array(_) | Value::Object(_) => Ok(()),
        other => Err(Error::Argument(format!(
            "expected null, array, or object, got {other}"
        ))),
    }
}

/// Producer/consumer face of the queue: enqueue with optional tracking,
/// reserve, re-enqueue, and execute with the full hook sequence.
#[derive(Clone)]
pub struct Client {
    queues: QueueRegistry,
    statuses: StatusTracker,
    events: EventBus,
    handlers: HandlerRegistry,
}

impl Client {
    pub fn new(store: Store, status_ttl_seconds: i64) -> Self {
        Self {
            queues: QueueRegistry::new(store.clone()),
            statuses: StatusTracker::new(store, status_ttl_seconds),
            events: EventBus::new(),
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.queues
    }

    pub fn statuses(&self) -> &StatusTracker {
        &self.statuses
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Push a job and return its token. With `track`, a WAITING status record
    /// is written before the push so a status read immediately after enqueue
    /// never misses.
    pub async fn enqueue(
        &self,
        queue: &str,
        handler: &str,
        args: Value,
        track: bool,
    ) -> Result<String> {
        validate_args(&args)?;
        let payload = Payload::new(handler.to_string(), args);
        let token = payload.id.clone();
        if track {
            self.statuses.create(&token).await?;
        }
        self.queues.push(queue, &serde_json::to_value(&payload)?).await?;
        debug!(queue, handler, token, "enqueued job");
        self.events.emit_after_enqueue(&EnqueueEvent {
            handler: handler.to_string(),
            args: payload.args,
            queue: queue.to_string(),
            token: token.clone(),
        });
        Ok(token)
    }

    /// Reserve the head job of `queue`. `Ok(None)` when the queue is empty;
    /// a list entry that does not deserialize as a payload is an error and
    /// the entry is consumed.
    pub async fn reserve(&self, queue: &str) -> Result<Option<Job>> {
        let value = match self.queues.pop(queue).await? {
            Some(value) => value,
            None => return Ok(None),
        };
        let payload: Payload = serde_json::from_value(value)?;
        Ok(Some(Job::new(queue.to_string(), payload)))
    }

    /// Reserve from the first non-empty queue in the given order.
    pub async fn reserve_any(&self, queues: &[String]) -> Result<Option<Job>> {
        for queue in queues {
            if let Some(job) = self.reserve(queue).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Re-enqueue an equivalent job: same queue, handler, args, and tracking
    /// choice, under a fresh token. The original job's status record is left
    /// untouched.
    pub async fn recreate(&self, job: &Job) -> Result<String> {
        let track = self.statuses.is_tracked(job.token()).await?;
        self.enqueue(&job.queue, &job.payload.handler, job.payload.args.clone(), track)
            .await
    }

    /// Execute a reserved job: before-perform hooks (a Skip cancels cleanly),
    /// then `set_up`/`perform`/`tear_down`, then after-perform hooks.
    /// `tear_down` always runs once `set_up` succeeded, even when `perform`
    /// failed; the perform error takes precedence over a tear-down error.
    pub async fn perform(&self, job: &Job) -> Result<PerformOutcome> {
        if self.events.run_before_perform(job)? == HookAction::Skip {
            debug!(token = job.token(), "perform vetoed by listener");
            return Ok(PerformOutcome::Skipped);
        }

        let mut handler = self.handlers.resolve(&job.payload.handler)?;
        let args = &job.payload.args;

        handler
            .set_up(args)
            .await
            .map_err(|err| Error::JobExecution(format!("setUp failed: {err}")))?;

        let performed = handler
            .perform(args)
            .await
            .map_err(|err| Error::JobExecution(format!("perform failed: {err}")));

        let torn_down = handler
            .tear_down(args)
            .await
            .map_err(|err| Error::JobExecution(format!("tearDown failed: {err}")));

        performed?;
        torn_down?;

        self.events.run_after_perform(job)?;
        Ok(PerformOutcome::Performed)
    }
}
