//! rjq: a persistent, multi-process background job queue on Redis.
//!
//! Producers enqueue named jobs onto named queues; worker processes reserve
//! and execute them with lifecycle hooks, tracked statuses, stat counters,
//! and pluggable failure capture. Atomic single-key store operations are the
//! only synchronization: a list pop guarantees at-most-one reservation per
//! job across any number of worker processes.

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod failure;
pub mod handler;
pub mod job;
pub mod queue;
pub mod settings;
pub mod signals;
pub mod stats;
pub mod status;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use error::{Error, Result};
pub use events::{EnqueueEvent, EventBus, HookAction, ListenerId};
pub use failure::{FailureBackend, FailureRecord, StoreFailureBackend};
pub use handler::{HandlerRegistry, JobHandler};
pub use job::{Client, Job, Payload, PerformOutcome};
pub use queue::QueueRegistry;
pub use settings::{ExecutionStrategy, LogLevel, Settings};
pub use stats::Stats;
pub use status::{JobStatus, StatusTracker};
pub use store::{Backend, MemoryBackend, RedisBackend, Store};
pub use worker::{Worker, WorkerCommand, WorkerHandle, WorkerId, WorkerRegistry, WorkerState};
