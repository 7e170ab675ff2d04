use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::constants::{
    PAUSED_WORKERS_KEY, SCHEDULER_KEY, WILDCARD_QUEUE, WORKERS_KEY, WORKER_KEY_PREFIX,
    WORKER_STARTED_SUFFIX,
};
use crate::error::{Error, Result};
use crate::failure::{FailureBackend, FailureRecord, StoreFailureBackend};
use crate::job::{Client, Job, Payload, PerformOutcome};
use crate::settings::{ExecutionStrategy, Settings};
use crate::stats::Stats;
use crate::status::JobStatus;
use crate::store::Store;

/// `host:pid:queue1,queue2`. Unique per live worker process; the host and
/// pid parts drive dead-worker pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerId {
    pub host: String,
    pub pid: u32,
    pub queues: Vec<String>,
}

impl WorkerId {
    pub fn new(host: String, pid: u32, queues: Vec<String>) -> Self {
        Self { host, pid, queues }
    }

    /// Identity for this process, from the local hostname and pid.
    pub fn local(queues: Vec<String>) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self::new(host, std::process::id(), queues)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.splitn(3, ':');
        let host = parts.next().filter(|h| !h.is_empty());
        let pid = parts.next().and_then(|p| p.parse::<u32>().ok());
        let queues: Option<Vec<String>> = parts.next().map(|qs| {
            qs.split(',')
                .filter(|q| !q.is_empty())
                .map(str::to_string)
                .collect()
        });
        match (host, pid, queues) {
            (Some(host), Some(pid), Some(queues)) if !queues.is_empty() => {
                Ok(Self::new(host.to_string(), pid, queues))
            }
            _ => Err(Error::WorkerId(raw.to_string())),
        }
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.pid, self.queues.join(","))
    }
}

/// Worker lifecycle. PROCESSING is entered per reserved job; the rest follow
/// the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Working,
    Processing,
    Paused,
    ShuttingDown,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Working => "working",
            WorkerState::Processing => "processing",
            WorkerState::Paused => "paused",
            WorkerState::ShuttingDown => "shutting_down",
            WorkerState::Stopped => "stopped",
        }
    }
}

/// Control commands. Delivered over an in-process channel; the process-level
/// signal shim translates OS signals into these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    Pause,
    Resume,
    GracefulStop,
    /// Abort in-flight work; an interrupted job is recorded as FAILED.
    ImmediateStop,
}

/// Cloneable sender half of a worker's command channel.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl WorkerHandle {
    pub fn send(&self, command: WorkerCommand) {
        // A closed channel means the worker already exited.
        let _ = self.tx.send(command);
    }

    pub fn pause(&self) {
        self.send(WorkerCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(WorkerCommand::Resume);
    }

    pub fn stop_graceful(&self) {
        self.send(WorkerCommand::GracefulStop);
    }

    pub fn stop_immediate(&self) {
        self.send(WorkerCommand::ImmediateStop);
    }
}

/// A worker's "working on" record: which job it holds and since when.
#[derive(Debug, Clone)]
pub struct WorkingOn {
    pub queue: String,
    pub run_at: String,
    pub payload: Payload,
}

/// Persisted worker bookkeeping: the active-worker set, per-worker start
/// times and "working on" hashes, the paused set, and the scheduler-role
/// marker. Every mutation is a single atomic store operation.
#[derive(Clone)]
pub struct WorkerRegistry {
    store: Store,
    stats: Stats,
}

impl WorkerRegistry {
    pub fn new(store: Store) -> Self {
        let stats = Stats::new(store.clone());
        Self { store, stats }
    }

    fn worker_key(id: &WorkerId) -> String {
        format!("{WORKER_KEY_PREFIX}{id}")
    }

    fn started_key(id: &WorkerId) -> String {
        format!("{WORKER_KEY_PREFIX}{id}{WORKER_STARTED_SUFFIX}")
    }

    pub async fn register(&self, id: &WorkerId) -> Result<()> {
        self.store.sadd(WORKERS_KEY, &id.to_string()).await?;
        self.store
            .set(&Self::started_key(id), &Utc::now().to_rfc3339())
            .await?;
        Ok(())
    }

    /// Remove every trace of a worker: registration, start time, working-on
    /// record, paused membership, and its per-worker counters.
    pub async fn unregister(&self, id: &WorkerId) -> Result<()> {
        let id_str = id.to_string();
        self.store.srem(WORKERS_KEY, &id_str).await?;
        self.store.del(&Self::worker_key(id)).await?;
        self.store.del(&Self::started_key(id)).await?;
        self.store.srem(PAUSED_WORKERS_KEY, &id_str).await?;
        self.stats.clear(&format!("processed:{id_str}")).await?;
        self.stats.clear(&format!("failed:{id_str}")).await?;
        Ok(())
    }

    pub async fn is_registered(&self, id: &WorkerId) -> Result<bool> {
        self.store.sismember(WORKERS_KEY, &id.to_string()).await
    }

    /// All registered workers. Entries that no longer parse are skipped.
    pub async fn workers(&self) -> Result<Vec<WorkerId>> {
        let mut ids = Vec::new();
        for raw in self.store.smembers(WORKERS_KEY).await? {
            match WorkerId::parse(&raw) {
                Ok(id) => ids.push(id),
                Err(_) => warn!(worker = raw, "skipping malformed worker registration"),
            }
        }
        Ok(ids)
    }

    pub async fn started(&self, id: &WorkerId) -> Result<Option<String>> {
        self.store.get(&Self::started_key(id)).await
    }

    pub async fn set_working_on(&self, id: &WorkerId, job: &Job) -> Result<()> {
        let fields = vec![
            ("queue".to_string(), job.queue.clone()),
            ("run_at".to_string(), Utc::now().to_rfc3339()),
            ("payload".to_string(), serde_json::to_string(&job.payload)?),
        ];
        self.store.hset_all(&Self::worker_key(id), &fields).await
    }

    pub async fn working_on(&self, id: &WorkerId) -> Result<Option<WorkingOn>> {
        let hash = self.store.hgetall(&Self::worker_key(id)).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        let queue = hash.get("queue").cloned().unwrap_or_default();
        let run_at = hash.get("run_at").cloned().unwrap_or_default();
        let payload = match hash.get("payload") {
            Some(raw) => serde_json::from_str(raw)?,
            None => return Ok(None),
        };
        Ok(Some(WorkingOn {
            queue,
            run_at,
            payload,
        }))
    }

    pub async fn clear_working_on(&self, id: &WorkerId) -> Result<()> {
        self.store.del(&Self::worker_key(id)).await?;
        Ok(())
    }

    pub async fn pause(&self, id: &WorkerId) -> Result<()> {
        self.store.sadd(PAUSED_WORKERS_KEY, &id.to_string()).await?;
        Ok(())
    }

    pub async fn resume(&self, id: &WorkerId) -> Result<()> {
        self.store.srem(PAUSED_WORKERS_KEY, &id.to_string()).await?;
        Ok(())
    }

    pub async fn is_paused(&self, id: &WorkerId) -> Result<bool> {
        self.store
            .sismember(PAUSED_WORKERS_KEY, &id.to_string())
            .await
    }

    pub async fn paused_workers(&self) -> Result<Vec<String>> {
        let mut paused = self.store.smembers(PAUSED_WORKERS_KEY).await?;
        paused.sort();
        Ok(paused)
    }

    /// Claim the singleton scheduler role. Returns false when another pid
    /// already holds it.
    pub async fn claim_scheduler_role(&self, pid: u32) -> Result<bool> {
        self.store.set_nx(SCHEDULER_KEY, &pid.to_string()).await
    }

    pub async fn scheduler_pid(&self) -> Result<Option<u32>> {
        let raw = self.store.get(SCHEDULER_KEY).await?;
        Ok(raw.and_then(|value| value.parse().ok()))
    }

    pub async fn release_scheduler_role(&self) -> Result<()> {
        self.store.del(SCHEDULER_KEY).await?;
        Ok(())
    }
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    // No portable liveness probe; never prune.
    true
}

enum Flow {
    Continue,
    Shutdown { immediate: bool },
}

/// Pending until the armed deadline passes; never resolves while unarmed.
async fn grace_expiry(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// One worker process: registers, polls its queues in priority order,
/// executes reserved jobs with the configured strategy, and reacts to
/// commands between (and, for immediate stop, during) jobs.
pub struct Worker {
    id: WorkerId,
    client: Client,
    stats: Stats,
    registry: WorkerRegistry,
    failures: Arc<dyn FailureBackend>,
    settings: Settings,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    // Keeps the channel open even when every external handle is dropped.
    _keepalive: mpsc::UnboundedSender<WorkerCommand>,
    burst: bool,
}

impl Worker {
    /// Build a worker and the handle that controls it. Worker identity is
    /// `host:pid:queues`, so run at most one worker per OS process: a second
    /// worker in the same process with the same queue list shares the
    /// first's identity, and their registry records (working-on hash,
    /// started stamp, per-worker counters) overwrite each other. Reservation
    /// itself stays exactly-once either way; it relies on the store's atomic
    /// pop, not on identity.
    pub fn new(store: Store, client: Client, settings: Settings) -> (Self, WorkerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = WorkerId::local(settings.queues.clone());
        let worker = Self {
            id,
            client,
            stats: Stats::new(store.clone()),
            registry: WorkerRegistry::new(store.clone()),
            failures: Arc::new(StoreFailureBackend::new(store)),
            settings,
            commands: rx,
            _keepalive: tx.clone(),
            burst: false,
        };
        (worker, WorkerHandle { tx })
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Drain the queues once, then exit instead of idling.
    pub fn set_burst(&mut self, burst: bool) {
        self.burst = burst;
    }

    pub fn set_failure_backend(&mut self, backend: Arc<dyn FailureBackend>) {
        self.failures = backend;
    }

    fn poll_interval(&self) -> Duration {
        // Jittered so a fleet of idle workers does not poll in lockstep.
        let jitter = rand::rng().random_range(0.9..1.1);
        Duration::from_secs_f64((self.settings.poll_interval_seconds * jitter).max(0.01))
    }

    /// How long a graceful stop waits on the in-flight job before aborting.
    fn grace_period(&self) -> Duration {
        Duration::from_secs_f64(self.settings.shutdown_grace_period_seconds.max(0.0))
    }

    /// Queues in polling order; `*` expands to every registered queue,
    /// sorted, at poll time.
    async fn polling_queues(&self) -> Result<Vec<String>> {
        if self.id.queues.iter().any(|q| q == WILDCARD_QUEUE) {
            self.client.queues().queues().await
        } else {
            Ok(self.id.queues.clone())
        }
    }

    /// Deregister same-host workers whose process died without cleaning up,
    /// marking any job they held as FAILED. The sole recovery path for
    /// ungraceful crashes.
    pub async fn prune_dead_workers(&self) -> Result<usize> {
        let mut pruned = 0;
        for peer in self.registry.workers().await? {
            if peer.host != self.id.host || peer.pid == self.id.pid || pid_is_alive(peer.pid) {
                continue;
            }
            info!(worker = %peer, "pruning dead worker");
            if let Some(working) = self.registry.working_on(&peer).await? {
                let mut job = Job::new(working.queue, working.payload);
                job.worker = Some(peer.to_string());
                self.fail_job(&job, &peer, "worker process died while holding this job")
                    .await?;
            }
            self.registry.unregister(&peer).await?;
            pruned += 1;
        }
        Ok(pruned)
    }

    async fn fail_job(&self, job: &Job, owner: &WorkerId, reason: &str) -> Result<()> {
        let owner_str = owner.to_string();
        self.failures
            .record(FailureRecord::from_job(job, reason, &owner_str))
            .await?;
        self.stats.incr("failed", 1).await?;
        self.stats.incr(&format!("failed:{owner_str}"), 1).await?;
        self.client
            .statuses()
            .update(job.token(), JobStatus::Failed)
            .await?;
        Ok(())
    }

    async fn execute_subprocess(&self, job: &Job, cmd: &[String]) -> Result<PerformOutcome> {
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| Error::Config("execution.cmd must not be empty".to_string()))?;
        self.client.events().emit_before_fork(job);
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| Error::JobExecution(format!("failed to spawn job child: {err}")))?;
        self.client.events().emit_after_fork(job);

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&job.payload)?;
            stdin
                .write_all(&payload)
                .await
                .map_err(|err| Error::JobExecution(format!("failed to write payload: {err}")))?;
        }

        let status = child
            .wait()
            .await
            .map_err(|err| Error::JobExecution(format!("failed to wait on job child: {err}")))?;
        if status.success() {
            Ok(PerformOutcome::Performed)
        } else {
            Err(Error::JobExecution(format!(
                "job child exited with {status}"
            )))
        }
    }

    /// Run one reserved job to completion: mark it held, execute, settle
    /// stats and status, release it.
    async fn process(&self, job: &Job) -> Result<()> {
        let token = job.token().to_string();
        self.registry.set_working_on(&self.id, job).await?;
        self.client
            .statuses()
            .update(&token, JobStatus::Running)
            .await?;

        let outcome = match &self.settings.execution {
            ExecutionStrategy::Inline => self.client.perform(job).await,
            ExecutionStrategy::Subprocess { cmd } => self.execute_subprocess(job, cmd).await,
        };

        match outcome {
            Ok(PerformOutcome::Performed) => {
                self.client
                    .statuses()
                    .update(&token, JobStatus::Complete)
                    .await?;
                self.stats.incr("processed", 1).await?;
                self.stats
                    .incr(&format!("processed:{}", self.id), 1)
                    .await?;
                info!(queue = job.queue, token, "job done");
            }
            Ok(PerformOutcome::Skipped) => {
                // Vetoed: consumed but counted nowhere. The record still
                // reaches a terminal state so its TTL applies.
                self.client
                    .statuses()
                    .update(&token, JobStatus::Complete)
                    .await?;
                debug!(queue = job.queue, token, "job skipped");
            }
            Err(err) => {
                // Anything raised while executing this job counts as a job
                // failure; only errors outside a job can stop the loop.
                error!(queue = job.queue, token, %err, "job failed");
                self.fail_job(job, &self.id, &err.to_string()).await?;
            }
        }

        self.registry.clear_working_on(&self.id).await?;
        Ok(())
    }

    fn apply_command(&self, command: WorkerCommand, paused: &mut bool) -> Flow {
        match command {
            WorkerCommand::Pause => {
                *paused = true;
                Flow::Continue
            }
            WorkerCommand::Resume => {
                *paused = false;
                Flow::Continue
            }
            WorkerCommand::GracefulStop => Flow::Shutdown { immediate: false },
            WorkerCommand::ImmediateStop => Flow::Shutdown { immediate: true },
        }
    }

    /// Main loop. Returns once a stop command arrives (or the queues drain,
    /// in burst mode); the worker is deregistered on the way out.
    pub async fn run(mut self) -> Result<()> {
        let (_, dummy_rx) = mpsc::unbounded_channel();
        let mut commands = std::mem::replace(&mut self.commands, dummy_rx);

        let mut state = WorkerState::Starting;
        info!(worker = %self.id, state = state.as_str(), "worker starting");

        let pruned = self.prune_dead_workers().await?;
        if pruned > 0 {
            info!(worker = %self.id, pruned, "pruned dead workers");
        }
        self.registry.register(&self.id).await?;

        let mut paused = false;
        let mut pending: VecDeque<WorkerCommand> = VecDeque::new();
        let mut shutdown_immediate = false;

        state = WorkerState::Working;
        info!(worker = %self.id, state = state.as_str(), "polling queues");

        'main: loop {
            while let Ok(command) = commands.try_recv() {
                pending.push_back(command);
            }
            while let Some(command) = pending.pop_front() {
                let was_paused = paused;
                match self.apply_command(command, &mut paused) {
                    Flow::Continue => {}
                    Flow::Shutdown { immediate } => {
                        shutdown_immediate = immediate;
                        break 'main;
                    }
                }
                if paused != was_paused {
                    if paused {
                        self.registry.pause(&self.id).await?;
                        state = WorkerState::Paused;
                        info!(worker = %self.id, state = state.as_str(), "paused");
                    } else {
                        self.registry.resume(&self.id).await?;
                        state = WorkerState::Working;
                        info!(worker = %self.id, state = state.as_str(), "resumed");
                    }
                }
            }

            if paused {
                tokio::select! {
                    command = commands.recv() => {
                        pending.push_back(command.unwrap_or(WorkerCommand::GracefulStop));
                    }
                    _ = tokio::time::sleep(self.poll_interval()) => {}
                }
                continue;
            }

            let queues = self.polling_queues().await?;
            let reserved = match self.client.reserve_any(&queues).await {
                Ok(reserved) => reserved,
                Err(Error::Payload(err)) => {
                    // A malformed list entry is consumed and logged; it must
                    // not take the poll loop down.
                    warn!(worker = %self.id, %err, "discarded malformed payload");
                    continue;
                }
                Err(err) => return Err(err),
            };

            match reserved {
                Some(mut job) => {
                    job.worker = Some(self.id.to_string());
                    state = WorkerState::Processing;
                    debug!(
                        worker = %self.id,
                        state = state.as_str(),
                        queue = job.queue,
                        token = job.token(),
                        "reserved job"
                    );

                    let interrupted = {
                        // A graceful stop arms the grace deadline; past it,
                        // the in-flight job is aborted like an immediate stop.
                        let mut grace_deadline = None;
                        let process = self.process(&job);
                        tokio::pin!(process);
                        loop {
                            tokio::select! {
                                result = &mut process => {
                                    result?;
                                    break None;
                                }
                                command = commands.recv() => {
                                    match command.unwrap_or(WorkerCommand::GracefulStop) {
                                        WorkerCommand::ImmediateStop => {
                                            break Some("worker received immediate stop mid-job");
                                        }
                                        WorkerCommand::GracefulStop => {
                                            grace_deadline.get_or_insert_with(|| {
                                                tokio::time::Instant::now() + self.grace_period()
                                            });
                                            pending.push_back(WorkerCommand::GracefulStop);
                                        }
                                        other => pending.push_back(other),
                                    }
                                }
                                _ = grace_expiry(grace_deadline) => {
                                    break Some("shutdown grace period expired mid-job");
                                }
                            }
                        }
                    };

                    if let Some(reason) = interrupted {
                        // Dirty exit: the aborted job is a failure.
                        warn!(worker = %self.id, token = job.token(), reason, "aborting job");
                        self.fail_job(&job, &self.id, reason).await?;
                        self.registry.clear_working_on(&self.id).await?;
                        shutdown_immediate = true;
                        break 'main;
                    }

                    state = WorkerState::Working;
                    debug!(worker = %self.id, state = state.as_str(), "job settled");
                }
                None => {
                    if self.burst {
                        info!(worker = %self.id, "queues drained, burst worker exiting");
                        break 'main;
                    }
                    tokio::select! {
                        command = commands.recv() => {
                            pending.push_back(command.unwrap_or(WorkerCommand::GracefulStop));
                        }
                        _ = tokio::time::sleep(self.poll_interval()) => {}
                    }
                }
            }
        }

        state = if shutdown_immediate {
            WorkerState::Stopped
        } else {
            WorkerState::ShuttingDown
        };
        info!(worker = %self.id, state = state.as_str(), "shutting down");
        self.registry.unregister(&self.id).await?;
        info!(worker = %self.id, state = WorkerState::Stopped.as_str(), "worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // High enough that no live process should hold it.
    const DEAD_PID: u32 = 3_999_999;

    fn test_id(pid: u32) -> WorkerId {
        WorkerId::new("box1".to_string(), pid, vec!["jobs".to_string()])
    }

    #[test]
    fn worker_id_round_trips() {
        let id = WorkerId::new(
            "box1".to_string(),
            42,
            vec!["high".to_string(), "low".to_string()],
        );
        let rendered = id.to_string();
        assert_eq!(rendered, "box1:42:high,low");
        assert_eq!(WorkerId::parse(&rendered).unwrap(), id);
    }

    #[test]
    fn worker_id_rejects_garbage() {
        for raw in ["", "box1", "box1:notapid:jobs", "box1:42", "box1:42:"] {
            assert!(WorkerId::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[tokio::test]
    async fn register_unregister_lifecycle() {
        let store = Store::in_memory("test");
        let registry = WorkerRegistry::new(store.clone());
        let stats = Stats::new(store);
        let id = test_id(42);

        registry.register(&id).await.unwrap();
        assert!(registry.is_registered(&id).await.unwrap());
        assert!(registry.started(&id).await.unwrap().is_some());
        registry.pause(&id).await.unwrap();
        stats.incr(&format!("processed:{id}"), 3).await.unwrap();

        registry.unregister(&id).await.unwrap();
        assert!(!registry.is_registered(&id).await.unwrap());
        assert!(registry.started(&id).await.unwrap().is_none());
        assert!(!registry.is_paused(&id).await.unwrap());
        assert_eq!(stats.get(&format!("processed:{id}")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn working_on_round_trips() {
        let registry = WorkerRegistry::new(Store::in_memory("test"));
        let id = test_id(42);
        let job = Job::new(
            "jobs".to_string(),
            Payload::new("EchoJob".to_string(), json!({"x": 1})),
        );

        assert!(registry.working_on(&id).await.unwrap().is_none());
        registry.set_working_on(&id, &job).await.unwrap();
        let working = registry.working_on(&id).await.unwrap().unwrap();
        assert_eq!(working.queue, "jobs");
        assert_eq!(working.payload, job.payload);
        registry.clear_working_on(&id).await.unwrap();
        assert!(registry.working_on(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scheduler_role_is_exclusive() {
        let registry = WorkerRegistry::new(Store::in_memory("test"));
        assert!(registry.claim_scheduler_role(100).await.unwrap());
        assert!(!registry.claim_scheduler_role(200).await.unwrap());
        assert_eq!(registry.scheduler_pid().await.unwrap(), Some(100));
        registry.release_scheduler_role().await.unwrap();
        assert!(registry.claim_scheduler_role(200).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_registrations_are_skipped() {
        let store = Store::in_memory("test");
        let registry = WorkerRegistry::new(store.clone());
        store.sadd(WORKERS_KEY, "not-a-worker-id").await.unwrap();
        registry.register(&test_id(42)).await.unwrap();
        let workers = registry.workers().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0], test_id(42));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pruning_removes_dead_peer_and_fails_its_job() {
        let store = Store::in_memory("test");
        let client = Client::new(store.clone(), 3600);
        let settings = Settings {
            queues: vec!["jobs".to_string()],
            ..Settings::default()
        };
        let (worker, _handle) = Worker::new(store.clone(), client.clone(), settings);
        let registry = worker.registry().clone();
        let stats = Stats::new(store.clone());

        // A stale registration on this host with a dead pid, holding a
        // tracked job.
        let dead = WorkerId::new(worker.id().host.clone(), DEAD_PID, vec!["jobs".to_string()]);
        registry.register(&dead).await.unwrap();
        let payload = Payload::new("EchoJob".to_string(), json!({"x": 1}));
        let token = payload.id.clone();
        client.statuses().create(&token).await.unwrap();
        registry
            .set_working_on(&dead, &Job::new("jobs".to_string(), payload))
            .await
            .unwrap();

        assert_eq!(worker.prune_dead_workers().await.unwrap(), 1);
        assert!(!registry.is_registered(&dead).await.unwrap());
        assert_eq!(
            client.statuses().get(&token).await.unwrap(),
            Some(JobStatus::Failed)
        );
        assert_eq!(stats.get("failed").await.unwrap(), 1);
        let failures = StoreFailureBackend::new(store);
        assert!(failures.find(&token).await.unwrap().is_some());

        // Second sweep finds nothing; the failure is recorded exactly once.
        assert_eq!(worker.prune_dead_workers().await.unwrap(), 0);
        assert_eq!(Stats::new(registry.store.clone()).get("failed").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn workers_in_one_process_share_an_identity() {
        let store = Store::in_memory("test");
        let client = Client::new(store.clone(), 3600);
        let settings = Settings {
            queues: vec!["jobs".to_string()],
            ..Settings::default()
        };
        let (first, _h1) = Worker::new(store.clone(), client.clone(), settings.clone());
        let (second, _h2) = Worker::new(store, client, settings);
        // Documented on Worker::new: identity is host:pid:queues, one
        // worker per process.
        assert_eq!(first.id(), second.id());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pruning_spares_live_and_foreign_workers() {
        let store = Store::in_memory("test");
        let client = Client::new(store.clone(), 3600);
        let (worker, _handle) = Worker::new(store.clone(), client, Settings::default());
        let registry = worker.registry().clone();

        let live = WorkerId::new(
            worker.id().host.clone(),
            std::process::id(),
            vec!["other".to_string()],
        );
        let foreign = WorkerId::new("elsewhere".to_string(), DEAD_PID, vec!["jobs".to_string()]);
        registry.register(&live).await.unwrap();
        registry.register(&foreign).await.unwrap();

        assert_eq!(worker.prune_dead_workers().await.unwrap(), 0);
        assert!(registry.is_registered(&live).await.unwrap());
        assert!(registry.is_registered(&foreign).await.unwrap());
    }
}
