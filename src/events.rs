use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::job::Job;

/// Verdict of a before-perform listener: let the job run, or skip it.
/// A skipped job is neither a success nor a failure; it is simply dropped
/// without touching stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    Skip,
}

/// Fired after a payload lands on its queue.
#[derive(Debug, Clone)]
pub struct EnqueueEvent {
    pub handler: String,
    pub args: serde_json::Value,
    pub queue: String,
    pub token: String,
}

/// Handle returned by the `on_*` registrations, used to detach a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type EnqueueListener = Arc<dyn Fn(&EnqueueEvent) + Send + Sync>;
type JobListener = Arc<dyn Fn(&Job) + Send + Sync>;
type BeforePerformListener = Arc<dyn Fn(&Job) -> Result<HookAction> + Send + Sync>;
type AfterPerformListener = Arc<dyn Fn(&Job) -> Result<()> + Send + Sync>;

#[derive(Default)]
struct Listeners {
    after_enqueue: Vec<(ListenerId, EnqueueListener)>,
    before_fork: Vec<(ListenerId, JobListener)>,
    after_fork: Vec<(ListenerId, JobListener)>,
    before_perform: Vec<(ListenerId, BeforePerformListener)>,
    after_perform: Vec<(ListenerId, AfterPerformListener)>,
}

/// In-process hook dispatch. Listeners run synchronously, in registration
/// order, on the worker task that fires them. A before-perform listener can
/// cancel execution by returning [`HookAction::Skip`]; an error from a
/// before- or after-perform listener propagates unmodified to the caller
/// (the worker records it as a job failure).
///
/// Dispatch runs against a snapshot of the listener list, so a listener may
/// re-enter the bus: detach itself, register others, or fire nested events.
/// Listeners added mid-dispatch are first invoked on the next dispatch.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Listeners>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Listeners> {
        // Listener panics poison the lock; recover rather than wedge every
        // later dispatch.
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn on_after_enqueue<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&EnqueueEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.lock().after_enqueue.push((id, Arc::new(listener)));
        id
    }

    pub fn on_before_fork<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Job) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.lock().before_fork.push((id, Arc::new(listener)));
        id
    }

    pub fn on_after_fork<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Job) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.lock().after_fork.push((id, Arc::new(listener)));
        id
    }

    pub fn on_before_perform<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Job) -> Result<HookAction> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.lock().before_perform.push((id, Arc::new(listener)));
        id
    }

    pub fn on_after_perform<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Job) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.lock().after_perform.push((id, Arc::new(listener)));
        id
    }

    /// Detach one listener. Unknown ids are ignored.
    pub fn stop_listening(&self, id: ListenerId) {
        let mut listeners = self.lock();
        listeners.after_enqueue.retain(|(lid, _)| *lid != id);
        listeners.before_fork.retain(|(lid, _)| *lid != id);
        listeners.after_fork.retain(|(lid, _)| *lid != id);
        listeners.before_perform.retain(|(lid, _)| *lid != id);
        listeners.after_perform.retain(|(lid, _)| *lid != id);
    }

    /// Detach everything.
    pub fn clear(&self) {
        *self.lock() = Listeners::default();
    }

    // The guard is dropped before any callback runs, so listeners are free
    // to re-enter the bus mid-dispatch.
    fn snapshot<L: Clone>(&self, pick: impl Fn(&Listeners) -> &Vec<(ListenerId, L)>) -> Vec<L> {
        pick(&self.lock())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    pub fn emit_after_enqueue(&self, event: &EnqueueEvent) {
        for listener in self.snapshot(|l| &l.after_enqueue) {
            listener(event);
        }
    }

    pub fn emit_before_fork(&self, job: &Job) {
        for listener in self.snapshot(|l| &l.before_fork) {
            listener(job);
        }
    }

    pub fn emit_after_fork(&self, job: &Job) {
        for listener in self.snapshot(|l| &l.after_fork) {
            listener(job);
        }
    }

    /// Run before-perform listeners in order; the first `Skip` wins and the
    /// remaining listeners do not run. Listener errors propagate as-is.
    pub fn run_before_perform(&self, job: &Job) -> Result<HookAction> {
        for listener in self.snapshot(|l| &l.before_perform) {
            if listener(job)? == HookAction::Skip {
                return Ok(HookAction::Skip);
            }
        }
        Ok(HookAction::Continue)
    }

    pub fn run_after_perform(&self, job: &Job) -> Result<()> {
        for listener in self.snapshot(|l| &l.after_perform) {
            listener(job)?;
        }
        Ok(())
    }
}
