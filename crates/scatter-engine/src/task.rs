//! Transfer tasks and the registry that tracks them.
//!
//! A [`TransferTask`] is the engine-side handle of one upload or download:
//! a progress channel observers subscribe to, a cancellation token the chunk
//! workers race against, a terminal outcome, and stop callbacks run once when
//! the task is cancelled. Tasks live only in memory.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use scatter_types::Progress;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransferError;

type StopCallback = Box<dyn FnOnce() + Send>;

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Upload,
    Download,
}

/// Where a task stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskOutcome {
    Running,
    /// Uploads carry the share code of the stored file.
    Completed { share_code: Option<String> },
    Failed { message: String },
    Cancelled,
}

impl TaskOutcome {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Serializable view of a task for listings.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: u64,
    pub kind: TaskKind,
    pub file_name: String,
    pub done: u64,
    pub total: u64,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

/// One upload or download in progress.
pub struct TransferTask {
    id: u64,
    kind: TaskKind,
    file_name: String,
    progress: watch::Sender<Progress>,
    cancel: CancellationToken,
    outcome: Mutex<TaskOutcome>,
    on_stop: Mutex<Vec<StopCallback>>,
}

impl TransferTask {
    /// Create a task not tracked by any registry (id 0).
    pub fn detached(kind: TaskKind, file_name: impl Into<String>, total: u64) -> Arc<Self> {
        Arc::new(Self::new(0, kind, file_name.into(), total))
    }

    fn new(id: u64, kind: TaskKind, file_name: String, total: u64) -> Self {
        Self {
            id,
            kind,
            file_name,
            progress: watch::Sender::new(Progress { done: 0, total }),
            cancel: CancellationToken::new(),
            outcome: Mutex::new(TaskOutcome::Running),
            on_stop: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Latest published progress.
    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    /// Receive every progress update from now on.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Publish bytes completed. Never moves backwards or past the total.
    pub fn set_progress(&self, done: u64) {
        self.progress.send_if_modified(|p| {
            let done = done.min(p.total);
            if done > p.done {
                p.done = done;
                true
            } else {
                false
            }
        });
    }

    /// Token that is cancelled when the task is.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the task. Stop callbacks run once; finished tasks are left alone.
    pub fn cancel(&self) {
        {
            let mut outcome = self.outcome.lock().expect("lock poisoned");
            if outcome.is_finished() {
                return;
            }
            *outcome = TaskOutcome::Cancelled;
        }
        self.cancel.cancel();
        debug!(id = self.id, file = %self.file_name, "transfer cancelled");

        let callbacks = std::mem::take(&mut *self.on_stop.lock().expect("lock poisoned"));
        for callback in callbacks {
            callback();
        }
    }

    /// Register a callback to run when the task is cancelled. Runs right away
    /// if it already was.
    pub fn on_stop(&self, callback: impl FnOnce() + Send + 'static) {
        let mut callbacks = self.on_stop.lock().expect("lock poisoned");
        if self.cancel.is_cancelled() {
            drop(callbacks);
            callback();
            return;
        }
        callbacks.push(Box::new(callback));
    }

    /// Mark the task completed.
    pub fn complete(&self, share_code: Option<String>) {
        let total = self.progress().total;
        self.set_progress(total);
        self.finish(TaskOutcome::Completed { share_code });
    }

    /// Record a failure. A cancellation error marks the task cancelled.
    pub fn fail(&self, error: &TransferError) {
        if error.is_cancelled() {
            self.cancel();
        } else {
            self.finish(TaskOutcome::Failed {
                message: error.to_string(),
            });
        }
    }

    fn finish(&self, next: TaskOutcome) {
        let mut outcome = self.outcome.lock().expect("lock poisoned");
        if !outcome.is_finished() {
            *outcome = next;
        }
    }

    pub fn outcome(&self) -> TaskOutcome {
        self.outcome.lock().expect("lock poisoned").clone()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.lock().expect("lock poisoned").is_finished()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let progress = self.progress();
        TaskSnapshot {
            id: self.id,
            kind: self.kind,
            file_name: self.file_name.clone(),
            done: progress.done,
            total: progress.total,
            outcome: self.outcome(),
        }
    }
}

/// What [`TaskRegistry::cancel_or_remove`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRemoval {
    /// The task was running and has been cancelled. It stays listed.
    Cancelled,
    /// The task had finished and has been dropped from the registry.
    Removed,
}

/// Finished tasks kept for listing. Older ones are forgotten as new tasks
/// are created; running tasks are never evicted.
pub const FINISHED_TASK_LIMIT: usize = 1000;

/// Process-wide list of transfer tasks.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<BTreeMap<u64, Arc<TransferTask>>>,
    next_id: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and track a new task.
    pub fn create(
        &self,
        kind: TaskKind,
        file_name: impl Into<String>,
        total: u64,
    ) -> Arc<TransferTask> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let task = Arc::new(TransferTask::new(id, kind, file_name.into(), total));
        let mut tasks = self.tasks.write().expect("lock poisoned");
        tasks.insert(id, task.clone());
        evict_finished(&mut tasks, FINISHED_TASK_LIMIT);
        task
    }

    pub fn get(&self, id: u64) -> Option<Arc<TransferTask>> {
        self.tasks.read().expect("lock poisoned").get(&id).cloned()
    }

    /// Snapshots of every task, oldest first.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.tasks
            .read()
            .expect("lock poisoned")
            .values()
            .map(|t| t.snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel a running task, or forget a finished one.
    pub fn cancel_or_remove(&self, id: u64) -> Option<TaskRemoval> {
        let task = self.get(id)?;
        if task.is_finished() {
            self.tasks.write().expect("lock poisoned").remove(&id);
            Some(TaskRemoval::Removed)
        } else {
            task.cancel();
            Some(TaskRemoval::Cancelled)
        }
    }

    /// Cancel every running task.
    pub fn cancel_all(&self) {
        let tasks: Vec<_> = self
            .tasks
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        for task in tasks {
            task.cancel();
        }
    }
}

/// Drop the oldest finished tasks until at most `limit` remain.
fn evict_finished(tasks: &mut BTreeMap<u64, Arc<TransferTask>>, limit: usize) {
    let finished: Vec<u64> = tasks
        .iter()
        .filter(|(_, t)| t.is_finished())
        .map(|(id, _)| *id)
        .collect();
    let excess = finished.len().saturating_sub(limit);
    for id in &finished[..excess] {
        tasks.remove(id);
    }
}
