//! Priority task queue.
//!
//! Pending work lives in a binary heap ordered by priority, with
//! submission order breaking ties. All tasks ever submitted stay in a
//! lookup map for status queries; cancellation of pending work is lazy
//! (the heap entry is skipped at pop time).

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pipeline::task::{ProcessingTask, TaskStatus};
use crate::{Error, Result};

/// Reason string stored on tasks that were cancelled rather than
/// failing in an adapter.
pub const CANCELLED_REASON: &str = "cancelled";

/// What cancellation did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task had not started; it will never run.
    Dequeued,
    /// The task was running; its kill signal has been delivered.
    Signalled,
    /// The task had already reached a terminal state.
    AlreadyFinished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedEntry {
    priority: u8,
    seq: Reverse<u64>,
    task_id: String,
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct TaskQueue {
    tasks: DashMap<String, ProcessingTask>,
    heap: Mutex<BinaryHeap<QueuedEntry>>,
    pending: AtomicUsize,
    seq: AtomicU64,
    notify: Arc<Notify>,
    cancel_tokens: DashMap<String, CancellationToken>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            heap: Mutex::new(BinaryHeap::new()),
            pending: AtomicUsize::new(0),
            seq: AtomicU64::new(0),
            notify: Arc::new(Notify::new()),
            cancel_tokens: DashMap::new(),
        }
    }

    /// Enqueue a task and wake the dispatcher.
    pub fn push(&self, task: ProcessingTask) -> String {
        let task_id = task.id.clone();
        let entry = QueuedEntry {
            priority: task.priority,
            seq: Reverse(self.seq.fetch_add(1, AtomicOrdering::Relaxed)),
            task_id: task_id.clone(),
        };
        debug!(task_id = %task_id, kind = %task.kind, priority = task.priority, "task queued");
        self.tasks.insert(task_id.clone(), task);
        self.heap.lock().push(entry);
        self.pending.fetch_add(1, AtomicOrdering::Release);
        self.notify.notify_one();
        task_id
    }

    /// Pop the highest-priority runnable task. Entries whose task was
    /// cancelled while pending are discarded here; their pending count
    /// was already released by `cancel`.
    pub fn pop(&self) -> Option<ProcessingTask> {
        let mut heap = self.heap.lock();
        while let Some(entry) = heap.pop() {
            let Some(task) = self.tasks.get(&entry.task_id) else {
                continue;
            };
            if task.status == TaskStatus::Pending {
                self.pending.fetch_sub(1, AtomicOrdering::Release);
                return Some(task.clone());
            }
        }
        None
    }

    pub fn get(&self, task_id: &str) -> Option<ProcessingTask> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    pub fn tasks_for_content(&self, content_id: &str) -> Vec<ProcessingTask> {
        let mut tasks: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| t.content_id == content_id)
            .map(|t| t.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn pending_len(&self) -> usize {
        self.pending.load(AtomicOrdering::Acquire)
    }

    /// Counts by status: (pending, running, completed, failed).
    pub fn status_counts(&self) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        for task in self.tasks.iter() {
            match task.status {
                TaskStatus::Pending => counts.0 += 1,
                TaskStatus::Running => counts.1 += 1,
                TaskStatus::Completed => counts.2 += 1,
                TaskStatus::Failed => counts.3 += 1,
            }
        }
        counts
    }

    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Transition to running and register a cancellation token for the
    /// duration of execution.
    pub fn mark_running(&self, task_id: &str) -> Option<CancellationToken> {
        let mut task = self.tasks.get_mut(task_id)?;
        if task.status != TaskStatus::Pending {
            return None;
        }
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        let token = CancellationToken::new();
        self.cancel_tokens.insert(task_id.to_string(), token.clone());
        Some(token)
    }

    pub fn mark_completed(&self, task_id: &str) {
        self.finish(task_id, TaskStatus::Completed, None);
    }

    pub fn mark_failed(&self, task_id: &str, error: impl Into<String>) {
        self.finish(task_id, TaskStatus::Failed, Some(error.into()));
    }

    /// Finish a cancelled task. Cancellation is stored as a failure
    /// with the fixed reason string.
    pub fn mark_cancelled(&self, task_id: &str) {
        self.finish(task_id, TaskStatus::Failed, Some(CANCELLED_REASON.to_string()));
    }

    fn finish(&self, task_id: &str, status: TaskStatus, error: Option<String>) {
        if let Some(mut task) = self.tasks.get_mut(task_id) {
            task.status = status;
            task.error = error;
            task.finished_at = Some(Utc::now());
            if status == TaskStatus::Completed {
                task.progress = 100;
            }
        }
        self.cancel_tokens.remove(task_id);
    }

    pub fn set_progress(&self, task_id: &str, percent: u8) {
        if let Some(mut task) = self.tasks.get_mut(task_id)
            && task.status == TaskStatus::Running
        {
            task.progress = percent.min(100);
        }
    }

    /// Cancel a task by id, whatever state it is in.
    pub fn cancel(&self, task_id: &str) -> Result<CancelOutcome> {
        let Some(mut task) = self.tasks.get_mut(task_id) else {
            return Err(Error::not_found("task", task_id));
        };
        match task.status {
            TaskStatus::Pending => {
                task.status = TaskStatus::Failed;
                task.error = Some(CANCELLED_REASON.to_string());
                task.finished_at = Some(Utc::now());
                self.pending.fetch_sub(1, AtomicOrdering::Release);
                Ok(CancelOutcome::Dequeued)
            }
            TaskStatus::Running => {
                drop(task);
                if let Some(token) = self.cancel_tokens.get(task_id) {
                    token.cancel();
                }
                Ok(CancelOutcome::Signalled)
            }
            _ => Ok(CancelOutcome::AlreadyFinished),
        }
    }

    /// Cancel every task that has not reached a terminal state. Used at
    /// shutdown.
    pub fn cancel_all(&self) {
        let ids: Vec<String> = self
            .tasks
            .iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.id.clone())
            .collect();
        for id in ids {
            let _ = self.cancel(&id);
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
