//! Task scheduler.
//!
//! A single dispatcher loop pops runnable tasks under a concurrency
//! semaphore and spawns one executor invocation per permit. The loop
//! wakes on enqueue, on task completion, and on a periodic tick as a
//! backstop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::events::PipelineEvent;
use crate::media::progress::ProgressUpdate;
use crate::pipeline::queue::{CANCELLED_REASON, TaskQueue};
use crate::pipeline::strategies::TaskExecutor;

pub struct PipelineScheduler {
    queue: Arc<TaskQueue>,
    executor: Arc<TaskExecutor>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    tick_interval: Duration,
    event_tx: broadcast::Sender<PipelineEvent>,
    shutdown: CancellationToken,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl PipelineScheduler {
    pub fn new(
        queue: Arc<TaskQueue>,
        executor: Arc<TaskExecutor>,
        config: &PipelineConfig,
        event_tx: broadcast::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            queue,
            executor,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
            capacity: config.max_concurrent_tasks,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            event_tx,
            shutdown: CancellationToken::new(),
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Number of tasks currently executing.
    pub fn active_count(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Spawn the dispatcher and the progress fan-in loop.
    pub fn start(self: Arc<Self>, progress_rx: mpsc::Receiver<ProgressUpdate>) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            warn!("scheduler already started");
            return;
        }
        handles.push(tokio::spawn(Arc::clone(&self).dispatch_loop()));
        handles.push(tokio::spawn(Arc::clone(&self).progress_loop(progress_rx)));
        info!(capacity = self.capacity, "scheduler started");
    }

    /// Stop dispatching and wait for the loops to exit. Running tasks
    /// are left to finish; cancel them individually first if needed.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }

    async fn dispatch_loop(self: Arc<Self>) {
        let notify = self.queue.notifier();
        loop {
            Self::drain_ready(&self);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = notify.notified() => {}
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }
        debug!("dispatch loop exited");
    }

    /// Launch queued tasks until the queue is empty or the concurrency
    /// cap is reached.
    fn drain_ready(this: &Arc<Self>) {
        while let Ok(permit) = Arc::clone(&this.semaphore).try_acquire_owned() {
            let Some(task) = this.queue.pop() else {
                drop(permit);
                break;
            };
            let Some(token) = this.queue.mark_running(&task.id) else {
                drop(permit);
                continue;
            };

            let _ = this.event_tx.send(PipelineEvent::TaskStarted {
                task_id: task.id.clone(),
                content_id: task.content_id.clone(),
                kind: task.kind,
            });

            let scheduler = Arc::clone(this);
            tokio::spawn(async move {
                let result = scheduler.executor.execute(&task, &token).await;
                match result {
                    Ok(()) => {
                        scheduler.queue.mark_completed(&task.id);
                        let duration_secs = scheduler
                            .queue
                            .get(&task.id)
                            .and_then(|t| t.duration_secs())
                            .unwrap_or_default();
                        debug!(task_id = %task.id, kind = %task.kind, "task completed");
                        let _ = scheduler.event_tx.send(PipelineEvent::TaskCompleted {
                            task_id: task.id.clone(),
                            kind: task.kind,
                            duration_secs,
                        });
                    }
                    Err(err) if err.is_cancelled() => {
                        scheduler.queue.mark_cancelled(&task.id);
                        info!(task_id = %task.id, kind = %task.kind, "task cancelled");
                        let _ = scheduler.event_tx.send(PipelineEvent::TaskFailed {
                            task_id: task.id.clone(),
                            kind: task.kind,
                            error: CANCELLED_REASON.to_string(),
                        });
                    }
                    Err(err) => {
                        warn!(task_id = %task.id, kind = %task.kind, error = %err, "task failed");
                        scheduler.queue.mark_failed(&task.id, err.to_string());
                        let _ = scheduler.event_tx.send(PipelineEvent::TaskFailed {
                            task_id: task.id.clone(),
                            kind: task.kind,
                            error: err.to_string(),
                        });
                    }
                }
                drop(permit);
                // A freed slot may unblock queued work immediately.
                scheduler.queue.notifier().notify_one();
            });
        }
    }

    /// Fan task progress into the queue state and the event channel.
    async fn progress_loop(self: Arc<Self>, mut progress_rx: mpsc::Receiver<ProgressUpdate>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                update = progress_rx.recv() => {
                    let Some(update) = update else { break };
                    self.queue.set_progress(&update.task_id, update.percent);
                    let _ = self.event_tx.send(PipelineEvent::TaskProgress {
                        task_id: update.task_id,
                        percent: update.percent,
                    });
                }
            }
        }
        debug!("progress loop exited");
    }
}
