//! Pipeline facade: the single entry point callers interact with.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::analysis::{AnalysisProvider, HttpAnalysisProvider, StubAnalysisProvider};
use crate::config::PipelineConfig;
use crate::content::item::{ContentItem, ContentType, SubmitOptions};
use crate::content::registry::ContentRegistry;
use crate::events::{PipelineEvent, event_channel};
use crate::media::probe::{FfprobeProber, MediaProber};
use crate::media::progress::ProgressUpdate;
use crate::media::transform::{FfmpegTransformer, MediaTransformer};
use crate::pipeline::queue::{CancelOutcome, TaskQueue};
use crate::pipeline::scheduler::PipelineScheduler;
use crate::pipeline::strategies::TaskExecutor;
use crate::pipeline::task::{ProcessingTask, TaskKind};
use crate::{Error, Result};

/// Capacity of the task progress fan-in channel.
const PROGRESS_CHANNEL_CAPACITY: usize = 512;

/// Point-in-time pipeline counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub content_total: usize,
    pub content_pending: usize,
    pub content_processing: usize,
    pub content_completed: usize,
    pub content_failed: usize,
    pub tasks_pending: usize,
    pub tasks_running: usize,
    pub tasks_completed: usize,
    /// Includes cancelled tasks; the stored reason distinguishes them.
    pub tasks_failed: usize,
    pub active_workers: usize,
}

/// The media pipeline: ingest, derived-artifact production, analysis,
/// and moderation, behind one handle.
pub struct MediaPipeline {
    config: Arc<PipelineConfig>,
    registry: Arc<ContentRegistry>,
    queue: Arc<TaskQueue>,
    scheduler: Arc<PipelineScheduler>,
    event_tx: broadcast::Sender<PipelineEvent>,
    progress_rx: parking_lot::Mutex<Option<mpsc::Receiver<ProgressUpdate>>>,
}

impl MediaPipeline {
    /// Build a pipeline with the standard adapters. Without analysis
    /// credentials the offline stub provider is used.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let prober: Arc<dyn MediaProber> =
            Arc::new(FfprobeProber::new(config.ffprobe_path.clone()));
        let transformer: Arc<dyn MediaTransformer> =
            Arc::new(FfmpegTransformer::new(config.ffmpeg_path.clone()));
        let analyzer: Arc<dyn AnalysisProvider> = if config.analysis.has_credentials() {
            let api_url = config.analysis.api_url.clone().unwrap_or_default();
            let api_key = config.analysis.api_key.clone().unwrap_or_default();
            Arc::new(HttpAnalysisProvider::new(api_url, api_key)?)
        } else {
            debug!("no analysis credentials configured; using offline provider");
            Arc::new(StubAnalysisProvider)
        };
        Self::with_adapters(config, prober, transformer, analyzer)
    }

    /// Build a pipeline with caller-supplied adapters.
    pub fn with_adapters(
        config: PipelineConfig,
        prober: Arc<dyn MediaProber>,
        transformer: Arc<dyn MediaTransformer>,
        analyzer: Arc<dyn AnalysisProvider>,
    ) -> Result<Self> {
        if config.max_concurrent_tasks == 0 {
            return Err(Error::config("max_concurrent_tasks must be at least 1"));
        }

        let config = Arc::new(config);
        let event_tx = event_channel();
        let registry = Arc::new(ContentRegistry::new(event_tx.clone()));
        let queue = Arc::new(TaskQueue::new());
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&registry),
            prober,
            transformer,
            analyzer,
            Arc::clone(&config),
            progress_tx,
        ));
        let scheduler = Arc::new(PipelineScheduler::new(
            Arc::clone(&queue),
            executor,
            &config,
            event_tx.clone(),
        ));

        Ok(Self {
            config,
            registry,
            queue,
            scheduler,
            event_tx,
            progress_rx: parking_lot::Mutex::new(Some(progress_rx)),
        })
    }

    /// Create the storage layout and start the scheduler.
    pub async fn start(&self) -> Result<()> {
        self.config.storage.ensure_dirs().await?;
        let Some(progress_rx) = self.progress_rx.lock().take() else {
            return Ok(());
        };
        Arc::clone(&self.scheduler).start(progress_rx);
        info!("media pipeline started");
        Ok(())
    }

    /// Stop dispatching, cancel outstanding tasks and wait for the
    /// scheduler loops to exit.
    pub async fn shutdown(&self) {
        self.queue.cancel_all();
        self.scheduler.shutdown().await;
    }

    /// Ingest a file and schedule its processing tasks.
    pub async fn submit(
        &self,
        path: impl AsRef<Path>,
        owner_id: impl Into<String>,
        options: SubmitOptions,
    ) -> Result<String> {
        let content_id = self.registry.submit(path, owner_id, options.clone()).await?;
        let item = self
            .registry
            .get(&content_id)
            .ok_or_else(|| Error::not_found("content", &content_id))?;

        if options.analyze_content {
            self.queue
                .push(ProcessingTask::new(&content_id, TaskKind::Analyze));
        } else {
            // Item status is driven only by analysis; with it disabled
            // the item is complete as submitted.
            self.registry.mark_completed(&content_id)?;
        }

        let visual = matches!(item.content_type, ContentType::Image | ContentType::Video);
        if options.generate_thumbnails && visual {
            self.queue
                .push(ProcessingTask::new(&content_id, TaskKind::Thumbnail));
        }
        if options.generate_optimized
            && matches!(
                item.content_type,
                ContentType::Image | ContentType::Video | ContentType::Audio
            )
        {
            self.queue
                .push(ProcessingTask::new(&content_id, TaskKind::Optimize));
        }
        if item.content_type == ContentType::Video {
            self.queue
                .push(ProcessingTask::new(&content_id, TaskKind::Transcode));
        }
        if options.watermark && visual {
            self.queue
                .push(ProcessingTask::new(&content_id, TaskKind::Watermark));
        }

        Ok(content_id)
    }

    /// Queue one additional task against existing content, for example
    /// re-running analysis after a provider change.
    pub fn enqueue_task(&self, content_id: &str, kind: TaskKind) -> Result<String> {
        if self.registry.get(content_id).is_none() {
            return Err(Error::not_found("content", content_id));
        }
        Ok(self.queue.push(ProcessingTask::new(content_id, kind)))
    }

    pub fn cancel_task(&self, task_id: &str) -> Result<CancelOutcome> {
        self.queue.cancel(task_id)
    }

    pub fn get_content(&self, content_id: &str) -> Option<ContentItem> {
        self.registry.get(content_id)
    }

    pub fn get_task(&self, task_id: &str) -> Option<ProcessingTask> {
        self.queue.get(task_id)
    }

    pub fn tasks_for_content(&self, content_id: &str) -> Vec<ProcessingTask> {
        self.queue.tasks_for_content(content_id)
    }

    pub fn list_by_owner(&self, owner_id: &str) -> Vec<ContentItem> {
        self.registry.list_by_owner(owner_id)
    }

    pub fn list_pending_moderation(&self) -> Vec<ContentItem> {
        self.registry.list_pending_moderation()
    }

    pub fn approve(&self, content_id: &str) -> Result<()> {
        self.registry.approve(content_id)
    }

    pub fn reject(&self, content_id: &str, reason: &str) -> Result<()> {
        self.registry.reject(content_id, reason)
    }

    /// Subscribe to pipeline events. Slow subscribers may observe
    /// `Lagged` and should resubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    pub fn stats(&self) -> PipelineStats {
        let (content_pending, content_processing, content_completed, content_failed) =
            self.registry.status_counts();
        let (tasks_pending, tasks_running, tasks_completed, tasks_failed) =
            self.queue.status_counts();
        PipelineStats {
            content_total: self.registry.len(),
            content_pending,
            content_processing,
            content_completed,
            content_failed,
            tasks_pending,
            tasks_running,
            tasks_completed,
            tasks_failed,
            active_workers: self.scheduler.active_count(),
        }
    }
}
