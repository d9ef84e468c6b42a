//! Task execution strategies.
//!
//! The executor dispatches on [`TaskKind`] and drives the media and
//! analysis adapters, recording results on the content registry.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::analysis::{AnalysisProvider, FrameAnalysis, FRAME_SAMPLE_OFFSETS, aggregate_frames};
use crate::config::PipelineConfig;
use crate::content::item::{ContentItem, ContentType};
use crate::content::registry::ContentRegistry;
use crate::media::presets::Quality;
use crate::media::probe::MediaProber;
use crate::media::progress::{ProgressSink, ProgressUpdate};
use crate::media::transform::{
    EncodingJob, MediaTransformer, THUMBNAIL_SEEK_RATIO, ThumbnailSize,
};
use crate::moderation;
use crate::pipeline::task::{ProcessingTask, TaskKind};
use crate::{Error, Result};

/// Transcode targets produced for every video item.
const TRANSCODE_FORMATS: [&str; 3] = ["mp4", "webm", "hls"];

/// Executes one task end to end against the adapters.
pub struct TaskExecutor {
    registry: Arc<ContentRegistry>,
    prober: Arc<dyn MediaProber>,
    transformer: Arc<dyn MediaTransformer>,
    analyzer: Arc<dyn AnalysisProvider>,
    config: Arc<PipelineConfig>,
    progress_tx: mpsc::Sender<ProgressUpdate>,
    /// Per-content serialization so concurrent tasks probe an item once.
    probe_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<ContentRegistry>,
        prober: Arc<dyn MediaProber>,
        transformer: Arc<dyn MediaTransformer>,
        analyzer: Arc<dyn AnalysisProvider>,
        config: Arc<PipelineConfig>,
        progress_tx: mpsc::Sender<ProgressUpdate>,
    ) -> Self {
        Self {
            registry,
            prober,
            transformer,
            analyzer,
            config,
            progress_tx,
            probe_locks: DashMap::new(),
        }
    }

    /// Run the task. The returned error is already reflected on the
    /// content item where the lifecycle requires it (failed analysis).
    pub async fn execute(&self, task: &ProcessingTask, cancel: &CancellationToken) -> Result<()> {
        let item = self
            .registry
            .get(&task.content_id)
            .ok_or_else(|| Error::not_found("content", &task.content_id))?;
        self.registry.mark_processing(&task.content_id)?;

        let progress = ProgressSink::new(task.id.clone(), self.progress_tx.clone());

        if task.kind == TaskKind::Analyze {
            let outcome = async {
                let item = self.ensure_probed(item).await?;
                self.run_analyze(&item, &progress, cancel).await
            }
            .await;
            if let Err(err) = &outcome
                && !err.is_cancelled()
            {
                // A failed analysis fails the whole item; moderation
                // never sees unscored content.
                self.registry.mark_failed(&task.content_id)?;
            }
            return outcome;
        }

        let item = self.ensure_probed(item).await?;
        match task.kind {
            TaskKind::Thumbnail => self.run_thumbnails(&item, &progress, cancel).await,
            TaskKind::Optimize => self.run_optimize(&item, &progress, cancel).await,
            TaskKind::Transcode => self.run_transcode(&item, &progress, cancel).await,
            TaskKind::Watermark => self.run_watermark(&item, &progress, cancel).await,
            TaskKind::Analyze => unreachable!("handled above"),
        }
    }

    /// Probe structural metadata exactly once per item, no matter how
    /// many of its tasks run concurrently.
    async fn ensure_probed(&self, item: ContentItem) -> Result<ContentItem> {
        if !item.content_type.is_probeable() {
            return Ok(item);
        }
        let lock = self
            .probe_locks
            .entry(item.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-read under the lock; another task may have probed already.
        let current = self
            .registry
            .get(&item.id)
            .ok_or_else(|| Error::not_found("content", &item.id))?;
        if current.metadata.codec.is_some() {
            return Ok(current);
        }

        let probed = self.prober.probe(&current.original_path).await?;
        self.registry.set_probed_metadata(&current.id, probed)?;
        self.registry
            .get(&current.id)
            .ok_or_else(|| Error::not_found("content", &current.id))
    }

    fn video_seek(item: &ContentItem) -> Option<f64> {
        match item.content_type {
            ContentType::Video => item
                .metadata
                .duration_secs
                .map(|d| d * THUMBNAIL_SEEK_RATIO),
            _ => None,
        }
    }

    async fn run_thumbnails(
        &self,
        item: &ContentItem,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let seek = Self::video_seek(item);
        let dir = self.config.storage.thumbnails();
        for (index, size) in ThumbnailSize::ALL.iter().enumerate() {
            let output = dir.join(format!("{}_{}.jpg", item.id, size.as_str()));
            self.transformer
                .thumbnail(&item.original_path, &output, *size, seek, progress, cancel)
                .await?;
            self.registry
                .add_artifact(&item.id, &format!("thumbnail_{}", size.as_str()), output)?;
            progress.report(((index + 1) * 100 / ThumbnailSize::ALL.len()) as u8);
        }
        Ok(())
    }

    async fn run_optimize(
        &self,
        item: &ContentItem,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ext = match item.content_type {
            ContentType::Image => "jpg",
            ContentType::Video => "mp4",
            ContentType::Audio => "m4a",
            ContentType::Text | ContentType::Document => {
                debug!(content_id = %item.id, "no optimized rendition for this type");
                return Ok(());
            }
        };
        let output = self
            .config
            .storage
            .optimized()
            .join(format!("{}.{ext}", item.id));
        self.transformer
            .optimize(
                &item.original_path,
                &output,
                item.content_type,
                item.metadata.duration_secs,
                progress,
                cancel,
            )
            .await?;
        self.registry.add_artifact(&item.id, "optimized", output)
    }

    async fn run_transcode(
        &self,
        item: &ContentItem,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if item.content_type != ContentType::Video {
            debug!(content_id = %item.id, "transcode only applies to video");
            return Ok(());
        }
        let dir = self.config.storage.transcoded();
        for format in TRANSCODE_FORMATS {
            let output = if format == "hls" {
                let playlist_dir = dir.join(format!("{}_hls", item.id));
                tokio::fs::create_dir_all(&playlist_dir).await?;
                playlist_dir.join("index.m3u8")
            } else {
                dir.join(format!("{}.{format}", item.id))
            };
            let job = EncodingJob {
                input: item.original_path.clone(),
                output: output.clone(),
                format: format.to_string(),
                quality: Quality::Medium,
                source_duration_secs: item.metadata.duration_secs,
            };
            self.transformer.transcode(&job, progress, cancel).await?;
            self.registry
                .add_artifact(&item.id, &format!("transcoded_{format}"), output)?;
        }
        Ok(())
    }

    async fn run_watermark(
        &self,
        item: &ContentItem,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ext = match item.content_type {
            ContentType::Image => "jpg",
            ContentType::Video => "mp4",
            _ => {
                debug!(content_id = %item.id, "watermark only applies to visual media");
                return Ok(());
            }
        };
        let output = self
            .config
            .storage
            .watermarked()
            .join(format!("{}.{ext}", item.id));
        self.transformer
            .watermark(
                &item.original_path,
                &output,
                &self.config.watermark_text,
                item.metadata.duration_secs,
                progress,
                cancel,
            )
            .await?;
        self.registry.add_artifact(&item.id, "watermarked", output)
    }

    async fn run_analyze(
        &self,
        item: &ContentItem,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let frames = match item.content_type {
            ContentType::Image => {
                vec![self.analyzer.analyze_image(&item.original_path).await?]
            }
            ContentType::Video => self.analyze_video(item, progress, cancel).await?,
            ContentType::Audio => {
                let transcript = self.analyzer.transcribe(&item.original_path).await?;
                let frames = if transcript.is_empty() {
                    vec![FrameAnalysis::default()]
                } else {
                    vec![self.analyzer.analyze_text(&transcript).await?]
                };
                self.registry.set_extracted_text(&item.id, transcript)?;
                frames
            }
            ContentType::Text | ContentType::Document => {
                let raw = tokio::fs::read(&item.original_path).await?;
                let text = String::from_utf8_lossy(&raw).into_owned();
                let frames = vec![self.analyzer.analyze_text(&text).await?];
                if item.options.extract_text {
                    self.registry.set_extracted_text(&item.id, text)?;
                }
                frames
            }
        };

        let analysis = aggregate_frames(&frames);
        let verdict = moderation::evaluate(&analysis);
        self.registry.apply_analysis(&item.id, analysis, verdict)?;
        progress.report(100);
        Ok(())
    }

    /// Sample frames across the video and score each one.
    async fn analyze_video(
        &self,
        item: &ContentItem,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<FrameAnalysis>> {
        let duration = item.metadata.duration_secs.unwrap_or(0.0);
        let offsets: Vec<f64> = if duration > 0.0 {
            FRAME_SAMPLE_OFFSETS.iter().map(|r| r * duration).collect()
        } else {
            // No usable duration; score whatever the first frame shows.
            vec![0.0]
        };

        let temp_dir = self.config.storage.temp();
        let mut frames = Vec::with_capacity(offsets.len());
        for (index, at_secs) in offsets.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let frame_path: PathBuf =
                temp_dir.join(format!("{}_frame_{index}.jpg", item.id));
            self.transformer
                .extract_frame(&item.original_path, &frame_path, *at_secs)
                .await?;

            // The frame is removed whether scoring succeeded or not.
            let scored = self.analyzer.analyze_image(&frame_path).await;
            if let Err(err) = tokio::fs::remove_file(&frame_path).await {
                warn!(path = %frame_path.display(), error = %err, "failed to remove sampled frame");
            }
            frames.push(scored?);
            progress.report(((index + 1) * 100 / offsets.len()) as u8);
        }
        Ok(frames)
    }
}
