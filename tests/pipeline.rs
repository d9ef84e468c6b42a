//! End-to-end pipeline tests using in-memory adapters.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mediaforge::analysis::{AnalysisProvider, FrameAnalysis};
use mediaforge::content::item::{ContentStatus, MediaMetadata, SubmitOptions};
use mediaforge::media::probe::MediaProber;
use mediaforge::media::progress::ProgressSink;
use mediaforge::media::transform::{EncodingJob, MediaTransformer, ThumbnailSize};
use mediaforge::pipeline::queue::CancelOutcome;
use mediaforge::pipeline::task::{TaskKind, TaskStatus};
use mediaforge::{Error, MediaPipeline, PipelineConfig, PipelineEvent, StorageConfig};

/// Tracks how many adapter operations run at once.
#[derive(Default)]
struct ConcurrencyGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyGauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn max_seen(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

struct FakeProber {
    metadata: MediaMetadata,
}

impl FakeProber {
    fn video() -> Self {
        Self {
            metadata: MediaMetadata {
                duration_secs: Some(10.0),
                width: Some(1920),
                height: Some(1080),
                codec: Some("h264".to_string()),
                fps: Some(30.0),
                bitrate: Some(4_000_000),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, _path: &Path) -> mediaforge::Result<MediaMetadata> {
        Ok(self.metadata.clone())
    }
}

/// Writes empty output files instead of invoking ffmpeg.
struct FakeTransformer {
    gauge: Arc<ConcurrencyGauge>,
    op_delay: Duration,
}

impl FakeTransformer {
    fn new(gauge: Arc<ConcurrencyGauge>) -> Self {
        Self {
            gauge,
            op_delay: Duration::from_millis(20),
        }
    }

    async fn produce(&self, output: &Path) -> mediaforge::Result<()> {
        self.gauge.enter();
        tokio::time::sleep(self.op_delay).await;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, b"derived").await?;
        self.gauge.exit();
        Ok(())
    }
}

#[async_trait]
impl MediaTransformer for FakeTransformer {
    async fn thumbnail(
        &self,
        _input: &Path,
        output: &Path,
        _size: ThumbnailSize,
        _seek_secs: Option<f64>,
        progress: &ProgressSink,
        _cancel: &CancellationToken,
    ) -> mediaforge::Result<()> {
        self.produce(output).await?;
        progress.report(100);
        Ok(())
    }

    async fn optimize(
        &self,
        _input: &Path,
        output: &Path,
        _content_type: mediaforge::ContentType,
        _duration_secs: Option<f64>,
        _progress: &ProgressSink,
        _cancel: &CancellationToken,
    ) -> mediaforge::Result<()> {
        self.produce(output).await
    }

    async fn transcode(
        &self,
        job: &EncodingJob,
        _progress: &ProgressSink,
        _cancel: &CancellationToken,
    ) -> mediaforge::Result<()> {
        self.produce(&job.output).await
    }

    async fn watermark(
        &self,
        _input: &Path,
        output: &Path,
        _text: &str,
        _duration_secs: Option<f64>,
        _progress: &ProgressSink,
        _cancel: &CancellationToken,
    ) -> mediaforge::Result<()> {
        self.produce(output).await
    }

    async fn extract_frame(
        &self,
        _input: &Path,
        output: &Path,
        _at_secs: f64,
    ) -> mediaforge::Result<()> {
        self.produce(output).await
    }
}

struct FakeAnalyzer {
    frame: FrameAnalysis,
    transcript: String,
    fail: bool,
}

impl FakeAnalyzer {
    fn low_risk() -> Self {
        Self {
            frame: FrameAnalysis {
                adult_score: 2.0,
                violence_score: 1.0,
                confidence: 0.95,
                adult_category: "safe".to_string(),
                ..Default::default()
            },
            transcript: String::new(),
            fail: false,
        }
    }

    fn with_scores(adult: f64, violence: f64) -> Self {
        let mut analyzer = Self::low_risk();
        analyzer.frame.adult_score = adult;
        analyzer.frame.violence_score = violence;
        analyzer
    }

    fn failing() -> Self {
        let mut analyzer = Self::low_risk();
        analyzer.fail = true;
        analyzer
    }
}

#[async_trait]
impl AnalysisProvider for FakeAnalyzer {
    async fn analyze_image(&self, _path: &Path) -> mediaforge::Result<FrameAnalysis> {
        if self.fail {
            return Err(Error::adapter("scoring service unavailable"));
        }
        Ok(self.frame.clone())
    }

    async fn analyze_text(&self, _text: &str) -> mediaforge::Result<FrameAnalysis> {
        if self.fail {
            return Err(Error::adapter("scoring service unavailable"));
        }
        Ok(self.frame.clone())
    }

    async fn transcribe(&self, _path: &Path) -> mediaforge::Result<String> {
        Ok(self.transcript.clone())
    }
}

struct TestRig {
    pipeline: MediaPipeline,
    gauge: Arc<ConcurrencyGauge>,
    _tmp: tempfile::TempDir,
}

fn build_pipeline(max_concurrent: usize, analyzer: FakeAnalyzer) -> TestRig {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = PipelineConfig {
        max_concurrent_tasks: max_concurrent,
        tick_interval_ms: 20,
        storage: StorageConfig::new(tmp.path().join("media")),
        ..Default::default()
    };

    let gauge = Arc::new(ConcurrencyGauge::default());
    let pipeline = MediaPipeline::with_adapters(
        config,
        Arc::new(FakeProber::video()),
        Arc::new(FakeTransformer::new(Arc::clone(&gauge))),
        Arc::new(analyzer),
    )
    .unwrap();

    TestRig {
        pipeline,
        gauge,
        _tmp: tmp,
    }
}

async fn write_upload(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await.unwrap();
    path
}

/// Poll until every task for the item reached a terminal state.
async fn wait_for_tasks(pipeline: &MediaPipeline, content_id: &str) {
    for _ in 0..500 {
        let tasks = pipeline.tasks_for_content(content_id);
        if !tasks.is_empty() && tasks.iter().all(|t| t.status.is_terminal()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("tasks for {content_id} did not settle in time");
}

#[tokio::test]
async fn test_video_submission_produces_full_artifact_set() {
    let rig = build_pipeline(4, FakeAnalyzer::low_risk());
    rig.pipeline.start().await.unwrap();

    let upload = write_upload(rig._tmp.path(), "clip.mp4", b"video bytes").await;
    let id = rig
        .pipeline
        .submit(&upload, "owner-1", SubmitOptions::default())
        .await
        .unwrap();

    wait_for_tasks(&rig.pipeline, &id).await;
    let item = rig.pipeline.get_content(&id).unwrap();

    assert_eq!(item.status, ContentStatus::Completed);
    for key in [
        "thumbnail_small",
        "thumbnail_medium",
        "thumbnail_large",
        "optimized",
        "transcoded_mp4",
        "transcoded_webm",
        "transcoded_hls",
    ] {
        let path = item.artifacts.get(key).unwrap_or_else(|| {
            panic!("missing artifact {key}");
        });
        assert!(path.exists(), "artifact {key} not on disk");
    }

    // Probed metadata landed on the item without clobbering ingest data.
    assert_eq!(item.metadata.duration_secs, Some(10.0));
    assert_eq!(item.metadata.size_bytes, 11);

    // Low-risk analysis: unflagged, not approved until a moderator acts.
    assert!(item.flags.is_empty());
    assert!(!item.nsfw);
    assert!(!item.approved);
    assert!(item.analysis.confidence > 0.0);

    rig.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_bytes_rejected() {
    let rig = build_pipeline(2, FakeAnalyzer::low_risk());
    rig.pipeline.start().await.unwrap();

    let first = write_upload(rig._tmp.path(), "one.jpg", b"identical").await;
    let second = write_upload(rig._tmp.path(), "two.jpg", b"identical").await;

    rig.pipeline
        .submit(&first, "owner-1", SubmitOptions::default())
        .await
        .unwrap();
    let err = rig
        .pipeline
        .submit(&second, "owner-2", SubmitOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DuplicateContent { .. }));
    assert_eq!(rig.pipeline.stats().content_total, 1);

    rig.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_concurrency_stays_under_cap() {
    let rig = build_pipeline(2, FakeAnalyzer::low_risk());
    rig.pipeline.start().await.unwrap();

    let mut ids = Vec::new();
    for n in 0..4 {
        let upload = write_upload(
            rig._tmp.path(),
            &format!("clip_{n}.mp4"),
            format!("video {n}").as_bytes(),
        )
        .await;
        ids.push(
            rig.pipeline
                .submit(&upload, "owner-1", SubmitOptions::default())
                .await
                .unwrap(),
        );
    }

    for id in &ids {
        wait_for_tasks(&rig.pipeline, id).await;
    }

    assert!(rig.gauge.max_seen() >= 1);
    assert!(
        rig.gauge.max_seen() <= 2,
        "observed {} concurrent operations with cap 2",
        rig.gauge.max_seen()
    );

    rig.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_single_worker_runs_tasks_in_priority_order() {
    let rig = build_pipeline(1, FakeAnalyzer::low_risk());
    let mut events = rig.pipeline.subscribe();

    // Queue everything before the dispatcher starts so priority alone
    // decides the order.
    let upload = write_upload(rig._tmp.path(), "clip.mp4", b"ordered video").await;
    let options = SubmitOptions {
        watermark: true,
        ..Default::default()
    };
    let id = rig
        .pipeline
        .submit(&upload, "owner-1", options)
        .await
        .unwrap();

    rig.pipeline.start().await.unwrap();
    wait_for_tasks(&rig.pipeline, &id).await;

    let mut started = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::TaskStarted { kind, .. } = event {
            started.push(kind);
        }
    }

    assert_eq!(
        started,
        vec![
            TaskKind::Analyze,
            TaskKind::Thumbnail,
            TaskKind::Transcode,
            TaskKind::Optimize,
            TaskKind::Watermark,
        ]
    );

    rig.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_failed_analysis_fails_item_without_moderation() {
    let rig = build_pipeline(4, FakeAnalyzer::failing());
    rig.pipeline.start().await.unwrap();

    let upload = write_upload(rig._tmp.path(), "photo.jpg", b"image bytes").await;
    let id = rig
        .pipeline
        .submit(&upload, "owner-1", SubmitOptions::default())
        .await
        .unwrap();

    wait_for_tasks(&rig.pipeline, &id).await;
    let item = rig.pipeline.get_content(&id).unwrap();

    assert_eq!(item.status, ContentStatus::Failed);
    // The rule engine never ran over the unscored item.
    assert!(item.flags.is_empty());
    assert!(!item.nsfw);
    // Approval keeps its submission value when analysis fails.
    assert!(!item.approved);

    let analyze = rig
        .pipeline
        .tasks_for_content(&id)
        .into_iter()
        .find(|t| t.kind == TaskKind::Analyze)
        .unwrap();
    assert_eq!(analyze.status, TaskStatus::Failed);
    assert!(analyze.error.is_some());

    // An auto-approved submission stays approved through the failure.
    let upload = write_upload(rig._tmp.path(), "photo2.jpg", b"other image bytes").await;
    let options = SubmitOptions {
        auto_approve: true,
        ..Default::default()
    };
    let id = rig
        .pipeline
        .submit(&upload, "owner-1", options)
        .await
        .unwrap();
    wait_for_tasks(&rig.pipeline, &id).await;

    let item = rig.pipeline.get_content(&id).unwrap();
    assert_eq!(item.status, ContentStatus::Failed);
    assert!(item.approved);

    rig.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_failed_video_analysis_leaves_no_sampled_frames() {
    let rig = build_pipeline(1, FakeAnalyzer::failing());
    rig.pipeline.start().await.unwrap();

    let upload = write_upload(rig._tmp.path(), "clip.mp4", b"leaky video").await;
    let options = SubmitOptions {
        generate_thumbnails: false,
        generate_optimized: false,
        ..Default::default()
    };
    let id = rig
        .pipeline
        .submit(&upload, "owner-1", options)
        .await
        .unwrap();
    wait_for_tasks(&rig.pipeline, &id).await;

    assert_eq!(
        rig.pipeline.get_content(&id).unwrap().status,
        ContentStatus::Failed
    );

    let temp_dir = rig._tmp.path().join("media").join("temp");
    let mut entries = tokio::fs::read_dir(&temp_dir).await.unwrap();
    assert!(
        entries.next_entry().await.unwrap().is_none(),
        "sampled frames left behind in {}",
        temp_dir.display()
    );

    rig.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_high_scores_flag_item_and_approval_clears_them() {
    let rig = build_pipeline(4, FakeAnalyzer::with_scores(90.0, 80.0));
    rig.pipeline.start().await.unwrap();

    let upload = write_upload(rig._tmp.path(), "photo.jpg", b"risky bytes").await;
    let id = rig
        .pipeline
        .submit(&upload, "owner-1", SubmitOptions::default())
        .await
        .unwrap();

    wait_for_tasks(&rig.pipeline, &id).await;
    let item = rig.pipeline.get_content(&id).unwrap();

    assert!(item.nsfw);
    assert!(!item.approved);
    assert!(item.flags.contains(&"explicit_adult".to_string()));
    assert!(item.flags.contains(&"graphic_violence".to_string()));
    assert!(item.flags.iter().any(|f| f.contains("risk")));
    assert_eq!(rig.pipeline.list_pending_moderation().len(), 1);

    rig.pipeline.approve(&id).unwrap();
    let item = rig.pipeline.get_content(&id).unwrap();
    assert!(item.approved);
    assert!(!item.flags.iter().any(|f| f.contains("risk")));
    assert!(rig.pipeline.list_pending_moderation().is_empty());

    rig.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_cancel_pending_task_skips_its_artifacts() {
    let rig = build_pipeline(1, FakeAnalyzer::low_risk());

    let upload = write_upload(rig._tmp.path(), "clip.mp4", b"cancellable").await;
    let id = rig
        .pipeline
        .submit(&upload, "owner-1", SubmitOptions::default())
        .await
        .unwrap();

    let transcode = rig
        .pipeline
        .tasks_for_content(&id)
        .into_iter()
        .find(|t| t.kind == TaskKind::Transcode)
        .unwrap();
    let outcome = rig.pipeline.cancel_task(&transcode.id).unwrap();
    assert_eq!(outcome, CancelOutcome::Dequeued);

    rig.pipeline.start().await.unwrap();
    wait_for_tasks(&rig.pipeline, &id).await;

    let item = rig.pipeline.get_content(&id).unwrap();
    assert_eq!(item.status, ContentStatus::Completed);
    assert!(!item.artifacts.contains_key("transcoded_mp4"));
    assert!(item.artifacts.contains_key("thumbnail_small"));

    // Cancellation is stored as a failure with the fixed reason.
    let task = rig.pipeline.get_task(&transcode.id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("cancelled"));
    assert_eq!(rig.pipeline.stats().tasks_failed, 1);

    rig.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_analysis_disabled_completes_at_submission() {
    let rig = build_pipeline(2, FakeAnalyzer::low_risk());
    rig.pipeline.start().await.unwrap();

    let upload = write_upload(rig._tmp.path(), "notes.txt", b"plain text").await;
    let options = SubmitOptions {
        analyze_content: false,
        auto_approve: true,
        generate_thumbnails: false,
        generate_optimized: false,
        ..Default::default()
    };
    let id = rig
        .pipeline
        .submit(&upload, "owner-1", options)
        .await
        .unwrap();

    let item = rig.pipeline.get_content(&id).unwrap();
    assert_eq!(item.status, ContentStatus::Completed);
    assert!(item.approved);
    assert!(rig.pipeline.tasks_for_content(&id).is_empty());

    rig.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_audio_transcript_is_stored_and_analyzed() {
    let mut analyzer = FakeAnalyzer::low_risk();
    analyzer.transcript = "spoken words".to_string();
    let rig = build_pipeline(2, analyzer);
    rig.pipeline.start().await.unwrap();

    let upload = write_upload(rig._tmp.path(), "talk.mp3", b"audio bytes").await;
    let options = SubmitOptions {
        generate_thumbnails: false,
        generate_optimized: false,
        ..Default::default()
    };
    let id = rig
        .pipeline
        .submit(&upload, "owner-1", options)
        .await
        .unwrap();

    wait_for_tasks(&rig.pipeline, &id).await;
    let item = rig.pipeline.get_content(&id).unwrap();

    assert_eq!(item.status, ContentStatus::Completed);
    assert_eq!(item.analysis.extracted_text.as_deref(), Some("spoken words"));
    assert!(item.analysis.confidence > 0.0);

    rig.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_reprocessing_an_existing_item() {
    let rig = build_pipeline(2, FakeAnalyzer::low_risk());
    rig.pipeline.start().await.unwrap();

    let upload = write_upload(rig._tmp.path(), "photo.png", b"png bytes").await;
    let id = rig
        .pipeline
        .submit(&upload, "owner-1", SubmitOptions::default())
        .await
        .unwrap();
    wait_for_tasks(&rig.pipeline, &id).await;

    let task_id = rig.pipeline.enqueue_task(&id, TaskKind::Thumbnail).unwrap();
    wait_for_tasks(&rig.pipeline, &id).await;
    assert_eq!(
        rig.pipeline.get_task(&task_id).unwrap().status,
        TaskStatus::Completed
    );

    let err = rig
        .pipeline
        .enqueue_task("missing", TaskKind::Analyze)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    rig.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_stats_reflect_finished_work() {
    let rig = build_pipeline(2, FakeAnalyzer::low_risk());
    rig.pipeline.start().await.unwrap();

    let upload = write_upload(rig._tmp.path(), "photo.jpg", b"stats bytes").await;
    let id = rig
        .pipeline
        .submit(&upload, "owner-1", SubmitOptions::default())
        .await
        .unwrap();
    wait_for_tasks(&rig.pipeline, &id).await;

    let stats = rig.pipeline.stats();
    assert_eq!(stats.content_total, 1);
    assert_eq!(stats.content_completed, 1);
    assert_eq!(stats.tasks_pending, 0);
    assert_eq!(stats.tasks_running, 0);
    assert!(stats.tasks_completed >= 3);
    assert_eq!(stats.active_workers, 0);

    rig.pipeline.shutdown().await;
}
