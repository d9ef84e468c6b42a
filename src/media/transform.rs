//! Transform adapter: derived-file production via ffmpeg.
//!
//! Every operation builds a declarative argument list, runs ffmpeg with
//! `-progress pipe:1`, streams elapsed-time output into the owning
//! task's progress, and supports kill-on-cancel.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::content::item::ContentType;
use crate::media::presets::{self, EncodingPreset, Quality};
use crate::media::progress::{ProgressSink, parse_progress_line, percent_of};
use crate::{Error, Result};

/// Declared thumbnail sizes. Outputs are letterboxed to the target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThumbnailSize {
    Small,
    Medium,
    Large,
}

impl ThumbnailSize {
    pub const ALL: [ThumbnailSize; 3] = [Self::Small, Self::Medium, Self::Large];

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Small => (320, 180),
            Self::Medium => (640, 360),
            Self::Large => (1280, 720),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

/// Relative position into a video to capture thumbnails from.
pub const THUMBNAIL_SEEK_RATIO: f64 = 0.30;

/// Resolution cap applied by `optimize`.
pub const OPTIMIZE_MAX_WIDTH: u32 = 1920;
pub const OPTIMIZE_MAX_HEIGHT: u32 = 1080;
/// CRF used for optimized video renditions.
pub const OPTIMIZE_VIDEO_CRF: u8 = 23;
/// Bitrate/sample-rate for optimized audio renditions.
pub const OPTIMIZE_AUDIO_BITRATE: &str = "128k";
pub const OPTIMIZE_AUDIO_SAMPLE_RATE: &str = "44100";

/// Corner inset in pixels for the watermark overlay.
const WATERMARK_INSET: u32 = 20;

/// How long a cancelled invocation may take to exit after the quit
/// command before it is killed.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// A video-specific transcode request resolved against the preset
/// table.
#[derive(Debug, Clone)]
pub struct EncodingJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Target container/format key ("mp4", "webm", "hls").
    pub format: String,
    pub quality: Quality,
    /// Source duration, when known, for progress computation.
    pub source_duration_secs: Option<f64>,
}

impl EncodingJob {
    pub fn preset(&self) -> EncodingPreset {
        presets::resolve(&self.format, self.quality)
    }
}

/// Produces derived files from an original.
#[async_trait]
pub trait MediaTransformer: Send + Sync {
    /// Produce one letterboxed thumbnail. `seek_secs` is set for video
    /// sources (30% of duration) and `None` for images.
    async fn thumbnail(
        &self,
        input: &Path,
        output: &Path,
        size: ThumbnailSize,
        seek_secs: Option<f64>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Produce the single size/quality-capped rendition for the type.
    async fn optimize(
        &self,
        input: &Path,
        output: &Path,
        content_type: ContentType,
        duration_secs: Option<f64>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Produce one transcoded variant per encoding job.
    async fn transcode(
        &self,
        job: &EncodingJob,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Overlay the fixed text mark; audio is passed through unmodified.
    async fn watermark(
        &self,
        input: &Path,
        output: &Path,
        text: &str,
        duration_secs: Option<f64>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Capture a single frame at an absolute offset (analysis sampling).
    async fn extract_frame(&self, input: &Path, output: &Path, at_secs: f64) -> Result<()>;
}

/// Transform adapter backed by the ffmpeg binary.
pub struct FfmpegTransformer {
    ffmpeg_path: String,
}

impl FfmpegTransformer {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn base_args() -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
        ]
    }

    /// Letterbox filter: scale to fit the box, pad the remainder.
    fn letterbox_filter(width: u32, height: u32) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
            w = width,
            h = height
        )
    }

    /// Downscale-only cap filter used by `optimize`.
    fn cap_filter(max_width: u32, max_height: u32) -> String {
        format!(
            "scale='min({max_width},iw)':'min({max_height},ih)':\
             force_original_aspect_ratio=decrease:force_divisible_by=2"
        )
    }

    fn thumbnail_args(
        input: &Path,
        output: &Path,
        size: ThumbnailSize,
        seek_secs: Option<f64>,
    ) -> Vec<String> {
        let (w, h) = size.dimensions();
        let mut args = Self::base_args();
        // Seek before the input for fast keyframe-aligned seeking.
        if let Some(seek) = seek_secs {
            args.extend(["-ss".to_string(), format!("{seek:.3}")]);
        }
        args.extend(["-i".to_string(), input.display().to_string()]);
        args.extend([
            "-vframes".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            Self::letterbox_filter(w, h),
            "-q:v".to_string(),
            "2".to_string(),
        ]);
        args.push(output.display().to_string());
        args
    }

    fn optimize_args(input: &Path, output: &Path, content_type: ContentType) -> Vec<String> {
        let mut args = Self::base_args();
        args.extend(["-i".to_string(), input.display().to_string()]);
        match content_type {
            ContentType::Image => {
                args.extend([
                    "-vf".to_string(),
                    Self::cap_filter(OPTIMIZE_MAX_WIDTH, OPTIMIZE_MAX_HEIGHT),
                    "-q:v".to_string(),
                    "3".to_string(),
                ]);
            }
            ContentType::Video => {
                args.extend([
                    "-c:v".to_string(),
                    "libx264".to_string(),
                    "-crf".to_string(),
                    OPTIMIZE_VIDEO_CRF.to_string(),
                    "-preset".to_string(),
                    "medium".to_string(),
                    "-vf".to_string(),
                    Self::cap_filter(OPTIMIZE_MAX_WIDTH, OPTIMIZE_MAX_HEIGHT),
                    "-c:a".to_string(),
                    "aac".to_string(),
                    "-b:a".to_string(),
                    OPTIMIZE_AUDIO_BITRATE.to_string(),
                    "-movflags".to_string(),
                    "+faststart".to_string(),
                ]);
            }
            ContentType::Audio => {
                args.extend([
                    "-c:a".to_string(),
                    "aac".to_string(),
                    "-b:a".to_string(),
                    OPTIMIZE_AUDIO_BITRATE.to_string(),
                    "-ar".to_string(),
                    OPTIMIZE_AUDIO_SAMPLE_RATE.to_string(),
                ]);
            }
            // Text and documents have no optimized rendition.
            ContentType::Text | ContentType::Document => {}
        }
        args.push(output.display().to_string());
        args
    }

    fn transcode_args(job: &EncodingJob) -> Vec<String> {
        let preset = job.preset();
        let mut args = Self::base_args();
        args.extend(["-i".to_string(), job.input.display().to_string()]);
        args.extend([
            "-c:v".to_string(),
            preset.video_codec.to_string(),
            "-c:a".to_string(),
            preset.audio_codec.to_string(),
        ]);
        if let Some(crf) = preset.crf {
            args.extend(["-crf".to_string(), crf.to_string()]);
        }
        if let Some(bitrate) = preset.video_bitrate {
            args.extend(["-b:v".to_string(), bitrate.to_string()]);
        }
        // libvpx uses -deadline where x264 takes -preset.
        let speed_flag = if preset.video_codec.starts_with("libvpx") {
            "-deadline"
        } else {
            "-preset"
        };
        args.extend([
            "-b:a".to_string(),
            preset.audio_bitrate.to_string(),
            speed_flag.to_string(),
            preset.speed.to_string(),
            "-vf".to_string(),
            Self::cap_filter(preset.max_width, preset.max_height),
        ]);

        match preset.format {
            "hls" => {
                let segment_pattern = job
                    .output
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join("segment_%03d.ts");
                args.extend([
                    "-f".to_string(),
                    "hls".to_string(),
                    "-hls_time".to_string(),
                    "6".to_string(),
                    "-hls_playlist_type".to_string(),
                    "vod".to_string(),
                    "-hls_segment_filename".to_string(),
                    segment_pattern.display().to_string(),
                ]);
            }
            "mp4" => {
                args.extend(["-movflags".to_string(), "+faststart".to_string()]);
            }
            _ => {}
        }

        args.push(job.output.display().to_string());
        args
    }

    fn watermark_args(input: &Path, output: &Path, text: &str) -> Vec<String> {
        let mut args = Self::base_args();
        args.extend(["-i".to_string(), input.display().to_string()]);
        // Bottom-right corner, fixed inset. Only the video stream is
        // re-encoded; audio is copied through.
        let escaped = text.replace('\'', "\\'").replace(':', "\\:");
        args.extend([
            "-vf".to_string(),
            format!(
                "drawtext=text='{escaped}':fontcolor=white@0.8:fontsize=24:\
                 box=1:boxcolor=black@0.4:x=w-tw-{inset}:y=h-th-{inset}",
                inset = WATERMARK_INSET
            ),
            "-c:a".to_string(),
            "copy".to_string(),
        ]);
        args.push(output.display().to_string());
        args
    }

    /// Run ffmpeg, streaming progress and honoring cancellation.
    async fn run(
        &self,
        args: Vec<String>,
        total_secs: Option<f64>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(ffmpeg = %self.ffmpeg_path, ?args, "spawning ffmpeg");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::adapter(format!("failed to spawn ffmpeg: {e}")))?;

        // Progress stream on stdout.
        if let Some(stdout) = child.stdout.take() {
            let sink = progress.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(elapsed) = parse_progress_line(&line)
                        && let Some(pct) = percent_of(elapsed, total_secs)
                    {
                        sink.report(pct);
                    }
                }
            });
        }

        // Collect stderr for error reporting.
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut collected = Vec::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    collected.push(line);
                }
                collected
            })
        });

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| Error::adapter(format!("failed to wait for ffmpeg: {e}")))?
            }
            _ = cancel.cancelled() => {
                // Ask ffmpeg to quit cleanly first; fall back to a hard
                // kill if it does not exit within the grace period.
                if let Some(mut stdin) = child.stdin.take() {
                    let _ = stdin.write_all(b"q").await;
                    let _ = stdin.shutdown().await;
                }
                if tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait())
                    .await
                    .is_err()
                {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
                info!("ffmpeg invocation cancelled");
                return Err(Error::Cancelled);
            }
        };

        if !status.success() {
            let stderr_tail = match stderr_task {
                Some(task) => task
                    .await
                    .map(|lines| {
                        lines
                            .iter()
                            .rev()
                            .take(5)
                            .rev()
                            .cloned()
                            .collect::<Vec<_>>()
                            .join("; ")
                    })
                    .unwrap_or_default(),
                None => String::new(),
            };
            warn!(code = ?status.code(), "ffmpeg failed: {}", stderr_tail);
            return Err(Error::adapter(format!(
                "ffmpeg exited with code {}: {}",
                status.code().unwrap_or(-1),
                stderr_tail
            )));
        }

        progress.report(100);
        Ok(())
    }
}

#[async_trait]
impl MediaTransformer for FfmpegTransformer {
    async fn thumbnail(
        &self,
        input: &Path,
        output: &Path,
        size: ThumbnailSize,
        seek_secs: Option<f64>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = Self::thumbnail_args(input, output, size, seek_secs);
        // Single-frame capture has no meaningful duration to track.
        self.run(args, None, progress, cancel).await
    }

    async fn optimize(
        &self,
        input: &Path,
        output: &Path,
        content_type: ContentType,
        duration_secs: Option<f64>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = Self::optimize_args(input, output, content_type);
        self.run(args, duration_secs, progress, cancel).await
    }

    async fn transcode(
        &self,
        job: &EncodingJob,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = Self::transcode_args(job);
        self.run(args, job.source_duration_secs, progress, cancel)
            .await
    }

    async fn watermark(
        &self,
        input: &Path,
        output: &Path,
        text: &str,
        duration_secs: Option<f64>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = Self::watermark_args(input, output, text);
        self.run(args, duration_secs, progress, cancel).await
    }

    async fn extract_frame(&self, input: &Path, output: &Path, at_secs: f64) -> Result<()> {
        let mut args = Self::base_args();
        args.extend([
            "-ss".to_string(),
            format!("{at_secs:.3}"),
            "-i".to_string(),
            input.display().to_string(),
            "-vframes".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            "2".to_string(),
            output.display().to_string(),
        ]);
        self.run(args, None, &ProgressSink::noop(), &CancellationToken::new())
            .await
    }
}
