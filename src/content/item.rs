//! Content item entity and its value types.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type of an ingested item, inferred from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Image,
    Video,
    Audio,
    Text,
    Document,
}

impl ContentType {
    /// Infer the content type from a file extension. Unknown extensions
    /// map to `Document`.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "avif" => Self::Image,
            "mp4" | "mov" | "mkv" | "webm" | "avi" | "flv" | "ts" | "m4v" => Self::Video,
            "mp3" | "aac" | "wav" | "flac" | "ogg" | "opus" | "m4a" => Self::Audio,
            "txt" | "md" | "srt" | "vtt" => Self::Text,
            _ => Self::Document,
        }
    }

    /// Infer the content type from a file path.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Document)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
            Self::Document => "document",
        }
    }

    /// Whether ffprobe can extract stream metadata for this type.
    pub fn is_probeable(&self) -> bool {
        matches!(self, Self::Image | Self::Video | Self::Audio)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guess a mime type from a file extension.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "flv" => "video/x-flv",
        "mp3" => "audio/mpeg",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" | "opus" => "audio/ogg",
        "m4a" => "audio/mp4",
        "txt" | "md" => "text/plain",
        "srt" | "vtt" => "text/plain",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Structural metadata extracted at ingest / probe time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    /// File size in bytes.
    pub size_bytes: u64,
    /// Mime type guessed from the extension.
    pub mime_type: String,
    /// Duration in seconds, for timed media.
    pub duration_secs: Option<f64>,
    /// Pixel width, for visual media.
    pub width: Option<u32>,
    /// Pixel height, for visual media.
    pub height: Option<u32>,
    /// Overall bitrate in bits per second.
    pub bitrate: Option<u64>,
    /// Primary stream codec name.
    pub codec: Option<String>,
    /// Frames per second, for video.
    pub fps: Option<f64>,
}

/// Technical quality metrics reported by the analysis service.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub sharpness: f64,
    pub brightness: f64,
}

/// Normalized result of content analysis. All scores are on a 0-100
/// scale. Default-zero until a successful analyze task fills it in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentAnalysis {
    /// Single aggregate moderation-risk score.
    pub risk_score: f64,
    /// Service confidence in its own scores.
    pub confidence: f64,
    pub adult_score: f64,
    pub violence_score: f64,
    pub medical_score: f64,
    pub racy_score: f64,
    /// Textual label for the adult category (e.g. "unlikely").
    pub adult_category: Option<String>,
    /// Objects detected in visual content.
    pub objects: Vec<String>,
    /// Number of faces detected in visual content.
    pub face_count: u32,
    /// Extracted text (documents) or transcript (audio).
    pub extracted_text: Option<String>,
    /// Detected language of extracted text.
    pub language: Option<String>,
    /// Sentiment of extracted text, -1.0 to 1.0.
    pub sentiment: Option<f64>,
    pub quality: QualityMetrics,
}

/// Lifecycle state of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    /// Registered, processing not finished.
    Pending,
    /// At least one task is running against the item.
    Processing,
    /// The analyze task finished (or analysis was not requested).
    Completed,
    /// The analyze task failed.
    Failed,
}

/// Options supplied at submission controlling which tasks are created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOptions {
    /// Initial approval state; a high-risk verdict still forces false.
    pub auto_approve: bool,
    /// Generate the small/medium/large thumbnail set.
    pub generate_thumbnails: bool,
    /// Generate the size/quality-capped rendition.
    pub generate_optimized: bool,
    /// Run content analysis and the moderation rule engine.
    pub analyze_content: bool,
    /// Persist extracted text / transcripts on the item.
    pub extract_text: bool,
    /// Produce a watermarked copy.
    pub watermark: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            auto_approve: false,
            generate_thumbnails: true,
            generate_optimized: true,
            analyze_content: true,
            extract_text: false,
            watermark: false,
        }
    }
}

/// One deduplicated unit of submitted media tracked through its
/// processing lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// Opaque id generated at ingest.
    pub id: String,
    /// SHA-256 of the raw bytes; the deduplication key.
    pub content_hash: String,
    pub content_type: ContentType,
    /// Path of the original upload.
    pub original_path: PathBuf,
    /// Derived artifact name -> path. Each key is written once.
    pub artifacts: BTreeMap<String, PathBuf>,
    pub metadata: MediaMetadata,
    pub analysis: ContentAnalysis,
    /// Identity of the submitting owner.
    pub owner_id: String,
    /// Free-form tags attached by collaborators.
    pub tags: Vec<String>,
    pub status: ContentStatus,
    pub nsfw: bool,
    pub approved: bool,
    /// Ordered set of moderation flags.
    pub flags: Vec<String>,
    pub options: SubmitOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(
        content_hash: impl Into<String>,
        content_type: ContentType,
        original_path: impl Into<PathBuf>,
        owner_id: impl Into<String>,
        options: SubmitOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_hash: content_hash.into(),
            content_type,
            original_path: original_path.into(),
            artifacts: BTreeMap::new(),
            metadata: MediaMetadata::default(),
            analysis: ContentAnalysis::default(),
            owner_id: owner_id.into(),
            tags: Vec::new(),
            status: ContentStatus::Pending,
            nsfw: false,
            approved: options.auto_approve,
            flags: Vec::new(),
            options,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a flag if not already present, preserving order.
    pub fn add_flag(&mut self, flag: impl Into<String>) {
        let flag = flag.into();
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }
}
