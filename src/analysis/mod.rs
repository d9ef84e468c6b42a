//! Content analysis adapters.
//!
//! Providers score individual samples (a still frame, a text blob) and
//! the aggregation layer folds per-sample results into one
//! [`ContentAnalysis`](crate::content::item::ContentAnalysis) for the
//! item.

pub mod aggregate;
pub mod http;
pub mod stub;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::content::item::QualityMetrics;

pub use aggregate::aggregate_frames;
pub use http::HttpAnalysisProvider;
pub use stub::StubAnalysisProvider;

/// Relative offsets into a video at which frames are sampled for
/// analysis.
pub const FRAME_SAMPLE_OFFSETS: [f64; 5] = [0.1, 0.3, 0.5, 0.7, 0.9];

/// Scores for a single analyzed sample. All scores are 0..=100.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameAnalysis {
    #[serde(default)]
    pub adult_score: f64,
    #[serde(default)]
    pub violence_score: f64,
    #[serde(default)]
    pub racy_score: f64,
    #[serde(default)]
    pub medical_score: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub adult_category: String,
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default)]
    pub face_count: u32,
    #[serde(default)]
    pub language: String,
    /// Sentiment of analyzed text, -1.0 to 1.0.
    #[serde(default)]
    pub sentiment: Option<f64>,
    #[serde(default)]
    pub quality: QualityMetrics,
}

/// Scores media samples and transcribes audio.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Score a single image file.
    async fn analyze_image(&self, path: &Path) -> Result<FrameAnalysis>;

    /// Score a text blob (language, sentiment, risk categories).
    async fn analyze_text(&self, text: &str) -> Result<FrameAnalysis>;

    /// Transcribe an audio file to plain text.
    async fn transcribe(&self, path: &Path) -> Result<String>;
}
