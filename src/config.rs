//! Pipeline configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration for the media pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of tasks processed concurrently.
    pub max_concurrent_tasks: usize,
    /// Scheduler tick interval in milliseconds. The scheduler also wakes
    /// immediately on enqueue and completion; the tick is a backstop.
    pub tick_interval_ms: u64,
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: String,
    /// Path to the ffprobe binary.
    pub ffprobe_path: String,
    /// Text stamped onto watermarked renditions.
    pub watermark_text: String,
    /// Storage layout for originals and derived artifacts.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Content-analysis service configuration.
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            tick_interval_ms: 250,
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            watermark_text: "mediaforge".to_string(),
            storage: StorageConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

/// Filesystem layout, partitioned by artifact purpose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; all purpose directories live under it.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("media"),
        }
    }
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn originals(&self) -> PathBuf {
        self.root.join("originals")
    }

    pub fn thumbnails(&self) -> PathBuf {
        self.root.join("thumbnails")
    }

    pub fn optimized(&self) -> PathBuf {
        self.root.join("optimized")
    }

    pub fn transcoded(&self) -> PathBuf {
        self.root.join("transcoded")
    }

    pub fn watermarked(&self) -> PathBuf {
        self.root.join("watermarked")
    }

    pub fn temp(&self) -> PathBuf {
        self.root.join("temp")
    }

    /// Create every purpose directory if absent. Called on startup.
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.originals(),
            self.thumbnails(),
            self.optimized(),
            self.transcoded(),
            self.watermarked(),
            self.temp(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// Configuration for the external multi-modal analysis service.
///
/// When no API key is configured the pipeline falls back to the
/// deterministic offline stub provider, which is the development-safe
/// default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Base URL of the analysis service.
    #[serde(default)]
    pub api_url: Option<String>,
    /// API credential. Absent means offline/stub mode.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl AnalysisConfig {
    /// Whether a real network provider can be constructed.
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrent_tasks, 4);
        assert_eq!(config.tick_interval_ms, 250);
    }

    #[test]
    fn test_storage_layout() {
        let storage = StorageConfig::new("/data/media");
        assert_eq!(storage.thumbnails(), PathBuf::from("/data/media/thumbnails"));
        assert_eq!(storage.temp(), PathBuf::from("/data/media/temp"));
    }

    #[tokio::test]
    async fn test_ensure_dirs_creates_layout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let storage = StorageConfig::new(tmp.path().join("media"));
        storage.ensure_dirs().await.unwrap();

        assert!(storage.originals().is_dir());
        assert!(storage.transcoded().is_dir());
        assert!(storage.watermarked().is_dir());
    }

    #[test]
    fn test_analysis_config_offline_by_default() {
        let config = AnalysisConfig::default();
        assert!(!config.has_credentials());
    }
}
