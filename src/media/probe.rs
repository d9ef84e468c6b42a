//! Probe adapter: structural metadata extraction via ffprobe.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::content::item::MediaMetadata;
use crate::{Error, Result};

/// Documented fallback when the frame-rate field is missing or
/// malformed. Extraction is best-effort per field; a bad rate never
/// fails the whole probe.
pub const DEFAULT_FPS: f64 = 30.0;

/// Extracts structural metadata for a file.
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaMetadata>;
}

/// Probe adapter backed by the ffprobe binary.
pub struct FfprobeProber {
    ffprobe_path: String,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new(std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Normalize a frame-rate expression of the form "N/D" or a bare
/// number into a float. Falls back to [`DEFAULT_FPS`] for missing,
/// malformed, or zero-denominator input.
pub fn parse_frame_rate(raw: Option<&str>) -> f64 {
    let Some(raw) = raw else {
        return DEFAULT_FPS;
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return DEFAULT_FPS;
    }

    let value = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = match num.trim().parse() {
                Ok(v) => v,
                Err(_) => return DEFAULT_FPS,
            };
            let den: f64 = match den.trim().parse() {
                Ok(v) => v,
                Err(_) => return DEFAULT_FPS,
            };
            if den == 0.0 { return DEFAULT_FPS } else { num / den }
        }
        None => match raw.parse::<f64>() {
            Ok(v) => v,
            Err(_) => return DEFAULT_FPS,
        },
    };

    if value.is_finite() && value > 0.0 {
        value
    } else {
        DEFAULT_FPS
    }
}

fn metadata_from_probe(output: ProbeOutput) -> MediaMetadata {
    let mut meta = MediaMetadata::default();

    if let Some(format) = output.format {
        meta.duration_secs = format.duration.as_deref().and_then(|d| d.parse().ok());
        meta.bitrate = format.bit_rate.as_deref().and_then(|b| b.parse().ok());
        if let Some(size) = format.size.as_deref().and_then(|s| s.parse().ok()) {
            meta.size_bytes = size;
        }
    }

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    if let Some(video) = video {
        meta.width = video.width;
        meta.height = video.height;
        meta.codec = video.codec_name.clone();
        let rate = video
            .avg_frame_rate
            .as_deref()
            .filter(|r| *r != "0/0")
            .or(video.r_frame_rate.as_deref());
        meta.fps = Some(parse_frame_rate(rate));
    } else if let Some(audio) = audio {
        meta.codec = audio.codec_name.clone();
    }

    meta
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<MediaMetadata> {
        if !path.exists() {
            return Err(Error::probe(format!(
                "input file does not exist: {}",
                path.display()
            )));
        }

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .env("LC_ALL", "C")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::probe(format!("failed to spawn ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(path = %path.display(), "ffprobe failed: {}", stderr.trim());
            return Err(Error::probe(format!(
                "ffprobe exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::probe(format!("unparseable ffprobe output: {e}")))?;

        let meta = metadata_from_probe(parsed);
        debug!(
            path = %path.display(),
            duration = ?meta.duration_secs,
            fps = ?meta.fps,
            "probed media"
        );
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("30000/1001"), 29.97002997002997)]
    #[case(Some("25/1"), 25.0)]
    #[case(Some("24"), 24.0)]
    #[case(Some("23.976"), 23.976)]
    fn test_parse_frame_rate_valid(#[case] raw: Option<&str>, #[case] expected: f64) {
        assert!((parse_frame_rate(raw) - expected).abs() < 1e-9);
    }

    #[rstest]
    #[case(None)]
    #[case(Some(""))]
    #[case(Some("0/0"))]
    #[case(Some("30/0"))]
    #[case(Some("abc"))]
    #[case(Some("x/y"))]
    #[case(Some("-30"))]
    fn test_parse_frame_rate_falls_back_to_default(#[case] raw: Option<&str>) {
        assert_eq!(parse_frame_rate(raw), DEFAULT_FPS);
    }

    #[test]
    fn test_metadata_from_probe_video() {
        let json = r#"{
            "format": {"duration": "10.000000", "bit_rate": "1200000", "size": "1500000"},
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
                 "r_frame_rate": "30/1", "avg_frame_rate": "30/1"},
                {"codec_type": "audio", "codec_name": "aac"}
            ]
        }"#;
        let parsed: ProbeOutput = serde_json::from_str(json).unwrap();
        let meta = metadata_from_probe(parsed);

        assert_eq!(meta.duration_secs, Some(10.0));
        assert_eq!(meta.bitrate, Some(1_200_000));
        assert_eq!(meta.width, Some(1920));
        assert_eq!(meta.fps, Some(30.0));
        assert_eq!(meta.codec.as_deref(), Some("h264"));
    }

    #[test]
    fn test_metadata_from_probe_malformed_rate_defaults() {
        let json = r#"{
            "format": {"duration": "5.0"},
            "streams": [{"codec_type": "video", "r_frame_rate": "0/0", "avg_frame_rate": "0/0"}]
        }"#;
        let parsed: ProbeOutput = serde_json::from_str(json).unwrap();
        let meta = metadata_from_probe(parsed);
        assert_eq!(meta.fps, Some(DEFAULT_FPS));
    }

    #[test]
    fn test_metadata_from_probe_audio_only() {
        let json = r#"{
            "format": {"duration": "180.5", "bit_rate": "128000"},
            "streams": [{"codec_type": "audio", "codec_name": "mp3"}]
        }"#;
        let parsed: ProbeOutput = serde_json::from_str(json).unwrap();
        let meta = metadata_from_probe(parsed);
        assert_eq!(meta.duration_secs, Some(180.5));
        assert_eq!(meta.codec.as_deref(), Some("mp3"));
        assert!(meta.fps.is_none());
    }

    #[tokio::test]
    async fn test_probe_missing_file_is_probe_error() {
        let prober = FfprobeProber::default();
        let err = prober
            .probe(Path::new("/nonexistent/clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Probe(_)));
    }
}
