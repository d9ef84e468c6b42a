//! Encoding preset table.
//!
//! Maps a (format, quality) pair to concrete encoder parameters. The
//! fallback chain (unknown quality -> the format's medium preset,
//! unknown format -> the global default) must never leave a task
//! without a usable preset.

use serde::{Deserialize, Serialize};

/// Quality tier requested for an encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// A named bundle of encoding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingPreset {
    /// Container/format key ("mp4", "webm", "hls").
    pub format: &'static str,
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
    /// Constant rate factor; quality-based encoders only.
    pub crf: Option<u8>,
    pub video_bitrate: Option<&'static str>,
    pub audio_bitrate: &'static str,
    /// Encoder speed preset.
    pub speed: &'static str,
    pub max_width: u32,
    pub max_height: u32,
}

const MP4_PRESETS: [(Quality, EncodingPreset); 3] = [
    (
        Quality::Low,
        EncodingPreset {
            format: "mp4",
            video_codec: "libx264",
            audio_codec: "aac",
            crf: Some(30),
            video_bitrate: None,
            audio_bitrate: "96k",
            speed: "fast",
            max_width: 854,
            max_height: 480,
        },
    ),
    (
        Quality::Medium,
        EncodingPreset {
            format: "mp4",
            video_codec: "libx264",
            audio_codec: "aac",
            crf: Some(23),
            video_bitrate: None,
            audio_bitrate: "128k",
            speed: "medium",
            max_width: 1280,
            max_height: 720,
        },
    ),
    (
        Quality::High,
        EncodingPreset {
            format: "mp4",
            video_codec: "libx264",
            audio_codec: "aac",
            crf: Some(18),
            video_bitrate: None,
            audio_bitrate: "192k",
            speed: "slow",
            max_width: 1920,
            max_height: 1080,
        },
    ),
];

const WEBM_PRESETS: [(Quality, EncodingPreset); 3] = [
    (
        Quality::Low,
        EncodingPreset {
            format: "webm",
            video_codec: "libvpx-vp9",
            audio_codec: "libopus",
            crf: Some(36),
            video_bitrate: None,
            audio_bitrate: "96k",
            speed: "realtime",
            max_width: 854,
            max_height: 480,
        },
    ),
    (
        Quality::Medium,
        EncodingPreset {
            format: "webm",
            video_codec: "libvpx-vp9",
            audio_codec: "libopus",
            crf: Some(31),
            video_bitrate: None,
            audio_bitrate: "128k",
            speed: "good",
            max_width: 1280,
            max_height: 720,
        },
    ),
    (
        Quality::High,
        EncodingPreset {
            format: "webm",
            video_codec: "libvpx-vp9",
            audio_codec: "libopus",
            crf: Some(24),
            video_bitrate: None,
            audio_bitrate: "192k",
            speed: "good",
            max_width: 1920,
            max_height: 1080,
        },
    ),
];

const HLS_PRESETS: [(Quality, EncodingPreset); 3] = [
    (
        Quality::Low,
        EncodingPreset {
            format: "hls",
            video_codec: "libx264",
            audio_codec: "aac",
            crf: None,
            video_bitrate: Some("800k"),
            audio_bitrate: "96k",
            speed: "fast",
            max_width: 854,
            max_height: 480,
        },
    ),
    (
        Quality::Medium,
        EncodingPreset {
            format: "hls",
            video_codec: "libx264",
            audio_codec: "aac",
            crf: None,
            video_bitrate: Some("2500k"),
            audio_bitrate: "128k",
            speed: "medium",
            max_width: 1280,
            max_height: 720,
        },
    ),
    (
        Quality::High,
        EncodingPreset {
            format: "hls",
            video_codec: "libx264",
            audio_codec: "aac",
            crf: None,
            video_bitrate: Some("5000k"),
            audio_bitrate: "192k",
            speed: "medium",
            max_width: 1920,
            max_height: 1080,
        },
    ),
];

/// Global fallback when the format itself is unknown.
pub const DEFAULT_PRESET: EncodingPreset = MP4_PRESETS[1].1;

fn format_table(format: &str) -> Option<&'static [(Quality, EncodingPreset); 3]> {
    match format.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" | "mov" => Some(&MP4_PRESETS),
        "webm" => Some(&WEBM_PRESETS),
        "hls" | "m3u8" => Some(&HLS_PRESETS),
        _ => None,
    }
}

/// Resolve a preset for the given (format, quality) pair.
pub fn resolve(format: &str, quality: Quality) -> EncodingPreset {
    match format_table(format) {
        Some(table) => table
            .iter()
            .find(|(q, _)| *q == quality)
            .map(|(_, p)| *p)
            // Table rows cover every Quality variant; this arm guards
            // against future variants.
            .unwrap_or_else(|| table[1].1),
        None => DEFAULT_PRESET,
    }
}
