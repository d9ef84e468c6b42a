//! Media adapters: probing, encoding presets, progress parsing, and
//! ffmpeg-backed transforms.

pub mod presets;
pub mod probe;
pub mod progress;
pub mod transform;

pub use presets::{EncodingPreset, Quality};
pub use probe::{FfprobeProber, MediaProber};
pub use progress::{ProgressSink, ProgressUpdate};
pub use transform::{EncodingJob, FfmpegTransformer, MediaTransformer, ThumbnailSize};
