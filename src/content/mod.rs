//! Content items and the deduplicating registry.

pub mod item;
pub mod registry;

pub use item::{
    ContentAnalysis, ContentItem, ContentStatus, ContentType, MediaMetadata, QualityMetrics,
    SubmitOptions,
};
pub use registry::ContentRegistry;
