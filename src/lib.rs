//! mediaforge: an embeddable media processing pipeline.
//!
//! Content is submitted as local files, deduplicated by hash, and fanned
//! out into prioritized processing tasks: thumbnails, optimized
//! renditions, transcodes, watermarks, and risk analysis. A rule engine
//! turns analysis scores into moderation flags, and every state change
//! is observable on a broadcast event channel.
//!
//! ```no_run
//! use mediaforge::{MediaPipeline, PipelineConfig, SubmitOptions};
//!
//! # async fn run() -> mediaforge::Result<()> {
//! let pipeline = MediaPipeline::new(PipelineConfig::default())?;
//! pipeline.start().await?;
//!
//! let id = pipeline
//!     .submit("upload.mp4", "user-42", SubmitOptions::default())
//!     .await?;
//! println!("submitted {id}");
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod facade;
pub mod logging;
pub mod media;
pub mod moderation;
pub mod pipeline;

pub use config::{AnalysisConfig, PipelineConfig, StorageConfig};
pub use content::item::{ContentItem, ContentStatus, ContentType, SubmitOptions};
pub use content::registry::ContentRegistry;
pub use error::{Error, Result};
pub use events::PipelineEvent;
pub use facade::{MediaPipeline, PipelineStats};
pub use pipeline::task::{ProcessingTask, TaskKind, TaskStatus};
