//! Processing task model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of work a task performs. Ordering between kinds is decided
/// purely by [`TaskKind::priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Analyze,
    Thumbnail,
    Transcode,
    Optimize,
    Watermark,
}

impl TaskKind {
    /// Scheduling priority. Higher runs first; ties fall back to
    /// submission order.
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Analyze => 100,
            Self::Thumbnail => 75,
            Self::Transcode => 50,
            Self::Optimize => 25,
            Self::Watermark => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Thumbnail => "thumbnail",
            Self::Transcode => "transcode",
            Self::Optimize => "optimize",
            Self::Watermark => "watermark",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle. Cancellation is not a separate state: a cancelled
/// task finishes as `Failed` with the reason `"cancelled"` stored on
/// its error field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// True once the task can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One unit of schedulable work against a single content item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub id: String,
    pub content_id: String,
    pub kind: TaskKind,
    pub priority: u8,
    pub status: TaskStatus,
    /// 0..=100, updated while the task runs.
    pub progress: u8,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessingTask {
    pub fn new(content_id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content_id: content_id.into(),
            kind,
            priority: kind.priority(),
            status: TaskStatus::Pending,
            progress: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall-clock runtime, once started.
    pub fn duration_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering_across_kinds() {
        assert!(TaskKind::Analyze.priority() > TaskKind::Thumbnail.priority());
        assert!(TaskKind::Thumbnail.priority() > TaskKind::Transcode.priority());
        assert!(TaskKind::Transcode.priority() > TaskKind::Optimize.priority());
        assert!(TaskKind::Optimize.priority() > TaskKind::Watermark.priority());
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = ProcessingTask::new("content-1", TaskKind::Thumbnail);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, 75);
        assert_eq!(task.progress, 0);
        assert!(!task.status.is_terminal());
    }
}
