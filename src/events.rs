//! Typed pipeline events over a broadcast channel.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::pipeline::task::TaskKind;

/// Broadcast channel capacity for pipeline events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the pipeline for external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A new content item was registered.
    ContentAdded {
        content_id: String,
        content_type: String,
    },
    /// A task began processing.
    TaskStarted {
        task_id: String,
        content_id: String,
        kind: TaskKind,
    },
    /// A running task reported progress.
    TaskProgress { task_id: String, percent: u8 },
    /// A task finished successfully.
    TaskCompleted {
        task_id: String,
        kind: TaskKind,
        duration_secs: f64,
    },
    /// A task failed.
    TaskFailed {
        task_id: String,
        kind: TaskKind,
        error: String,
    },
    /// An item was approved by a moderator.
    ContentApproved { content_id: String },
    /// An item was rejected by a moderator.
    ContentRejected { content_id: String, reason: String },
}

/// Create the pipeline event channel.
pub fn event_channel() -> broadcast::Sender<PipelineEvent> {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_broadcast_roundtrip() {
        let tx = event_channel();
        let mut rx = tx.subscribe();

        tx.send(PipelineEvent::ContentAdded {
            content_id: "c1".to_string(),
            content_type: "video".to_string(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            PipelineEvent::ContentAdded { content_id, .. } => assert_eq!(content_id, "c1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = PipelineEvent::TaskProgress {
            task_id: "t1".to_string(),
            percent: 42,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "task_progress");
        assert_eq!(json["percent"], 42);
    }
}
