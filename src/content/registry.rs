//! Content registry: the canonical set of ingested items.
//!
//! Owns every `ContentItem` record. All mutation goes through the public
//! operations here; task strategies never write item fields directly.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::content::item::{
    ContentAnalysis, ContentItem, ContentStatus, ContentType, MediaMetadata, SubmitOptions,
    mime_for_extension,
};
use crate::events::PipelineEvent;
use crate::moderation::{self, Verdict};
use crate::{Error, Result};

/// Registry of content items keyed by id, with a hash index enforcing
/// the deduplication invariant.
pub struct ContentRegistry {
    items: DashMap<String, ContentItem>,
    /// content hash -> item id.
    by_hash: DashMap<String, String>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl ContentRegistry {
    pub fn new(event_tx: broadcast::Sender<PipelineEvent>) -> Self {
        Self {
            items: DashMap::new(),
            by_hash: DashMap::new(),
            event_tx,
        }
    }

    /// Register a new content item.
    ///
    /// Computes the SHA-256 of the raw bytes and rejects the submission
    /// with [`Error::DuplicateContent`] when an item with the same hash
    /// already exists. Emits `ContentAdded` on success.
    pub async fn submit(
        &self,
        path: impl AsRef<Path>,
        owner_id: impl Into<String>,
        options: SubmitOptions,
    ) -> Result<String> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let hash = hex::encode(Sha256::digest(&bytes));

        let content_type = ContentType::from_path(path);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let mut item = ContentItem::new(hash.clone(), content_type, path, owner_id, options);
        item.metadata = MediaMetadata {
            size_bytes: bytes.len() as u64,
            mime_type: mime_for_extension(ext).to_string(),
            ..Default::default()
        };
        let id = item.id.clone();

        // Claim the hash through the entry API; the shard stays locked
        // across the check and the insert, so identical concurrent
        // submissions cannot both win.
        match self.by_hash.entry(hash) {
            Entry::Occupied(existing) => {
                debug!(
                    hash = %item.content_hash,
                    existing = %existing.get(),
                    "rejecting duplicate submission"
                );
                return Err(Error::DuplicateContent {
                    hash: item.content_hash,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(id.clone());
            }
        }
        self.items.insert(id.clone(), item);

        info!(content_id = %id, content_type = %content_type, "content registered");
        let _ = self.event_tx.send(PipelineEvent::ContentAdded {
            content_id: id.clone(),
            content_type: content_type.as_str().to_string(),
        });

        Ok(id)
    }

    pub fn get(&self, content_id: &str) -> Option<ContentItem> {
        self.items.get(content_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn list_by_owner(&self, owner_id: &str) -> Vec<ContentItem> {
        let mut items: Vec<_> = self
            .items
            .iter()
            .filter(|e| e.value().owner_id == owner_id)
            .map(|e| e.value().clone())
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }

    /// Items that finished processing but have not been approved.
    pub fn list_pending_moderation(&self) -> Vec<ContentItem> {
        let mut items: Vec<_> = self
            .items
            .iter()
            .filter(|e| e.value().status == ContentStatus::Completed && !e.value().approved)
            .map(|e| e.value().clone())
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }

    /// Approve an item. Idempotent. Clears automated risk flags so the
    /// human decision wins over the rule engine.
    pub fn approve(&self, content_id: &str) -> Result<()> {
        let mut entry = self
            .items
            .get_mut(content_id)
            .ok_or_else(|| Error::not_found("content", content_id))?;
        let item = entry.value_mut();
        item.approved = true;
        moderation::clear_risk_flags(&mut item.flags);
        item.updated_at = chrono::Utc::now();
        drop(entry);

        info!(content_id = %content_id, "content approved");
        let _ = self.event_tx.send(PipelineEvent::ContentApproved {
            content_id: content_id.to_string(),
        });
        Ok(())
    }

    /// Reject an item with a reason. Idempotent on the approval bit; the
    /// `rejected:<reason>` flag is appended once per distinct reason.
    pub fn reject(&self, content_id: &str, reason: &str) -> Result<()> {
        let mut entry = self
            .items
            .get_mut(content_id)
            .ok_or_else(|| Error::not_found("content", content_id))?;
        let item = entry.value_mut();
        item.approved = false;
        item.add_flag(format!("rejected:{reason}"));
        item.updated_at = chrono::Utc::now();
        drop(entry);

        info!(content_id = %content_id, reason = %reason, "content rejected");
        let _ = self.event_tx.send(PipelineEvent::ContentRejected {
            content_id: content_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Store probed structural metadata, preserving ingest-time size and
    /// mime type.
    pub fn set_probed_metadata(&self, content_id: &str, probed: MediaMetadata) -> Result<()> {
        let mut entry = self
            .items
            .get_mut(content_id)
            .ok_or_else(|| Error::not_found("content", content_id))?;
        let item = entry.value_mut();
        item.metadata.duration_secs = probed.duration_secs;
        item.metadata.width = probed.width;
        item.metadata.height = probed.height;
        item.metadata.bitrate = probed.bitrate;
        item.metadata.codec = probed.codec;
        item.metadata.fps = probed.fps;
        item.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Record a derived artifact path. Keys are chosen so that
    /// concurrently running tasks for the same item write disjoint keys.
    pub fn add_artifact(&self, content_id: &str, key: &str, path: impl Into<PathBuf>) -> Result<()> {
        let mut entry = self
            .items
            .get_mut(content_id)
            .ok_or_else(|| Error::not_found("content", content_id))?;
        let item = entry.value_mut();
        item.artifacts.insert(key.to_string(), path.into());
        item.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Mark an item as processing. No-op once it reached a terminal state.
    pub fn mark_processing(&self, content_id: &str) -> Result<()> {
        let mut entry = self
            .items
            .get_mut(content_id)
            .ok_or_else(|| Error::not_found("content", content_id))?;
        let item = entry.value_mut();
        if item.status == ContentStatus::Pending {
            item.status = ContentStatus::Processing;
            item.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    /// Apply a successful analysis result and its moderation verdict.
    /// Transitions the item to `Completed`.
    pub fn apply_analysis(
        &self,
        content_id: &str,
        analysis: ContentAnalysis,
        verdict: Verdict,
    ) -> Result<()> {
        let mut entry = self
            .items
            .get_mut(content_id)
            .ok_or_else(|| Error::not_found("content", content_id))?;
        let item = entry.value_mut();
        // A transcript stored earlier in the same task survives the
        // aggregated result landing.
        let extracted = item.analysis.extracted_text.take();
        item.analysis = analysis;
        if item.analysis.extracted_text.is_none() {
            item.analysis.extracted_text = extracted;
        }
        item.nsfw = verdict.nsfw;
        for flag in verdict.flags {
            item.add_flag(flag);
        }
        if verdict.force_reject {
            item.approved = false;
        }
        item.status = ContentStatus::Completed;
        item.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Mark the item `Completed` without analysis (analysis disabled at
    /// submission). Approval stays at its submission value.
    pub fn mark_completed(&self, content_id: &str) -> Result<()> {
        let mut entry = self
            .items
            .get_mut(content_id)
            .ok_or_else(|| Error::not_found("content", content_id))?;
        let item = entry.value_mut();
        item.status = ContentStatus::Completed;
        item.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Mark the item `Failed`. Only a failed analyze task drives this;
    /// derived-artifact tasks are best-effort.
    pub fn mark_failed(&self, content_id: &str) -> Result<()> {
        let mut entry = self
            .items
            .get_mut(content_id)
            .ok_or_else(|| Error::not_found("content", content_id))?;
        let item = entry.value_mut();
        item.status = ContentStatus::Failed;
        item.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Store extracted text / transcript on the item.
    pub fn set_extracted_text(&self, content_id: &str, text: String) -> Result<()> {
        let mut entry = self
            .items
            .get_mut(content_id)
            .ok_or_else(|| Error::not_found("content", content_id))?;
        entry.value_mut().analysis.extracted_text = Some(text);
        Ok(())
    }

    /// Item counts by status: (pending, processing, completed, failed).
    pub fn status_counts(&self) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        for entry in self.items.iter() {
            match entry.value().status {
                ContentStatus::Pending => counts.0 += 1,
                ContentStatus::Processing => counts.1 += 1,
                ContentStatus::Completed => counts.2 += 1,
                ContentStatus::Failed => counts.3 += 1,
            }
        }
        counts
    }
}
