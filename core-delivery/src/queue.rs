//! # Delivery Queue
//!
//! A cloud folder used as a FIFO queue. An item is pending while the pending
//! folder is one of its parents and delivered once the delivered folder is;
//! there is no separate flag and no in-memory copy of the queue.
//!
//! - `peek_oldest`: earliest-created image in the pending folder
//! - `fetch_content`: stream the item to `<scratch>/outgoing-image`
//! - `acknowledge`: swap the pending parent for the delivered one, leaving
//!   any other parents alone

use crate::error::{DeliveryError, Result};
use bridge_traits::storage::{ListQuery, RemoteFile, StorageProvider};
use chrono::{DateTime, Utc};
use core_runtime::logging::strip_path;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Name of the local file the current item is downloaded to
pub const SCRATCH_FILE_NAME: &str = "outgoing-image";

pub const IMAGE_MIME_PREFIX: &str = "image/";

/// Entries requested per peek. The provider already orders by creation
/// time, so only the head of the listing matters.
const PEEK_WINDOW: u32 = 100;

/// One image waiting in (or moved out of) the pending folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub created_at: Option<DateTime<Utc>>,
    pub parent_ids: Vec<String>,
}

impl QueueItem {
    fn from_remote(file: RemoteFile) -> Self {
        Self {
            mime_type: file
                .mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            id: file.id,
            name: file.name,
            created_at: file.created_at,
            parent_ids: file.parent_ids,
        }
    }

    /// Ordering key: creation time ascending, undated items last, id as
    /// the tie-break
    fn order_key(&self) -> (bool, Option<DateTime<Utc>>, &str) {
        (self.created_at.is_none(), self.created_at, self.id.as_str())
    }
}

/// Result of a successful acknowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The pending parent was swapped for the delivered folder
    Moved,
    /// The item was already delivered-only; nothing was changed
    AlreadyAcknowledged,
}

pub struct DeliveryQueue {
    provider: Arc<dyn StorageProvider>,
    pending_folder_id: String,
    delivered_folder_id: String,
    scratch_dir: PathBuf,
}

impl DeliveryQueue {
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        pending_folder_id: impl Into<String>,
        delivered_folder_id: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            pending_folder_id: pending_folder_id.into(),
            delivered_folder_id: delivered_folder_id.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn pending_folder_id(&self) -> &str {
        &self.pending_folder_id
    }

    pub fn delivered_folder_id(&self) -> &str {
        &self.delivered_folder_id
    }

    pub fn scratch_path(&self) -> PathBuf {
        self.scratch_dir.join(SCRATCH_FILE_NAME)
    }

    /// Oldest pending image, or `None` when the folder holds nothing to send
    #[instrument(skip(self), fields(folder = %self.pending_folder_id))]
    pub async fn peek_oldest(&self) -> Result<Option<QueueItem>> {
        let query = ListQuery::children_of(&self.pending_folder_id)
            .with_mime_prefix(IMAGE_MIME_PREFIX)
            .with_limit(PEEK_WINDOW);

        let files = self
            .provider
            .list_children(&query)
            .await
            .map_err(DeliveryError::queue("list"))?;

        // The provider filter is trusted but not relied upon
        let oldest = files
            .into_iter()
            .filter(|f| {
                !f.trashed && f.is_in(&self.pending_folder_id) && f.has_mime_prefix(IMAGE_MIME_PREFIX)
            })
            .map(QueueItem::from_remote)
            .min_by(|a, b| a.order_key().cmp(&b.order_key()));

        match &oldest {
            Some(item) => debug!(item_id = %item.id, name = %item.name, "Oldest pending image"),
            None => debug!("Pending folder is empty"),
        }

        Ok(oldest)
    }

    /// Download `item` to the scratch file and return its path
    ///
    /// Content is written to `outgoing-image.part` and renamed into place
    /// once complete, so the scratch file is never observed half-written.
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    pub async fn fetch_content(&self, item: &QueueItem) -> Result<PathBuf> {
        let mut stream = self
            .provider
            .open_content(&item.id)
            .await
            .map_err(DeliveryError::queue("download"))?;

        tokio::fs::create_dir_all(&self.scratch_dir).await?;

        let target = self.scratch_path();
        let partial = self.scratch_dir.join(format!("{}.part", SCRATCH_FILE_NAME));

        let written = match write_partial(&partial, &mut stream).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!(error = %cleanup, "No partial download to clean up");
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&partial, &target).await?;

        let shown = target.to_string_lossy();
        info!(bytes = written, file = %strip_path(&shown), "Fetched item content");
        Ok(target)
    }

    /// Move `item` out of the pending folder into `target_folder`
    ///
    /// The parent set is re-read right before the update; only the pending
    /// parent is removed and only a missing target is added. The returned
    /// parent set must show the move, otherwise `AcknowledgeFailed`.
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    pub async fn acknowledge(&self, item: &QueueItem, target_folder: &str) -> Result<AckOutcome> {
        let parents = self
            .provider
            .get_parents(&item.id)
            .await
            .map_err(DeliveryError::queue("get_parents"))?;

        let has_pending = parents.iter().any(|p| p == &self.pending_folder_id);
        let has_target = parents.iter().any(|p| p == target_folder);

        if !has_pending && has_target {
            info!("Item already acknowledged");
            return Ok(AckOutcome::AlreadyAcknowledged);
        }

        let add: Vec<String> = if has_target {
            Vec::new()
        } else {
            vec![target_folder.to_string()]
        };
        let remove: Vec<String> = if has_pending {
            vec![self.pending_folder_id.clone()]
        } else {
            warn!("Pending parent already gone, only adding the delivered folder");
            Vec::new()
        };

        let updated = self
            .provider
            .update_parents(&item.id, &add, &remove)
            .await
            .map_err(DeliveryError::queue("update_parents"))?;

        let moved = updated.iter().any(|p| p == target_folder)
            && !updated.iter().any(|p| p == &self.pending_folder_id);
        if !moved {
            return Err(DeliveryError::AcknowledgeFailed {
                item_id: item.id.clone(),
                reason: format!("provider reports parents {:?}", updated),
            });
        }

        info!(target = %target_folder, "Item acknowledged");
        Ok(AckOutcome::Moved)
    }
}

async fn write_partial(
    path: &Path,
    stream: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let written = tokio::io::copy(stream, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: &str, created: Option<(u32, u32)>) -> QueueItem {
        QueueItem {
            id: id.to_string(),
            name: format!("{}.jpg", id),
            mime_type: "image/jpeg".to_string(),
            created_at: created.map(|(h, m)| Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()),
            parent_ids: vec!["pending".to_string()],
        }
    }

    #[test]
    fn test_order_key_prefers_oldest_then_id() {
        let mut items = vec![
            item("c", Some((10, 0))),
            item("b", Some((9, 0))),
            item("a", Some((9, 0))),
            item("z", None),
        ];
        items.sort_by(|x, y| x.order_key().cmp(&y.order_key()));

        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "z"]);
    }

    #[test]
    fn test_from_remote_defaults_mime() {
        let remote = RemoteFile {
            id: "x".to_string(),
            name: "x".to_string(),
            mime_type: None,
            size: None,
            created_at: None,
            parent_ids: vec![],
            trashed: false,
        };
        assert_eq!(QueueItem::from_remote(remote).mime_type, "application/octet-stream");
    }
}
