//! Storage Abstractions
//!
//! Traits for the two kinds of storage the daemon touches:
//! - [`SecureStore`]: durable key/value storage for credentials and session material
//! - [`StorageProvider`]: the cloud folder service holding the images

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::http::ByteStream;

/// Durable secret storage trait
///
/// Holds opaque blobs (serialized credentials, messaging session material).
/// Values are never interpreted by the store.
///
/// Implementations:
/// - Local: one file per key in a private directory
/// - Remote: a database reachable through a connection string
///
/// # Security Requirements
///
/// Implementations MUST:
/// - Restrict access to the owning user where the platform allows it
/// - Never log or expose stored values
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SecureStore;
///
/// async fn store_token(store: &dyn SecureStore, token: &str) -> Result<()> {
///     store.set_secret("storage_credential", token.as_bytes()).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value, replacing any previous value for `key`
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret value
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Check if a secret exists without retrieving it
    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }
}

/// File entry as reported by a cloud storage provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Provider-unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// MIME type, if reported
    pub mime_type: Option<String>,
    /// Size in bytes (absent for folders and native documents)
    pub size: Option<u64>,
    /// Creation timestamp
    pub created_at: Option<DateTime<Utc>>,
    /// Folders this file belongs to
    pub parent_ids: Vec<String>,
    /// Whether the file sits in the provider's trash
    pub trashed: bool,
}

impl RemoteFile {
    /// Whether the MIME type starts with `prefix` (e.g. `image/`).
    pub fn has_mime_prefix(&self, prefix: &str) -> bool {
        self.mime_type
            .as_deref()
            .map(|mime| mime.starts_with(prefix))
            .unwrap_or(false)
    }

    /// Whether `folder_id` is one of this file's parents.
    pub fn is_in(&self, folder_id: &str) -> bool {
        self.parent_ids.iter().any(|p| p == folder_id)
    }
}

/// Children listing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Folder whose direct children are listed
    pub parent_id: String,
    /// Only return files whose MIME type starts with this prefix
    pub mime_prefix: Option<String>,
    /// Maximum number of entries to return
    pub limit: u32,
}

impl ListQuery {
    pub fn children_of(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            mime_prefix: None,
            limit: 100,
        }
    }

    pub fn with_mime_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mime_prefix = Some(prefix.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// Cloud storage provider trait
///
/// Exposes the folder primitives the delivery queue is built on. Folder
/// membership is the only queue state, so the provider must report and
/// mutate parent sets faithfully.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// List non-trashed children of a folder, oldest creation time first
    async fn list_children(&self, query: &ListQuery) -> Result<Vec<RemoteFile>>;

    /// Read the current parent set of a file
    async fn get_parents(&self, file_id: &str) -> Result<Vec<String>>;

    /// Add and remove parents in a single update
    ///
    /// Returns the parent set reported by the provider after the update.
    async fn update_parents(
        &self,
        file_id: &str,
        add_parents: &[String],
        remove_parents: &[String],
    ) -> Result<Vec<String>>;

    /// Open the binary content of a file as a stream
    async fn open_content(&self, file_id: &str) -> Result<ByteStream>;
}
