//! Messaging Transport Abstraction
//!
//! The transport is the piece that actually talks to the messaging network
//! (browser automation, a gateway sidecar, ...). The core only observes its
//! lifecycle events and asks it to send media.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::Result;

/// Opaque authentication material for a messaging session.
///
/// Persisted so that a restart does not require pairing again. The blob is
/// never interpreted outside the transport that produced it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMaterial {
    /// Serialized session blob
    pub blob: Vec<u8>,
    /// When the transport last reported this material
    pub last_sync: DateTime<Utc>,
}

impl fmt::Debug for SessionMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMaterial")
            .field("blob", &format_args!("[REDACTED; {} bytes]", self.blob.len()))
            .field("last_sync", &self.last_sync)
            .finish()
    }
}

/// Lifecycle events emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport needs the user to scan/enter a pairing code
    PairingChallenge { code: String },
    /// New or refreshed authentication material is available
    Authenticated { material: SessionMaterial },
    /// The session is usable for sending
    Ready,
    /// The connection was lost; pairing may be requested again
    Disconnected { reason: String },
}

/// A conversation known to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Stable transport-level identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Whether the conversation is a group
    pub is_group: bool,
}

/// Media file handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMedia {
    /// Local file holding the full content
    pub path: PathBuf,
    /// MIME type of the content
    pub mime_type: String,
    /// File name shown to recipients
    pub file_name: String,
}

/// Messaging transport trait
///
/// # Event contract
///
/// `start` returns a channel of [`TransportEvent`]s. A transport that accepts
/// the restored material emits `Ready` without a `PairingChallenge`. Otherwise
/// it emits one or more challenges, then `Authenticated` and `Ready` once the
/// user pairs. Dropping the sender signals that the transport has stopped.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Start the transport, optionally resuming a persisted session
    async fn start(
        &self,
        restored: Option<SessionMaterial>,
    ) -> Result<mpsc::Receiver<TransportEvent>>;

    /// List conversations known to the session
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// Send a media file to a conversation
    async fn send_media(&self, destination: &str, media: &OutgoingMedia) -> Result<()>;
}
