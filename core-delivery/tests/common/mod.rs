//! In-memory collaborators shared by the delivery integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::ByteStream;
use bridge_traits::interactive::PairingDisplay;
use bridge_traits::messaging::{
    Conversation, MessagingTransport, OutgoingMedia, SessionMaterial, TransportEvent,
};
use bridge_traits::storage::{ListQuery, RemoteFile, SecureStore, StorageProvider};
use bridge_traits::time::Clock;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

pub const PENDING: &str = "pending-folder";
pub const DELIVERED: &str = "delivered-folder";
pub const GROUP_ID: &str = "120363000000@g.us";

/// Image created on 2024-03-01 at `hour`:00 UTC in `parents`
pub fn image(id: &str, hour: u32, parents: &[&str]) -> RemoteFile {
    RemoteFile {
        id: id.to_string(),
        name: format!("{}.jpg", id),
        mime_type: Some("image/jpeg".to_string()),
        size: Some(4),
        created_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()),
        parent_ids: parents.iter().map(|p| p.to_string()).collect(),
        trashed: false,
    }
}

/// Polls `condition` for up to a second
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// ============================================================================
// Storage provider
// ============================================================================

#[derive(Default)]
pub struct FakeDrive {
    files: Mutex<Vec<RemoteFile>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_list: AtomicBool,
    pub fail_download: AtomicBool,
    pub fail_update: AtomicBool,
    /// Accept updates but leave parents unchanged
    pub ignore_update: AtomicBool,
    pub lists: AtomicUsize,
    pub downloads: AtomicUsize,
    pub updates: AtomicUsize,
}

impl FakeDrive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, file: RemoteFile, content: &[u8]) {
        self.contents
            .lock()
            .unwrap()
            .insert(file.id.clone(), content.to_vec());
        self.files.lock().unwrap().push(file);
    }

    pub fn parents_of(&self, id: &str) -> Vec<String> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.id == id)
            .map(|f| f.parent_ids.clone())
            .unwrap_or_default()
    }

    fn unavailable() -> BridgeError {
        BridgeError::Remote {
            status: 503,
            message: "backend error".to_string(),
        }
    }
}

#[async_trait]
impl StorageProvider for FakeDrive {
    async fn list_children(&self, query: &ListQuery) -> Result<Vec<RemoteFile>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }

        let mut files: Vec<RemoteFile> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.is_in(&query.parent_id) && !f.trashed)
            .filter(|f| {
                query
                    .mime_prefix
                    .as_deref()
                    .map(|p| f.has_mime_prefix(p))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        files.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        files.truncate(query.limit as usize);
        Ok(files)
    }

    async fn get_parents(&self, file_id: &str) -> Result<Vec<String>> {
        let files = self.files.lock().unwrap();
        files
            .iter()
            .find(|f| f.id == file_id)
            .map(|f| f.parent_ids.clone())
            .ok_or_else(|| BridgeError::Remote {
                status: 404,
                message: file_id.to_string(),
            })
    }

    async fn update_parents(
        &self,
        file_id: &str,
        add_parents: &[String],
        remove_parents: &[String],
    ) -> Result<Vec<String>> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }

        let mut files = self.files.lock().unwrap();
        let file = files
            .iter_mut()
            .find(|f| f.id == file_id)
            .ok_or_else(|| BridgeError::Remote {
                status: 404,
                message: file_id.to_string(),
            })?;

        if !self.ignore_update.load(Ordering::SeqCst) {
            file.parent_ids.retain(|p| !remove_parents.contains(p));
            for parent in add_parents {
                if !file.parent_ids.contains(parent) {
                    file.parent_ids.push(parent.clone());
                }
            }
        }
        Ok(file.parent_ids.clone())
    }

    async fn open_content(&self, file_id: &str) -> Result<ByteStream> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }

        let content = self
            .contents
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| BridgeError::Remote {
                status: 404,
                message: file_id.to_string(),
            })?;
        Ok(Box::new(std::io::Cursor::new(content)))
    }
}

// ============================================================================
// Messaging transport
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMedia {
    pub destination: String,
    pub file_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

#[derive(Default)]
pub struct FakeTransport {
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    pub restored: Mutex<Option<Option<SessionMaterial>>>,
    /// Answer restored material with `Ready` instead of a challenge
    pub accept_restored: AtomicBool,
    pub conversations: Mutex<Vec<Conversation>>,
    pub conversation_lists: AtomicUsize,
    pub sent: Mutex<Vec<SentMedia>>,
    pub fail_send: AtomicBool,
    /// When set, `send_media` waits for a notification before sending
    pub send_gate: Mutex<Option<std::sync::Arc<Notify>>>,
    pub send_started: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversations(conversations: Vec<Conversation>) -> Self {
        let transport = Self::default();
        *transport.conversations.lock().unwrap() = conversations;
        transport
    }

    /// Push an event as if the transport produced it
    pub async fn push(&self, event: TransportEvent) {
        let sender = self.events.lock().unwrap().clone();
        if let Some(sender) = sender {
            sender.send(event).await.unwrap();
        }
    }

    /// Drop the event sender, ending the event stream
    pub fn stop(&self) {
        self.events.lock().unwrap().take();
    }

    pub fn sent(&self) -> Vec<SentMedia> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingTransport for FakeTransport {
    async fn start(
        &self,
        restored: Option<SessionMaterial>,
    ) -> Result<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(16);
        let resume = restored.is_some() && self.accept_restored.load(Ordering::SeqCst);
        *self.restored.lock().unwrap() = Some(restored);

        if resume {
            tx.send(TransportEvent::Ready).await.unwrap();
        } else {
            tx.send(TransportEvent::PairingChallenge {
                code: "pair-code-1".to_string(),
            })
            .await
            .unwrap();
        }

        *self.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.conversation_lists.fetch_add(1, Ordering::SeqCst);
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn send_media(&self, destination: &str, media: &OutgoingMedia) -> Result<()> {
        self.send_started.store(true, Ordering::SeqCst);
        let gate = self.send_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail_send.load(Ordering::SeqCst) {
            return Err(BridgeError::Remote {
                status: 500,
                message: "browser crashed".to_string(),
            });
        }

        let content = tokio::fs::read(&media.path).await?;
        self.sent.lock().unwrap().push(SentMedia {
            destination: destination.to_string(),
            file_name: media.file_name.clone(),
            mime_type: media.mime_type.clone(),
            content,
        });
        Ok(())
    }
}

// ============================================================================
// Durable store and display
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
    pub writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: &[u8]) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert(key, value);
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.value(key))
    }
}

#[derive(Default)]
pub struct RecordingDisplay {
    pub challenges: Mutex<Vec<String>>,
}

impl RecordingDisplay {
    pub fn shown(&self) -> Vec<String> {
        self.challenges.lock().unwrap().clone()
    }
}

impl PairingDisplay for RecordingDisplay {
    fn show_challenge(&self, code: &str) -> Result<()> {
        self.challenges.lock().unwrap().push(code.to_string());
        Ok(())
    }
}

/// Wall clock that walks through preset readings and then stays on the last
pub struct ScriptedClock {
    readings: Mutex<VecDeque<DateTime<Utc>>>,
}

impl ScriptedClock {
    pub fn new(readings: Vec<DateTime<Utc>>) -> Self {
        Self {
            readings: Mutex::new(readings.into()),
        }
    }
}

impl Clock for ScriptedClock {
    fn now(&self) -> DateTime<Utc> {
        let mut readings = self.readings.lock().unwrap();
        if readings.len() > 1 {
            readings.pop_front().unwrap()
        } else {
            *readings.front().unwrap()
        }
    }
}
