//! Messaging transport backed by an HTTP gateway sidecar
//!
//! The gateway owns the actual messaging client (a headless browser session)
//! and exposes a small JSON API:
//!
//! | Call | Purpose |
//! |---|---|
//! | `POST /session` `{"session": <base64 or null>}` | start, optionally resuming |
//! | `GET /session` | `{"state", "qr"?, "session"?, "reason"?}` |
//! | `GET /chats` | `[{"id", "name", "isGroup"}]` |
//! | `POST /messages/media` `{"chatId", "mimeType", "fileName", "data"}` | send a file (base64) |
//!
//! `GatewayTransport` polls `GET /session` and turns state changes into
//! [`TransportEvent`]s.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy},
    messaging::{Conversation, MessagingTransport, OutgoingMedia, SessionMaterial, TransportEvent},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SEND_TIMEOUT: Duration = Duration::from_secs(120);
const EVENT_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum GatewayState {
    Starting,
    Pairing,
    Authenticated,
    Ready,
    Disconnected,
}

#[derive(Debug, Deserialize)]
struct SessionStatus {
    state: GatewayState,
    #[serde(default)]
    qr: Option<String>,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayChat {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_group: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaMessage<'a> {
    chat_id: &'a str,
    mime_type: &'a str,
    file_name: &'a str,
    data: String,
}

/// Turns successive status snapshots into transport events
#[derive(Debug, Default)]
struct StatusTracker {
    last_qr: Option<String>,
    last_session: Option<String>,
    ready: bool,
    disconnected: bool,
}

impl StatusTracker {
    fn observe(&mut self, status: SessionStatus) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        if let Some(session) = status.session {
            if self.last_session.as_deref() != Some(session.as_str()) {
                match STANDARD.decode(&session) {
                    Ok(blob) => events.push(TransportEvent::Authenticated {
                        material: SessionMaterial {
                            blob,
                            last_sync: Utc::now(),
                        },
                    }),
                    Err(e) => warn!(error = %e, "Gateway reported undecodable session material"),
                }
                self.last_session = Some(session);
            }
        }

        match status.state {
            GatewayState::Starting | GatewayState::Authenticated => {}
            GatewayState::Pairing => {
                self.ready = false;
                if let Some(qr) = status.qr {
                    if self.last_qr.as_deref() != Some(qr.as_str()) {
                        events.push(TransportEvent::PairingChallenge { code: qr.clone() });
                        self.last_qr = Some(qr);
                    }
                }
            }
            GatewayState::Ready => {
                self.disconnected = false;
                if !self.ready {
                    self.ready = true;
                    self.last_qr = None;
                    events.push(TransportEvent::Ready);
                }
            }
            GatewayState::Disconnected => {
                if let Some(event) =
                    self.lost(status.reason.unwrap_or_else(|| "gateway disconnected".to_string()))
                {
                    events.push(event);
                }
            }
        }

        events
    }

    /// Record a connection loss; reported once per outage
    fn lost(&mut self, reason: String) -> Option<TransportEvent> {
        self.ready = false;
        if self.disconnected {
            return None;
        }
        self.disconnected = true;
        Some(TransportEvent::Disconnected { reason })
    }
}

/// [`MessagingTransport`] driving an HTTP messaging gateway
pub struct GatewayTransport {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    poll_interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl GatewayTransport {
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poller: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn call(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.http_client.execute(request).await?;
        Self::check(response)
    }

    fn check(response: HttpResponse) -> Result<HttpResponse> {
        if !response.is_success() {
            return Err(BridgeError::Remote {
                status: response.status,
                message: response.text().unwrap_or_default(),
            });
        }
        Ok(response)
    }

    fn replace_poller(&self, handle: JoinHandle<()>) {
        let previous = match self.poller.lock() {
            Ok(mut guard) => guard.replace(handle),
            Err(poisoned) => poisoned.into_inner().replace(handle),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

async fn poll_status(
    http_client: Arc<dyn HttpClient>,
    status_url: String,
    interval: Duration,
    tx: mpsc::Sender<TransportEvent>,
) {
    let mut tracker = StatusTracker::default();

    while !tx.is_closed() {
        let request = HttpRequest::new(HttpMethod::Get, status_url.clone())
            .header("Accept", "application/json");

        let events = match http_client.execute(request).await {
            Ok(response) if response.is_success() => match response.json::<SessionStatus>() {
                Ok(status) => tracker.observe(status),
                Err(e) => {
                    warn!(error = %e, "Unreadable gateway status");
                    Vec::new()
                }
            },
            Ok(response) => tracker
                .lost(format!("gateway status returned {}", response.status))
                .into_iter()
                .collect(),
            Err(e) => tracker
                .lost(format!("gateway unreachable: {}", e))
                .into_iter()
                .collect(),
        };

        for event in events {
            debug!(event = event_name(&event), "Gateway event");
            if tx.send(event).await.is_err() {
                return;
            }
        }

        tokio::time::sleep(interval).await;
    }

    debug!("Gateway status poller stopped");
}

fn event_name(event: &TransportEvent) -> &'static str {
    match event {
        TransportEvent::PairingChallenge { .. } => "pairing_challenge",
        TransportEvent::Authenticated { .. } => "authenticated",
        TransportEvent::Ready => "ready",
        TransportEvent::Disconnected { .. } => "disconnected",
    }
}

#[async_trait]
impl MessagingTransport for GatewayTransport {
    async fn start(
        &self,
        restored: Option<SessionMaterial>,
    ) -> Result<mpsc::Receiver<TransportEvent>> {
        let session = restored.as_ref().map(|m| STANDARD.encode(&m.blob));
        info!(
            resuming = session.is_some(),
            gateway = %self.base_url,
            "Starting messaging gateway session"
        );

        let request = HttpRequest::new(HttpMethod::Post, self.url("/session"))
            .json(&serde_json::json!({ "session": session }))?;
        self.call(request).await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let handle = tokio::spawn(poll_status(
            Arc::clone(&self.http_client),
            self.url("/session"),
            self.poll_interval,
            tx,
        ));
        self.replace_poller(handle);

        Ok(rx)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let request =
            HttpRequest::new(HttpMethod::Get, self.url("/chats")).header("Accept", "application/json");
        let chats: Vec<GatewayChat> = self.call(request).await?.json()?;

        Ok(chats
            .into_iter()
            .map(|chat| Conversation {
                id: chat.id,
                name: chat.name,
                is_group: chat.is_group,
            })
            .collect())
    }

    async fn send_media(&self, destination: &str, media: &OutgoingMedia) -> Result<()> {
        let content = tokio::fs::read(&media.path).await?;
        debug!(bytes = content.len(), mime = %media.mime_type, "Uploading media to gateway");

        let message = MediaMessage {
            chat_id: destination,
            mime_type: &media.mime_type,
            file_name: &media.file_name,
            data: STANDARD.encode(&content),
        };
        let request = HttpRequest::new(HttpMethod::Post, self.url("/messages/media"))
            .json(&message)?
            .timeout(SEND_TIMEOUT);

        // A timed-out upload may still have been delivered; one attempt only
        let response = self
            .http_client
            .execute_with_retry(request, RetryPolicy::none())
            .await?;
        Self::check(response)?;
        Ok(())
    }
}

impl Drop for GatewayTransport {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.poller.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
