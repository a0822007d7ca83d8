//! # Messaging Session
//!
//! Wraps a [`MessagingTransport`] with a small state machine:
//!
//! ```text
//! Unauthenticated ──► Pairing ──► Ready ──► Disconnected ──► Pairing ...
//!        └──────────(restored material accepted)──┘
//! ```
//!
//! The session is the only writer of the persisted session material. Sending
//! is refused until the transport has reported `Ready`.

use crate::error::{DeliveryError, Result};
use bridge_traits::interactive::PairingDisplay;
use bridge_traits::messaging::{MessagingTransport, OutgoingMedia, SessionMaterial, TransportEvent};
use bridge_traits::storage::SecureStore;
use core_runtime::config::Destination;
use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Durable store key holding the serialized [`SessionMaterial`]
pub const SESSION_MATERIAL_KEY: &str = "messaging_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Pairing,
    Ready,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Pairing => "pairing",
            SessionState::Ready => "ready",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

pub struct MessagingSession {
    transport: Arc<dyn MessagingTransport>,
    store: Arc<dyn SecureStore>,
    display: Arc<dyn PairingDisplay>,
    event_bus: Option<EventBus>,
    state: watch::Sender<SessionState>,
    resolved_destination: Mutex<Option<(Destination, String)>>,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MessagingSession {
    pub fn new(
        transport: Arc<dyn MessagingTransport>,
        store: Arc<dyn SecureStore>,
        display: Arc<dyn PairingDisplay>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            transport,
            store,
            display,
            event_bus: None,
            state,
            resolved_destination: Mutex::new(None),
            listener: std::sync::Mutex::new(None),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Wait until the transport reports `Ready`
    pub async fn wait_ready(&self) {
        let mut rx = self.subscribe_state();
        // The sender lives in `self`, so the channel cannot close here
        if rx.wait_for(|s| *s == SessionState::Ready).await.is_err() {
            warn!("Session state channel closed while waiting for ready");
        }
    }

    /// Restore persisted material, start the transport and follow its events
    /// in a background task
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let restored = self.load_material().await?;
        if restored.is_none() {
            self.transition(SessionState::Pairing);
        }

        let events = self
            .transport
            .start(restored)
            .await
            .map_err(DeliveryError::Transport)?;

        let session = Arc::clone(self);
        let handle = tokio::spawn(async move { session.follow(events).await });

        let previous = match self.listener.lock() {
            Ok(mut guard) => guard.replace(handle),
            Err(poisoned) => poisoned.into_inner().replace(handle),
        };
        if let Some(previous) = previous {
            previous.abort();
        }

        Ok(())
    }

    async fn follow(&self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }

        if self.state() != SessionState::Disconnected {
            self.transition(SessionState::Disconnected);
            self.emit(SessionEvent::Disconnected {
                reason: "transport stopped".to_string(),
            });
        }
        debug!("Transport event stream ended");
    }

    /// Apply one transport event
    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::PairingChallenge { code } => {
                self.transition(SessionState::Pairing);
                if let Err(e) = self.display.show_challenge(&code) {
                    warn!(error = %e, "Could not display pairing challenge");
                }
                self.emit(SessionEvent::PairingRequested);
            }
            TransportEvent::Authenticated { material } => {
                self.emit(SessionEvent::Authenticated);
                match self.save_material(&material).await {
                    Ok(()) => self.emit(SessionEvent::MaterialSaved),
                    Err(e) => error!(error = %e, "Failed to persist session material"),
                }
            }
            TransportEvent::Ready => {
                self.transition(SessionState::Ready);
                self.emit(SessionEvent::Ready);
            }
            TransportEvent::Disconnected { reason } => {
                warn!(reason = %reason, "Messaging session disconnected");
                self.transition(SessionState::Disconnected);
                self.emit(SessionEvent::Disconnected { reason });
            }
        }
    }

    /// Conversation id for `destination`
    ///
    /// A literal id is returned as-is. A name is matched once against the
    /// session's group conversations and the result cached.
    pub async fn resolve_destination(&self, destination: &Destination) -> Result<String> {
        let name = match destination {
            Destination::GroupId(id) => return Ok(id.clone()),
            Destination::GroupName(name) => name,
        };

        let mut cached = self.resolved_destination.lock().await;
        if let Some((for_destination, id)) = cached.as_ref() {
            if for_destination == destination {
                return Ok(id.clone());
            }
        }

        if !self.is_ready() {
            return Err(DeliveryError::SessionNotReady);
        }

        let conversations = self
            .transport
            .list_conversations()
            .await
            .map_err(DeliveryError::Transport)?;

        let id = conversations
            .into_iter()
            .find(|c| c.is_group && c.name == *name)
            .map(|c| c.id)
            .ok_or_else(|| DeliveryError::DestinationNotFound { name: name.clone() })?;

        info!(group = %name, "Resolved destination group");
        *cached = Some((destination.clone(), id.clone()));
        Ok(id)
    }

    /// Send `media` to `destination`; refused unless the session is ready
    #[instrument(skip(self, destination, media), fields(destination = destination.kind()))]
    pub async fn send(&self, destination: &Destination, media: &OutgoingMedia) -> Result<()> {
        if !self.is_ready() {
            return Err(DeliveryError::SessionNotReady);
        }

        let id = self.resolve_destination(destination).await?;
        self.transport
            .send_media(&id, media)
            .await
            .map_err(DeliveryError::SendFailed)?;

        info!(file_name = %media.file_name, "Media sent");
        Ok(())
    }

    async fn load_material(&self) -> Result<Option<SessionMaterial>> {
        let raw = self
            .store
            .get_secret(SESSION_MATERIAL_KEY)
            .await
            .map_err(DeliveryError::SessionStore)?;

        let Some(raw) = raw else {
            info!("No saved messaging session, pairing required");
            return Ok(None);
        };

        match serde_json::from_slice::<SessionMaterial>(&raw) {
            Ok(material) => {
                info!(last_sync = %material.last_sync, "Restoring saved messaging session");
                Ok(Some(material))
            }
            Err(e) => {
                // Left in place; the next Authenticated event overwrites it
                warn!(error = %e, "Saved messaging session is unreadable, pairing again");
                Ok(None)
            }
        }
    }

    async fn save_material(&self, material: &SessionMaterial) -> Result<()> {
        let raw = serde_json::to_vec(material).map_err(|e| {
            DeliveryError::SessionStore(bridge_traits::error::BridgeError::OperationFailed(
                e.to_string(),
            ))
        })?;
        self.store
            .set_secret(SESSION_MATERIAL_KEY, &raw)
            .await
            .map_err(DeliveryError::SessionStore)?;
        debug!(bytes = raw.len(), "Session material saved");
        Ok(())
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Session state changed");
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Session(event)).ok();
        }
    }
}
