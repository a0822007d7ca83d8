//! # Event Bus System
//!
//! Typed events published by the credential, messaging session and delivery
//! modules over a `tokio::sync::broadcast` channel.
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐
//! │ CredentialStore  ├────────>│           │
//! └──────────────────┘         │           │  subscribe  ┌────────────┐
//! ┌──────────────────┐  emit   │ EventBus  ├────────────>│ Subscriber │
//! │ MessagingSession ├────────>│           │             └────────────┘
//! └──────────────────┘         │           │
//! ┌──────────────────┐  emit   │           │
//! │ DeliveryPipeline ├────────>│           │
//! └──────────────────┘         └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DeliveryEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(32);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Delivery(DeliveryEvent::RunStarted {
//!     run_id: "run-1".to_string(),
//! }))
//! .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Delivery(_)));
//! # }
//! ```
//!
//! Emitting with no subscribers returns `Err`; publishers ignore it with
//! `.ok()`. A slow subscriber sees `RecvError::Lagged(n)` and may keep
//! receiving; `RecvError::Closed` means every sender is gone.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 64;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Storage credential lifecycle
    Auth(AuthEvent),
    /// Messaging session lifecycle
    Session(SessionEvent),
    /// Daily delivery runs
    Delivery(DeliveryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Session(e) => e.description(),
            CoreEvent::Delivery(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::AuthError { .. }) => EventSeverity::Error,
            CoreEvent::Delivery(DeliveryEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Session(SessionEvent::Disconnected { .. }) => EventSeverity::Warning,
            CoreEvent::Session(SessionEvent::PairingRequested) => EventSeverity::Warning,
            CoreEvent::Delivery(DeliveryEvent::Skipped { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::Acquired { .. }) => EventSeverity::Info,
            CoreEvent::Session(SessionEvent::Ready) => EventSeverity::Info,
            CoreEvent::Delivery(DeliveryEvent::Delivered { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Storage provider credential events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A credential was obtained; `source` is `env`, `store` or `interactive`.
    Acquired { source: String },
    /// The operator has been asked to authorize in a browser.
    AuthorizationRequired,
    /// The access token was refreshed.
    TokenRefreshed {
        /// New expiry as a Unix timestamp in seconds.
        expires_at: i64,
    },
    /// Acquisition or refresh failed.
    AuthError { message: String },
}

impl AuthEvent {
    pub fn description(&self) -> &str {
        match self {
            AuthEvent::Acquired { .. } => "Storage credential acquired",
            AuthEvent::AuthorizationRequired => "Operator authorization required",
            AuthEvent::TokenRefreshed { .. } => "Access token refreshed",
            AuthEvent::AuthError { .. } => "Credential error",
        }
    }
}

// ============================================================================
// Session Events
// ============================================================================

/// Messaging session lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// A pairing challenge is waiting to be scanned.
    PairingRequested,
    /// The transport accepted the pairing or restored material.
    Authenticated,
    /// Session material was written to the durable store.
    MaterialSaved,
    /// The session can send messages.
    Ready,
    /// The transport dropped the session.
    Disconnected { reason: String },
}

impl SessionEvent {
    pub fn description(&self) -> &str {
        match self {
            SessionEvent::PairingRequested => "Messaging pairing requested",
            SessionEvent::Authenticated => "Messaging session authenticated",
            SessionEvent::MaterialSaved => "Messaging session saved",
            SessionEvent::Ready => "Messaging session ready",
            SessionEvent::Disconnected { .. } => "Messaging session disconnected",
        }
    }
}

// ============================================================================
// Delivery Events
// ============================================================================

/// Daily delivery run events. Every event carries the run correlation id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DeliveryEvent {
    RunStarted {
        run_id: String,
    },
    /// The run ended without sending (nothing pending, session not ready,
    /// or another run in progress).
    Skipped {
        run_id: String,
        reason: String,
    },
    Delivered {
        run_id: String,
        item_id: String,
        item_name: String,
    },
    Failed {
        run_id: String,
        stage: String,
        message: String,
    },
}

impl DeliveryEvent {
    pub fn description(&self) -> &str {
        match self {
            DeliveryEvent::RunStarted { .. } => "Delivery run started",
            DeliveryEvent::Skipped { .. } => "Delivery run skipped",
            DeliveryEvent::Delivered { .. } => "Image delivered",
            DeliveryEvent::Failed { .. } => "Delivery run failed",
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            DeliveryEvent::RunStarted { run_id }
            | DeliveryEvent::Skipped { run_id, .. }
            | DeliveryEvent::Delivered { run_id, .. }
            | DeliveryEvent::Failed { run_id, .. } => run_id,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s.
///
/// Cloning the bus clones the sender; all clones publish to the same
/// subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event; returns the number of subscribers reached.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Subscribes to future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let event = CoreEvent::Session(SessionEvent::Ready);
        assert_eq!(bus.emit(event.clone()).unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn test_emit_without_subscribers_errors() {
        let bus = EventBus::default();
        assert!(bus.emit(CoreEvent::Auth(AuthEvent::AuthorizationRequired)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(CoreEvent::Delivery(DeliveryEvent::RunStarted {
            run_id: "r1".to_string(),
        }))
        .unwrap();

        assert!(matches!(first.recv().await.unwrap(), CoreEvent::Delivery(_)));
        assert!(matches!(second.recv().await.unwrap(), CoreEvent::Delivery(_)));
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.emit(CoreEvent::Delivery(DeliveryEvent::RunStarted {
                run_id: format!("r{}", i),
            }))
            .unwrap();
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn test_severity() {
        let failed = CoreEvent::Delivery(DeliveryEvent::Failed {
            run_id: "r1".to_string(),
            stage: "send".to_string(),
            message: "timeout".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let disconnected = CoreEvent::Session(SessionEvent::Disconnected {
            reason: "logout".to_string(),
        });
        assert_eq!(disconnected.severity(), EventSeverity::Warning);

        let refreshed = CoreEvent::Auth(AuthEvent::TokenRefreshed { expires_at: 0 });
        assert_eq!(refreshed.severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_serialization_shape() {
        let event = CoreEvent::Delivery(DeliveryEvent::Delivered {
            run_id: "r1".to_string(),
            item_id: "f1".to_string(),
            item_name: "a.jpg".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Delivery");
        assert_eq!(json["payload"]["event"], "Delivered");
        assert_eq!(json["payload"]["item_id"], "f1");

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_run_id_accessor() {
        let event = DeliveryEvent::Skipped {
            run_id: "abc".to_string(),
            reason: "empty".to_string(),
        };
        assert_eq!(event.run_id(), "abc");
        assert_eq!(event.description(), "Delivery run skipped");
    }
}
