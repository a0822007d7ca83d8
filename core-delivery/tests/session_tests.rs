//! Messaging session lifecycle, persistence and destination resolution

mod common;

use bridge_traits::messaging::{Conversation, OutgoingMedia, SessionMaterial, TransportEvent};
use chrono::{TimeZone, Utc};
use common::{eventually, FakeTransport, MemoryStore, RecordingDisplay, GROUP_ID};
use core_delivery::{DeliveryError, MessagingSession, SessionState, SESSION_MATERIAL_KEY};
use core_runtime::config::Destination;
use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    transport: Arc<FakeTransport>,
    store: Arc<MemoryStore>,
    display: Arc<RecordingDisplay>,
    session: Arc<MessagingSession>,
}

fn harness(transport: FakeTransport) -> Harness {
    let transport = Arc::new(transport);
    let store = Arc::new(MemoryStore::new());
    let display = Arc::new(RecordingDisplay::default());
    let session = Arc::new(MessagingSession::new(
        transport.clone(),
        store.clone(),
        display.clone(),
    ));
    Harness {
        transport,
        store,
        display,
        session,
    }
}

fn material(blob: &[u8]) -> SessionMaterial {
    SessionMaterial {
        blob: blob.to_vec(),
        last_sync: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
    }
}

fn conversations() -> Vec<Conversation> {
    vec![
        Conversation {
            id: "direct@c.us".to_string(),
            name: "Daily Pictures".to_string(),
            is_group: false,
        },
        Conversation {
            id: GROUP_ID.to_string(),
            name: "Daily Pictures".to_string(),
            is_group: true,
        },
    ]
}

fn media() -> OutgoingMedia {
    OutgoingMedia {
        path: "/nonexistent/outgoing-image".into(),
        mime_type: "image/jpeg".to_string(),
        file_name: "a.jpg".to_string(),
    }
}

#[tokio::test]
async fn test_start_without_saved_session_enters_pairing_and_shows_challenge() {
    let h = harness(FakeTransport::new());

    h.session.start().await.unwrap();

    assert_eq!(*h.transport.restored.lock().unwrap(), Some(None));
    assert!(eventually(|| h.display.shown() == vec!["pair-code-1".to_string()]).await);
    assert_eq!(h.session.state(), SessionState::Pairing);
    assert!(!h.session.is_ready());
}

#[tokio::test]
async fn test_pairing_persists_material_and_becomes_ready() {
    let h = harness(FakeTransport::new());
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let session = Arc::new(
        MessagingSession::new(h.transport.clone(), h.store.clone(), h.display.clone())
            .with_event_bus(bus),
    );

    session.start().await.unwrap();
    h.transport
        .push(TransportEvent::Authenticated {
            material: material(b"paired-session"),
        })
        .await;
    h.transport.push(TransportEvent::Ready).await;

    tokio::time::timeout(Duration::from_secs(1), session.wait_ready())
        .await
        .unwrap();

    let saved = h.store.value(SESSION_MATERIAL_KEY).unwrap();
    let saved: SessionMaterial = serde_json::from_slice(&saved).unwrap();
    assert_eq!(saved, material(b"paired-session"));

    let mut seen = Vec::new();
    while let Ok(CoreEvent::Session(event)) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            SessionEvent::PairingRequested,
            SessionEvent::Authenticated,
            SessionEvent::MaterialSaved,
            SessionEvent::Ready,
        ]
    );
}

#[tokio::test]
async fn test_saved_session_is_restored_without_pairing() {
    let transport = FakeTransport::new();
    transport.accept_restored.store(true, Ordering::SeqCst);
    let h = harness(transport);
    h.store.insert(
        SESSION_MATERIAL_KEY,
        &serde_json::to_vec(&material(b"saved")).unwrap(),
    );

    h.session.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), h.session.wait_ready())
        .await
        .unwrap();

    assert_eq!(
        *h.transport.restored.lock().unwrap(),
        Some(Some(material(b"saved")))
    );
    assert!(h.display.shown().is_empty());
    assert_eq!(h.store.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unreadable_saved_session_falls_back_to_pairing_without_deleting() {
    let h = harness(FakeTransport::new());
    h.store.insert(SESSION_MATERIAL_KEY, b"not json");

    h.session.start().await.unwrap();

    assert_eq!(*h.transport.restored.lock().unwrap(), Some(None));
    assert_eq!(h.session.state(), SessionState::Pairing);
    assert_eq!(h.store.value(SESSION_MATERIAL_KEY).unwrap(), b"not json");
}

#[tokio::test]
async fn test_send_before_ready_is_refused() {
    let h = harness(FakeTransport::with_conversations(conversations()));

    let err = h
        .session
        .send(&Destination::GroupId(GROUP_ID.to_string()), &media())
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::SessionNotReady));
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn test_disconnect_blocks_sending_until_ready_again() {
    let h = harness(FakeTransport::new());
    h.session.handle_event(TransportEvent::Ready).await;
    assert!(h.session.is_ready());

    h.session
        .handle_event(TransportEvent::Disconnected {
            reason: "phone offline".to_string(),
        })
        .await;
    assert_eq!(h.session.state(), SessionState::Disconnected);

    let err = h
        .session
        .send(&Destination::GroupId(GROUP_ID.to_string()), &media())
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::SessionNotReady));

    h.session
        .handle_event(TransportEvent::PairingChallenge {
            code: "pair-code-2".to_string(),
        })
        .await;
    assert_eq!(h.session.state(), SessionState::Pairing);
    assert_eq!(h.display.shown(), vec!["pair-code-2".to_string()]);
}

#[tokio::test]
async fn test_transport_stop_marks_session_disconnected() {
    let h = harness(FakeTransport::new());
    h.session.start().await.unwrap();
    h.transport.push(TransportEvent::Ready).await;
    tokio::time::timeout(Duration::from_secs(1), h.session.wait_ready())
        .await
        .unwrap();

    h.transport.stop();
    assert!(eventually(|| h.session.state() == SessionState::Disconnected).await);
}

#[tokio::test]
async fn test_literal_destination_is_used_as_is() {
    let h = harness(FakeTransport::new());
    h.session.handle_event(TransportEvent::Ready).await;

    let id = h
        .session
        .resolve_destination(&Destination::GroupId("literal@g.us".to_string()))
        .await
        .unwrap();

    assert_eq!(id, "literal@g.us");
    assert_eq!(h.transport.conversation_lists.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_name_lookup_matches_groups_only_and_is_cached() {
    let h = harness(FakeTransport::with_conversations(conversations()));
    h.session.handle_event(TransportEvent::Ready).await;
    let destination = Destination::GroupName("Daily Pictures".to_string());

    assert_eq!(
        h.session.resolve_destination(&destination).await.unwrap(),
        GROUP_ID
    );
    assert_eq!(
        h.session.resolve_destination(&destination).await.unwrap(),
        GROUP_ID
    );
    assert_eq!(h.transport.conversation_lists.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_group_name_is_an_error() {
    let h = harness(FakeTransport::with_conversations(conversations()));
    h.session.handle_event(TransportEvent::Ready).await;

    let err = h
        .session
        .resolve_destination(&Destination::GroupName("Nobody".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::DestinationNotFound { ref name } if name == "Nobody"));
}
