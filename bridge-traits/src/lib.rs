//! # Host Bridge Traits
//!
//! Capability traits the delivery core depends on, implemented by host
//! adapters (see `bridge-desktop`) or by test doubles.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with retry and streaming
//!
//! ### Storage
//! - [`SecureStore`](storage::SecureStore) - Durable credential/session persistence
//! - [`StorageProvider`](storage::StorageProvider) - Cloud folder listing, content and parent updates
//!
//! ### Messaging
//! - [`MessagingTransport`](messaging::MessagingTransport) - Session lifecycle events and media sending
//!
//! ### Operator interaction
//! - [`AuthorizationPrompt`](interactive::AuthorizationPrompt) - One-time OAuth code entry
//! - [`PairingDisplay`](interactive::PairingDisplay) - Messaging pairing challenge output
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert platform errors into it with actionable messages and must
//! never include secrets in them.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! across async tasks behind `Arc<dyn Trait>`.

pub mod error;
pub mod http;
pub mod interactive;
pub mod messaging;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use interactive::{AuthorizationPrompt, PairingDisplay};
pub use messaging::{Conversation, MessagingTransport, OutgoingMedia, SessionMaterial, TransportEvent};
pub use storage::{ListQuery, RemoteFile, SecureStore, StorageProvider};
pub use time::{Clock, FixedClock, LogLevel, SystemClock};
