//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for a server or desktop host.
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` (rustls, streaming downloads)
//! - `SecureStore` as one file per key (`FileSecureStore`) or a SQLite table
//!   reached through a connection string (`SqliteSecureStore`)
//! - `MessagingTransport` over an HTTP messaging gateway (`GatewayTransport`)
//! - `AuthorizationPrompt` / `PairingDisplay` on the terminal
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FileSecureStore, GatewayTransport, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! let http = Arc::new(ReqwestHttpClient::new()?);
//! let sessions = Arc::new(FileSecureStore::new(".session"));
//! let transport = Arc::new(GatewayTransport::new(http.clone(), "http://127.0.0.1:3000"));
//! ```

mod file_store;
mod http;
mod messaging;
mod sqlite_store;
mod terminal;

pub use file_store::FileSecureStore;
pub use http::ReqwestHttpClient;
pub use messaging::GatewayTransport;
pub use sqlite_store::SqliteSecureStore;
pub use terminal::{render_qr, TerminalPairingDisplay, TerminalPrompt};
