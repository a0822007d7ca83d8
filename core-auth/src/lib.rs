//! # Authentication Module
//!
//! Storage-provider credential management for the delivery daemon.
//!
//! ## Overview
//!
//! - OAuth 2.0 installed-app flow with PKCE and offline access
//! - Durable credential persistence through a `SecureStore`
//! - `CredentialStore`: env > store > interactive acquisition, in-memory
//!   cache, refresh inside a five minute expiry buffer
//! - `AccessTokenProvider`: the seam the storage connector uses to obtain
//!   bearer tokens

pub mod credential;
pub mod error;
pub mod oauth;
pub mod token_store;
pub mod types;

pub use credential::{AccessTokenProvider, CredentialStore, DEFAULT_MAX_CODE_ATTEMPTS};
pub use error::{AuthError, Result};
pub use oauth::{OAuthConfig, OAuthFlowManager, PkceVerifier, DRIVE_SCOPE};
pub use token_store::{decode_tokens, encode_tokens, TokenStore, DEFAULT_TOKEN_KEY};
pub use types::{CredentialOrigin, OAuthTokens, REFRESH_BUFFER_SECS};
