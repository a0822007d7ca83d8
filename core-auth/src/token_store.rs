//! Durable Token Storage
//!
//! Persists the storage-provider credential through a [`SecureStore`] under a
//! single key. The on-disk document uses the Google client-library layout
//! (`expiry_date` in epoch milliseconds) so a token file written by other
//! Google tooling can be reused, and the native layout (`expires_at` in epoch
//! seconds) is accepted on read.
//!
//! Stored credentials are never deleted by this module, including when they
//! fail to parse.
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{OAuthTokens, TokenStore};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let token_store = TokenStore::new(secure_store, "token.json");
//!
//! let tokens = OAuthTokens::new("access".to_string(), Some("refresh".to_string()), 3600);
//! token_store.save(&tokens).await?;
//!
//! let restored = token_store.load().await?;
//! assert!(restored.is_some());
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::OAuthTokens;
use bridge_traits::storage::SecureStore;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_TOKEN_KEY: &str = "token.json";

/// Serialized credential document.
#[derive(Debug, Serialize, Deserialize)]
struct TokenDocument {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    /// Epoch milliseconds (Google client-library layout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry_date: Option<i64>,
    /// Epoch seconds (native layout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_type: Option<String>,
}

/// Decode a credential document in either supported layout.
///
/// A document with no expiry is treated as already expired so the first use
/// refreshes it.
pub fn decode_tokens(data: &[u8]) -> std::result::Result<OAuthTokens, serde_json::Error> {
    let doc: TokenDocument = serde_json::from_slice(data)?;

    let expires_at = doc
        .expires_at
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .or_else(|| {
            doc.expiry_date
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        })
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    Ok(OAuthTokens::from_parts(
        doc.access_token,
        doc.refresh_token,
        expires_at,
    ))
}

/// Encode a credential in the Google client-library layout.
pub fn encode_tokens(tokens: &OAuthTokens, scope: Option<&str>) -> serde_json::Result<Vec<u8>> {
    let doc = TokenDocument {
        access_token: tokens.access_token().to_string(),
        refresh_token: tokens.refresh_token().map(str::to_string),
        expiry_date: Some(tokens.expires_at().timestamp_millis()),
        expires_at: None,
        scope: scope.map(str::to_string),
        token_type: Some("Bearer".to_string()),
    };
    serde_json::to_vec_pretty(&doc)
}

/// Credential persistence over a [`SecureStore`].
#[derive(Clone)]
pub struct TokenStore {
    secure_store: Arc<dyn SecureStore>,
    key: String,
    scope: Option<String>,
}

impl TokenStore {
    pub fn new(secure_store: Arc<dyn SecureStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        debug!(key = %key, "Initializing TokenStore");
        Self {
            secure_store,
            key,
            scope: None,
        }
    }

    /// Record the granted scope alongside saved tokens
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Persist `tokens`, overwriting any previous credential.
    pub async fn save(&self, tokens: &OAuthTokens) -> Result<()> {
        let json = encode_tokens(tokens, self.scope.as_deref())
            .map_err(|e| AuthError::Other(format!("Failed to serialize tokens: {}", e)))?;

        self.secure_store
            .set_secret(&self.key, &json)
            .await
            .map_err(|e| {
                warn!(key = %self.key, error = %e, "Failed to persist credential");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(
            key = %self.key,
            has_refresh_token = tokens.refresh_token().is_some(),
            "Credential persisted"
        );

        Ok(())
    }

    /// Load the persisted credential.
    ///
    /// Returns `Ok(None)` when nothing is stored and
    /// [`AuthError::TokenCorrupted`] when the stored bytes do not parse.
    pub async fn load(&self) -> Result<Option<OAuthTokens>> {
        let data = self.secure_store.get_secret(&self.key).await.map_err(|e| {
            warn!(key = %self.key, error = %e, "Failed to read credential");
            AuthError::SecureStorageUnavailable(e.to_string())
        })?;

        let Some(data) = data else {
            debug!(key = %self.key, "No persisted credential");
            return Ok(None);
        };

        let tokens = decode_tokens(&data).map_err(|e| {
            warn!(key = %self.key, error = %e, "Persisted credential does not parse");
            AuthError::TokenCorrupted {
                key: self.key.clone(),
                reason: e.to_string(),
            }
        })?;

        info!(
            key = %self.key,
            has_refresh_token = tokens.refresh_token().is_some(),
            expires_at = %tokens.expires_at(),
            "Persisted credential loaded"
        );

        Ok(Some(tokens))
    }
}
