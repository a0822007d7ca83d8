//! # Credential Store
//!
//! Owns the storage-provider credential for the lifetime of the process.
//!
//! ## Acquisition order
//!
//! 1. Injected environment credential (read-only)
//! 2. Credential persisted in the durable store
//! 3. Interactive bootstrap: show the authorization URL, wait for the
//!    one-time code, exchange it, persist the result exactly once
//!
//! The first successful acquisition is cached; later calls are served from
//! memory. In a headless context with neither (1) nor (2) available,
//! acquisition fails with [`AuthError::CredentialUnavailable`] without
//! writing anything.
//!
//! ## Token injection
//!
//! The storage client never sees the credential directly. It asks for a
//! bearer token through [`AccessTokenProvider`], which refreshes the
//! credential inside the expiry buffer and writes the refreshed credential
//! back unless it came from the environment.

use crate::error::{AuthError, Result};
use crate::oauth::OAuthFlowManager;
use crate::token_store::{decode_tokens, TokenStore};
use crate::types::{CredentialOrigin, OAuthTokens};
use async_trait::async_trait;
use bridge_traits::interactive::AuthorizationPrompt;
use bridge_traits::time::{Clock, SystemClock};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_MAX_CODE_ATTEMPTS: u32 = 3;

/// Source of bearer tokens for authenticated API calls.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// A currently valid access token
    async fn access_token(&self) -> Result<String>;
}

#[derive(Clone)]
struct CachedCredential {
    tokens: OAuthTokens,
    origin: CredentialOrigin,
}

/// Load-or-bootstrap credential manager.
pub struct CredentialStore {
    flow: OAuthFlowManager,
    token_store: TokenStore,
    prompt: Arc<dyn AuthorizationPrompt>,
    env_credential: Option<String>,
    max_code_attempts: u32,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    cached: Mutex<Option<CachedCredential>>,
}

impl CredentialStore {
    pub fn new(
        flow: OAuthFlowManager,
        token_store: TokenStore,
        prompt: Arc<dyn AuthorizationPrompt>,
    ) -> Self {
        Self {
            flow,
            token_store,
            prompt,
            env_credential: None,
            max_code_attempts: DEFAULT_MAX_CODE_ATTEMPTS,
            clock: Arc::new(SystemClock),
            event_bus: None,
            cached: Mutex::new(None),
        }
    }

    /// Credential JSON injected through the environment
    pub fn with_env_credential(mut self, json: Option<String>) -> Self {
        self.env_credential = json;
        self
    }

    /// Bound on code prompts during the interactive bootstrap (minimum 1)
    pub fn with_max_code_attempts(mut self, attempts: u32) -> Self {
        self.max_code_attempts = attempts.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Produce a credential, bootstrapping interactively if needed.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<OAuthTokens> {
        let mut cached = self.cached.lock().await;
        self.ensure_loaded(&mut cached).await.map(|c| c.tokens.clone())
    }

    /// Origin of the cached credential, if one has been acquired
    pub async fn origin(&self) -> Option<CredentialOrigin> {
        self.cached.lock().await.as_ref().map(|c| c.origin)
    }

    async fn ensure_loaded<'a>(
        &self,
        cached: &'a mut Option<CachedCredential>,
    ) -> Result<&'a CachedCredential> {
        if cached.is_none() {
            let loaded = match self.load_existing().await {
                Ok(Some(found)) => found,
                Ok(None) => self.bootstrap().await?,
                Err(e) => {
                    self.emit(AuthEvent::AuthError {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            };

            info!(source = %loaded.origin, "Storage credential acquired");
            self.emit(AuthEvent::Acquired {
                source: loaded.origin.as_str().to_string(),
            });
            *cached = Some(loaded);
        }

        cached
            .as_ref()
            .ok_or_else(|| AuthError::Other("credential cache empty after load".to_string()))
    }

    async fn load_existing(&self) -> Result<Option<CachedCredential>> {
        if let Some(json) = &self.env_credential {
            let tokens = decode_tokens(json.as_bytes()).map_err(|e| {
                AuthError::CredentialUnavailable(format!(
                    "injected credential is not valid token JSON: {}",
                    e
                ))
            })?;
            debug!("Using injected credential");
            return Ok(Some(CachedCredential {
                tokens,
                origin: CredentialOrigin::Env,
            }));
        }

        Ok(self
            .token_store
            .load()
            .await?
            .map(|tokens| CachedCredential {
                tokens,
                origin: CredentialOrigin::Store,
            }))
    }

    async fn bootstrap(&self) -> Result<CachedCredential> {
        if !self.prompt.is_interactive() {
            let err = AuthError::CredentialUnavailable(format!(
                "no injected or persisted credential (looked for '{}') and no operator to authorize",
                self.token_store.key()
            ));
            error!(error = %err, "Cannot bootstrap storage credential in headless mode");
            self.emit(AuthEvent::AuthError {
                message: err.to_string(),
            });
            return Err(err);
        }

        let mut last_error = None;
        for attempt in 1..=self.max_code_attempts {
            let (auth_url, verifier) = self.flow.build_auth_url()?;
            self.emit(AuthEvent::AuthorizationRequired);

            let code = self
                .prompt
                .request_code(&auth_url)
                .await
                .map_err(|e| AuthError::PromptFailed(e.to_string()))?;
            let code = code.trim();

            if code.is_empty() {
                warn!(attempt, "Empty authorization code entered");
                last_error = Some(AuthError::AuthExchangeFailed(
                    "empty authorization code".to_string(),
                ));
                continue;
            }

            match self.flow.exchange_code(code, &verifier).await {
                Ok(tokens) => {
                    self.token_store.save(&tokens).await?;
                    return Ok(CachedCredential {
                        tokens,
                        origin: CredentialOrigin::Interactive,
                    });
                }
                Err(e @ AuthError::AuthExchangeFailed(_)) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_code_attempts,
                        error = %e,
                        "Authorization code rejected"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let err = last_error.unwrap_or_else(|| {
            AuthError::AuthExchangeFailed("no authorization attempts made".to_string())
        });
        self.emit(AuthEvent::AuthError {
            message: err.to_string(),
        });
        Err(err)
    }

    fn emit(&self, event: AuthEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Auth(event)).ok();
        }
    }
}

#[async_trait]
impl AccessTokenProvider for CredentialStore {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let current = self.ensure_loaded(&mut cached).await?.clone();

        if !current.tokens.is_expired_at(self.clock.now()) {
            return Ok(current.tokens.access_token().to_string());
        }

        let refresh_token = current.tokens.refresh_token().ok_or_else(|| {
            AuthError::TokenRefreshFailed(
                "access token expired and no refresh token is available".to_string(),
            )
        })?;

        debug!(source = %current.origin, "Access token inside expiry buffer, refreshing");
        let refreshed = match self.flow.refresh_access_token(refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                self.emit(AuthEvent::AuthError {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        if current.origin.is_persistent() {
            self.token_store.save(&refreshed).await?;
        }

        self.emit(AuthEvent::TokenRefreshed {
            expires_at: refreshed.expires_at().timestamp(),
        });

        let access_token = refreshed.access_token().to_string();
        *cached = Some(CachedCredential {
            tokens: refreshed,
            origin: current.origin,
        });
        Ok(access_token)
    }
}
