//! OAuth 2.0 Authorization Flow with PKCE
//!
//! Implements the installed-application flow (RFC 6749 + RFC 7636) used to
//! authorize the daemon against the storage provider once:
//! - Build an authorization URL carrying a PKCE challenge
//! - Exchange the one-time code pasted back by the operator
//! - Refresh access tokens with a bounded retry on server errors
//!
//! The code comes back by hand rather than through a redirect listener, so
//! there is no callback `state` to compare; the `state` parameter is still
//! sent for providers that require it.
//!
//! Tokens, codes and verifiers are never logged.
//!
//! # Example
//!
//! ```no_run
//! use core_auth::oauth::{OAuthConfig, OAuthFlowManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> core_auth::Result<()> {
//! # use bridge_traits::http::HttpClient;
//! # let http_client: Arc<dyn HttpClient> = todo!();
//! let config = OAuthConfig::google_drive(
//!     "client-id".to_string(),
//!     Some("client-secret".to_string()),
//!     "urn:ietf:wg:oauth:2.0:oob".to_string(),
//! );
//!
//! let flow = OAuthFlowManager::new(config, http_client);
//! let (auth_url, verifier) = flow.build_auth_url()?;
//! println!("Open {}", auth_url);
//! let tokens = flow.exchange_code("4/0Ab...", &verifier).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::OAuthTokens;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};
use url::Url;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Full Drive scope; moving files between folders needs write access to
/// files the app did not create.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

const MAX_REFRESH_ATTEMPTS: u32 = 3;

/// OAuth 2.0 client configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    /// Optional for public clients
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub auth_url: String,
    pub token_url: String,
}

impl OAuthConfig {
    /// Google endpoints with the full Drive scope
    pub fn google_drive(
        client_id: String,
        client_secret: Option<String>,
        redirect_uri: String,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            scopes: vec![DRIVE_SCOPE.to_string()],
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// PKCE (Proof Key for Code Exchange) verifier.
///
/// The verifier stays local; only its S256 challenge goes into the
/// authorization URL.
#[derive(Clone)]
pub struct PkceVerifier {
    verifier: String,
    state: String,
}

impl PkceVerifier {
    /// Fresh random verifier (32 bytes) and state (16 bytes), base64url
    /// without padding.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();

        let mut verifier_bytes = [0u8; 32];
        rng.fill(&mut verifier_bytes);

        let mut state_bytes = [0u8; 16];
        rng.fill(&mut state_bytes);

        Self {
            verifier: URL_SAFE_NO_PAD.encode(verifier_bytes),
            state: URL_SAFE_NO_PAD.encode(state_bytes),
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// BASE64URL(SHA256(verifier))
    pub fn challenge(&self) -> String {
        let hash = Sha256::digest(self.verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hash)
    }
}

impl Default for PkceVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceVerifier")
            .field("verifier", &"[REDACTED]")
            .field("state", &self.state)
            .finish()
    }
}

/// OAuth 2.0 flow manager.
pub struct OAuthFlowManager {
    config: OAuthConfig,
    http_client: Arc<dyn HttpClient>,
}

impl OAuthFlowManager {
    pub fn new(config: OAuthConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the authorization URL the operator must open.
    ///
    /// Returns the URL and the verifier to pass to
    /// [`exchange_code`](Self::exchange_code).
    #[instrument(skip(self))]
    pub fn build_auth_url(&self) -> Result<(String, PkceVerifier)> {
        let verifier = PkceVerifier::new();

        let mut url = Url::parse(&self.config.auth_url)
            .map_err(|e| AuthError::Other(format!("Invalid auth URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scope_string())
            .append_pair("state", verifier.state())
            .append_pair("code_challenge", &verifier.challenge())
            .append_pair("code_challenge_method", "S256")
            // Offline access is what makes the provider issue a refresh token
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");

        tracing::debug!("Built authorization URL");

        Ok((url.to_string(), verifier))
    }

    /// Exchange a one-time authorization code for tokens.
    ///
    /// # Errors
    ///
    /// - [`AuthError::AuthExchangeFailed`] when the token endpoint rejects the
    ///   code (invalid, expired or already used)
    /// - [`AuthError::NetworkError`] when the endpoint cannot be reached
    #[instrument(skip(self, code, verifier))]
    pub async fn exchange_code(&self, code: &str, verifier: &PkceVerifier) -> Result<OAuthTokens> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", self.config.redirect_uri.as_str());
        params.insert("client_id", self.config.client_id.as_str());
        params.insert("code_verifier", verifier.verifier());
        if let Some(ref client_secret) = self.config.client_secret {
            params.insert("client_secret", client_secret.as_str());
        }

        let request = self.token_request(&params)?;
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;

        if !response.is_success() {
            let status = response.status;
            let error_body = response
                .text()
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            warn!(status = status, error = %error_body, "Authorization code rejected");

            return Err(AuthError::AuthExchangeFailed(format!(
                "Token endpoint returned {}: {}",
                status, error_body
            )));
        }

        let token_response: TokenResponse = response.json().map_err(|e| {
            AuthError::AuthExchangeFailed(format!("Failed to parse token response: {}", e))
        })?;

        if token_response.refresh_token.is_none() {
            warn!("Token endpoint issued no refresh token; the credential will stop working when it expires");
        }

        tracing::info!(
            expires_in = token_response.expires_in,
            "Exchanged authorization code for tokens"
        );

        Ok(OAuthTokens::new(
            token_response.access_token,
            token_response.refresh_token,
            token_response.expires_in,
        ))
    }

    /// Refresh an access token.
    ///
    /// 4xx responses fail immediately; 5xx responses are retried up to three
    /// attempts with exponential backoff starting at 100ms. The previous
    /// refresh token is kept when the response omits one.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<OAuthTokens> {
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", self.config.client_id.as_str());
        if let Some(ref client_secret) = self.config.client_secret {
            params.insert("client_secret", client_secret.as_str());
        }

        let mut attempts = 0;
        loop {
            attempts += 1;

            let response = self
                .http_client
                .execute(self.token_request(&params)?)
                .await
                .map_err(|e| AuthError::TokenRefreshFailed(e.to_string()))?;

            if response.is_success() {
                let token_response: TokenResponse = response.json().map_err(|e| {
                    AuthError::TokenRefreshFailed(format!("Failed to parse token response: {}", e))
                })?;

                tracing::info!(
                    expires_in = token_response.expires_in,
                    "Refreshed access token"
                );

                return Ok(OAuthTokens::new(
                    token_response.access_token,
                    token_response.refresh_token,
                    token_response.expires_in,
                )
                .inherit_refresh_token(Some(refresh_token)));
            }

            let status = response.status;
            let error_body = response
                .text()
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            if response.is_client_error() {
                warn!(status = status, error = %error_body, "Token refresh rejected");
                return Err(AuthError::TokenRefreshFailed(format!(
                    "Token endpoint returned {}: {}",
                    status, error_body
                )));
            }

            if attempts >= MAX_REFRESH_ATTEMPTS {
                return Err(AuthError::TokenRefreshFailed(format!(
                    "Token refresh failed after {} attempts. Last error: {} - {}",
                    attempts, status, error_body
                )));
            }

            let delay = Duration::from_millis(100 * 2u64.pow(attempts - 1));
            warn!(
                status = status,
                attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                "Token refresh failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn token_request(&self, params: &HashMap<&str, &str>) -> Result<HttpRequest> {
        let encoded_body = serde_urlencoded::to_string(params)
            .map_err(|e| AuthError::Other(format!("Failed to encode token request: {}", e)))?;

        Ok(
            HttpRequest::new(HttpMethod::Post, self.config.token_url.clone())
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Bytes::from(encoded_body)),
        )
    }
}

/// JSON body returned by the token endpoint.
#[derive(Debug, Deserialize, Serialize)]
struct TokenResponse {
    access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::{ByteStream, HttpResponse};
    use mockall::mock;

    mock! {
        pub HttpClient {}

        #[async_trait::async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
            async fn download_stream(&self, request: HttpRequest) -> BridgeResult<ByteStream>;
        }
    }

    pub(crate) fn json_response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn config() -> OAuthConfig {
        OAuthConfig {
            client_id: "test-client".to_string(),
            client_secret: Some("secret".to_string()),
            redirect_uri: "urn:ietf:wg:oauth:2.0:oob".to_string(),
            scopes: vec!["scope1".to_string(), "scope2".to_string()],
            auth_url: "https://provider.com/auth".to_string(),
            token_url: "https://provider.com/token".to_string(),
        }
    }

    fn body_of(request: &HttpRequest) -> String {
        String::from_utf8(request.body.clone().unwrap_or_default().to_vec()).unwrap()
    }

    #[test]
    fn test_pkce_verifier_generation() {
        let verifier = PkceVerifier::new();
        assert!(verifier.verifier().len() >= 43);
        assert_eq!(verifier.challenge(), verifier.challenge());

        let other = PkceVerifier::new();
        assert_ne!(verifier.verifier(), other.verifier());
        assert_ne!(verifier.state(), other.state());
    }

    #[test]
    fn test_pkce_challenge_known_vector() {
        // RFC 7636 appendix B
        let verifier = PkceVerifier {
            verifier: "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string(),
            state: "s".to_string(),
        };
        assert_eq!(
            verifier.challenge(),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_google_drive_config() {
        let config = OAuthConfig::google_drive("id".into(), None, "urn:ietf:wg:oauth:2.0:oob".into());
        assert_eq!(config.scopes, vec![DRIVE_SCOPE.to_string()]);
        assert_eq!(config.token_url, GOOGLE_TOKEN_URL);
    }

    #[test]
    fn test_build_auth_url() {
        let manager = OAuthFlowManager::new(config(), Arc::new(MockHttpClient::new()));
        let (url, verifier) = manager.build_auth_url().unwrap();

        assert!(url.starts_with("https://provider.com/auth?"));
        assert!(url.contains("client_id=test-client"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=scope1+scope2") || url.contains("scope=scope1%20scope2"));
        assert!(url.contains(&format!("code_challenge={}", verifier.challenge())));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("access_type=offline"));
        assert!(!url.contains(verifier.verifier()));
    }

    #[test]
    fn test_build_auth_url_invalid_url() {
        let mut bad = config();
        bad.auth_url = "not a valid url".to_string();
        let manager = OAuthFlowManager::new(bad, Arc::new(MockHttpClient::new()));
        assert!(manager.build_auth_url().is_err());
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|request| {
                let body = body_of(request);
                request.method == HttpMethod::Post
                    && request.url == "https://provider.com/token"
                    && body.contains("grant_type=authorization_code")
                    && body.contains("code=the-code")
                    && body.contains("code_verifier=")
            })
            .times(1)
            .returning(|_| {
                Ok(json_response(
                    200,
                    r#"{"access_token":"at","refresh_token":"rt","expires_in":3599}"#,
                ))
            });

        let manager = OAuthFlowManager::new(config(), Arc::new(http));
        let verifier = PkceVerifier::new();
        let tokens = manager.exchange_code("the-code", &verifier).await.unwrap();

        assert_eq!(tokens.access_token(), "at");
        assert_eq!(tokens.refresh_token(), Some("rt"));
        assert!(!tokens.is_expired());
    }

    #[tokio::test]
    async fn test_exchange_code_rejected() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Ok(json_response(400, r#"{"error":"invalid_grant"}"#)));

        let manager = OAuthFlowManager::new(config(), Arc::new(http));
        let result = manager.exchange_code("stale", &PkceVerifier::new()).await;

        assert!(matches!(result, Err(AuthError::AuthExchangeFailed(msg)) if msg.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn test_exchange_code_network_error() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Err(BridgeError::OperationFailed("connection reset".into())));

        let manager = OAuthFlowManager::new(config(), Arc::new(http));
        let result = manager.exchange_code("code", &PkceVerifier::new()).await;
        assert!(matches!(result, Err(AuthError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|request| body_of(request).contains("grant_type=refresh_token"))
            .times(1)
            .returning(|_| Ok(json_response(200, r#"{"access_token":"fresh"}"#)));

        let manager = OAuthFlowManager::new(config(), Arc::new(http));
        let tokens = manager.refresh_access_token("long-lived").await.unwrap();

        assert_eq!(tokens.access_token(), "fresh");
        assert_eq!(tokens.refresh_token(), Some("long-lived"));
    }

    #[tokio::test]
    async fn test_refresh_client_error_not_retried() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(json_response(401, "revoked")));

        let manager = OAuthFlowManager::new(config(), Arc::new(http));
        let result = manager.refresh_access_token("revoked").await;
        assert!(matches!(result, Err(AuthError::TokenRefreshFailed(_))));
    }

    #[tokio::test]
    async fn test_refresh_retries_server_errors() {
        let mut http = MockHttpClient::new();
        let mut seq = mockall::Sequence::new();
        http.expect_execute()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(json_response(503, "unavailable")));
        http.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(json_response(200, r#"{"access_token":"third-time"}"#)));

        let manager = OAuthFlowManager::new(config(), Arc::new(http));
        let tokens = manager.refresh_access_token("r").await.unwrap();
        assert_eq!(tokens.access_token(), "third-time");
    }

    #[tokio::test]
    async fn test_refresh_gives_up_after_max_attempts() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(MAX_REFRESH_ATTEMPTS as usize)
            .returning(|_| Ok(json_response(500, "boom")));

        let manager = OAuthFlowManager::new(config(), Arc::new(http));
        let result = manager.refresh_access_token("r").await;
        assert!(matches!(result, Err(AuthError::TokenRefreshFailed(msg)) if msg.contains("3 attempts")));
    }

    #[test]
    fn test_token_response_defaults() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token":"token"}"#).unwrap();
        assert_eq!(response.refresh_token, None);
        assert_eq!(response.expires_in, 3600);
    }
}
