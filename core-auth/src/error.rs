use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The one-time code was rejected by the token endpoint
    #[error("Authorization code exchange failed: {0}")]
    AuthExchangeFailed(String),

    /// No credential could be obtained without an operator
    #[error("No storage credential available: {0}")]
    CredentialUnavailable(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Stored credential under '{key}' is unreadable: {reason}")]
    TokenCorrupted { key: String, reason: String },

    #[error("Authorization prompt failed: {0}")]
    PromptFailed(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
