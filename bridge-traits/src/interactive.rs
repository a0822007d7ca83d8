//! Interactive Operator Channels
//!
//! One-time setup steps need a human: pasting an authorization code for the
//! storage provider and scanning a pairing code for the messaging session.

use async_trait::async_trait;

use crate::error::Result;

/// Channel used to complete an OAuth authorization by hand.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    /// Whether an operator can answer prompts in this execution context
    ///
    /// Headless/server contexts return `false`; the credential bootstrap then
    /// fails instead of blocking forever.
    fn is_interactive(&self) -> bool;

    /// Show `authorization_url` and wait for the one-time code
    async fn request_code(&self, authorization_url: &str) -> Result<String>;
}

/// Channel used to show messaging pairing challenges.
pub trait PairingDisplay: Send + Sync {
    /// Render a pairing challenge for the operator
    fn show_challenge(&self, code: &str) -> Result<()>;
}
