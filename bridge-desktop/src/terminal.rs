//! Terminal operator channels

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    interactive::{AuthorizationPrompt, PairingDisplay},
};
use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;
use std::io::{IsTerminal, Write};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

/// Authorization prompt on stdin/stderr
pub struct TerminalPrompt {
    interactive: bool,
}

impl TerminalPrompt {
    /// Interactive when stdin is a terminal
    pub fn detect() -> Self {
        Self {
            interactive: std::io::stdin().is_terminal(),
        }
    }

    /// Force the interactive flag (e.g. from a `HEADLESS` setting)
    pub fn with_interactive(interactive: bool) -> Self {
        Self { interactive }
    }
}

#[async_trait]
impl AuthorizationPrompt for TerminalPrompt {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    async fn request_code(&self, authorization_url: &str) -> Result<String> {
        if !self.interactive {
            return Err(BridgeError::NotAvailable(
                "no terminal attached for authorization".to_string(),
            ));
        }

        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(
                format!(
                    "\nOpen this link to authorize Google Drive access:\n\n  {}\n\nPaste the code here: ",
                    authorization_url
                )
                .as_bytes(),
            )
            .await?;
        stderr.flush().await?;

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await?;
        if read == 0 {
            return Err(BridgeError::NotAvailable(
                "stdin closed before a code was entered".to_string(),
            ));
        }

        Ok(line.trim().to_string())
    }
}

/// Renders pairing challenges as QR codes on stdout
#[derive(Debug, Default)]
pub struct TerminalPairingDisplay;

impl TerminalPairingDisplay {
    pub fn new() -> Self {
        Self
    }
}

/// Render `code` as a QR code using half-block characters
pub fn render_qr(code: &str) -> Result<String> {
    let qr = QrCode::new(code.as_bytes())
        .map_err(|e| BridgeError::OperationFailed(format!("Cannot encode pairing code: {}", e)))?;

    Ok(qr
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

impl PairingDisplay for TerminalPairingDisplay {
    fn show_challenge(&self, code: &str) -> Result<()> {
        let rendered = render_qr(code)?;

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", rendered)?;
        writeln!(stdout, "Scan this code with the messaging app to link the session.")?;
        stdout.flush()?;

        info!("Pairing challenge displayed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_qr_produces_block_art() {
        let rendered = render_qr("2@abc,def,ghi==").unwrap();
        let lines: Vec<&str> = rendered.lines().collect();

        assert!(lines.len() > 10);
        assert!(lines.iter().all(|l| l.chars().count() == lines[0].chars().count()));
        assert!(rendered.contains('█') || rendered.contains('▀') || rendered.contains('▄'));
    }

    #[test]
    fn test_render_qr_rejects_oversized_payload() {
        let huge = "x".repeat(8000);
        assert!(render_qr(&huge).is_err());
    }

    #[tokio::test]
    async fn test_headless_prompt_refuses() {
        let prompt = TerminalPrompt::with_interactive(false);
        assert!(!prompt.is_interactive());

        let err = prompt.request_code("https://accounts.example").await.unwrap_err();
        assert!(matches!(err, BridgeError::NotAvailable(_)));
    }
}
