//! daily-drop: delivers the oldest pending image from a Google Drive folder
//! to a messaging group once a day.

use anyhow::Context;
use bridge_desktop::{
    FileSecureStore, GatewayTransport, ReqwestHttpClient, SqliteSecureStore,
    TerminalPairingDisplay, TerminalPrompt,
};
use bridge_traits::{AuthorizationPrompt, SecureStore};
use core_auth::{CredentialStore, OAuthConfig, OAuthFlowManager, TokenStore, DRIVE_SCOPE};
use core_delivery::{DailyScheduler, DailyTrigger, DeliveryPipeline, DeliveryQueue, MessagingSession};
use core_runtime::config::{DaemonConfig, SessionStoreLocation};
use core_runtime::events::{EventBus, EventSeverity};
use core_runtime::logging::init_logging;
use provider_google_drive::GoogleDriveConnector;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    let config = DaemonConfig::from_env().context("invalid configuration")?;
    init_logging(&config.logging).context("failed to initialize logging")?;

    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Ignoring unreadable environment file"),
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        destination = config.destination.kind(),
        session_store = config.session_store.kind(),
        schedule = %config.schedule.expression,
        timezone = %config.schedule.timezone,
        "Starting daily-drop"
    );

    let event_bus = EventBus::default();
    spawn_event_logger(&event_bus);

    let http = Arc::new(ReqwestHttpClient::new()?);

    // Storage credential: env > token file > interactive bootstrap
    let prompt = Arc::new(match config.headless {
        Some(headless) => TerminalPrompt::with_interactive(!headless),
        None => TerminalPrompt::detect(),
    });
    let sources: Vec<&str> = config
        .credential_sources(prompt.is_interactive())
        .iter()
        .map(|s| s.as_str())
        .collect();
    info!(sources = ?sources, "Credential sources");

    let (token_dir, token_key) = config.token_location();
    let token_store = TokenStore::new(Arc::new(FileSecureStore::new(token_dir)), token_key)
        .with_scope(DRIVE_SCOPE);
    let flow = OAuthFlowManager::new(
        OAuthConfig::google_drive(
            config.oauth.client_id.clone(),
            config.oauth.client_secret.clone(),
            config.oauth.redirect_uri.clone(),
        ),
        http.clone(),
    );
    let credentials = Arc::new(
        CredentialStore::new(flow, token_store, prompt)
            .with_env_credential(config.token_json.clone())
            .with_event_bus(event_bus.clone()),
    );
    credentials
        .acquire()
        .await
        .context("storage credential unavailable")?;

    let drive = Arc::new(GoogleDriveConnector::new(http.clone(), credentials.clone()));

    // Messaging session
    let session_store: Arc<dyn SecureStore> = match &config.session_store {
        SessionStoreLocation::Local(dir) => Arc::new(FileSecureStore::new(dir.clone())),
        SessionStoreLocation::Remote(url) => Arc::new(
            SqliteSecureStore::connect(url)
                .await
                .context("failed to connect to the session store")?,
        ),
    };
    let transport = Arc::new(GatewayTransport::new(http.clone(), config.gateway_url.clone()));
    let session = Arc::new(
        MessagingSession::new(transport, session_store, Arc::new(TerminalPairingDisplay::new()))
            .with_event_bus(event_bus.clone()),
    );
    session
        .start()
        .await
        .context("failed to start the messaging session")?;

    // Pipeline and schedule
    let queue = Arc::new(DeliveryQueue::new(
        drive,
        config.pending_folder_id.clone(),
        config.delivered_folder_id.clone(),
        config.scratch_dir.clone(),
    ));
    let pipeline = Arc::new(
        DeliveryPipeline::new(queue, session, config.destination.clone())
            .with_event_bus(event_bus.clone()),
    );
    let scheduler = DailyScheduler::new(DailyTrigger::from_settings(&config.schedule)?, pipeline)
        .with_run_on_start(config.schedule.run_on_start);

    let shutdown = install_signal_handler();
    scheduler.run(shutdown).await?;

    info!("daily-drop stopped");
    Ok(())
}

/// Cancelled on SIGINT or SIGTERM
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down after the current run"),
                        _ = sigterm.recv() => info!("Received SIGTERM, shutting down after the current run"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!(error = %e, "Ctrl+C handler unavailable");
                        return;
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Ctrl+C handler unavailable");
                return;
            }
            info!("Received Ctrl+C, shutting down after the current run");
        }

        trigger.cancel();
    });

    token
}

/// Mirror bus events into the log at their own severity
fn spawn_event_logger(event_bus: &EventBus) {
    let mut events = event_bus.subscribe();

    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;

        loop {
            match events.recv().await {
                Ok(event) => {
                    let description = event.description().to_string();
                    match event.severity() {
                        EventSeverity::Error => error!(event = ?event, "{}", description),
                        EventSeverity::Warning => warn!(event = ?event, "{}", description),
                        EventSeverity::Info => info!(event = ?event, "{}", description),
                        EventSeverity::Debug => debug!(event = ?event, "{}", description),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
