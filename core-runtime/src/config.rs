//! # Daemon Configuration
//!
//! `DaemonConfig` holds every setting the delivery daemon needs. It is built
//! either with [`DaemonConfig::builder`] or from the process environment with
//! [`DaemonConfig::from_env`]; both paths end in the same fail-fast
//! validation.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{DaemonConfig, Destination};
//!
//! let config = DaemonConfig::builder()
//!     .oauth_client("client-id", Some("secret".into()), "urn:ietf:wg:oauth:2.0:oob")
//!     .pending_folder_id("pending-folder")
//!     .delivered_folder_id("delivered-folder")
//!     .destination(Destination::GroupName("Family".into()))
//!     .daily_schedule("0 30 7 * * *")
//!     .timezone("Europe/Paris")
//!     .build()
//!     .expect("invalid configuration");
//! ```
//!
//! ## Environment
//!
//! | Variable | Default |
//! |---|---|
//! | `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET` / `GOOGLE_REDIRECT_URI` | required unless `GOOGLE_CREDENTIALS_PATH` |
//! | `GOOGLE_CREDENTIALS_PATH` | unset |
//! | `GOOGLE_TOKEN_JSON` | unset |
//! | `TOKEN_PATH` | `token.json` |
//! | `PENDING_FOLDER_ID` / `DELIVERED_FOLDER_ID` | required |
//! | `DESTINATION_GROUP_ID` / `DESTINATION_GROUP_NAME` | one required, id wins |
//! | `DAILY_SCHEDULE` | `0 0 8 * * *` |
//! | `SCHEDULE_TIMEZONE` | `UTC` |
//! | `STORE_URL` | unset (local session directory) |
//! | `SESSION_DIR` | `.session` |
//! | `SCRATCH_DIR` | `.` |
//! | `MESSAGING_GATEWAY_URL` | `http://127.0.0.1:3000` |
//! | `HEADLESS` | unset (decided from the terminal) |
//! | `RUN_ON_START` | `false` |
//! | `LOG_FORMAT` / `LOG_LEVEL` / `LOG_FILTER` | build default / `info` / unset |

use crate::error::{Error, Result};
use crate::logging::{LogFormat, LoggingConfig};
use bridge_traits::time::LogLevel;
use chrono_tz::Tz;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_DAILY_SCHEDULE: &str = "0 0 8 * * *";
pub const DEFAULT_TOKEN_PATH: &str = "token.json";
pub const DEFAULT_SESSION_DIR: &str = ".session";
pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:3000";
pub const OUT_OF_BAND_REDIRECT: &str = "urn:ietf:wg:oauth:2.0:oob";

// ============================================================================
// Settings Types
// ============================================================================

/// OAuth client registration for the storage provider.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthClientSettings {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
}

impl fmt::Debug for OAuthClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClientSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

#[derive(Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

impl OAuthClientSettings {
    /// Parse a downloaded client credentials file.
    ///
    /// Accepts the `{"installed": {...}}` and `{"web": {...}}` layouts. The
    /// first redirect URI is used, falling back to the out-of-band URI.
    pub fn from_credentials_json(json: &str) -> Result<Self> {
        let file: CredentialsFile = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid client credentials file: {}", e)))?;

        let section = file.installed.or(file.web).ok_or_else(|| {
            Error::Config(
                "Client credentials file has neither an \"installed\" nor a \"web\" section"
                    .to_string(),
            )
        })?;

        Ok(Self {
            client_id: section.client_id,
            client_secret: section.client_secret,
            redirect_uri: section
                .redirect_uris
                .into_iter()
                .next()
                .unwrap_or_else(|| OUT_OF_BAND_REDIRECT.to_string()),
        })
    }
}

/// Where delivered images go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Conversation id used as-is
    GroupId(String),
    /// Group display name, resolved once against the session's conversations
    GroupName(String),
}

impl Destination {
    pub fn kind(&self) -> &'static str {
        match self {
            Destination::GroupId(_) => "literal id",
            Destination::GroupName(_) => "name lookup",
        }
    }
}

/// Durable store for messaging session material.
#[derive(Clone, PartialEq, Eq)]
pub enum SessionStoreLocation {
    /// One file per key under a local directory
    Local(PathBuf),
    /// sqlx connection string
    Remote(String),
}

impl SessionStoreLocation {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionStoreLocation::Local(_) => "local",
            SessionStoreLocation::Remote(_) => "remote",
        }
    }
}

impl fmt::Debug for SessionStoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStoreLocation::Local(dir) => f.debug_tuple("Local").field(dir).finish(),
            // Connection strings may embed passwords
            SessionStoreLocation::Remote(_) => f.debug_tuple("Remote").field(&"[REDACTED]").finish(),
        }
    }
}

/// Which credential sources the daemon will consult, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Env,
    File,
    Interactive,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Env => "env",
            CredentialSource::File => "file",
            CredentialSource::Interactive => "interactive",
        }
    }
}

/// Daily trigger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    /// Six-field cron expression (sec min hour dom mon dow)
    pub expression: String,
    pub timezone: Tz,
    /// Make one attempt as soon as the session is ready
    pub run_on_start: bool,
}

// ============================================================================
// DaemonConfig
// ============================================================================

/// Complete daemon configuration.
#[derive(Clone)]
pub struct DaemonConfig {
    pub oauth: OAuthClientSettings,
    /// Injected credential JSON; takes precedence over the token file
    pub token_json: Option<String>,
    pub token_path: PathBuf,
    pub pending_folder_id: String,
    pub delivered_folder_id: String,
    pub destination: Destination,
    pub schedule: ScheduleSettings,
    pub session_store: SessionStoreLocation,
    pub scratch_dir: PathBuf,
    pub gateway_url: String,
    /// `None` lets the binary decide from whether stdin is a terminal
    pub headless: Option<bool>,
    pub logging: LoggingConfig,
}

impl fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("oauth", &self.oauth)
            .field("token_json", &self.token_json.as_ref().map(|_| "[REDACTED]"))
            .field("token_path", &self.token_path)
            .field("pending_folder_id", &self.pending_folder_id)
            .field("delivered_folder_id", &self.delivered_folder_id)
            .field("destination", &self.destination)
            .field("schedule", &self.schedule)
            .field("session_store", &self.session_store)
            .field("scratch_dir", &self.scratch_dir)
            .field("gateway_url", &self.gateway_url)
            .field("headless", &self.headless)
            .field("logging", &self.logging)
            .finish()
    }
}

impl DaemonConfig {
    pub fn builder() -> DaemonConfigBuilder {
        DaemonConfigBuilder::default()
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut builder = DaemonConfig::builder();

        match get("GOOGLE_CREDENTIALS_PATH") {
            Some(path) => {
                let json = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Cannot read GOOGLE_CREDENTIALS_PATH {}: {}", path, e))
                })?;
                builder = builder.oauth_settings(OAuthClientSettings::from_credentials_json(&json)?);
            }
            None => {
                let client_id = get("GOOGLE_CLIENT_ID").ok_or_else(|| Error::MissingSetting {
                    key: "GOOGLE_CLIENT_ID".to_string(),
                    hint: "set it or point GOOGLE_CREDENTIALS_PATH at a credentials file"
                        .to_string(),
                })?;
                let redirect_uri = get("GOOGLE_REDIRECT_URI")
                    .unwrap_or_else(|| OUT_OF_BAND_REDIRECT.to_string());
                builder = builder.oauth_client(client_id, get("GOOGLE_CLIENT_SECRET"), redirect_uri);
            }
        }

        if let Some(json) = get("GOOGLE_TOKEN_JSON") {
            builder = builder.token_json(json);
        }
        if let Some(path) = get("TOKEN_PATH") {
            builder = builder.token_path(path);
        }

        builder = builder
            .pending_folder_id(required(&get, "PENDING_FOLDER_ID", "id of the folder holding undelivered images")?)
            .delivered_folder_id(required(&get, "DELIVERED_FOLDER_ID", "id of the folder receiving delivered images")?);

        let destination = match (get("DESTINATION_GROUP_ID"), get("DESTINATION_GROUP_NAME")) {
            (Some(id), _) => Destination::GroupId(id),
            (None, Some(name)) => Destination::GroupName(name),
            (None, None) => {
                return Err(Error::MissingSetting {
                    key: "DESTINATION_GROUP_ID".to_string(),
                    hint: "set DESTINATION_GROUP_ID or DESTINATION_GROUP_NAME".to_string(),
                })
            }
        };
        builder = builder.destination(destination);

        if let Some(expr) = get("DAILY_SCHEDULE") {
            builder = builder.daily_schedule(expr);
        }
        if let Some(tz) = get("SCHEDULE_TIMEZONE") {
            builder = builder.timezone(tz);
        }
        if let Some(flag) = get("RUN_ON_START") {
            builder = builder.run_on_start(parse_bool("RUN_ON_START", &flag)?);
        }

        builder = match (get("STORE_URL"), get("SESSION_DIR")) {
            (Some(url), _) => builder.session_store(SessionStoreLocation::Remote(url)),
            (None, Some(dir)) => builder.session_store(SessionStoreLocation::Local(dir.into())),
            (None, None) => builder,
        };

        if let Some(dir) = get("SCRATCH_DIR") {
            builder = builder.scratch_dir(dir);
        }
        if let Some(url) = get("MESSAGING_GATEWAY_URL") {
            builder = builder.gateway_url(url);
        }
        if let Some(flag) = get("HEADLESS") {
            builder = builder.headless(parse_bool("HEADLESS", &flag)?);
        }

        let mut logging = LoggingConfig::default();
        if let Some(format) = get("LOG_FORMAT") {
            logging.format = LogFormat::parse(&format)
                .ok_or_else(|| Error::Config(format!("Unknown LOG_FORMAT: {}", format)))?;
        }
        if let Some(level) = get("LOG_LEVEL") {
            logging.level = LogLevel::parse(&level)
                .ok_or_else(|| Error::Config(format!("Unknown LOG_LEVEL: {}", level)))?;
        }
        if let Some(filter) = get("LOG_FILTER") {
            logging.filter = Some(filter);
        }

        builder.logging(logging).build()
    }

    /// Credential sources in the order they are consulted.
    pub fn credential_sources(&self, interactive: bool) -> Vec<CredentialSource> {
        let mut sources = Vec::with_capacity(3);
        if self.token_json.is_some() {
            sources.push(CredentialSource::Env);
        }
        sources.push(CredentialSource::File);
        if interactive {
            sources.push(CredentialSource::Interactive);
        }
        sources
    }

    /// Directory and key under which the credential file lives.
    pub fn token_location(&self) -> (PathBuf, String) {
        let dir = match self.token_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let key = self
            .token_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_TOKEN_PATH.to_string());
        (dir, key)
    }

    /// Validates the configuration.
    ///
    /// Checks that folder ids are present and distinct, the destination is
    /// non-empty, the cron expression parses and the gateway URL is http(s).
    pub fn validate(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() {
            return Err(Error::Config("OAuth client id cannot be empty".to_string()));
        }

        if self.pending_folder_id.is_empty() || self.delivered_folder_id.is_empty() {
            return Err(Error::Config(
                "Pending and delivered folder ids cannot be empty".to_string(),
            ));
        }

        if self.pending_folder_id == self.delivered_folder_id {
            return Err(Error::Config(
                "Pending and delivered folders must differ, otherwise acknowledged items \
                 would be selected again"
                    .to_string(),
            ));
        }

        match &self.destination {
            Destination::GroupId(v) | Destination::GroupName(v) if v.is_empty() => {
                return Err(Error::Config("Destination cannot be empty".to_string()));
            }
            _ => {}
        }

        cron::Schedule::from_str(&self.schedule.expression).map_err(|e| {
            Error::Config(format!(
                "Invalid DAILY_SCHEDULE '{}': {} (expected sec min hour dom mon dow)",
                self.schedule.expression, e
            ))
        })?;

        if !(self.gateway_url.starts_with("http://") || self.gateway_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "Messaging gateway URL must be http(s): {}",
                self.gateway_url
            )));
        }

        if let SessionStoreLocation::Local(dir) = &self.session_store {
            if dir.as_os_str().is_empty() {
                return Err(Error::Config("Session directory cannot be empty".to_string()));
            }
        }

        Ok(())
    }
}

fn required<F>(get: &F, key: &str, hint: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    get(key).ok_or_else(|| Error::MissingSetting {
        key: key.to_string(),
        hint: hint.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{} must be a boolean, got '{}'", key, other))),
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`DaemonConfig`].
#[derive(Default)]
pub struct DaemonConfigBuilder {
    oauth: Option<OAuthClientSettings>,
    token_json: Option<String>,
    token_path: Option<PathBuf>,
    pending_folder_id: Option<String>,
    delivered_folder_id: Option<String>,
    destination: Option<Destination>,
    daily_schedule: Option<String>,
    timezone: Option<String>,
    run_on_start: bool,
    session_store: Option<SessionStoreLocation>,
    scratch_dir: Option<PathBuf>,
    gateway_url: Option<String>,
    headless: Option<bool>,
    logging: Option<LoggingConfig>,
}

impl DaemonConfigBuilder {
    pub fn oauth_client(
        mut self,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        self.oauth = Some(OAuthClientSettings {
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
        });
        self
    }

    pub fn oauth_settings(mut self, settings: OAuthClientSettings) -> Self {
        self.oauth = Some(settings);
        self
    }

    pub fn token_json(mut self, json: impl Into<String>) -> Self {
        self.token_json = Some(json.into());
        self
    }

    pub fn token_path(mut self, path: impl AsRef<Path>) -> Self {
        self.token_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn pending_folder_id(mut self, id: impl Into<String>) -> Self {
        self.pending_folder_id = Some(id.into());
        self
    }

    pub fn delivered_folder_id(mut self, id: impl Into<String>) -> Self {
        self.delivered_folder_id = Some(id.into());
        self
    }

    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn daily_schedule(mut self, expression: impl Into<String>) -> Self {
        self.daily_schedule = Some(expression.into());
        self
    }

    pub fn timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    pub fn run_on_start(mut self, enabled: bool) -> Self {
        self.run_on_start = enabled;
        self
    }

    pub fn session_store(mut self, location: SessionStoreLocation) -> Self {
        self.session_store = Some(location);
        self
    }

    pub fn scratch_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.scratch_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = Some(headless);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<DaemonConfig> {
        let oauth = self.oauth.ok_or_else(|| {
            Error::Config("OAuth client is required. Use .oauth_client() to set it.".to_string())
        })?;

        let pending_folder_id = self.pending_folder_id.ok_or_else(|| {
            Error::Config(
                "Pending folder id is required. Use .pending_folder_id() to set it.".to_string(),
            )
        })?;

        let delivered_folder_id = self.delivered_folder_id.ok_or_else(|| {
            Error::Config(
                "Delivered folder id is required. Use .delivered_folder_id() to set it."
                    .to_string(),
            )
        })?;

        let destination = self.destination.ok_or_else(|| {
            Error::Config("Destination is required. Use .destination() to set it.".to_string())
        })?;

        let tz_name = self.timezone.unwrap_or_else(|| "UTC".to_string());
        let timezone: Tz = tz_name
            .parse()
            .map_err(|_| Error::Config(format!("Unknown timezone: {}", tz_name)))?;

        let config = DaemonConfig {
            oauth,
            token_json: self.token_json,
            token_path: self
                .token_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH)),
            pending_folder_id,
            delivered_folder_id,
            destination,
            schedule: ScheduleSettings {
                expression: self
                    .daily_schedule
                    .unwrap_or_else(|| DEFAULT_DAILY_SCHEDULE.to_string()),
                timezone,
                run_on_start: self.run_on_start,
            },
            session_store: self
                .session_store
                .unwrap_or_else(|| SessionStoreLocation::Local(PathBuf::from(DEFAULT_SESSION_DIR))),
            scratch_dir: self.scratch_dir.unwrap_or_else(|| PathBuf::from(".")),
            gateway_url: self
                .gateway_url
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            headless: self.headless,
            logging: self.logging.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}
