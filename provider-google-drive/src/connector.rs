//! Google Drive API connector implementation
//!
//! Implements the `StorageProvider` trait for Google Drive API v3.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::storage::{ListQuery, RemoteFile, StorageProvider};
use chrono::{DateTime, Utc};
use core_auth::AccessTokenProvider;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::GoogleDriveError;
use crate::types::{DriveFile, FileParents, FilesListResponse};

/// Google Drive API base URL
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Maximum results per page (Google Drive API limit)
const MAX_PAGE_SIZE: u32 = 1000;

/// Fields to request for file resources
const FILE_FIELDS: &str = "id,name,mimeType,size,createdTime,parents,trashed";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Google Drive API connector
///
/// # Features
///
/// - Folder listing filtered by MIME prefix, oldest creation time first
/// - Parent-set reads and atomic add/remove updates (folder moves)
/// - Streaming content downloads
/// - Exponential backoff for rate limiting and server errors
/// - Bearer tokens pulled from an [`AccessTokenProvider`] on every attempt,
///   so a refresh between attempts is picked up
///
/// # Example
///
/// ```ignore
/// use provider_google_drive::GoogleDriveConnector;
/// use bridge_traits::storage::{ListQuery, StorageProvider};
///
/// let connector = GoogleDriveConnector::new(http_client, credentials);
/// let images = connector
///     .list_children(&ListQuery::children_of("folder-id").with_mime_prefix("image/"))
///     .await?;
/// ```
pub struct GoogleDriveConnector {
    http_client: Arc<dyn HttpClient>,
    tokens: Arc<dyn AccessTokenProvider>,
    api_base: String,
    retry_policy: RetryPolicy,
}

impl GoogleDriveConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self {
            http_client,
            tokens,
            api_base: DRIVE_API_BASE.to_string(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Point the connector at a different API root
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.api_base, urlencoding::encode(file_id))
    }

    /// Parse RFC 3339 timestamp
    fn parse_timestamp(rfc3339: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(rfc3339)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Convert DriveFile to RemoteFile
    fn convert_file(drive_file: DriveFile) -> RemoteFile {
        RemoteFile {
            created_at: drive_file
                .created_time
                .as_deref()
                .and_then(Self::parse_timestamp),
            size: drive_file.size.and_then(|s| s.parse().ok()),
            id: drive_file.id,
            name: drive_file.name,
            mime_type: drive_file.mime_type,
            parent_ids: drive_file.parents,
            trashed: drive_file.trashed,
        }
    }

    /// Drive search expression for a children listing
    fn search_expression(query: &ListQuery) -> String {
        let mut q = format!(
            "'{}' in parents and trashed = false",
            escape_literal(&query.parent_id)
        );
        if let Some(prefix) = &query.mime_prefix {
            q.push_str(&format!(" and mimeType contains '{}'", escape_literal(prefix)));
        }
        q
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_policy.delay_for(attempt)
    }

    /// Execute API request with retry logic
    ///
    /// Retries 429, 5xx and transport errors with exponential backoff; other
    /// statuses fail immediately.
    #[instrument(skip(self, body))]
    async fn execute_with_retry(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<&serde_json::Value>,
    ) -> std::result::Result<HttpResponse, GoogleDriveError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let token = self.tokens.access_token().await?;

            let mut request = HttpRequest::new(method, url.clone())
                .bearer_token(token)
                .header("Accept", "application/json")
                .timeout(REQUEST_TIMEOUT);
            if let Some(body) = body {
                request = request.json(body)?;
            }

            match self.http_client.execute(request).await {
                Ok(response) if response.is_success() => {
                    debug!(status = response.status, "API request succeeded");
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status;
                    let retryable = status == 429 || response.is_server_error();

                    if !retryable {
                        let message = String::from_utf8_lossy(&response.body).to_string();
                        warn!(status, "API request failed");
                        return Err(match status {
                            401 => GoogleDriveError::AuthenticationFailed(message),
                            _ => GoogleDriveError::ApiError {
                                status_code: status,
                                message,
                            },
                        });
                    }

                    if attempt >= max_attempts {
                        warn!(status, attempts = attempt, "API request failed after retries");
                        return Err(if status == 429 {
                            GoogleDriveError::RateLimitExceeded { attempts: attempt }
                        } else {
                            GoogleDriveError::ApiError {
                                status_code: status,
                                message: format!("Request failed after {} attempts", attempt),
                            }
                        });
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        status,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "API request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        warn!(error = %e, attempts = attempt, "API request failed after retries");
                        return Err(e.into());
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "API request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Escape a value for use inside a single-quoted Drive query literal
fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn parse_json<T: serde::de::DeserializeOwned>(
    response: &HttpResponse,
) -> std::result::Result<T, GoogleDriveError> {
    serde_json::from_slice(&response.body).map_err(|e| GoogleDriveError::ParseError(e.to_string()))
}

#[async_trait]
impl StorageProvider for GoogleDriveConnector {
    #[instrument(skip(self), fields(parent = %query.parent_id))]
    async fn list_children(&self, query: &ListQuery) -> Result<Vec<RemoteFile>> {
        let q = Self::search_expression(query);
        let page_size = query.limit.clamp(1, MAX_PAGE_SIZE);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/files?q={}&orderBy=createdTime&pageSize={}&fields={}",
                self.api_base,
                urlencoding::encode(&q),
                page_size,
                urlencoding::encode(&format!("nextPageToken,files({})", FILE_FIELDS)),
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let response = self.execute_with_retry(HttpMethod::Get, url, None).await?;
            let page: FilesListResponse = parse_json(&response)?;

            files.extend(
                page.files
                    .into_iter()
                    .filter(|f| !f.trashed)
                    .map(Self::convert_file),
            );

            page_token = page.next_page_token;
            if page_token.is_none() || files.len() >= query.limit as usize {
                break;
            }
        }

        files.truncate(query.limit as usize);
        debug!(count = files.len(), "Listed folder children");
        Ok(files)
    }

    #[instrument(skip(self))]
    async fn get_parents(&self, file_id: &str) -> Result<Vec<String>> {
        let url = format!("{}?fields=id,parents", self.file_url(file_id));
        let response = self
            .execute_with_retry(HttpMethod::Get, url, None)
            .await
            .map_err(|e| not_found_for(e, file_id))?;

        let file: FileParents = parse_json(&response)?;
        Ok(file.parents)
    }

    #[instrument(skip(self))]
    async fn update_parents(
        &self,
        file_id: &str,
        add_parents: &[String],
        remove_parents: &[String],
    ) -> Result<Vec<String>> {
        let mut url = format!("{}?fields=id,parents", self.file_url(file_id));
        if !add_parents.is_empty() {
            url.push_str(&format!(
                "&addParents={}",
                urlencoding::encode(&add_parents.join(","))
            ));
        }
        if !remove_parents.is_empty() {
            url.push_str(&format!(
                "&removeParents={}",
                urlencoding::encode(&remove_parents.join(","))
            ));
        }

        let response = self
            .execute_with_retry(HttpMethod::Patch, url, Some(&serde_json::json!({})))
            .await
            .map_err(|e| not_found_for(e, file_id))?;

        let file: FileParents = parse_json(&response)?;
        debug!(parents = ?file.parents, "Updated parents");
        Ok(file.parents)
    }

    #[instrument(skip(self))]
    async fn open_content(&self, file_id: &str) -> Result<ByteStream> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(GoogleDriveError::from)?;

        let request = HttpRequest::new(
            HttpMethod::Get,
            format!("{}?alt=media", self.file_url(file_id)),
        )
        .bearer_token(token);

        self.http_client.download_stream(request).await
    }
}

fn not_found_for(error: GoogleDriveError, file_id: &str) -> GoogleDriveError {
    match error {
        GoogleDriveError::ApiError {
            status_code: 404, ..
        } => GoogleDriveError::FileNotFound {
            file_id: file_id.to_string(),
        },
        other => other,
    }
}
