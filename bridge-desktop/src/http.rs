//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy},
};
use futures_util::TryStreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("daily-drop/", env!("CARGO_PKG_VERSION"));

/// Reqwest-based HTTP client implementation
///
/// Provides HTTP operations with:
/// - Connection pooling via reqwest
/// - Transport-level retry (connect errors, timeouts) with exponential backoff;
///   POST and PATCH are only repeated after connect errors
/// - rustls TLS
/// - Streaming downloads
///
/// HTTP status codes are returned as-is from [`HttpClient::execute`]; status
/// based retry belongs to the API connectors that know which codes are safe
/// to repeat.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a new HTTP client with custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                BridgeError::NotAvailable(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    /// Wrap an already configured reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(body) = request.body {
            req = req.body(body);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }

    fn map_transport_error(e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "request timed out",
            ))
        } else if e.is_connect() {
            BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection failed: {}", e.without_url()),
            ))
        } else {
            BridgeError::OperationFailed(e.without_url().to_string())
        }
    }

    /// A request that may have reached the server is only sent again when
    /// its method is idempotent; connect failures are always safe to repeat
    fn can_repeat(method: HttpMethod, error: &reqwest::Error) -> bool {
        error.is_connect() || method.is_idempotent()
    }

    async fn execute_with_retry_internal(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            // URLs may carry query strings with ids; log the host only
            debug!(
                attempt,
                max_attempts,
                host = reqwest::Url::parse(&request.url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_owned))
                    .unwrap_or_default(),
                "Executing HTTP request"
            );

            match self.build_request(request.clone()).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let headers: HashMap<String, String> = response
                        .headers()
                        .iter()
                        .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
                        .collect();

                    let body = response.bytes().await.map_err(Self::map_transport_error)?;

                    return Ok(HttpResponse {
                        status,
                        headers,
                        body,
                    });
                }
                Err(e) => {
                    let repeatable = Self::can_repeat(request.method, &e);
                    let error = Self::map_transport_error(e);
                    if attempt >= max_attempts || !error.is_transient() || !repeatable {
                        return Err(error);
                    }

                    let delay = policy.delay_for(attempt);

                    warn!(
                        error = %error,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "HTTP request failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute_with_retry(request, RetryPolicy::default()).await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        self.execute_with_retry_internal(request, policy).await
    }

    async fn download_stream(&self, request: HttpRequest) -> Result<ByteStream> {
        // Media downloads can legitimately outlast the client-wide timeout
        let request = HttpRequest {
            timeout: request.timeout.or(Some(Duration::from_secs(600))),
            ..request
        };

        let response = self
            .build_request(request)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BridgeError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let reader = tokio_util::io::StreamReader::new(stream);

        Ok(Box::new(reader))
    }
}
