//! REST client implementation
//!
//! This module implements the HTTP plumbing shared by every Tourbook API
//! call: request/response types, the `{success, data}` envelope, transport
//! error mapping, and the client itself. Credentials are not handled here;
//! the session layer decorates requests before they reach [`RestClient`].

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Environment variable holding the backend base URL
pub const API_URL_ENV: &str = "TOURBOOK_API_URL";

/// Base URL used when [`API_URL_ENV`] is unset
pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";

// =============================================================================
// Error Types
// =============================================================================

/// Failed REST call
///
/// Transport failures (timeouts, refused connections, unreadable bodies)
/// use status `0` so they can never be mistaken for a server response.
///
/// # Examples
/// ```
/// use api_client::rest::RestError;
///
/// let error = RestError::new(401, "Unauthorized", "Token expired");
/// assert!(error.is_unauthorized());
/// assert!(!error.is_network_error());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestError {
    status: u16,
    code: String,
    message: String,
}

impl RestError {
    /// Build an error from its parts
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Request did not complete within the client timeout
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(0, "Timeout", message)
    }

    /// Backend could not be reached
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(0, "NetworkError", message)
    }

    /// HTTP status, or `0` when no response arrived
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Short machine-readable code (e.g., "Unauthorized", "Timeout")
    pub fn error(&self) -> &str {
        &self.code
    }

    /// Human-readable message, preferably the backend's own
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the backend rejected the request's credentials
    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED.as_u16()
    }

    /// Whether the request timed out
    pub fn is_timeout(&self) -> bool {
        self.status == 0 && self.code == "Timeout"
    }

    /// Whether no HTTP response was received at all
    pub fn is_transport_error(&self) -> bool {
        self.status == 0
    }

    /// Transport failure or a gateway/availability status
    pub fn is_network_error(&self) -> bool {
        matches!(self.status, 0 | 408 | 429 | 502 | 503 | 504)
    }
}

impl std::fmt::Display for RestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {} {}: {}", self.status, self.code, self.message)
    }
}

impl std::error::Error for RestError {}

fn transport_error(e: reqwest::Error) -> RestError {
    if e.is_timeout() {
        RestError::timeout(format!("Request timed out: {}", e))
    } else {
        RestError::network(format!("Request failed: {}", e))
    }
}

// =============================================================================
// Request Types
// =============================================================================

/// A call to the backend, relative to the configured base URL
///
/// Requests are plain data so the session layer can re-send one after a
/// token refresh. `retried` marks a request that has already been replayed
/// once and must not trigger another refresh.
#[derive(Debug, Clone)]
pub struct RestRequest {
    /// HTTP method
    pub method: Method,
    /// Path relative to the base URL (e.g., "/auth/login")
    pub path: String,
    /// Query parameters, in insertion order
    pub params: Vec<(String, String)>,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// JSON body
    pub body: Option<serde_json::Value>,
    /// Bearer credential, sent as `Authorization: Bearer <token>`
    pub bearer: Option<String>,
    /// Whether this request is already a post-refresh replay
    pub retried: bool,
}

impl RestRequest {
    /// Request with `method` to `path`
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: None,
            bearer: None,
            retried: false,
        }
    }

    /// `GET path`
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path`
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Append a query parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Serialize `value` as the JSON body
    pub fn json_body<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_value(value)?);
        Ok(self)
    }

    /// Attach `token` as the bearer credential, replacing any previous one
    pub fn set_bearer(&mut self, token: &str) {
        self.bearer = Some(token.to_string());
    }

    /// Builder form of [`RestRequest::set_bearer`]
    pub fn bearer(mut self, token: &str) -> Self {
        self.set_bearer(token);
        self
    }

    /// The bearer token currently attached, if any
    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer.as_deref()
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Successful response with its decoded body
#[derive(Debug, Clone)]
pub struct RestResponse<T> {
    /// HTTP status
    pub status: u16,
    /// Response headers, lowercase names
    pub headers: HashMap<String, String>,
    /// Decoded body
    pub data: T,
}

impl<T> RestResponse<T> {
    /// Header value by lowercase name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        StatusCode::from_u16(self.status).is_ok_and(|s| s.is_success())
    }
}

/// The backend's uniform `{success, data}` response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Whether the backend considers the call successful
    pub success: bool,
    /// Payload, present on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Human-readable message, usually present on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// Wrap a successful payload
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), message: None }
    }

    /// Unwrap the payload, or return the server's message on failure
    pub fn into_data(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err("Response envelope carried no data".to_string()),
            (false, _) => Err(self
                .message
                .unwrap_or_else(|| "Request was not successful".to_string())),
        }
    }
}

/// Error body fields the backend is observed to send
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Connection settings for [`RestClient`]
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// Backend base URL (e.g., "https://api.tourbook.app")
    pub base_url: String,
    /// Applied to every call; expiry surfaces as [`RestError::timeout`]
    pub timeout: Duration,
    /// Sent with every call
    pub user_agent: String,
    /// Sent with every call
    pub default_headers: Vec<(String, String)>,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(10),
            user_agent: concat!("Tourbook/", env!("CARGO_PKG_VERSION")).to_string(),
            default_headers: Vec::new(),
        }
    }
}

impl RestClientConfig {
    /// Defaults pointed at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Read the base URL from [`API_URL_ENV`], falling back to the default
    pub fn from_env() -> Self {
        match std::env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }

    /// Override the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add a header sent with every call
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }
}

// =============================================================================
// Client Implementation
// =============================================================================

/// HTTP client bound to one backend base URL
///
/// # Examples
/// ```no_run
/// use api_client::rest::{RestClient, RestClientConfig, RestRequest};
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let client = RestClient::new(RestClientConfig::new("https://api.example.com"))?;
///
///     let request = RestRequest::get("/tour").param("limit", "10");
///     let response = client.execute::<serde_json::Value>(&request).await?;
///
///     println!("Status: {}", response.status);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    config: RestClientConfig,
}

impl RestClient {
    /// Build a client; fails on an unusable default header
    pub fn new(config: RestClientConfig) -> Result<Self, RestError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RestError::new(0, "ClientBuild", e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RestError::new(0, "ClientBuild", e.to_string()))?;
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(|e| RestError::new(0, "ClientBuild", e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Send `request` and decode a 2xx JSON body as `T`
    ///
    /// Non-2xx responses become a [`RestError`] carrying the status, the
    /// body's `error` code (or the status reason) and its `message`.
    pub async fn execute<T>(&self, request: &RestRequest) -> Result<RestResponse<T>, RestError>
    where
        T: DeserializeOwned,
    {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url_for(&request.path));

        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        let data = serde_json::from_str(&text).map_err(|e| {
            RestError::new(status.as_u16(), "ParseError", format!("Failed to parse JSON: {}", e))
        })?;

        Ok(RestResponse { status: status.as_u16(), headers, data })
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Client configuration
    pub fn config(&self) -> &RestClientConfig {
        &self.config
    }

    /// Backend base URL
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }
}

fn status_error(status: StatusCode, body: &str) -> RestError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.error.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Unknown")
            .replace(' ', "")
    });
    let message = parsed
        .message
        .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), body));

    RestError::new(status.as_u16(), code, message)
}

// =============================================================================
// Tests
// =============================================================================
