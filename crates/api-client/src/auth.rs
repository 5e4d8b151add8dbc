//! Auth endpoint payloads and calls
//!
//! This module models the backend's `/auth/*` contract and performs the raw,
//! stateless calls. It never touches session state; [`crate::SessionManager`]
//! decides what to do with the results.

use crate::rest::{Envelope, RestClient, RestError, RestRequest};
use crate::session::AuthError;
use serde::{Deserialize, Serialize};

/// Login endpoint
pub const LOGIN_PATH: &str = "/auth/login";

/// Registration endpoint
pub const REGISTER_PATH: &str = "/auth/register";

/// Token refresh endpoint
pub const REFRESH_PATH: &str = "/auth/refresh-token";

/// Identity snapshot of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Backend user id
    #[serde(alias = "_id")]
    pub id: String,
    /// Email address
    pub email: String,
    /// Display name
    pub name: String,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Role (e.g., "user", "host")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Kind of account created at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Traveller booking tours
    User,
    /// Host offering places and tours
    Host,
}

/// Access/refresh credential pair
///
/// Serializes to the `{accessToken, refreshToken}` shape used both on the
/// wire and in the persisted record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// Short-lived bearer credential
    pub access_token: String,
    /// Long-lived credential exchanged for a new pair
    pub refresh_token: String,
}

impl TokenPair {
    /// Create a new token pair
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Whether both tokens are present
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }
}

// Tokens never appear in logs or panic messages.
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Login request body
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Email address
    pub email: String,
    /// Password
    pub password: String,
}

/// Login response payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    /// Signed-in user
    pub user: User,
    /// Access token
    pub access_token: String,
    /// Refresh token
    pub refresh_token: String,
}

impl LoginData {
    /// The issued token pair
    pub fn token_pair(&self) -> TokenPair {
        TokenPair::new(&self.access_token, &self.refresh_token)
    }
}

/// Registration request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Email address
    pub email: String,
    /// Password
    pub password: String,
    /// Display name
    pub name: String,
    /// Account kind
    pub account_type: AccountType,
}

/// Registration response payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterData {
    /// Access token
    pub access_token: String,
    /// Refresh token
    pub refresh_token: String,
}

/// Refresh request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    /// Refresh token being exchanged
    pub refresh_token: String,
}

/// Refresh response payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshData {
    /// New access token
    pub access_token: String,
    /// New refresh token
    pub refresh_token: String,
    /// Current profile, when the backend includes it
    #[serde(default)]
    pub user: Option<User>,
}

impl RefreshData {
    /// The rotated token pair
    pub fn token_pair(&self) -> TokenPair {
        TokenPair::new(&self.access_token, &self.refresh_token)
    }
}

/// Stateless caller of the `/auth/*` endpoints
#[derive(Debug, Clone)]
pub struct AuthApi {
    client: RestClient,
}

impl AuthApi {
    /// Create an auth API caller over `client`
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    /// `POST /auth/login`
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginData, AuthError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let request = RestRequest::post(LOGIN_PATH)
            .json_body(&body)
            .map_err(encode_error)?;

        self.call(&request, AuthError::InvalidCredentials).await
    }

    /// `POST /auth/register`
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        account_type: AccountType,
    ) -> Result<RegisterData, AuthError> {
        let body = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.to_string(),
            account_type,
        };
        let request = RestRequest::post(REGISTER_PATH)
            .json_body(&body)
            .map_err(encode_error)?;

        self.call(&request, AuthError::RegistrationFailed).await
    }

    /// `POST /auth/refresh-token`
    ///
    /// The current access token, even if expired, rides along as the bearer
    /// credential. Every failure, transport included, is a
    /// [`AuthError::RefreshFailed`].
    pub async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<RefreshData, AuthError> {
        let body = RefreshRequest { refresh_token: refresh_token.to_string() };
        let request = RestRequest::post(REFRESH_PATH)
            .json_body(&body)
            .map_err(encode_error)?
            .bearer(access_token);

        let response = self
            .client
            .execute::<Envelope<RefreshData>>(&request)
            .await
            .map_err(|e| AuthError::RefreshFailed(e.message().to_string()))?;

        response.data.into_data().map_err(AuthError::RefreshFailed)
    }

    /// Execute and unwrap an envelope, classifying failures
    async fn call<T>(
        &self,
        request: &RestRequest,
        rejected: fn(String) -> AuthError,
    ) -> Result<T, AuthError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .execute::<Envelope<T>>(request)
            .await
            .map_err(|e| classify(e, rejected))?;

        response.data.into_data().map_err(rejected)
    }
}

/// Map a transport/HTTP failure onto the typed auth error kinds
pub(crate) fn classify(error: RestError, rejected: fn(String) -> AuthError) -> AuthError {
    if error.is_timeout() {
        AuthError::NetworkTimeout(error.message().to_string())
    } else if error.is_transport_error() || matches!(error.status(), 502 | 503 | 504) {
        AuthError::NetworkUnavailable(error.message().to_string())
    } else {
        rejected(error.message().to_string())
    }
}

fn encode_error(e: serde_json::Error) -> AuthError {
    AuthError::Request(RestError::new(0, "EncodeError", e.to_string()))
}
