//! Identity provider boundary.
//!
//! The session synchronizer only talks to the hosted auth service through
//! [`IdentityProvider`]. Wire shapes here mirror the GoTrue REST API; the rest
//! of the crate converts them into [`crate::model`] types.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::model::mask_token;

pub mod gotrue;
pub mod pkce;
pub mod redirect;

pub use gotrue::GoTrueClient;

// ============================================================================
// Errors
// ============================================================================

/// Categories of provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Request never completed (DNS, connect, TLS, reset)
    Network,
    /// Provider answered with an error payload
    Rejected,
    /// Response could not be decoded
    Parse,
    /// Local session storage failed
    Storage,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Network => write!(f, "network"),
            ProviderErrorKind::Rejected => write!(f, "rejected"),
            ProviderErrorKind::Parse => write!(f, "parse"),
            ProviderErrorKind::Storage => write!(f, "storage"),
        }
    }
}

/// Structured error from the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// Message passed through from the provider when it sent one
    pub message: String,
    /// HTTP status for rejected requests
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Parse, message)
    }

    pub fn storage(err: &anyhow::Error) -> Self {
        Self::new(ProviderErrorKind::Storage, format!("{err:#}"))
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Rejected,
            message: message.into(),
            status: Some(status),
        }
    }

    /// Builds a rejection from an HTTP error response body.
    ///
    /// GoTrue uses several error shapes depending on the endpoint and
    /// version; the first of `msg`, `message`, `error_description`, `error`
    /// wins. Non-JSON bodies fall back to `HTTP <status>`.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|json| {
                ["msg", "message", "error_description", "error"]
                    .iter()
                    .find_map(|key| json.get(key).and_then(Value::as_str).map(str::to_string))
            })
            .filter(|msg| !msg.trim().is_empty())
            .unwrap_or_else(|| format!("HTTP {status}"));
        Self::rejected(status, message)
    }

    /// True when the provider says the session no longer exists server-side.
    pub fn is_session_missing(&self) -> bool {
        self.kind == ProviderErrorKind::Rejected && matches!(self.status, Some(401 | 403 | 404))
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ============================================================================
// Wire types
// ============================================================================

/// User record as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(default)]
    pub app_metadata: Value,
    #[serde(default)]
    pub email_confirmed_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl ProviderUser {
    /// First non-empty string among the given `user_metadata` keys.
    pub fn metadata_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| {
            self.user_metadata
                .get(key)
                .and_then(Value::as_str)
                .filter(|v| !v.trim().is_empty())
        })
    }
}

/// Session bundle as returned by the token endpoint.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Unix seconds
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: ProviderUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl ProviderSession {
    /// Fills `expires_at` from `expires_in` when the provider omitted it.
    #[must_use]
    pub fn with_expiry(mut self, now_secs: i64) -> Self {
        if self.expires_at.is_none()
            && let Some(expires_in) = self.expires_in
        {
            self.expires_at = Some(now_secs + expires_in);
        }
        self
    }

    /// True if the access token expires within `margin_secs` of `now_secs`.
    /// Sessions without an expiry never expire locally.
    pub fn expires_within(&self, now_secs: i64, margin_secs: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now_secs + margin_secs)
    }
}

impl fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSession")
            .field("access_token", &mask_token(&self.access_token))
            .field("refresh_token", &mask_token(&self.refresh_token))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("user", &self.user.id)
            .finish()
    }
}

/// Sign-up payload.
#[derive(Clone)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub redirect_to: Option<String>,
}

impl fmt::Debug for SignUpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignUpRequest")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("redirect_to", &self.redirect_to)
            .finish_non_exhaustive()
    }
}

/// Sign-up result: a session is only present when no confirmation is required.
#[derive(Debug, Clone, Default)]
pub struct SignUpResponse {
    pub user: Option<ProviderUser>,
    pub session: Option<ProviderSession>,
}

/// OAuth identity providers offered by the hosted service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OAuthProvider {
    Google,
    GitHub,
    Apple,
    Other(String),
}

impl OAuthProvider {
    pub fn as_str(&self) -> &str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::GitHub => "github",
            OAuthProvider::Apple => "apple",
            OAuthProvider::Other(name) => name,
        }
    }

    /// Extra authorize query params the provider needs for refresh tokens.
    pub fn default_query_params(&self) -> Vec<(String, String)> {
        match self {
            OAuthProvider::Google => vec![
                ("access_type".to_string(), "offline".to_string()),
                ("prompt".to_string(), "consent".to_string()),
            ],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        match name.as_str() {
            "" => Err("OAuth provider cannot be empty".to_string()),
            "google" => Ok(OAuthProvider::Google),
            "github" => Ok(OAuthProvider::GitHub),
            "apple" => Ok(OAuthProvider::Apple),
            _ => Ok(OAuthProvider::Other(name)),
        }
    }
}

/// OAuth authorization request.
#[derive(Debug, Clone)]
pub struct OAuthRequest {
    pub provider: OAuthProvider,
    pub redirect_to: String,
    pub query_params: Vec<(String, String)>,
}

/// User attribute update; only set fields are sent.
#[derive(Clone, Default, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Debug for UserUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserUpdate")
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("data", &self.data)
            .finish()
    }
}

// ============================================================================
// Events
// ============================================================================

/// Auth state change kinds emitted by the provider client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthEventKind::SignedIn => "SIGNED_IN",
            AuthEventKind::SignedOut => "SIGNED_OUT",
            AuthEventKind::TokenRefreshed => "TOKEN_REFRESHED",
            AuthEventKind::UserUpdated => "USER_UPDATED",
            AuthEventKind::PasswordRecovery => "PASSWORD_RECOVERY",
        };
        write!(f, "{name}")
    }
}

/// One auth state change.
#[derive(Debug, Clone)]
pub struct AuthChangeEvent {
    pub kind: AuthEventKind,
    pub session: Option<ProviderSession>,
}

impl AuthChangeEvent {
    pub fn new(kind: AuthEventKind, session: Option<ProviderSession>) -> Self {
        Self { kind, session }
    }
}

/// Event channel sender held by the provider client.
pub type AuthEventTx = mpsc::UnboundedSender<AuthChangeEvent>;

/// Event channel receiver handed to subscribers.
pub type AuthEventRx = mpsc::UnboundedReceiver<AuthChangeEvent>;

/// Fan-out list of auth event subscribers.
///
/// Closed receivers are pruned on the next emit.
#[derive(Debug, Default)]
pub struct AuthEventHub {
    listeners: std::sync::Mutex<Vec<AuthEventTx>>,
}

impl AuthEventHub {
    pub fn subscribe(&self) -> AuthEventRx {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: &AuthChangeEvent) {
        tracing::debug!(event = %event.kind, "auth state change");
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuthEventTx>> {
        // A poisoned list still holds valid senders.
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// ============================================================================
// Provider trait
// ============================================================================

/// Hosted authentication backend.
///
/// Implementations own the provider session (persisting it as they see fit)
/// and report changes through [`IdentityProvider::on_auth_state_change`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Registers a user. No session in the response means the provider
    /// requires email confirmation first.
    async fn sign_up(&self, request: &SignUpRequest) -> ProviderResult<SignUpResponse>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> ProviderResult<ProviderSession>;

    /// Sends a magic link.
    async fn sign_in_with_otp(&self, email: &str, redirect_to: &str) -> ProviderResult<()>;

    /// Returns the authorization URL to open in a browser.
    async fn sign_in_with_oauth(&self, request: &OAuthRequest) -> ProviderResult<Url>;

    /// Establishes a session from a redirect URL (OAuth, magic link, recovery).
    async fn exchange_redirect(&self, redirect_url: &str) -> ProviderResult<ProviderSession>;

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str)
    -> ProviderResult<()>;

    async fn update_user(&self, update: &UserUpdate) -> ProviderResult<ProviderUser>;

    async fn sign_out(&self) -> ProviderResult<()>;

    async fn get_session(&self) -> ProviderResult<Option<ProviderSession>>;

    async fn get_user(&self) -> ProviderResult<Option<ProviderUser>>;

    /// Subscribes to auth state changes.
    fn on_auth_state_change(&self) -> AuthEventRx;
}
