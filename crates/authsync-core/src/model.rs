//! Application-side user and session model.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::identity::{ProviderSession, ProviderUser};

/// Returns a masked version of a token for display (first 12 chars + ...).
pub fn mask_token(token: &str) -> String {
    if token.len() <= 16 {
        return "***".to_string();
    }
    match token.get(..12) {
        Some(prefix) => format!("{prefix}..."),
        None => "***".to_string(),
    }
}

/// How the user authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthProvider {
    Email,
    Google,
    Other(String),
}

impl AuthProvider {
    pub fn as_str(&self) -> &str {
        match self {
            AuthProvider::Email => "email",
            AuthProvider::Google => "google",
            AuthProvider::Other(name) => name,
        }
    }
}

impl From<String> for AuthProvider {
    fn from(value: String) -> Self {
        match value.as_str() {
            "email" => AuthProvider::Email,
            "google" => AuthProvider::Google,
            _ => AuthProvider::Other(value),
        }
    }
}

impl From<AuthProvider> for String {
    fn from(value: AuthProvider) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub provider: AuthProvider,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Returns a copy with a new display name (the profile-update transition).
    #[must_use]
    pub fn with_name(&self, name: &str) -> Self {
        Self {
            name: Some(name.trim().to_string()).filter(|n| !n.is_empty()),
            ..self.clone()
        }
    }

    /// Name if set, email otherwise.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

fn parse_timestamp(field: &str, value: &str) -> AuthResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AuthError::unexpected(format!("Invalid {field} timestamp '{value}': {e}")))
}

impl TryFrom<&ProviderUser> for User {
    type Error = AuthError;

    fn try_from(user: &ProviderUser) -> AuthResult<Self> {
        let created_raw = user
            .created_at
            .as_deref()
            .ok_or_else(|| AuthError::unexpected("Provider user is missing created_at"))?;
        let created_at = parse_timestamp("created_at", created_raw)?;
        let updated_at = match user.updated_at.as_deref() {
            Some(raw) if !raw.is_empty() => parse_timestamp("updated_at", raw)?,
            _ => created_at,
        };

        let provider = user
            .app_metadata
            .get("provider")
            .and_then(serde_json::Value::as_str)
            .filter(|p| !p.is_empty())
            .map_or(AuthProvider::Email, |p| AuthProvider::from(p.to_string()));

        Ok(Self {
            id: user.id.clone(),
            email: user.email.clone().unwrap_or_default(),
            name: user
                .metadata_str(&["full_name", "name"])
                .map(str::to_string),
            avatar: user
                .metadata_str(&["avatar_url", "picture"])
                .map(str::to_string),
            provider,
            email_verified: user.email_confirmed_at.is_some(),
            created_at,
            updated_at,
        })
    }
}

/// Bearer credential bundle issued by the provider.
///
/// The application does not interpret the tokens; it only hands them back to
/// the provider client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Unix seconds
    pub expires_at: Option<i64>,
}

impl From<&ProviderSession> for Session {
    fn from(session: &ProviderSession) -> Self {
        Self {
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            token_type: session.token_type.clone(),
            expires_at: session.expires_at,
        }
    }
}

impl Session {
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &mask_token(&self.access_token))
            .field("refresh_token", &mask_token(&self.refresh_token))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Converts a provider session into the canonical pair.
///
/// # Errors
/// Returns an unexpected error if the embedded user is malformed.
pub fn transform_session(session: &ProviderSession) -> AuthResult<(User, Session)> {
    let user = User::try_from(&session.user)?;
    Ok((user, Session::from(session)))
}

/// Authenticated/unauthenticated axis of the auth slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Unauthenticated,
    Authenticated,
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStatus::Unauthenticated => write!(f, "unauthenticated"),
            AuthStatus::Authenticated => write!(f, "authenticated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn provider_user(value: serde_json::Value) -> ProviderUser {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_transform_user_metadata_fallbacks() {
        let user = User::try_from(&provider_user(json!({
            "id": "u1",
            "email": "ann@x.com",
            "user_metadata": {"name": "Ann", "picture": "https://img.test/a.png"},
            "app_metadata": {"provider": "google"},
            "email_confirmed_at": "2024-05-01T10:00:00Z",
            "created_at": "2024-05-01T09:00:00.123456Z",
            "updated_at": "2024-05-02T09:00:00Z"
        })))
        .unwrap();

        assert_eq!(user.name.as_deref(), Some("Ann"));
        assert_eq!(user.avatar.as_deref(), Some("https://img.test/a.png"));
        assert_eq!(user.provider, AuthProvider::Google);
        assert!(user.email_verified);
        assert!(user.updated_at > user.created_at);
    }

    #[test]
    fn test_transform_user_defaults() {
        let user = User::try_from(&provider_user(json!({
            "id": "u2",
            "user_metadata": {"full_name": "Bo", "name": "Ignored"},
            "created_at": "2024-05-01T09:00:00Z"
        })))
        .unwrap();

        assert_eq!(user.email, "");
        assert_eq!(user.name.as_deref(), Some("Bo"));
        assert_eq!(user.avatar, None);
        assert_eq!(user.provider, AuthProvider::Email);
        assert!(!user.email_verified);
        assert_eq!(user.updated_at, user.created_at);
    }

    #[test]
    fn test_transform_user_bad_timestamp_is_unexpected() {
        let err = User::try_from(&provider_user(json!({
            "id": "u3",
            "created_at": "yesterday"
        })))
        .unwrap_err();
        assert_eq!(err.kind, crate::error::AuthErrorKind::Unexpected);

        let err = User::try_from(&provider_user(json!({"id": "u4"}))).unwrap_err();
        assert!(err.message.contains("created_at"));
    }

    #[test]
    fn test_with_name_trims_and_clears() {
        let user = User::try_from(&provider_user(json!({
            "id": "u1",
            "email": "ann@x.com",
            "created_at": "2024-05-01T09:00:00Z"
        })))
        .unwrap();
        assert_eq!(user.display_name(), "ann@x.com");
        assert_eq!(user.with_name("  Ann ").name.as_deref(), Some("Ann"));
        assert_eq!(user.with_name("   ").name, None);
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("eyJhbGciOiJIUzI1NiIsInR5cCI6"), "eyJhbGciOiJI...");
        assert_eq!(mask_token("short"), "***");
    }

    #[test]
    fn test_session_debug_masks_tokens() {
        let session = Session {
            access_token: "access-token-that-is-long".into(),
            refresh_token: "r".into(),
            token_type: "bearer".into(),
            expires_at: Some(1_700_000_000),
        };
        let debug = format!("{session:?}");
        assert!(!debug.contains("access-token-that-is-long"));
        assert!(session.expires_at_utc().is_some());
    }
}
