//! Error taxonomy surfaced by session operations.
//!
//! Every failure crossing into the caller is one of four kinds, each carrying
//! a message suitable for display.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{ProviderError, ProviderErrorKind};
use crate::validation::FormField;

/// Message used when a failure has no better description.
pub const UNEXPECTED_MESSAGE: &str = "An unexpected error occurred";

/// Categories of auth errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    /// Client-side form check failed; no request was sent.
    Validation,
    /// The provider rejected the request (bad credentials, rate limit, ...).
    Provider,
    /// Transport failure before a response arrived.
    Network,
    /// Local failure such as an unparseable provider response.
    Unexpected,
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthErrorKind::Validation => write!(f, "validation"),
            AuthErrorKind::Provider => write!(f, "provider"),
            AuthErrorKind::Network => write!(f, "network"),
            AuthErrorKind::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// Structured auth error with kind and display message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Form field that failed validation, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FormField>,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field: None,
        }
    }

    /// Creates a validation error attached to a form field.
    pub fn validation(field: FormField, message: impl Into<String>) -> Self {
        Self {
            kind: AuthErrorKind::Validation,
            message: message.into(),
            field: Some(field),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Provider, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Network, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Unexpected, message)
    }

    pub fn is_validation(&self) -> bool {
        self.kind == AuthErrorKind::Validation
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AuthError {}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        let kind = match err.kind {
            ProviderErrorKind::Rejected => AuthErrorKind::Provider,
            ProviderErrorKind::Network => AuthErrorKind::Network,
            ProviderErrorKind::Parse | ProviderErrorKind::Storage => AuthErrorKind::Unexpected,
        };
        let message = if err.message.trim().is_empty() {
            UNEXPECTED_MESSAGE.to_string()
        } else {
            err.message
        };
        Self::new(kind, message)
    }
}

/// Result type for auth operations.
pub type AuthResult<T> = std::result::Result<T, AuthError>;
