//! Auth slice: who is signed in and what the last operation did.

use serde::{Deserialize, Serialize};

use crate::model::{AuthStatus, Session, User};

/// Auth slice state.
///
/// `loading == true` implies `error.is_none()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub user: Option<User>,
    pub session: Option<Session>,
    pub loading: bool,
    pub error: Option<String>,
}

impl AuthState {
    /// Authenticated iff both user and session are present.
    pub fn status(&self) -> AuthStatus {
        if self.user.is_some() && self.session.is_some() {
            AuthStatus::Authenticated
        } else {
            AuthStatus::Unauthenticated
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == AuthStatus::Authenticated
    }
}

/// Named transitions of the auth slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    /// `true` also clears the previous error.
    SetLoading(bool),
    /// Writes user and session together; clears loading and error.
    Authenticated { user: User, session: Session },
    /// Replaces the user; clears loading and error.
    SetUser(Option<User>),
    SetSession(Option<Session>),
    /// Records an error; clears loading.
    SetError(String),
    /// Clears user, session, loading and error.
    SignedOut,
    ClearError,
}

/// Applies one action to the auth slice.
pub fn reduce(state: &mut AuthState, action: AuthAction) {
    match action {
        AuthAction::SetLoading(loading) => {
            state.loading = loading;
            if loading {
                state.error = None;
            }
        }
        AuthAction::Authenticated { user, session } => {
            state.user = Some(user);
            state.session = Some(session);
            state.loading = false;
            state.error = None;
        }
        AuthAction::SetUser(user) => {
            state.user = user;
            state.loading = false;
            state.error = None;
        }
        AuthAction::SetSession(session) => {
            state.session = session;
        }
        AuthAction::SetError(message) => {
            state.error = Some(message);
            state.loading = false;
        }
        AuthAction::SignedOut => {
            *state = AuthState::default();
        }
        AuthAction::ClearError => {
            state.error = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::model::AuthProvider;

    fn user() -> User {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        User {
            id: "u1".into(),
            email: "ann@x.com".into(),
            name: Some("Ann".into()),
            avatar: None,
            provider: AuthProvider::Email,
            email_verified: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn session() -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            token_type: "bearer".into(),
            expires_at: None,
        }
    }

    #[test]
    fn test_set_loading_clears_error() {
        let mut state = AuthState {
            error: Some("Invalid login credentials".into()),
            ..AuthState::default()
        };
        reduce(&mut state, AuthAction::SetLoading(true));
        assert!(state.loading);
        assert_eq!(state.error, None);

        state.error = Some("kept".into());
        reduce(&mut state, AuthAction::SetLoading(false));
        assert_eq!(state.error.as_deref(), Some("kept"));
    }

    #[test]
    fn test_set_error_clears_loading() {
        let mut state = AuthState::default();
        reduce(&mut state, AuthAction::SetLoading(true));
        reduce(&mut state, AuthAction::SetError("boom".into()));
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_authenticated_writes_both() {
        let mut state = AuthState::default();
        reduce(&mut state, AuthAction::SetLoading(true));
        reduce(
            &mut state,
            AuthAction::Authenticated {
                user: user(),
                session: session(),
            },
        );
        assert_eq!(
            state,
            AuthState {
                user: Some(user()),
                session: Some(session()),
                loading: false,
                error: None,
            }
        );
        assert!(state.is_authenticated());
    }

    #[test]
    fn test_signed_out_resets_slice() {
        let mut state = AuthState {
            user: Some(user()),
            session: Some(session()),
            loading: true,
            error: None,
        };
        reduce(&mut state, AuthAction::SignedOut);
        assert_eq!(state, AuthState::default());
        assert_eq!(state.status(), AuthStatus::Unauthenticated);
    }

    #[test]
    fn test_user_without_session_is_unauthenticated() {
        let mut state = AuthState::default();
        reduce(&mut state, AuthAction::SetUser(Some(user())));
        assert_eq!(state.status(), AuthStatus::Unauthenticated);
        reduce(&mut state, AuthAction::SetSession(Some(session())));
        assert_eq!(state.status(), AuthStatus::Authenticated);
    }
}
