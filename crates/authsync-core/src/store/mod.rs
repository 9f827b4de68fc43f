//! Shared application state.
//!
//! ```text
//! AppState
//! ├── auth: AuthState            (user, session, loading, error)
//! └── preferences: AppPreferences (onboarding, theme, language, notifications)
//! ```
//!
//! State changes only through [`Action`] values. [`Store::dispatch`] runs the
//! reducer under the channel lock, so readers observe either the state before
//! an action or after it, never a partial transition.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub mod auth;
pub mod preferences;

pub use auth::{AuthAction, AuthState};
pub use preferences::{
    AppPreferences, NotificationSettings, NotificationsPatch, PreferencesAction, ThemePreference,
};

/// Combined application state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    pub auth: AuthState,
    pub preferences: AppPreferences,
}

/// Any state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Auth(AuthAction),
    Preferences(PreferencesAction),
    /// Back to the initial state.
    ResetAll,
}

impl From<AuthAction> for Action {
    fn from(action: AuthAction) -> Self {
        Action::Auth(action)
    }
}

impl From<PreferencesAction> for Action {
    fn from(action: PreferencesAction) -> Self {
        Action::Preferences(action)
    }
}

/// The root reducer.
pub fn reduce(state: &mut AppState, action: Action) {
    match action {
        Action::Auth(action) => auth::reduce(&mut state.auth, action),
        Action::Preferences(action) => preferences::reduce(&mut state.preferences, action),
        Action::ResetAll => *state = AppState::default(),
    }
}

/// Handle to the single application state container.
///
/// Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct Store {
    tx: Arc<watch::Sender<AppState>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(AppState::default())
    }
}

impl Store {
    pub fn new(initial: AppState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Applies `action` atomically and notifies subscribers.
    pub fn dispatch(&self, action: impl Into<Action>) {
        let action = action.into();
        tracing::trace!(?action, "dispatch");
        self.tx.send_modify(|state| reduce(state, action));
    }

    /// Snapshot of the whole state.
    pub fn state(&self) -> AppState {
        self.tx.borrow().clone()
    }

    pub fn auth(&self) -> AuthState {
        self.tx.borrow().auth.clone()
    }

    pub fn preferences(&self) -> AppPreferences {
        self.tx.borrow().preferences.clone()
    }

    /// Receiver that is notified after every dispatch.
    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_all_restores_initial_state() {
        let store = Store::default();
        store.dispatch(AuthAction::SetError("boom".into()));
        store.dispatch(PreferencesAction::SetLanguage("pt".into()));
        store.dispatch(Action::ResetAll);
        assert_eq!(store.state(), AppState::default());
    }

    /// Clones share one container.
    #[test]
    fn test_clones_share_state() {
        let store = Store::default();
        let other = store.clone();
        other.dispatch(PreferencesAction::SetOnboardingCompleted(true));
        assert!(store.preferences().onboarding_completed);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let store = Store::default();
        let mut rx = store.subscribe();

        store.dispatch(AuthAction::SetLoading(true));

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().auth.loading);
    }
}
