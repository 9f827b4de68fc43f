//! Session synchronizer.
//!
//! Bridges the identity provider and the shared store. Every operation
//! validates input first (validation failures never touch the store), then
//! marks the auth slice as loading, calls the provider and writes the
//! transformed result or the error. Provider events are consumed by one
//! listener task that owns the event-driven writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::{Platform, RedirectConfig};
use crate::error::{AuthError, AuthResult};
use crate::identity::redirect::{AuthBrowser, BrowserResult, redirect_to};
use crate::identity::{
    AuthChangeEvent, AuthEventKind, IdentityProvider, OAuthProvider, OAuthRequest,
    ProviderSession, SignUpRequest, UserUpdate,
};
use crate::model::{Session, User, transform_session};
use crate::store::{AuthAction, Store};
use crate::validation::{
    validate_email, validate_login, validate_name, validate_new_password, validate_registration,
};

/// Result of [`SessionSynchronizer::sign_up`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// Confirmation is off; the user is signed in.
    Confirmed { user: User, session: Session },
    /// A confirmation email was sent; nobody is signed in yet.
    PendingEmailConfirmation { email: String },
    Failed(AuthError),
}

/// Result of [`SessionSynchronizer::sign_in`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    Success { user: User, session: Session },
    Failed(AuthError),
}

/// Result of [`SessionSynchronizer::sign_in_with_magic_link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MagicLinkOutcome {
    Sent,
    Failed(AuthError),
}

/// Result of [`SessionSynchronizer::sign_in_with_oauth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthOutcome {
    /// The flow was started. On the web platform the caller must navigate to
    /// `authorization_url`; on native the redirect has already been handed to
    /// the provider.
    Initiated { authorization_url: Url },
    /// The browser session was closed or timed out.
    Cancelled,
    Failed(AuthError),
}

/// Result of requests without a payload (sign-out, password and profile
/// updates, redirects).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failed(AuthError),
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success)
    }
}

/// Keeps the auth slice in step with the identity provider.
pub struct SessionSynchronizer {
    provider: Arc<dyn IdentityProvider>,
    store: Store,
    browser: Arc<dyn AuthBrowser>,
    redirect: RedirectConfig,
    listener_started: AtomicBool,
}

impl SessionSynchronizer {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Store,
        browser: Arc<dyn AuthBrowser>,
        redirect: RedirectConfig,
    ) -> Self {
        Self {
            provider,
            store,
            browser,
            redirect,
            listener_started: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Subscribes to provider events and spawns the listener task.
    ///
    /// # Errors
    /// Returns an error if the listener is already running.
    pub fn start(&self) -> AuthResult<JoinHandle<()>> {
        if self
            .listener_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AuthError::unexpected("Auth listener is already running"));
        }

        let mut rx = self.provider.on_auth_state_change();
        let provider = Arc::clone(&self.provider);
        let store = self.store.clone();

        Ok(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                apply_event(provider.as_ref(), &store, event).await;
            }
            tracing::debug!("auth event stream closed");
        }))
    }

    /// Applies one provider event to the store, as the listener task does.
    pub async fn handle_event(&self, event: AuthChangeEvent) {
        apply_event(self.provider.as_ref(), &self.store, event).await;
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    pub async fn sign_up(&self, name: &str, email: &str, password: &str) -> SignUpOutcome {
        if let Some(err) = validate_registration(name, email, password, None).first() {
            return SignUpOutcome::Failed(err);
        }
        self.begin();

        match self.try_sign_up(name.trim(), email.trim(), password).await {
            Ok(Some((user, session))) => {
                self.authenticated(&user, &session);
                SignUpOutcome::Confirmed { user, session }
            }
            Ok(None) => {
                self.store.dispatch(AuthAction::SetLoading(false));
                SignUpOutcome::PendingEmailConfirmation {
                    email: email.trim().to_string(),
                }
            }
            Err(err) => SignUpOutcome::Failed(self.fail(err)),
        }
    }

    async fn try_sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> AuthResult<Option<(User, Session)>> {
        let request = SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.to_string(),
            redirect_to: Some(redirect_to(&self.redirect, &self.redirect.callback_path)?),
        };
        let response = self.provider.sign_up(&request).await?;
        response
            .session
            .as_ref()
            .map(transform_session)
            .transpose()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> SignInOutcome {
        if let Some(err) = validate_login(email, password).first() {
            return SignInOutcome::Failed(err);
        }
        self.begin();

        let result = match self
            .provider
            .sign_in_with_password(email.trim(), password)
            .await
        {
            Ok(session) => transform_session(&session),
            Err(err) => Err(err.into()),
        };
        match result {
            Ok((user, session)) => {
                self.authenticated(&user, &session);
                SignInOutcome::Success { user, session }
            }
            Err(err) => SignInOutcome::Failed(self.fail(err)),
        }
    }

    pub async fn sign_in_with_magic_link(&self, email: &str) -> MagicLinkOutcome {
        if let Err(err) = validate_email(email) {
            return MagicLinkOutcome::Failed(err);
        }
        self.begin();

        let result = async {
            let redirect = redirect_to(&self.redirect, &self.redirect.callback_path)?;
            self.provider
                .sign_in_with_otp(email.trim(), &redirect)
                .await?;
            AuthResult::Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.store.dispatch(AuthAction::SetLoading(false));
                MagicLinkOutcome::Sent
            }
            Err(err) => MagicLinkOutcome::Failed(self.fail(err)),
        }
    }

    pub async fn sign_in_with_oauth(&self, provider: OAuthProvider) -> OAuthOutcome {
        self.begin();
        match self.try_oauth(provider).await {
            Ok(Some((authorization_url, established))) => {
                match established {
                    Some((user, session)) => self.authenticated(&user, &session),
                    None => self.store.dispatch(AuthAction::SetLoading(false)),
                }
                OAuthOutcome::Initiated { authorization_url }
            }
            Ok(None) => {
                self.store.dispatch(AuthAction::SetLoading(false));
                OAuthOutcome::Cancelled
            }
            Err(err) => OAuthOutcome::Failed(self.fail(err)),
        }
    }

    /// `Ok(None)` when the browser session was dismissed.
    async fn try_oauth(
        &self,
        provider: OAuthProvider,
    ) -> AuthResult<Option<(Url, Option<(User, Session)>)>> {
        let path = &self.redirect.callback_path;
        let redirect_uri = match self.redirect.platform {
            Platform::Web => redirect_to(&self.redirect, path)?,
            Platform::Native => self
                .browser
                .prepare_redirect(path)
                .await
                .map_err(|e| AuthError::unexpected(format!("{e:#}")))?,
        };

        let request = OAuthRequest {
            query_params: provider.default_query_params(),
            provider,
            redirect_to: redirect_uri.clone(),
        };
        let authorization_url = self.provider.sign_in_with_oauth(&request).await?;

        if self.redirect.platform == Platform::Web {
            return Ok(Some((authorization_url, None)));
        }

        let result = self
            .browser
            .open_auth_session(&authorization_url, &redirect_uri)
            .await
            .map_err(|e| AuthError::unexpected(format!("{e:#}")))?;
        match result {
            BrowserResult::Dismissed => {
                tracing::info!(provider = %request.provider, "OAuth browser session dismissed");
                Ok(None)
            }
            BrowserResult::Success(redirect_url) => {
                let session = self.provider.exchange_redirect(&redirect_url).await?;
                Ok(Some((authorization_url, Some(transform_session(&session)?))))
            }
        }
    }

    /// Signs out remotely and always clears local state.
    pub async fn sign_out(&self) -> RequestOutcome {
        self.begin();
        let result = self.provider.sign_out().await;
        self.store.dispatch(AuthAction::SignedOut);

        match result {
            Ok(()) => RequestOutcome::Success,
            Err(err) => RequestOutcome::Failed(self.fail(err.into())),
        }
    }

    pub async fn reset_password(&self, email: &str) -> RequestOutcome {
        if let Err(err) = validate_email(email) {
            return RequestOutcome::Failed(err);
        }
        self.begin();

        let result = async {
            let redirect = redirect_to(&self.redirect, &self.redirect.reset_password_path)?;
            self.provider
                .reset_password_for_email(email.trim(), &redirect)
                .await?;
            AuthResult::Ok(())
        }
        .await;
        self.finish(result)
    }

    pub async fn update_password(&self, new_password: &str) -> RequestOutcome {
        if let Err(err) = validate_new_password(new_password) {
            return RequestOutcome::Failed(err);
        }
        let update = UserUpdate {
            password: Some(new_password.to_string()),
            data: None,
        };
        self.update_user(&update, None).await
    }

    /// Changes the display name (`user_metadata.full_name`).
    pub async fn update_profile(&self, name: &str) -> RequestOutcome {
        if let Err(err) = validate_name(name) {
            return RequestOutcome::Failed(err);
        }
        let update = UserUpdate {
            password: None,
            data: Some(json!({ "full_name": name.trim() })),
        };
        self.update_user(&update, Some(name)).await
    }

    /// Sends `update` and stores the returned profile. If the response cannot
    /// be mapped and `renamed` is set, the current user is renamed instead.
    async fn update_user(&self, update: &UserUpdate, renamed: Option<&str>) -> RequestOutcome {
        self.begin();
        let result = match self.provider.update_user(update).await {
            Ok(provider_user) => User::try_from(&provider_user).or_else(|err| {
                match (renamed, self.store.auth().user) {
                    (Some(name), Some(current)) => {
                        tracing::debug!(error = %err, "unmappable profile response; renaming locally");
                        Ok(current.with_name(name))
                    }
                    _ => Err(err),
                }
            }),
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(user) => {
                self.store.dispatch(AuthAction::SetUser(Some(user)));
                RequestOutcome::Success
            }
            Err(err) => RequestOutcome::Failed(self.fail(err)),
        }
    }

    /// Hands a deep-link redirect (magic link, OAuth, recovery) to the
    /// provider.
    pub async fn complete_redirect(&self, redirect_url: &str) -> RequestOutcome {
        self.begin();
        let result = match self.provider.exchange_redirect(redirect_url).await {
            Ok(session) => transform_session(&session),
            Err(err) => Err(err.into()),
        };
        match result {
            Ok((user, session)) => {
                self.authenticated(&user, &session);
                RequestOutcome::Success
            }
            Err(err) => RequestOutcome::Failed(self.fail(err)),
        }
    }

    /// Loads an existing provider session into the store.
    ///
    /// Absence is not an error. Failures are logged and leave the store
    /// unauthenticated.
    pub async fn restore_session(&self) -> Option<Session> {
        let session = match self.provider.get_session().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                if self.store.auth().user.is_some() || self.store.auth().session.is_some() {
                    self.store.dispatch(AuthAction::SignedOut);
                }
                return None;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to restore session");
                return None;
            }
        };

        match write_session(self.provider.as_ref(), &self.store, &session).await {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::warn!(error = %err, "failed to restore session");
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Store transitions
    // ------------------------------------------------------------------------

    fn begin(&self) {
        self.store.dispatch(AuthAction::SetLoading(true));
    }

    fn authenticated(&self, user: &User, session: &Session) {
        self.store.dispatch(AuthAction::Authenticated {
            user: user.clone(),
            session: session.clone(),
        });
    }

    fn fail(&self, err: AuthError) -> AuthError {
        tracing::debug!(kind = %err.kind, message = %err.message, "auth operation failed");
        self.store.dispatch(AuthAction::SetError(err.message.clone()));
        err
    }

    fn finish(&self, result: AuthResult<()>) -> RequestOutcome {
        match result {
            Ok(()) => {
                self.store.dispatch(AuthAction::SetLoading(false));
                RequestOutcome::Success
            }
            Err(err) => RequestOutcome::Failed(self.fail(err)),
        }
    }
}

/// Fetches the current profile and writes it with `session` in one action.
/// Falls back to the user embedded in the session if the fetch fails.
async fn write_session(
    provider: &dyn IdentityProvider,
    store: &Store,
    session: &ProviderSession,
) -> AuthResult<Session> {
    let provider_user = match provider.get_user().await {
        Ok(Some(user)) => user,
        Ok(None) => session.user.clone(),
        Err(err) => {
            tracing::debug!(error = %err, "profile fetch failed; using session user");
            session.user.clone()
        }
    };
    let user = User::try_from(&provider_user)?;
    let session = Session::from(session);
    store.dispatch(AuthAction::Authenticated {
        user,
        session: session.clone(),
    });
    Ok(session)
}

async fn apply_event(provider: &dyn IdentityProvider, store: &Store, event: AuthChangeEvent) {
    tracing::debug!(event = %event.kind, "auth event");
    match (event.kind, event.session) {
        (
            AuthEventKind::SignedIn | AuthEventKind::TokenRefreshed | AuthEventKind::UserUpdated,
            Some(session),
        ) => {
            if let Err(err) = write_session(provider, store, &session).await {
                tracing::error!(event = %event.kind, error = %err, "failed to apply auth event");
            }
        }
        (AuthEventKind::SignedOut, _) => store.dispatch(AuthAction::SignedOut),
        (AuthEventKind::PasswordRecovery, _) => {
            tracing::info!("password recovery session started");
        }
        (kind, None) => {
            tracing::debug!(event = %kind, "auth event without session ignored");
        }
    }
}
