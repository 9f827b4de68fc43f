//! GoTrue REST client.
//!
//! Talks to `<project>/auth/v1`, keeps the current session in the key-value
//! store and reports session changes to subscribers.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{Mutex, MutexGuard};
use url::Url;

use super::pkce::{CHALLENGE_METHOD, Pkce};
use super::redirect::{RedirectParams, parse_redirect};
use super::{
    AuthChangeEvent, AuthEventHub, AuthEventKind, AuthEventRx, IdentityProvider, OAuthRequest,
    ProviderError, ProviderErrorKind, ProviderResult, ProviderSession, ProviderUser,
    SignUpRequest, SignUpResponse, UserUpdate,
};
use crate::config::Config;
use crate::kv::KeyValueStore;

/// Storage key of the serialized session.
pub const SESSION_KEY: &str = "authsync.auth.session";
/// Storage key of the pending PKCE verifier.
pub const CODE_VERIFIER_KEY: &str = "authsync.auth.code_verifier";
/// Sessions expiring within this window are refreshed on read.
pub const REFRESH_MARGIN_SECS: i64 = 60;

const CLIENT_INFO: &str = concat!("authsync/", env!("CARGO_PKG_VERSION"));

#[derive(Default)]
struct SessionSlot {
    loaded: bool,
    session: Option<ProviderSession>,
}

/// HTTP client for a GoTrue-compatible auth service.
pub struct GoTrueClient {
    http: reqwest::Client,
    auth_url: Url,
    anon_key: String,
    storage: Arc<dyn KeyValueStore>,
    session: Mutex<SessionSlot>,
    events: AuthEventHub,
}

impl GoTrueClient {
    /// Creates a client for the project at `project_url`.
    ///
    /// # Errors
    /// Returns an error if the auth URL cannot be derived from `project_url`.
    pub fn new(
        project_url: &Url,
        anon_key: impl Into<String>,
        storage: Arc<dyn KeyValueStore>,
    ) -> anyhow::Result<Self> {
        let base = project_url.as_str().trim_end_matches('/');
        let auth_url = Url::parse(&format!("{base}/auth/v1/"))
            .with_context(|| format!("Invalid provider URL: {project_url}"))?;

        Ok(Self {
            http: reqwest::Client::new(),
            auth_url,
            anon_key: anon_key.into(),
            storage,
            session: Mutex::new(SessionSlot::default()),
            events: AuthEventHub::default(),
        })
    }

    /// Creates a client from configuration (env overrides applied).
    ///
    /// # Errors
    /// Returns an error if the provider URL or anon key is missing.
    pub fn from_config(config: &Config, storage: Arc<dyn KeyValueStore>) -> anyhow::Result<Self> {
        Self::new(&config.provider_url()?, config.anon_key()?, storage)
    }

    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    // ------------------------------------------------------------------------
    // HTTP
    // ------------------------------------------------------------------------

    fn endpoint(&self, path: &str) -> ProviderResult<Url> {
        self.auth_url
            .join(path)
            .map_err(|e| ProviderError::parse(format!("Invalid endpoint '{path}': {e}")))
    }

    fn request(
        &self,
        method: Method,
        url: Url,
        access_token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let bearer = access_token.unwrap_or(&self.anon_key);
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("authorization", format!("Bearer {bearer}"))
            .header("accept", "application/json")
            .header("x-client-info", CLIENT_INFO)
    }

    async fn send_raw(&self, builder: reqwest::RequestBuilder) -> ProviderResult<String> {
        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        if !status.is_success() {
            let err = ProviderError::from_response(status.as_u16(), &body);
            tracing::debug!(status = status.as_u16(), message = %err.message, "provider rejected request");
            return Err(err);
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> ProviderResult<T> {
        let body = self.send_raw(builder).await?;
        serde_json::from_str(&body)
            .map_err(|e| ProviderError::parse(format!("Failed to parse provider response: {e}")))
    }

    async fn token_grant(&self, grant_type: &str, body: &Value) -> ProviderResult<ProviderSession> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let session: ProviderSession = self
            .send_json(self.request(Method::POST, url, None).json(body))
            .await?;
        Ok(session.with_expiry(now_secs()))
    }

    async fn fetch_user(&self, access_token: &str) -> ProviderResult<ProviderUser> {
        let url = self.endpoint("user")?;
        self.send_json(self.request(Method::GET, url, Some(access_token)))
            .await
    }

    // ------------------------------------------------------------------------
    // Session storage
    // ------------------------------------------------------------------------

    async fn lock_session(&self) -> ProviderResult<MutexGuard<'_, SessionSlot>> {
        let mut slot = self.session.lock().await;
        if !slot.loaded {
            slot.session = self.read_stored_session().await?;
            slot.loaded = true;
        }
        Ok(slot)
    }

    async fn read_stored_session(&self) -> ProviderResult<Option<ProviderSession>> {
        let raw = self
            .storage
            .get_item(SESSION_KEY)
            .await
            .map_err(|e| ProviderError::storage(&e))?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable stored session");
                Ok(None)
            }
        }
    }

    async fn save_session(
        &self,
        slot: &mut SessionSlot,
        session: ProviderSession,
    ) -> ProviderResult<()> {
        let json = serde_json::to_string(&session)
            .map_err(|e| ProviderError::parse(format!("Failed to serialize session: {e}")))?;
        self.storage
            .set_item(SESSION_KEY, &json)
            .await
            .map_err(|e| ProviderError::storage(&e))?;
        slot.session = Some(session);
        slot.loaded = true;
        Ok(())
    }

    async fn drop_session(&self, slot: &mut SessionSlot) -> ProviderResult<()> {
        slot.session = None;
        slot.loaded = true;
        self.storage
            .delete_item(SESSION_KEY)
            .await
            .map_err(|e| ProviderError::storage(&e))
    }

    /// Stores `session` and announces it.
    async fn establish(&self, session: ProviderSession, kind: AuthEventKind) -> ProviderResult<()> {
        let mut slot = self.lock_session().await?;
        self.save_session(&mut slot, session.clone()).await?;
        drop(slot);

        tracing::info!(user = %session.user.id, event = %kind, "session established");
        self.events.emit(&AuthChangeEvent::new(kind, Some(session)));
        Ok(())
    }

    async fn take_code_verifier(&self) -> ProviderResult<String> {
        let verifier = self
            .storage
            .get_item(CODE_VERIFIER_KEY)
            .await
            .map_err(|e| ProviderError::storage(&e))?
            .ok_or_else(|| {
                ProviderError::new(
                    ProviderErrorKind::Rejected,
                    "No pending sign-in for this redirect. Start the sign-in again.",
                )
            })?;
        self.storage
            .delete_item(CODE_VERIFIER_KEY)
            .await
            .map_err(|e| ProviderError::storage(&e))?;
        Ok(verifier)
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn classify_reqwest_error(e: &reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::network(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ProviderError::network(format!("Connection failed: {e}"))
    } else if e.is_decode() {
        ProviderError::parse(format!("Failed to read response: {e}"))
    } else {
        ProviderError::network(format!("Network error: {e}"))
    }
}

/// Sign-up answers with a session when confirmation is off, otherwise with
/// the user (bare or under `user`).
fn parse_sign_up(body: Value) -> ProviderResult<(Option<ProviderUser>, Option<ProviderSession>)> {
    let parse_err = |e: serde_json::Error| {
        ProviderError::parse(format!("Failed to parse sign-up response: {e}"))
    };

    if body.get("access_token").is_some() {
        let session: ProviderSession = serde_json::from_value(body).map_err(parse_err)?;
        let session = session.with_expiry(now_secs());
        return Ok((Some(session.user.clone()), Some(session)));
    }

    let user_value = match body.get("user") {
        Some(user) if user.is_object() => user.clone(),
        _ => body,
    };
    if user_value.get("id").is_none() {
        return Ok((None, None));
    }
    let user: ProviderUser = serde_json::from_value(user_value).map_err(parse_err)?;
    Ok((Some(user), None))
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    async fn sign_up(&self, request: &SignUpRequest) -> ProviderResult<SignUpResponse> {
        let mut url = self.endpoint("signup")?;
        if let Some(redirect_to) = &request.redirect_to {
            url.query_pairs_mut().append_pair("redirect_to", redirect_to);
        }
        let body = json!({
            "email": request.email,
            "password": request.password,
            "data": { "full_name": request.name },
        });

        let response: Value = self
            .send_json(self.request(Method::POST, url, None).json(&body))
            .await?;
        let (user, session) = parse_sign_up(response)?;

        if let Some(session) = &session {
            self.establish(session.clone(), AuthEventKind::SignedIn)
                .await?;
        } else {
            tracing::info!(email = %request.email, "sign-up pending email confirmation");
        }
        Ok(SignUpResponse { user, session })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> ProviderResult<ProviderSession> {
        let session = self
            .token_grant(
                "password",
                &json!({ "email": email, "password": password }),
            )
            .await?;
        self.establish(session.clone(), AuthEventKind::SignedIn)
            .await?;
        Ok(session)
    }

    async fn sign_in_with_otp(&self, email: &str, redirect_to: &str) -> ProviderResult<()> {
        let mut url = self.endpoint("otp")?;
        url.query_pairs_mut().append_pair("redirect_to", redirect_to);
        let body = json!({ "email": email, "create_user": true });

        self.send_raw(self.request(Method::POST, url, None).json(&body))
            .await?;
        tracing::info!(email, "magic link requested");
        Ok(())
    }

    async fn sign_in_with_oauth(&self, request: &OAuthRequest) -> ProviderResult<Url> {
        let pkce = Pkce::generate();
        self.storage
            .set_item(CODE_VERIFIER_KEY, &pkce.verifier)
            .await
            .map_err(|e| ProviderError::storage(&e))?;

        let mut url = self.endpoint("authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("provider", request.provider.as_str())
                .append_pair("redirect_to", &request.redirect_to)
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", CHALLENGE_METHOD);
            for (key, value) in &request.query_params {
                query.append_pair(key, value);
            }
        }
        tracing::debug!(provider = %request.provider, "built authorization URL");
        Ok(url)
    }

    async fn exchange_redirect(&self, redirect_url: &str) -> ProviderResult<ProviderSession> {
        let params = parse_redirect(redirect_url)
            .map_err(|e| ProviderError::parse(format!("{e:#}")))?;
        let recovery = params.is_recovery();

        let session = match params {
            RedirectParams::Error { description } => {
                return Err(ProviderError::new(ProviderErrorKind::Rejected, description));
            }
            RedirectParams::Tokens {
                access_token,
                refresh_token,
                expires_in,
                token_type,
                ..
            } => {
                let user = self.fetch_user(&access_token).await?;
                ProviderSession {
                    access_token,
                    refresh_token,
                    token_type: token_type.unwrap_or_else(|| "bearer".to_string()),
                    expires_in,
                    expires_at: None,
                    user,
                }
                .with_expiry(now_secs())
            }
            RedirectParams::Code { code, .. } => {
                let verifier = self.take_code_verifier().await?;
                self.token_grant(
                    "pkce",
                    &json!({ "auth_code": code, "code_verifier": verifier }),
                )
                .await?
            }
            RedirectParams::Empty => {
                return Err(ProviderError::parse(
                    "Redirect URL carries neither a session nor an authorization code",
                ));
            }
        };

        let kind = if recovery {
            AuthEventKind::PasswordRecovery
        } else {
            AuthEventKind::SignedIn
        };
        self.establish(session.clone(), kind).await?;
        Ok(session)
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> ProviderResult<()> {
        let mut url = self.endpoint("recover")?;
        url.query_pairs_mut().append_pair("redirect_to", redirect_to);

        self.send_raw(
            self.request(Method::POST, url, None)
                .json(&json!({ "email": email })),
        )
        .await?;
        tracing::info!(email, "password recovery email requested");
        Ok(())
    }

    async fn update_user(&self, update: &UserUpdate) -> ProviderResult<ProviderUser> {
        let session = self
            .get_session()
            .await?
            .ok_or_else(|| ProviderError::rejected(401, "Auth session missing!"))?;

        let url = self.endpoint("user")?;
        let user: ProviderUser = self
            .send_json(
                self.request(Method::PUT, url, Some(&session.access_token))
                    .json(update),
            )
            .await?;

        let updated = ProviderSession {
            user: user.clone(),
            ..session
        };
        let mut slot = self.lock_session().await?;
        self.save_session(&mut slot, updated.clone()).await?;
        drop(slot);

        self.events.emit(&AuthChangeEvent::new(
            AuthEventKind::UserUpdated,
            Some(updated),
        ));
        Ok(user)
    }

    async fn sign_out(&self) -> ProviderResult<()> {
        let url = self.endpoint("logout")?;
        let mut slot = self.lock_session().await?;
        let remote = match slot.session.take() {
            Some(session) => {
                self.send_raw(self.request(Method::POST, url, Some(&session.access_token)))
                    .await
                    .map(|_| ())
            }
            None => Ok(()),
        };
        let local = self.drop_session(&mut slot).await;
        drop(slot);

        self.events
            .emit(&AuthChangeEvent::new(AuthEventKind::SignedOut, None));

        match remote {
            Err(e) if e.is_session_missing() => {
                tracing::debug!(message = %e.message, "session already gone server-side");
                local
            }
            Err(e) => {
                tracing::warn!(message = %e.message, "remote sign-out failed; local session cleared");
                Err(e)
            }
            Ok(()) => local,
        }
    }

    async fn get_session(&self) -> ProviderResult<Option<ProviderSession>> {
        let mut slot = self.lock_session().await?;
        let Some(session) = slot.session.clone() else {
            return Ok(None);
        };
        if !session.expires_within(now_secs(), REFRESH_MARGIN_SECS) {
            return Ok(Some(session));
        }

        tracing::debug!(user = %session.user.id, "refreshing session");
        match self
            .token_grant(
                "refresh_token",
                &json!({ "refresh_token": session.refresh_token }),
            )
            .await
        {
            Ok(refreshed) => {
                self.save_session(&mut slot, refreshed.clone()).await?;
                drop(slot);
                self.events.emit(&AuthChangeEvent::new(
                    AuthEventKind::TokenRefreshed,
                    Some(refreshed.clone()),
                ));
                Ok(Some(refreshed))
            }
            Err(e) if e.kind == ProviderErrorKind::Rejected => {
                tracing::warn!(message = %e.message, "refresh rejected; signing out locally");
                self.drop_session(&mut slot).await?;
                drop(slot);
                self.events
                    .emit(&AuthChangeEvent::new(AuthEventKind::SignedOut, None));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_user(&self) -> ProviderResult<Option<ProviderUser>> {
        let Some(session) = self.get_session().await? else {
            return Ok(None);
        };
        self.fetch_user(&session.access_token).await.map(Some)
    }

    fn on_auth_state_change(&self) -> AuthEventRx {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[test]
    fn test_auth_url_keeps_project_path() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let client = GoTrueClient::new(
            &Url::parse("https://abc.supabase.co").unwrap(),
            "anon",
            storage.clone(),
        )
        .unwrap();
        assert_eq!(client.auth_url().as_str(), "https://abc.supabase.co/auth/v1/");

        let client = GoTrueClient::new(
            &Url::parse("http://localhost:8000/project/").unwrap(),
            "anon",
            storage,
        )
        .unwrap();
        assert_eq!(
            client.endpoint("token").unwrap().as_str(),
            "http://localhost:8000/project/auth/v1/token"
        );
    }

    #[test]
    fn test_parse_sign_up_shapes() {
        let (user, session) = parse_sign_up(json!({
            "id": "u1",
            "email": "ann@x.com",
            "created_at": "2024-05-01T09:00:00Z"
        }))
        .unwrap();
        assert_eq!(user.unwrap().id, "u1");
        assert!(session.is_none());

        let (user, session) = parse_sign_up(json!({
            "user": {"id": "u2"},
            "session": null
        }))
        .unwrap();
        assert_eq!(user.unwrap().id, "u2");
        assert!(session.is_none());

        let (user, session) = parse_sign_up(json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3600,
            "user": {"id": "u3"}
        }))
        .unwrap();
        assert_eq!(user.unwrap().id, "u3");
        assert!(session.unwrap().expires_at.is_some());
    }

    /// A corrupt stored session reads as signed out.
    #[tokio::test]
    async fn test_unreadable_stored_session_is_ignored() {
        let storage = Arc::new(MemoryStore::new());
        storage.set_item(SESSION_KEY, "{oops").await.unwrap();
        let client = GoTrueClient::new(
            &Url::parse("https://abc.supabase.co").unwrap(),
            "anon",
            storage,
        )
        .unwrap();

        assert!(client.get_session().await.unwrap().is_none());
    }
}
