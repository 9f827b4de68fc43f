//! Redirect URIs and browser sessions for emailed links and OAuth.
//!
//! Web redirects go to `<origin><path>`. Native redirects use the app scheme
//! (`<scheme>://auth/callback`) for emailed links; OAuth on native opens the
//! system browser and waits on a loopback listener for one request whose URL
//! starts with the redirect URI.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use crate::config::{Platform, RedirectConfig};
use crate::error::AuthError;

/// Set to skip launching a browser (tests, headless shells).
pub const NO_BROWSER_ENV: &str = "AUTHSYNC_NO_BROWSER";

/// Fallback when the provider redirects with `error` but no description.
pub const DEFAULT_REDIRECT_ERROR: &str = "Authentication failed";

/// Builds the redirect URI for `path` on the configured platform.
///
/// # Errors
/// Returns an unexpected error if the web platform has no usable origin.
pub fn redirect_to(config: &RedirectConfig, path: &str) -> Result<String, AuthError> {
    match config.platform {
        Platform::Web => {
            let origin = config
                .web_origin
                .as_deref()
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .ok_or_else(|| {
                    AuthError::unexpected("redirect.web_origin must be set for the web platform")
                })?;
            Url::parse(origin)
                .map_err(|e| AuthError::unexpected(format!("Invalid web origin '{origin}': {e}")))?;
            Ok(format!("{}{}", origin.trim_end_matches('/'), normalize_path(path)))
        }
        Platform::Native => Ok(format!(
            "{}://{}",
            config.scheme,
            path.trim_start_matches('/')
        )),
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Redirect URI served by a loopback listener on `port`.
pub fn loopback_redirect_uri(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{port}{}", normalize_path(path))
}

/// Generates a random high localhost port for OAuth callbacks.
pub fn random_local_port() -> u16 {
    let id = uuid::Uuid::new_v4();
    let bytes = id.as_bytes();
    let raw = u16::from_le_bytes([bytes[0], bytes[1]]);
    49152 + (raw % 16384)
}

// ============================================================================
// Redirect parsing
// ============================================================================

/// What a provider redirect carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectParams {
    /// `error` was present.
    Error { description: String },
    /// Implicit flow: tokens in the fragment.
    Tokens {
        access_token: String,
        refresh_token: String,
        expires_in: Option<i64>,
        token_type: Option<String>,
        /// `type` param: `recovery`, `magiclink`, `signup`, ...
        kind: Option<String>,
    },
    /// PKCE flow: authorization code in the query.
    Code { code: String, kind: Option<String> },
    /// Nothing usable.
    Empty,
}

impl RedirectParams {
    pub fn is_recovery(&self) -> bool {
        match self {
            RedirectParams::Tokens { kind, .. } | RedirectParams::Code { kind, .. } => {
                kind.as_deref() == Some("recovery")
            }
            _ => false,
        }
    }
}

/// Reads redirect parameters from both query and fragment; fragment wins.
///
/// # Errors
/// Returns an error if `redirect_url` is not a URL.
pub fn parse_redirect(redirect_url: &str) -> Result<RedirectParams> {
    let url = Url::parse(redirect_url.trim())
        .with_context(|| format!("Invalid redirect URL: {redirect_url}"))?;

    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(fragment) = url.fragment() {
        params.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
    }
    let take = |params: &mut HashMap<String, String>, key: &str| {
        params.remove(key).filter(|v| !v.trim().is_empty())
    };

    if take(&mut params, "error").is_some() {
        let description = take(&mut params, "error_description")
            .unwrap_or_else(|| DEFAULT_REDIRECT_ERROR.to_string());
        return Ok(RedirectParams::Error { description });
    }

    let kind = take(&mut params, "type");
    if let (Some(access_token), Some(refresh_token)) = (
        take(&mut params, "access_token"),
        take(&mut params, "refresh_token"),
    ) {
        return Ok(RedirectParams::Tokens {
            access_token,
            refresh_token,
            expires_in: take(&mut params, "expires_in").and_then(|v| v.parse().ok()),
            token_type: take(&mut params, "token_type"),
            kind,
        });
    }

    if let Some(code) = take(&mut params, "code") {
        return Ok(RedirectParams::Code { code, kind });
    }

    Ok(RedirectParams::Empty)
}

// ============================================================================
// Browser sessions
// ============================================================================

/// Result of an interactive browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserResult {
    /// The full redirect URL that matched.
    Success(String),
    /// Closed, timed out, or never redirected.
    Dismissed,
}

/// Opens authorization URLs and captures the redirect.
#[async_trait]
pub trait AuthBrowser: Send + Sync {
    /// Returns the redirect URI the browser session will watch for `path`.
    async fn prepare_redirect(&self, path: &str) -> Result<String>;

    /// Opens `auth_url` and waits for one redirect starting with `redirect_uri`.
    async fn open_auth_session(&self, auth_url: &Url, redirect_uri: &str)
    -> Result<BrowserResult>;
}

type OpenHook = Box<dyn Fn(&Url) + Send + Sync>;

/// System browser plus a loopback redirect listener.
pub struct SystemBrowser {
    timeout: Duration,
    listener: Mutex<Option<TcpListener>>,
    on_open: Option<OpenHook>,
}

impl SystemBrowser {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            listener: Mutex::new(None),
            on_open: None,
        }
    }

    /// Called with the authorization URL before the browser is launched.
    #[must_use]
    pub fn on_open(mut self, hook: impl Fn(&Url) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Box::new(hook));
        self
    }

    async fn bind() -> Result<TcpListener> {
        let port = random_local_port();
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => Ok(listener),
            Err(e) => {
                tracing::debug!(port, error = %e, "callback port busy; using an ephemeral port");
                TcpListener::bind(("127.0.0.1", 0))
                    .await
                    .context("Failed to bind OAuth callback listener")
            }
        }
    }

    fn take_listener(&self) -> Option<TcpListener> {
        self.listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    async fn wait_for_redirect(listener: TcpListener, redirect_uri: &str) -> Result<String> {
        let origin = redirect_origin(redirect_uri)?;
        loop {
            let (mut stream, _) = listener
                .accept()
                .await
                .context("Failed to accept OAuth callback")?;

            let mut buffer = [0u8; 4096];
            let read = stream.read(&mut buffer).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buffer[..read]);

            match request_target(&request).map(|target| format!("{origin}{target}")) {
                Some(full) if full.starts_with(redirect_uri) => {
                    let failed = matches!(parse_redirect(&full), Ok(RedirectParams::Error { .. }));
                    let response = if failed {
                        callback_response("400 Bad Request", "Login failed")
                    } else {
                        callback_response("200 OK", "Login complete")
                    };
                    let _ = stream.write_all(response.as_bytes()).await;
                    return Ok(full);
                }
                _ => {
                    let _ = stream
                        .write_all(callback_response("404 Not Found", "Not found").as_bytes())
                        .await;
                }
            }
        }
    }
}

#[async_trait]
impl AuthBrowser for SystemBrowser {
    async fn prepare_redirect(&self, path: &str) -> Result<String> {
        let listener = Self::bind().await?;
        let port = listener
            .local_addr()
            .context("Failed to read callback listener address")?
            .port();
        *self
            .listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(listener);
        Ok(loopback_redirect_uri(port, path))
    }

    async fn open_auth_session(
        &self,
        auth_url: &Url,
        redirect_uri: &str,
    ) -> Result<BrowserResult> {
        let listener = match self.take_listener() {
            Some(listener) => listener,
            None => {
                let port = Url::parse(redirect_uri)
                    .ok()
                    .and_then(|u| u.port())
                    .with_context(|| format!("Redirect URI has no port: {redirect_uri}"))?;
                TcpListener::bind(("127.0.0.1", port))
                    .await
                    .with_context(|| format!("Failed to bind callback port {port}"))?
            }
        };

        if let Some(hook) = &self.on_open {
            hook(auth_url);
        }
        if std::env::var(NO_BROWSER_ENV).is_err()
            && let Err(e) = open::that(auth_url.as_str())
        {
            tracing::warn!(error = %e, "failed to open browser");
        }

        match tokio::time::timeout(self.timeout, Self::wait_for_redirect(listener, redirect_uri))
            .await
        {
            Ok(result) => result.map(BrowserResult::Success),
            Err(_) => {
                tracing::info!(timeout_secs = self.timeout.as_secs(), "OAuth redirect timed out");
                Ok(BrowserResult::Dismissed)
            }
        }
    }
}

/// `scheme://host:port` of a redirect URI.
fn redirect_origin(redirect_uri: &str) -> Result<String> {
    let url = Url::parse(redirect_uri)
        .with_context(|| format!("Invalid redirect URI: {redirect_uri}"))?;
    Ok(url.origin().ascii_serialization())
}

/// Path and query of the HTTP request line.
fn request_target(request: &str) -> Option<&str> {
    let request_line = request.lines().next()?;
    let mut parts = request_line.split_whitespace();
    let _method = parts.next()?;
    parts.next().filter(|target| target.starts_with('/'))
}

fn callback_response(status: &str, heading: &str) -> String {
    let body = format!(
        "<html><body><h3>{heading}</h3><p>You can close this window.</p></body></html>"
    );
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native() -> RedirectConfig {
        RedirectConfig::default()
    }

    #[test]
    fn test_native_redirect_uses_scheme() {
        assert_eq!(
            redirect_to(&native(), "/auth/callback").unwrap(),
            "authsync://auth/callback"
        );
    }

    #[test]
    fn test_web_redirect_uses_origin() {
        let config = RedirectConfig {
            platform: Platform::Web,
            web_origin: Some("https://app.test/".into()),
            ..RedirectConfig::default()
        };
        assert_eq!(
            redirect_to(&config, "/auth/reset-password").unwrap(),
            "https://app.test/auth/reset-password"
        );

        let missing = RedirectConfig {
            platform: Platform::Web,
            ..RedirectConfig::default()
        };
        assert!(redirect_to(&missing, "/auth/callback").is_err());
    }

    #[test]
    fn test_random_local_port_range() {
        for _ in 0..32 {
            assert!(random_local_port() >= 49152);
        }
        assert_eq!(
            loopback_redirect_uri(50000, "auth/callback"),
            "http://127.0.0.1:50000/auth/callback"
        );
    }

    #[test]
    fn test_parse_error_fragment() {
        let params = parse_redirect(
            "authsync://auth/callback#error=access_denied&error_description=User+denied+access",
        )
        .unwrap();
        assert_eq!(
            params,
            RedirectParams::Error {
                description: "User denied access".into()
            }
        );

        let params = parse_redirect("http://127.0.0.1:5000/auth/callback?error=server_error").unwrap();
        assert_eq!(
            params,
            RedirectParams::Error {
                description: DEFAULT_REDIRECT_ERROR.into()
            }
        );
    }

    #[test]
    fn test_parse_token_fragment() {
        let params = parse_redirect(
            "authsync://auth/callback#access_token=at&refresh_token=rt&expires_in=3600&token_type=bearer&type=recovery",
        )
        .unwrap();
        assert!(params.is_recovery());
        assert!(matches!(
            params,
            RedirectParams::Tokens { ref access_token, expires_in: Some(3600), .. } if access_token == "at"
        ));
    }

    #[test]
    fn test_parse_code_query() {
        let params = parse_redirect("http://127.0.0.1:5000/auth/callback?code=abc").unwrap();
        assert_eq!(
            params,
            RedirectParams::Code {
                code: "abc".into(),
                kind: None
            }
        );
        assert_eq!(
            parse_redirect("authsync://auth/callback").unwrap(),
            RedirectParams::Empty
        );
        assert!(parse_redirect("not a url").is_err());
    }

    #[test]
    fn test_request_target() {
        assert_eq!(
            request_target("GET /auth/callback?code=x HTTP/1.1\r\nHost: x\r\n"),
            Some("/auth/callback?code=x")
        );
        assert_eq!(request_target(""), None);
    }

    /// The listener ignores unrelated paths and returns the matching redirect.
    #[tokio::test]
    async fn test_loopback_session_captures_redirect() {
        // SAFETY: test-only env mutation
        unsafe { std::env::set_var(NO_BROWSER_ENV, "1") };

        let browser = SystemBrowser::new(Duration::from_secs(5));
        let redirect_uri = browser.prepare_redirect("/auth/callback").await.unwrap();
        let auth_url = Url::parse("https://auth.test/authorize").unwrap();

        let target = redirect_uri.clone();
        let client = tokio::spawn(async move {
            let base = Url::parse(&target).unwrap();
            let addr = format!("127.0.0.1:{}", base.port().unwrap());
            for path in ["/favicon.ico", "/auth/callback?code=xyz"] {
                let mut stream = loop {
                    match tokio::net::TcpStream::connect(&addr).await {
                        Ok(stream) => break stream,
                        Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
                    }
                };
                stream
                    .write_all(format!("GET {path} HTTP/1.1\r\nHost: x\r\n\r\n").as_bytes())
                    .await
                    .unwrap();
                let mut response = String::new();
                let _ = stream.read_to_string(&mut response).await;
            }
        });

        let result = browser
            .open_auth_session(&auth_url, &redirect_uri)
            .await
            .unwrap();
        client.await.unwrap();

        assert_eq!(
            result,
            BrowserResult::Success(format!("{redirect_uri}?code=xyz"))
        );
    }

    #[tokio::test]
    async fn test_loopback_session_times_out_as_dismissed() {
        // SAFETY: test-only env mutation
        unsafe { std::env::set_var(NO_BROWSER_ENV, "1") };

        let browser = SystemBrowser::new(Duration::from_millis(50));
        let redirect_uri = browser.prepare_redirect("/auth/callback").await.unwrap();
        let auth_url = Url::parse("https://auth.test/authorize").unwrap();

        let result = browser
            .open_auth_session(&auth_url, &redirect_uri)
            .await
            .unwrap();
        assert_eq!(result, BrowserResult::Dismissed);
    }
}
