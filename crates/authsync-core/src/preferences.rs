//! Persisted user preferences.
//!
//! Each preference lives under its own key in the key-value store and is
//! mirrored into the preferences slice of the [`Store`]. Writes persist first
//! and dispatch second, so the slice never shows a value that failed to save.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::kv::KeyValueStore;
use crate::persist::{load_value, remove_value, save_value};
use crate::store::{
    AppPreferences, NotificationSettings, NotificationsPatch, PreferencesAction, Store,
    ThemePreference,
};

pub const COLOR_SCHEME_KEY: &str = "user_color_scheme";
pub const LANGUAGE_KEY: &str = "language";
pub const ONBOARDING_KEY: &str = "onboarding_completed";
pub const NOTIFICATIONS_KEY: &str = "notification_settings";

/// Overrides the detected system color scheme (`light` or `dark`).
pub const SYSTEM_THEME_ENV: &str = "AUTHSYNC_SYSTEM_THEME";

/// Concrete color scheme after resolving `auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorScheme {
    Light,
    Dark,
}

impl ColorScheme {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            ColorScheme::Light => ColorScheme::Dark,
            ColorScheme::Dark => ColorScheme::Light,
        }
    }
}

impl From<ColorScheme> for ThemePreference {
    fn from(scheme: ColorScheme) -> Self {
        match scheme {
            ColorScheme::Light => ThemePreference::Light,
            ColorScheme::Dark => ThemePreference::Dark,
        }
    }
}

impl fmt::Display for ColorScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorScheme::Light => write!(f, "light"),
            ColorScheme::Dark => write!(f, "dark"),
        }
    }
}

/// Resolves a stored preference against the system signal.
/// `Auto` without a signal is light.
pub fn resolve_theme(preference: ThemePreference, system: Option<ColorScheme>) -> ColorScheme {
    match preference {
        ThemePreference::Light => ColorScheme::Light,
        ThemePreference::Dark => ColorScheme::Dark,
        ThemePreference::Auto => system.unwrap_or(ColorScheme::Light),
    }
}

/// Reads the current system color scheme.
///
/// `AUTHSYNC_SYSTEM_THEME` wins; otherwise the terminal background from
/// `COLORFGBG` is used.
pub fn system_color_scheme() -> Option<ColorScheme> {
    if let Ok(value) = std::env::var(SYSTEM_THEME_ENV) {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => return Some(ColorScheme::Light),
            "dark" => return Some(ColorScheme::Dark),
            _ => {}
        }
    }
    std::env::var("COLORFGBG")
        .ok()
        .and_then(|value| parse_colorfgbg(&value))
}

/// Parses `COLORFGBG` (`fg;bg` or `fg;default;bg`); the last field is the
/// background palette index.
fn parse_colorfgbg(value: &str) -> Option<ColorScheme> {
    let bg: u8 = value.rsplit(';').next()?.trim().parse().ok()?;
    match bg {
        7 | 9..=15 => Some(ColorScheme::Light),
        0..=6 | 8 => Some(ColorScheme::Dark),
        _ => None,
    }
}

/// Preferences service over a key-value store.
#[derive(Clone)]
pub struct Preferences {
    storage: Arc<dyn KeyValueStore>,
    store: Store,
}

impl Preferences {
    pub fn new(storage: Arc<dyn KeyValueStore>, store: Store) -> Self {
        Self { storage, store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Reads every preference key and loads the result into the store.
    ///
    /// Unset keys keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the key-value store fails.
    pub async fn load(&self) -> Result<AppPreferences> {
        let defaults = AppPreferences::default();
        let storage = self.storage.as_ref();

        let prefs = AppPreferences {
            onboarding_completed: load_value(
                storage,
                ONBOARDING_KEY,
                defaults.onboarding_completed,
            )
            .await?,
            theme: load_value(storage, COLOR_SCHEME_KEY, defaults.theme).await?,
            language: load_value(storage, LANGUAGE_KEY, defaults.language).await?,
            notifications: load_value(storage, NOTIFICATIONS_KEY, defaults.notifications).await?,
        };

        tracing::debug!(theme = %prefs.theme, language = %prefs.language, "loaded preferences");
        self.store.dispatch(PreferencesAction::Load(prefs.clone()));
        Ok(prefs)
    }

    /// # Errors
    /// Returns an error if the value cannot be persisted.
    pub async fn set_theme(&self, theme: ThemePreference) -> Result<()> {
        save_value(self.storage.as_ref(), COLOR_SCHEME_KEY, &theme).await?;
        self.store.dispatch(PreferencesAction::SetTheme(theme));
        Ok(())
    }

    /// # Errors
    /// Returns an error if the language is blank or cannot be persisted.
    pub async fn set_language(&self, language: &str) -> Result<()> {
        let language = language.trim();
        if language.is_empty() {
            anyhow::bail!("Language cannot be empty");
        }
        save_value(self.storage.as_ref(), LANGUAGE_KEY, language).await?;
        self.store
            .dispatch(PreferencesAction::SetLanguage(language.to_string()));
        Ok(())
    }

    /// # Errors
    /// Returns an error if the value cannot be persisted.
    pub async fn set_onboarding_completed(&self, done: bool) -> Result<()> {
        save_value(self.storage.as_ref(), ONBOARDING_KEY, &done).await?;
        self.store
            .dispatch(PreferencesAction::SetOnboardingCompleted(done));
        Ok(())
    }

    /// Applies a partial update to the notification toggles.
    ///
    /// # Errors
    /// Returns an error if the merged settings cannot be persisted.
    pub async fn update_notifications(
        &self,
        patch: NotificationsPatch,
    ) -> Result<NotificationSettings> {
        let merged = self.store.preferences().notifications.merged(patch);
        save_value(self.storage.as_ref(), NOTIFICATIONS_KEY, &merged).await?;
        self.store
            .dispatch(PreferencesAction::UpdateNotifications(patch));
        Ok(merged)
    }

    /// Flips the effective scheme and stores it as an explicit choice.
    ///
    /// # Errors
    /// Returns an error if the new theme cannot be persisted.
    pub async fn toggle_theme(&self, system: Option<ColorScheme>) -> Result<ColorScheme> {
        let next = self.color_scheme(system).toggled();
        self.set_theme(next.into()).await?;
        Ok(next)
    }

    /// Deletes every stored preference and restores the defaults.
    ///
    /// # Errors
    /// Returns an error if a key cannot be deleted.
    pub async fn reset(&self) -> Result<()> {
        for key in [COLOR_SCHEME_KEY, LANGUAGE_KEY, ONBOARDING_KEY, NOTIFICATIONS_KEY] {
            remove_value(self.storage.as_ref(), key).await?;
        }
        self.store.dispatch(PreferencesAction::Reset);
        Ok(())
    }

    /// Effective scheme for the current preference.
    pub fn color_scheme(&self, system: Option<ColorScheme>) -> ColorScheme {
        resolve_theme(self.store.preferences().theme, system)
    }
}
