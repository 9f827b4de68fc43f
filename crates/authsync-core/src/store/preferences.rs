//! Preferences slice: onboarding, theme, language and notification toggles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Theme choice as stored. `Auto` follows the system signal at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    Light,
    Dark,
    #[default]
    Auto,
}

impl ThemePreference {
    pub fn as_str(self) -> &'static str {
        match self {
            ThemePreference::Light => "light",
            ThemePreference::Dark => "dark",
            ThemePreference::Auto => "auto",
        }
    }
}

impl fmt::Display for ThemePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(ThemePreference::Light),
            "dark" => Ok(ThemePreference::Dark),
            "auto" | "system" => Ok(ThemePreference::Auto),
            other => Err(format!(
                "Unknown theme '{other}'. Expected light, dark or auto."
            )),
        }
    }
}

/// Notification channel toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub push: bool,
    pub email: bool,
    pub marketing: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            push: true,
            email: true,
            marketing: false,
        }
    }
}

impl NotificationSettings {
    /// Returns a copy with the set fields of `patch` applied.
    #[must_use]
    pub fn merged(self, patch: NotificationsPatch) -> Self {
        Self {
            push: patch.push.unwrap_or(self.push),
            email: patch.email.unwrap_or(self.email),
            marketing: patch.marketing.unwrap_or(self.marketing),
        }
    }
}

/// Partial update of [`NotificationSettings`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationsPatch {
    pub push: Option<bool>,
    pub email: Option<bool>,
    pub marketing: Option<bool>,
}

impl NotificationsPatch {
    pub fn is_empty(&self) -> bool {
        self.push.is_none() && self.email.is_none() && self.marketing.is_none()
    }
}

/// Preferences slice state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppPreferences {
    pub onboarding_completed: bool,
    pub theme: ThemePreference,
    pub language: String,
    pub notifications: NotificationSettings,
}

pub const DEFAULT_LANGUAGE: &str = "en";

impl Default for AppPreferences {
    fn default() -> Self {
        Self {
            onboarding_completed: false,
            theme: ThemePreference::Auto,
            language: DEFAULT_LANGUAGE.to_string(),
            notifications: NotificationSettings::default(),
        }
    }
}

/// Named transitions of the preferences slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreferencesAction {
    SetOnboardingCompleted(bool),
    SetTheme(ThemePreference),
    SetLanguage(String),
    UpdateNotifications(NotificationsPatch),
    /// Replaces the whole slice, used after loading from storage.
    Load(AppPreferences),
    Reset,
}

/// Applies one action to the preferences slice.
pub fn reduce(state: &mut AppPreferences, action: PreferencesAction) {
    match action {
        PreferencesAction::SetOnboardingCompleted(done) => state.onboarding_completed = done,
        PreferencesAction::SetTheme(theme) => state.theme = theme,
        PreferencesAction::SetLanguage(language) => state.language = language,
        PreferencesAction::UpdateNotifications(patch) => {
            state.notifications = state.notifications.merged(patch);
        }
        PreferencesAction::Load(prefs) => *state = prefs,
        PreferencesAction::Reset => *state = AppPreferences::default(),
    }
}
