//! Configuration management for authsync.
//!
//! Loads configuration from ${AUTHSYNC_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Env var that overrides `[provider].url`.
pub const PROVIDER_URL_ENV: &str = "AUTHSYNC_PROVIDER_URL";
/// Env var that overrides `[provider].anon_key`.
pub const ANON_KEY_ENV: &str = "AUTHSYNC_ANON_KEY";

/// Deployment environment the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn display_name(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Where redirects land after an emailed link or an OAuth consent screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// System browser + loopback redirect listener.
    #[default]
    Native,
    /// Redirects to `web_origin`; the caller navigates to the authorization URL.
    Web,
}

/// Identity provider connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Project base URL (GoTrue lives under `/auth/v1`).
    pub url: String,
    /// Public anon key.
    pub anon_key: String,
}

/// Redirect URI construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    pub platform: Platform,
    /// App scheme for native deep links (`<scheme>://auth/callback`).
    pub scheme: String,
    /// Origin for web redirects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_origin: Option<String>,
    pub callback_path: String,
    pub reset_password_path: String,
    /// Seconds to wait for an OAuth redirect.
    pub callback_timeout_secs: u64,
}

impl RedirectConfig {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Native,
            scheme: "authsync".to_string(),
            web_origin: None,
            callback_path: "/auth/callback".to_string(),
            reset_password_path: "/auth/reset-password".to_string(),
            callback_timeout_secs: 120,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default `EnvFilter` directive when `AUTHSYNC_LOG` is unset.
    pub level: String,
    /// Log to a daily file under `$AUTHSYNC_HOME/logs`.
    pub file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: false,
        }
    }
}

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Merges user config values into the default template.
///
/// New comments/sections from the template are always present while the
/// user's customized values are preserved.
fn merge_with_template(user_config: &str) -> Result<String> {
    use toml_edit::DocumentMut;

    let mut doc: DocumentMut = default_config_template()
        .parse()
        .context("Failed to parse default config template")?;

    let user_doc: DocumentMut = user_config.parse().context("Failed to parse user config")?;

    merge_items(doc.as_table_mut(), user_doc.as_table());

    Ok(doc.to_string())
}

/// Recursively merges items from source table into target table.
fn merge_items(target: &mut toml_edit::Table, source: &toml_edit::Table) {
    use toml_edit::Item;

    for (key, value) in source.iter() {
        match value {
            Item::Value(v) => {
                target[key] = Item::Value(v.clone());
            }
            Item::Table(src_table) => {
                if let Some(Item::Table(target_table)) = target.get_mut(key) {
                    merge_items(target_table, src_table);
                } else {
                    target[key] = Item::Table(src_table.clone());
                }
            }
            Item::ArrayOfTables(src_arr) => {
                target[key] = Item::ArrayOfTables(src_arr.clone());
            }
            Item::None => {}
        }
    }
}

pub mod paths {
    //! Path resolution for authsync configuration and data directories.
    //!
    //! AUTHSYNC_HOME resolution order:
    //! 1. AUTHSYNC_HOME environment variable (if set)
    //! 2. ~/.config/authsync (default)

    use std::path::PathBuf;

    /// Returns the authsync home directory.
    pub fn authsync_home() -> PathBuf {
        if let Ok(home) = std::env::var("AUTHSYNC_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("authsync"))
            .expect("Could not determine home directory")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        authsync_home().join("config.toml")
    }

    /// Returns the path to the persistent key-value store.
    pub fn storage_path() -> PathBuf {
        authsync_home().join("store.json")
    }

    /// Returns the log directory.
    pub fn logs_dir() -> PathBuf {
        authsync_home().join("logs")
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,

    pub app_name: String,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub redirect: RedirectConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    const DEFAULT_APP_NAME: &str = "authsync";

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Resolves the provider URL with precedence: env > config.
    ///
    /// # Errors
    /// Returns an error if no URL is configured or it is malformed.
    pub fn provider_url(&self) -> Result<Url> {
        resolve_provider_url(std::env::var(PROVIDER_URL_ENV).ok(), &self.provider.url)
    }

    /// Resolves the anon key with precedence: env > config.
    ///
    /// # Errors
    /// Returns an error if no key is configured.
    pub fn anon_key(&self) -> Result<String> {
        resolve_anon_key(std::env::var(ANON_KEY_ENV).ok(), &self.provider.anon_key)
    }

    /// Saves the `[provider]` section to a specific config file path.
    ///
    /// Creates the file from the template if it doesn't exist, otherwise merges
    /// the user's values into the latest template first.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or written.
    pub fn save_provider_to(path: &Path, url: &str, anon_key: &str) -> Result<()> {
        use toml_edit::{DocumentMut, value};

        Url::parse(url).with_context(|| format!("Invalid provider URL: {url}"))?;

        let contents = if path.exists() {
            let user_config = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            merge_with_template(&user_config)?
        } else {
            default_config_template().to_string()
        };

        let mut doc: DocumentMut = contents
            .parse()
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        doc["provider"]["url"] = value(url);
        doc["provider"]["anon_key"] = value(anon_key);

        Self::write_config(path, &doc.to_string())
    }

    /// Initializes a config file at the given path with default values.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Generates a fresh config TOML from Rust defaults.
    ///
    /// Uses the embedded template for structure/comments and merges
    /// generated values from `Config::default()` into it.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn generate() -> Result<String> {
        use toml_edit::DocumentMut;

        let config = Config::default();
        let generated_toml =
            toml::to_string(&config).context("Failed to serialize default config to TOML")?;

        let mut doc: DocumentMut = default_config_template()
            .parse()
            .context("Failed to parse default config template")?;

        let generated_doc: DocumentMut = generated_toml
            .parse()
            .context("Failed to parse generated config")?;

        merge_items(doc.as_table_mut(), generated_doc.as_table());

        Ok(doc.to_string())
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            app_name: Self::DEFAULT_APP_NAME.to_string(),
            provider: ProviderConfig::default(),
            redirect: RedirectConfig::default(),
            log: LogConfig::default(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolves the provider URL from an env value and a config value.
///
/// # Errors
/// Returns an error if neither is set or the chosen value is not a URL.
pub fn resolve_provider_url(env_value: Option<String>, config_value: &str) -> Result<Url> {
    let raw = non_empty(env_value.as_deref())
        .or_else(|| non_empty(Some(config_value)))
        .with_context(|| {
            format!("No provider URL configured. Set {PROVIDER_URL_ENV} or url in [provider].")
        })?;
    Url::parse(raw).with_context(|| format!("Invalid provider URL: {raw}"))
}

/// Resolves the anon key from an env value and a config value.
///
/// # Errors
/// Returns an error if neither is set.
pub fn resolve_anon_key(env_value: Option<String>, config_value: &str) -> Result<String> {
    non_empty(env_value.as_deref())
        .or_else(|| non_empty(Some(config_value)))
        .map(str::to_string)
        .with_context(|| {
            format!("No anon key configured. Set {ANON_KEY_ENV} or anon_key in [provider].")
        })
}
