//! CLI command handlers.

pub mod auth;
pub mod config;
pub mod prefs;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use authsync_core::config::{Config, paths};
use authsync_core::identity::GoTrueClient;
use authsync_core::identity::redirect::SystemBrowser;
use authsync_core::kv::{FileStore, KeyValueStore};
use authsync_core::preferences::Preferences;
use authsync_core::store::Store;
use authsync_core::sync::SessionSynchronizer;

fn open_storage() -> Arc<dyn KeyValueStore> {
    Arc::new(FileStore::new(paths::storage_path()))
}

/// Wires the provider client, store and synchronizer, starts the event
/// listener and restores any stored session.
async fn connect(config: &Config) -> Result<SessionSynchronizer> {
    let provider =
        GoTrueClient::from_config(config, open_storage()).context("configure identity provider")?;
    let browser = SystemBrowser::new(config.redirect.callback_timeout()).on_open(|url| {
        println!("Authorization URL:");
        println!("  {url}");
        println!();
    });

    let sync = SessionSynchronizer::new(
        Arc::new(provider),
        Store::default(),
        Arc::new(browser),
        config.redirect.clone(),
    );
    sync.start()?;
    sync.restore_session().await;
    Ok(sync)
}

/// Loads persisted preferences into a fresh store.
async fn load_preferences() -> Result<Preferences> {
    let prefs = Preferences::new(open_storage(), Store::default());
    prefs.load().await.context("load preferences")?;
    Ok(prefs)
}

/// Returns `value` or reads one line from stdin.
fn password_or_prompt(value: Option<String>, prompt: &str) -> Result<String> {
    if let Some(value) = value {
        return Ok(value);
    }
    print!("{prompt}: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}
