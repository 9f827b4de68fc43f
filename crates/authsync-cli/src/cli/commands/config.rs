//! Config command handlers.

use anyhow::{Context, Result};
use authsync_core::config;

pub fn path() {
    println!("{}", config::paths::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

pub fn generate() -> Result<()> {
    let toml = config::Config::generate()?;
    print!("{toml}");
    Ok(())
}

pub fn set_provider(url: &str, anon_key: &str) -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::save_provider_to(&config_path, url, anon_key)
        .with_context(|| format!("save provider to {}", config_path.display()))?;
    println!("✓ Provider saved to {}", config_path.display());
    Ok(())
}
