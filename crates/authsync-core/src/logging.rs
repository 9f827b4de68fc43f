//! Tracing setup.
//!
//! `AUTHSYNC_LOG` takes an `EnvFilter` directive and wins over
//! `[log].level`. Output goes to stderr unless `[log].file` is set, in which
//! case a daily file under `$AUTHSYNC_HOME/logs` is used.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, paths};

pub const LOG_ENV: &str = "AUTHSYNC_LOG";

const LOG_FILE_PREFIX: &str = "authsync.log";

/// Builds the filter from `AUTHSYNC_LOG`, falling back to `default_level`.
///
/// # Errors
/// Returns an error if neither directive parses.
pub fn env_filter(env_value: Option<&str>, default_level: &str) -> Result<EnvFilter> {
    if let Some(directive) = env_value.map(str::trim).filter(|v| !v.is_empty()) {
        match EnvFilter::try_new(directive) {
            Ok(filter) => return Ok(filter),
            Err(e) => eprintln!("Warning: ignoring invalid {LOG_ENV} '{directive}': {e}"),
        }
    }
    EnvFilter::try_new(default_level)
        .with_context(|| format!("Invalid log level '{default_level}' in config"))
}

/// Installs the global subscriber.
///
/// Keep the returned guard alive for the life of the process when logging to
/// a file; dropping it flushes and stops the writer.
///
/// # Errors
/// Returns an error if the filter is invalid or the log directory cannot be
/// created.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(std::env::var(LOG_ENV).ok().as_deref(), &config.level)?;

    if config.file {
        let dir = paths::logs_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        // A subscriber may already be installed (tests, embedders).
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .try_init();
        return Ok(Some(guard));
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_directive_wins() {
        let filter = env_filter(Some("authsync_core=trace"), "warn").unwrap();
        assert_eq!(filter.to_string(), "authsync_core=trace");
    }

    #[test]
    fn test_blank_env_uses_config_level() {
        let filter = env_filter(Some("  "), "info").unwrap();
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_invalid_config_level_errors() {
        assert!(env_filter(None, "not a [level").is_err());
    }
}
