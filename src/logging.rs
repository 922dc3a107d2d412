use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

pub const LOG_ENV: &str = "LISTINGS_LOG";

/// Where log output goes: `LISTINGS_LOG` wins over `logging.file`.
pub fn log_path(config: &LoggingConfig) -> Option<PathBuf> {
    std::env::var_os(LOG_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| config.file.clone())
}

/// Installs the global subscriber when a log file is configured.
///
/// Nothing is written to the terminal, since that would tear the TUI. `RUST_LOG`
/// overrides `logging.filter`. Returns the path being written, if any.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<PathBuf>> {
    let Some(path) = log_path(config) else {
        return Ok(None);
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file = open_log_file(&path)?;
    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .context("logging: subscriber already installed")?;

    tracing::info!(version = crate::VERSION, path = %path.display(), "logging started");
    Ok(Some(path))
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("logging: failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("logging: failed to open {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn disabled_without_a_path() {
        if std::env::var_os(LOG_ENV).is_some() {
            return;
        }
        let config = LoggingConfig::default();
        assert!(log_path(&config).is_none());
        assert!(init_tracing(&config).unwrap().is_none());
    }

    #[test]
    fn config_file_is_used_when_env_is_unset() {
        if std::env::var_os(LOG_ENV).is_some() {
            return;
        }
        let config = LoggingConfig {
            file: Some(PathBuf::from("/tmp/listings.log")),
            ..LoggingConfig::default()
        };
        assert_eq!(log_path(&config), Some(PathBuf::from("/tmp/listings.log")));
    }

    #[test]
    fn open_log_file_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("listings.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
