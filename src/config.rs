use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::search::{SearchQuery, SortBy, DEFAULT_RADIUS, RADIUS_CHOICES};
use crate::servlet::DEFAULT_BASE_URL;

const DEFAULT_ENV_PREFIX: &str = "LISTINGS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("listings-tui/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    #[serde(default)]
    pub default_sort: SortBy,
    #[serde(default = "default_radius")]
    pub default_radius: u32,
    #[serde(default)]
    pub location: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_sort: SortBy::default(),
            default_radius: default_radius(),
            location: String::new(),
        }
    }
}

fn default_radius() -> u32 {
    DEFAULT_RADIUS
}

impl SearchConfig {
    /// Initial query for the search page; unknown radii fall back to the default.
    pub fn initial_query(&self) -> SearchQuery {
        let radius_miles = if RADIUS_CHOICES.contains(&self.default_radius) {
            self.default_radius
        } else {
            DEFAULT_RADIUS
        };
        SearchQuery {
            radius_miles,
            sort: self.default_sort,
            location: self.location.trim().to_string(),
            ..SearchQuery::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "listings_tui=info".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix));

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    let defaults = Config::default();

    if !other.server.base_url.is_empty() {
        base.server.base_url = other.server.base_url;
    }
    if !other.server.user_agent.is_empty() {
        base.server.user_agent = other.server.user_agent;
    }
    if other.server.timeout != defaults.server.timeout {
        base.server.timeout = other.server.timeout;
    }

    if other.search.default_sort != defaults.search.default_sort {
        base.search.default_sort = other.search.default_sort;
    }
    if other.search.default_radius != defaults.search.default_radius {
        base.search.default_radius = other.search.default_radius;
    }
    if !other.search.location.is_empty() {
        base.search.location = other.search.location;
    }

    if other.logging.file.is_some() {
        base.logging.file = other.logging.file;
    }
    if !other.logging.filter.is_empty() && other.logging.filter != defaults.logging.filter {
        base.logging.filter = other.logging.filter;
    }

    base
}

fn load_env(prefix: &str) -> Config {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    let mut cfg = Config::default();
    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }
    cfg
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "server.base_url" => cfg.server.base_url = value,
        "server.user_agent" => cfg.server.user_agent = value,
        "server.timeout" => match humantime::parse_duration(&value) {
            Ok(duration) => cfg.server.timeout = duration,
            Err(err) => tracing::warn!("ignoring server.timeout {value:?}: {err}"),
        },
        "search.default_sort" => {
            match serde_yaml::from_str::<SortBy>(&value) {
                Ok(sort) => cfg.search.default_sort = sort,
                Err(err) => tracing::warn!("ignoring search.default_sort {value:?}: {err}"),
            }
        }
        "search.default_radius" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.search.default_radius = parsed;
            }
        }
        "search.location" => cfg.search.location = value,
        "logging.file" => cfg.logging.file = Some(PathBuf::from(value)),
        "logging.filter" => cfg.logging.filter = value,
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("listings-tui").join("config.yaml"))
}

/// Stores `query` as the search page defaults, keeping every other setting.
pub fn save_search_defaults(path: Option<PathBuf>, query: &SearchQuery) -> Result<PathBuf> {
    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };

    cfg.search.default_sort = query.sort;
    cfg.search.default_radius = query.radius_miles;
    cfg.search.location = query.location.trim().to_string();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    fn isolated(prefix: &str, dir: &Path) -> LoadOptions {
        LoadOptions {
            config_file: Some(dir.join("config.yaml")),
            env_prefix: Some(prefix.to_string()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(isolated("LISTINGS_TEST_DEFAULTS", dir.path())).unwrap();
        assert_eq!(cfg.server.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.server.timeout, Duration::from_secs(20));
        assert_eq!(cfg.search.default_radius, DEFAULT_RADIUS);
        assert!(cfg.logging.file.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "server:\n  base_url: https://listings.example.org/\n  timeout: 5s\nsearch:\n  default_sort: most-recent\n  default_radius: 50\n",
        )
        .unwrap();
        let cfg = load(isolated("LISTINGS_TEST_FILE", dir.path())).unwrap();
        assert_eq!(cfg.server.base_url, "https://listings.example.org/");
        assert_eq!(cfg.server.timeout, Duration::from_secs(5));
        assert_eq!(cfg.search.default_sort, SortBy::MostRecent);
        let query = cfg.search.initial_query();
        assert_eq!(query.radius_miles, 50);
        assert_eq!(query.sort, SortBy::MostRecent);
    }

    #[test]
    fn env_overrides() {
        let dir = tempdir().unwrap();
        env::set_var("LISTINGS_TEST_ENV_SEARCH__LOCATION", "Austin, TX");
        env::set_var("LISTINGS_TEST_ENV_SERVER__TIMEOUT", "2m");
        let cfg = load(isolated("LISTINGS_TEST_ENV", dir.path())).unwrap();
        env::remove_var("LISTINGS_TEST_ENV_SEARCH__LOCATION");
        env::remove_var("LISTINGS_TEST_ENV_SERVER__TIMEOUT");
        assert_eq!(cfg.search.location, "Austin, TX");
        assert_eq!(cfg.server.timeout, Duration::from_secs(120));
    }

    #[test]
    fn unknown_radius_falls_back() {
        let search = SearchConfig {
            default_radius: 7,
            ..SearchConfig::default()
        };
        assert_eq!(search.initial_query().radius_miles, DEFAULT_RADIUS);
    }

    #[test]
    fn save_search_defaults_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let query = SearchQuery {
            location: "Denver, CO".into(),
            radius_miles: 25,
            sort: SortBy::Reputation,
            ..SearchQuery::default()
        };
        save_search_defaults(Some(path.clone()), &query).unwrap();
        let saved = read_config_file(&path).unwrap();
        assert_eq!(saved.search.location, "Denver, CO");
        assert_eq!(saved.search.default_radius, 25);
        assert_eq!(saved.search.default_sort, SortBy::Reputation);
    }
}
