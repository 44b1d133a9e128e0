/// `load_config` module: loads the YAML settings file and injects secrets from the environment.
///
/// The file carries only non-secret settings. Passwords, API keys and the database URL
/// come from the environment (or a `.env` file loaded by `main`):
///
/// | variable                 | overrides               |
/// |--------------------------|-------------------------|
/// | `DRUPAL_XMLRPC_PASSWORD` | `directory.password`    |
/// | `CKAN_API_KEY`           | `search.api_key`        |
/// | `DATABASE_URL`           | `reports.database_url`  |
///
/// # Errors
/// All errors in this module use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::Result;
use dgu_core::config::{DirectorySettings, ReportSettings, SearchSettings};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const DRUPAL_PASSWORD_ENV: &str = "DRUPAL_XMLRPC_PASSWORD";
pub const CKAN_API_KEY_ENV: &str = "CKAN_API_KEY";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Every section is optional; each command checks for the ones it needs.
#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub directory: DirectorySettings,
    #[serde(default)]
    pub search: Option<SearchSettings>,
    #[serde(default)]
    pub reports: ReportSettings,
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// Loads a static YAML config file (no secrets) and injects secrets from env vars.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    // An empty file is a valid config with every section defaulted.
    let mut config: CliConfig = if config_content.trim().is_empty() {
        CliConfig::default()
    } else {
        serde_yaml::from_str(&config_content).map_err(|e| {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            anyhow::anyhow!("Failed to parse config YAML: {e}")
        })?
    };
    info!(config_path = ?path_ref, "Parsed config YAML successfully");

    if let Some(password) = non_empty_env(DRUPAL_PASSWORD_ENV) {
        info!(env = DRUPAL_PASSWORD_ENV, "Injecting directory password from environment");
        config.directory.password = Some(password);
    }
    if let Some(api_key) = non_empty_env(CKAN_API_KEY_ENV) {
        match config.search.as_mut() {
            Some(search) => {
                info!(env = CKAN_API_KEY_ENV, "Injecting CKAN API key from environment");
                search.api_key = Some(api_key);
            }
            None => info!(env = CKAN_API_KEY_ENV, "No search section, ignoring CKAN API key"),
        }
    }
    if let Some(url) = non_empty_env(DATABASE_URL_ENV) {
        info!(env = DATABASE_URL_ENV, "Using database URL from environment");
        config.reports.database_url = Some(url);
    }
    config.reports.trace_loaded();

    Ok(config)
}
