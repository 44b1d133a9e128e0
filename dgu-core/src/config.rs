use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::directory::DirectoryError;

fn default_scheme() -> String {
    "http".to_string()
}

fn default_rows() -> u32 {
    10_000
}

fn default_output_group() -> String {
    "www-data".to_string()
}

/// Connection settings for the Drupal directory service.
///
/// The REST API was added to Drupal after XML-RPC, but both share the same
/// scheme, domain and credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DirectorySettings {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Resolved endpoints for the directory service.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEndpoints {
    pub xmlrpc_url: String,
    /// Same as `xmlrpc_url` with the credentials spelled out and the password masked.
    pub xmlrpc_url_log_safe: String,
    pub rest_url: String,
    pub credentials: Option<(String, Option<String>)>,
}

impl DirectorySettings {
    pub fn endpoints(&self) -> Result<DirectoryEndpoints, DirectoryError> {
        let domain = match self.domain.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d.trim_end_matches('/'),
            _ => {
                return Err(DirectoryError::Setup(
                    "Drupal XMLRPC not configured.".to_string(),
                ))
            }
        };
        let scheme = if self.scheme.is_empty() {
            "http"
        } else {
            self.scheme.as_str()
        };

        let username = self.username.clone().filter(|u| !u.is_empty());
        let password = self.password.clone().filter(|p| !p.is_empty());

        let server_log_safe = match (&username, &password) {
            (None, None) => domain.to_string(),
            (user, Some(pass)) => format!(
                "{}:{}@{}",
                user.as_deref().unwrap_or(""),
                mask_password(pass),
                domain
            ),
            (Some(user), None) => format!("{user}@{domain}"),
        };

        let credentials = match (username, password) {
            (None, None) => None,
            (user, pass) => Some((user.unwrap_or_default(), pass)),
        };

        let endpoints = DirectoryEndpoints {
            xmlrpc_url: format!("{scheme}://{domain}/services/xmlrpc"),
            xmlrpc_url_log_safe: format!("{scheme}://{server_log_safe}/services/xmlrpc"),
            rest_url: format!("{scheme}://{domain}/services/rest"),
            credentials,
        };
        info!(url = %endpoints.xmlrpc_url_log_safe, "XMLRPC connection configured");
        Ok(endpoints)
    }
}

fn mask_password(password: &str) -> String {
    let mut chars = password.chars();
    match chars.next() {
        Some(first) => {
            let mut masked = first.to_string();
            masked.push_str(&"x".repeat(chars.count()));
            masked
        }
        None => String::new(),
    }
}

/// Where to find the CKAN action API used for bounding-box searches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchSettings {
    pub ckan_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_rows")]
    pub rows: u32,
}

/// Database and output settings for a report run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSettings {
    #[serde(default)]
    pub database_url: Option<String>,
    /// OS group that must own every exported file.
    #[serde(default = "default_output_group")]
    pub output_group: String,
    #[serde(default)]
    pub file_prefix: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            output_group: default_output_group(),
            file_prefix: String::new(),
        }
    }
}

impl ReportSettings {
    pub fn trace_loaded(&self) {
        info!(
            database_configured = self.database_url.is_some(),
            output_group = %self.output_group,
            "Loaded report settings"
        );
        debug!(file_prefix = %self.file_prefix, "Report settings (full debug)");
    }
}
