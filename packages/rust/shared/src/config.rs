//! Application configuration for extruder.
//!
//! User config lives at `~/.extruder/extruder.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ExtruderError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "extruder.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".extruder";

// ---------------------------------------------------------------------------
// Config structs (matching extruder.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote system settings.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Web front-end settings.
    #[serde(default)]
    pub web: WebConfig,
}

/// `[remote]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the remote system, e.g. `http://esup.internal`.
    /// When unset, the env var named by `base_url_env` is consulted.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Name of the env var holding the base URL when `base_url` is unset.
    #[serde(default = "default_base_url_env")]
    pub base_url_env: String,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            base_url_env: default_base_url_env(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_base_url_env() -> String {
    "ESUPPATH".into()
}
fn default_connect_timeout() -> u64 {
    15
}
fn default_request_timeout() -> u64 {
    60
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Task name matched against the task-list entries of an activity.
    #[serde(default = "default_task_name")]
    pub task_name: String,

    /// Field name read out of the fetched task document.
    #[serde(default = "default_field_name")]
    pub field_name: String,

    /// Maximum concurrently running pipelines in a batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Path of the cross-run snapshot file.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            task_name: default_task_name(),
            field_name: default_field_name(),
            concurrency: default_concurrency(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

fn default_task_name() -> String {
    "Готовность к работам по БС".into()
}
fn default_field_name() -> String {
    "Дата готовности к работам по БС".into()
}
fn default_concurrency() -> usize {
    8
}
fn default_snapshot_path() -> String {
    "extruder-cache.bin".into()
}

/// `[web]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Port the front end binds to on localhost.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    9999
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.extruder/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ExtruderError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.extruder/extruder.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ExtruderError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ExtruderError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ExtruderError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ExtruderError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ExtruderError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the remote base URL from config or the configured env var.
/// A trailing slash is stripped so paths can be appended verbatim.
pub fn resolve_base_url(config: &AppConfig) -> Result<String> {
    let raw = match &config.remote.base_url {
        Some(url) if !url.is_empty() => url.clone(),
        _ => {
            let var_name = &config.remote.base_url_env;
            std::env::var(var_name).map_err(|_| {
                ExtruderError::config(format!(
                    "remote base URL not configured. Set [remote].base_url in \
                     extruder.toml or the {var_name} environment variable."
                ))
            })?
        }
    };

    Ok(raw.trim_end_matches('/').to_string())
}
