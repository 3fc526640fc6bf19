//! Deployment configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Connection details for the training-record store.
///
/// Note: Custom Debug impl masks API tokens to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct RecordStoreConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
}

impl std::fmt::Debug for RecordStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStoreConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &"***")
            .finish()
    }
}

/// Connection details for the notification service.
#[derive(Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
}

impl std::fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &"***")
            .finish()
    }
}

/// Top-level skillsheet configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Directory holding template TOML files.
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    /// Directory holding per-session operation logs.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Training-record store; absent means official results stay local.
    #[serde(default)]
    pub record_store: Option<RecordStoreConfig>,
    /// Notification service; absent disables result emails.
    #[serde(default)]
    pub notifications: Option<NotificationConfig>,
    /// Elevated token for finalized-session deletion.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Retries per sync delivery.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Delay before the first sync retry, in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("./templates")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./skillsheet-logs")
}
fn default_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            template_dir: default_template_dir(),
            log_dir: default_log_dir(),
            record_store: None,
            notifications: None,
            admin_token: None,
            max_retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `skillsheet.toml` in the current directory
/// 2. `~/.config/skillsheet/config.toml`
///
/// Environment variable overrides: `SKILLSHEET_RECORD_TOKEN`,
/// `SKILLSHEET_ADMIN_TOKEN`.
pub fn load_config() -> Result<ServicesConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ServicesConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("skillsheet.toml");
        if local.exists() {
            Some(local)
        } else if let Some(home) = dirs_path() {
            let global = home.join("config.toml");
            if global.exists() {
                Some(global)
            } else {
                None
            }
        } else {
            None
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<ServicesConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ServicesConfig::default(),
    };

    // Apply env var overrides
    if let Ok(token) = std::env::var("SKILLSHEET_RECORD_TOKEN") {
        if let Some(store) = config.record_store.as_mut() {
            store.api_token = token;
        }
    }
    if let Ok(token) = std::env::var("SKILLSHEET_ADMIN_TOKEN") {
        config.admin_token = Some(token);
    }

    // Resolve env vars in tokens
    if let Some(store) = config.record_store.as_mut() {
        store.api_token = resolve_env_vars(&store.api_token);
        store.base_url = resolve_env_vars(&store.base_url);
    }
    if let Some(notifications) = config.notifications.as_mut() {
        notifications.api_token = resolve_env_vars(&notifications.api_token);
        notifications.base_url = resolve_env_vars(&notifications.base_url);
    }

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("skillsheet"))
}
