use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use tracing::{error, info};

use crate::agent_modules::error::AgentError;
use crate::agent_modules::service_monitor::DEFAULT_WATCHED_SERVICES;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub server_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment_token: Option<String>,
    #[serde(default = "default_metrics_interval_seconds")]
    pub metrics_interval_seconds: u64,
    #[serde(default = "default_services_interval_seconds")]
    pub services_interval_seconds: u64,
    #[serde(default = "default_command_poll_interval_seconds")]
    pub command_poll_interval_seconds: u64,
    #[serde(default = "default_command_timeout_seconds")]
    pub command_timeout_seconds: u64,
    #[serde(default = "default_watched_services")]
    pub watched_services: Vec<String>,
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: u64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_metrics_interval_seconds() -> u64 {
    30
}

fn default_services_interval_seconds() -> u64 {
    60
}

fn default_command_poll_interval_seconds() -> u64 {
    2
}

fn default_command_timeout_seconds() -> u64 {
    30
}

fn default_watched_services() -> Vec<String> {
    DEFAULT_WATCHED_SERVICES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_backoff_seconds() -> u64 {
    300
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl AgentConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_seconds)
    }

    pub fn services_interval(&self) -> Duration {
        Duration::from_secs(self.services_interval_seconds)
    }

    pub fn command_poll_interval(&self) -> Duration {
        Duration::from_secs(self.command_poll_interval_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    fn validate(&self) -> Result<(), AgentError> {
        let url = self.server_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AgentError::Config(format!(
                "server_url must be an http(s) URL, got {url:?}"
            )));
        }
        let intervals = [
            ("metrics_interval_seconds", self.metrics_interval_seconds),
            ("services_interval_seconds", self.services_interval_seconds),
            (
                "command_poll_interval_seconds",
                self.command_poll_interval_seconds,
            ),
            ("command_timeout_seconds", self.command_timeout_seconds),
            ("request_timeout_seconds", self.request_timeout_seconds),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(AgentError::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

pub fn load_agent_config(config_path: &Path) -> Result<AgentConfig, AgentError> {
    info!(path = %config_path.display(), "Attempting to load config.");

    let config_str = fs::read_to_string(config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to read agent config file.");
        AgentError::ConfigRead {
            path: config_path.display().to_string(),
            source: e,
        }
    })?;

    let mut config: AgentConfig = toml::from_str(&config_str).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to parse agent config file.");
        AgentError::from(e)
    })?;
    config.server_url = config.server_url.trim().trim_end_matches('/').to_string();
    config.api_key = config.api_key.filter(|k| !k.trim().is_empty());
    config.enrollment_token = config.enrollment_token.filter(|t| !t.trim().is_empty());
    config.validate()?;

    info!(
        server_url = %config.server_url,
        has_api_key = config.api_key.is_some(),
        "Loaded config successfully."
    );
    Ok(config)
}

/// Writes `config` back, keeping any keys in the existing file this
/// version does not know about.
pub fn save_agent_config(config: &AgentConfig, config_path: &Path) -> Result<(), AgentError> {
    let existing_content = fs::read_to_string(config_path).unwrap_or_default();
    let mut existing_toml: toml::Value = toml::from_str(&existing_content)?;

    let new_toml: toml::Value = toml::Value::try_from(config)?;

    if let (Some(existing_table), Some(new_table)) =
        (existing_toml.as_table_mut(), new_toml.as_table())
    {
        for (key, value) in new_table {
            existing_table.insert(key.clone(), value.clone());
        }
        if config.enrollment_token.is_none() {
            existing_table.remove("enrollment_token");
        }
    } else {
        existing_toml = new_toml;
    }

    let updated_content = toml::to_string_pretty(&existing_toml)?;
    fs::write(config_path, updated_content)?;

    info!(path = %config_path.display(), "Saved agent configuration.");
    Ok(())
}
