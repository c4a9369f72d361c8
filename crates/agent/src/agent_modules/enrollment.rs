use fleetwatch_common::wire::{RegisterRequest, SystemInfo};
use std::path::Path;
use tracing::info;

use crate::agent_modules::communication::HttpGateway;
use crate::agent_modules::config::{save_agent_config, AgentConfig};
use crate::agent_modules::error::AgentError;

/// Returns the configured API key, enrolling with the gateway first when
/// the config only carries an enrollment token. A freshly issued key is
/// written back to `config_path` and the token is dropped from it.
pub async fn ensure_api_key(
    config: &mut AgentConfig,
    config_path: &Path,
    hostname: String,
    system_info: SystemInfo,
) -> Result<String, AgentError> {
    if let Some(key) = &config.api_key {
        return Ok(key.clone());
    }
    let token = config.enrollment_token.clone().ok_or_else(|| {
        AgentError::Config("neither api_key nor enrollment_token is configured".to_string())
    })?;

    info!(hostname = %hostname, "No API key configured, enrolling with the gateway.");
    let response = HttpGateway::register(
        &config.server_url,
        &token,
        &RegisterRequest {
            hostname,
            system_info,
        },
        config.request_timeout(),
    )
    .await?;

    config.api_key = Some(response.api_key.clone());
    config.enrollment_token = None;
    save_agent_config(config, config_path)?;
    info!(server_id = %response.server_id, "Enrolled; API key stored in config.");
    Ok(response.api_key)
}
