use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Without a database URL the server keeps everything in memory.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_db_connections")]
    pub max_db_connections: u32,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_public_url")]
    pub public_url: String,

    #[serde(default)]
    pub agent_download_url: Option<String>,

    #[serde(default)]
    pub dashboard_token: Option<String>,

    #[serde(default)]
    pub enrollment_token: Option<String>,

    #[serde(default = "default_staleness_threshold_seconds")]
    pub staleness_threshold_seconds: u64,

    #[serde(default = "default_status_sweep_interval_seconds")]
    pub status_sweep_interval_seconds: u64,

    #[serde(default = "default_metrics_retention_hours")]
    pub metrics_retention_hours: u64,

    #[serde(default = "default_retention_interval_seconds")]
    pub retention_interval_seconds: u64,

    #[serde(default = "default_alert_evaluation_interval_seconds")]
    pub alert_evaluation_interval_seconds: u64,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    listen_address: Option<String>,
    database_url: Option<String>,
    max_db_connections: Option<u32>,
    log_dir: Option<String>,
    public_url: Option<String>,
    agent_download_url: Option<String>,
    dashboard_token: Option<String>,
    enrollment_token: Option<String>,
    staleness_threshold_seconds: Option<u64>,
    status_sweep_interval_seconds: Option<u64>,
    metrics_retention_hours: Option<u64>,
    retention_interval_seconds: Option<u64>,
    alert_evaluation_interval_seconds: Option<u64>,
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_db_connections() -> u32 {
    10
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_staleness_threshold_seconds() -> u64 {
    90
}

fn default_status_sweep_interval_seconds() -> u64 {
    30
}

fn default_metrics_retention_hours() -> u64 {
    168
}

fn default_retention_interval_seconds() -> u64 {
    3600
}

fn default_alert_evaluation_interval_seconds() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::merge(PartialServerConfig::default(), PartialServerConfig::default())
    }
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = match config_path {
            Some(path_str) if Path::new(path_str).exists() => {
                let path = Path::new(path_str);
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            }
            _ => PartialServerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        let config = Self::merge(env_config, file_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(env: PartialServerConfig, file: PartialServerConfig) -> Self {
        ServerConfig {
            listen_address: env
                .listen_address
                .or(file.listen_address)
                .unwrap_or_else(default_listen_address),
            database_url: env
                .database_url
                .or(file.database_url)
                .filter(|u| !u.is_empty()),
            max_db_connections: env
                .max_db_connections
                .or(file.max_db_connections)
                .unwrap_or_else(default_max_db_connections),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
            public_url: env
                .public_url
                .or(file.public_url)
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(default_public_url),
            agent_download_url: env.agent_download_url.or(file.agent_download_url),
            dashboard_token: env
                .dashboard_token
                .or(file.dashboard_token)
                .filter(|t| !t.is_empty()),
            enrollment_token: env
                .enrollment_token
                .or(file.enrollment_token)
                .filter(|t| !t.is_empty()),
            staleness_threshold_seconds: env
                .staleness_threshold_seconds
                .or(file.staleness_threshold_seconds)
                .unwrap_or_else(default_staleness_threshold_seconds),
            status_sweep_interval_seconds: env
                .status_sweep_interval_seconds
                .or(file.status_sweep_interval_seconds)
                .unwrap_or_else(default_status_sweep_interval_seconds),
            metrics_retention_hours: env
                .metrics_retention_hours
                .or(file.metrics_retention_hours)
                .unwrap_or_else(default_metrics_retention_hours),
            retention_interval_seconds: env
                .retention_interval_seconds
                .or(file.retention_interval_seconds)
                .unwrap_or_else(default_retention_interval_seconds),
            alert_evaluation_interval_seconds: env
                .alert_evaluation_interval_seconds
                .or(file.alert_evaluation_interval_seconds)
                .unwrap_or_else(default_alert_evaluation_interval_seconds),
        }
    }

    fn validate(&self) -> Result<(), String> {
        let intervals = [
            ("STATUS_SWEEP_INTERVAL_SECONDS", self.status_sweep_interval_seconds),
            ("RETENTION_INTERVAL_SECONDS", self.retention_interval_seconds),
            (
                "ALERT_EVALUATION_INTERVAL_SECONDS",
                self.alert_evaluation_interval_seconds,
            ),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(format!("{name} must be greater than zero"));
            }
        }
        Ok(())
    }

    /// Where installers and self-updates fetch the agent binary from.
    pub fn agent_download_url(&self) -> String {
        self.agent_download_url
            .clone()
            .unwrap_or_else(|| format!("{}/downloads/fleetwatch-agent", self.public_url))
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        let seconds = i64::try_from(self.staleness_threshold_seconds).unwrap_or(i64::MAX / 1000);
        chrono::Duration::seconds(seconds)
    }
}
