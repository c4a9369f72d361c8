//! JSON bodies exchanged between the agent and the ingestion gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{CommandStatus, CommandType, ServiceState};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DiskStats {
    pub total: u64,
    pub used: u64,
    pub percent: f64,
}

/// Cumulative interface counters since boot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkStats {
    pub sent: u64,
    pub recv: u64,
}

/// One scanned OS service as reported by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub name: String,
    pub status: ServiceState,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Body of `POST /ingest/metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsPayload {
    pub cpu_usage: f64,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub network: NetworkStats,
    #[serde(default)]
    pub load_average: [f64; 3],
    #[serde(default)]
    pub services: Vec<ServiceReport>,
    /// Collection time on the agent. The gateway substitutes its own clock when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Free-form OS and hardware descriptor of a host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemInfo {
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub architecture: Option<String>,
    pub cpu_model: Option<String>,
    pub cpu_cores: Option<u32>,
    pub total_ram: Option<u64>,
    pub total_disk: Option<u64>,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub boot_time: Option<DateTime<Utc>>,
    pub uptime_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub hostname: String,
    #[serde(default)]
    pub system_info: SystemInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub server_id: Uuid,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestAck {
    pub success: bool,
    pub server_id: Uuid,
}

/// A queued unit of remote work, as stored and as handed to agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub server_id: Uuid,
    pub command_type: CommandType,
    pub command: String,
    pub status: CommandStatus,
    pub output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

/// Body of `POST /command-result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResultRequest {
    pub id: Uuid,
    pub output: String,
    pub status: CommandStatus,
}
