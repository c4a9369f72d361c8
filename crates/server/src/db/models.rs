use chrono::{DateTime, Utc};
use fleetwatch_common::wire::{DiskStats, MemoryStats, MetricsPayload, NetworkStats, SystemInfo};
use fleetwatch_common::{CommandType, ServerStatus, ServiceState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AlertMetric, Comparison, Severity};

pub use fleetwatch_common::wire::Command;

/// A monitored host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub hostname: String,
    pub provider: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub status: ServerStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub system_info: SystemInfo,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewServer {
    pub name: String,
    pub hostname: String,
    pub provider: Option<String>,
    pub api_key: String,
    pub status: ServerStatus,
    pub system_info: SystemInfo,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

/// User-editable fields. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerPatch {
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub provider: Option<String>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<String>,
}

/// One point-in-time reading. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: Uuid,
    pub server_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub cpu_usage: f64,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub network: NetworkStats,
    pub load_average: [f64; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMetricSample {
    pub server_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub cpu_usage: f64,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub network: NetworkStats,
    pub load_average: [f64; 3],
}

impl NewMetricSample {
    pub fn from_payload(server_id: Uuid, payload: &MetricsPayload, received_at: DateTime<Utc>) -> Self {
        Self {
            server_id,
            timestamp: payload.timestamp.unwrap_or(received_at),
            cpu_usage: payload.cpu_usage,
            memory: payload.memory,
            disk: payload.disk,
            network: payload.network,
            load_average: payload.load_average,
        }
    }
}

/// Latest known state of one service on one server; keyed by `(server_id, service_name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub server_id: Uuid,
    pub service_name: String,
    pub status: ServiceState,
    pub enabled: bool,
    pub port: Option<u16>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCommand {
    pub server_id: Uuid,
    pub command_type: CommandType,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    /// `None` applies the rule to every server.
    pub server_id: Option<Uuid>,
    pub metric: AlertMetric,
    pub operator: Comparison,
    pub threshold: f64,
    pub severity: Severity,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAlertRule {
    pub name: String,
    #[serde(default)]
    pub server_id: Option<Uuid>,
    pub metric: AlertMetric,
    pub operator: Comparison,
    pub threshold: f64,
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A detected threshold breach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub server_id: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub metric: AlertMetric,
    pub operator: Comparison,
    pub threshold: f64,
    pub observed_value: f64,
    pub severity: Severity,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub server_id: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub metric: AlertMetric,
    pub operator: Comparison,
    pub threshold: f64,
    pub observed_value: f64,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AlertFilter {
    pub server_id: Option<Uuid>,
    #[serde(default)]
    pub resolved: bool,
}
