use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetwatch_common::wire::SystemInfo;
use fleetwatch_common::{CommandStatus, ParseEnumError, ServerStatus};
use thiserror::Error;
use uuid::Uuid;

use super::models::{
    Alert, AlertFilter, AlertRule, Command, MetricSample, NewAlert, NewAlertRule, NewCommand,
    NewMetricSample, NewServer, Server, ServerPatch, ServiceStatus,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Corrupt row in {table}: {source}")]
    CorruptRow {
        table: &'static str,
        #[source]
        source: ParseEnumError,
    },
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Row-level operations over the shared tables. Created once at start-up and
/// passed to every component as `Arc<dyn Store>`.
#[async_trait]
pub trait Store: Send + Sync {
    // --- servers ---
    async fn create_server(&self, new: NewServer) -> Result<Server, StoreError>;
    async fn get_server(&self, id: Uuid) -> Result<Option<Server>, StoreError>;
    async fn list_servers(&self) -> Result<Vec<Server>, StoreError>;
    async fn find_server_by_api_key(&self, api_key: &str) -> Result<Option<Server>, StoreError>;
    async fn find_server_by_hostname(&self, hostname: &str) -> Result<Option<Server>, StoreError>;
    async fn update_server(&self, id: Uuid, patch: ServerPatch) -> Result<Option<Server>, StoreError>;
    /// Deletes the server together with its metrics, services, commands and alerts.
    async fn delete_server(&self, id: Uuid) -> Result<bool, StoreError>;
    /// Sets `last_seen` and moves the server to `online` unless it is in `warning`.
    async fn record_contact(&self, id: Uuid, seen_at: DateTime<Utc>) -> Result<bool, StoreError>;
    async fn update_system_info(&self, id: Uuid, info: SystemInfo) -> Result<bool, StoreError>;
    async fn set_server_status(&self, id: Uuid, status: ServerStatus) -> Result<bool, StoreError>;
    /// Moves every non-offline server last seen before `cutoff` (or never) to `offline`.
    async fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;

    // --- metrics ---
    async fn insert_metric(&self, sample: NewMetricSample) -> Result<MetricSample, StoreError>;
    /// Samples with `timestamp >= since`, oldest first.
    async fn metrics_since(
        &self,
        server_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, StoreError>;
    /// Up to `limit` samples, newest first.
    async fn recent_metrics(&self, server_id: Uuid, limit: u32) -> Result<Vec<MetricSample>, StoreError>;
    async fn latest_metric(&self, server_id: Uuid) -> Result<Option<MetricSample>, StoreError>;
    async fn prune_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    // --- services ---
    async fn upsert_service(&self, service: ServiceStatus) -> Result<ServiceStatus, StoreError>;
    async fn list_services(&self, server_id: Uuid) -> Result<Vec<ServiceStatus>, StoreError>;

    // --- commands ---
    async fn insert_command(
        &self,
        new: NewCommand,
        created_at: DateTime<Utc>,
    ) -> Result<Command, StoreError>;
    async fn get_command(&self, id: Uuid) -> Result<Option<Command>, StoreError>;
    /// Up to `limit` commands, newest first.
    async fn list_commands(&self, server_id: Uuid, limit: u32) -> Result<Vec<Command>, StoreError>;
    /// Atomically moves every command still `pending` for the server to
    /// `executing` and returns exactly the rows this call moved, oldest first.
    async fn claim_pending_commands(
        &self,
        server_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<Vec<Command>, StoreError>;
    /// Writes the terminal status only if the row is currently `executing`.
    async fn finish_command(
        &self,
        id: Uuid,
        status: CommandStatus,
        output: &str,
    ) -> Result<Option<Command>, StoreError>;

    // --- alerts ---
    async fn insert_alert(&self, new: NewAlert) -> Result<Alert, StoreError>;
    async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>, StoreError>;
    async fn open_alert_for_rule(
        &self,
        rule_id: Uuid,
        server_id: Uuid,
    ) -> Result<Option<Alert>, StoreError>;
    async fn count_open_alerts(&self, server_id: Uuid) -> Result<u64, StoreError>;
    async fn acknowledge_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Alert>, StoreError>;
    async fn resolve_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Alert>, StoreError>;

    // --- alert rules ---
    async fn create_alert_rule(&self, new: NewAlertRule) -> Result<AlertRule, StoreError>;
    async fn list_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError>;
    async fn get_alert_rule(&self, id: Uuid) -> Result<Option<AlertRule>, StoreError>;
    async fn set_alert_rule_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> Result<Option<AlertRule>, StoreError>;
    async fn delete_alert_rule(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Releases pooled connections. Called once during graceful shutdown.
    async fn close(&self) {}
}
