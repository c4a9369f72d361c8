//! Postgres-backed [`Store`]. Rows are read into private structs and mapped
//! into the domain records here, so nothing above this module sees `sqlx` rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetwatch_common::wire::{DiskStats, MemoryStats, NetworkStats, SystemInfo};
use fleetwatch_common::{CommandStatus, ParseEnumError, ServerStatus};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

use super::models::{
    Alert, AlertFilter, AlertRule, Command, MetricSample, NewAlert, NewAlertRule, NewCommand,
    NewMetricSample, NewServer, Server, ServerPatch, ServiceStatus,
};
use super::store::{Store, StoreError};

fn corrupt(table: &'static str) -> impl Fn(ParseEnumError) -> StoreError {
    move |source| StoreError::CorruptRow { table, source }
}

#[derive(FromRow)]
struct ServerRow {
    id: Uuid,
    name: String,
    hostname: String,
    provider: Option<String>,
    api_key: String,
    status: String,
    last_seen: Option<DateTime<Utc>>,
    system_info: Json<SystemInfo>,
    tags: Vec<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ServerRow> for Server {
    type Error = StoreError;

    fn try_from(row: ServerRow) -> Result<Self, Self::Error> {
        Ok(Server {
            id: row.id,
            name: row.name,
            hostname: row.hostname,
            provider: row.provider,
            api_key: row.api_key,
            status: row.status.parse().map_err(corrupt("servers"))?,
            last_seen: row.last_seen,
            system_info: row.system_info.0,
            tags: row.tags,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct MetricRow {
    id: Uuid,
    server_id: Uuid,
    timestamp: DateTime<Utc>,
    cpu_usage: f64,
    memory_total: i64,
    memory_used: i64,
    memory_percent: f64,
    disk_total: i64,
    disk_used: i64,
    disk_percent: f64,
    network_sent: i64,
    network_recv: i64,
    load_average: Vec<f64>,
}

impl From<MetricRow> for MetricSample {
    fn from(row: MetricRow) -> Self {
        let mut load_average = [0.0; 3];
        for (slot, value) in load_average.iter_mut().zip(row.load_average) {
            *slot = value;
        }
        MetricSample {
            id: row.id,
            server_id: row.server_id,
            timestamp: row.timestamp,
            cpu_usage: row.cpu_usage,
            memory: MemoryStats {
                total: row.memory_total.max(0) as u64,
                used: row.memory_used.max(0) as u64,
                percent: row.memory_percent,
            },
            disk: DiskStats {
                total: row.disk_total.max(0) as u64,
                used: row.disk_used.max(0) as u64,
                percent: row.disk_percent,
            },
            network: NetworkStats {
                sent: row.network_sent.max(0) as u64,
                recv: row.network_recv.max(0) as u64,
            },
            load_average,
        }
    }
}

#[derive(FromRow)]
struct ServiceRow {
    server_id: Uuid,
    service_name: String,
    status: String,
    enabled: bool,
    port: Option<i32>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ServiceRow> for ServiceStatus {
    type Error = StoreError;

    fn try_from(row: ServiceRow) -> Result<Self, Self::Error> {
        Ok(ServiceStatus {
            server_id: row.server_id,
            service_name: row.service_name,
            status: row.status.parse().map_err(corrupt("server_services"))?,
            enabled: row.enabled,
            port: row.port.and_then(|p| u16::try_from(p).ok()),
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct CommandRow {
    id: Uuid,
    server_id: Uuid,
    command_type: String,
    command: String,
    status: String,
    output: Option<String>,
    created_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
}

impl TryFrom<CommandRow> for Command {
    type Error = StoreError;

    fn try_from(row: CommandRow) -> Result<Self, Self::Error> {
        Ok(Command {
            id: row.id,
            server_id: row.server_id,
            command_type: row.command_type.parse().map_err(corrupt("server_commands"))?,
            command: row.command,
            status: row.status.parse().map_err(corrupt("server_commands"))?,
            output: row.output,
            created_at: row.created_at,
            executed_at: row.executed_at,
        })
    }
}

#[derive(FromRow)]
struct AlertRuleRow {
    id: Uuid,
    name: String,
    server_id: Option<Uuid>,
    metric: String,
    operator: String,
    threshold: f64,
    severity: String,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<AlertRuleRow> for AlertRule {
    type Error = StoreError;

    fn try_from(row: AlertRuleRow) -> Result<Self, Self::Error> {
        Ok(AlertRule {
            id: row.id,
            name: row.name,
            server_id: row.server_id,
            metric: row.metric.parse().map_err(corrupt("alert_rules"))?,
            operator: row.operator.parse().map_err(corrupt("alert_rules"))?,
            threshold: row.threshold,
            severity: row.severity.parse().map_err(corrupt("alert_rules"))?,
            enabled: row.enabled,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct AlertRow {
    id: Uuid,
    server_id: Option<Uuid>,
    rule_id: Option<Uuid>,
    metric: String,
    operator: String,
    threshold: f64,
    observed_value: f64,
    severity: String,
    message: String,
    acknowledged: bool,
    acknowledged_at: Option<DateTime<Utc>>,
    resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(Alert {
            id: row.id,
            server_id: row.server_id,
            rule_id: row.rule_id,
            metric: row.metric.parse().map_err(corrupt("alerts"))?,
            operator: row.operator.parse().map_err(corrupt("alerts"))?,
            threshold: row.threshold,
            observed_value: row.observed_value,
            severity: row.severity.parse().map_err(corrupt("alerts"))?,
            message: row.message,
            acknowledged: row.acknowledged,
            acknowledged_at: row.acknowledged_at,
            resolved: row.resolved,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
        })
    }
}

/// BIGINT holds up to `i64::MAX`; larger counters are clamped.
fn to_bigint(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn map_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn map_opt<R, T>(row: Option<R>) -> Result<Option<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    row.map(T::try_from).transpose()
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied.");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_server(&self, new: NewServer) -> Result<Server, StoreError> {
        let row = sqlx::query_as::<_, ServerRow>(
            "INSERT INTO servers (id, name, hostname, provider, api_key, status, system_info, tags, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.name)
        .bind(new.hostname)
        .bind(new.provider)
        .bind(new.api_key)
        .bind(new.status.as_str())
        .bind(Json(new.system_info))
        .bind(new.tags)
        .bind(new.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict("api key already in use".to_string())
            }
            other => StoreError::Database(other),
        })?;
        Server::try_from(row)
    }

    async fn get_server(&self, id: Uuid) -> Result<Option<Server>, StoreError> {
        let row = sqlx::query_as::<_, ServerRow>("SELECT * FROM servers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        map_opt(row)
    }

    async fn list_servers(&self) -> Result<Vec<Server>, StoreError> {
        let rows = sqlx::query_as::<_, ServerRow>("SELECT * FROM servers ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        map_all(rows)
    }

    async fn find_server_by_api_key(&self, api_key: &str) -> Result<Option<Server>, StoreError> {
        let row = sqlx::query_as::<_, ServerRow>("SELECT * FROM servers WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        map_opt(row)
    }

    async fn find_server_by_hostname(&self, hostname: &str) -> Result<Option<Server>, StoreError> {
        let row = sqlx::query_as::<_, ServerRow>(
            "SELECT * FROM servers WHERE hostname = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(hostname)
        .fetch_optional(&self.pool)
        .await?;
        map_opt(row)
    }

    async fn update_server(&self, id: Uuid, patch: ServerPatch) -> Result<Option<Server>, StoreError> {
        let row = sqlx::query_as::<_, ServerRow>(
            "UPDATE servers SET \
                name = COALESCE($2, name), \
                hostname = COALESCE($3, hostname), \
                provider = COALESCE($4, provider), \
                tags = COALESCE($5, tags), \
                notes = COALESCE($6, notes) \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(patch.name)
        .bind(patch.hostname)
        .bind(patch.provider)
        .bind(patch.tags)
        .bind(patch.notes)
        .fetch_optional(&self.pool)
        .await?;
        map_opt(row)
    }

    async fn delete_server(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_contact(&self, id: Uuid, seen_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE servers SET last_seen = $2, \
                status = CASE WHEN status = 'warning' THEN status ELSE 'online' END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(seen_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_system_info(&self, id: Uuid, info: SystemInfo) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE servers SET system_info = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(info))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_server_status(&self, id: Uuid, status: ServerStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE servers SET status = $2 WHERE id = $1 AND status <> $2")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "UPDATE servers SET status = 'offline' \
             WHERE status <> 'offline' AND (last_seen IS NULL OR last_seen < $1) \
             RETURNING id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn insert_metric(&self, sample: NewMetricSample) -> Result<MetricSample, StoreError> {
        let row = sqlx::query_as::<_, MetricRow>(
            "INSERT INTO server_metrics (id, server_id, \"timestamp\", cpu_usage, \
                memory_total, memory_used, memory_percent, disk_total, disk_used, disk_percent, \
                network_sent, network_recv, load_average) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(sample.server_id)
        .bind(sample.timestamp)
        .bind(sample.cpu_usage)
        .bind(to_bigint(sample.memory.total))
        .bind(to_bigint(sample.memory.used))
        .bind(sample.memory.percent)
        .bind(to_bigint(sample.disk.total))
        .bind(to_bigint(sample.disk.used))
        .bind(sample.disk.percent)
        .bind(to_bigint(sample.network.sent))
        .bind(to_bigint(sample.network.recv))
        .bind(sample.load_average.to_vec())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn metrics_since(
        &self,
        server_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let rows = sqlx::query_as::<_, MetricRow>(
            "SELECT * FROM server_metrics WHERE server_id = $1 AND \"timestamp\" >= $2 \
             ORDER BY \"timestamp\" ASC",
        )
        .bind(server_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MetricSample::from).collect())
    }

    async fn recent_metrics(&self, server_id: Uuid, limit: u32) -> Result<Vec<MetricSample>, StoreError> {
        let rows = sqlx::query_as::<_, MetricRow>(
            "SELECT * FROM server_metrics WHERE server_id = $1 \
             ORDER BY \"timestamp\" DESC LIMIT $2",
        )
        .bind(server_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MetricSample::from).collect())
    }

    async fn latest_metric(&self, server_id: Uuid) -> Result<Option<MetricSample>, StoreError> {
        let row = sqlx::query_as::<_, MetricRow>(
            "SELECT * FROM server_metrics WHERE server_id = $1 ORDER BY \"timestamp\" DESC LIMIT 1",
        )
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MetricSample::from))
    }

    async fn prune_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM server_metrics WHERE \"timestamp\" < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_service(&self, service: ServiceStatus) -> Result<ServiceStatus, StoreError> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "INSERT INTO server_services (server_id, service_name, status, enabled, port, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (server_id, service_name) DO UPDATE SET \
                status = EXCLUDED.status, \
                enabled = EXCLUDED.enabled, \
                port = EXCLUDED.port, \
                updated_at = EXCLUDED.updated_at \
             RETURNING *",
        )
        .bind(service.server_id)
        .bind(service.service_name)
        .bind(service.status.as_str())
        .bind(service.enabled)
        .bind(service.port.map(i32::from))
        .bind(service.updated_at)
        .fetch_one(&self.pool)
        .await?;
        ServiceStatus::try_from(row)
    }

    async fn list_services(&self, server_id: Uuid) -> Result<Vec<ServiceStatus>, StoreError> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            "SELECT * FROM server_services WHERE server_id = $1 ORDER BY service_name",
        )
        .bind(server_id)
        .fetch_all(&self.pool)
        .await?;
        map_all(rows)
    }

    async fn insert_command(
        &self,
        new: NewCommand,
        created_at: DateTime<Utc>,
    ) -> Result<Command, StoreError> {
        let row = sqlx::query_as::<_, CommandRow>(
            "INSERT INTO server_commands (id, server_id, command_type, command, status, created_at) \
             VALUES ($1, $2, $3, $4, 'pending', $5) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.server_id)
        .bind(new.command_type.as_str())
        .bind(new.command)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        Command::try_from(row)
    }

    async fn get_command(&self, id: Uuid) -> Result<Option<Command>, StoreError> {
        let row = sqlx::query_as::<_, CommandRow>("SELECT * FROM server_commands WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        map_opt(row)
    }

    async fn list_commands(&self, server_id: Uuid, limit: u32) -> Result<Vec<Command>, StoreError> {
        let rows = sqlx::query_as::<_, CommandRow>(
            "SELECT * FROM server_commands WHERE server_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(server_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        map_all(rows)
    }

    async fn claim_pending_commands(
        &self,
        server_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<Vec<Command>, StoreError> {
        // The outer `status = 'pending'` re-check makes this a compare-and-swap:
        // a row another claimant already moved is simply not returned.
        let rows = sqlx::query_as::<_, CommandRow>(
            "UPDATE server_commands SET status = 'executing', executed_at = $2 \
             WHERE id IN ( \
                SELECT id FROM server_commands \
                WHERE server_id = $1 AND status = 'pending' \
                ORDER BY created_at \
                FOR UPDATE SKIP LOCKED \
             ) AND status = 'pending' \
             RETURNING *",
        )
        .bind(server_id)
        .bind(claimed_at)
        .fetch_all(&self.pool)
        .await?;
        let mut commands: Vec<Command> = map_all(rows)?;
        commands.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(commands)
    }

    async fn finish_command(
        &self,
        id: Uuid,
        status: CommandStatus,
        output: &str,
    ) -> Result<Option<Command>, StoreError> {
        let row = sqlx::query_as::<_, CommandRow>(
            "UPDATE server_commands SET status = $2, output = $3 \
             WHERE id = $1 AND status = 'executing' RETURNING *",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(output)
        .fetch_optional(&self.pool)
        .await?;
        map_opt(row)
    }

    async fn insert_alert(&self, new: NewAlert) -> Result<Alert, StoreError> {
        let row = sqlx::query_as::<_, AlertRow>(
            "INSERT INTO alerts (id, server_id, rule_id, metric, operator, threshold, \
                observed_value, severity, message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.server_id)
        .bind(new.rule_id)
        .bind(new.metric.as_str())
        .bind(new.operator.as_str())
        .bind(new.threshold)
        .bind(new.observed_value)
        .bind(new.severity.as_str())
        .bind(new.message)
        .fetch_one(&self.pool)
        .await?;
        Alert::try_from(row)
    }

    async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT * FROM alerts WHERE ($1::uuid IS NULL OR server_id = $1) AND resolved = $2 \
             ORDER BY created_at DESC",
        )
        .bind(filter.server_id)
        .bind(filter.resolved)
        .fetch_all(&self.pool)
        .await?;
        map_all(rows)
    }

    async fn open_alert_for_rule(
        &self,
        rule_id: Uuid,
        server_id: Uuid,
    ) -> Result<Option<Alert>, StoreError> {
        let row = sqlx::query_as::<_, AlertRow>(
            "SELECT * FROM alerts WHERE rule_id = $1 AND server_id = $2 AND resolved = FALSE \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(rule_id)
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;
        map_opt(row)
    }

    async fn count_open_alerts(&self, server_id: Uuid) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM alerts WHERE server_id = $1 AND resolved = FALSE",
        )
        .bind(server_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn acknowledge_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Alert>, StoreError> {
        let row = sqlx::query_as::<_, AlertRow>(
            "UPDATE alerts SET acknowledged = TRUE, acknowledged_at = COALESCE(acknowledged_at, $2) \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        map_opt(row)
    }

    async fn resolve_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Alert>, StoreError> {
        let row = sqlx::query_as::<_, AlertRow>(
            "UPDATE alerts SET resolved = TRUE, resolved_at = COALESCE(resolved_at, $2) \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        map_opt(row)
    }

    async fn create_alert_rule(&self, new: NewAlertRule) -> Result<AlertRule, StoreError> {
        let row = sqlx::query_as::<_, AlertRuleRow>(
            "INSERT INTO alert_rules (id, name, server_id, metric, operator, threshold, severity, enabled) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.name)
        .bind(new.server_id)
        .bind(new.metric.as_str())
        .bind(new.operator.as_str())
        .bind(new.threshold)
        .bind(new.severity.as_str())
        .bind(new.enabled)
        .fetch_one(&self.pool)
        .await?;
        AlertRule::try_from(row)
    }

    async fn list_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        let rows = sqlx::query_as::<_, AlertRuleRow>("SELECT * FROM alert_rules ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        map_all(rows)
    }

    async fn get_alert_rule(&self, id: Uuid) -> Result<Option<AlertRule>, StoreError> {
        let row = sqlx::query_as::<_, AlertRuleRow>("SELECT * FROM alert_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        map_opt(row)
    }

    async fn set_alert_rule_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> Result<Option<AlertRule>, StoreError> {
        let row = sqlx::query_as::<_, AlertRuleRow>(
            "UPDATE alert_rules SET enabled = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(enabled)
        .fetch_optional(&self.pool)
        .await?;
        map_opt(row)
    }

    async fn delete_alert_rule(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_counters_clamp_instead_of_wrapping() {
        assert_eq!(to_bigint(0), 0);
        assert_eq!(to_bigint(8_589_934_592), 8_589_934_592);
        assert_eq!(to_bigint(i64::MAX as u64), i64::MAX);
        assert_eq!(to_bigint(u64::MAX), i64::MAX);
    }
}
