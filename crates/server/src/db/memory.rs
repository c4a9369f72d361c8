//! In-process [`Store`] used by tests and by servers started without a
//! `database_url`. Every operation takes the single table lock, so the
//! conditional transitions are as atomic here as they are in Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetwatch_common::wire::SystemInfo;
use fleetwatch_common::{CommandStatus, ServerStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{
    Alert, AlertFilter, AlertRule, Command, MetricSample, NewAlert, NewAlertRule, NewCommand,
    NewMetricSample, NewServer, Server, ServerPatch, ServiceStatus,
};
use super::store::{Store, StoreError};

#[derive(Default)]
struct Tables {
    // Insertion order doubles as the tie-breaker for equal timestamps.
    servers: Vec<Server>,
    metrics: Vec<MetricSample>,
    services: HashMap<(Uuid, String), ServiceStatus>,
    commands: Vec<Command>,
    alerts: Vec<Alert>,
    alert_rules: Vec<AlertRule>,
}

impl Tables {
    fn server_mut(&mut self, id: Uuid) -> Option<&mut Server> {
        self.servers.iter_mut().find(|s| s.id == id)
    }

    fn alert_mut(&mut self, id: Uuid) -> Option<&mut Alert> {
        self.alerts.iter_mut().find(|a| a.id == id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_server(&self, new: NewServer) -> Result<Server, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.servers.iter().any(|s| s.api_key == new.api_key) {
            return Err(StoreError::Conflict("api key already in use".to_string()));
        }
        let server = Server {
            id: Uuid::new_v4(),
            name: new.name,
            hostname: new.hostname,
            provider: new.provider,
            api_key: new.api_key,
            status: new.status,
            last_seen: None,
            system_info: new.system_info,
            tags: new.tags,
            notes: new.notes,
            created_at: Utc::now(),
        };
        tables.servers.push(server.clone());
        Ok(server)
    }

    async fn get_server(&self, id: Uuid) -> Result<Option<Server>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.servers.iter().find(|s| s.id == id).cloned())
    }

    async fn list_servers(&self) -> Result<Vec<Server>, StoreError> {
        let tables = self.tables.read().await;
        let mut servers: Vec<Server> = tables.servers.iter().rev().cloned().collect();
        servers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(servers)
    }

    async fn find_server_by_api_key(&self, api_key: &str) -> Result<Option<Server>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.servers.iter().find(|s| s.api_key == api_key).cloned())
    }

    async fn find_server_by_hostname(&self, hostname: &str) -> Result<Option<Server>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.servers.iter().find(|s| s.hostname == hostname).cloned())
    }

    async fn update_server(&self, id: Uuid, patch: ServerPatch) -> Result<Option<Server>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(server) = tables.server_mut(id) else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            server.name = name;
        }
        if let Some(hostname) = patch.hostname {
            server.hostname = hostname;
        }
        if patch.provider.is_some() {
            server.provider = patch.provider;
        }
        if let Some(tags) = patch.tags {
            server.tags = tags;
        }
        if patch.notes.is_some() {
            server.notes = patch.notes;
        }
        Ok(Some(server.clone()))
    }

    async fn delete_server(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.servers.len();
        tables.servers.retain(|s| s.id != id);
        if tables.servers.len() == before {
            return Ok(false);
        }
        tables.metrics.retain(|m| m.server_id != id);
        tables.services.retain(|(server_id, _), _| *server_id != id);
        tables.commands.retain(|c| c.server_id != id);
        tables.alerts.retain(|a| a.server_id != Some(id));
        let removed_rules: Vec<Uuid> = tables
            .alert_rules
            .iter()
            .filter(|r| r.server_id == Some(id))
            .map(|r| r.id)
            .collect();
        tables.alert_rules.retain(|r| r.server_id != Some(id));
        for alert in tables.alerts.iter_mut() {
            if alert.rule_id.is_some_and(|rule_id| removed_rules.contains(&rule_id)) {
                alert.rule_id = None;
            }
        }
        Ok(true)
    }

    async fn record_contact(&self, id: Uuid, seen_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(server) = tables.server_mut(id) else {
            return Ok(false);
        };
        server.last_seen = Some(seen_at);
        if server.status != ServerStatus::Warning {
            server.status = ServerStatus::Online;
        }
        Ok(true)
    }

    async fn update_system_info(&self, id: Uuid, info: SystemInfo) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(server) = tables.server_mut(id) else {
            return Ok(false);
        };
        server.system_info = info;
        Ok(true)
    }

    async fn set_server_status(&self, id: Uuid, status: ServerStatus) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.server_mut(id) {
            Some(server) if server.status != status => {
                server.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_stale_offline(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut tables = self.tables.write().await;
        let mut changed = Vec::new();
        for server in tables.servers.iter_mut() {
            let stale = server.last_seen.is_none_or(|seen| seen < cutoff);
            if stale && server.status != ServerStatus::Offline {
                server.status = ServerStatus::Offline;
                changed.push(server.id);
            }
        }
        Ok(changed)
    }

    async fn insert_metric(&self, sample: NewMetricSample) -> Result<MetricSample, StoreError> {
        let mut tables = self.tables.write().await;
        let stored = MetricSample {
            id: Uuid::new_v4(),
            server_id: sample.server_id,
            timestamp: sample.timestamp,
            cpu_usage: sample.cpu_usage,
            memory: sample.memory,
            disk: sample.disk,
            network: sample.network,
            load_average: sample.load_average,
        };
        tables.metrics.push(stored.clone());
        Ok(stored)
    }

    async fn metrics_since(
        &self,
        server_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let tables = self.tables.read().await;
        let mut samples: Vec<MetricSample> = tables
            .metrics
            .iter()
            .filter(|m| m.server_id == server_id && m.timestamp >= since)
            .cloned()
            .collect();
        samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(samples)
    }

    async fn recent_metrics(&self, server_id: Uuid, limit: u32) -> Result<Vec<MetricSample>, StoreError> {
        let tables = self.tables.read().await;
        let mut samples: Vec<MetricSample> = tables
            .metrics
            .iter()
            .rev()
            .filter(|m| m.server_id == server_id)
            .cloned()
            .collect();
        samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        samples.truncate(limit as usize);
        Ok(samples)
    }

    async fn latest_metric(&self, server_id: Uuid) -> Result<Option<MetricSample>, StoreError> {
        Ok(self.recent_metrics(server_id, 1).await?.into_iter().next())
    }

    async fn prune_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.metrics.len();
        tables.metrics.retain(|m| m.timestamp >= cutoff);
        Ok((before - tables.metrics.len()) as u64)
    }

    async fn upsert_service(&self, service: ServiceStatus) -> Result<ServiceStatus, StoreError> {
        let mut tables = self.tables.write().await;
        let key = (service.server_id, service.service_name.clone());
        tables.services.insert(key, service.clone());
        Ok(service)
    }

    async fn list_services(&self, server_id: Uuid) -> Result<Vec<ServiceStatus>, StoreError> {
        let tables = self.tables.read().await;
        let mut services: Vec<ServiceStatus> = tables
            .services
            .values()
            .filter(|s| s.server_id == server_id)
            .cloned()
            .collect();
        services.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        Ok(services)
    }

    async fn insert_command(
        &self,
        new: NewCommand,
        created_at: DateTime<Utc>,
    ) -> Result<Command, StoreError> {
        let mut tables = self.tables.write().await;
        let command = Command {
            id: Uuid::new_v4(),
            server_id: new.server_id,
            command_type: new.command_type,
            command: new.command,
            status: CommandStatus::Pending,
            output: None,
            created_at,
            executed_at: None,
        };
        tables.commands.push(command.clone());
        Ok(command)
    }

    async fn get_command(&self, id: Uuid) -> Result<Option<Command>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.commands.iter().find(|c| c.id == id).cloned())
    }

    async fn list_commands(&self, server_id: Uuid, limit: u32) -> Result<Vec<Command>, StoreError> {
        let tables = self.tables.read().await;
        let mut commands: Vec<Command> = tables
            .commands
            .iter()
            .rev()
            .filter(|c| c.server_id == server_id)
            .cloned()
            .collect();
        commands.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        commands.truncate(limit as usize);
        Ok(commands)
    }

    async fn claim_pending_commands(
        &self,
        server_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<Vec<Command>, StoreError> {
        let mut tables = self.tables.write().await;
        let mut claimed = Vec::new();
        for command in tables.commands.iter_mut() {
            if command.server_id == server_id && command.status == CommandStatus::Pending {
                command.status = CommandStatus::Executing;
                command.executed_at = Some(claimed_at);
                claimed.push(command.clone());
            }
        }
        claimed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(claimed)
    }

    async fn finish_command(
        &self,
        id: Uuid,
        status: CommandStatus,
        output: &str,
    ) -> Result<Option<Command>, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.commands.iter_mut().find(|c| c.id == id) {
            Some(command) if command.status == CommandStatus::Executing => {
                command.status = status;
                command.output = Some(output.to_string());
                Ok(Some(command.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_alert(&self, new: NewAlert) -> Result<Alert, StoreError> {
        let mut tables = self.tables.write().await;
        let alert = Alert {
            id: Uuid::new_v4(),
            server_id: new.server_id,
            rule_id: new.rule_id,
            metric: new.metric,
            operator: new.operator,
            threshold: new.threshold,
            observed_value: new.observed_value,
            severity: new.severity,
            message: new.message,
            acknowledged: false,
            acknowledged_at: None,
            resolved: false,
            resolved_at: None,
            created_at: Utc::now(),
        };
        tables.alerts.push(alert.clone());
        Ok(alert)
    }

    async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>, StoreError> {
        let tables = self.tables.read().await;
        let mut alerts: Vec<Alert> = tables
            .alerts
            .iter()
            .rev()
            .filter(|a| a.resolved == filter.resolved)
            .filter(|a| filter.server_id.is_none() || a.server_id == filter.server_id)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    async fn open_alert_for_rule(
        &self,
        rule_id: Uuid,
        server_id: Uuid,
    ) -> Result<Option<Alert>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .alerts
            .iter()
            .rev()
            .find(|a| a.rule_id == Some(rule_id) && a.server_id == Some(server_id) && !a.resolved)
            .cloned())
    }

    async fn count_open_alerts(&self, server_id: Uuid) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .alerts
            .iter()
            .filter(|a| a.server_id == Some(server_id) && !a.resolved)
            .count() as u64)
    }

    async fn acknowledge_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Alert>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(alert) = tables.alert_mut(id) else {
            return Ok(None);
        };
        alert.acknowledged = true;
        alert.acknowledged_at.get_or_insert(at);
        Ok(Some(alert.clone()))
    }

    async fn resolve_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Alert>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(alert) = tables.alert_mut(id) else {
            return Ok(None);
        };
        alert.resolved = true;
        alert.resolved_at.get_or_insert(at);
        Ok(Some(alert.clone()))
    }

    async fn create_alert_rule(&self, new: NewAlertRule) -> Result<AlertRule, StoreError> {
        let mut tables = self.tables.write().await;
        let rule = AlertRule {
            id: Uuid::new_v4(),
            name: new.name,
            server_id: new.server_id,
            metric: new.metric,
            operator: new.operator,
            threshold: new.threshold,
            severity: new.severity,
            enabled: new.enabled,
            created_at: Utc::now(),
        };
        tables.alert_rules.push(rule.clone());
        Ok(rule)
    }

    async fn list_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        let tables = self.tables.read().await;
        let mut rules = tables.alert_rules.clone();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rules)
    }

    async fn get_alert_rule(&self, id: Uuid) -> Result<Option<AlertRule>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.alert_rules.iter().find(|r| r.id == id).cloned())
    }

    async fn set_alert_rule_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> Result<Option<AlertRule>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(rule) = tables.alert_rules.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        rule.enabled = enabled;
        Ok(Some(rule.clone()))
    }

    async fn delete_alert_rule(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.alert_rules.len();
        tables.alert_rules.retain(|r| r.id != id);
        if tables.alert_rules.len() == before {
            return Ok(false);
        }
        for alert in tables.alerts.iter_mut() {
            if alert.rule_id == Some(id) {
                alert.rule_id = None;
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::{AlertMetric, Comparison, Severity};
    use chrono::Duration;
    use fleetwatch_common::wire::{DiskStats, MemoryStats, NetworkStats};
    use fleetwatch_common::{CommandType, ServiceState};

    fn new_server(name: &str, api_key: &str) -> NewServer {
        NewServer {
            name: name.to_string(),
            hostname: format!("{name}.local"),
            provider: None,
            api_key: api_key.to_string(),
            status: ServerStatus::Offline,
            system_info: SystemInfo::default(),
            tags: Vec::new(),
            notes: None,
        }
    }

    fn sample(server_id: Uuid, at: DateTime<Utc>, cpu: f64) -> NewMetricSample {
        NewMetricSample {
            server_id,
            timestamp: at,
            cpu_usage: cpu,
            memory: MemoryStats::default(),
            disk: DiskStats::default(),
            network: NetworkStats::default(),
            load_average: [0.0; 3],
        }
    }

    #[tokio::test]
    async fn duplicate_api_key_is_a_conflict() {
        let store = MemoryStore::new();
        store.create_server(new_server("a", "k1")).await.unwrap();
        let err = store.create_server(new_server("b", "k1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn claim_moves_each_pending_command_once() {
        let store = MemoryStore::new();
        let server = store.create_server(new_server("a", "k1")).await.unwrap();
        let t0 = Utc::now();
        for (i, text) in ["uptime", "df -h"].into_iter().enumerate() {
            store
                .insert_command(
                    NewCommand {
                        server_id: server.id,
                        command_type: CommandType::Execute,
                        command: text.to_string(),
                    },
                    t0 + Duration::seconds(i as i64),
                )
                .await
                .unwrap();
        }

        let first = store.claim_pending_commands(server.id, t0).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].command, "uptime");
        assert!(first.iter().all(|c| c.status == CommandStatus::Executing));

        let second = store.claim_pending_commands(server.id, t0).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn finish_requires_executing() {
        let store = MemoryStore::new();
        let server = store.create_server(new_server("a", "k1")).await.unwrap();
        let cmd = store
            .insert_command(
                NewCommand {
                    server_id: server.id,
                    command_type: CommandType::Execute,
                    command: "true".to_string(),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let early = store
            .finish_command(cmd.id, CommandStatus::Completed, "x")
            .await
            .unwrap();
        assert!(early.is_none());

        store.claim_pending_commands(server.id, Utc::now()).await.unwrap();
        let done = store
            .finish_command(cmd.id, CommandStatus::Completed, "ok")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.output.as_deref(), Some("ok"));

        let again = store
            .finish_command(cmd.id, CommandStatus::Failed, "late")
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn contact_keeps_warning_and_sweep_marks_offline() {
        let store = MemoryStore::new();
        let server = store.create_server(new_server("a", "k1")).await.unwrap();
        let now = Utc::now();

        store.record_contact(server.id, now).await.unwrap();
        assert_eq!(
            store.get_server(server.id).await.unwrap().unwrap().status,
            ServerStatus::Online
        );

        store.set_server_status(server.id, ServerStatus::Warning).await.unwrap();
        store.record_contact(server.id, now).await.unwrap();
        assert_eq!(
            store.get_server(server.id).await.unwrap().unwrap().status,
            ServerStatus::Warning
        );

        let changed = store
            .mark_stale_offline(now + Duration::seconds(91))
            .await
            .unwrap();
        assert_eq!(changed, vec![server.id]);
        let again = store
            .mark_stale_offline(now + Duration::seconds(120))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn service_upsert_replaces_by_name() {
        let store = MemoryStore::new();
        let server = store.create_server(new_server("a", "k1")).await.unwrap();
        for state in [ServiceState::Running, ServiceState::Failed] {
            store
                .upsert_service(ServiceStatus {
                    server_id: server.id,
                    service_name: "nginx".to_string(),
                    status: state,
                    enabled: true,
                    port: Some(80),
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let services = store.list_services(server.id).await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].status, ServiceState::Failed);
    }

    #[tokio::test]
    async fn delete_server_cascades() {
        let store = MemoryStore::new();
        let server = store.create_server(new_server("a", "k1")).await.unwrap();
        let other = store.create_server(new_server("b", "k2")).await.unwrap();
        let now = Utc::now();
        store.insert_metric(sample(server.id, now, 10.0)).await.unwrap();
        store.insert_metric(sample(other.id, now, 20.0)).await.unwrap();
        let rule = store
            .create_alert_rule(NewAlertRule {
                name: "cpu".to_string(),
                server_id: Some(server.id),
                metric: AlertMetric::Cpu,
                operator: Comparison::Gt,
                threshold: 90.0,
                severity: Severity::Warning,
                enabled: true,
            })
            .await
            .unwrap();

        assert!(store.delete_server(server.id).await.unwrap());
        assert!(store.recent_metrics(server.id, 10).await.unwrap().is_empty());
        assert_eq!(store.recent_metrics(other.id, 10).await.unwrap().len(), 1);
        assert!(store.get_alert_rule(rule.id).await.unwrap().is_none());
        assert!(!store.delete_server(server.id).await.unwrap());
    }

    #[tokio::test]
    async fn metric_queries_and_pruning() {
        let store = MemoryStore::new();
        let server = store.create_server(new_server("a", "k1")).await.unwrap();
        let now = Utc::now();
        for minutes in [30, 20, 10] {
            store
                .insert_metric(sample(server.id, now - Duration::minutes(minutes), minutes as f64))
                .await
                .unwrap();
        }

        let since = store
            .metrics_since(server.id, now - Duration::minutes(25))
            .await
            .unwrap();
        assert_eq!(
            since.iter().map(|m| m.cpu_usage).collect::<Vec<_>>(),
            vec![20.0, 10.0]
        );

        let latest = store.latest_metric(server.id).await.unwrap().unwrap();
        assert_eq!(latest.cpu_usage, 10.0);

        let pruned = store
            .prune_metrics_before(now - Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(pruned, 2);
    }
}
