use chrono::Utc;
use fleetwatch_common::ServerStatus;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::db::enums::AlertMetric;
use crate::db::models::{Alert, AlertFilter, AlertRule, MetricSample, NewAlert, Server};
use crate::db::{Store, StoreError};
use crate::server::events::{ChangeEvent, EventBroadcaster};

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Database query error: {0}")]
    DatabaseError(#[from] StoreError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub raised: usize,
    pub resolved: usize,
}

pub fn observed_value(metric: AlertMetric, sample: &MetricSample) -> f64 {
    match metric {
        AlertMetric::Cpu => sample.cpu_usage,
        AlertMetric::Memory => sample.memory.percent,
        AlertMetric::Disk => sample.disk.percent,
        AlertMetric::Load => sample.load_average[0],
    }
}

/// Turns enabled rules into alert incidents and owns the `warning` status.
pub struct EvaluationService {
    store: Arc<dyn Store>,
    events: EventBroadcaster,
}

impl EvaluationService {
    pub fn new(store: Arc<dyn Store>, events: EventBroadcaster) -> Self {
        Self { store, events }
    }

    pub async fn start_periodic_evaluation(self: Arc<Self>, period_seconds: u64) {
        info!(
            interval_seconds = period_seconds,
            "Alert evaluation service started."
        );
        let mut interval = interval(Duration::from_secs(period_seconds));
        loop {
            interval.tick().await;
            debug!("Running alert evaluation cycle...");
            if let Err(e) = self.run_evaluation_cycle().await {
                error!(error = %e, "Error during alert evaluation cycle.");
            }
        }
    }

    pub async fn run_evaluation_cycle(&self) -> Result<CycleSummary, EvaluationError> {
        let rules: Vec<AlertRule> = self
            .store
            .list_alert_rules()
            .await?
            .into_iter()
            .filter(|r| r.enabled)
            .collect();
        if rules.is_empty() {
            return Ok(CycleSummary::default());
        }
        let servers = self.store.list_servers().await?;
        debug!(rules = rules.len(), servers = servers.len(), "Evaluating alert rules.");

        let mut summary = CycleSummary::default();
        for rule in &rules {
            let targets = servers
                .iter()
                .filter(|s| rule.server_id.is_none_or(|id| id == s.id))
                .filter(|s| s.status != ServerStatus::Offline);
            for server in targets {
                match self.evaluate_rule_for_server(rule, server).await {
                    Ok(Some(true)) => summary.raised += 1,
                    Ok(Some(false)) => summary.resolved += 1,
                    Ok(None) => {}
                    Err(e) => {
                        error!(rule_name = %rule.name, rule_id = %rule.id, server_id = %server.id, error = %e, "Error evaluating rule.");
                    }
                }
            }
        }

        if summary.raised > 0 || summary.resolved > 0 {
            info!(raised = summary.raised, resolved = summary.resolved, "Alert evaluation cycle finished.");
        }
        Ok(summary)
    }

    /// `Some(true)` when an incident was opened, `Some(false)` when one was resolved.
    async fn evaluate_rule_for_server(
        &self,
        rule: &AlertRule,
        server: &Server,
    ) -> Result<Option<bool>, EvaluationError> {
        let Some(latest) = self.store.latest_metric(server.id).await? else {
            return Ok(None);
        };
        let value = observed_value(rule.metric, &latest);
        let breached = rule.operator.holds(value, rule.threshold);
        let open = self.store.open_alert_for_rule(rule.id, server.id).await?;

        match (breached, open) {
            (true, None) => {
                let alert = self.raise(rule, server, value).await?;
                info!(rule_name = %rule.name, server_id = %server.id, alert_id = %alert.id, value, "Alert rule triggered.");
                Ok(Some(true))
            }
            (false, Some(open)) => {
                self.resolve(open.id).await?;
                info!(rule_name = %rule.name, server_id = %server.id, alert_id = %open.id, value, "Alert condition cleared.");
                Ok(Some(false))
            }
            // Contact after an offline spell moves the server to `online`
            // while the incident is still open.
            (true, Some(open)) if server.status != ServerStatus::Warning => {
                self.mark_warning(server.id).await?;
                info!(rule_name = %rule.name, server_id = %server.id, alert_id = %open.id, "Warning restored for open alert.");
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Enables or disables a rule. Disabling resolves the incidents it holds open.
    pub async fn set_rule_enabled(
        &self,
        rule_id: Uuid,
        enabled: bool,
    ) -> Result<Option<AlertRule>, StoreError> {
        let rule = self.store.set_alert_rule_enabled(rule_id, enabled).await?;
        if rule.is_some() && !enabled {
            self.resolve_rule_incidents(rule_id).await?;
        }
        Ok(rule)
    }

    /// Resolves the rule's open incidents, then deletes it.
    pub async fn delete_rule(&self, rule_id: Uuid) -> Result<bool, StoreError> {
        if self.store.get_alert_rule(rule_id).await?.is_none() {
            return Ok(false);
        }
        self.resolve_rule_incidents(rule_id).await?;
        self.store.delete_alert_rule(rule_id).await
    }

    async fn resolve_rule_incidents(&self, rule_id: Uuid) -> Result<usize, StoreError> {
        let open = self
            .store
            .list_alerts(AlertFilter {
                server_id: None,
                resolved: false,
            })
            .await?;
        let mut resolved = 0;
        for alert in open.into_iter().filter(|a| a.rule_id == Some(rule_id)) {
            self.resolve(alert.id).await?;
            resolved += 1;
        }
        if resolved > 0 {
            info!(rule_id = %rule_id, resolved, "Resolved open alerts of retired rule.");
        }
        Ok(resolved)
    }

    async fn mark_warning(&self, server_id: Uuid) -> Result<(), StoreError> {
        if self
            .store
            .set_server_status(server_id, ServerStatus::Warning)
            .await?
        {
            self.events.publish(ChangeEvent::StatusChanged {
                server_id,
                status: ServerStatus::Warning,
            });
        }
        Ok(())
    }

    async fn raise(&self, rule: &AlertRule, server: &Server, value: f64) -> Result<Alert, StoreError> {
        self.open_incident(NewAlert {
            server_id: Some(server.id),
            rule_id: Some(rule.id),
            metric: rule.metric,
            operator: rule.operator,
            threshold: rule.threshold,
            observed_value: value,
            severity: rule.severity,
            message: format!(
                "{}: {} {} {} (observed {:.1}) on {}",
                rule.name,
                rule.metric,
                rule.operator.symbol(),
                rule.threshold,
                value,
                server.name
            ),
        })
        .await
    }

    /// Records an incident reported by the server's own agent. It has no
    /// rule, so it stays open until someone resolves it.
    pub async fn record_agent_alert(
        &self,
        server_id: Uuid,
        new: NewAlert,
    ) -> Result<Alert, StoreError> {
        let alert = self
            .open_incident(NewAlert {
                server_id: Some(server_id),
                rule_id: None,
                ..new
            })
            .await?;
        info!(server_id = %server_id, alert_id = %alert.id, severity = %alert.severity, "Agent reported an alert.");
        Ok(alert)
    }

    async fn open_incident(&self, new: NewAlert) -> Result<Alert, StoreError> {
        let alert = self.store.insert_alert(new).await?;
        if let Some(server_id) = alert.server_id {
            self.events.publish(ChangeEvent::AlertRaised {
                server_id,
                alert_id: alert.id,
            });
            self.mark_warning(server_id).await?;
        }
        Ok(alert)
    }

    /// Resolves an incident and lifts `warning` once none remain open.
    pub async fn resolve(&self, alert_id: Uuid) -> Result<Option<Alert>, StoreError> {
        let resolved = self.store.resolve_alert(alert_id, Utc::now()).await?;
        if let Some(server_id) = resolved.as_ref().and_then(|a| a.server_id) {
            self.events.publish(ChangeEvent::AlertResolved {
                server_id,
                alert_id,
            });
            self.clear_warning_if_quiet(server_id).await?;
        }
        Ok(resolved)
    }

    async fn clear_warning_if_quiet(&self, server_id: Uuid) -> Result<(), StoreError> {
        if self.store.count_open_alerts(server_id).await? > 0 {
            return Ok(());
        }
        let in_warning = self
            .store
            .get_server(server_id)
            .await?
            .is_some_and(|s| s.status == ServerStatus::Warning);
        if in_warning
            && self
                .store
                .set_server_status(server_id, ServerStatus::Online)
                .await?
        {
            self.events.publish(ChangeEvent::StatusChanged {
                server_id,
                status: ServerStatus::Online,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::{Comparison, Severity};
    use crate::db::models::{NewAlertRule, NewMetricSample, NewServer};
    use crate::db::MemoryStore;
    use crate::server::status_sweeper::StatusSweeper;
    use fleetwatch_common::wire::{DiskStats, MemoryStats, NetworkStats, SystemInfo};

    async fn online_server(store: &Arc<dyn Store>) -> Server {
        let server = store
            .create_server(NewServer {
                name: "web-01".to_string(),
                hostname: "web-01".to_string(),
                provider: None,
                api_key: "k".to_string(),
                status: ServerStatus::Offline,
                system_info: SystemInfo::default(),
                tags: Vec::new(),
                notes: None,
            })
            .await
            .unwrap();
        store.record_contact(server.id, Utc::now()).await.unwrap();
        server
    }

    async fn push_cpu(store: &Arc<dyn Store>, server_id: Uuid, cpu: f64) {
        store
            .insert_metric(NewMetricSample {
                server_id,
                timestamp: Utc::now(),
                cpu_usage: cpu,
                memory: MemoryStats::default(),
                disk: DiskStats::default(),
                network: NetworkStats::default(),
                load_average: [0.0; 3],
            })
            .await
            .unwrap();
    }

    async fn status_of(store: &Arc<dyn Store>, id: Uuid) -> ServerStatus {
        store.get_server(id).await.unwrap().unwrap().status
    }

    async fn high_cpu_rule(store: &Arc<dyn Store>) -> AlertRule {
        store
            .create_alert_rule(NewAlertRule {
                name: "High CPU".to_string(),
                server_id: None,
                metric: AlertMetric::Cpu,
                operator: Comparison::Gt,
                threshold: 90.0,
                severity: Severity::Critical,
                enabled: true,
            })
            .await
            .unwrap()
    }

    async fn open_alerts(store: &Arc<dyn Store>, id: Uuid) -> u64 {
        store.count_open_alerts(id).await.unwrap()
    }

    #[tokio::test]
    async fn breach_raises_once_and_clears() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let server = online_server(&store).await;
        high_cpu_rule(&store).await;
        let service = EvaluationService::new(store.clone(), EventBroadcaster::default());

        push_cpu(&store, server.id, 95.0).await;
        let first = service.run_evaluation_cycle().await.unwrap();
        assert_eq!(first, CycleSummary { raised: 1, resolved: 0 });
        assert_eq!(status_of(&store, server.id).await, ServerStatus::Warning);

        // Still breached: no duplicate incident.
        let second = service.run_evaluation_cycle().await.unwrap();
        assert_eq!(second, CycleSummary::default());

        // Contact does not clear warning on its own.
        store.record_contact(server.id, Utc::now()).await.unwrap();
        assert_eq!(status_of(&store, server.id).await, ServerStatus::Warning);

        push_cpu(&store, server.id, 20.0).await;
        let third = service.run_evaluation_cycle().await.unwrap();
        assert_eq!(third, CycleSummary { raised: 0, resolved: 1 });
        assert_eq!(status_of(&store, server.id).await, ServerStatus::Online);

        let history = store
            .list_alerts(AlertFilter {
                server_id: Some(server.id),
                resolved: true,
            })
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].message.contains("High CPU"));
    }

    #[tokio::test]
    async fn disabled_rules_and_offline_servers_are_skipped() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let server = online_server(&store).await;
        let rule = store
            .create_alert_rule(NewAlertRule {
                name: "Load".to_string(),
                server_id: Some(server.id),
                metric: AlertMetric::Load,
                operator: Comparison::Gte,
                threshold: 0.0,
                severity: Severity::Info,
                enabled: false,
            })
            .await
            .unwrap();
        push_cpu(&store, server.id, 1.0).await;
        let service = EvaluationService::new(store.clone(), EventBroadcaster::default());

        assert_eq!(service.run_evaluation_cycle().await.unwrap(), CycleSummary::default());

        store.set_alert_rule_enabled(rule.id, true).await.unwrap();
        store
            .set_server_status(server.id, ServerStatus::Offline)
            .await
            .unwrap();
        assert_eq!(service.run_evaluation_cycle().await.unwrap(), CycleSummary::default());
    }

    #[tokio::test]
    async fn warning_returns_after_offline_spell_while_breached() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let events = EventBroadcaster::default();
        let server = online_server(&store).await;
        high_cpu_rule(&store).await;
        let service = EvaluationService::new(store.clone(), events.clone());

        push_cpu(&store, server.id, 95.0).await;
        service.run_evaluation_cycle().await.unwrap();
        assert_eq!(status_of(&store, server.id).await, ServerStatus::Warning);

        let sweeper = StatusSweeper::new(store.clone(), events, 90);
        sweeper
            .sweep(Utc::now() + chrono::Duration::seconds(200))
            .await
            .unwrap();
        assert_eq!(status_of(&store, server.id).await, ServerStatus::Offline);

        store.record_contact(server.id, Utc::now()).await.unwrap();
        push_cpu(&store, server.id, 97.0).await;
        assert_eq!(status_of(&store, server.id).await, ServerStatus::Online);

        let summary = service.run_evaluation_cycle().await.unwrap();
        assert_eq!(summary, CycleSummary::default());
        assert_eq!(status_of(&store, server.id).await, ServerStatus::Warning);
        assert_eq!(open_alerts(&store, server.id).await, 1);
    }

    #[tokio::test]
    async fn disabling_a_rule_resolves_its_incidents() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let server = online_server(&store).await;
        let rule = high_cpu_rule(&store).await;
        let service = EvaluationService::new(store.clone(), EventBroadcaster::default());

        push_cpu(&store, server.id, 95.0).await;
        service.run_evaluation_cycle().await.unwrap();
        assert_eq!(status_of(&store, server.id).await, ServerStatus::Warning);

        let disabled = service.set_rule_enabled(rule.id, false).await.unwrap().unwrap();
        assert!(!disabled.enabled);
        assert_eq!(open_alerts(&store, server.id).await, 0);
        assert_eq!(status_of(&store, server.id).await, ServerStatus::Online);

        // Still breached, but nothing evaluates a disabled rule.
        service.run_evaluation_cycle().await.unwrap();
        assert_eq!(status_of(&store, server.id).await, ServerStatus::Online);
    }

    #[tokio::test]
    async fn deleting_a_rule_resolves_its_incidents() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let server = online_server(&store).await;
        let rule = high_cpu_rule(&store).await;
        let service = EvaluationService::new(store.clone(), EventBroadcaster::default());

        push_cpu(&store, server.id, 95.0).await;
        service.run_evaluation_cycle().await.unwrap();
        assert_eq!(open_alerts(&store, server.id).await, 1);

        assert!(service.delete_rule(rule.id).await.unwrap());
        assert!(store.get_alert_rule(rule.id).await.unwrap().is_none());
        assert_eq!(open_alerts(&store, server.id).await, 0);
        assert_eq!(status_of(&store, server.id).await, ServerStatus::Online);

        assert!(!service.delete_rule(rule.id).await.unwrap());
    }
}
