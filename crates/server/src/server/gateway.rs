use chrono::{DateTime, Utc};
use fleetwatch_common::wire::{
    CommandResultRequest, IngestAck, MetricsPayload, RegisterRequest, RegisterResponse,
    ServiceReport, SystemInfo,
};
use fleetwatch_common::ServerStatus;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::models::{Command, NewMetricSample, NewServer, Server, ServiceStatus};
use crate::db::{Store, StoreError};
use crate::server::command_queue::{CommandQueue, QueueError};
use crate::server::events::{ChangeEvent, EventBroadcaster};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid or missing credentials")]
    Unauthorized,
    #[error("Agent self-registration is disabled")]
    RegistrationDisabled,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 32 random bytes, hex encoded.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// The authenticated boundary agents talk to. Everything here acts on behalf
/// of the server that owns the presented API key and nothing else.
pub struct IngestionGateway {
    store: Arc<dyn Store>,
    queue: Arc<CommandQueue>,
    events: EventBroadcaster,
    enrollment_token: Option<String>,
}

impl IngestionGateway {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<CommandQueue>,
        events: EventBroadcaster,
        enrollment_token: Option<String>,
    ) -> Self {
        Self {
            store,
            queue,
            events,
            enrollment_token: enrollment_token.filter(|t| !t.is_empty()),
        }
    }

    pub async fn authenticate(&self, api_key: Option<&str>) -> Result<Server, GatewayError> {
        let key = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(GatewayError::Unauthorized)?;
        self.store
            .find_server_by_api_key(key)
            .await?
            .ok_or(GatewayError::Unauthorized)
    }

    /// Enrolls an agent by hostname. A host that registered before gets its
    /// existing identity back, so reinstalling an agent does not duplicate servers.
    pub async fn register(
        &self,
        enrollment_token: Option<&str>,
        request: RegisterRequest,
    ) -> Result<RegisterResponse, GatewayError> {
        let expected = self
            .enrollment_token
            .as_deref()
            .ok_or(GatewayError::RegistrationDisabled)?;
        if enrollment_token != Some(expected) {
            return Err(GatewayError::Unauthorized);
        }

        let hostname = request.hostname.trim().to_string();
        if hostname.is_empty() {
            return Err(GatewayError::InvalidInput("hostname is required".to_string()));
        }

        if let Some(existing) = self.store.find_server_by_hostname(&hostname).await? {
            self.store
                .update_system_info(existing.id, request.system_info)
                .await?;
            info!(server_id = %existing.id, hostname = %hostname, "Agent re-registered.");
            return Ok(RegisterResponse {
                server_id: existing.id,
                api_key: existing.api_key,
            });
        }

        let public_ip = request
            .system_info
            .public_ip
            .clone()
            .filter(|ip| !ip.is_empty() && ip != "unknown");
        let name = match public_ip.as_deref() {
            Some(ip) => format!("{hostname}-{}", ip.replace(['.', ':'], "-")),
            None => hostname.clone(),
        };
        let server = self
            .store
            .create_server(NewServer {
                name,
                hostname: hostname.clone(),
                provider: public_ip,
                api_key: generate_api_key(),
                status: ServerStatus::Offline,
                system_info: request.system_info,
                tags: Vec::new(),
                notes: None,
            })
            .await?;
        info!(server_id = %server.id, hostname = %hostname, "Registered new server.");
        self.events.publish(ChangeEvent::ServerRegistered {
            server_id: server.id,
        });
        Ok(RegisterResponse {
            server_id: server.id,
            api_key: server.api_key,
        })
    }

    pub async fn update_system_info(
        &self,
        server_id: Uuid,
        info: SystemInfo,
    ) -> Result<IngestAck, GatewayError> {
        if !self.store.update_system_info(server_id, info).await? {
            return Err(GatewayError::NotFound(format!("server {server_id}")));
        }
        Ok(IngestAck {
            success: true,
            server_id,
        })
    }

    /// Stores the sample and marks the server as seen. Services riding along
    /// in the same payload are upserted afterwards; a failure there is logged
    /// and does not undo the metrics write.
    pub async fn ingest_metrics(
        &self,
        server_id: Uuid,
        payload: MetricsPayload,
    ) -> Result<IngestAck, GatewayError> {
        let received_at = Utc::now();
        let sample = NewMetricSample::from_payload(server_id, &payload, received_at);
        self.store.insert_metric(sample).await?;
        self.store.record_contact(server_id, received_at).await?;
        self.events.publish(ChangeEvent::MetricsIngested { server_id });

        if !payload.services.is_empty() {
            match self
                .upsert_services(server_id, &payload.services, received_at)
                .await
            {
                Ok(count) => info!(server_id = %server_id, count, "Metrics and services ingested."),
                Err(e) => {
                    error!(server_id = %server_id, error = %e, "Metrics ingested but service upsert failed.")
                }
            }
        }

        Ok(IngestAck {
            success: true,
            server_id,
        })
    }

    pub async fn ingest_services(
        &self,
        server_id: Uuid,
        services: Vec<ServiceReport>,
    ) -> Result<IngestAck, GatewayError> {
        let now = Utc::now();
        let count = self.upsert_services(server_id, &services, now).await?;
        self.store.record_contact(server_id, now).await?;
        info!(server_id = %server_id, count, "Services ingested.");
        Ok(IngestAck {
            success: true,
            server_id,
        })
    }

    pub async fn list_pending_commands(&self, server_id: Uuid) -> Result<Vec<Command>, GatewayError> {
        Ok(self.queue.claim_pending(server_id).await?)
    }

    /// Accepts a result only for commands owned by the reporting server.
    pub async fn report_command_result(
        &self,
        server_id: Uuid,
        result: CommandResultRequest,
    ) -> Result<Command, GatewayError> {
        let owned = self
            .queue
            .get(result.id)
            .await?
            .is_some_and(|cmd| cmd.server_id == server_id);
        if !owned {
            warn!(server_id = %server_id, command_id = %result.id, "Result reported for unknown command.");
            return Err(GatewayError::NotFound(format!("command {}", result.id)));
        }
        Ok(self
            .queue
            .complete(result.id, result.status, &result.output)
            .await?)
    }

    async fn upsert_services(
        &self,
        server_id: Uuid,
        services: &[ServiceReport],
        updated_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        for report in services {
            self.store
                .upsert_service(ServiceStatus {
                    server_id,
                    service_name: report.name.clone(),
                    status: report.status,
                    enabled: report.enabled,
                    port: report.port,
                    updated_at,
                })
                .await?;
        }
        if !services.is_empty() {
            self.events.publish(ChangeEvent::ServicesUpdated { server_id });
        }
        Ok(services.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use fleetwatch_common::wire::{DiskStats, MemoryStats, NetworkStats};
    use fleetwatch_common::{CommandStatus, CommandType, ServiceState};

    fn gateway(store: Arc<dyn Store>) -> IngestionGateway {
        let events = EventBroadcaster::default();
        let queue = Arc::new(CommandQueue::new(store.clone(), events.clone()));
        IngestionGateway::new(store, queue, events, Some("enroll-me".to_string()))
    }

    fn payload(cpu: f64, services: Vec<ServiceReport>) -> MetricsPayload {
        MetricsPayload {
            cpu_usage: cpu,
            memory: MemoryStats {
                total: 1000,
                used: 550,
                percent: 55.0,
            },
            disk: DiskStats {
                total: 1000,
                used: 300,
                percent: 30.0,
            },
            network: NetworkStats { sent: 1, recv: 2 },
            load_average: [0.1, 0.2, 0.3],
            services,
            timestamp: None,
        }
    }

    fn nginx(status: ServiceState) -> ServiceReport {
        ServiceReport {
            name: "nginx".to_string(),
            status,
            enabled: true,
            port: Some(80),
        }
    }

    async fn register(gw: &IngestionGateway, hostname: &str) -> RegisterResponse {
        gw.register(
            Some("enroll-me"),
            RegisterRequest {
                hostname: hostname.to_string(),
                system_info: SystemInfo::default(),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn bad_credentials_are_rejected() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let gw = gateway(store);
        assert!(matches!(
            gw.authenticate(None).await,
            Err(GatewayError::Unauthorized)
        ));
        assert!(matches!(
            gw.authenticate(Some("nope")).await,
            Err(GatewayError::Unauthorized)
        ));
        assert!(matches!(
            gw.register(
                Some("wrong"),
                RegisterRequest {
                    hostname: "web-01".to_string(),
                    system_info: SystemInfo::default(),
                }
            )
            .await,
            Err(GatewayError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn registration_is_stable_per_hostname() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let gw = gateway(store.clone());
        let first = register(&gw, "web-01").await;
        let second = register(&gw, "web-01").await;
        assert_eq!(first, second);
        assert_eq!(first.api_key.len(), 64);

        let server = gw.authenticate(Some(&first.api_key)).await.unwrap();
        assert_eq!(server.id, first.server_id);
        assert_eq!(store.list_servers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ingest_touches_server_and_upserts_services_once() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let gw = gateway(store.clone());
        let reg = register(&gw, "web-01").await;

        gw.ingest_metrics(reg.server_id, payload(42.0, vec![nginx(ServiceState::Running)]))
            .await
            .unwrap();
        gw.ingest_metrics(reg.server_id, payload(43.0, vec![nginx(ServiceState::Stopped)]))
            .await
            .unwrap();

        let server = store.get_server(reg.server_id).await.unwrap().unwrap();
        assert_eq!(server.status, ServerStatus::Online);
        assert!(server.last_seen.is_some());

        let services = store.list_services(reg.server_id).await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].status, ServiceState::Stopped);

        // No dedup: two submissions, two rows.
        assert_eq!(store.recent_metrics(reg.server_id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn results_only_accepted_from_owning_server() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let gw = gateway(store.clone());
        let a = register(&gw, "a").await;
        let b = register(&gw, "b").await;

        let cmd = gw
            .queue
            .enqueue(a.server_id, CommandType::Execute, Some("uptime".to_string()))
            .await
            .unwrap();
        let claimed = gw.list_pending_commands(a.server_id).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(gw.list_pending_commands(b.server_id).await.unwrap().is_empty());

        let result = CommandResultRequest {
            id: cmd.id,
            output: "up".to_string(),
            status: CommandStatus::Completed,
        };
        assert!(matches!(
            gw.report_command_result(b.server_id, result.clone()).await,
            Err(GatewayError::NotFound(_))
        ));
        let done = gw.report_command_result(a.server_id, result).await.unwrap();
        assert_eq!(done.status, CommandStatus::Completed);
    }
}
