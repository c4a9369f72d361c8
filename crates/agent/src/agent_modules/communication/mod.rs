//! Agent side of the gateway protocol.

pub mod http;

use async_trait::async_trait;
use fleetwatch_common::wire::{
    Command, CommandResultRequest, IngestAck, MetricsPayload, ServiceReport, SystemInfo,
};

use crate::agent_modules::error::AgentError;

pub use http::HttpGateway;

/// Authenticated calls an enrolled agent makes against the gateway.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    async fn push_system_info(&self, info: &SystemInfo) -> Result<IngestAck, AgentError>;

    async fn push_metrics(&self, payload: &MetricsPayload) -> Result<IngestAck, AgentError>;

    async fn push_services(&self, services: &[ServiceReport]) -> Result<IngestAck, AgentError>;

    /// Claims every pending command for this server, oldest first.
    async fn claim_commands(&self) -> Result<Vec<Command>, AgentError>;

    async fn report_result(&self, result: &CommandResultRequest) -> Result<(), AgentError>;
}
