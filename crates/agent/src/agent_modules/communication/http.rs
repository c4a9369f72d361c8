use async_trait::async_trait;
use fleetwatch_common::wire::{
    Command, CommandResultRequest, IngestAck, MetricsPayload, RegisterRequest, RegisterResponse,
    ServiceReport, SystemInfo,
};
use fleetwatch_common::{API_KEY_HEADER, ENROLLMENT_TOKEN_HEADER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::GatewayApi;
use crate::agent_modules::error::AgentError;

fn build_client(timeout: Duration) -> Result<Client, AgentError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("fleetwatch-agent/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, AgentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Unauthorized,
        StatusCode::NOT_FOUND => AgentError::NotFound(body),
        _ => AgentError::Status {
            status: status.as_u16(),
            body,
        },
    })
}

/// `GatewayApi` over HTTP with the server's API key in `X-API-Key`.
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpGateway {
    pub fn new(server_url: &str, api_key: String, timeout: Duration) -> Result<Self, AgentError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: server_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Exchanges the fleet enrollment token for this host's own API key.
    pub async fn register(
        server_url: &str,
        enrollment_token: &str,
        request: &RegisterRequest,
        timeout: Duration,
    ) -> Result<RegisterResponse, AgentError> {
        let client = build_client(timeout)?;
        let url = format!("{}/ingest/register", server_url.trim_end_matches('/'));
        let response = client
            .post(url)
            .header(ENROLLMENT_TOKEN_HEADER, enrollment_token)
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
    }
}

#[async_trait]
impl GatewayApi for HttpGateway {
    async fn push_system_info(&self, info: &SystemInfo) -> Result<IngestAck, AgentError> {
        decode(self.post("/ingest/system-info").json(info).send().await?).await
    }

    async fn push_metrics(&self, payload: &MetricsPayload) -> Result<IngestAck, AgentError> {
        decode(self.post("/ingest/metrics").json(payload).send().await?).await
    }

    async fn push_services(&self, services: &[ServiceReport]) -> Result<IngestAck, AgentError> {
        decode(self.post("/ingest/services").json(services).send().await?).await
    }

    async fn claim_commands(&self) -> Result<Vec<Command>, AgentError> {
        decode(self.get("/commands").send().await?).await
    }

    async fn report_result(&self, result: &CommandResultRequest) -> Result<(), AgentError> {
        let _: Command = decode(self.post("/command-result").json(result).send().await?).await?;
        Ok(())
    }
}
