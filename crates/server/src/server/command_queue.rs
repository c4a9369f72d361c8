use chrono::Utc;
use fleetwatch_common::{CommandStatus, CommandType};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::models::{Command, NewCommand};
use crate::db::{Store, StoreError};
use crate::server::events::{ChangeEvent, EventBroadcaster};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Server not found: {0}")]
    ServerNotFound(Uuid),
    #[error("Command not found: {0}")]
    CommandNotFound(Uuid),
    #[error("Command text must not be empty for execute commands")]
    EmptyCommand,
    #[error("Unsupported service action: {0}")]
    InvalidServiceAction(String),
    #[error("Invalid service name: {0}")]
    InvalidServiceName(String),
    #[error("Service {0} has not been reported by this server")]
    UnknownService(String),
    #[error("Command result status must be completed or failed, got {0}")]
    InvalidResultStatus(CommandStatus),
    #[error("Illegal transition for command {id}: {from} -> {to}")]
    IllegalTransition {
        id: Uuid,
        from: CommandStatus,
        to: CommandStatus,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

impl FromStr for ServiceAction {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            other => Err(QueueError::InvalidServiceAction(other.to_string())),
        }
    }
}

/// Unit names are interpolated into a shell line, so only the systemd
/// unit character set is allowed.
pub fn is_valid_unit_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 256
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '.' | '@'))
}

/// How the dashboard waits on a command it just issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Finished(Command),
    /// The cap was reached; the command keeps running and may still finish later.
    TimedOut(Command),
}

impl WaitOutcome {
    pub fn timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut(_))
    }

    pub fn into_command(self) -> Command {
        match self {
            WaitOutcome::Finished(cmd) | WaitOutcome::TimedOut(cmd) => cmd,
        }
    }
}

enum Wake {
    Scheduled,
    Hint,
    Ignored,
    HintsClosed,
}

/// Owns the `pending -> executing -> {completed | failed}` state machine.
/// All transitions go through conditional store writes, so concurrent
/// callers can never move a command twice.
pub struct CommandQueue {
    store: Arc<dyn Store>,
    events: EventBroadcaster,
}

impl CommandQueue {
    pub fn new(store: Arc<dyn Store>, events: EventBroadcaster) -> Self {
        Self { store, events }
    }

    pub async fn enqueue(
        &self,
        server_id: Uuid,
        command_type: CommandType,
        command: Option<String>,
    ) -> Result<Command, QueueError> {
        let text = command
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .or_else(|| command_type.default_command_text().map(str::to_string))
            .ok_or(QueueError::EmptyCommand)?;

        if self.store.get_server(server_id).await?.is_none() {
            return Err(QueueError::ServerNotFound(server_id));
        }

        let cmd = self
            .store
            .insert_command(
                NewCommand {
                    server_id,
                    command_type,
                    command: text,
                },
                Utc::now(),
            )
            .await?;
        info!(server_id = %server_id, command_id = %cmd.id, command_type = %command_type, "Command queued.");
        self.publish(&cmd);
        Ok(cmd)
    }

    /// Hands every pending command of the server to the caller, oldest first,
    /// moving each to `executing`. A second caller racing this one gets none of them.
    pub async fn claim_pending(&self, server_id: Uuid) -> Result<Vec<Command>, QueueError> {
        let claimed = self
            .store
            .claim_pending_commands(server_id, Utc::now())
            .await?;
        if !claimed.is_empty() {
            debug!(server_id = %server_id, count = claimed.len(), "Commands claimed by agent.");
        }
        for cmd in &claimed {
            self.publish(cmd);
        }
        Ok(claimed)
    }

    pub async fn complete(
        &self,
        id: Uuid,
        status: CommandStatus,
        output: &str,
    ) -> Result<Command, QueueError> {
        if !status.is_terminal() {
            return Err(QueueError::InvalidResultStatus(status));
        }

        if let Some(cmd) = self.store.finish_command(id, status, output).await? {
            info!(command_id = %id, status = %status, "Command finished.");
            self.publish(&cmd);
            return Ok(cmd);
        }

        let current = self
            .store
            .get_command(id)
            .await?
            .ok_or(QueueError::CommandNotFound(id))?;

        // An agent retrying an upload it could not confirm.
        if current.status == status && current.output.as_deref() == Some(output) {
            debug!(command_id = %id, "Duplicate command result ignored.");
            return Ok(current);
        }

        warn!(command_id = %id, from = %current.status, to = %status, "Rejected command transition.");
        Err(QueueError::IllegalTransition {
            id,
            from: current.status,
            to: status,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Command>, QueueError> {
        Ok(self.store.get_command(id).await?)
    }

    pub async fn list(&self, server_id: Uuid, limit: u32) -> Result<Vec<Command>, QueueError> {
        Ok(self.store.list_commands(server_id, limit).await?)
    }

    /// Polls the command every `policy.interval` until it is terminal or
    /// `policy.max_attempts` polls have been made. A hint for this command on
    /// `hints` triggers an extra poll without shifting the schedule.
    pub async fn wait_for_result(
        &self,
        id: Uuid,
        policy: PollPolicy,
        mut hints: Option<broadcast::Receiver<ChangeEvent>>,
    ) -> Result<WaitOutcome, QueueError> {
        let mut attempts = 0u32;
        let mut next_poll = Instant::now() + policy.interval;

        loop {
            let wake = match hints.as_mut() {
                Some(rx) => tokio::select! {
                    _ = sleep_until(next_poll) => Wake::Scheduled,
                    event = rx.recv() => match event {
                        Ok(event) if event.command_id() == Some(id) => Wake::Hint,
                        Ok(_) => Wake::Ignored,
                        Err(RecvError::Lagged(_)) => Wake::Hint,
                        Err(RecvError::Closed) => Wake::HintsClosed,
                    },
                },
                None => {
                    sleep_until(next_poll).await;
                    Wake::Scheduled
                }
            };

            match wake {
                Wake::Ignored => continue,
                Wake::HintsClosed => {
                    hints = None;
                    continue;
                }
                Wake::Scheduled | Wake::Hint => {}
            }

            let cmd = self
                .store
                .get_command(id)
                .await?
                .ok_or(QueueError::CommandNotFound(id))?;
            if cmd.status.is_terminal() {
                return Ok(WaitOutcome::Finished(cmd));
            }

            if matches!(wake, Wake::Scheduled) {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    debug!(command_id = %id, attempts, "Gave up waiting for command result.");
                    return Ok(WaitOutcome::TimedOut(cmd));
                }
                next_poll += policy.interval;
            }
        }
    }

    /// Queues a script that replaces the agent binary and restarts its unit.
    pub async fn queue_agent_update(
        &self,
        server_id: Uuid,
        download_url: &str,
    ) -> Result<Command, QueueError> {
        self.enqueue(
            server_id,
            CommandType::Execute,
            Some(agent_update_script(download_url)),
        )
        .await
    }

    /// Queues `systemctl <action> <service>` for a service the server has reported.
    pub async fn queue_service_action(
        &self,
        server_id: Uuid,
        service: &str,
        action: ServiceAction,
    ) -> Result<Command, QueueError> {
        if !is_valid_unit_name(service) {
            return Err(QueueError::InvalidServiceName(service.to_string()));
        }
        let reported = self
            .store
            .list_services(server_id)
            .await?
            .iter()
            .any(|s| s.service_name == service);
        if !reported {
            if self.store.get_server(server_id).await?.is_none() {
                return Err(QueueError::ServerNotFound(server_id));
            }
            return Err(QueueError::UnknownService(service.to_string()));
        }
        let cmd = self
            .enqueue(
                server_id,
                CommandType::Execute,
                Some(format!("systemctl {} {}", action.as_str(), service)),
            )
            .await?;
        info!(server_id = %server_id, service, action = action.as_str(), "Service action queued.");
        Ok(cmd)
    }

    fn publish(&self, cmd: &Command) {
        self.events.publish(ChangeEvent::CommandUpdated {
            server_id: cmd.server_id,
            command_id: cmd.id,
            status: cmd.status,
        });
    }
}

// The restart is scheduled outside the agent's cgroup so the result of this
// command can be reported before the service goes down.
fn agent_update_script(download_url: &str) -> String {
    format!(
        r#"#!/bin/bash
set -e
echo "Downloading latest agent..."
curl -fsSL "{download_url}" -o /opt/fleetwatch/fleetwatch-agent.new
chmod +x /opt/fleetwatch/fleetwatch-agent.new
mv /opt/fleetwatch/fleetwatch-agent.new /opt/fleetwatch/fleetwatch-agent
echo "Scheduling agent restart..."
systemd-run --on-active=5 --unit=fleetwatch-agent-update systemctl restart fleetwatch-agent
echo "Agent updated successfully!""#
    )
}
