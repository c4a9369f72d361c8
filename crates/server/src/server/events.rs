use fleetwatch_common::{CommandStatus, ServerStatus};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Change hint pushed to dashboard sockets and in-process waiters. Carries
/// identifiers only; consumers re-read the store for the current state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    ServerRegistered { server_id: Uuid },
    StatusChanged { server_id: Uuid, status: ServerStatus },
    MetricsIngested { server_id: Uuid },
    ServicesUpdated { server_id: Uuid },
    CommandUpdated {
        server_id: Uuid,
        command_id: Uuid,
        status: CommandStatus,
    },
    AlertRaised { server_id: Uuid, alert_id: Uuid },
    AlertResolved { server_id: Uuid, alert_id: Uuid },
}

impl ChangeEvent {
    pub fn command_id(&self) -> Option<Uuid> {
        match self {
            ChangeEvent::CommandUpdated { command_id, .. } => Some(*command_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        if self.tx.send(event).is_err() {
            debug!("No active receivers, skipping change event.");
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
