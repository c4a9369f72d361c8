use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleetwatch_common::ServerStatus;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use crate::db::{Store, StoreError};
use crate::server::events::{ChangeEvent, EventBroadcaster};

/// Status a server should show at `now`. Staleness always wins; a fresh
/// server keeps `warning`, which only alert evaluation clears.
pub fn derive_status(
    current: ServerStatus,
    last_seen: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: ChronoDuration,
) -> ServerStatus {
    match last_seen {
        Some(seen) if now - seen <= threshold => match current {
            ServerStatus::Warning => ServerStatus::Warning,
            _ => ServerStatus::Online,
        },
        _ => ServerStatus::Offline,
    }
}

pub struct StatusSweeper {
    store: Arc<dyn Store>,
    events: EventBroadcaster,
    threshold: ChronoDuration,
}

impl StatusSweeper {
    pub fn new(store: Arc<dyn Store>, events: EventBroadcaster, threshold_seconds: u64) -> Self {
        Self {
            store,
            events,
            threshold: ChronoDuration::seconds(threshold_seconds as i64),
        }
    }

    pub async fn run(self: Arc<Self>, period_seconds: u64) {
        info!(
            interval_seconds = period_seconds,
            threshold_seconds = self.threshold.num_seconds(),
            "Status sweep task started."
        );
        let mut interval = interval(Duration::from_secs(period_seconds));
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep(Utc::now()).await {
                error!(error = %e, "Status sweep failed.");
            }
        }
    }

    /// Marks every server not heard from within the threshold as offline.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let went_offline = self.store.mark_stale_offline(now - self.threshold).await?;
        if went_offline.is_empty() {
            debug!("No stale servers found.");
            return Ok(0);
        }
        info!(count = went_offline.len(), "Marked stale servers offline.");
        for server_id in &went_offline {
            self.events.publish(ChangeEvent::StatusChanged {
                server_id: *server_id,
                status: ServerStatus::Offline,
            });
        }
        Ok(went_offline.len())
    }
}
