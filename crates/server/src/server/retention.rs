use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use crate::db::Store;

/// Periodically deletes metric samples older than the retention window.
pub async fn run_metrics_retention(store: Arc<dyn Store>, retention_hours: u64, period_seconds: u64) {
    let retention = ChronoDuration::hours(retention_hours as i64);
    info!(
        retention_hours,
        interval_seconds = period_seconds,
        "Metrics retention task started."
    );
    let mut interval = interval(Duration::from_secs(period_seconds));
    loop {
        interval.tick().await;
        let cutoff = Utc::now() - retention;
        match store.prune_metrics_before(cutoff).await {
            Ok(0) => debug!("No expired metrics to prune."),
            Ok(count) => info!(count, cutoff = %cutoff, "Pruned expired metrics."),
            Err(e) => error!(error = %e, "Failed to prune expired metrics."),
        }
    }
}
