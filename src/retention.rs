//! Rolling three-day retention for the webhook log.

use crate::store::LogStore;
use crate::types::WebhookRecord;
use chrono::{DateTime, Duration, Utc};

pub const RETENTION_DAYS: i64 = 3;

/// How many records a snapshot or feed holds.
pub const FEED_LIMIT: usize = 50;

/// Oldest `received_at` still inside the window at `now`.
pub fn cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(RETENTION_DAYS)
}

/// Best-effort delete of everything older than the window. Failures are
/// logged and reported as `None`.
pub async fn sweep(store: &dyn LogStore, now: DateTime<Utc>) -> Option<usize> {
    match store.delete_older_than(cutoff(now)).await {
        Ok(deleted) => {
            if deleted > 0 {
                tracing::info!(deleted, "purged outdated webhook logs");
            }
            Some(deleted)
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to purge outdated webhook logs");
            None
        }
    }
}

/// Records for an initial render: sweep, then the most recent page.
/// A failed read yields an empty snapshot.
pub async fn load_snapshot(store: &dyn LogStore, now: DateTime<Utc>) -> Vec<WebhookRecord> {
    sweep(store, now).await;

    match store.select_recent(FEED_LIMIT).await {
        Ok(records) => records,
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch webhook logs");
            Vec::new()
        }
    }
}
