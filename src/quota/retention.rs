//! Purging of superseded usage records.
//!
//! Reads never depend on old periods, so records can be dropped once no live
//! period could still point at them.  A month is the longest period, hence the
//! 35-day floor.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::db::UsageStore;

use super::period::Clock;

/// Shortest retention that can never touch a current-period record.
pub const MIN_RETENTION_DAYS: i64 = 35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    keep_for: Duration,
}

impl RetentionPolicy {
    /// Clamped up to [`MIN_RETENTION_DAYS`].
    pub fn days(days: i64) -> Self {
        RetentionPolicy {
            keep_for: Duration::days(days.max(MIN_RETENTION_DAYS)),
        }
    }

    pub fn keep_for(&self) -> Duration {
        self.keep_for
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.keep_for
    }

    /// Delete every record last written before the cutoff.
    pub async fn sweep(&self, store: &dyn UsageStore, clock: &dyn Clock) -> Result<usize> {
        let cutoff = self.cutoff(clock.now());
        let removed = store.purge_before(cutoff).await?;
        if removed > 0 {
            info!(
                "Retention sweep removed {} usage record(s) older than {} from {}",
                removed,
                cutoff.format("%Y-%m-%d"),
                store.name()
            );
        }
        Ok(removed)
    }
}

/// Run [`RetentionPolicy::sweep`] on a fixed interval until the task is dropped.
pub fn spawn_retention_sweep(
    store: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
    policy: RetentionPolicy,
    every: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = policy.sweep(store.as_ref(), clock.as_ref()).await {
                warn!("Retention sweep failed: {:#}", e);
            }
        }
    })
}
