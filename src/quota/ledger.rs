//! Per-user, per-period feature counters.
//!
//! Periods reset lazily: a read in a new period simply finds no document for
//! the new period id and reports zero.  Nothing is written until the first use.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use crate::db::models::{document_key, UsageRecord};
use crate::db::UsageStore;

use super::period::{Clock, PeriodClock};
use super::policy::{CounterKind, Feature, PeriodKind};

/// Bounded retries for [`UsageLedger::try_increment`] when writers collide.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Result of an atomic check-and-increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The use was recorded; `used` includes it.
    Applied { used: u32, period_id: String },
    /// Nothing was written because `used` already reached the limit.
    LimitReached { used: u32, period_id: String },
}

#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
    periods: PeriodClock,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn UsageStore>, clock: Arc<dyn Clock>, periods: PeriodClock) -> Self {
        UsageLedger {
            store,
            clock,
            periods,
        }
    }

    pub fn store(&self) -> &Arc<dyn UsageStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current-period record, or a zero-valued one if none is stored yet.
    pub async fn read(&self, user_id: &str, kind: PeriodKind) -> Result<UsageRecord> {
        let now = self.clock.now();
        let period_id = self.periods.period_id(kind, now);
        let key = document_key(user_id, kind, &period_id);

        let stored = self
            .store
            .get(&key)
            .await
            .with_context(|| format!("Failed to read usage record {}", key))?;

        Ok(match stored {
            Some(record) => record,
            None => {
                debug!("No usage record at {}; treating period as fresh", key);
                UsageRecord::empty(user_id, kind, period_id, now)
            }
        })
    }

    /// Record one use of `feature` in the current period.
    ///
    /// Read-modify-write with an unconditional write-back: two increments
    /// that both read before either writes will lose one of the uses.
    /// Use [`UsageLedger::try_increment`] where that matters.
    pub async fn increment(
        &self,
        user_id: &str,
        kind: PeriodKind,
        feature: Feature,
        counter: CounterKind,
    ) -> Result<UsageRecord> {
        let mut record = self.read(user_id, kind).await?;
        record.record_use(feature, counter, self.clock.now());
        self.store
            .put(&record)
            .await
            .with_context(|| format!("Failed to write usage record {}", record.key()))?;
        debug!(
            "Usage {} for {} in {}-{} now {}",
            feature,
            user_id,
            kind,
            record.period_id,
            record.used(feature)
        );
        Ok(record)
    }

    /// Record one use only if the current count is below `limit`, as a single
    /// compare-and-swap on the record revision.  Retries on conflicting writers.
    pub async fn try_increment(
        &self,
        user_id: &str,
        kind: PeriodKind,
        feature: Feature,
        counter: CounterKind,
        limit: u32,
    ) -> Result<IncrementOutcome> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut record = self.read(user_id, kind).await?;
            let used = record.used(feature);
            if used >= limit {
                return Ok(IncrementOutcome::LimitReached {
                    used,
                    period_id: record.period_id,
                });
            }

            let expected = record.revision;
            record.record_use(feature, counter, self.clock.now());
            if self.store.compare_and_put(expected, &record).await? {
                return Ok(IncrementOutcome::Applied {
                    used: record.used(feature),
                    period_id: record.period_id,
                });
            }
            debug!(
                "Usage write conflict on {} (attempt {}/{})",
                record.key(),
                attempt,
                MAX_CAS_ATTEMPTS
            );
        }
        anyhow::bail!(
            "Gave up incrementing {} for {} after {} conflicting writes",
            feature,
            user_id,
            MAX_CAS_ATTEMPTS
        )
    }
}
