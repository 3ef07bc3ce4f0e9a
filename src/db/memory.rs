//! In-process usage store.
//!
//! Backs the demo mode and unit tests.  Records live only as long as the
//! process; nothing is flushed anywhere.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::models::UsageRecord;
use super::UsageStore;

#[derive(Clone, Default)]
pub struct MemoryUsageStore {
    records: Arc<RwLock<HashMap<String, UsageRecord>>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn get(&self, key: &str) -> Result<Option<UsageRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, record: &UsageRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.key(), record.clone());
        Ok(())
    }

    async fn compare_and_put(&self, expected_revision: u64, record: &UsageRecord) -> Result<bool> {
        let mut records = self.records.write().await;
        let key = record.key();
        let current = records.get(&key).map(|r| r.revision).unwrap_or(0);
        if current != expected_revision {
            return Ok(false);
        }
        records.insert(key, record.clone());
        Ok(true)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.last_updated >= cutoff);
        Ok(before - records.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::policy::{CounterKind, Feature, PeriodKind};

    #[tokio::test]
    async fn test_compare_and_put_against_missing_record() {
        let store = MemoryUsageStore::new();
        let now = Utc::now();
        let mut rec = UsageRecord::empty("u1", PeriodKind::Month, "2024-03".into(), now);
        rec.record_use(Feature::AiEval, CounterKind::Count, now);

        assert!(!store.compare_and_put(3, &rec).await.unwrap());
        assert!(store.is_empty().await);
        assert!(store.compare_and_put(0, &rec).await.unwrap());
        assert_eq!(store.len().await, 1);
    }
}
