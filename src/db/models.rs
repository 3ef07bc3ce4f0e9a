use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::quota::policy::{CounterKind, Feature, PeriodKind};

/// Stored usage for one feature within a period.
///
/// Counted features hold an integer; once-per-period features hold a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureCount {
    Flag(bool),
    Count(u32),
}

impl FeatureCount {
    /// Uses consumed, with a set flag counting as one.
    pub fn used(&self) -> u32 {
        match *self {
            FeatureCount::Flag(true) => 1,
            FeatureCount::Flag(false) => 0,
            FeatureCount::Count(n) => n,
        }
    }
}

/// Per-user, per-period usage document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub user_id: String,
    pub period_kind: PeriodKind,
    /// e.g. "2024-03-09", "2024-W10", "2024-03"
    pub period_id: String,
    /// feature name → count or flag
    pub feature_counts: BTreeMap<String, FeatureCount>,
    pub last_updated: DateTime<Utc>,
    /// Bumped on every write; 0 means the record has never been stored.
    #[serde(default)]
    pub revision: u64,
}

impl UsageRecord {
    /// Zero-valued record for a period with no stored document.
    pub fn empty(user_id: &str, period_kind: PeriodKind, period_id: String, now: DateTime<Utc>) -> Self {
        UsageRecord {
            user_id: user_id.to_string(),
            period_kind,
            period_id,
            feature_counts: BTreeMap::new(),
            last_updated: now,
            revision: 0,
        }
    }

    pub fn key(&self) -> String {
        document_key(&self.user_id, self.period_kind, &self.period_id)
    }

    pub fn is_persisted(&self) -> bool {
        self.revision > 0
    }

    pub fn used(&self, feature: Feature) -> u32 {
        self.feature_counts
            .get(feature.as_str())
            .map(FeatureCount::used)
            .unwrap_or(0)
    }

    /// Apply one use of `feature` and stamp the record.
    pub fn record_use(&mut self, feature: Feature, counter: CounterKind, now: DateTime<Utc>) {
        let next = match counter {
            CounterKind::Once => FeatureCount::Flag(true),
            CounterKind::Count => FeatureCount::Count(self.used(feature).saturating_add(1)),
        };
        self.feature_counts.insert(feature.as_str().to_string(), next);
        self.last_updated = now;
        self.revision += 1;
    }
}

/// Document path for a usage record: `user/{userId}/usage/{periodKind}-{periodId}`.
pub fn document_key(user_id: &str, period_kind: PeriodKind, period_id: &str) -> String {
    format!("user/{}/usage/{}-{}", user_id, period_kind.as_str(), period_id)
}
