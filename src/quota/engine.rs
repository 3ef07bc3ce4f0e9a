use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

use super::ledger::{IncrementOutcome, UsageLedger};
use super::policy::{policy_for, CounterKind, Feature, PeriodKind, QuotaPolicy, Tier};

/// Identity supplied by the session collaborator.  Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: String,
    pub email: String,
    pub tier: Tier,
}

/// Identities that bypass quotas regardless of their subscription tier.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    emails: HashSet<String>,
    user_ids: HashSet<String>,
}

impl AdminPolicy {
    pub fn new<E, U>(emails: E, user_ids: U) -> Self
    where
        E: IntoIterator<Item = String>,
        U: IntoIterator<Item = String>,
    {
        AdminPolicy {
            emails: emails
                .into_iter()
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            user_ids: user_ids
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    pub fn is_admin(&self, user: &UserContext) -> bool {
        user.tier == Tier::Admin
            || self.user_ids.contains(&user.user_id)
            || self.emails.contains(&user.email.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.emails.len() + self.user_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Answer to "may this user perform this action now?".
///
/// A denial is a normal value, not an error: the caller shows `message` and
/// can offer an upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    pub feature: String,
    pub allowed: bool,
    pub unlimited: bool,
    /// False for feature names that are not metered at all.
    pub tracked: bool,
    pub used: u32,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Period after which the count resets.
    pub period_kind: Option<PeriodKind>,
    pub period_id: Option<String>,
    pub message: String,
}

impl QuotaDecision {
    fn unlimited(feature: &str, message: String) -> Self {
        QuotaDecision {
            feature: feature.to_string(),
            allowed: true,
            unlimited: true,
            tracked: true,
            used: 0,
            limit: None,
            remaining: None,
            period_kind: None,
            period_id: None,
            message,
        }
    }

    fn untracked(feature: &str) -> Self {
        QuotaDecision {
            tracked: false,
            unlimited: false,
            ..QuotaDecision::unlimited(feature, format!("'{}' is not metered", feature))
        }
    }

    fn limited(
        feature: Feature,
        tier: Tier,
        used: u32,
        limit: u32,
        period: PeriodKind,
        period_id: Option<String>,
    ) -> Self {
        let allowed = used < limit;
        let remaining = limit.saturating_sub(used);
        let message = if allowed {
            remaining_message(feature, remaining, limit, period)
        } else {
            let mut msg = format!(
                "You've used all {} {} for this {}. Your {} limit resets next {}.",
                limit,
                feature.label(),
                period,
                period.adjective(),
                period
            );
            if let Some(target) = tier.upgrade_target() {
                msg.push_str(&format!(" Upgrade to {} for more.", target.label()));
            }
            msg
        };
        QuotaDecision {
            feature: feature.as_str().to_string(),
            allowed,
            unlimited: false,
            tracked: true,
            used,
            limit: Some(limit),
            remaining: Some(remaining),
            period_kind: Some(period),
            period_id,
            message,
        }
    }

    /// The decision as it reads once the action it allowed has been recorded.
    ///
    /// Unlimited, unmetered and fail-open decisions are returned unchanged.
    pub fn after_use(mut self) -> Self {
        let (Some(limit), Some(remaining), Some(period)) = (self.limit, self.remaining, self.period_kind)
        else {
            return self;
        };
        let Some(feature) = Feature::parse(&self.feature) else {
            return self;
        };
        if !self.allowed || self.unlimited || remaining == 0 {
            return self;
        }
        self.used = self.used.saturating_add(1);
        self.remaining = Some(remaining - 1);
        self.message = remaining_message(feature, remaining - 1, limit, period);
        self
    }

    /// Store unavailable: allow the action rather than block the user.
    fn fail_open(feature: Feature, limit: u32, period: PeriodKind) -> Self {
        QuotaDecision {
            feature: feature.as_str().to_string(),
            allowed: true,
            unlimited: false,
            tracked: true,
            used: 0,
            limit: Some(limit),
            remaining: None,
            period_kind: Some(period),
            period_id: None,
            message: "Usage tracking is temporarily unavailable; access allowed".to_string(),
        }
    }
}

fn remaining_message(feature: Feature, remaining: u32, limit: u32, period: PeriodKind) -> String {
    format!(
        "{} of {} {} left this {}",
        remaining,
        limit,
        feature.label(),
        period
    )
}

/// What the engine resolved a (user, feature) pair to before touching the ledger.
enum Gate {
    Bypass(QuotaDecision),
    Metered {
        feature: Feature,
        limit: u32,
        period: PeriodKind,
        counter: CounterKind,
    },
}

/// Quota consumer API: `check` before a gated action, `consume` after it.
#[derive(Clone)]
pub struct QuotaEngine {
    ledger: UsageLedger,
    admins: AdminPolicy,
}

impl QuotaEngine {
    pub fn new(ledger: UsageLedger, admins: AdminPolicy) -> Self {
        QuotaEngine { ledger, admins }
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    fn gate(&self, user: &UserContext, feature_name: &str) -> Gate {
        if self.admins.is_admin(user) {
            return Gate::Bypass(QuotaDecision::unlimited(
                feature_name,
                "Unlimited access (admin)".to_string(),
            ));
        }
        let Some(feature) = Feature::parse(feature_name) else {
            return Gate::Bypass(QuotaDecision::untracked(feature_name));
        };
        match policy_for(user.tier, feature) {
            QuotaPolicy::Unlimited => Gate::Bypass(QuotaDecision::unlimited(
                feature_name,
                format!("Unlimited {} on the {} plan", feature.label(), user.tier.label()),
            )),
            QuotaPolicy::Limited {
                limit,
                period,
                counter,
            } => Gate::Metered {
                feature,
                limit,
                period,
                counter,
            },
        }
    }

    /// Is `user` allowed to use `feature_name` right now?
    ///
    /// Does not record anything.  Store failures fail open.
    pub async fn check(&self, user: &UserContext, feature_name: &str) -> QuotaDecision {
        let (feature, limit, period) = match self.gate(user, feature_name) {
            Gate::Bypass(decision) => return decision,
            Gate::Metered {
                feature,
                limit,
                period,
                ..
            } => (feature, limit, period),
        };

        match self.ledger.read(&user.user_id, period).await {
            Ok(record) => {
                let decision = QuotaDecision::limited(
                    feature,
                    user.tier,
                    record.used(feature),
                    limit,
                    period,
                    Some(record.period_id),
                );
                if !decision.allowed {
                    info!(
                        "Quota reached: user={} feature={} used={}/{} per {}",
                        user.user_id, feature, decision.used, limit, period
                    );
                }
                decision
            }
            Err(e) => {
                warn!(
                    "Usage read failed for user={} feature={}, allowing: {:#}",
                    user.user_id, feature, e
                );
                QuotaDecision::fail_open(feature, limit, period)
            }
        }
    }

    /// Record one use of `feature_name`.
    ///
    /// No-op for admins, unlimited plans and unmetered names.  Does not
    /// re-check the limit; pair it with [`QuotaEngine::check`] or use
    /// [`QuotaEngine::check_and_consume`].
    pub async fn consume(&self, user: &UserContext, feature_name: &str) {
        let Gate::Metered {
            feature,
            period,
            counter,
            ..
        } = self.gate(user, feature_name)
        else {
            return;
        };

        if let Err(e) = self
            .ledger
            .increment(&user.user_id, period, feature, counter)
            .await
        {
            warn!(
                "Usage write failed for user={} feature={}, use not recorded: {:#}",
                user.user_id, feature, e
            );
        }
    }

    /// Check and record in one atomic step, closing the check/consume race.
    ///
    /// The returned decision's `used` includes this use when it was allowed.
    pub async fn check_and_consume(&self, user: &UserContext, feature_name: &str) -> QuotaDecision {
        let (feature, limit, period, counter) = match self.gate(user, feature_name) {
            Gate::Bypass(decision) => return decision,
            Gate::Metered {
                feature,
                limit,
                period,
                counter,
            } => (feature, limit, period, counter),
        };

        let outcome = self
            .ledger
            .try_increment(&user.user_id, period, feature, counter, limit)
            .await;
        match outcome {
            Ok(IncrementOutcome::Applied { used, period_id }) => {
                let remaining = limit.saturating_sub(used);
                QuotaDecision {
                    feature: feature.as_str().to_string(),
                    allowed: true,
                    unlimited: false,
                    tracked: true,
                    used,
                    limit: Some(limit),
                    remaining: Some(remaining),
                    period_kind: Some(period),
                    period_id: Some(period_id),
                    message: remaining_message(feature, remaining, limit, period),
                }
            }
            Ok(IncrementOutcome::LimitReached { used, period_id }) => {
                info!(
                    "Quota reached: user={} feature={} used={}/{} per {}",
                    user.user_id, feature, used, limit, period
                );
                QuotaDecision::limited(feature, user.tier, used, limit, period, Some(period_id))
            }
            Err(e) => {
                warn!(
                    "Atomic usage update failed for user={} feature={}, allowing: {:#}",
                    user.user_id, feature, e
                );
                QuotaDecision::fail_open(feature, limit, period)
            }
        }
    }

    /// Decisions for every metered feature, for account/usage screens.
    pub async fn summary(&self, user: &UserContext) -> Vec<QuotaDecision> {
        let mut out = Vec::with_capacity(Feature::ALL.len());
        for feature in Feature::ALL {
            out.push(self.check(user, feature.as_str()).await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::UsageRecord;
    use crate::db::{MemoryUsageStore, UsageStore};
    use crate::quota::period::{ManualClock, PeriodClock};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;

    struct FailingStore;

    #[async_trait]
    impl UsageStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<UsageRecord>> {
            anyhow::bail!("store offline")
        }
        async fn put(&self, _record: &UsageRecord) -> Result<()> {
            anyhow::bail!("store offline")
        }
        async fn compare_and_put(&self, _expected: u64, _record: &UsageRecord) -> Result<bool> {
            anyhow::bail!("store offline")
        }
        async fn purge_before(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
            anyhow::bail!("store offline")
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    fn user(tier: Tier) -> UserContext {
        UserContext {
            user_id: "u1".to_string(),
            email: "bettor@example.com".to_string(),
            tier,
        }
    }

    fn engine_with(
        store: Arc<dyn UsageStore>,
        admins: AdminPolicy,
    ) -> (QuotaEngine, Arc<ManualClock>) {
        // Wednesday of ISO week 10, 2024
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 6, 9, 0, 0).unwrap(),
        ));
        let ledger = UsageLedger::new(store, clock.clone(), PeriodClock::utc());
        (QuotaEngine::new(ledger, admins), clock)
    }

    fn engine() -> (QuotaEngine, Arc<ManualClock>, MemoryUsageStore) {
        let store = MemoryUsageStore::new();
        let (engine, clock) = engine_with(Arc::new(store.clone()), AdminPolicy::default());
        (engine, clock, store)
    }

    #[tokio::test]
    async fn test_free_ai_eval_denied_after_three_then_resets_next_week() {
        let (engine, clock, _store) = engine();
        let free = user(Tier::Free);

        for used in 0..3 {
            let decision = engine.check(&free, "ai_eval").await;
            assert!(decision.allowed);
            assert_eq!(decision.used, used);
            engine.consume(&free, "ai_eval").await;
        }

        let denied = engine.check(&free, "ai_eval").await;
        assert!(!denied.allowed);
        assert_eq!(denied.used, 3);
        assert_eq!(denied.limit, Some(3));
        assert_eq!(denied.remaining, Some(0));
        assert_eq!(denied.period_kind, Some(PeriodKind::Week));
        assert!(denied.message.contains("resets next week"));
        assert!(denied.message.contains("Upgrade to Pro"));

        // Monday of the following week
        clock.set(Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 1).unwrap());
        let fresh = engine.check(&free, "ai_eval").await;
        assert!(fresh.allowed);
        assert_eq!(fresh.used, 0);
        assert_eq!(fresh.period_id.as_deref(), Some("2024-W11"));
    }

    #[tokio::test]
    async fn test_odds_compare_once_per_day() {
        let (engine, clock, _store) = engine();
        let free = user(Tier::Free);

        assert!(engine.check(&free, "odds_compare").await.allowed);
        engine.consume(&free, "odds_compare").await;
        let denied = engine.check(&free, "odds_compare").await;
        assert!(!denied.allowed);
        assert_eq!(denied.used, 1);

        clock.advance(Duration::days(1));
        assert!(engine.check(&free, "odds_compare").await.allowed);
    }

    #[tokio::test]
    async fn test_admin_tier_bypasses_ledger() {
        let (engine, _clock, store) = engine();
        let admin = user(Tier::Admin);

        // Even a saturated record is ignored
        let mut record = engine
            .ledger()
            .read(&admin.user_id, PeriodKind::Week)
            .await
            .unwrap();
        for _ in 0..10 {
            record.record_use(Feature::AiEval, CounterKind::Count, Utc::now());
        }
        store.put(&record).await.unwrap();

        let decision = engine.check(&admin, "ai_eval").await;
        assert!(decision.allowed);
        assert!(decision.unlimited);

        engine.consume(&admin, "ai_eval").await;
        let after = store.get(&record.key()).await.unwrap().unwrap();
        assert_eq!(after.used(Feature::AiEval), 10);
    }

    #[tokio::test]
    async fn test_admin_allow_list_is_supplied_policy() {
        let store = MemoryUsageStore::new();
        let admins = AdminPolicy::new(vec![" Bettor@Example.com ".to_string()], Vec::new());
        let (engine, _clock) = engine_with(Arc::new(store.clone()), admins);

        let listed = user(Tier::Free);
        for _ in 0..5 {
            let decision = engine.check(&listed, "ai_eval").await;
            assert!(decision.allowed && decision.unlimited);
            engine.consume(&listed, "ai_eval").await;
        }
        assert!(store.is_empty().await);

        let mut other = user(Tier::Free);
        other.email = "someone@example.com".to_string();
        assert!(!engine.check(&other, "ai_eval").await.unlimited);
    }

    #[tokio::test]
    async fn test_unlimited_plans_do_not_write() {
        let (engine, _clock, store) = engine();
        let elite = user(Tier::Elite);
        for feature in Feature::ALL {
            let decision = engine.check(&elite, feature.as_str()).await;
            assert!(decision.allowed && decision.unlimited);
            engine.consume(&elite, feature.as_str()).await;
        }
        let pro = user(Tier::Pro);
        engine.consume(&pro, "live_games").await;
        assert!(store.is_empty().await);

        engine.consume(&pro, "ai_eval").await;
        let decision = engine.check(&pro, "ai_eval").await;
        assert_eq!(decision.used, 1);
        assert_eq!(decision.limit, Some(35));
        assert_eq!(decision.period_kind, Some(PeriodKind::Month));
        assert_eq!(decision.period_id.as_deref(), Some("2024-03"));
    }

    #[tokio::test]
    async fn test_unknown_feature_is_allowed_and_untracked() {
        let (engine, _clock, store) = engine();
        let free = user(Tier::Free);
        let decision = engine.check(&free, "parlay_builder").await;
        assert!(decision.allowed);
        assert!(!decision.tracked);
        engine.consume(&free, "parlay_builder").await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let (engine, _clock) = engine_with(Arc::new(FailingStore), AdminPolicy::default());
        let free = user(Tier::Free);
        let decision = engine.check(&free, "ai_eval").await;
        assert!(decision.allowed);
        assert!(decision.message.contains("unavailable"));
        // Must not panic or surface the error
        engine.consume(&free, "ai_eval").await;
        assert!(engine.check_and_consume(&free, "ai_eval").await.allowed);
    }

    #[tokio::test]
    async fn test_check_then_consume_race_can_overrun() {
        let (engine, _clock, _store) = engine();
        let free = user(Tier::Free);
        engine.consume(&free, "ai_eval").await;
        engine.consume(&free, "ai_eval").await;

        // Two overlapping actions both see 2 < 3
        let first = engine.check(&free, "ai_eval").await;
        let second = engine.check(&free, "ai_eval").await;
        assert!(first.allowed && second.allowed);
        engine.consume(&free, "ai_eval").await;
        engine.consume(&free, "ai_eval").await;

        assert_eq!(engine.check(&free, "ai_eval").await.used, 4);
    }

    #[tokio::test]
    async fn test_check_and_consume_enforces_limit() {
        let (engine, _clock, _store) = engine();
        let free = user(Tier::Free);
        for expected in 1..=5 {
            let decision = engine.check_and_consume(&free, "live_games").await;
            assert!(decision.allowed);
            assert_eq!(decision.used, expected);
            assert_eq!(decision.remaining, Some(5 - expected));
            assert_eq!(decision.period_id.as_deref(), Some("2024-W10"));
        }
        let denied = engine.check_and_consume(&free, "live_games").await;
        assert!(!denied.allowed);
        assert_eq!(denied.used, 5);
        assert_eq!(denied.period_id.as_deref(), Some("2024-W10"));
    }

    #[tokio::test]
    async fn test_after_use_reflects_the_recorded_use() {
        let (engine, _clock, _store) = engine();
        let free = user(Tier::Free);

        let before = engine.check(&free, "odds_compare").await;
        engine.consume(&free, "odds_compare").await;
        let charged = before.after_use();
        assert!(charged.allowed);
        assert_eq!(charged.used, 1);
        assert_eq!(charged.remaining, Some(0));

        let reread = engine.check(&free, "odds_compare").await;
        assert_eq!(reread.used, charged.used);
        assert_eq!(reread.remaining, charged.remaining);

        let elite = engine.check(&user(Tier::Elite), "odds_compare").await;
        assert_eq!(elite.clone().after_use(), elite);
    }

    #[tokio::test]
    async fn test_summary_covers_every_feature() {
        let (engine, _clock, _store) = engine();
        let free = user(Tier::Free);
        engine.consume(&free, "bet_tracking").await;
        let summary = engine.summary(&free).await;
        assert_eq!(summary.len(), 4);
        let tracking = summary
            .iter()
            .find(|d| d.feature == "bet_tracking")
            .unwrap();
        assert_eq!(tracking.used, 1);
        assert_eq!(tracking.remaining, Some(4));
    }
}
