//! Time-bounded cache in front of an [`OddsFeed`].
//!
//! Entries are keyed by `(sport, shape)` and served without a network call
//! while younger than the TTL.  On miss or expiry the feed is called with a
//! per-attempt timeout and retried with linearly growing delays.  When every
//! attempt fails the previous payload is returned tagged degraded, or an empty
//! result tagged unavailable if there never was one.
//!
//! Ages are measured with `tokio::time::Instant` so tests can pause time.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{DataSource, FeedRequest, FeedResponse, Game, OddsFeed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedShape {
    SingleSport,
    AllSports,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    pub sport: String,
    pub shape: FeedShape,
}

impl CacheKey {
    pub fn sport(sport: impl Into<String>) -> Self {
        CacheKey {
            sport: sport.into(),
            shape: FeedShape::SingleSport,
        }
    }

    pub fn all_sports() -> Self {
        CacheKey {
            sport: "all".to_string(),
            shape: FeedShape::AllSports,
        }
    }

    fn request(&self, per_sport_limit: u32) -> FeedRequest {
        FeedRequest {
            sport: self.sport.clone(),
            want_all_sports: self.shape == FeedShape::AllSports,
            per_sport_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff_step * n`.
    pub backoff_step: Duration,
    pub per_sport_limit: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl: Duration::from_secs(30),
            timeout: Duration::from_secs(15),
            max_attempts: 3,
            backoff_step: Duration::from_secs(2),
            per_sport_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Fetched from the feed on this call.
    Fresh,
    /// Served from a live entry.
    Cached,
    /// Feed failed; served from an expired entry.
    Degraded,
    /// Feed failed and nothing was cached.
    Unavailable,
}

/// Result of [`OddsCache::get`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedOdds {
    pub key: CacheKey,
    pub status: CacheStatus,
    pub degraded: bool,
    pub unavailable: bool,
    pub data_source: Option<DataSource>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub games: Vec<Game>,
}

impl CachedOdds {
    fn from_entry(key: CacheKey, status: CacheStatus, entry: &CacheEntry) -> Self {
        let data_source = match (status, entry.response.data_source) {
            (_, DataSource::Demo) => DataSource::Demo,
            (CacheStatus::Fresh, source) => source,
            _ => DataSource::Cache,
        };
        CachedOdds {
            key,
            status,
            degraded: status == CacheStatus::Degraded,
            unavailable: false,
            data_source: Some(data_source),
            fetched_at: Some(entry.fetched_at),
            games: entry.response.games.clone(),
        }
    }

    fn unavailable(key: CacheKey) -> Self {
        CachedOdds {
            key,
            status: CacheStatus::Unavailable,
            degraded: false,
            unavailable: true,
            data_source: None,
            fetched_at: None,
            games: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }
}

struct CacheEntry {
    response: FeedResponse,
    fetched_at: DateTime<Utc>,
    stored_at: Instant,
}

/// Thread-safe odds cache.  Clones share entries.
#[derive(Clone)]
pub struct OddsCache {
    feed: Arc<dyn OddsFeed>,
    config: CacheConfig,
    entries: Arc<RwLock<HashMap<CacheKey, Arc<CacheEntry>>>>,
}

impl OddsCache {
    pub fn new(feed: Arc<dyn OddsFeed>, config: CacheConfig) -> Self {
        OddsCache {
            feed,
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn feed_name(&self) -> &str {
        self.feed.name()
    }

    /// Payload for `key`, refreshing through the feed when missing or expired.
    pub async fn get(&self, key: &CacheKey) -> CachedOdds {
        let existing = self.entries.read().await.get(key).cloned();

        if let Some(entry) = &existing {
            if entry.stored_at.elapsed() < self.config.ttl {
                debug!("Odds cache hit for {:?}", key);
                return CachedOdds::from_entry(key.clone(), CacheStatus::Cached, entry);
            }
        }

        match self.fetch_with_retry(key).await {
            Some(response) => {
                let entry = Arc::new(CacheEntry {
                    response,
                    fetched_at: Utc::now(),
                    stored_at: Instant::now(),
                });
                self.entries
                    .write()
                    .await
                    .insert(key.clone(), Arc::clone(&entry));
                CachedOdds::from_entry(key.clone(), CacheStatus::Fresh, &entry)
            }
            None => match existing {
                Some(stale) => {
                    warn!(
                        "Serving stale odds for {:?} fetched at {}",
                        key, stale.fetched_at
                    );
                    CachedOdds::from_entry(key.clone(), CacheStatus::Degraded, &stale)
                }
                None => {
                    warn!("No odds available for {:?}", key);
                    CachedOdds::unavailable(key.clone())
                }
            },
        }
    }

    /// Warm several keys concurrently.  Duplicate keys are fetched once.
    pub async fn prefetch(&self, keys: &[CacheKey]) -> Vec<CachedOdds> {
        let mut seen = HashSet::new();
        let unique: Vec<&CacheKey> = keys.iter().filter(|k| seen.insert(*k)).collect();
        let results = join_all(unique.into_iter().map(|k| self.get(k))).await;
        info!(
            "Prefetched {} odds key(s), {} degraded or unavailable",
            results.len(),
            results
                .iter()
                .filter(|r| r.is_degraded() || r.is_unavailable())
                .count()
        );
        results
    }

    /// Drop the entry for `key`; the next `get` goes to the feed.
    pub async fn invalidate(&self, key: &CacheKey) {
        self.entries.write().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn fetch_with_retry(&self, key: &CacheKey) -> Option<FeedResponse> {
        let request = key.request(self.config.per_sport_limit);
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.timeout, self.feed.fetch(&request)).await {
                Ok(Ok(response)) if response.success => {
                    debug!(
                        "{} returned {} games for {:?} on attempt {}",
                        self.feed.name(),
                        response.games.len(),
                        key,
                        attempt
                    );
                    return Some(response);
                }
                Ok(Ok(_)) => warn!(
                    "{} reported failure for {:?} (attempt {}/{})",
                    self.feed.name(),
                    key,
                    attempt,
                    attempts
                ),
                Ok(Err(e)) => warn!(
                    "{} fetch for {:?} failed (attempt {}/{}): {:#}",
                    self.feed.name(),
                    key,
                    attempt,
                    attempts,
                    e
                ),
                Err(_) => warn!(
                    "{} fetch for {:?} timed out after {:?} (attempt {}/{})",
                    self.feed.name(),
                    key,
                    self.config.timeout,
                    attempt,
                    attempts
                ),
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.backoff_step * attempt).await;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Feed whose behaviour can be switched between calls.
    #[derive(Default)]
    struct ScriptedFeed {
        calls: AtomicUsize,
        failing: AtomicBool,
        /// Sleep this long before answering.
        hang: Mutex<Option<Duration>>,
        /// Fail this many calls, then succeed.
        fail_first: AtomicUsize,
        call_times: Mutex<Vec<Instant>>,
    }

    impl ScriptedFeed {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OddsFeed for ScriptedFeed {
        async fn fetch(&self, request: &FeedRequest) -> Result<FeedResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.call_times.lock().unwrap().push(Instant::now());

            let hang = *self.hang.lock().unwrap();
            if let Some(d) = hang {
                tokio::time::sleep(d).await;
            }
            if self.failing.load(Ordering::SeqCst) || n <= self.fail_first.load(Ordering::SeqCst) {
                anyhow::bail!("connection reset");
            }
            Ok(FeedResponse {
                success: true,
                games: vec![Game {
                    id: format!("game-{}", n),
                    sport: request.sport.clone(),
                    home_team: "Home".to_string(),
                    away_team: "Away".to_string(),
                    commence_time: Utc::now(),
                    sportsbooks: BTreeMap::new(),
                }],
                data_source: DataSource::Live,
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Paused-clock timers land on millisecond ticks.
    fn assert_near(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(50),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    fn cache(feed: &Arc<ScriptedFeed>) -> OddsCache {
        OddsCache::new(Arc::clone(feed) as Arc<dyn OddsFeed>, CacheConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_get_within_ttl_skips_feed() {
        let feed = Arc::new(ScriptedFeed::default());
        let cache = cache(&feed);
        let key = CacheKey::sport("americanfootball_ncaaf");

        let first = cache.get(&key).await;
        assert_eq!(first.status, CacheStatus::Fresh);
        assert_eq!(first.data_source, Some(DataSource::Live));

        tokio::time::advance(Duration::from_secs(29)).await;
        let second = cache.get(&key).await;
        assert_eq!(second.status, CacheStatus::Cached);
        assert_eq!(second.data_source, Some(DataSource::Cache));
        assert_eq!(second.games, first.games);
        assert_eq!(feed.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_refetches() {
        let feed = Arc::new(ScriptedFeed::default());
        let cache = cache(&feed);
        let key = CacheKey::sport("basketball_nba");

        cache.get(&key).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        let refreshed = cache.get(&key).await;

        assert_eq!(feed.calls(), 2);
        assert_eq!(refreshed.status, CacheStatus::Fresh);
        assert_eq!(refreshed.games[0].id, "game-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_attempts_fail_serves_stale_as_degraded() {
        let feed = Arc::new(ScriptedFeed::default());
        let cache = cache(&feed);
        let key = CacheKey::sport("americanfootball_nfl");

        let original = cache.get(&key).await;
        feed.failing.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(31)).await;

        let result = cache.get(&key).await;
        assert_eq!(feed.calls(), 1 + 3);
        assert!(result.is_degraded());
        assert!(!result.is_unavailable());
        assert_eq!(result.games, original.games);
        assert_eq!(result.fetched_at, original.fetched_at);

        // recovery clears the tag
        feed.failing.store(false, Ordering::SeqCst);
        let recovered = cache.get(&key).await;
        assert_eq!(recovered.status, CacheStatus::Fresh);
        assert!(!recovered.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_entry_is_unavailable() {
        let feed = Arc::new(ScriptedFeed::default());
        feed.failing.store(true, Ordering::SeqCst);
        let cache = cache(&feed);

        let result = cache.get(&CacheKey::all_sports()).await;
        assert!(result.is_unavailable());
        assert!(result.games.is_empty());
        assert_eq!(result.data_source, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delays_grow_linearly() {
        let feed = Arc::new(ScriptedFeed::default());
        feed.failing.store(true, Ordering::SeqCst);
        let cache = cache(&feed);

        cache.get(&CacheKey::sport("icehockey_nhl")).await;

        let times = feed.call_times.lock().unwrap().clone();
        assert_eq!(times.len(), 3);
        assert_near(times[1] - times[0], Duration::from_secs(2));
        assert_near(times[2] - times[1], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_feed_times_out_each_attempt() {
        let feed = Arc::new(ScriptedFeed::default());
        *feed.hang.lock().unwrap() = Some(Duration::from_secs(60));
        let cache = cache(&feed);

        let start = Instant::now();
        let result = cache.get(&CacheKey::sport("baseball_mlb")).await;

        assert!(result.is_unavailable());
        assert_eq!(feed.calls(), 3);
        // 3 × 15s timeouts + 2s + 4s backoff
        assert_near(start.elapsed(), Duration::from_secs(51));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_retry() {
        let feed = Arc::new(ScriptedFeed::default());
        feed.fail_first.store(1, Ordering::SeqCst);
        let cache = cache(&feed);

        let result = cache.get(&CacheKey::sport("soccer_epl")).await;
        assert_eq!(result.status, CacheStatus::Fresh);
        assert_eq!(feed.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_dedupes_and_shards_keys() {
        let feed = Arc::new(ScriptedFeed::default());
        let cache = cache(&feed);
        let nfl = CacheKey::sport("americanfootball_nfl");

        let results = cache
            .prefetch(&[nfl.clone(), CacheKey::all_sports(), nfl.clone()])
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(feed.calls(), 2);
        assert_eq!(cache.len().await, 2);

        cache.invalidate(&nfl).await;
        cache.get(&nfl).await;
        assert_eq!(feed.calls(), 3);
    }
}
