use clap::Parser;
use std::time::Duration;

use crate::feed::CacheConfig;
use crate::quota::retention::MIN_RETENTION_DAYS;
use crate::quota::{AdminPolicy, PeriodClock, RetentionPolicy};

/// Parlay odds and tiered usage-quota service
#[derive(Parser, Debug, Clone)]
#[command(name = "parlay-gate", version, about)]
pub struct Config {
    /// HTTP API listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// SQLite usage-store path
    #[arg(long, env = "DATABASE_PATH", default_value = "usage.db")]
    pub database_path: String,

    /// Use the demo odds feed and an in-memory usage store
    #[arg(long = "demo", env = "DEMO_MODE", default_value = "false")]
    pub demo: bool,

    /// Odds API base URL
    #[arg(
        long,
        env = "ODDS_API_URL",
        default_value = "https://api.the-odds-api.com/v4"
    )]
    pub odds_api_url: String,

    /// Odds API key (required unless --demo)
    #[arg(long, env = "ODDS_API_KEY")]
    pub odds_api_key: Option<String>,

    /// Games requested per sport
    #[arg(long, env = "PER_SPORT_LIMIT", default_value = "20")]
    pub per_sport_limit: u32,

    /// Seconds an odds payload is served without refetching
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "30")]
    pub cache_ttl_secs: u64,

    /// Per-attempt feed timeout in seconds
    #[arg(long, env = "FEED_TIMEOUT_SECS", default_value = "15")]
    pub feed_timeout_secs: u64,

    /// Total feed attempts per refresh (first try plus retries)
    #[arg(long, env = "FEED_MAX_ATTEMPTS", default_value = "3")]
    pub feed_max_attempts: u32,

    /// Retry delay step in seconds; retry n waits n × step
    #[arg(long, env = "FEED_BACKOFF_SECS", default_value = "2")]
    pub feed_backoff_secs: u64,

    /// Comma-separated emails that bypass quotas
    #[arg(long, env = "ADMIN_EMAILS", value_delimiter = ',')]
    pub admin_emails: Vec<String>,

    /// Comma-separated user IDs that bypass quotas
    #[arg(long, env = "ADMIN_USER_IDS", value_delimiter = ',')]
    pub admin_user_ids: Vec<String>,

    /// Usage records untouched for this many days are purged
    #[arg(long, env = "USAGE_RETENTION_DAYS", default_value = "120")]
    pub retention_days: i64,

    /// Retention sweep interval in seconds
    #[arg(long, env = "RETENTION_SWEEP_SECS", default_value = "3600")]
    pub retention_sweep_secs: u64,

    /// UTC offset (minutes) used to align day/week/month boundaries
    #[arg(
        long,
        env = "PERIOD_UTC_OFFSET_MINUTES",
        default_value = "0",
        allow_hyphen_values = true
    )]
    pub period_utc_offset_minutes: i32,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.demo && self.odds_api_key.as_deref().map_or(true, str::is_empty) {
            anyhow::bail!("ODDS_API_KEY is required unless running with --demo.");
        }
        if self.cache_ttl_secs == 0 {
            anyhow::bail!("cache_ttl_secs must be at least 1");
        }
        if self.feed_timeout_secs == 0 {
            anyhow::bail!("feed_timeout_secs must be at least 1");
        }
        if self.feed_max_attempts == 0 {
            anyhow::bail!("feed_max_attempts must be at least 1");
        }
        if self.per_sport_limit == 0 {
            anyhow::bail!("per_sport_limit must be at least 1");
        }
        if self.retention_days < MIN_RETENTION_DAYS {
            anyhow::bail!("retention_days must be at least {}", MIN_RETENTION_DAYS);
        }
        if self.retention_sweep_secs == 0 {
            anyhow::bail!("retention_sweep_secs must be at least 1");
        }
        if self.period_clock().is_none() {
            anyhow::bail!("period_utc_offset_minutes must be within ±14 hours");
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.cache_ttl_secs),
            timeout: Duration::from_secs(self.feed_timeout_secs),
            max_attempts: self.feed_max_attempts,
            backoff_step: Duration::from_secs(self.feed_backoff_secs),
            per_sport_limit: self.per_sport_limit,
        }
    }

    pub fn admin_policy(&self) -> AdminPolicy {
        AdminPolicy::new(self.admin_emails.clone(), self.admin_user_ids.clone())
    }

    pub fn period_clock(&self) -> Option<PeriodClock> {
        if self.period_utc_offset_minutes.abs() > 14 * 60 {
            return None;
        }
        PeriodClock::with_offset_minutes(self.period_utc_offset_minutes)
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::days(self.retention_days)
    }

    pub fn retention_sweep_every(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_secs)
    }
}
