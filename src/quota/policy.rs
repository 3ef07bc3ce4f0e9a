//! Static tier × feature quota matrix.
//!
//! | tier  | ai_eval    | odds_compare | bet_tracking | live_games |
//! |-------|------------|--------------|--------------|------------|
//! | free  | 3 / week   | 1 / day      | 5 / week     | 5 / week   |
//! | pro   | 35 / month | unlimited    | unlimited    | unlimited  |
//! | elite | unlimited  | unlimited    | unlimited    | unlimited  |
//! | admin | unlimited, never touches the ledger                    |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription level supplied by the identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Elite,
    Admin,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Elite => "elite",
            Tier::Admin => "admin",
        }
    }

    /// Display name for user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Free => "Free",
            Tier::Pro => "Pro",
            Tier::Elite => "Elite",
            Tier::Admin => "Admin",
        }
    }

    /// Next tier up, used to phrase upgrade prompts.
    pub fn upgrade_target(&self) -> Option<Tier> {
        match self {
            Tier::Free => Some(Tier::Pro),
            Tier::Pro => Some(Tier::Elite),
            Tier::Elite | Tier::Admin => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "elite" => Ok(Tier::Elite),
            "admin" => Ok(Tier::Admin),
            other => anyhow::bail!("unknown subscription tier '{}'", other),
        }
    }
}

/// A gated, metered feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    AiEval,
    OddsCompare,
    BetTracking,
    LiveGames,
}

impl Feature {
    pub const ALL: [Feature; 4] = [
        Feature::AiEval,
        Feature::OddsCompare,
        Feature::BetTracking,
        Feature::LiveGames,
    ];

    /// Wire / storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::AiEval => "ai_eval",
            Feature::OddsCompare => "odds_compare",
            Feature::BetTracking => "bet_tracking",
            Feature::LiveGames => "live_games",
        }
    }

    /// `None` for names this build does not meter.
    pub fn parse(name: &str) -> Option<Feature> {
        Feature::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// Plural noun for user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            Feature::AiEval => "AI evaluations",
            Feature::OddsCompare => "odds comparisons",
            Feature::BetTracking => "tracked bets",
            Feature::LiveGames => "live game views",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reset granularity of a quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Day,
    Week,
    Month,
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Day => "day",
            PeriodKind::Week => "week",
            PeriodKind::Month => "month",
        }
    }

    pub fn adjective(&self) -> &'static str {
        match self {
            PeriodKind::Day => "daily",
            PeriodKind::Week => "weekly",
            PeriodKind::Month => "monthly",
        }
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(PeriodKind::Day),
            "week" => Ok(PeriodKind::Week),
            "month" => Ok(PeriodKind::Month),
            other => anyhow::bail!("unknown period kind '{}'", other),
        }
    }
}

/// How a feature's usage is stored in the period record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    /// Integer count incremented per use.
    Count,
    /// Boolean flag set on first use; counts as 1.
    Once,
}

/// Quota attached to one (tier, feature) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaPolicy {
    Unlimited,
    Limited {
        limit: u32,
        period: PeriodKind,
        counter: CounterKind,
    },
}

impl QuotaPolicy {
    const fn limited(limit: u32, period: PeriodKind) -> Self {
        QuotaPolicy::Limited {
            limit,
            period,
            counter: CounterKind::Count,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, QuotaPolicy::Unlimited)
    }
}

/// Look up the quota for a tier and feature.
pub fn policy_for(tier: Tier, feature: Feature) -> QuotaPolicy {
    use Feature::*;
    use PeriodKind::*;

    match (tier, feature) {
        (Tier::Free, AiEval) => QuotaPolicy::limited(3, Week),
        (Tier::Free, OddsCompare) => QuotaPolicy::Limited {
            limit: 1,
            period: Day,
            counter: CounterKind::Once,
        },
        (Tier::Free, BetTracking) => QuotaPolicy::limited(5, Week),
        (Tier::Free, LiveGames) => QuotaPolicy::limited(5, Week),
        (Tier::Pro, AiEval) => QuotaPolicy::limited(35, Month),
        (Tier::Pro, _) | (Tier::Elite, _) | (Tier::Admin, _) => QuotaPolicy::Unlimited,
    }
}
