use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, Utc};
use std::sync::Mutex;

use super::policy::PeriodKind;

/// Source of "now".  Injected so period roll-over can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        ManualClock {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Derives calendar period identifiers in a fixed local offset.
#[derive(Debug, Clone, Copy)]
pub struct PeriodClock {
    offset: FixedOffset,
}

impl Default for PeriodClock {
    fn default() -> Self {
        PeriodClock::utc()
    }
}

impl PeriodClock {
    pub fn utc() -> Self {
        PeriodClock {
            offset: Utc.fix(),
        }
    }

    /// `None` if the offset is outside ±24h.
    pub fn with_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| PeriodClock { offset })
    }

    /// Identifier of the period containing `now`.
    pub fn period_id(&self, kind: PeriodKind, now: DateTime<Utc>) -> String {
        period_id_for_date(kind, now.with_timezone(&self.offset).date_naive())
    }
}

/// `day` → `YYYY-MM-DD`, `week` → ISO `YYYY-Www`, `month` → `YYYY-MM`.
///
/// Weeks run Monday to Sunday.  The year is the ISO week-numbering year, so
/// the days of a week that straddles New Year share one id: Monday
/// 2025-12-29 through Sunday 2026-01-04 are all `2026-W01`.
pub fn period_id_for_date(kind: PeriodKind, date: NaiveDate) -> String {
    match kind {
        PeriodKind::Day => date.format("%Y-%m-%d").to_string(),
        PeriodKind::Week => {
            let week = date.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        PeriodKind::Month => date.format("%Y-%m").to_string(),
    }
}
