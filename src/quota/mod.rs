pub mod engine;
pub mod ledger;
pub mod period;
pub mod policy;
pub mod retention;

pub use engine::{AdminPolicy, QuotaDecision, QuotaEngine, UserContext};
pub use ledger::{IncrementOutcome, UsageLedger};
pub use period::{Clock, ManualClock, PeriodClock, SystemClock};
pub use policy::{policy_for, CounterKind, Feature, PeriodKind, QuotaPolicy, Tier};
pub use retention::{spawn_retention_sweep, RetentionPolicy};
