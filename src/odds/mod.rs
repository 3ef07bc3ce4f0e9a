//! Odds arithmetic.
//!
//! American odds are the signed integer convention used by US sportsbooks:
//!   +150 → a 100 stake returns 150 profit
//!   -150 → a 150 stake is needed to return 100 profit
//!
//! Decimal odds are multiplicative: payout = stake × decimal.  Parlays are
//! priced by multiplying the decimal odds of every leg.

pub mod parlay;

pub use parlay::{evaluate, Bet, MarketType, Parlay, ParlayEvaluation};

use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by the pure odds functions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OddsError {
    #[error("invalid American odds {0}: odds must be non-zero")]
    InvalidOdds(i32),
    #[error("invalid decimal odds {0}: must be finite and greater than 1.0")]
    InvalidDecimal(f64),
    #[error("invalid stake {0}: must be zero or positive")]
    InvalidStake(f64),
    #[error("American odds {0} do not fit in a 64-bit price")]
    OddsOutOfRange(f64),
    #[error("parlay has no legs")]
    EmptyParlay,
    #[error("no odds available to compare")]
    NoOddsAvailable,
}

/// Convert American odds to decimal odds.
///
/// `+odds` → `1 + odds/100`, `-odds` → `1 + 100/|odds|`.  Zero is not a price.
pub fn american_to_decimal(odds: i32) -> Result<f64, OddsError> {
    if odds == 0 {
        return Err(OddsError::InvalidOdds(odds));
    }
    let odds = odds as f64;
    if odds > 0.0 {
        Ok(1.0 + odds / 100.0)
    } else {
        Ok(1.0 + 100.0 / odds.abs())
    }
}

/// Convert decimal odds back to American odds, rounded to the nearest integer.
///
/// Only decimals strictly above 2.0 use the positive (underdog) formula, so
/// exactly 2.0 comes out as `-100`, never `+100`.  The result is 64-bit because
/// combined parlay prices routinely pass `i32::MAX`.
pub fn decimal_to_american(decimal: f64) -> Result<i64, OddsError> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return Err(OddsError::InvalidDecimal(decimal));
    }
    let american = if decimal > 2.0 {
        (decimal - 1.0) * 100.0
    } else {
        -100.0 / (decimal - 1.0)
    };
    let rounded = round_half_up(american);
    if rounded.abs() >= i64::MAX as f64 {
        return Err(OddsError::OddsOutOfRange(rounded));
    }
    Ok(rounded as i64)
}

/// Ties round toward positive infinity (-112.5 → -112, 264.5 → 265).
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

/// Combined price of a set of legs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedOdds {
    pub decimal: f64,
    pub american: i64,
}

/// Multiply the decimal odds of every leg, in input order, and convert the
/// product back to American odds.  One leg returns that leg's own price.
pub fn combine_legs<I>(legs: I) -> Result<CombinedOdds, OddsError>
where
    I: IntoIterator<Item = i32>,
{
    let mut decimal = 1.0;
    let mut count = 0usize;
    for odds in legs {
        decimal *= american_to_decimal(odds)?;
        count += 1;
    }
    if count == 0 {
        return Err(OddsError::EmptyParlay);
    }
    Ok(CombinedOdds {
        decimal,
        american: decimal_to_american(decimal)?,
    })
}

/// Total return on a winning ticket (stake included).
pub fn potential_payout(stake: f64, decimal: f64) -> f64 {
    stake * decimal
}

/// Net winnings on a winning ticket.
pub fn profit(stake: f64, decimal: f64) -> f64 {
    potential_payout(stake, decimal) - stake
}

/// Implied win probability of an American price, ignoring the vig.
pub fn implied_probability(odds: i32) -> Result<f64, OddsError> {
    Ok(1.0 / american_to_decimal(odds)?)
}

/// Pick the book offering the best price for the bettor.
///
/// A larger signed value is always better (+150 beats +120, -105 beats -110,
/// and any plus price beats any minus price), so this is a plain max over the
/// raw integers.  Ties go to the alphabetically first book so the result does
/// not depend on map iteration order.
pub fn select_best_odds(book_to_odds: &HashMap<String, i32>) -> Result<(String, i32), OddsError> {
    book_to_odds
        .iter()
        .max_by(|(book_a, odds_a), (book_b, odds_b)| {
            odds_a.cmp(odds_b).then_with(|| book_b.cmp(book_a))
        })
        .map(|(book, odds)| (book.clone(), *odds))
        .ok_or(OddsError::NoOddsAvailable)
}
