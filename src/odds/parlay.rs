use serde::{Deserialize, Serialize};

use super::{combine_legs, potential_payout, profit, OddsError};

/// Market a leg was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Moneyline,
    Spread,
    Total,
    Prop,
}

/// A single selection on the slip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub selection_label: String,
    /// American odds, never zero.
    pub american_odds: i32,
    pub market_type: MarketType,
    pub stake_amount: f64,
    pub source_book: String,
}

/// Priced result of a parlay slip.  Always derived from the current legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParlayEvaluation {
    pub leg_count: usize,
    pub combined_decimal: f64,
    pub combined_american: i64,
    pub total_stake: f64,
    pub payout: f64,
    pub profit: f64,
    /// Chance the whole ticket hits if every leg were priced fairly.
    pub implied_probability: f64,
}

/// Price a set of legs.
///
/// The stake is the sum of the leg stakes; legs are combined in the order given.
pub fn evaluate(legs: &[Bet]) -> Result<ParlayEvaluation, OddsError> {
    if legs.is_empty() {
        return Err(OddsError::EmptyParlay);
    }
    let combined = combine_legs(legs.iter().map(|leg| leg.american_odds))?;
    if let Some(bad) = legs
        .iter()
        .find(|leg| leg.stake_amount.is_nan() || leg.stake_amount < 0.0)
    {
        return Err(OddsError::InvalidStake(bad.stake_amount));
    }
    let total_stake: f64 = legs.iter().map(|leg| leg.stake_amount).sum();

    Ok(ParlayEvaluation {
        leg_count: legs.len(),
        combined_decimal: combined.decimal,
        combined_american: combined.american,
        total_stake,
        payout: potential_payout(total_stake, combined.decimal),
        profit: profit(total_stake, combined.decimal),
        implied_probability: 1.0 / combined.decimal,
    })
}

/// An in-progress slip owned by one builder session.
///
/// Only the legs are stored; every derived figure comes from [`Parlay::evaluate`].
#[derive(Debug, Clone, Default)]
pub struct Parlay {
    legs: Vec<Bet>,
}

impl Parlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a leg.  Zero odds and negative stakes are rejected up front.
    pub fn add_leg(&mut self, bet: Bet) -> Result<(), OddsError> {
        if bet.american_odds == 0 {
            return Err(OddsError::InvalidOdds(bet.american_odds));
        }
        if bet.stake_amount.is_nan() || bet.stake_amount < 0.0 {
            return Err(OddsError::InvalidStake(bet.stake_amount));
        }
        self.legs.push(bet);
        Ok(())
    }

    /// Remove the leg at `index`, if present.
    pub fn remove_leg(&mut self, index: usize) -> Option<Bet> {
        if index < self.legs.len() {
            Some(self.legs.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.legs.clear();
    }

    pub fn legs(&self) -> &[Bet] {
        &self.legs
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn total_stake(&self) -> f64 {
        self.legs.iter().map(|leg| leg.stake_amount).sum()
    }

    pub fn evaluate(&self) -> Result<ParlayEvaluation, OddsError> {
        evaluate(&self.legs)
    }
}
