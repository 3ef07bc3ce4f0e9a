//! Upstream game payloads arrive in two shapes:
//!
//! * an array of bookmakers, each with `h2h` / `spreads` / `totals` markets
//!   holding named outcomes (The Odds API layout), or
//! * a map of sportsbook name → `{ moneyline: {home, away}, spread, total }`.
//!
//! Both are folded into [`Game`] before any arithmetic runs.  A game that
//! carries neither gets a single consensus book at -110 / -110.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::{BookLine, Game, Moneyline, SpreadLine, TotalLine};

pub const FALLBACK_BOOK: &str = "consensus";
pub const FALLBACK_PRICE: i32 = -110;

#[derive(Debug, Clone, Deserialize)]
pub struct RawGame {
    pub id: String,
    #[serde(default, alias = "sportKey")]
    pub sport_key: Option<String>,
    #[serde(alias = "homeTeam")]
    pub home_team: String,
    #[serde(alias = "awayTeam")]
    pub away_team: String,
    #[serde(alias = "commenceTime")]
    pub commence_time: DateTime<Utc>,
    #[serde(default)]
    pub bookmakers: Option<Vec<RawBookmaker>>,
    #[serde(default)]
    pub sportsbooks: Option<HashMap<String, RawSportsbook>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBookmaker {
    pub key: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub markets: Vec<RawMarket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMarket {
    pub key: String,
    #[serde(default)]
    pub outcomes: Vec<RawOutcome>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOutcome {
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub point: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSportsbook {
    #[serde(default)]
    pub moneyline: Option<RawMoneyline>,
    #[serde(default)]
    pub spread: Option<RawSpread>,
    #[serde(default)]
    pub total: Option<RawTotal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMoneyline {
    pub home: Option<f64>,
    pub away: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSpread {
    /// Home handicap
    #[serde(alias = "line", alias = "homePoint")]
    pub point: Option<f64>,
    #[serde(alias = "homeOdds", alias = "homePrice")]
    pub home_odds: Option<f64>,
    #[serde(alias = "awayOdds", alias = "awayPrice")]
    pub away_odds: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTotal {
    #[serde(alias = "line")]
    pub point: Option<f64>,
    #[serde(alias = "overOdds", alias = "overPrice")]
    pub over: Option<f64>,
    #[serde(alias = "underOdds", alias = "underPrice")]
    pub under: Option<f64>,
}

/// Which raw layout a game arrived in.
pub enum RawBookSource<'a> {
    Bookmakers(&'a [RawBookmaker]),
    Sportsbooks(&'a HashMap<String, RawSportsbook>),
    Missing,
}

impl RawGame {
    pub fn book_source(&self) -> RawBookSource<'_> {
        match (&self.bookmakers, &self.sportsbooks) {
            (Some(books), _) if !books.is_empty() => RawBookSource::Bookmakers(books),
            (_, Some(books)) if !books.is_empty() => RawBookSource::Sportsbooks(books),
            _ => RawBookSource::Missing,
        }
    }
}

/// American price from an upstream number.  Zero and non-finite values are not prices.
fn price(raw: f64) -> Option<i32> {
    if !raw.is_finite() {
        return None;
    }
    let rounded = raw.round() as i32;
    (rounded != 0).then_some(rounded)
}

fn fallback_books() -> BTreeMap<String, BookLine> {
    BTreeMap::from([(
        FALLBACK_BOOK.to_string(),
        BookLine {
            moneyline: Moneyline {
                home: FALLBACK_PRICE,
                away: FALLBACK_PRICE,
            },
            spread: None,
            total: None,
        },
    )])
}

/// Normalize one raw game.  `default_sport` is used when the payload omits it.
pub fn normalize_game(raw: RawGame, default_sport: &str) -> Game {
    let mut sportsbooks = match raw.book_source() {
        RawBookSource::Bookmakers(books) => books
            .iter()
            .filter_map(|b| from_bookmaker(b, &raw.home_team, &raw.away_team))
            .collect(),
        RawBookSource::Sportsbooks(books) => books
            .iter()
            .filter_map(|(name, b)| from_sportsbook(b).map(|line| (name.clone(), line)))
            .collect(),
        RawBookSource::Missing => BTreeMap::new(),
    };

    if sportsbooks.is_empty() {
        debug!(
            "No usable lines for {} ({} vs {}); using consensus {}",
            raw.id, raw.home_team, raw.away_team, FALLBACK_PRICE
        );
        sportsbooks = fallback_books();
    }

    Game {
        sport: raw.sport_key.unwrap_or_else(|| default_sport.to_string()),
        id: raw.id,
        home_team: raw.home_team,
        away_team: raw.away_team,
        commence_time: raw.commence_time,
        sportsbooks,
    }
}

pub fn normalize_games(raw: Vec<RawGame>, default_sport: &str) -> Vec<Game> {
    raw.into_iter()
        .map(|g| normalize_game(g, default_sport))
        .collect()
}

/// Odds-API style bookmaker.  Requires an `h2h` market quoting both teams.
fn from_bookmaker(book: &RawBookmaker, home: &str, away: &str) -> Option<(String, BookLine)> {
    let market = |key: &str| book.markets.iter().find(|m| m.key == key);
    let outcome = |m: &RawMarket, name: &str| m.outcomes.iter().find(|o| o.name == name).cloned();

    let h2h = market("h2h")?;
    let moneyline = Moneyline {
        home: price(outcome(h2h, home)?.price)?,
        away: price(outcome(h2h, away)?.price)?,
    };

    let spread = market("spreads").and_then(|m| {
        let h = outcome(m, home)?;
        let a = outcome(m, away)?;
        Some(SpreadLine {
            home_point: h.point?,
            home_price: price(h.price)?,
            away_price: price(a.price)?,
        })
    });

    let total = market("totals").and_then(|m| {
        let over = outcome(m, "Over")?;
        let under = outcome(m, "Under")?;
        Some(TotalLine {
            point: over.point.or(under.point)?,
            over_price: price(over.price)?,
            under_price: price(under.price)?,
        })
    });

    let name = book.title.clone().unwrap_or_else(|| book.key.clone());
    Some((
        name,
        BookLine {
            moneyline,
            spread,
            total,
        },
    ))
}

/// Map-style sportsbook entry.  Requires both moneyline prices.
fn from_sportsbook(book: &RawSportsbook) -> Option<BookLine> {
    let ml = book.moneyline.as_ref()?;
    let moneyline = Moneyline {
        home: price(ml.home?)?,
        away: price(ml.away?)?,
    };
    let spread = book.spread.as_ref().and_then(|s| {
        Some(SpreadLine {
            home_point: s.point?,
            home_price: price(s.home_odds?)?,
            away_price: price(s.away_odds?)?,
        })
    });
    let total = book.total.as_ref().and_then(|t| {
        Some(TotalLine {
            point: t.point?,
            over_price: price(t.over?)?,
            under_price: price(t.under?)?,
        })
    });
    Some(BookLine {
        moneyline,
        spread,
        total,
    })
}
