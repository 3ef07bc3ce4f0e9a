pub mod cache;
pub mod demo;
pub mod normalize;
pub mod odds_api;

pub use cache::{CacheConfig, CacheKey, CacheStatus, CachedOdds, FeedShape, OddsCache};
pub use demo::DemoFeed;
pub use odds_api::OddsApiFeed;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::odds::{select_best_odds, OddsError};

/// Transport to the upstream odds provider.
#[async_trait]
pub trait OddsFeed: Send + Sync {
    /// Fetch games with per-book lines.  Errors are network/upstream failures.
    async fn fetch(&self, request: &FeedRequest) -> Result<FeedResponse>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRequest {
    pub sport: String,
    pub want_all_sports: bool,
    pub per_sport_limit: u32,
}

/// Where a payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Cache,
    Demo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    pub success: bool,
    pub games: Vec<Game>,
    pub data_source: DataSource,
}

/// A game with lines normalized to one shape per sportsbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: String,
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    /// book name → lines
    pub sportsbooks: BTreeMap<String, BookLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookLine {
    pub moneyline: Moneyline,
    pub spread: Option<SpreadLine>,
    pub total: Option<TotalLine>,
}

/// American odds for each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moneyline {
    pub home: i32,
    pub away: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadLine {
    /// Home handicap, e.g. -7.5; the away side takes the opposite.
    pub home_point: f64,
    pub home_price: i32,
    pub away_price: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalLine {
    pub point: f64,
    pub over_price: i32,
    pub under_price: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

/// Best available price for one side of a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestLine {
    pub side: Side,
    pub team: String,
    pub book: String,
    pub odds: i32,
}

/// Best moneyline for one side across every book quoting the game.
pub fn best_moneyline(game: &Game, side: Side) -> Result<BestLine, OddsError> {
    let prices: HashMap<String, i32> = game
        .sportsbooks
        .iter()
        .map(|(book, line)| {
            let odds = match side {
                Side::Home => line.moneyline.home,
                Side::Away => line.moneyline.away,
            };
            (book.clone(), odds)
        })
        .collect();
    let (book, odds) = select_best_odds(&prices)?;
    let team = match side {
        Side::Home => game.home_team.clone(),
        Side::Away => game.away_team.clone(),
    };
    Ok(BestLine {
        side,
        team,
        book,
        odds,
    })
}

/// Side-by-side best prices for a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameComparison {
    pub game_id: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    pub book_count: usize,
    pub best_home: BestLine,
    pub best_away: BestLine,
}

/// Best moneylines for every game that has at least one book.
pub fn compare_moneylines(games: &[Game]) -> Vec<GameComparison> {
    games
        .iter()
        .filter_map(|game| {
            let best_home = best_moneyline(game, Side::Home).ok()?;
            let best_away = best_moneyline(game, Side::Away).ok()?;
            Some(GameComparison {
                game_id: game.id.clone(),
                home_team: game.home_team.clone(),
                away_team: game.away_team.clone(),
                commence_time: game.commence_time,
                book_count: game.sportsbooks.len(),
                best_home,
                best_away,
            })
        })
        .collect()
}
