use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;

use super::odds_api::limit_per_sport;
use super::{BookLine, DataSource, FeedRequest, FeedResponse, Game, Moneyline, OddsFeed, SpreadLine, TotalLine};

/// (sport, home, away, hours until kickoff, [(book, home ml, away ml, home spread, total)])
type DemoGame = (&'static str, &'static str, &'static str, i64, &'static [(&'static str, i32, i32, f64, f64)]);

const DEMO_GAMES: &[DemoGame] = &[
    (
        "americanfootball_ncaaf",
        "Iowa Hawkeyes",
        "Nebraska Cornhuskers",
        26,
        &[("DraftKings", -175, 150, -3.5, 41.5), ("FanDuel", -170, 142, -3.5, 41.0), ("BetMGM", -180, 155, -4.0, 41.5)],
    ),
    (
        "americanfootball_ncaaf",
        "Michigan Wolverines",
        "Ohio State Buckeyes",
        50,
        &[("DraftKings", 240, -295, 7.5, 44.5), ("FanDuel", 230, -280, 7.0, 45.0)],
    ),
    (
        "americanfootball_nfl",
        "Kansas City Chiefs",
        "Buffalo Bills",
        72,
        &[("DraftKings", -130, 110, -2.5, 47.5), ("FanDuel", -125, 105, -2.0, 47.5), ("Caesars", -135, 114, -2.5, 48.0)],
    ),
    (
        "basketball_nba",
        "Boston Celtics",
        "Milwaukee Bucks",
        8,
        &[("DraftKings", -210, 176, -5.5, 228.5), ("BetMGM", -200, 168, -5.0, 229.0)],
    ),
];

/// Deterministic in-process feed for local runs without an API key.
#[derive(Debug, Clone, Default)]
pub struct DemoFeed;

impl DemoFeed {
    pub fn new() -> Self {
        DemoFeed
    }

    pub fn games() -> Vec<Game> {
        let now = Utc::now();
        DEMO_GAMES
            .iter()
            .enumerate()
            .map(|(i, (sport, home, away, hours, books))| Game {
                id: format!("demo-{}", i + 1),
                sport: sport.to_string(),
                home_team: home.to_string(),
                away_team: away.to_string(),
                commence_time: now + Duration::hours(*hours),
                sportsbooks: books
                    .iter()
                    .map(|(book, home_ml, away_ml, spread, total)| {
                        let line = BookLine {
                            moneyline: Moneyline {
                                home: *home_ml,
                                away: *away_ml,
                            },
                            spread: Some(SpreadLine {
                                home_point: *spread,
                                home_price: -110,
                                away_price: -110,
                            }),
                            total: Some(TotalLine {
                                point: *total,
                                over_price: -110,
                                under_price: -110,
                            }),
                        };
                        (book.to_string(), line)
                    })
                    .collect::<BTreeMap<_, _>>(),
            })
            .collect()
    }
}

#[async_trait]
impl OddsFeed for DemoFeed {
    async fn fetch(&self, request: &FeedRequest) -> Result<FeedResponse> {
        let games = DemoFeed::games()
            .into_iter()
            .filter(|g| request.want_all_sports || g.sport == request.sport)
            .collect();
        Ok(FeedResponse {
            success: true,
            games: limit_per_sport(games, request.per_sport_limit),
            data_source: DataSource::Demo,
        })
    }

    fn name(&self) -> &str {
        "demo"
    }
}
