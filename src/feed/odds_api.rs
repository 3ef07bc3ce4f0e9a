use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use tracing::{debug, info};
use url::Url;

use super::normalize::{normalize_games, RawGame};
use super::{DataSource, FeedRequest, FeedResponse, Game, OddsFeed};

pub const DEFAULT_BASE_URL: &str = "https://api.the-odds-api.com/v4";

/// Sport key the Odds API uses for "next games across every sport".
const ALL_SPORTS_KEY: &str = "upcoming";

/// Odds feed backed by The Odds API (v4).
#[derive(Clone)]
pub struct OddsApiFeed {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl OddsApiFeed {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid odds API url '{}'", base_url))?;
        Ok(OddsApiFeed {
            http,
            base_url,
            api_key: api_key.into(),
        })
    }

    fn odds_url(&self, sport: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Odds API url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(["sports", sport, "odds"]);
        Ok(url)
    }
}

#[async_trait]
impl OddsFeed for OddsApiFeed {
    async fn fetch(&self, request: &FeedRequest) -> Result<FeedResponse> {
        let sport = if request.want_all_sports {
            ALL_SPORTS_KEY
        } else {
            request.sport.as_str()
        };
        let url = self.odds_url(sport)?;
        debug!("Fetching odds: {}", url);

        let resp = self
            .http
            .get(url)
            .query(&[
                ("apiKey", self.api_key.as_str()),
                ("regions", "us"),
                ("markets", "h2h,spreads,totals"),
                ("oddsFormat", "american"),
            ])
            .send()
            .await
            .context("Odds API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Odds API error {}: {}", status, body);
        }

        if let Some(remaining) = resp.headers().get("x-requests-remaining") {
            debug!("Odds API requests remaining: {:?}", remaining);
        }

        let raw: Vec<RawGame> = resp
            .json()
            .await
            .context("Failed to parse Odds API response")?;
        let games = limit_per_sport(normalize_games(raw, &request.sport), request.per_sport_limit);

        info!("Fetched {} games for '{}' from {}", games.len(), sport, self.name());
        Ok(FeedResponse {
            success: true,
            games,
            data_source: DataSource::Live,
        })
    }

    fn name(&self) -> &str {
        "the-odds-api"
    }
}

/// Keep at most `limit` games per sport, preserving upstream order.
pub fn limit_per_sport(games: Vec<Game>, limit: u32) -> Vec<Game> {
    let mut seen: HashMap<String, u32> = HashMap::new();
    games
        .into_iter()
        .filter(|g| {
            let n = seen.entry(g.sport.clone()).or_insert(0);
            *n += 1;
            *n <= limit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn game(id: &str, sport: &str) -> Game {
        Game {
            id: id.to_string(),
            sport: sport.to_string(),
            home_team: "H".to_string(),
            away_team: "A".to_string(),
            commence_time: Utc::now(),
            sportsbooks: BTreeMap::new(),
        }
    }

    #[test]
    fn test_odds_url() {
        let feed = OddsApiFeed::new(DEFAULT_BASE_URL, "k").unwrap();
        assert_eq!(
            feed.odds_url("americanfootball_ncaaf").unwrap().as_str(),
            "https://api.the-odds-api.com/v4/sports/americanfootball_ncaaf/odds"
        );
        let trailing = OddsApiFeed::new("http://localhost:9000/v4/", "k").unwrap();
        assert_eq!(
            trailing.odds_url(ALL_SPORTS_KEY).unwrap().as_str(),
            "http://localhost:9000/v4/sports/upcoming/odds"
        );
    }

    #[test]
    fn test_limit_per_sport() {
        let games = vec![
            game("1", "nfl"),
            game("2", "nba"),
            game("3", "nfl"),
            game("4", "nfl"),
            game("5", "nba"),
        ];
        let ids: Vec<String> = limit_per_sport(games, 2).into_iter().map(|g| g.id).collect();
        assert_eq!(ids, ["1", "2", "3", "5"]);
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_fetch() {
        let api_key = std::env::var("ODDS_API_KEY").expect("ODDS_API_KEY not set");
        let feed = OddsApiFeed::new(DEFAULT_BASE_URL, api_key).unwrap();
        let resp = feed
            .fetch(&FeedRequest {
                sport: "americanfootball_nfl".to_string(),
                want_all_sports: false,
                per_sport_limit: 5,
            })
            .await
            .unwrap();
        assert!(resp.success);
        assert!(resp.games.len() <= 5);
    }
}
