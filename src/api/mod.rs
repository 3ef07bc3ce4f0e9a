use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::feed::{compare_moneylines, CacheKey, CacheStatus, CachedOdds, DataSource, GameComparison, OddsCache};
use crate::odds::{self, Bet, ParlayEvaluation};
use crate::quota::{Feature, QuotaDecision, QuotaEngine, UserContext};

#[derive(Clone)]
pub struct AppState {
    pub engine: QuotaEngine,
    pub odds: OddsCache,
}

/// Build the Axum router for the JSON API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/quota/check", post(check_handler))
        .route("/api/quota/consume", post(consume_handler))
        .route("/api/quota/summary", post(summary_handler))
        .route("/api/parlay/evaluate", post(evaluate_handler))
        .route("/api/odds/:sport", get(odds_handler))
        .route("/api/odds/:sport/compare", post(compare_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

#[derive(Debug, Deserialize)]
pub struct FeatureRequest {
    pub user: UserContext,
    pub feature: String,
}

#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub user: UserContext,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub legs: Vec<Bet>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareResponse {
    pub quota: QuotaDecision,
    pub status: CacheStatus,
    pub degraded: bool,
    pub data_source: Option<DataSource>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub comparisons: Vec<GameComparison>,
}

/// `all` selects the cross-sport feed shape.
fn cache_key(sport: &str) -> CacheKey {
    if sport == "all" {
        CacheKey::all_sports()
    } else {
        CacheKey::sport(sport)
    }
}

/// GET /health
async fn health_handler() -> &'static str {
    "ok"
}

/// POST /api/quota/check
async fn check_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeatureRequest>,
) -> Json<QuotaDecision> {
    Json(state.engine.check(&req.user, &req.feature).await)
}

/// POST /api/quota/consume
async fn consume_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeatureRequest>,
) -> StatusCode {
    state.engine.consume(&req.user, &req.feature).await;
    StatusCode::NO_CONTENT
}

/// POST /api/quota/summary
async fn summary_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UserRequest>,
) -> Json<Vec<QuotaDecision>> {
    Json(state.engine.summary(&req.user).await)
}

/// POST /api/parlay/evaluate
async fn evaluate_handler(
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<ParlayEvaluation>, (StatusCode, String)> {
    odds::evaluate(&req.legs)
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

/// GET /api/odds/:sport
async fn odds_handler(
    State(state): State<Arc<AppState>>,
    Path(sport): Path<String>,
) -> Json<CachedOdds> {
    Json(state.odds.get(&cache_key(&sport)).await)
}

/// POST /api/odds/:sport/compare
///
/// Gated by `odds_compare`.  Usage is only recorded when odds were delivered.
async fn compare_handler(
    State(state): State<Arc<AppState>>,
    Path(sport): Path<String>,
    Json(req): Json<UserRequest>,
) -> Response {
    let feature = Feature::OddsCompare.as_str();
    let quota = state.engine.check(&req.user, feature).await;
    if !quota.allowed {
        return (StatusCode::TOO_MANY_REQUESTS, Json(quota)).into_response();
    }

    let odds = state.odds.get(&cache_key(&sport)).await;
    let quota = if !odds.is_unavailable() {
        state.engine.consume(&req.user, feature).await;
        quota.after_use()
    } else {
        info!("Odds unavailable for '{}'; not charging {}", sport, req.user.user_id);
        quota
    };

    Json(CompareResponse {
        quota,
        status: odds.status,
        degraded: odds.is_degraded(),
        data_source: odds.data_source,
        fetched_at: odds.fetched_at,
        comparisons: compare_moneylines(&odds.games),
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryUsageStore;
    use crate::feed::{CacheConfig, DemoFeed};
    use crate::odds::MarketType;
    use crate::quota::{AdminPolicy, ManualClock, PeriodClock, Tier, UsageLedger};
    use chrono::TimeZone;

    fn state() -> Arc<AppState> {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 10, 19, 15, 0, 0).unwrap(),
        ));
        let ledger = UsageLedger::new(Arc::new(MemoryUsageStore::new()), clock, PeriodClock::utc());
        Arc::new(AppState {
            engine: QuotaEngine::new(ledger, AdminPolicy::default()),
            odds: OddsCache::new(Arc::new(DemoFeed::new()), CacheConfig::default()),
        })
    }

    fn free_user() -> UserContext {
        UserContext {
            user_id: "u-free".to_string(),
            email: "free@example.com".to_string(),
            tier: Tier::Free,
        }
    }

    fn leg(odds: i32, stake: f64) -> Bet {
        Bet {
            selection_label: "Iowa ML".to_string(),
            american_odds: odds,
            market_type: MarketType::Moneyline,
            stake_amount: stake,
            source_book: "DraftKings".to_string(),
        }
    }

    #[tokio::test]
    async fn test_compare_is_gated_once_per_day_for_free_tier() {
        let state = state();
        let sport = "americanfootball_ncaaf".to_string();

        let first = compare_handler(
            State(state.clone()),
            Path(sport.clone()),
            Json(UserRequest { user: free_user() }),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = compare_handler(
            State(state.clone()),
            Path(sport),
            Json(UserRequest { user: free_user() }),
        )
        .await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_compare_reports_usage_after_the_charge() {
        let state = state();
        let response = compare_handler(
            State(state.clone()),
            Path("basketball_nba".to_string()),
            Json(UserRequest { user: free_user() }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["quota"]["allowed"], serde_json::json!(true));
        assert_eq!(json["quota"]["used"], serde_json::json!(1));
        assert_eq!(json["quota"]["remaining"], serde_json::json!(0));
        assert_eq!(json["comparisons"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_check_and_consume_handlers() {
        let state = state();
        let req = || FeatureRequest {
            user: free_user(),
            feature: "ai_eval".to_string(),
        };

        let status = consume_handler(State(state.clone()), Json(req())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(decision) = check_handler(State(state.clone()), Json(req())).await;
        assert_eq!(decision.used, 1);
        assert_eq!(decision.remaining, Some(2));

        let Json(summary) =
            summary_handler(State(state), Json(UserRequest { user: free_user() })).await;
        assert_eq!(summary.len(), Feature::ALL.len());
    }

    #[tokio::test]
    async fn test_evaluate_handler() {
        let Json(eval) = evaluate_handler(Json(EvaluateRequest {
            legs: vec![leg(-110, 5.0), leg(-110, 5.0)],
        }))
        .await
        .unwrap();
        assert_eq!(eval.combined_american, 264);

        let (status, _) = evaluate_handler(Json(EvaluateRequest { legs: vec![] }))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_odds_handler_serves_demo_feed() {
        let Json(odds) = odds_handler(State(state()), Path("all".to_string())).await;
        assert_eq!(odds.key, CacheKey::all_sports());
        assert_eq!(odds.data_source, Some(DataSource::Demo));
        assert!(!odds.games.is_empty());
    }
}
