//! HTTP surface of the coordinator.

use crate::coordinator::{Coordinator, Error, Settlement};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use holdout_types::api::{
    CurrentRoundResponse, ErrorBody, LeaderboardEntry, StartAttemptRequest, StartAttemptResponse,
    SubmitScoreRequest, SubmitScoreResponse,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};

pub struct Api<S: Settlement> {
    coordinator: Arc<Coordinator<S>>,
}

impl<S: Settlement> Api<S> {
    pub fn new(coordinator: Arc<Coordinator<S>>) -> Self {
        Self { coordinator }
    }

    pub fn router(&self) -> Router {
        // Configure CORS for the browser client.
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        // Configure rate limiting per client IP.
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(20)
                .burst_size(200)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .unwrap(),
        );

        Router::new()
            .route("/", get(health))
            .route("/api/current-round", get(current_round::<S>))
            .route("/api/start-attempt", post(start_attempt::<S>))
            .route("/api/submit-score", post(submit_score::<S>))
            .route("/api/leaderboard", get(leaderboard::<S>))
            .route("/metrics", get(metrics::<S>))
            .layer(cors)
            .layer(GovernorLayer {
                config: governor_conf,
            })
            .with_state(self.coordinator.clone())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn current_round<S: Settlement>(
    State(coordinator): State<Arc<Coordinator<S>>>,
) -> Response {
    match coordinator.current_round().await {
        Ok(info) => Json(CurrentRoundResponse {
            round_id: info.id,
            pot_wei: info.pot_wei.to_string(),
            finalized: info.finalized,
        })
        .into_response(),
        Err(err) => {
            tracing::warn!(%err, "current round read failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read round")
        }
    }
}

async fn start_attempt<S: Settlement>(
    State(coordinator): State<Arc<Coordinator<S>>>,
    payload: Result<Json<StartAttemptRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "wallet and roundId required");
    };
    match coordinator
        .start_attempt(&request.wallet, request.round_id)
        .await
    {
        Ok(session_token) => Json(StartAttemptResponse { session_token }).into_response(),
        Err(err) => coordinator_error(err),
    }
}

async fn submit_score<S: Settlement>(
    State(coordinator): State<Arc<Coordinator<S>>>,
    payload: Result<Json<SubmitScoreRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = payload else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "wallet, scoreMs and sessionToken required",
        );
    };
    if request.score_ms == 0 {
        return error_response(StatusCode::BAD_REQUEST, "invalid scoreMs");
    }
    match coordinator
        .submit_score(
            &request.wallet,
            &request.session_token,
            request.score_ms,
            request.round_id,
        )
        .await
    {
        Ok(outcome) => {
            let (round_closed, winner) = match outcome.closure {
                Some(closure) => (true, Some(closure.winner)),
                None => (false, None),
            };
            Json(SubmitScoreResponse {
                round_id: outcome.round_id,
                best_score_ms: outcome.best_score_ms,
                round_closed,
                winner,
            })
            .into_response()
        }
        Err(err) => coordinator_error(err),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardParams {
    round_id: Option<u64>,
    limit: Option<usize>,
}

async fn leaderboard<S: Settlement>(
    State(coordinator): State<Arc<Coordinator<S>>>,
    Query(params): Query<LeaderboardParams>,
) -> Response {
    let Some(round_id) = params.round_id else {
        return error_response(StatusCode::BAD_REQUEST, "roundId required");
    };
    let limit = params
        .limit
        .unwrap_or(coordinator.leaderboard_limit())
        .min(coordinator.leaderboard_limit());
    match coordinator.leaderboard(round_id, limit) {
        Ok(rows) => {
            let entries: Vec<LeaderboardEntry> = rows
                .into_iter()
                .map(|row| LeaderboardEntry {
                    wallet: row.wallet,
                    best_score_ms: row.best_score_ms,
                })
                .collect();
            Json(entries).into_response()
        }
        Err(err) => coordinator_error(err),
    }
}

async fn metrics<S: Settlement>(State(coordinator): State<Arc<Coordinator<S>>>) -> Response {
    let mut body = String::new();
    if prometheus_client::encoding::text::encode(&mut body, coordinator.metrics().registry())
        .is_err()
    {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn coordinator_error(err: Error) -> Response {
    match err {
        Error::EntryFeeRequired
        | Error::SessionNotFound
        | Error::InvalidSession
        | Error::TimeVerification => error_response(StatusCode::FORBIDDEN, err.to_string()),
        Error::Store(err) => {
            tracing::error!(%err, "store unavailable");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
