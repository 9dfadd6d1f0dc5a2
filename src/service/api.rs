//! HTTP API: join requests, status lookups and real-time upgrades
//!
//! Handlers stay thin: they decode the request, call the scheduler or the
//! session layer and map `MatchmakingError` variants onto status codes.

use crate::error::MatchmakingError;
use crate::matchmaking::MatchScheduler;
use crate::session::{serve_connection, ConnectionContext};
use crate::types::{Player, PlayerMatchStatus};
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::WebSocketUpgrade,
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

/// State shared by the API handlers
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: MatchScheduler,
    pub connections: ConnectionContext,
}

/// Error response: `{"status":"error","error":"..."}` with a mapped status code
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn bad_request(reason: impl Into<String>) -> Self {
        Self(MatchmakingError::validation(reason).into())
    }

    fn status_code(&self) -> StatusCode {
        match self.0.downcast_ref::<MatchmakingError>() {
            Some(MatchmakingError::ValidationError { .. }) => StatusCode::BAD_REQUEST,
            Some(MatchmakingError::PlayerNotFound { .. }) => StatusCode::NOT_FOUND,
            Some(MatchmakingError::QueueUnavailable { .. })
            | Some(MatchmakingError::LedgerUnavailable { .. })
            | Some(MatchmakingError::HubClosed) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }

        (
            status,
            Json(json!({
                "status": "error",
                "error": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    player_id: Option<String>,
}

/// Build the API router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/join-queue", post(join_queue_handler))
        .route("/match-status", get(match_status_handler))
        .route("/ws/{match_id}/{player_id}", get(realtime_handler))
        .with_state(state)
}

async fn join_queue_handler(
    State(state): State<ApiState>,
    payload: Result<Json<Player>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(player) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    state.scheduler.join_queue(player).await?;

    Ok(Json(json!({
        "status": "waiting",
        "data": null,
    })))
}

async fn match_status_handler(
    State(state): State<ApiState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<PlayerMatchStatus>, ApiError> {
    let player_id = query
        .player_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("player_id is required"))?;

    let status = state.scheduler.player_status(&player_id).await?;
    Ok(Json(status))
}

async fn realtime_handler(
    State(state): State<ApiState>,
    Path((match_id, player_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    if match_id.trim().is_empty() || player_id.trim().is_empty() {
        return Err(ApiError::bad_request("match id and player id are required"));
    }

    let context = state.connections.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(e) = serve_connection(socket, match_id.clone(), player_id, context).await {
            warn!("Connection to match {} failed: {}", match_id, e);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MatchmakingSettings, SessionSettings};
    use crate::ledger::InMemoryMatchLedger;
    use crate::matchmaking::InMemoryQueueStore;
    use crate::metrics::MetricsCollector;
    use crate::session::{BroadcastHub, SessionRegistry};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tokio::sync::broadcast;
    use tower::ServiceExt;

    struct TestApi {
        app: Router,
        store: Arc<InMemoryQueueStore>,
        scheduler: MatchScheduler,
        _shutdown: broadcast::Sender<()>,
    }

    fn create_api() -> TestApi {
        let metrics = Arc::new(MetricsCollector::default());
        let store = Arc::new(InMemoryQueueStore::new());
        let scheduler = MatchScheduler::with_metrics(
            store.clone(),
            Arc::new(InMemoryMatchLedger::new()),
            &MatchmakingSettings::default(),
            "matchmaking_channel",
            metrics.clone(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (hub, _task) = BroadcastHub::spawn(metrics.clone(), shutdown_rx);
        let registry = Arc::new(SessionRegistry::new(
            hub.clone(),
            SessionSettings::default(),
            metrics.clone(),
        ));
        let state = ApiState {
            scheduler: scheduler.clone(),
            connections: ConnectionContext {
                registry,
                hub,
                outbound_buffer: 16,
                metrics_collector: metrics,
            },
        };

        TestApi {
            app: router(state),
            store,
            scheduler,
            _shutdown: shutdown_tx,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn join(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/join-queue")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn status(player_id: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("/match-status?player_id={}", player_id))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_join_returns_waiting() {
        let api = create_api();

        let (code, body) = send(
            &api.app,
            join(r#"{"id":"A","mmr":650,"region":"US","ping":40}"#),
        )
        .await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!({"status": "waiting", "data": null}));
        assert_eq!(api.store.len("queue:US:specialist"), 1);

        let (code, body) = send(&api.app, status("A")).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!({"status": "waiting"}));
    }

    #[tokio::test]
    async fn test_malformed_join_is_bad_request() {
        let api = create_api();

        let (code, body) = send(&api.app, join(r#"{"id":"A","mmr":"lots"}"#)).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");

        let (code, _) = send(
            &api.app,
            join(r#"{"id":"A","mmr":650,"region":"MOON","ping":40}"#),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(api.scheduler.players_waiting().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_down_is_service_unavailable() {
        let api = create_api();
        api.store.set_available(false);

        let (code, body) = send(
            &api.app,
            join(r#"{"id":"A","mmr":650,"region":"US","ping":40}"#),
        )
        .await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("Queue store unavailable"));
    }

    #[tokio::test]
    async fn test_status_for_unknown_player_is_not_found() {
        let api = create_api();

        let (code, body) = send(&api.app, status("ghost")).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_status_requires_player_id() {
        let api = create_api();
        let request = Request::builder()
            .uri("/match-status")
            .body(Body::empty())
            .unwrap();

        let (code, _) = send(&api.app, request).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_reports_match_after_pass() {
        let api = create_api();
        send(&api.app, join(r#"{"id":"A","mmr":640,"region":"EU","ping":20}"#)).await;
        send(&api.app, join(r#"{"id":"B","mmr":650,"region":"EU","ping":30}"#)).await;

        let summary = api.scheduler.run_pass().await;
        assert_eq!(summary.matches.len(), 1);

        let (code, body) = send(&api.app, status("B")).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "matched");
        assert_eq!(body["match_id"], summary.matches[0].id.as_str());
    }
}
