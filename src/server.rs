//! HTTP host for the historian.
//!
//! Thin JSON API over [`Historian`]: series lifecycle, sample submission,
//! history queries and explicit flushes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::aggregate::{AggregationRequest, HistoryPoint};
use crate::config::SeriesConfig;
use crate::container::ContainerStatus;
use crate::engine::{ALL_SERIES, Historian, HistorianError};
use crate::ingest::{IngestError, IngestOutcome};
use crate::query::QueryError;
use crate::storage::IncomingSample;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub historian: Historian,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    container: Option<ContainerStatus>,
}

/// History response envelope. Failures land in `error`, never in a bare body.
#[derive(Debug, Default, Serialize)]
struct HistoryEnvelope {
    result: Vec<HistoryPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// One sample or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SampleBatch {
    Many(Vec<IncomingSample>),
    One(IncomingSample),
}

/// Per-sample result of a submission.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SampleResult {
    Accepted(IngestOutcome),
    Rejected { error: String },
}

/// Query parameters for the flush API.
#[derive(Debug, Deserialize)]
pub struct FlushParams {
    /// Comma separated series ids; all series when absent.
    pub series: Option<String>,
}

fn status_of(error: &HistorianError) -> StatusCode {
    match error {
        HistorianError::Query(QueryError::Validation(_))
        | HistorianError::Ingest(IngestError::UndefinedValue)
        | HistorianError::Config(_) => StatusCode::BAD_REQUEST,
        HistorianError::Query(QueryError::UnknownSeries(_))
        | HistorianError::Ingest(IngestError::UnknownSeries(_)) => StatusCode::NOT_FOUND,
        HistorianError::Closed | HistorianError::Ingest(IngestError::ChannelClosed) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        HistorianError::Query(QueryError::Storage(_))
        | HistorianError::Storage(_)
        | HistorianError::Container(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: HistorianError) -> Response {
    (
        status_of(&error),
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/api/series", get(list_series_handler))
        .route(
            "/api/series/{id}",
            put(enable_handler).delete(disable_handler),
        )
        .route("/api/series/{id}/samples", post(samples_handler))
        .route(
            "/api/series/{id}/history",
            get(history_query_handler).post(history_body_handler),
        )
        .route("/api/history", get(history_all_handler))
        .route("/api/flush", post(flush_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        db: None,
        container: None,
    })
}

/// Readiness probe that checks backend availability.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    let container = Some(state.historian.container_status().await);
    match state.historian.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok".to_string(),
            db: Some("ready".to_string()),
            container,
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    db: Some(err.to_string()),
                    container,
                }),
            )
                .into_response()
        }
    }
}

async fn list_series_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.historian.series().await {
        Ok(series) => Json(series).into_response(),
        Err(e) => error_response(e),
    }
}

async fn enable_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(config): Json<SeriesConfig>,
) -> Response {
    match state.historian.enable(id.clone(), config).await {
        Ok(created) => {
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(serde_json::json!({ "id": id, "created": created }))).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn disable_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.historian.disable(id.clone()).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(IngestError::UnknownSeries(id).into()),
        Err(e) => error_response(e),
    }
}

async fn samples_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(batch): Json<SampleBatch>,
) -> Response {
    let samples = match batch {
        SampleBatch::Many(samples) => samples,
        SampleBatch::One(sample) => vec![sample],
    };

    let mut results = Vec::with_capacity(samples.len());
    for sample in samples {
        match state.historian.ingest(id.as_str(), sample).await {
            Ok(outcome) => results.push(SampleResult::Accepted(outcome)),
            Err(e @ HistorianError::Ingest(IngestError::UndefinedValue)) => {
                results.push(SampleResult::Rejected {
                    error: e.to_string(),
                });
            }
            Err(e) => return error_response(e),
        }
    }
    Json(results).into_response()
}

async fn run_history(state: &AppState, id: &str, request: AggregationRequest) -> Response {
    let step = state.historian.plan(&request).ok().map(|plan| plan.step);
    match state.historian.query(id, &request).await {
        Ok(result) => Json(HistoryEnvelope {
            result,
            step,
            error: None,
        })
        .into_response(),
        Err(e) => {
            tracing::debug!(series = id, error = %e, "History query failed");
            (
                status_of(&e),
                Json(HistoryEnvelope {
                    error: Some(e.to_string()),
                    ..Default::default()
                }),
            )
                .into_response()
        }
    }
}

async fn history_query_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(request): Query<AggregationRequest>,
) -> Response {
    run_history(&state, &id, request).await
}

/// Same as the GET variant; the JSON body can carry explicit `intervals`.
async fn history_body_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<AggregationRequest>,
) -> Response {
    run_history(&state, &id, request).await
}

async fn history_all_handler(
    State(state): State<Arc<AppState>>,
    Query(request): Query<AggregationRequest>,
) -> Response {
    run_history(&state, ALL_SERIES, request).await
}

async fn flush_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FlushParams>,
) -> Response {
    let ids: Option<Vec<String>> = params.series.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    });
    let flushed = match ids {
        Some(ids) => state.historian.flush(ids).await,
        None => state.historian.flush_all().await,
    };
    match flushed {
        Ok(snapshots) => Json(serde_json::json!({ "flushed": snapshots })).into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::engine::HistorianBuilder;
    use crate::pool::PoolConfig;
    use crate::storage::db::sqlite;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    async fn create_test_state() -> (AppState, TempDir) {
        let dir = tempdir().unwrap();
        let database = DatabaseConfig {
            url: format!("sqlite:{}", dir.path().join("server.db").display()),
            ..Default::default()
        };
        let backend = sqlite::open(&database, &PoolConfig::default()).unwrap();
        let historian = HistorianBuilder::new(backend).build().await.unwrap();

        // Return dir to keep tempdir alive
        (AppState { historian }, dir)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn json(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let (state, _dir) = create_test_state().await;
        let historian = state.historian.clone();
        let app = create_router(state);

        let (status, body) = send(&app, get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app, get("/readyz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["container"], "unmanaged");
        historian.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_series_lifecycle_and_history() {
        let (state, _dir) = create_test_state().await;
        let historian = state.historian.clone();
        let app = create_router(state);

        let (status, body) = send(
            &app,
            json("PUT", "/api/series/boiler.temp", serde_json::json!({"changesOnly": "true"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["created"], true);

        let (status, body) = send(
            &app,
            json(
                "POST",
                "/api/series/boiler.temp/samples",
                serde_json::json!([
                    {"ts": 1000, "val": 20.5},
                    {"ts": 2000, "val": 20.5},
                    {"ts": 3000}
                ]),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["outcome"], "committed");
        assert_eq!(body[1]["outcome"], "skipped");
        assert!(body[2]["error"].is_string());

        let (status, body) = send(
            &app,
            get("/api/series/boiler.temp/history?start=0&end=10000&aggregate=none"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"][0]["val"], 20.5);
        assert!(body.get("error").is_none());

        let (status, body) = send(&app, json("POST", "/api/flush", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["flushed"], 1);

        let (status, _) = send(
            &app,
            Request::builder()
                .method("DELETE")
                .uri("/api/series/boiler.temp")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        historian.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_history_errors_use_envelope() {
        let (state, _dir) = create_test_state().await;
        let historian = state.historian.clone();
        let app = create_router(state);

        let (status, body) = send(&app, get("/api/series/ghost/history?start=0&end=1000")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["result"], serde_json::json!([]));
        assert!(body["error"].as_str().unwrap().contains("ghost"));

        let (status, body) = send(&app, get("/api/history?start=5&end=5")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        historian.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_samples_for_unknown_series() {
        let (state, _dir) = create_test_state().await;
        let historian = state.historian.clone();
        let app = create_router(state);

        let (status, _) = send(
            &app,
            json("POST", "/api/series/nope/samples", serde_json::json!({"val": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        historian.shutdown().await.unwrap();
    }
}
