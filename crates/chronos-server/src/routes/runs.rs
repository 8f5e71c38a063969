//! Pipeline run routes: submit a source text, poll its status, read results.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chronos_store::SqliteGraphStore;
use serde::Deserialize;

use crate::state::AppState;
use crate::worker;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/runs", get(list_runs).post(create_run))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/status", get(get_status))
        .route("/runs/{id}/hypotheses", get(get_hypotheses))
        .route("/runs/{id}/artifacts", get(get_artifacts))
        .route("/runs/{id}/graph", get(get_graph))
}

#[derive(Deserialize)]
struct CreateRunRequest {
    text: String,
    #[serde(default)]
    filename: Option<String>,
}

fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Run not found" })),
    )
}

/// POST /api/runs: queue a pipeline run over the given source text.
async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRunRequest>,
) -> impl IntoResponse {
    if req.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Source text is empty" })),
        );
    }

    match worker::submit_run(&state, req.text, req.filename) {
        Ok(run_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "runId": run_id, "status": "running" })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

/// GET /api/runs: status of every run, newest first.
async fn list_runs(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let runs = state.registry.list();
    Json(serde_json::json!({
        "total": runs.len(),
        "runs": runs,
    }))
}

/// GET /api/runs/{id}: full run record including artifacts.
async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&id) {
        Some(run) => (StatusCode::OK, Json(serde_json::json!(run))),
        None => not_found(),
    }
}

/// GET /api/runs/{id}/status: lightweight progress snapshot.
async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.snapshot(&id) {
        Some(snapshot) => (StatusCode::OK, Json(serde_json::json!(snapshot))),
        None => not_found(),
    }
}

/// GET /api/runs/{id}/hypotheses: parsed Stage4 output and the ranked shortlist.
async fn get_hypotheses(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(run) = state.registry.get(&id) else {
        return not_found();
    };
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "runId": run.run_id,
            "status": run.status,
            "hypotheses": run.hypotheses,
            "topHypotheses": run.top_hypotheses,
        })),
    )
}

/// GET /api/runs/{id}/artifacts: metadata of every persisted artifact.
async fn get_artifacts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.registry.get(&id).is_none() {
        return not_found();
    }
    match state.artifacts.list(&id) {
        Ok(artifacts) => (
            StatusCode::OK,
            Json(serde_json::json!({ "runId": id, "artifacts": artifacts })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

/// GET /api/runs/{id}/graph: the knowledge graph stored in the run's database.
async fn get_graph(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.registry.get(&id).is_none() {
        return not_found();
    }
    let loaded = SqliteGraphStore::for_run(&state.config.data_paths.graphs, &id)
        .and_then(|store| store.load());
    match loaded {
        Ok(element) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "runId": id,
                "stats": element.stats(),
                "nodes": element.nodes,
                "relationships": element.relationships,
                "source": element.source,
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}
