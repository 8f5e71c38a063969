//! Stats and configuration routes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chronos_llm::LLMConfigUpdate;
use chronos_runtime::RunStatus;

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/config", get(get_config).put(update_config))
        .route("/pacer/reset", post(reset_pacer))
}

/// GET /api/stats: run counts, merged graph size and pacer counters.
async fn get_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let runs = state.registry.list();
    let count = |status: RunStatus| runs.iter().filter(|r| r.status == status).count();
    let graph = state.graph.read().stats();
    let pacer = state.shared_pacer.as_ref().map(|p| p.stats());

    Json(serde_json::json!({
        "runs": {
            "total": runs.len(),
            "running": count(RunStatus::Running),
            "partiallyComplete": count(RunStatus::PartiallyComplete),
            "complete": count(RunStatus::Complete),
            "failed": count(RunStatus::Failed),
        },
        "graph": graph,
        "sharedPacer": pacer,
    }))
}

/// GET /api/config: provider selection and retry policy (no API keys exposed).
async fn get_config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let limits = &state.config.rate_limiter;
    Json(serde_json::json!({
        "llm": state.llm_config.read().to_response(),
        "rateLimiter": {
            "initialDelaySecs": limits.initial_delay.as_secs_f64(),
            "maxDelaySecs": limits.max_delay.as_secs_f64(),
            "baseDelaySecs": limits.base_delay.as_secs_f64(),
            "maxRetries": limits.max_retries,
            "totalTimeoutSecs": limits.total_timeout.as_secs_f64(),
        },
        "sharedPacer": state.config.shared_pacer,
        "numQuestions": state.config.num_questions,
        "topN": state.config.top_n,
    }))
}

/// PUT /api/config: update provider settings. Applies to runs started afterwards.
async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<LLMConfigUpdate>,
) -> impl IntoResponse {
    let mut config = state.llm_config.write();
    config.apply_update(&update);

    if let Err(e) = config.save() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": format!("Failed to save config: {}", e) })),
        );
    }

    (StatusCode::OK, Json(serde_json::json!(config.to_response())))
}

/// POST /api/pacer/reset: zero the shared pacer's counters.
async fn reset_pacer(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.shared_pacer {
        Some(pacer) => {
            pacer.reset();
            (StatusCode::OK, Json(serde_json::json!(pacer.stats())))
        }
        None => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "Runs use their own pacers; nothing shared to reset" })),
        ),
    }
}
