//! Background run queue: one task per pipeline run.

use std::sync::Arc;

use chrono::Utc;
use chronos_core::{Error, Result};
use chronos_llm::RetryController;
use chronos_runtime::{DefaultPrompts, ModelStepRunner, Orchestrator, PipelineRun, RunStatus};
use chronos_store::{GraphSink, GraphSinks, SqliteGraphStore};
use tracing::{error, info};

use crate::state::{AppState, RunRequest};

/// Start the background run worker task.
pub fn start_run_worker(state: Arc<AppState>) {
    let mut rx = match state.take_run_rx() {
        Some(rx) => rx,
        None => {
            error!("Run worker already started");
            return;
        }
    };

    tokio::spawn(async move {
        info!("Background run worker started");
        while let Some(request) = rx.recv().await {
            let state = state.clone();
            tokio::spawn(async move {
                run_pipeline(&state, &request.run_id, &request.text).await;
            });
        }
    });
}

/// Register a run, keep a copy of its source text and queue it.
pub fn submit_run(state: &AppState, text: String, filename: Option<String>) -> Result<String> {
    let run_id = uuid::Uuid::new_v4().to_string();

    let upload = state.config.data_paths.uploads.join(format!("{}.txt", run_id));
    std::fs::write(&upload, &text).map_err(|e| Error::Storage(e.to_string()))?;

    state
        .registry
        .create(PipelineRun::new(run_id.clone(), filename));
    state
        .run_tx
        .send(RunRequest {
            run_id: run_id.clone(),
            text,
        })
        .map_err(|_| Error::Internal("run worker is not running".into()))?;

    info!("Queued run {}", run_id);
    Ok(run_id)
}

/// Wire the per-run collaborators: retry controller, graph database, runner.
pub fn build_orchestrator(state: &AppState, run_id: &str) -> Result<Orchestrator> {
    let limits = state.config.rate_limiter.clone();
    let retry = match &state.shared_pacer {
        Some(pacer) => RetryController::with_pacer(limits, pacer.clone()),
        None => RetryController::new(limits),
    };

    let graph_db = SqliteGraphStore::for_run(&state.config.data_paths.graphs, run_id)?;
    let sinks: Vec<Arc<dyn GraphSink>> = vec![Arc::new(graph_db), state.graph.clone() as Arc<dyn GraphSink>];

    let prompts = DefaultPrompts {
        num_questions: state.config.num_questions,
        top_n: state.config.top_n,
    };
    let runner = ModelStepRunner::new(state.generator(), Arc::new(retry), Arc::new(prompts))
        .with_graph_sink(Arc::new(GraphSinks(sinks)));

    Ok(Orchestrator::new(
        Arc::new(runner),
        state.artifacts.clone(),
        state.registry.clone(),
    )
    .with_top_n(state.config.top_n))
}

/// Run one pipeline to completion. Setup failures fail the run.
pub async fn run_pipeline(state: &AppState, run_id: &str, text: &str) -> PipelineRun {
    match build_orchestrator(state, run_id) {
        Ok(orchestrator) => orchestrator.run(run_id, text).await,
        Err(e) => {
            error!("[{}] Could not prepare run: {}", run_id, e);
            let mut run = state
                .registry
                .get(run_id)
                .unwrap_or_else(|| PipelineRun::new(run_id, None));
            run.status = RunStatus::Failed;
            run.last_error = Some(e.to_string());
            run.completed_at = Some(Utc::now());
            state.registry.publish(&run);
            run
        }
    }
}
