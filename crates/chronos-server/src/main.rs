//! CHRONOS: staged research-question generation over historical sources.

use std::path::PathBuf;
use std::sync::Arc;

use chronos_llm::LLMConfig;
use chronos_runtime::{PipelineRun, RunStatus};
use chronos_server::routes;
use chronos_server::state::AppState;
use chronos_server::worker;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn resolve_data_dir() -> PathBuf {
    std::env::var("CHRONOS_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let exe_dir = std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|p| p.to_path_buf()));
            if let Some(dir) = exe_dir {
                let parent_data = dir.join("../data");
                if parent_data.exists() {
                    return parent_data;
                }
            }
            PathBuf::from("data")
        })
}

fn build_state() -> anyhow::Result<AppState> {
    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());

    let config = chronos_core::ChronosConfig::from_env(&data_dir)?;
    let llm_config = LLMConfig::load(&config.data_paths.llm_config_file);
    match llm_config.resolve_provider() {
        Some((provider, model, _)) => info!("Model provider: {} ({})", provider, model),
        None => info!("No model provider configured; runs will fail at Stage1"),
    }
    Ok(AppState::new(config, llm_config)?)
}

/// Run one pipeline in the foreground and print the final record.
async fn run_file(path: PathBuf) -> anyhow::Result<RunStatus> {
    let text = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    if text.trim().is_empty() {
        anyhow::bail!("{} is empty", path.display());
    }

    let state = build_state()?;
    let run_id = uuid::Uuid::new_v4().to_string();
    let filename = path.file_name().map(|n| n.to_string_lossy().into_owned());
    state.registry.create(PipelineRun::new(run_id.clone(), filename));

    let run = worker::run_pipeline(&state, &run_id, &text).await;
    println!("{}", serde_json::to_string_pretty(&run)?);
    println!(
        "Artifacts: {}",
        state.artifacts.root().join(&run_id).display()
    );
    Ok(run.status)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "run" => {
                if args.len() < 3 {
                    eprintln!("Usage: chronos run <source-text-file>");
                    std::process::exit(1);
                }
                let status = run_file(PathBuf::from(&args[2])).await?;
                std::process::exit(if status == RunStatus::Failed { 1 } else { 0 });
            }
            "--help" | "-h" | "help" => {
                println!("CHRONOS: research questions from historical sources");
                println!();
                println!("Usage: chronos [command]");
                println!();
                println!("Commands:");
                println!("  (none)                   Start the server");
                println!("  run <file>               Run the pipeline once over a text file");
                println!("  help                     Show this help message");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown command: {}. Use 'chronos help' for usage.", args[1]);
                std::process::exit(1);
            }
        }
    }

    let state = Arc::new(build_state()?);
    let port = state.config.port;

    worker::start_run_worker(state.clone());

    let app = routes::build_router(state.clone());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("CHRONOS server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
