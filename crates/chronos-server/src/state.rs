//! Shared application state.

use std::sync::Arc;

use chronos_core::{ChronosConfig, Result};
use chronos_llm::{create_generator, LLMConfig, RequestPacer, TextGenerator};
use chronos_runtime::RunRegistry;
use chronos_store::{FsArtifactStore, SharedGraph};
use parking_lot::RwLock;
use tokio::sync::mpsc;

/// A request to run the pipeline over one source text.
pub struct RunRequest {
    pub run_id: String,
    pub text: String,
}

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: ChronosConfig,
    pub llm_config: RwLock<LLMConfig>,
    pub registry: Arc<RunRegistry>,
    pub artifacts: Arc<FsArtifactStore>,
    /// Every graph stored during this process, merged.
    pub graph: Arc<SharedGraph>,
    /// Present only when runs are configured to share one pacer.
    pub shared_pacer: Option<Arc<RequestPacer>>,
    pub run_tx: mpsc::UnboundedSender<RunRequest>,
    run_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<RunRequest>>>,
    generator_override: Option<Arc<dyn TextGenerator>>,
}

impl AppState {
    pub fn new(config: ChronosConfig, llm_config: LLMConfig) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let artifacts = FsArtifactStore::new(&config.data_paths.runs)?;
        let shared_pacer = config
            .shared_pacer
            .then(|| Arc::new(RequestPacer::new(config.rate_limiter.base_delay)));

        Ok(Self {
            config,
            llm_config: RwLock::new(llm_config),
            registry: Arc::new(RunRegistry::new()),
            artifacts: Arc::new(artifacts),
            graph: Arc::new(SharedGraph::default()),
            shared_pacer,
            run_tx: tx,
            run_rx: parking_lot::Mutex::new(Some(rx)),
            generator_override: None,
        })
    }

    /// Use `generator` for every run instead of the configured provider.
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator_override = Some(generator);
        self
    }

    /// Generator for a new run, built from the current provider configuration.
    pub fn generator(&self) -> Arc<dyn TextGenerator> {
        match &self.generator_override {
            Some(generator) => generator.clone(),
            None => create_generator(&self.llm_config.read(), self.config.rate_limiter.total_timeout),
        }
    }

    /// Take the run receiver (can only be called once, by the worker).
    pub fn take_run_rx(&self) -> Option<mpsc::UnboundedReceiver<RunRequest>> {
        self.run_rx.lock().take()
    }
}
