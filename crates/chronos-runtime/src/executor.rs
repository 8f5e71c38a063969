//! Step executors.
//!
//! The orchestrator only sequences steps; every remote call and its retries
//! happen inside a [`StepRunner`].

use std::sync::Arc;

use async_trait::async_trait;
use chronos_core::Result;
use chronos_extract::{source_snippet, GraphExtractor};
use chronos_llm::{RetryController, TextGenerator};
use chronos_store::{GraphSink, GraphStats};
use tracing::{info, warn};

use crate::prompts::PromptBuilder;
use crate::types::{Artifacts, Step};

/// Read-only inputs available to a step.
pub struct StepContext<'a> {
    pub run_id: &'a str,
    pub source_text: &'a str,
    pub artifacts: &'a Artifacts,
}

/// What a successful step hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub text: String,
    /// Prompt length in characters, recorded in the artifact metadata.
    pub input_length: usize,
    /// Graph stored as a side effect of this step, if any.
    pub graph: Option<GraphStats>,
}

impl StepOutput {
    pub fn new(text: impl Into<String>, input_length: usize) -> Self {
        Self {
            text: text.into(),
            input_length,
            graph: None,
        }
    }
}

#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: Step, ctx: &StepContext<'_>) -> Result<StepOutput>;
}

/// Runs steps against a remote model through a retry controller.
pub struct ModelStepRunner {
    generator: Arc<dyn TextGenerator>,
    retry: Arc<RetryController>,
    prompts: Arc<dyn PromptBuilder>,
    extractor: GraphExtractor,
    graph_sink: Option<Arc<dyn GraphSink>>,
}

impl ModelStepRunner {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        retry: Arc<RetryController>,
        prompts: Arc<dyn PromptBuilder>,
    ) -> Self {
        Self {
            generator,
            retry,
            prompts,
            extractor: GraphExtractor::default(),
            graph_sink: None,
        }
    }

    /// Store Stage2 knowledge graphs into `sink`.
    pub fn with_graph_sink(mut self, sink: Arc<dyn GraphSink>) -> Self {
        self.graph_sink = Some(sink);
        self
    }

    async fn call(&self, step: Step, prompt: &str) -> Result<String> {
        let params = step.params();
        self.retry
            .invoke(|| self.generator.generate(prompt, &params))
            .await
    }

    /// Extract and store the Stage2 knowledge graph. Only fatal errors escape.
    async fn build_graph(&self, ctx: &StepContext<'_>) -> Result<Option<GraphStats>> {
        let prompt = self.prompts.graph_extraction(ctx);
        let answer = match self.call(Step::Context, &prompt).await {
            Ok(answer) => answer,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("[{}] Knowledge graph extraction failed, continuing: {}", ctx.run_id, e);
                return Ok(None);
            }
        };

        let brainstorm = ctx.artifacts.get(Step::Brainstorm).unwrap_or_default();
        let element = self
            .extractor
            .extract(&answer, &source_snippet(brainstorm, ctx.source_text));
        let stats = element.stats();
        info!(
            "[{}] Knowledge graph: {} nodes, {} relationships",
            ctx.run_id, stats.node_count, stats.relationship_count
        );

        match &self.graph_sink {
            Some(sink) => match sink.store(&element) {
                Ok(()) => Ok(Some(stats)),
                Err(e) if e.is_fatal() => Err(e),
                Err(e) => {
                    warn!("[{}] Failed to store knowledge graph: {}", ctx.run_id, e);
                    Ok(None)
                }
            },
            None => Ok(Some(stats)),
        }
    }
}

#[async_trait]
impl StepRunner for ModelStepRunner {
    async fn run(&self, step: Step, ctx: &StepContext<'_>) -> Result<StepOutput> {
        let graph = if step == Step::Context {
            self.build_graph(ctx).await?
        } else {
            None
        };

        let prompt = self.prompts.build(step, ctx);
        info!(
            "[{}] Running {} with {} ({} prompt chars)",
            ctx.run_id,
            step,
            self.generator.model(),
            prompt.chars().count()
        );
        let text = self.call(step, &prompt).await?;

        Ok(StepOutput {
            text,
            input_length: prompt.chars().count(),
            graph,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::DefaultPrompts;
    use chronos_core::{Error, RateLimiterConfig};
    use chronos_llm::GenerationParams;
    use chronos_store::SharedGraph;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays queued answers and records every prompt it sees.
    struct QueueGenerator {
        answers: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl QueueGenerator {
        fn new(answers: Vec<Result<String>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for QueueGenerator {
        async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            self.answers
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Transient("no scripted answer".into())))
        }

        fn model(&self) -> &str {
            "queue"
        }
    }

    fn retry(max_retries: u32) -> Arc<RetryController> {
        Arc::new(RetryController::new(RateLimiterConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            base_delay: Duration::from_millis(50),
            max_retries,
            total_timeout: Duration::from_secs(10),
        }))
    }

    fn context_artifacts() -> Artifacts {
        let mut artifacts = Artifacts::default();
        artifacts.insert(Step::Brainstorm, "brainstorm".into());
        artifacts
    }

    const GRAPH_ANSWER: &str = "Node(id='a', type='X')\nNode(id='b', type='Y')\n\
        Relationship(subj=Node(id='a', type='X'), obj=Node(id='b', type='Y'), type='causes')";

    #[tokio::test(start_paused = true)]
    async fn test_context_builds_graph_then_summary() {
        let generator = Arc::new(QueueGenerator::new(vec![
            Ok(GRAPH_ANSWER.into()),
            Ok("context summary".into()),
        ]));
        let graph = Arc::new(SharedGraph::default());
        let runner = ModelStepRunner::new(generator.clone(), retry(0), Arc::new(DefaultPrompts::default()))
            .with_graph_sink(graph.clone());

        let artifacts = context_artifacts();
        let ctx = StepContext {
            run_id: "r1",
            source_text: "source",
            artifacts: &artifacts,
        };
        let output = runner.run(Step::Context, &ctx).await.unwrap();

        assert_eq!(output.text, "context summary");
        assert_eq!(output.graph.map(|g| g.relationship_count), Some(1));
        assert_eq!(graph.read().stats().node_count, 2);
        assert_eq!(generator.prompts.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graph_failure_is_tolerated() {
        let generator = Arc::new(QueueGenerator::new(vec![
            Err(Error::Http("API error 500: internal".into())),
            Ok("context summary".into()),
        ]));
        let runner = ModelStepRunner::new(generator, retry(0), Arc::new(DefaultPrompts::default()));

        let artifacts = context_artifacts();
        let ctx = StepContext {
            run_id: "r1",
            source_text: "source",
            artifacts: &artifacts,
        };
        let output = runner.run(Step::Context, &ctx).await.unwrap();
        assert_eq!(output.text, "context summary");
        assert!(output.graph.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_propagates() {
        let generator = Arc::new(QueueGenerator::new(vec![Err(Error::Config("no key".into()))]));
        let runner = ModelStepRunner::new(generator, retry(3), Arc::new(DefaultPrompts::default()));

        let artifacts = context_artifacts();
        let ctx = StepContext {
            run_id: "r1",
            source_text: "source",
            artifacts: &artifacts,
        };
        let err = runner.run(Step::Context, &ctx).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_retries_through_controller() {
        let generator = Arc::new(QueueGenerator::new(vec![
            Err(Error::Http("API error 429 Too Many Requests".into())),
            Ok("ideas".into()),
        ]));
        let runner = ModelStepRunner::new(generator.clone(), retry(2), Arc::new(DefaultPrompts::default()));

        let artifacts = Artifacts::default();
        let ctx = StepContext {
            run_id: "r1",
            source_text: "source",
            artifacts: &artifacts,
        };
        let output = runner.run(Step::Brainstorm, &ctx).await.unwrap();
        assert_eq!(output.text, "ideas");
        assert_eq!(output.input_length, generator.prompts.lock()[0].chars().count());
        assert_eq!(generator.prompts.lock().len(), 2);
    }
}
