//! Pipeline orchestrator: sequences steps, persists artifacts, publishes status.

use std::sync::Arc;

use chrono::Utc;
use chronos_extract::{parse_hypotheses, parse_ranking, select_top};
use chronos_store::{ArtifactSink, ArtifactWrite};
use tracing::{error, info, warn};

use crate::executor::{StepContext, StepOutput, StepRunner};
use crate::machine::{PipelineState, StateMachine, StepOutcome};
use crate::registry::RunRegistry;
use crate::types::*;

/// Drives one run at a time through the state machine. Performs no retries
/// itself; those belong to the step runner.
pub struct Orchestrator {
    runner: Arc<dyn StepRunner>,
    artifacts: Arc<dyn ArtifactSink>,
    registry: Arc<RunRegistry>,
    top_n: usize,
}

impl Orchestrator {
    pub fn new(
        runner: Arc<dyn StepRunner>,
        artifacts: Arc<dyn ArtifactSink>,
        registry: Arc<RunRegistry>,
    ) -> Self {
        Self {
            runner,
            artifacts,
            registry,
            top_n: 3,
        }
    }

    /// Number of hypotheses kept from the ranking.
    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    /// Run the pipeline for `run_id` over `source_text` until a terminal state.
    ///
    /// Uses the registered record for `run_id` when one exists.
    pub async fn run(&self, run_id: &str, source_text: &str) -> PipelineRun {
        let mut run = self
            .registry
            .get(run_id)
            .unwrap_or_else(|| PipelineRun::new(run_id, None));
        run.status = RunStatus::Running;
        self.registry.publish(&run);

        info!("[{}] Pipeline started ({} source chars)", run_id, source_text.chars().count());

        let mut machine = StateMachine::new();
        let mut state = machine.start();
        while let PipelineState::Running(step) = state {
            run.current_stage = Some(step.stage());
            run.current_step = Some(step);
            self.registry.publish(&run);

            let outcome = self.execute(step, &mut run, source_text).await;
            state = machine.advance(outcome);
        }

        run.status = match state {
            PipelineState::Done => RunStatus::Complete,
            PipelineState::PartiallyComplete => RunStatus::PartiallyComplete,
            _ => RunStatus::Failed,
        };
        run.completed_at = Some(Utc::now());
        self.registry.publish(&run);

        match run.status {
            RunStatus::Failed => error!(
                "[{}] Pipeline failed at {}: {}",
                run_id,
                run.current_step.map(|s| s.to_string()).unwrap_or_default(),
                run.last_error.as_deref().unwrap_or("unknown error")
            ),
            status => info!(
                "[{}] Pipeline finished: {:?} ({} artifacts, skipped {:?}, failed {:?})",
                run_id,
                status,
                run.artifacts.len(),
                run.skipped_steps,
                run.failed_steps
            ),
        }
        run
    }

    async fn execute(&self, step: Step, run: &mut PipelineRun, source_text: &str) -> StepOutcome {
        let missing: Vec<Step> = step
            .requires()
            .iter()
            .copied()
            .filter(|s| !run.artifacts.contains(*s))
            .collect();
        if !missing.is_empty() {
            info!("[{}] Skipping {}: missing {:?}", run.run_id, step, missing);
            run.skipped_steps.push(step);
            return StepOutcome::Skipped;
        }

        info!("[{}] Starting {}", run.run_id, step);
        let result = {
            let ctx = StepContext {
                run_id: &run.run_id,
                source_text,
                artifacts: &run.artifacts,
            };
            self.runner.run(step, &ctx).await
        };

        match result {
            Ok(output) => self.complete(step, output, run),
            Err(e) if e.is_fatal() => {
                error!("[{}] {} aborted the run: {}", run.run_id, step, e);
                run.last_error = Some(e.to_string());
                StepOutcome::Fatal
            }
            Err(e) => {
                if step.is_required() {
                    error!("[{}] Required step {} failed: {}", run.run_id, step, e);
                } else {
                    warn!("[{}] {} failed, continuing without it: {}", run.run_id, step, e);
                }
                run.last_error = Some(e.to_string());
                run.failed_steps.push(step);
                StepOutcome::Failed
            }
        }
    }

    /// Persist, then hand off. The artifact becomes visible to later steps
    /// only after it is durably written.
    fn complete(&self, step: Step, output: StepOutput, run: &mut PipelineRun) -> StepOutcome {
        let write = ArtifactWrite {
            run_id: &run.run_id,
            stage: step.stage().slug(),
            step: step.slug(),
            input_length: output.input_length,
            output: &output.text,
        };
        if let Err(e) = self.artifacts.write(&write) {
            error!("[{}] Could not persist {}: {}", run.run_id, step, e);
            run.last_error = Some(e.to_string());
            return StepOutcome::Fatal;
        }

        if let Some(graph) = output.graph {
            run.graph = Some(graph);
        }
        match step {
            Step::Questions => {
                run.hypotheses = parse_hypotheses(&output.text);
                run.top_hypotheses = run
                    .hypotheses
                    .iter()
                    .take(self.top_n)
                    .map(|h| h.id.clone())
                    .collect();
                if run.hypotheses.is_empty() {
                    warn!("[{}] No H-format hypotheses found in {}", run.run_id, step);
                }
            }
            Step::Ranking => {
                let ranked = parse_ranking(&output.text, self.top_n);
                run.top_hypotheses = select_top(&run.hypotheses, &ranked, self.top_n)
                    .into_iter()
                    .map(|h| h.id)
                    .collect();
            }
            _ => {}
        }

        info!(
            "[{}] Completed {} ({} chars)",
            run.run_id,
            step,
            output.text.chars().count()
        );
        run.artifacts.insert(step, output.text);
        StepOutcome::Completed
    }
}
