//! Runtime types: stages, steps, run records and status snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use chronos_extract::Hypothesis;
use chronos_llm::GenerationParams;
use chronos_store::GraphStats;
use serde::Serialize;

/// Numbered phase of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Stage1,
    Stage2,
    Stage3,
    Stage4,
    Rank,
}

impl Stage {
    pub fn slug(self) -> &'static str {
        match self {
            Self::Stage1 => "stage1",
            Self::Stage2 => "stage2",
            Self::Stage3 => "stage3",
            Self::Stage4 => "stage4",
            Self::Rank => "rank",
        }
    }

    /// Progress reported while this stage is running.
    pub fn progress_percent(self) -> u8 {
        match self {
            Self::Stage1 => 30,
            Self::Stage2 => 50,
            Self::Stage3 => 70,
            Self::Stage4 => 85,
            Self::Rank => 95,
        }
    }

    /// The step whose output stands for the whole stage.
    pub fn artifact_step(self) -> Step {
        match self {
            Self::Stage1 => Step::Brainstorm,
            Self::Stage2 => Step::Context,
            Self::Stage3 => Step::Synthesis,
            Self::Stage4 => Step::Questions,
            Self::Rank => Step::Summary,
        }
    }
}

/// One model-backed unit of work. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Brainstorm,
    Context,
    LensA,
    LensB,
    LensC,
    Synthesis,
    Questions,
    Ranking,
    Summary,
}

impl Step {
    pub const ALL: [Step; 9] = [
        Step::Brainstorm,
        Step::Context,
        Step::LensA,
        Step::LensB,
        Step::LensC,
        Step::Synthesis,
        Step::Questions,
        Step::Ranking,
        Step::Summary,
    ];

    pub fn stage(self) -> Stage {
        match self {
            Self::Brainstorm => Stage::Stage1,
            Self::Context => Stage::Stage2,
            Self::LensA | Self::LensB | Self::LensC | Self::Synthesis => Stage::Stage3,
            Self::Questions => Stage::Stage4,
            Self::Ranking | Self::Summary => Stage::Rank,
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Brainstorm => "brainstorm",
            Self::Context => "context",
            Self::LensA => "lens_a",
            Self::LensB => "lens_b",
            Self::LensC => "lens_c",
            Self::Synthesis => "synthesis",
            Self::Questions => "questions",
            Self::Ranking => "ranking",
            Self::Summary => "summary",
        }
    }

    /// Steps whose artifacts must exist before this one may run.
    pub fn requires(self) -> &'static [Step] {
        match self {
            Self::Brainstorm => &[],
            Self::Context => &[Step::Brainstorm],
            Self::LensA | Self::LensB | Self::LensC => &[Step::Brainstorm, Step::Context],
            Self::Synthesis => &[Step::LensA, Step::LensB, Step::LensC],
            Self::Questions => &[Step::Context, Step::Synthesis],
            Self::Ranking => &[Step::Questions],
            Self::Summary => &[Step::Questions, Step::Ranking],
        }
    }

    /// Failure of a required step fails the run.
    pub fn is_required(self) -> bool {
        matches!(self, Self::Brainstorm)
    }

    pub fn successor(self) -> Option<Step> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn params(self) -> GenerationParams {
        let temperature = match self.stage() {
            Stage::Stage1 => 0.8,
            Stage::Stage2 => 0.5,
            Stage::Stage3 => 0.7,
            Stage::Stage4 | Stage::Rank => 0.6,
        };
        GenerationParams::with_temperature(temperature)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.stage().slug(), self.slug())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Running,
    PartiallyComplete,
    Complete,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Step outputs of one run. Entries are write-once: a later step only ever
/// reads what earlier steps produced.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Artifacts(BTreeMap<Step, String>);

impl Artifacts {
    /// Record `text` for `step`. Returns false, leaving the first value in
    /// place, when the step already has an artifact.
    pub fn insert(&mut self, step: Step, text: String) -> bool {
        if self.0.contains_key(&step) {
            return false;
        }
        self.0.insert(step, text);
        true
    }

    pub fn get(&self, step: Step) -> Option<&str> {
        self.0.get(&step).map(String::as_str)
    }

    pub fn contains(&self, step: Step) -> bool {
        self.0.contains_key(&step)
    }

    /// Artifact standing for `stage`, if that stage finished.
    pub fn for_stage(&self, stage: Stage) -> Option<&str> {
        self.get(stage.artifact_step())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything known about one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(rename = "currentStage")]
    pub current_stage: Option<Stage>,
    #[serde(rename = "currentStep")]
    pub current_step: Option<Step>,
    pub status: RunStatus,
    pub artifacts: Artifacts,
    #[serde(rename = "skippedSteps")]
    pub skipped_steps: Vec<Step>,
    #[serde(rename = "failedSteps")]
    pub failed_steps: Vec<Step>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphStats>,
    pub hypotheses: Vec<Hypothesis>,
    #[serde(rename = "topHypotheses")]
    pub top_hypotheses: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "completedAt")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(run_id: impl Into<String>, filename: Option<String>) -> Self {
        Self {
            run_id: run_id.into(),
            filename,
            current_stage: None,
            current_step: None,
            status: RunStatus::Running,
            artifacts: Artifacts::default(),
            skipped_steps: Vec::new(),
            failed_steps: Vec::new(),
            last_error: None,
            graph: None,
            hypotheses: Vec::new(),
            top_hypotheses: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn progress_percent(&self) -> u8 {
        if self.status.is_terminal() {
            100
        } else {
            self.current_stage.map(Stage::progress_percent).unwrap_or(0)
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            run_id: self.run_id.clone(),
            status: self.status,
            current_stage: self.current_stage,
            current_step: self.current_step,
            progress_percent: self.progress_percent(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Polling view of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    #[serde(rename = "runId")]
    pub run_id: String,
    pub status: RunStatus,
    #[serde(rename = "currentStage")]
    pub current_stage: Option<Stage>,
    #[serde(rename = "currentStep")]
    pub current_step: Option<Step>,
    #[serde(rename = "progressPercent")]
    pub progress_percent: u8,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}
