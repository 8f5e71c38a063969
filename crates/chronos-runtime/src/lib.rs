//! Runtime orchestrator: runs the staged generation pipeline.
//!
//! Steps are sequenced by an explicit state machine; each step's remote calls
//! go through a retry controller inside the step runner, and every finished
//! artifact is persisted before later steps may read it.

pub mod executor;
pub mod machine;
pub mod orchestrator;
pub mod prompts;
pub mod registry;
pub mod types;

pub use executor::{ModelStepRunner, StepContext, StepOutput, StepRunner};
pub use machine::{PipelineState, StateMachine, StepOutcome};
pub use orchestrator::Orchestrator;
pub use prompts::{DefaultPrompts, PromptBuilder};
pub use registry::RunRegistry;
pub use types::*;
