//! Pipeline state machine.
//!
//! Transitions are a pure function of (state, outcome, degraded) so the whole
//! partial-failure matrix can be checked without running any step.

use serde::Serialize;

use crate::types::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Init,
    Running(Step),
    Done,
    PartiallyComplete,
    Failed,
}

/// How a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepOutcome {
    /// Produced an artifact, which has been persisted.
    Completed,
    /// Retries exhausted; the step has no artifact.
    Failed,
    /// Not attempted because a prerequisite artifact is missing.
    Skipped,
    /// Non-retryable error; the run stops here.
    Fatal,
}

/// Next state and degraded flag after `outcome` in `state`.
///
/// Outcomes delivered outside `Running` leave the state unchanged.
pub fn transition(
    state: PipelineState,
    outcome: StepOutcome,
    degraded: bool,
) -> (PipelineState, bool) {
    let PipelineState::Running(step) = state else {
        return (state, degraded);
    };

    let degraded = match outcome {
        StepOutcome::Fatal => return (PipelineState::Failed, degraded),
        StepOutcome::Failed | StepOutcome::Skipped if step.is_required() => {
            return (PipelineState::Failed, degraded)
        }
        StepOutcome::Failed | StepOutcome::Skipped => true,
        StepOutcome::Completed => degraded,
    };

    let next = match step.successor() {
        Some(next) => PipelineState::Running(next),
        None if degraded => PipelineState::PartiallyComplete,
        None => PipelineState::Done,
    };
    (next, degraded)
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    state: PipelineState,
    degraded: bool,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Init,
            degraded: false,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Whether any optional step failed or was skipped so far.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    /// Leave `Init` for the first step.
    pub fn start(&mut self) -> PipelineState {
        if self.state == PipelineState::Init {
            self.state = PipelineState::Running(Step::ALL[0]);
        }
        self.state
    }

    pub fn advance(&mut self, outcome: StepOutcome) -> PipelineState {
        let (state, degraded) = transition(self.state, outcome, self.degraded);
        self.state = state;
        self.degraded = degraded;
        state
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTCOMES: [StepOutcome; 4] = [
        StepOutcome::Completed,
        StepOutcome::Failed,
        StepOutcome::Skipped,
        StepOutcome::Fatal,
    ];

    /// Drive the machine with an outcome per step; unlisted steps complete.
    fn drive(outcomes: &[(Step, StepOutcome)]) -> (PipelineState, Vec<Step>) {
        let mut machine = StateMachine::new();
        let mut visited = Vec::new();
        let mut state = machine.start();
        while let PipelineState::Running(step) = state {
            visited.push(step);
            let outcome = outcomes
                .iter()
                .find(|(s, _)| *s == step)
                .map(|(_, o)| *o)
                .unwrap_or(StepOutcome::Completed);
            state = machine.advance(outcome);
        }
        (state, visited)
    }

    #[test]
    fn test_full_transition_table() {
        for step in Step::ALL {
            for outcome in OUTCOMES {
                for degraded in [false, true] {
                    let (next, now_degraded) =
                        transition(PipelineState::Running(step), outcome, degraded);
                    let expected = match (outcome, step.is_required()) {
                        (StepOutcome::Fatal, _) => PipelineState::Failed,
                        (StepOutcome::Failed | StepOutcome::Skipped, true) => PipelineState::Failed,
                        _ => match step.successor() {
                            Some(s) => PipelineState::Running(s),
                            None if degraded || outcome != StepOutcome::Completed => {
                                PipelineState::PartiallyComplete
                            }
                            None => PipelineState::Done,
                        },
                    };
                    assert_eq!(next, expected, "{:?} + {:?} (degraded={})", step, outcome, degraded);
                    if next != PipelineState::Failed {
                        assert_eq!(
                            now_degraded,
                            degraded || outcome != StepOutcome::Completed
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_terminal_and_init_states_absorb_outcomes() {
        for state in [
            PipelineState::Init,
            PipelineState::Done,
            PipelineState::PartiallyComplete,
            PipelineState::Failed,
        ] {
            for outcome in OUTCOMES {
                assert_eq!(transition(state, outcome, false).0, state);
            }
        }
    }

    #[test]
    fn test_all_complete_is_done() {
        let (state, visited) = drive(&[]);
        assert_eq!(state, PipelineState::Done);
        assert_eq!(visited, Step::ALL.to_vec());
    }

    #[test]
    fn test_stage1_failure_fails_run() {
        let (state, visited) = drive(&[(Step::Brainstorm, StepOutcome::Failed)]);
        assert_eq!(state, PipelineState::Failed);
        assert_eq!(visited, vec![Step::Brainstorm]);
    }

    #[test]
    fn test_optional_failure_is_partial() {
        let (state, _) = drive(&[(Step::Context, StepOutcome::Failed)]);
        assert_eq!(state, PipelineState::PartiallyComplete);

        let (state, _) = drive(&[(Step::Summary, StepOutcome::Failed)]);
        assert_eq!(state, PipelineState::PartiallyComplete);
    }

    #[test]
    fn test_fatal_anywhere_fails_run() {
        for step in Step::ALL {
            let (state, visited) = drive(&[(step, StepOutcome::Fatal)]);
            assert_eq!(state, PipelineState::Failed);
            assert_eq!(visited.last(), Some(&step));
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut machine = StateMachine::new();
        assert_eq!(machine.start(), PipelineState::Running(Step::Brainstorm));
        machine.advance(StepOutcome::Completed);
        assert_eq!(machine.start(), PipelineState::Running(Step::Context));
        assert!(!machine.degraded());
    }
}
