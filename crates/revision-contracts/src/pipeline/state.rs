use serde::Serialize;

use crate::failure::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Validating,
    Analyzing,
    Generating,
    Succeeded,
    Failed(FailureKind),
    Fallback,
    SucceededDegraded,
}

impl PipelineState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Analyzing => "analyzing",
            Self::Generating => "generating",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::Fallback => "fallback",
            Self::SucceededDegraded => "succeeded_degraded",
        }
    }

    fn allows(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Analyzing)
                | (Analyzing, Generating)
                | (Generating, Succeeded)
                | (Validating | Analyzing | Generating, Failed(_))
                | (Failed(_), Fallback)
                | (Fallback, SucceededDegraded)
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "failed({kind})"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal pipeline transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}

/// Per-request state tracker. Every visited state is kept in order so the
/// final result can report how it got there.
#[derive(Debug, Clone)]
pub struct PipelineStateMachine {
    trail: Vec<PipelineState>,
}

impl Default for PipelineStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStateMachine {
    pub fn new() -> Self {
        Self {
            trail: vec![PipelineState::Idle],
        }
    }

    pub fn current(&self) -> PipelineState {
        self.trail
            .last()
            .copied()
            .unwrap_or(PipelineState::Idle)
    }

    pub fn advance(&mut self, next: PipelineState) -> Result<(), InvalidTransition> {
        let from = self.current();
        if !from.allows(next) || self.trail.contains(&next) {
            return Err(InvalidTransition { from, to: next });
        }
        self.trail.push(next);
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.current(),
            PipelineState::Succeeded | PipelineState::SucceededDegraded
        )
    }

    pub fn trail(&self) -> &[PipelineState] {
        &self.trail
    }
}

#[cfg(test)]
mod tests {
    use super::{PipelineState, PipelineStateMachine};
    use crate::failure::FailureKind;

    #[test]
    fn happy_path_reaches_succeeded() {
        let mut machine = PipelineStateMachine::new();
        for state in [
            PipelineState::Validating,
            PipelineState::Analyzing,
            PipelineState::Generating,
            PipelineState::Succeeded,
        ] {
            machine.advance(state).unwrap();
        }
        assert!(machine.is_terminal());
        assert_eq!(machine.trail().len(), 5);
    }

    #[test]
    fn failure_routes_through_fallback() {
        let mut machine = PipelineStateMachine::new();
        machine.advance(PipelineState::Validating).unwrap();
        machine.advance(PipelineState::Analyzing).unwrap();
        machine
            .advance(PipelineState::Failed(FailureKind::Network))
            .unwrap();
        assert!(!machine.is_terminal());
        machine.advance(PipelineState::Fallback).unwrap();
        machine.advance(PipelineState::SucceededDegraded).unwrap();
        assert!(machine.is_terminal());
        assert_eq!(
            machine.trail().last().map(ToString::to_string).as_deref(),
            Some("succeeded_degraded")
        );
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut machine = PipelineStateMachine::new();
        let err = machine.advance(PipelineState::Generating).unwrap_err();
        assert_eq!(err.to_string(), "illegal pipeline transition idle -> generating");

        machine.advance(PipelineState::Validating).unwrap();
        assert!(machine.advance(PipelineState::Validating).is_err());
        assert!(machine.advance(PipelineState::Fallback).is_err());
        assert_eq!(machine.current(), PipelineState::Validating);
    }

    #[test]
    fn failed_state_displays_kind() {
        assert_eq!(
            PipelineState::Failed(FailureKind::Quota).to_string(),
            "failed(quota)"
        );
    }
}
