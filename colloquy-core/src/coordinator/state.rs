use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ColloquyError, ColloquyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    Decomposing,
    Delegating,
    Processing,
    Complete,
    Error,
}

impl CoordinatorState {
    fn rank(&self) -> u8 {
        match self {
            CoordinatorState::Idle => 0,
            CoordinatorState::Decomposing => 1,
            CoordinatorState::Delegating => 2,
            CoordinatorState::Processing => 3,
            CoordinatorState::Complete | CoordinatorState::Error => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Complete | CoordinatorState::Error)
    }

    pub fn can_transition_to(&self, next: CoordinatorState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == CoordinatorState::Error || next.rank() > self.rank()
    }
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::Decomposing => "decomposing",
            CoordinatorState::Delegating => "delegating",
            CoordinatorState::Processing => "processing",
            CoordinatorState::Complete => "complete",
            CoordinatorState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: CoordinatorState,
    pub to: CoordinatorState,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

/// One orchestration's forward-only state, with every change kept in order.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: CoordinatorState,
    history: Vec<StateChange>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: CoordinatorState::Idle,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> CoordinatorState {
        self.current
    }

    pub fn history(&self) -> &[StateChange] {
        &self.history
    }

    pub fn into_history(self) -> Vec<StateChange> {
        self.history
    }

    pub fn transition(&mut self, to: CoordinatorState) -> ColloquyResult<()> {
        self.transition_with(to, None)
    }

    pub fn transition_with(
        &mut self,
        to: CoordinatorState,
        detail: Option<String>,
    ) -> ColloquyResult<()> {
        if !self.current.can_transition_to(to) {
            return Err(ColloquyError::InvalidStateTransition {
                from: self.current.to_string(),
                to: to.to_string(),
            });
        }

        self.history.push(StateChange {
            from: self.current,
            to,
            at: Utc::now(),
            detail,
        });
        self.current = to;
        Ok(())
    }

    /// Move to `Error` unless already terminal. Returns whether it moved.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        self.transition_with(CoordinatorState::Error, Some(reason.into()))
            .is_ok()
    }
}
