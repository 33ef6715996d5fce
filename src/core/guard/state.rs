/*!
 * Execution State Machine
 *
 * Pending -> Validating -> Executing -> Verifying -> {Committed | RolledBack}
 * RolledBack -> RecoveryFailed
 *
 * Any non-terminal state may roll back.
 */

use crate::core::errors::SystemError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Validating,
    Executing,
    Verifying,
    Committed,
    RolledBack,
    /// Restore after rollback failed; escalated to emergency mode
    RecoveryFailed,
}

impl ExecutionState {
    pub fn can_transition(self, to: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, to),
            (Pending, Validating)
                | (Validating, Executing)
                | (Executing, Verifying)
                | (Verifying, Committed)
                | (Pending | Validating | Executing | Verifying, RolledBack)
                | (RolledBack, RecoveryFailed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Committed | ExecutionState::RecoveryFailed
        )
    }

    /// Move to `to`, rejecting transitions the machine does not allow
    pub fn advance(&mut self, to: ExecutionState) -> Result<(), SystemError> {
        if !self.can_transition(to) {
            return Err(SystemError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            });
        }
        *self = to;
        Ok(())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Pending => "Pending",
            ExecutionState::Validating => "Validating",
            ExecutionState::Executing => "Executing",
            ExecutionState::Verifying => "Verifying",
            ExecutionState::Committed => "Committed",
            ExecutionState::RolledBack => "RolledBack",
            ExecutionState::RecoveryFailed => "RecoveryFailed",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
