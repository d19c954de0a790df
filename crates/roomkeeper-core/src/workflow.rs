use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::record::UserId;

/// How long a deletion confirmation stays open.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::seconds(60);

/// State of one room's deletion controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Managing,
    ConfirmingDeletion { deadline: DateTime<Utc> },
    /// Controls retired after a confirmed deletion. Terminal.
    Retired,
}

/// A button press delivered by the interactive surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    RequestDelete,
    Confirm,
    Cancel,
}

/// What the caller must do after an action was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Now confirming: render "Confirm" / "Cancel".
    PromptConfirmation,
    /// Invoker is not the owner. State unchanged; tell only the invoker.
    Denied,
    /// Owner confirmed: tear the room down and retire the controls.
    Teardown,
    /// Back to managing (cancel or expired confirmation).
    Reverted,
    /// The action does not apply to the current state (stale button).
    Ignored,
}

/// Per-room deletion state machine.
///
/// Only the owner may move it; every other invoker is denied without a state
/// change. Time is passed in explicitly so expiry is deterministic.
#[derive(Debug, Clone)]
pub struct DeletionWorkflow {
    owner: Option<UserId>,
    state: WorkflowState,
    confirm_timeout: Duration,
}

impl DeletionWorkflow {
    pub fn new(owner: Option<UserId>, confirm_timeout: Duration) -> Self {
        Self {
            owner,
            state: WorkflowState::Managing,
            confirm_timeout,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    fn is_owner(&self, user: UserId) -> bool {
        self.owner == Some(user)
    }

    /// Revert an expired confirmation. Returns true if the state changed.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            WorkflowState::ConfirmingDeletion { deadline } if now >= deadline => {
                self.state = WorkflowState::Managing;
                true
            }
            _ => false,
        }
    }

    /// Put the controls back into `Managing` after a teardown that did not
    /// complete.
    pub fn reopen(&mut self) {
        self.state = WorkflowState::Managing;
    }

    pub fn apply(
        &mut self,
        action: WorkflowAction,
        invoker: UserId,
        now: DateTime<Utc>,
    ) -> Transition {
        self.expire(now);

        match (self.state, action) {
            (WorkflowState::Retired, _) => Transition::Ignored,
            (WorkflowState::Managing, WorkflowAction::RequestDelete) => {
                if !self.is_owner(invoker) {
                    return Transition::Denied;
                }
                self.state = WorkflowState::ConfirmingDeletion {
                    deadline: now + self.confirm_timeout,
                };
                Transition::PromptConfirmation
            }
            (WorkflowState::ConfirmingDeletion { .. }, WorkflowAction::Confirm) => {
                if !self.is_owner(invoker) {
                    return Transition::Denied;
                }
                self.state = WorkflowState::Retired;
                Transition::Teardown
            }
            (WorkflowState::ConfirmingDeletion { .. }, WorkflowAction::Cancel) => {
                if !self.is_owner(invoker) {
                    return Transition::Denied;
                }
                self.state = WorkflowState::Managing;
                Transition::Reverted
            }
            _ => Transition::Ignored,
        }
    }
}
