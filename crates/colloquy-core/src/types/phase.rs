//! Conversation phase - the turn-routing state machine states
//!
//! Every state-producing operation goes through the fixed transition
//! table below; a transition outside the table is rejected, never
//! silently applied.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a conversation within the turn-routing state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    /// No task in progress
    #[default]
    Idle,
    /// A classified command is being routed
    Understanding,
    /// Suspended until the user supplies a slot value
    WaitingForSlot,
    /// Incoming slot values are being applied
    ValidatingSlot,
    /// Confirmation prompt shown, awaiting the answer
    Confirming,
    /// A confirm step was reached but the prompt is not out yet
    ReadyForConfirmation,
    /// Confirmed and positioned on an action step
    ReadyForAction,
    /// An external action is running
    ExecutingAction,
    /// Producing the outbound response for this turn
    GeneratingResponse,
    /// An unrecoverable condition was hit this turn
    Error,
}

impl ConversationPhase {
    /// Check whether the table allows moving from `self` to `next`.
    ///
    /// Self-transitions are always legal (re-prompts, confirmation
    /// retries). `Error` is reachable from every phase so that turn
    /// boundary recovery never has to bypass the table.
    pub fn can_transition_to(&self, next: ConversationPhase) -> bool {
        use ConversationPhase::*;

        if *self == next || next == Error {
            return true;
        }

        match self {
            Idle => matches!(next, Understanding),
            Understanding => matches!(
                next,
                WaitingForSlot
                    | ValidatingSlot
                    | Confirming
                    | ReadyForConfirmation
                    | ReadyForAction
                    | ExecutingAction
                    | GeneratingResponse
                    | Idle
            ),
            WaitingForSlot => matches!(next, Understanding | ValidatingSlot),
            ValidatingSlot => matches!(
                next,
                WaitingForSlot
                    | ReadyForConfirmation
                    | Confirming
                    | ReadyForAction
                    | GeneratingResponse
            ),
            ReadyForConfirmation => matches!(next, Confirming),
            Confirming => matches!(next, ReadyForAction | WaitingForSlot | Understanding),
            ReadyForAction => matches!(next, ExecutingAction | Understanding),
            ExecutingAction => matches!(next, GeneratingResponse),
            GeneratingResponse => matches!(
                next,
                Idle | Understanding | WaitingForSlot | ReadyForConfirmation | ReadyForAction
            ),
            Error => matches!(next, Idle | Understanding),
        }
    }

    /// Check whether the conversation is suspended awaiting external input
    pub fn is_awaiting_input(&self) -> bool {
        matches!(
            self,
            ConversationPhase::WaitingForSlot | ConversationPhase::Confirming
        )
    }
}

impl fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConversationPhase::Idle => "idle",
            ConversationPhase::Understanding => "understanding",
            ConversationPhase::WaitingForSlot => "waiting_for_slot",
            ConversationPhase::ValidatingSlot => "validating_slot",
            ConversationPhase::Confirming => "confirming",
            ConversationPhase::ReadyForConfirmation => "ready_for_confirmation",
            ConversationPhase::ReadyForAction => "ready_for_action",
            ConversationPhase::ExecutingAction => "executing_action",
            ConversationPhase::GeneratingResponse => "generating_response",
            ConversationPhase::Error => "error",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConversationPhase::*;

    #[test]
    fn test_idle_only_reaches_understanding_and_error() {
        assert!(Idle.can_transition_to(Understanding));
        assert!(Idle.can_transition_to(Error));
        assert!(!Idle.can_transition_to(Confirming));
        assert!(!Idle.can_transition_to(ExecutingAction));
    }

    #[test]
    fn test_confirming_transitions_match_table() {
        assert!(Confirming.can_transition_to(ReadyForAction));
        assert!(Confirming.can_transition_to(WaitingForSlot));
        assert!(Confirming.can_transition_to(Understanding));
        assert!(Confirming.can_transition_to(Confirming));
        assert!(!Confirming.can_transition_to(ExecutingAction));
        assert!(!Confirming.can_transition_to(Idle));
    }

    #[test]
    fn test_error_reachable_from_every_phase() {
        for phase in [
            Idle,
            Understanding,
            WaitingForSlot,
            ValidatingSlot,
            Confirming,
            ReadyForConfirmation,
            ReadyForAction,
            ExecutingAction,
            GeneratingResponse,
        ] {
            assert!(phase.can_transition_to(Error), "{phase} -> error rejected");
        }
    }

    #[test]
    fn test_self_transition_always_allowed() {
        assert!(WaitingForSlot.can_transition_to(WaitingForSlot));
        assert!(Confirming.can_transition_to(Confirming));
    }
}
