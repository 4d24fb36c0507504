//! Engine error taxonomy
//!
//! Every variant here is recovered at the turn boundary: a turn never
//! crashes the process. The detailed cause is logged internally; users
//! only ever see a generic message.

use thiserror::Error;

use crate::types::ConversationPhase;

/// The only error text users ever see; the real cause stays in the logs
pub const GENERIC_ERROR_TEXT: &str =
    "Something went wrong on my end. Let's pick this up again in a moment.";

/// Errors raised by the dialogue engine core
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Pushing a flow beyond the configured stack depth. Recoverable:
    /// reported to the caller as a flow-start rejection.
    #[error("flow stack limit exceeded: depth {depth} at max {max}")]
    StackLimitExceeded { depth: usize, max: usize },

    /// Slot mutation attempted with an empty stack
    #[error("no active flow for slot mutation")]
    NoActiveFlow,

    /// The router attempted a transition outside the valid table.
    /// Fatal for the turn; logged with full from/to context.
    #[error("invalid conversation phase transition: {from} -> {to}")]
    InvalidPhaseTransition {
        from: ConversationPhase,
        to: ConversationPhase,
    },

    /// The step advancement ceiling was hit. Degraded: execution halts
    /// at the last resolvable step instead of looping forever.
    #[error("step advancement limit exceeded after {limit} iterations in flow '{flow}'")]
    StepAdvancementLimitExceeded { flow: String, limit: usize },

    /// Unclear confirmation answers past the configured maximum
    #[error("confirmation retries exceeded ({retries})")]
    ConfirmationRetriesExceeded { retries: u32 },

    /// A flow name with no registered definition
    #[error("unknown flow: {0}")]
    UnknownFlow(String),

    /// An action step referenced a name missing from the registry
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

impl EngineError {
    /// Recoverable errors degrade the turn without forcing the
    /// conversation into the error phase.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::StackLimitExceeded { .. }
                | EngineError::StepAdvancementLimitExceeded { .. }
                | EngineError::UnknownFlow(_)
        )
    }
}
