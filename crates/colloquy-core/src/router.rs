//! Turn router - the central dispatch state machine
//!
//! Given the classifier's command and the conversation phase at the
//! start of the turn, the router runs exactly one handler (or the step
//! executor) per turn. Unroutable combinations fall through to response
//! generation with a logged warning; routing itself never fails a turn.

use tokio::sync::RwLock;

use crate::definition::FlowRegistry;
use crate::errors::EngineError;
use crate::executor::{ActionRegistry, StepExecutor};
use crate::handlers::{cancel, confirmation, correction, digression, intent};
use crate::stack::FlowStackManager;
use crate::types::{ClassifiedCommand, ConversationPhase, OutboundMessage, TurnState};

/// Tunable bounds for the engine, all sourced from configuration
#[derive(Debug, Clone)]
pub struct EngineLimits {
    /// Maximum flow stack depth before pushes are rejected
    pub max_stack_depth: usize,
    /// Unclear confirmation answers tolerated before giving up
    pub max_confirm_retries: u32,
    /// Step advancement iterations allowed within one turn
    pub step_ceiling: usize,
    /// Completed-flow history entries kept per conversation
    pub max_completed_history: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_stack_depth: 10,
            max_confirm_retries: 3,
            step_ceiling: 20,
            max_completed_history: 50,
        }
    }
}

/// Routes one classified command per turn to exactly one handler
pub struct TurnRouter {
    stack: FlowStackManager,
    executor: StepExecutor,
    max_confirm_retries: u32,
}

impl TurnRouter {
    /// Create a router with the given limits
    pub fn new(limits: EngineLimits) -> Self {
        Self {
            stack: FlowStackManager::new(limits.max_stack_depth, limits.max_completed_history),
            executor: StepExecutor::new(limits.step_ceiling),
            max_confirm_retries: limits.max_confirm_retries,
        }
    }

    /// The stack manager, for callers that start flows programmatically
    pub fn stack(&self) -> &FlowStackManager {
        &self.stack
    }

    /// Process one turn: reset per-turn scratch state, dispatch the
    /// command, and return the outbound messages. The pending task and
    /// final phase are read off the turn state by the caller.
    pub async fn route(
        &self,
        state: &mut TurnState,
        flows: &FlowRegistry,
        actions: &RwLock<ActionRegistry>,
        command: ClassifiedCommand,
    ) -> Result<Vec<OutboundMessage>, EngineError> {
        state.begin_turn();
        state.last_command = Some(command.clone());
        let origin_phase = state.phase;
        let origin_awaited = state.awaited_slot.clone();
        tracing::debug!(
            command = command.kind_label(),
            phase = %origin_phase,
            turn = state.turn_count,
            "routing turn"
        );

        match command {
            ClassifiedCommand::Digression { utterance } => {
                digression::digress(state, flows, &utterance)
            }
            ClassifiedCommand::Clarification { target_slot } => {
                digression::clarify(state, flows, target_slot.as_deref())
            }
            ClassifiedCommand::Continuation => {
                if state.flow_stack.is_empty() {
                    self.fall_through(state, flows, "continuation with no active flow")
                } else {
                    state.transition(ConversationPhase::Understanding)?;
                    self.executor.advance(state, &self.stack, flows, actions).await
                }
            }
            ClassifiedCommand::SlotValues { slots } => {
                // documented special case: values given while confirming
                // are corrections, not answers
                if origin_phase == ConversationPhase::Confirming {
                    confirmation::correct_while_confirming(state, &self.stack, flows, &slots, false)
                } else if state.flow_stack.is_empty() {
                    self.fall_through(state, flows, "slot values with no active flow")
                } else {
                    state.transition(ConversationPhase::Understanding)?;
                    state.transition(ConversationPhase::ValidatingSlot)?;
                    for assignment in &slots {
                        self.stack
                            .set_slot(state, &assignment.name, assignment.value.clone())?;
                    }
                    self.executor.advance(state, &self.stack, flows, actions).await
                }
            }
            ClassifiedCommand::Correction { slot: _ } | ClassifiedCommand::Modification { slot: _ }
                if state.flow_stack.is_empty() =>
            {
                self.fall_through(state, flows, "correction with no active flow")
            }
            ClassifiedCommand::Correction { slot } => {
                if origin_phase == ConversationPhase::Confirming {
                    confirmation::correct_while_confirming(
                        state,
                        &self.stack,
                        flows,
                        std::slice::from_ref(&slot),
                        false,
                    )
                } else {
                    state.transition(ConversationPhase::Understanding)?;
                    correction::apply(state, &self.stack, flows, &slot, false)
                }
            }
            ClassifiedCommand::Modification { slot } => {
                if origin_phase == ConversationPhase::Confirming {
                    confirmation::correct_while_confirming(
                        state,
                        &self.stack,
                        flows,
                        std::slice::from_ref(&slot),
                        true,
                    )
                } else {
                    state.transition(ConversationPhase::Understanding)?;
                    correction::apply(state, &self.stack, flows, &slot, true)
                }
            }
            ClassifiedCommand::ConfirmationAnswer { answer } => {
                if origin_phase != ConversationPhase::Confirming || state.flow_stack.is_empty() {
                    self.fall_through(state, flows, "confirmation answer outside confirmation")
                } else {
                    confirmation::answer(
                        state,
                        &self.stack,
                        flows,
                        answer,
                        self.max_confirm_retries,
                    )
                }
            }
            ClassifiedCommand::IntentChange { flow_name, slots } => {
                if flows.get(&flow_name).is_none() {
                    tracing::warn!(flow = %flow_name, "intent change to unknown flow");
                    self.fall_through(state, flows, "unknown flow requested")
                } else {
                    state.transition(ConversationPhase::Understanding)?;
                    intent::apply(
                        state,
                        &self.stack,
                        &self.executor,
                        flows,
                        actions,
                        &flow_name,
                        &slots,
                        origin_phase,
                        origin_awaited,
                    )
                    .await
                }
            }
            ClassifiedCommand::Cancellation => {
                state.transition(ConversationPhase::Understanding)?;
                cancel::apply(state, &self.stack, &self.executor, flows, actions).await
            }
        }
    }

    /// Default arm: log, answer generically, and re-emit whatever the
    /// conversation was already waiting for. Never throws.
    fn fall_through(
        &self,
        state: &mut TurnState,
        flows: &FlowRegistry,
        reason: &str,
    ) -> Result<Vec<OutboundMessage>, EngineError> {
        tracing::warn!(
            reason,
            phase = %state.phase,
            "unroutable command, falling through to response generation"
        );
        let mut messages = vec![OutboundMessage::info("Sorry, I didn't follow that.")];
        messages.extend(digression::reprompt_current(state, flows));
        Ok(messages)
    }
}
