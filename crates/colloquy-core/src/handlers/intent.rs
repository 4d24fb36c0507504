//! Intent-change handler
//!
//! Pushes the requested flow on top of whatever is running, seeds any
//! slots the classifier already extracted, and advances. A rejected
//! push (stack at its depth limit) is a flow-start rejection, not an
//! error: the previous suspension point is restored and re-prompted.

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::definition::FlowRegistry;
use crate::errors::EngineError;
use crate::executor::{ActionRegistry, StepExecutor};
use crate::handlers::digression;
use crate::stack::FlowStackManager;
use crate::types::{
    ConversationPhase, OutboundMessage, SlotAssignment, TurnState,
};

/// Start the named flow, seeding `slots` into its fresh slot entry.
#[allow(clippy::too_many_arguments)]
pub async fn apply(
    state: &mut TurnState,
    stack: &FlowStackManager,
    executor: &StepExecutor,
    flows: &FlowRegistry,
    actions: &RwLock<ActionRegistry>,
    flow_name: &str,
    slots: &[SlotAssignment],
    origin_phase: ConversationPhase,
    origin_awaited: Option<String>,
) -> Result<Vec<OutboundMessage>, EngineError> {
    let seeds: HashMap<_, _> = slots
        .iter()
        .map(|a| (a.name.clone(), a.value.clone()))
        .collect();

    match stack.push(state, flow_name, seeds) {
        Ok(_) => {
            tracing::info!(flow = %flow_name, depth = state.flow_stack.depth(), "intent change");
            executor.advance(state, stack, flows, actions).await
        }
        Err(EngineError::StackLimitExceeded { depth, max }) => {
            tracing::warn!(
                flow = %flow_name,
                depth,
                max,
                "flow start rejected, stack at depth limit"
            );
            restore_origin(state, origin_phase, origin_awaited)?;
            let mut messages = vec![OutboundMessage::info(
                "I can't start another task until we finish the current ones.",
            )];
            messages.extend(digression::reprompt_current(state, flows));
            Ok(messages)
        }
        Err(other) => Err(other),
    }
}

/// Put the conversation back where it was before the routing hop, so a
/// rejected flow start leaves the previous suspension point intact.
fn restore_origin(
    state: &mut TurnState,
    phase: ConversationPhase,
    awaited: Option<String>,
) -> Result<(), EngineError> {
    if phase == ConversationPhase::WaitingForSlot {
        match awaited {
            Some(slot) => state.set_waiting(slot)?,
            None => state.transition(ConversationPhase::WaitingForSlot)?,
        }
    } else if state.phase != phase {
        state.transition(phase)?;
    }
    Ok(())
}
