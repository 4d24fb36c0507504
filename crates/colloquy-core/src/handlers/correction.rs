//! Correction / modification handler
//!
//! Updates the named slot, records what was replaced in the transient
//! flags, and returns execution to the step the user was at when the
//! correction happened - never the step after it. Corrections that
//! arrive while confirming take the regeneration path in the
//! confirmation handler instead.

use serde_json::{json, Value};

use crate::definition::{CompiledStep, FlowRegistry};
use crate::errors::EngineError;
use crate::handlers::confirmation;
use crate::stack::FlowStackManager;
use crate::template::{interpolate, render_value};
use crate::types::{
    ConversationPhase, OutboundMessage, PendingTask, SlotAssignment, TurnState,
};

/// Record the correction/modification markers for this turn.
///
/// The two pairs are mutually exclusive; setting one clears the other.
/// The recorded value is the one being replaced.
pub(crate) fn record_flags(
    state: &mut TurnState,
    slot: &str,
    previous: Option<Value>,
    is_modification: bool,
) {
    let (slot_key, value_key, other_slot_key, other_value_key) = if is_modification {
        (
            "modification_slot",
            "modification_value",
            "correction_slot",
            "correction_value",
        )
    } else {
        (
            "correction_slot",
            "correction_value",
            "modification_slot",
            "modification_value",
        )
    };
    state.transient.remove(other_slot_key);
    state.transient.remove(other_value_key);
    state.transient.set(slot_key, json!(slot));
    state.transient.set(value_key, previous.unwrap_or(Value::Null));
}

/// Apply a correction or modification outside the confirming phase.
///
/// The origin step is captured before the slot mutation and restored
/// after it, with the phase mapped from that step's kind: collect steps
/// wait for their slot again, confirm steps re-open the question,
/// action steps go back to ready-for-action.
pub fn apply(
    state: &mut TurnState,
    stack: &FlowStackManager,
    flows: &FlowRegistry,
    assignment: &SlotAssignment,
    is_modification: bool,
) -> Result<Vec<OutboundMessage>, EngineError> {
    let Some(instance) = state.flow_stack.top() else {
        return Ok(Vec::new());
    };
    let instance_id = instance.instance_id.clone();
    let cursor = instance.current_step.unwrap_or(0);
    let flow_name = instance.flow_name.clone();
    let flow = flows
        .get(&flow_name)
        .ok_or_else(|| EngineError::UnknownFlow(flow_name.clone()))?;

    let previous = stack.set_slot(state, &assignment.name, assignment.value.clone())?;
    record_flags(
        state,
        &assignment.name,
        assignment.previous_value.clone().or(previous),
        is_modification,
    );
    tracing::debug!(
        flow = %flow_name,
        slot = %assignment.name,
        modification = is_modification,
        step = cursor,
        "slot corrected, returning to origin step"
    );

    let mut messages = vec![OutboundMessage::info(format!(
        "Updated {} to {}.",
        assignment.name,
        render_value(&assignment.value)
    ))];

    match flow.step(cursor).cloned() {
        Some(CompiledStep::Collect { slot, prompt, .. }) => {
            let filled = state.slot_store.filled(&instance_id);
            let prompt = prompt
                .map(|p| interpolate(&p, &filled))
                .unwrap_or_else(|| format!("Please provide {slot}."));
            state.set_waiting(slot.clone())?;
            state.pending = PendingTask::Collect {
                slot,
                prompt: prompt.clone(),
            };
            messages.push(OutboundMessage::prompt(prompt));
        }
        Some(CompiledStep::Confirm { .. }) => {
            messages.extend(confirmation::refresh(state, flow.as_ref(), cursor)?);
        }
        Some(CompiledStep::Action { .. }) => {
            if state.phase != ConversationPhase::ReadyForAction {
                state.transition(ConversationPhase::ReadyForAction)?;
            }
        }
        _ => {
            // branch/jump/emit steps are never suspension points; there
            // is nothing to resume at, so close the turn out
            if state.phase != ConversationPhase::GeneratingResponse {
                state.transition(ConversationPhase::GeneratingResponse)?;
            }
        }
    }

    Ok(messages)
}
