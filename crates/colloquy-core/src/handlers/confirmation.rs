//! Confirmation handler
//!
//! Owns the ready-for-confirmation -> confirming hop, the prompt
//! lifecycle (built on first entry, preserved verbatim on re-entry,
//! regenerated on mid-confirmation corrections), and the bounded
//! unclear-answer retry loop.

use crate::definition::{CompiledFlow, CompiledStep, FlowRegistry};
use crate::errors::{EngineError, GENERIC_ERROR_TEXT};
use crate::handlers::correction;
use crate::stack::FlowStackManager;
use crate::template::interpolate;
use crate::types::{
    ConfirmationAnswer, ConversationPhase, OutboundMessage, PendingTask, SlotAssignment, TurnState,
};

/// Enter (or re-enter) the confirm step at `cursor`.
///
/// First entry interpolates the step's template from current slot
/// values and remembers the result on the instance; re-entry after a
/// resume re-emits that exact message without rebuilding it. Missing
/// slots stay as literal placeholders - degraded output, not an error.
pub fn enter(
    state: &mut TurnState,
    flow: &CompiledFlow,
    cursor: usize,
) -> Result<Vec<OutboundMessage>, EngineError> {
    let Some(CompiledStep::Confirm { id, template, .. }) = flow.step(cursor) else {
        return Ok(Vec::new());
    };
    let (id, template) = (id.clone(), template.clone());
    let Some(instance) = state.flow_stack.top() else {
        return Ok(Vec::new());
    };
    let instance_id = instance.instance_id.clone();

    let first_entry = !state.is_executed(&instance_id, &id);
    let prompt = if first_entry {
        let filled = state.slot_store.filled(&instance_id);
        let prompt = interpolate(&template, &filled);
        state.mark_executed(&instance_id, &id);
        if let Some(top) = state.flow_stack.top_mut() {
            top.confirm_message = Some(prompt.clone());
        }
        prompt
    } else {
        match state.flow_stack.top().and_then(|t| t.confirm_message.clone()) {
            Some(preserved) => preserved,
            None => interpolate(&template, &state.slot_store.filled(&instance_id)),
        }
    };

    if state.phase != ConversationPhase::Confirming {
        state.transition(ConversationPhase::ReadyForConfirmation)?;
        state.transition(ConversationPhase::Confirming)?;
    }
    state.pending = PendingTask::Confirm {
        prompt: prompt.clone(),
    };
    Ok(vec![OutboundMessage::confirmation(prompt)])
}

/// Rebuild the confirmation prompt from current slot values and stay
/// (or land) in the confirming phase. Used after mid-confirmation slot
/// updates, where re-emitting the stale prompt would be wrong.
pub fn refresh(
    state: &mut TurnState,
    flow: &CompiledFlow,
    cursor: usize,
) -> Result<Vec<OutboundMessage>, EngineError> {
    let Some(CompiledStep::Confirm { id, template, .. }) = flow.step(cursor) else {
        return Ok(Vec::new());
    };
    let (id, template) = (id.clone(), template.clone());
    let Some(instance) = state.flow_stack.top() else {
        return Ok(Vec::new());
    };
    let instance_id = instance.instance_id.clone();

    let filled = state.slot_store.filled(&instance_id);
    let prompt = interpolate(&template, &filled);
    state.mark_executed(&instance_id, &id);
    if let Some(top) = state.flow_stack.top_mut() {
        top.confirm_message = Some(prompt.clone());
    }

    if state.phase != ConversationPhase::Confirming {
        state.transition(ConversationPhase::Confirming)?;
    }
    state.pending = PendingTask::Confirm {
        prompt: prompt.clone(),
    };
    Ok(vec![OutboundMessage::confirmation(prompt)])
}

/// Slot values arriving while confirming are corrections, not answers:
/// apply each update, then regenerate the confirmation prompt once.
/// This path is unconditional - it never needs per-flow opt-in.
pub fn correct_while_confirming(
    state: &mut TurnState,
    stack: &FlowStackManager,
    flows: &FlowRegistry,
    assignments: &[SlotAssignment],
    is_modification: bool,
) -> Result<Vec<OutboundMessage>, EngineError> {
    let Some(instance) = state.flow_stack.top() else {
        return Ok(Vec::new());
    };
    let cursor = instance.current_step.unwrap_or(0);
    let flow_name = instance.flow_name.clone();
    let flow = flows
        .get(&flow_name)
        .ok_or_else(|| EngineError::UnknownFlow(flow_name))?;

    let mut messages = Vec::new();
    for assignment in assignments {
        let previous = stack.set_slot(state, &assignment.name, assignment.value.clone())?;
        correction::record_flags(
            state,
            &assignment.name,
            assignment.previous_value.clone().or(previous),
            is_modification,
        );
        tracing::debug!(
            slot = %assignment.name,
            "slot updated while confirming, regenerating prompt"
        );
    }
    messages.extend(refresh(state, flow.as_ref(), cursor)?);
    Ok(messages)
}

/// Handle a yes/no/unclear answer while in the confirming phase.
pub fn answer(
    state: &mut TurnState,
    stack: &FlowStackManager,
    flows: &FlowRegistry,
    answer: ConfirmationAnswer,
    max_retries: u32,
) -> Result<Vec<OutboundMessage>, EngineError> {
    let Some(instance) = state.flow_stack.top() else {
        return Ok(Vec::new());
    };
    let instance_id = instance.instance_id.clone();
    let cursor = instance.current_step.unwrap_or(0);
    let flow_name = instance.flow_name.clone();
    let prior_retries = instance.confirm_retries;
    let flow = flows
        .get(&flow_name)
        .ok_or_else(|| EngineError::UnknownFlow(flow_name.clone()))?;

    let (step_id, required_slots) = match flow.step(cursor) {
        Some(CompiledStep::Confirm {
            id, required_slots, ..
        }) => (id.clone(), required_slots.clone()),
        _ => (String::new(), Vec::new()),
    };

    match answer {
        ConfirmationAnswer::Yes => {
            clear_confirmation_state(state, &instance_id, &step_id, false);
            if let Some(top) = state.flow_stack.top_mut() {
                top.current_step = Some(cursor + 1);
            }
            state.transition(ConversationPhase::ReadyForAction)?;
            Ok(vec![OutboundMessage::info("Confirmed.")])
        }
        ConfirmationAnswer::No => {
            clear_confirmation_state(state, &instance_id, &step_id, true);
            let target = required_slots
                .iter()
                .find_map(|slot| flow.collect_index_for_slot(slot))
                .or_else(|| flow.first_collect_index());

            match target.and_then(|index| flow.step(index).map(|s| (index, s.clone()))) {
                Some((index, CompiledStep::Collect { slot, prompt, .. })) => {
                    if let Some(top) = state.flow_stack.top_mut() {
                        top.current_step = Some(index);
                    }
                    let filled = state.slot_store.filled(&instance_id);
                    let prompt = prompt
                        .map(|p| interpolate(&p, &filled))
                        .unwrap_or_else(|| format!("Please provide {slot}."));
                    state.set_waiting(slot.clone())?;
                    state.pending = PendingTask::Collect {
                        slot,
                        prompt: prompt.clone(),
                    };
                    Ok(vec![
                        OutboundMessage::info("Okay, let's fix that."),
                        OutboundMessage::prompt(prompt),
                    ])
                }
                _ => {
                    // no collect step to return to; re-open the question
                    refresh(state, flow.as_ref(), cursor)
                }
            }
        }
        ConfirmationAnswer::Unclear => {
            let retries = prior_retries + 1;
            if retries >= max_retries {
                let err = EngineError::ConfirmationRetriesExceeded { retries };
                tracing::warn!(
                    flow = %flow_name,
                    retries,
                    max_retries,
                    error = %err,
                    "confirmation abandoned after repeated unclear answers"
                );
                if let Some(top) = state.flow_stack.top_mut() {
                    top.confirm_retries = 0;
                }
                state.transition(ConversationPhase::Error)?;
                Ok(vec![OutboundMessage::error(GENERIC_ERROR_TEXT)])
            } else {
                if let Some(top) = state.flow_stack.top_mut() {
                    top.confirm_retries = retries;
                }
                let prompt = state
                    .flow_stack
                    .top()
                    .and_then(|t| t.confirm_message.clone())
                    .unwrap_or_default();
                state.pending = PendingTask::Confirm {
                    prompt: prompt.clone(),
                };
                Ok(vec![
                    OutboundMessage::info("Sorry, I didn't catch that - yes or no?"),
                    OutboundMessage::confirmation(prompt),
                ])
            }
        }
    }
}

fn clear_confirmation_state(
    state: &mut TurnState,
    instance_id: &str,
    step_id: &str,
    clear_mark: bool,
) {
    if let Some(top) = state.flow_stack.top_mut() {
        top.confirm_retries = 0;
        top.confirm_message = None;
    }
    if clear_mark && !step_id.is_empty() {
        state.clear_mark(instance_id, step_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FlowDefinition, FlowRegistry, StepDef};
    use crate::types::MessageKind;
    use serde_json::json;
    use std::collections::HashMap;

    fn booking_flow() -> FlowDefinition {
        FlowDefinition::new(
            "book_flight",
            vec![
                StepDef::collect("origin", "origin", "Where from?"),
                StepDef::collect("destination", "destination", "Where to?"),
                StepDef::confirm("confirm", "Fly {origin} to {destination}?")
                    .with_required_slots(vec!["origin".to_string(), "destination".to_string()]),
                StepDef::action("search", "search_flights"),
            ],
        )
    }

    fn confirming_fixture() -> (TurnState, FlowStackManager, FlowRegistry) {
        let mut flows = FlowRegistry::new();
        flows.register(booking_flow()).unwrap();
        let stack = FlowStackManager::new(10, 50);
        let mut state = TurnState::new();
        stack.push(&mut state, "book_flight", HashMap::new()).unwrap();
        stack.set_slot(&mut state, "origin", json!("Madrid")).unwrap();
        stack
            .set_slot(&mut state, "destination", json!("Barcelona"))
            .unwrap();
        if let Some(top) = state.flow_stack.top_mut() {
            top.current_step = Some(2);
        }
        state.transition(ConversationPhase::Understanding).unwrap();
        let flow = flows.get("book_flight").unwrap();
        enter(&mut state, flow.as_ref(), 2).unwrap();
        (state, stack, flows)
    }

    #[test]
    fn test_first_entry_builds_and_preserves_the_prompt() {
        let (state, _, _) = confirming_fixture();
        assert_eq!(state.phase, ConversationPhase::Confirming);
        let preserved = state.flow_stack.top().unwrap().confirm_message.clone();
        assert_eq!(preserved.as_deref(), Some("Fly Madrid to Barcelona?"));
        assert!(matches!(&state.pending, PendingTask::Confirm { .. }));
    }

    #[test]
    fn test_reentry_reuses_the_preserved_prompt_verbatim() {
        let (mut state, stack, flows) = confirming_fixture();
        // a later slot write must not leak into a re-entry render
        stack.set_slot(&mut state, "origin", json!("Valencia")).unwrap();

        let flow = flows.get("book_flight").unwrap();
        let messages = enter(&mut state, flow.as_ref(), 2).unwrap();
        assert_eq!(messages[0].text, "Fly Madrid to Barcelona?");
    }

    #[test]
    fn test_missing_slot_renders_as_literal_placeholder() {
        let mut flows = FlowRegistry::new();
        flows.register(booking_flow()).unwrap();
        let stack = FlowStackManager::new(10, 50);
        let mut state = TurnState::new();
        stack.push(&mut state, "book_flight", HashMap::new()).unwrap();
        stack.set_slot(&mut state, "origin", json!("Madrid")).unwrap();
        if let Some(top) = state.flow_stack.top_mut() {
            top.current_step = Some(2);
        }
        state.transition(ConversationPhase::Understanding).unwrap();

        let flow = flows.get("book_flight").unwrap();
        let messages = enter(&mut state, flow.as_ref(), 2).unwrap();
        assert_eq!(messages[0].text, "Fly Madrid to {destination}?");
    }

    #[test]
    fn test_yes_moves_past_the_confirm_step_to_ready_for_action() {
        let (mut state, stack, flows) = confirming_fixture();
        answer(
            &mut state,
            &stack,
            &flows,
            ConfirmationAnswer::Yes,
            3,
        )
        .unwrap();

        assert_eq!(state.phase, ConversationPhase::ReadyForAction);
        let top = state.flow_stack.top().unwrap();
        assert_eq!(top.current_step, Some(3));
        assert!(top.confirm_message.is_none());
        assert_eq!(top.confirm_retries, 0);
    }

    #[test]
    fn test_no_returns_to_the_first_required_collect_step() {
        let (mut state, stack, flows) = confirming_fixture();
        let messages = answer(
            &mut state,
            &stack,
            &flows,
            ConfirmationAnswer::No,
            3,
        )
        .unwrap();

        assert_eq!(state.phase, ConversationPhase::WaitingForSlot);
        assert_eq!(state.awaited_slot.as_deref(), Some("origin"));
        assert_eq!(state.flow_stack.top().unwrap().current_step, Some(0));
        assert!(messages.iter().any(|m| m.kind == MessageKind::Prompt));
    }

    #[test]
    fn test_unclear_reprompts_until_the_bound_then_errors() {
        let (mut state, stack, flows) = confirming_fixture();

        for round in 1..3u32 {
            let messages = answer(
                &mut state,
                &stack,
                &flows,
                ConfirmationAnswer::Unclear,
                3,
            )
            .unwrap();
            assert_eq!(state.phase, ConversationPhase::Confirming);
            assert_eq!(state.flow_stack.top().unwrap().confirm_retries, round);
            assert!(messages
                .iter()
                .any(|m| m.text == "Fly Madrid to Barcelona?"));
        }

        let messages = answer(
            &mut state,
            &stack,
            &flows,
            ConfirmationAnswer::Unclear,
            3,
        )
        .unwrap();
        assert_eq!(state.phase, ConversationPhase::Error);
        assert_eq!(state.flow_stack.top().unwrap().confirm_retries, 0);
        assert_eq!(messages[0].kind, MessageKind::Error);
    }

    #[test]
    fn test_mid_confirmation_correction_regenerates_the_prompt() {
        let (mut state, stack, flows) = confirming_fixture();
        let messages = correct_while_confirming(
            &mut state,
            &stack,
            &flows,
            &[SlotAssignment::new("destination", json!("Seville"))
                .with_previous(json!("Barcelona"))],
            false,
        )
        .unwrap();

        assert_eq!(state.phase, ConversationPhase::Confirming);
        let text = &messages.last().unwrap().text;
        assert!(text.contains("Seville"));
        assert!(!text.contains("Barcelona"));
        assert_eq!(
            state.transient.get_str("correction_slot"),
            Some("destination")
        );
        assert_eq!(
            state.transient.get("correction_value"),
            Some(&json!("Barcelona"))
        );
    }
}
