//! Digression / clarification handler
//!
//! Contract: never mutates the flow stack. Both paths only read the
//! active instance to produce an answer, then re-emit the exact prompt
//! the user was already being asked - same awaited slot, same phase.

use crate::definition::{CompiledStep, FlowRegistry};
use crate::errors::EngineError;
use crate::template::interpolate;
use crate::types::{ConversationPhase, OutboundMessage, PendingTask, TurnState};

/// Handle an off-task utterance: acknowledge it, then steer back to
/// whatever was being asked.
pub fn digress(
    state: &mut TurnState,
    flows: &FlowRegistry,
    utterance: &str,
) -> Result<Vec<OutboundMessage>, EngineError> {
    tracing::debug!(utterance = %utterance, "digression, active task untouched");
    let mut messages = vec![OutboundMessage::answer(
        "Good question - let's finish what we're doing first.",
    )];
    messages.extend(reprompt_current(state, flows));
    Ok(messages)
}

/// Explain why a slot is being collected, sourced from the collect
/// step's description, then re-ask for it.
pub fn clarify(
    state: &mut TurnState,
    flows: &FlowRegistry,
    target_slot: Option<&str>,
) -> Result<Vec<OutboundMessage>, EngineError> {
    let target = target_slot
        .map(str::to_string)
        .or_else(|| state.awaited_slot.clone());

    let explanation = target.as_deref().and_then(|slot| {
        let instance = state.flow_stack.top()?;
        let flow = flows.get(&instance.flow_name)?;
        let index = flow.collect_index_for_slot(slot)?;
        match flow.step(index) {
            Some(CompiledStep::Collect {
                description: Some(text),
                ..
            }) => Some(text.clone()),
            _ => Some(format!(
                "I need {slot} to finish {} for you.",
                instance.flow_name
            )),
        }
    });

    let mut messages = vec![OutboundMessage::answer(explanation.unwrap_or_else(|| {
        "I ask so I can complete the task for you.".to_string()
    }))];
    messages.extend(reprompt_current(state, flows));
    Ok(messages)
}

/// Re-emit the prompt matching the current suspension point, restoring
/// the pending task without touching stack, phase, or awaited slot.
pub(crate) fn reprompt_current(
    state: &mut TurnState,
    flows: &FlowRegistry,
) -> Vec<OutboundMessage> {
    let Some(instance) = state.flow_stack.top() else {
        return Vec::new();
    };
    let instance_id = instance.instance_id.clone();
    let cursor = instance.current_step.unwrap_or(0);
    let Some(flow) = flows.get(&instance.flow_name) else {
        return Vec::new();
    };

    match state.phase {
        ConversationPhase::WaitingForSlot => {
            let (slot, prompt) = match flow.step(cursor) {
                Some(CompiledStep::Collect { slot, prompt, .. }) => {
                    (slot.clone(), prompt.clone())
                }
                _ => match &state.awaited_slot {
                    Some(slot) => (slot.clone(), None),
                    None => return Vec::new(),
                },
            };
            let filled = state.slot_store.filled(&instance_id);
            let prompt = prompt
                .map(|p| interpolate(&p, &filled))
                .unwrap_or_else(|| format!("Please provide {slot}."));
            state.pending = PendingTask::Collect {
                slot,
                prompt: prompt.clone(),
            };
            vec![OutboundMessage::prompt(prompt)]
        }
        ConversationPhase::Confirming => {
            let Some(prompt) = state.flow_stack.top().and_then(|t| t.confirm_message.clone())
            else {
                return Vec::new();
            };
            state.pending = PendingTask::Confirm {
                prompt: prompt.clone(),
            };
            vec![OutboundMessage::confirmation(prompt)]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FlowDefinition, StepDef};
    use crate::stack::FlowStackManager;
    use crate::types::MessageKind;
    use serde_json::json;
    use std::collections::HashMap;

    fn fixture() -> (TurnState, FlowRegistry) {
        let mut flows = FlowRegistry::new();
        flows
            .register(FlowDefinition::new(
                "book_flight",
                vec![
                    StepDef::collect("origin", "origin", "Where from?")
                        .with_description("The departure city sets which airports I search."),
                    StepDef::collect("destination", "destination", "Where to?"),
                ],
            ))
            .unwrap();

        let stack = FlowStackManager::new(10, 50);
        let mut state = TurnState::new();
        stack.push(&mut state, "book_flight", HashMap::new()).unwrap();
        state.transition(ConversationPhase::Understanding).unwrap();
        state.set_waiting("origin").unwrap();
        (state, flows)
    }

    #[test]
    fn test_digression_leaves_stack_phase_and_awaited_slot_unchanged() {
        let (mut state, flows) = fixture();
        let stack_before = serde_json::to_vec(&state.flow_stack).unwrap();
        let phase_before = state.phase;
        let awaited_before = state.awaited_slot.clone();

        let messages = digress(&mut state, &flows, "what's the weather like?").unwrap();

        let stack_after = serde_json::to_vec(&state.flow_stack).unwrap();
        assert_eq!(stack_before, stack_after);
        assert_eq!(state.phase, phase_before);
        assert_eq!(state.awaited_slot, awaited_before);
        assert!(messages.iter().any(|m| m.kind == MessageKind::Answer));
        assert!(messages.iter().any(|m| m.text == "Where from?"));
    }

    #[test]
    fn test_digression_restores_the_pending_task() {
        let (mut state, flows) = fixture();
        state.pending = Default::default();

        digress(&mut state, &flows, "tell me a joke").unwrap();

        assert!(matches!(
            &state.pending,
            PendingTask::Collect { slot, .. } if slot == "origin"
        ));
    }

    #[test]
    fn test_clarification_sources_the_step_description() {
        let (mut state, flows) = fixture();
        let messages = clarify(&mut state, &flows, None).unwrap();

        assert_eq!(
            messages[0].text,
            "The departure city sets which airports I search."
        );
        assert_eq!(messages[0].kind, MessageKind::Answer);
        assert!(messages.iter().any(|m| m.text == "Where from?"));
        assert_eq!(state.awaited_slot.as_deref(), Some("origin"));
    }

    #[test]
    fn test_clarification_for_undescribed_slot_falls_back() {
        let (mut state, flows) = fixture();
        let messages = clarify(&mut state, &flows, Some("destination")).unwrap();
        assert!(messages[0].text.contains("destination"));
        // the re-prompt is still for the slot actually being awaited
        assert!(messages.iter().any(|m| m.text == "Where from?"));
    }

    #[test]
    fn test_digression_with_no_active_flow_only_answers() {
        let flows = FlowRegistry::new();
        let mut state = TurnState::new();
        let messages = digress(&mut state, &flows, "hello?").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageKind::Answer);
        assert_eq!(state.phase, ConversationPhase::Idle);
    }
}
