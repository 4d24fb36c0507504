//! Step executor
//!
//! Given the active flow instance and its compiled step list, the
//! executor advances across every already-satisfied step in one pass
//! and stops at the first step that needs external input, producing the
//! turn's pending task. The loop is bounded by a hard iteration ceiling
//! so malformed step graphs terminate instead of spinning.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::definition::{CompiledStep, FlowRegistry};
use crate::errors::{EngineError, GENERIC_ERROR_TEXT};
use crate::handlers::confirmation;
use crate::stack::{FlowResult, FlowStackManager};
use crate::template::interpolate;
use crate::types::{ConversationPhase, OutboundMessage, PendingTask, TurnState};

/// Result of one external action call
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// The action ran; outputs are merged into the instance
    Success { outputs: HashMap<String, Value> },
    /// The action failed; the message is logged, never shown verbatim
    Failure { message: String },
}

impl ActionOutcome {
    /// Success without outputs
    pub fn success() -> Self {
        Self::Success {
            outputs: HashMap::new(),
        }
    }

    /// Success with a single output
    pub fn success_with_one(key: impl Into<String>, value: Value) -> Self {
        Self::Success {
            outputs: HashMap::from([(key.into(), value)]),
        }
    }

    /// Failure with a message
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }
}

/// The external side-effect boundary for action steps
///
/// Implementations are black boxes to the executor: they receive the
/// active instance's filled slots and either produce outputs or fail.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Unique action name
    fn name(&self) -> &str;

    /// Human-readable description, exposed to the classifier
    fn description(&self) -> &str {
        ""
    }

    /// Execute the action
    async fn execute(&self, slots: HashMap<String, Value>) -> ActionOutcome;
}

/// Action lookup table
///
/// Shared across conversations behind a lock; duplicate registration
/// overwrites with a logged warning rather than failing.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action handler
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        let name = handler.name().to_string();
        if self.actions.insert(name.clone(), handler).is_some() {
            tracing::warn!(action = %name, "action re-registered, overwriting");
        }
    }

    /// Get a handler by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.actions.get(name).cloned()
    }

    /// All registered action names
    pub fn names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }
}

/// Drives step advancement for the active flow instance
#[derive(Debug, Clone)]
pub struct StepExecutor {
    ceiling: usize,
}

impl StepExecutor {
    /// Create an executor with the configured iteration ceiling
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling: ceiling.max(1),
        }
    }

    /// Advance the active flow until it needs external input, fails, or
    /// completes (popping it and continuing in the revealed parent).
    ///
    /// Steps that already performed their observable effect this
    /// pause/resume cycle are recognized via `executed_step_marks` and
    /// skipped as effects while still producing their state delta, so
    /// re-entry after a resume is behaviorally transparent.
    pub async fn advance(
        &self,
        state: &mut TurnState,
        stack: &FlowStackManager,
        flows: &FlowRegistry,
        actions: &RwLock<ActionRegistry>,
    ) -> Result<Vec<OutboundMessage>, EngineError> {
        let mut messages = Vec::new();
        let mut iterations = 0usize;

        loop {
            let Some(instance) = state.flow_stack.top() else {
                if state.phase != ConversationPhase::GeneratingResponse {
                    state.transition(ConversationPhase::GeneratingResponse)?;
                }
                state.transition(ConversationPhase::Idle)?;
                return Ok(messages);
            };
            let instance_id = instance.instance_id.clone();
            let flow_name = instance.flow_name.clone();
            let cursor = instance.current_step.unwrap_or(0);

            let flow = flows
                .get(&flow_name)
                .ok_or_else(|| EngineError::UnknownFlow(flow_name.clone()))?;

            if cursor >= flow.len() {
                let outputs = instance.outputs.clone();
                stack.pop(state, outputs, FlowResult::Completed);
                tracing::info!(flow = %flow_name, instance_id = %instance_id, "flow completed");
                continue;
            }

            iterations += 1;
            if iterations > self.ceiling {
                tracing::warn!(
                    flow = %flow_name,
                    step = cursor,
                    limit = self.ceiling,
                    "step advancement ceiling hit, halting at last resolvable step"
                );
                return Err(EngineError::StepAdvancementLimitExceeded {
                    flow: flow_name,
                    limit: self.ceiling,
                });
            }

            set_cursor(state, cursor);
            let Some(step) = flow.step(cursor).cloned() else {
                set_cursor(state, flow.len());
                continue;
            };

            match step {
                CompiledStep::Collect {
                    slot, prompt, ..
                } => {
                    if state.slot_store.is_filled(&instance_id, &slot) {
                        set_cursor(state, cursor + 1);
                        continue;
                    }
                    let filled = state.slot_store.filled(&instance_id);
                    let prompt = prompt
                        .map(|p| interpolate(&p, &filled))
                        .unwrap_or_else(|| format!("Please provide {slot}."));
                    state.set_waiting(slot.clone())?;
                    messages.push(OutboundMessage::prompt(prompt.clone()));
                    state.pending = PendingTask::Collect { slot, prompt };
                    return Ok(messages);
                }
                CompiledStep::Confirm { .. } => {
                    messages.extend(confirmation::enter(state, flow.as_ref(), cursor)?);
                    return Ok(messages);
                }
                CompiledStep::Branch {
                    guard,
                    on_true,
                    on_false,
                    ..
                } => {
                    let filled = state.slot_store.filled(&instance_id);
                    let next = if guard.is_satisfied(&filled) {
                        on_true
                    } else {
                        on_false
                    };
                    if next <= cursor {
                        rewind(state, flow.as_ref(), &instance_id, next, cursor);
                    }
                    set_cursor(state, next);
                    continue;
                }
                CompiledStep::Jump { target, .. } => {
                    if target <= cursor {
                        rewind(state, flow.as_ref(), &instance_id, target, cursor);
                    }
                    set_cursor(state, target);
                    continue;
                }
                CompiledStep::Action { id, action } => {
                    if state.phase != ConversationPhase::ReadyForAction {
                        state.transition(ConversationPhase::ReadyForAction)?;
                    }
                    state.transition(ConversationPhase::ExecutingAction)?;

                    if state.is_executed(&instance_id, &id) {
                        tracing::debug!(
                            flow = %flow_name,
                            step_id = %id,
                            "action already executed this cycle, skipping side effect"
                        );
                        state.transition(ConversationPhase::GeneratingResponse)?;
                        set_cursor(state, cursor + 1);
                        continue;
                    }

                    let handler = { actions.read().await.get(&action) };
                    let Some(handler) = handler else {
                        let err = EngineError::UnknownAction(action.clone());
                        tracing::error!(
                            flow = %flow_name,
                            step_id = %id,
                            error = %err,
                            "action not found in registry"
                        );
                        state.transition(ConversationPhase::Error)?;
                        messages.push(OutboundMessage::error(GENERIC_ERROR_TEXT));
                        return Ok(messages);
                    };

                    let slots = state.slot_store.filled(&instance_id);
                    tracing::info!(
                        flow = %flow_name,
                        step_id = %id,
                        action = %action,
                        "action execution started"
                    );
                    match handler.execute(slots).await {
                        ActionOutcome::Success { outputs } => {
                            state.mark_executed(&instance_id, &id);
                            if let Some(top) = state.flow_stack.top_mut() {
                                top.outputs.extend(outputs);
                            }
                            state.transition(ConversationPhase::GeneratingResponse)?;
                            set_cursor(state, cursor + 1);
                            continue;
                        }
                        ActionOutcome::Failure { message } => {
                            tracing::error!(
                                flow = %flow_name,
                                step_id = %id,
                                action = %action,
                                error = %message,
                                "action execution failed"
                            );
                            state.transition(ConversationPhase::Error)?;
                            messages.push(OutboundMessage::error(GENERIC_ERROR_TEXT));
                            return Ok(messages);
                        }
                    }
                }
                CompiledStep::Emit {
                    id,
                    message,
                    wait_for_ack,
                } => {
                    if !state.is_executed(&instance_id, &id) {
                        let filled = state.slot_store.filled(&instance_id);
                        let text = interpolate(&message, &filled);
                        messages.push(OutboundMessage::info(text.clone()));
                        state.mark_executed(&instance_id, &id);
                        if wait_for_ack {
                            state.pending = PendingTask::Inform {
                                message: text,
                                wait_for_ack: true,
                            };
                            if state.phase != ConversationPhase::GeneratingResponse {
                                state.transition(ConversationPhase::GeneratingResponse)?;
                            }
                            return Ok(messages);
                        }
                    }
                    set_cursor(state, cursor + 1);
                    continue;
                }
            }
        }
    }
}

fn set_cursor(state: &mut TurnState, cursor: usize) {
    if let Some(top) = state.flow_stack.top_mut() {
        top.current_step = Some(cursor);
    }
}

/// A backward edge starts a new pass over the jumped-over steps: their
/// effect marks are dropped so emits/actions run again, and their
/// collected slots are cleared so the new pass prompts afresh instead
/// of silently reusing the previous iteration's answers.
fn rewind(
    state: &mut TurnState,
    flow: &crate::definition::CompiledFlow,
    instance_id: &str,
    target: usize,
    cursor: usize,
) {
    for index in target..=cursor {
        let Some(step) = flow.step(index) else {
            continue;
        };
        state.clear_mark(instance_id, step.id());
        if let CompiledStep::Collect { slot, .. } = step {
            state.slot_store.clear_slot(instance_id, slot);
        }
    }
}
