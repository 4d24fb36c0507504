//! Cancellation handler
//!
//! Cancelling is a first-class command, not a control-flow primitive:
//! the active flow is popped with a cancelled result and the revealed
//! parent, if any, picks up exactly where it was paused.

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::definition::FlowRegistry;
use crate::errors::EngineError;
use crate::executor::{ActionRegistry, StepExecutor};
use crate::stack::{FlowResult, FlowStackManager};
use crate::types::{OutboundMessage, TurnState};

/// Cancel the active flow and resume the parent, if there is one.
pub async fn apply(
    state: &mut TurnState,
    stack: &FlowStackManager,
    executor: &StepExecutor,
    flows: &FlowRegistry,
    actions: &RwLock<ActionRegistry>,
) -> Result<Vec<OutboundMessage>, EngineError> {
    let mut messages = Vec::new();

    match stack.pop(state, HashMap::new(), FlowResult::Cancelled) {
        Some(cancelled) => {
            tracing::info!(
                flow = %cancelled.flow_name,
                instance_id = %cancelled.instance_id,
                "flow cancelled by user"
            );
            messages.push(OutboundMessage::info(format!(
                "Okay, I've dropped {}.",
                cancelled.flow_name
            )));
        }
        None => {
            messages.push(OutboundMessage::info("There's nothing to cancel."));
        }
    }

    // re-prompts the resumed parent, or winds down to idle
    messages.extend(executor.advance(state, stack, flows, actions).await?);
    Ok(messages)
}
